//! Workflow statistics endpoints

use axum::{
    extract::{Query, State},
    Json,
};
use serde::Serialize;
use utoipa::ToSchema;

use crate::{error::AppResult, models::defect::DefectQuery};

/// Single label/count entry
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct StatEntry {
    pub label: String,
    pub value: i64,
}

/// Aggregate workflow statistics
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct StatsResponse {
    pub total: i64,
    pub by_status: Vec<StatEntry>,
    pub repeated_count: i64,
    pub repeated_percent: f64,
    pub sent_to_vendor_count: i64,
}

/// Aggregate counts over defect records
#[utoipa::path(
    get,
    path = "/defects/stats",
    tag = "stats",
    params(
        ("server_id" = Option<i32>, Query, description = "Filter by server under repair"),
        ("repair_part_type" = Option<String>, Query, description = "Filter by part type"),
        ("diagnostician_id" = Option<i32>, Query, description = "Filter by diagnostician"),
        ("is_repeated_defect" = Option<bool>, Query, description = "Filter repeated defects"),
        ("date_from" = Option<String>, Query, description = "Detected at or after (RFC 3339)"),
        ("date_to" = Option<String>, Query, description = "Detected at or before (RFC 3339)"),
        ("search" = Option<String>, Query, description = "Free-text search"),
        ("sla_breached" = Option<bool>, Query, description = "Filter by SLA breach")
    ),
    responses(
        (status = 200, description = "Workflow statistics", body = StatsResponse)
    )
)]
pub async fn get_stats(
    State(state): State<crate::AppState>,
    Query(query): Query<DefectQuery>,
) -> AppResult<Json<StatsResponse>> {
    let stats = state.services.stats.get_stats(&query).await?;
    Ok(Json(stats))
}
