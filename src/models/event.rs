//! Defect audit event model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

use super::enums::DefectStatus;

/// One append-only audit entry per workflow mutation
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct DefectEvent {
    pub id: i32,
    pub defect_record_id: i32,
    pub actor_id: Option<i32>,
    pub operation: String,
    pub from_status: Option<DefectStatus>,
    pub to_status: Option<DefectStatus>,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}
