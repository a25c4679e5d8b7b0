//! Defect workflow endpoints
//!
//! Thin dispatch over the workflow service: each handler maps its request
//! body onto a named workflow operation and returns the updated record.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    error::AppResult,
    models::{
        defect::{
            CreateDefect, DefectDetails, DefectQuery, DiagnosisPayload, IssueSubstitutePayload,
            NotesPayload, ReplacementPayload, ResolvePayload, VendorShipmentPayload,
        },
        enums::{DefectStatus, RepairPartType},
        event::DefectEvent,
    },
};

/// Create defect record request
#[derive(Deserialize, ToSchema)]
pub struct CreateDefectRequest {
    /// Asset under repair
    pub server_id: i32,
    pub problem_description: String,
    /// Detection time; defaults to now
    pub detected_at: Option<DateTime<Utc>>,
    pub diagnostician_id: Option<i32>,
    pub cluster_code: Option<String>,
    pub has_acceptance_cert: Option<bool>,
    /// Acting user, recorded in the audit trail
    pub actor_id: Option<i32>,
}

/// Request body carrying only the acting user
#[derive(Deserialize, ToSchema)]
pub struct ActorRequest {
    pub actor_id: Option<i32>,
}

#[derive(Deserialize, ToSchema)]
pub struct CompleteDiagnosisRequest {
    pub actor_id: Option<i32>,
    pub repair_part_type: RepairPartType,
    pub diagnosis_result: String,
    pub defect_part_serial_vendor: Option<String>,
    pub defect_part_serial_manufacturer: Option<String>,
}

#[derive(Deserialize, ToSchema)]
pub struct WaitingPartsRequest {
    pub actor_id: Option<i32>,
    pub notes: Option<String>,
}

#[derive(Deserialize, ToSchema)]
pub struct ReserveComponentRequest {
    pub actor_id: Option<i32>,
    pub inventory_item_id: i32,
}

#[derive(Deserialize, ToSchema)]
pub struct ReplacementRequest {
    pub actor_id: Option<i32>,
    pub replacement_part_serial_vendor: String,
    pub replacement_part_serial_manufacturer: Option<String>,
}

#[derive(Deserialize, ToSchema)]
pub struct SendToVendorRequest {
    pub actor_id: Option<i32>,
    pub vendor_ticket_number: String,
}

#[derive(Deserialize, ToSchema)]
pub struct IssueSubstituteRequest {
    pub actor_id: Option<i32>,
    pub substitute_server_id: i32,
    pub substitute_server_serial: Option<String>,
}

#[derive(Deserialize, ToSchema)]
pub struct ResolveRequest {
    pub actor_id: Option<i32>,
    pub resolution: String,
}

#[derive(Deserialize, ToSchema)]
pub struct UpdateStatusRequest {
    pub actor_id: Option<i32>,
    pub status: DefectStatus,
    pub comment: Option<String>,
}

#[derive(Deserialize, ToSchema)]
pub struct UpdateNotesRequest {
    pub actor_id: Option<i32>,
    pub notes: Option<String>,
    pub resolution: Option<String>,
}

/// Paginated defect listing
#[derive(Serialize, ToSchema)]
pub struct DefectListResponse {
    pub rows: Vec<DefectDetails>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
}

/// Operations currently legal for a record
#[derive(Serialize, ToSchema)]
pub struct ActionsResponse {
    pub actions: Vec<String>,
}

/// Availability of an inventory item or substitute candidate
#[derive(Serialize, ToSchema)]
pub struct AvailabilityResponse {
    pub id: i32,
    pub available: bool,
}

/// List defect records with filters and pagination
#[utoipa::path(
    get,
    path = "/defects",
    tag = "defects",
    params(
        ("server_id" = Option<i32>, Query, description = "Filter by server under repair"),
        ("status" = Option<DefectStatus>, Query, description = "Filter by lifecycle status"),
        ("repair_part_type" = Option<RepairPartType>, Query, description = "Filter by part type"),
        ("diagnostician_id" = Option<i32>, Query, description = "Filter by diagnostician"),
        ("is_repeated_defect" = Option<bool>, Query, description = "Filter repeated defects"),
        ("date_from" = Option<String>, Query, description = "Detected at or after (RFC 3339)"),
        ("date_to" = Option<String>, Query, description = "Detected at or before (RFC 3339)"),
        ("search" = Option<String>, Query, description = "Free-text search"),
        ("sla_breached" = Option<bool>, Query, description = "Filter by SLA breach"),
        ("page" = Option<i64>, Query, description = "Page number (default: 1)"),
        ("per_page" = Option<i64>, Query, description = "Rows per page (default: 20)")
    ),
    responses(
        (status = 200, description = "Defect records", body = DefectListResponse)
    )
)]
pub async fn list_defects(
    State(state): State<crate::AppState>,
    Query(query): Query<DefectQuery>,
) -> AppResult<Json<DefectListResponse>> {
    let (rows, total) = state.services.workflow.list(&query).await?;

    Ok(Json(DefectListResponse {
        rows,
        total,
        page: query.page.unwrap_or(1),
        per_page: query.per_page.unwrap_or(20),
    }))
}

/// Open a new defect record
#[utoipa::path(
    post,
    path = "/defects",
    tag = "defects",
    request_body = CreateDefectRequest,
    responses(
        (status = 201, description = "Defect record created", body = DefectDetails),
        (status = 400, description = "Invalid request"),
        (status = 409, description = "Server already has an open defect record")
    )
)]
pub async fn create_defect(
    State(state): State<crate::AppState>,
    Json(request): Json<CreateDefectRequest>,
) -> AppResult<(StatusCode, Json<DefectDetails>)> {
    let data = CreateDefect {
        server_id: request.server_id,
        problem_description: request.problem_description,
        detected_at: request.detected_at,
        diagnostician_id: request.diagnostician_id,
        cluster_code: request.cluster_code,
        has_acceptance_cert: request.has_acceptance_cert,
    };

    let details = state
        .services
        .workflow
        .create(&data, request.actor_id)
        .await?;
    Ok((StatusCode::CREATED, Json(details)))
}

/// Get a defect record with computed SLA fields
#[utoipa::path(
    get,
    path = "/defects/{id}",
    tag = "defects",
    params(("id" = i32, Path, description = "Defect record ID")),
    responses(
        (status = 200, description = "Defect record", body = DefectDetails),
        (status = 404, description = "Record not found")
    )
)]
pub async fn get_defect(
    State(state): State<crate::AppState>,
    Path(id): Path<i32>,
) -> AppResult<Json<DefectDetails>> {
    let details = state.services.workflow.get(id).await?;
    Ok(Json(details))
}

/// Operations currently legal for a record
#[utoipa::path(
    get,
    path = "/defects/{id}/actions",
    tag = "defects",
    params(("id" = i32, Path, description = "Defect record ID")),
    responses(
        (status = 200, description = "Available operations", body = ActionsResponse),
        (status = 404, description = "Record not found")
    )
)]
pub async fn get_available_actions(
    State(state): State<crate::AppState>,
    Path(id): Path<i32>,
) -> AppResult<Json<ActionsResponse>> {
    let actions = state.services.workflow.available_actions(id).await?;
    Ok(Json(ActionsResponse {
        actions: actions.into_iter().map(String::from).collect(),
    }))
}

/// Audit trail for a record
#[utoipa::path(
    get,
    path = "/defects/{id}/history",
    tag = "defects",
    params(("id" = i32, Path, description = "Defect record ID")),
    responses(
        (status = 200, description = "Audit events, oldest first", body = Vec<DefectEvent>),
        (status = 404, description = "Record not found")
    )
)]
pub async fn get_history(
    State(state): State<crate::AppState>,
    Path(id): Path<i32>,
) -> AppResult<Json<Vec<DefectEvent>>> {
    let events = state.services.workflow.history(id).await?;
    Ok(Json(events))
}

/// Begin diagnosis (NEW -> DIAGNOSING)
#[utoipa::path(
    post,
    path = "/defects/{id}/start-diagnosis",
    tag = "defects",
    params(("id" = i32, Path, description = "Defect record ID")),
    request_body = ActorRequest,
    responses(
        (status = 200, description = "Diagnosis started", body = DefectDetails),
        (status = 404, description = "Record not found"),
        (status = 409, description = "Not legal from current status")
    )
)]
pub async fn start_diagnosis(
    State(state): State<crate::AppState>,
    Path(id): Path<i32>,
    Json(request): Json<ActorRequest>,
) -> AppResult<Json<DefectDetails>> {
    let details = state
        .services
        .workflow
        .start_diagnosis(id, request.actor_id)
        .await?;
    Ok(Json(details))
}

/// Record the diagnosis (DIAGNOSING -> WAITING_PARTS or REPAIRING)
#[utoipa::path(
    post,
    path = "/defects/{id}/complete-diagnosis",
    tag = "defects",
    params(("id" = i32, Path, description = "Defect record ID")),
    request_body = CompleteDiagnosisRequest,
    responses(
        (status = 200, description = "Diagnosis recorded", body = DefectDetails),
        (status = 400, description = "Invalid request"),
        (status = 404, description = "Record not found"),
        (status = 409, description = "Not legal from current status")
    )
)]
pub async fn complete_diagnosis(
    State(state): State<crate::AppState>,
    Path(id): Path<i32>,
    Json(request): Json<CompleteDiagnosisRequest>,
) -> AppResult<Json<DefectDetails>> {
    let payload = DiagnosisPayload {
        repair_part_type: request.repair_part_type,
        diagnosis_result: request.diagnosis_result,
        defect_part_serial_vendor: request.defect_part_serial_vendor,
        defect_part_serial_manufacturer: request.defect_part_serial_manufacturer,
    };
    let details = state
        .services
        .workflow
        .complete_diagnosis(id, request.actor_id, &payload)
        .await?;
    Ok(Json(details))
}

/// Park the record while parts are sourced
#[utoipa::path(
    post,
    path = "/defects/{id}/waiting-parts",
    tag = "defects",
    params(("id" = i32, Path, description = "Defect record ID")),
    request_body = WaitingPartsRequest,
    responses(
        (status = 200, description = "Record set to waiting for parts", body = DefectDetails),
        (status = 404, description = "Record not found"),
        (status = 409, description = "Not legal from current status")
    )
)]
pub async fn set_waiting_parts(
    State(state): State<crate::AppState>,
    Path(id): Path<i32>,
    Json(request): Json<WaitingPartsRequest>,
) -> AppResult<Json<DefectDetails>> {
    let details = state
        .services
        .workflow
        .set_waiting_parts(id, request.actor_id, request.notes.as_deref())
        .await?;
    Ok(Json(details))
}

/// Reserve a spare component for this record
#[utoipa::path(
    post,
    path = "/defects/{id}/reserve",
    tag = "defects",
    params(("id" = i32, Path, description = "Defect record ID")),
    request_body = ReserveComponentRequest,
    responses(
        (status = 200, description = "Component reserved", body = DefectDetails),
        (status = 404, description = "Record not found"),
        (status = 409, description = "Item already reserved by another record")
    )
)]
pub async fn reserve_component(
    State(state): State<crate::AppState>,
    Path(id): Path<i32>,
    Json(request): Json<ReserveComponentRequest>,
) -> AppResult<Json<DefectDetails>> {
    let details = state
        .services
        .workflow
        .reserve_component(id, request.actor_id, request.inventory_item_id)
        .await?;
    Ok(Json(details))
}

/// Begin the repair (WAITING_PARTS or DIAGNOSING -> REPAIRING)
#[utoipa::path(
    post,
    path = "/defects/{id}/start-repair",
    tag = "defects",
    params(("id" = i32, Path, description = "Defect record ID")),
    request_body = ActorRequest,
    responses(
        (status = 200, description = "Repair started", body = DefectDetails),
        (status = 404, description = "Record not found"),
        (status = 409, description = "Not legal from current status or no reservation")
    )
)]
pub async fn start_repair(
    State(state): State<crate::AppState>,
    Path(id): Path<i32>,
    Json(request): Json<ActorRequest>,
) -> AppResult<Json<DefectDetails>> {
    let details = state
        .services
        .workflow
        .start_repair(id, request.actor_id)
        .await?;
    Ok(Json(details))
}

/// Record the part replacement; the reservation is consumed
#[utoipa::path(
    post,
    path = "/defects/{id}/replacement",
    tag = "defects",
    params(("id" = i32, Path, description = "Defect record ID")),
    request_body = ReplacementRequest,
    responses(
        (status = 200, description = "Replacement recorded", body = DefectDetails),
        (status = 400, description = "Invalid request"),
        (status = 404, description = "Record not found"),
        (status = 409, description = "Not legal from current status")
    )
)]
pub async fn perform_replacement(
    State(state): State<crate::AppState>,
    Path(id): Path<i32>,
    Json(request): Json<ReplacementRequest>,
) -> AppResult<Json<DefectDetails>> {
    let payload = ReplacementPayload {
        replacement_part_serial_vendor: request.replacement_part_serial_vendor,
        replacement_part_serial_manufacturer: request.replacement_part_serial_manufacturer,
    };
    let details = state
        .services
        .workflow
        .perform_replacement(id, request.actor_id, &payload)
        .await?;
    Ok(Json(details))
}

/// Ship the defective unit to the vendor (RMA)
#[utoipa::path(
    post,
    path = "/defects/{id}/send-to-vendor",
    tag = "defects",
    params(("id" = i32, Path, description = "Defect record ID")),
    request_body = SendToVendorRequest,
    responses(
        (status = 200, description = "Shipment recorded", body = DefectDetails),
        (status = 400, description = "Invalid request"),
        (status = 404, description = "Record not found"),
        (status = 409, description = "Not legal from current status")
    )
)]
pub async fn send_to_vendor(
    State(state): State<crate::AppState>,
    Path(id): Path<i32>,
    Json(request): Json<SendToVendorRequest>,
) -> AppResult<Json<DefectDetails>> {
    let payload = VendorShipmentPayload {
        vendor_ticket_number: request.vendor_ticket_number,
    };
    let details = state
        .services
        .workflow
        .send_to_vendor(id, request.actor_id, &payload)
        .await?;
    Ok(Json(details))
}

/// Record the unit's return from the vendor
#[utoipa::path(
    post,
    path = "/defects/{id}/return-from-vendor",
    tag = "defects",
    params(("id" = i32, Path, description = "Defect record ID")),
    request_body = ActorRequest,
    responses(
        (status = 200, description = "Return recorded", body = DefectDetails),
        (status = 404, description = "Record not found"),
        (status = 409, description = "Not legal from current status")
    )
)]
pub async fn return_from_vendor(
    State(state): State<crate::AppState>,
    Path(id): Path<i32>,
    Json(request): Json<ActorRequest>,
) -> AppResult<Json<DefectDetails>> {
    let details = state
        .services
        .workflow
        .return_from_vendor(id, request.actor_id)
        .await?;
    Ok(Json(details))
}

/// Issue a standby server to cover this repair
#[utoipa::path(
    post,
    path = "/defects/{id}/substitute",
    tag = "defects",
    params(("id" = i32, Path, description = "Defect record ID")),
    request_body = IssueSubstituteRequest,
    responses(
        (status = 200, description = "Substitute issued", body = DefectDetails),
        (status = 404, description = "Record not found"),
        (status = 409, description = "Candidate unavailable")
    )
)]
pub async fn issue_substitute(
    State(state): State<crate::AppState>,
    Path(id): Path<i32>,
    Json(request): Json<IssueSubstituteRequest>,
) -> AppResult<Json<DefectDetails>> {
    let payload = IssueSubstitutePayload {
        substitute_server_id: request.substitute_server_id,
        substitute_server_serial: request.substitute_server_serial,
    };
    let details = state
        .services
        .workflow
        .issue_substitute(id, request.actor_id, &payload)
        .await?;
    Ok(Json(details))
}

/// Close the substitute loan
#[utoipa::path(
    post,
    path = "/defects/{id}/substitute/return",
    tag = "defects",
    params(("id" = i32, Path, description = "Defect record ID")),
    request_body = ActorRequest,
    responses(
        (status = 200, description = "Substitute returned", body = DefectDetails),
        (status = 404, description = "Record or active assignment not found")
    )
)]
pub async fn return_substitute(
    State(state): State<crate::AppState>,
    Path(id): Path<i32>,
    Json(request): Json<ActorRequest>,
) -> AppResult<Json<DefectDetails>> {
    let details = state
        .services
        .workflow
        .return_substitute(id, request.actor_id)
        .await?;
    Ok(Json(details))
}

/// Close the repair (REPAIRING or RETURNED -> RESOLVED / REPEATED)
#[utoipa::path(
    post,
    path = "/defects/{id}/resolve",
    tag = "defects",
    params(("id" = i32, Path, description = "Defect record ID")),
    request_body = ResolveRequest,
    responses(
        (status = 200, description = "Record resolved", body = DefectDetails),
        (status = 400, description = "Invalid request"),
        (status = 404, description = "Record not found"),
        (status = 409, description = "Not legal from current status")
    )
)]
pub async fn resolve_defect(
    State(state): State<crate::AppState>,
    Path(id): Path<i32>,
    Json(request): Json<ResolveRequest>,
) -> AppResult<Json<DefectDetails>> {
    let payload = ResolvePayload {
        resolution: request.resolution,
    };
    let details = state
        .services
        .workflow
        .resolve(id, request.actor_id, &payload)
        .await?;
    Ok(Json(details))
}

/// Administrative status override
#[utoipa::path(
    put,
    path = "/defects/{id}/status",
    tag = "defects",
    params(("id" = i32, Path, description = "Defect record ID")),
    request_body = UpdateStatusRequest,
    responses(
        (status = 200, description = "Status updated", body = DefectDetails),
        (status = 404, description = "Record not found"),
        (status = 409, description = "Terminal-state immutability violated")
    )
)]
pub async fn update_status(
    State(state): State<crate::AppState>,
    Path(id): Path<i32>,
    Json(request): Json<UpdateStatusRequest>,
) -> AppResult<Json<DefectDetails>> {
    let details = state
        .services
        .workflow
        .update_status(id, request.actor_id, request.status, request.comment.as_deref())
        .await?;
    Ok(Json(details))
}

/// Whether a spare component unit is free to reserve
#[utoipa::path(
    get,
    path = "/inventory/{id}/availability",
    tag = "defects",
    params(("id" = i32, Path, description = "Inventory item ID")),
    responses(
        (status = 200, description = "Availability", body = AvailabilityResponse)
    )
)]
pub async fn component_availability(
    State(state): State<crate::AppState>,
    Path(id): Path<i32>,
) -> AppResult<Json<AvailabilityResponse>> {
    let available = state.services.workflow.component_available(id).await?;
    Ok(Json(AvailabilityResponse { id, available }))
}

/// Whether a server can be issued as substitute
#[utoipa::path(
    get,
    path = "/substitutes/{id}/availability",
    tag = "defects",
    params(("id" = i32, Path, description = "Candidate server ID")),
    responses(
        (status = 200, description = "Availability", body = AvailabilityResponse)
    )
)]
pub async fn substitute_availability(
    State(state): State<crate::AppState>,
    Path(id): Path<i32>,
) -> AppResult<Json<AvailabilityResponse>> {
    let available = state.services.workflow.substitute_available(id).await?;
    Ok(Json(AvailabilityResponse { id, available }))
}

/// Administrative notes/resolution edit, legal in every state
#[utoipa::path(
    patch,
    path = "/defects/{id}/notes",
    tag = "defects",
    params(("id" = i32, Path, description = "Defect record ID")),
    request_body = UpdateNotesRequest,
    responses(
        (status = 200, description = "Notes updated", body = DefectDetails),
        (status = 404, description = "Record not found")
    )
)]
pub async fn update_notes(
    State(state): State<crate::AppState>,
    Path(id): Path<i32>,
    Json(request): Json<UpdateNotesRequest>,
) -> AppResult<Json<DefectDetails>> {
    let payload = NotesPayload {
        notes: request.notes,
        resolution: request.resolution,
    };
    let details = state
        .services
        .workflow
        .update_notes(id, request.actor_id, &payload)
        .await?;
    Ok(Json(details))
}
