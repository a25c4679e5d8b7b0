//! OpenAPI documentation

use axum::Router;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::api::{defects, health, stats};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Rackmend API",
        version = "1.0.0",
        description = "Server hardware defect & repair workflow REST API",
        license(name = "AGPL-3.0", url = "https://www.gnu.org/licenses/agpl-3.0.html")
    ),
    servers(
        (url = "/api/v1", description = "API v1")
    ),
    paths(
        // Health
        health::health_check,
        health::readiness_check,
        // Defects
        defects::list_defects,
        defects::create_defect,
        defects::get_defect,
        defects::get_available_actions,
        defects::get_history,
        defects::start_diagnosis,
        defects::complete_diagnosis,
        defects::set_waiting_parts,
        defects::reserve_component,
        defects::start_repair,
        defects::perform_replacement,
        defects::send_to_vendor,
        defects::return_from_vendor,
        defects::issue_substitute,
        defects::return_substitute,
        defects::resolve_defect,
        defects::update_status,
        defects::update_notes,
        defects::component_availability,
        defects::substitute_availability,
        // Stats
        stats::get_stats,
    ),
    components(
        schemas(
            // Defects
            defects::CreateDefectRequest,
            defects::ActorRequest,
            defects::CompleteDiagnosisRequest,
            defects::WaitingPartsRequest,
            defects::ReserveComponentRequest,
            defects::ReplacementRequest,
            defects::SendToVendorRequest,
            defects::IssueSubstituteRequest,
            defects::ResolveRequest,
            defects::UpdateStatusRequest,
            defects::UpdateNotesRequest,
            defects::DefectListResponse,
            defects::ActionsResponse,
            defects::AvailabilityResponse,
            crate::models::defect::DefectDetails,
            crate::models::enums::DefectStatus,
            crate::models::enums::RepairPartType,
            crate::models::event::DefectEvent,
            crate::models::reservation::InventoryReservation,
            crate::models::substitute::SubstituteAssignment,
            // Stats
            stats::StatsResponse,
            stats::StatEntry,
            // Health
            health::HealthResponse,
            // Errors
            crate::error::ErrorResponse,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "defects", description = "Defect repair workflow"),
        (name = "stats", description = "Workflow statistics")
    )
)]
pub struct ApiDoc;

/// Create the OpenAPI documentation router
pub fn create_openapi_router() -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
}
