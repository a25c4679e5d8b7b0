//! Defect record model and related request/response types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use validator::Validate;

use super::enums::{DefectStatus, RepairPartType};
use super::reservation::InventoryReservation;
use super::substitute::SubstituteAssignment;

/// Defect record model from database
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct DefectRecord {
    pub id: i32,
    pub server_id: i32,
    pub status: DefectStatus,
    pub repair_part_type: Option<RepairPartType>,
    pub problem_description: String,
    pub detected_at: DateTime<Utc>,
    pub diagnostician_id: Option<i32>,
    pub cluster_code: Option<String>,
    pub has_acceptance_cert: bool,
    pub defect_part_serial_vendor: Option<String>,
    pub defect_part_serial_manufacturer: Option<String>,
    pub replacement_part_serial_vendor: Option<String>,
    pub replacement_part_serial_manufacturer: Option<String>,
    pub diagnosis_result: Option<String>,
    pub is_repeated_defect: bool,
    pub repeated_defect_reason: Option<String>,
    pub repeated_defect_date: Option<DateTime<Utc>>,
    pub vendor_ticket_number: Option<String>,
    pub sent_to_vendor_at: Option<DateTime<Utc>>,
    pub returned_from_vendor_at: Option<DateTime<Utc>>,
    pub substitute_server_serial: Option<String>,
    pub resolution: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Defect record with computed SLA fields and live resource links,
/// returned by every workflow operation
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DefectDetails {
    #[serde(flatten)]
    pub record: DefectRecord,
    /// Resolution deadline derived from detection time and part type
    pub sla_deadline: DateTime<Utc>,
    /// True while the record is open past its deadline
    pub sla_breached: bool,
    /// Unreleased component reservation, if any
    pub active_reservation: Option<InventoryReservation>,
    /// Unreturned substitute assignment, if any
    pub substitute_assignment: Option<SubstituteAssignment>,
}

/// Create defect record request
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateDefect {
    pub server_id: i32,
    #[validate(length(min = 1, message = "problem_description must not be empty"))]
    pub problem_description: String,
    /// Detection time; defaults to now
    pub detected_at: Option<DateTime<Utc>>,
    pub diagnostician_id: Option<i32>,
    pub cluster_code: Option<String>,
    pub has_acceptance_cert: Option<bool>,
}

/// Payload for issueSubstitute
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct IssueSubstitutePayload {
    pub substitute_server_id: i32,
    /// Denormalized serial shown on the record while the loan is active
    pub substitute_server_serial: Option<String>,
}

/// Payload for completeDiagnosis
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct DiagnosisPayload {
    pub repair_part_type: RepairPartType,
    #[validate(length(min = 1, message = "diagnosis_result must not be empty"))]
    pub diagnosis_result: String,
    pub defect_part_serial_vendor: Option<String>,
    pub defect_part_serial_manufacturer: Option<String>,
}

/// Payload for performReplacement
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct ReplacementPayload {
    #[validate(length(min = 1, message = "replacement_part_serial_vendor must not be empty"))]
    pub replacement_part_serial_vendor: String,
    pub replacement_part_serial_manufacturer: Option<String>,
}

/// Payload for sendToVendor
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct VendorShipmentPayload {
    #[validate(length(min = 1, message = "vendor_ticket_number must not be empty"))]
    pub vendor_ticket_number: String,
}

/// Payload for resolve
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct ResolvePayload {
    #[validate(length(min = 1, message = "resolution must not be empty"))]
    pub resolution: String,
}

/// Payload for the administrative notes/resolution edit
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NotesPayload {
    pub notes: Option<String>,
    pub resolution: Option<String>,
}

/// List query filters and pagination
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct DefectQuery {
    pub server_id: Option<i32>,
    pub status: Option<DefectStatus>,
    pub repair_part_type: Option<RepairPartType>,
    pub diagnostician_id: Option<i32>,
    pub is_repeated_defect: Option<bool>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    /// Free-text search over problem description, diagnosis, serials, notes
    pub search: Option<String>,
    pub sla_breached: Option<bool>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}
