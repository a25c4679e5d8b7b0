//! Substitute assignment model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

/// Loan of a standby server covering an asset under repair.
/// Active while `returned_at` is null.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct SubstituteAssignment {
    pub id: i32,
    pub defect_record_id: i32,
    pub substitute_server_id: i32,
    pub issued_at: DateTime<Utc>,
    pub returned_at: Option<DateTime<Utc>>,
}
