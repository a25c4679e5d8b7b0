//! Inventory reservation model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

/// Reservation of one spare component unit against one defect record.
/// Active while `released_at` is null.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct InventoryReservation {
    pub id: i32,
    pub defect_record_id: i32,
    pub inventory_item_id: i32,
    pub reserved_at: DateTime<Utc>,
    pub released_at: Option<DateTime<Utc>>,
}
