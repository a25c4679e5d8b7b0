//! Inventory reservation ledger
//!
//! Reserve is a transactional check-and-insert: the active reservation row
//! for the item is locked before the decision, and a partial unique index
//! (`inventory_item_id WHERE released_at IS NULL`) backstops the insert
//! race. Release is idempotent.

use sqlx::{PgConnection, Pool, Postgres};

use crate::{
    error::{AppError, AppResult},
    models::reservation::InventoryReservation,
};

#[derive(Clone)]
pub struct ReservationsRepository {
    pool: Pool<Postgres>,
}

impl ReservationsRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Active reservation for an inventory item, locked. Must run inside
    /// the caller's transaction.
    pub async fn active_for_item(
        &self,
        conn: &mut PgConnection,
        inventory_item_id: i32,
    ) -> AppResult<Option<InventoryReservation>> {
        let reservation = sqlx::query_as::<_, InventoryReservation>(
            "SELECT * FROM inventory_reservations \
             WHERE inventory_item_id = $1 AND released_at IS NULL FOR UPDATE",
        )
        .bind(inventory_item_id)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(reservation)
    }

    /// Active reservation held by a defect record, locked
    pub async fn active_for_defect(
        &self,
        conn: &mut PgConnection,
        defect_record_id: i32,
    ) -> AppResult<Option<InventoryReservation>> {
        let reservation = sqlx::query_as::<_, InventoryReservation>(
            "SELECT * FROM inventory_reservations \
             WHERE defect_record_id = $1 AND released_at IS NULL FOR UPDATE",
        )
        .bind(defect_record_id)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(reservation)
    }

    /// Unlocked read of the active reservation for a defect record
    pub async fn find_active_for_defect(
        &self,
        defect_record_id: i32,
    ) -> AppResult<Option<InventoryReservation>> {
        let reservation = sqlx::query_as::<_, InventoryReservation>(
            "SELECT * FROM inventory_reservations \
             WHERE defect_record_id = $1 AND released_at IS NULL",
        )
        .bind(defect_record_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(reservation)
    }

    /// Active reservations for a set of defect records, for list views
    pub async fn active_for_defects(
        &self,
        defect_ids: &[i32],
    ) -> AppResult<Vec<InventoryReservation>> {
        let reservations = sqlx::query_as::<_, InventoryReservation>(
            "SELECT * FROM inventory_reservations \
             WHERE defect_record_id = ANY($1) AND released_at IS NULL",
        )
        .bind(defect_ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(reservations)
    }

    /// Whether an inventory item has no active reservation
    pub async fn is_available(&self, inventory_item_id: i32) -> AppResult<bool> {
        let reserved: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM inventory_reservations \
             WHERE inventory_item_id = $1 AND released_at IS NULL)",
        )
        .bind(inventory_item_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(!reserved)
    }

    /// Reserve an inventory item for a defect record. Fails with
    /// `InventoryConflict` if the item is held by another open record.
    pub async fn reserve(
        &self,
        conn: &mut PgConnection,
        defect_record_id: i32,
        inventory_item_id: i32,
    ) -> AppResult<InventoryReservation> {
        if let Some(existing) = self.active_for_item(&mut *conn, inventory_item_id).await? {
            return Err(AppError::InventoryConflict(format!(
                "Inventory item {} is already reserved by defect record {}",
                inventory_item_id, existing.defect_record_id
            )));
        }

        let reservation = sqlx::query_as::<_, InventoryReservation>(
            r#"
            INSERT INTO inventory_reservations (defect_record_id, inventory_item_id)
            VALUES ($1, $2)
            RETURNING *
            "#,
        )
        .bind(defect_record_id)
        .bind(inventory_item_id)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db)
                if db.constraint() == Some("inventory_reservations_one_active_per_item") =>
            {
                AppError::InventoryConflict(format!(
                    "Inventory item {} was reserved by a concurrent request",
                    inventory_item_id
                ))
            }
            _ => AppError::Database(e),
        })?;
        Ok(reservation)
    }

    /// Release a reservation. Releasing an already-released reservation is
    /// a no-op.
    pub async fn release(&self, conn: &mut PgConnection, reservation_id: i32) -> AppResult<()> {
        sqlx::query(
            "UPDATE inventory_reservations SET released_at = NOW() \
             WHERE id = $1 AND released_at IS NULL",
        )
        .bind(reservation_id)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// Release whatever reservation a defect record still holds
    pub async fn release_for_defect(
        &self,
        conn: &mut PgConnection,
        defect_record_id: i32,
    ) -> AppResult<()> {
        sqlx::query(
            "UPDATE inventory_reservations SET released_at = NOW() \
             WHERE defect_record_id = $1 AND released_at IS NULL",
        )
        .bind(defect_record_id)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }
}
