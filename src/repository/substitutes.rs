//! Substitute asset tracker
//!
//! A server may cover at most one repair at a time, and a server that is
//! itself under repair may not be issued. Both checks run on locked rows
//! inside the caller's transaction; a partial unique index
//! (`substitute_server_id WHERE returned_at IS NULL`) backstops the
//! assignment race. Return is idempotent.

use sqlx::{PgConnection, Pool, Postgres};

use crate::{
    error::{AppError, AppResult},
    models::substitute::SubstituteAssignment,
};

#[derive(Clone)]
pub struct SubstitutesRepository {
    pool: Pool<Postgres>,
}

impl SubstitutesRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Active assignment where this server is the substitute, locked
    pub async fn active_for_server(
        &self,
        conn: &mut PgConnection,
        substitute_server_id: i32,
    ) -> AppResult<Option<SubstituteAssignment>> {
        let assignment = sqlx::query_as::<_, SubstituteAssignment>(
            "SELECT * FROM substitute_assignments \
             WHERE substitute_server_id = $1 AND returned_at IS NULL FOR UPDATE",
        )
        .bind(substitute_server_id)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(assignment)
    }

    /// Active assignment covering a defect record, locked
    pub async fn active_for_defect(
        &self,
        conn: &mut PgConnection,
        defect_record_id: i32,
    ) -> AppResult<Option<SubstituteAssignment>> {
        let assignment = sqlx::query_as::<_, SubstituteAssignment>(
            "SELECT * FROM substitute_assignments \
             WHERE defect_record_id = $1 AND returned_at IS NULL FOR UPDATE",
        )
        .bind(defect_record_id)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(assignment)
    }

    /// Unlocked read of the active assignment for a defect record
    pub async fn find_active_for_defect(
        &self,
        defect_record_id: i32,
    ) -> AppResult<Option<SubstituteAssignment>> {
        let assignment = sqlx::query_as::<_, SubstituteAssignment>(
            "SELECT * FROM substitute_assignments \
             WHERE defect_record_id = $1 AND returned_at IS NULL",
        )
        .bind(defect_record_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(assignment)
    }

    /// Active assignments for a set of defect records, for list views
    pub async fn active_for_defects(
        &self,
        defect_ids: &[i32],
    ) -> AppResult<Vec<SubstituteAssignment>> {
        let assignments = sqlx::query_as::<_, SubstituteAssignment>(
            "SELECT * FROM substitute_assignments \
             WHERE defect_record_id = ANY($1) AND returned_at IS NULL",
        )
        .bind(defect_ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(assignments)
    }

    /// Whether a server can be issued: no active assignment as substitute
    /// and no open defect record of its own
    pub async fn is_available(&self, server_id: i32) -> AppResult<bool> {
        let unavailable: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM substitute_assignments
                WHERE substitute_server_id = $1 AND returned_at IS NULL
            ) OR EXISTS(
                SELECT 1 FROM defect_records
                WHERE server_id = $1 AND status < 6
            )
            "#,
        )
        .bind(server_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(!unavailable)
    }

    /// Issue a server as substitute for a defect record. Fails with
    /// `SubstituteUnavailable` if it already covers another repair or is
    /// itself under repair.
    pub async fn issue(
        &self,
        conn: &mut PgConnection,
        defect_record_id: i32,
        substitute_server_id: i32,
    ) -> AppResult<SubstituteAssignment> {
        if let Some(existing) = self
            .active_for_server(&mut *conn, substitute_server_id)
            .await?
        {
            return Err(AppError::SubstituteUnavailable(format!(
                "Server {} is already issued as substitute for defect record {}",
                substitute_server_id, existing.defect_record_id
            )));
        }

        let open_defect = sqlx::query_scalar::<_, i32>(
            "SELECT id FROM defect_records WHERE server_id = $1 AND status < 6 FOR UPDATE",
        )
        .bind(substitute_server_id)
        .fetch_optional(&mut *conn)
        .await?;
        if let Some(defect_id) = open_defect {
            return Err(AppError::SubstituteUnavailable(format!(
                "Server {} is itself under repair (defect record {})",
                substitute_server_id, defect_id
            )));
        }

        let assignment = sqlx::query_as::<_, SubstituteAssignment>(
            r#"
            INSERT INTO substitute_assignments (defect_record_id, substitute_server_id)
            VALUES ($1, $2)
            RETURNING *
            "#,
        )
        .bind(defect_record_id)
        .bind(substitute_server_id)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db)
                if db.constraint() == Some("substitute_assignments_one_active_per_server") =>
            {
                AppError::SubstituteUnavailable(format!(
                    "Server {} is already issued as substitute",
                    substitute_server_id
                ))
            }
            _ => AppError::Database(e),
        })?;
        Ok(assignment)
    }

    /// Return an assignment. Returning an already-returned assignment is a
    /// no-op.
    pub async fn return_assignment(
        &self,
        conn: &mut PgConnection,
        assignment_id: i32,
    ) -> AppResult<()> {
        sqlx::query(
            "UPDATE substitute_assignments SET returned_at = NOW() \
             WHERE id = $1 AND returned_at IS NULL",
        )
        .bind(assignment_id)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// Return whatever assignment still covers a defect record
    pub async fn return_for_defect(
        &self,
        conn: &mut PgConnection,
        defect_record_id: i32,
    ) -> AppResult<()> {
        sqlx::query(
            "UPDATE substitute_assignments SET returned_at = NOW() \
             WHERE defect_record_id = $1 AND returned_at IS NULL",
        )
        .bind(defect_record_id)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }
}
