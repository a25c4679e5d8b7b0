//! Defect records repository for database operations

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, Pool, Postgres};

use crate::{
    error::{AppError, AppResult},
    models::{
        defect::{CreateDefect, DefectQuery, DefectRecord},
        enums::DefectStatus,
        event::DefectEvent,
    },
    workflow::SlaPolicy,
};

#[derive(Clone)]
pub struct DefectsRepository {
    pool: Pool<Postgres>,
}

impl DefectsRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Get defect record by ID
    pub async fn get_by_id(&self, id: i32) -> AppResult<DefectRecord> {
        sqlx::query_as::<_, DefectRecord>("SELECT * FROM defect_records WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Defect record {} not found", id)))
    }

    /// Load a record with a row lock, serializing transitions on it.
    /// Must run inside the caller's transaction.
    pub async fn get_for_update(&self, conn: &mut PgConnection, id: i32) -> AppResult<DefectRecord> {
        sqlx::query_as::<_, DefectRecord>("SELECT * FROM defect_records WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Defect record {} not found", id)))
    }

    /// ID of the open (non-terminal) record for a server, if any, locked
    pub async fn open_defect_for_server(
        &self,
        conn: &mut PgConnection,
        server_id: i32,
    ) -> AppResult<Option<i32>> {
        let id = sqlx::query_scalar::<_, i32>(
            "SELECT id FROM defect_records WHERE server_id = $1 AND status < 6 FOR UPDATE",
        )
        .bind(server_id)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(id)
    }

    /// Insert a new record in NEW status
    pub async fn insert(
        &self,
        conn: &mut PgConnection,
        data: &CreateDefect,
        detected_at: DateTime<Utc>,
    ) -> AppResult<DefectRecord> {
        let record = sqlx::query_as::<_, DefectRecord>(
            r#"
            INSERT INTO defect_records (
                server_id, status, problem_description, detected_at,
                diagnostician_id, cluster_code, has_acceptance_cert
            )
            VALUES ($1, 0, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(data.server_id)
        .bind(&data.problem_description)
        .bind(detected_at)
        .bind(data.diagnostician_id)
        .bind(&data.cluster_code)
        .bind(data.has_acceptance_cert.unwrap_or(false))
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db)
                if db.constraint() == Some("defect_records_one_open_per_server") =>
            {
                AppError::Conflict(format!(
                    "Server {} already has an open defect record",
                    data.server_id
                ))
            }
            _ => AppError::Database(e),
        })?;
        Ok(record)
    }

    /// Persist all mutable fields of a record. The workflow service is the
    /// only caller; field-level changes are decided there.
    pub async fn save(
        &self,
        conn: &mut PgConnection,
        record: &DefectRecord,
    ) -> AppResult<DefectRecord> {
        let saved = sqlx::query_as::<_, DefectRecord>(
            r#"
            UPDATE defect_records SET
                status = $2,
                repair_part_type = $3,
                problem_description = $4,
                diagnostician_id = $5,
                cluster_code = $6,
                has_acceptance_cert = $7,
                defect_part_serial_vendor = $8,
                defect_part_serial_manufacturer = $9,
                replacement_part_serial_vendor = $10,
                replacement_part_serial_manufacturer = $11,
                diagnosis_result = $12,
                is_repeated_defect = $13,
                repeated_defect_reason = $14,
                repeated_defect_date = $15,
                vendor_ticket_number = $16,
                sent_to_vendor_at = $17,
                returned_from_vendor_at = $18,
                substitute_server_serial = $19,
                resolution = $20,
                resolved_at = $21,
                notes = $22,
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(record.id)
        .bind(record.status)
        .bind(record.repair_part_type)
        .bind(&record.problem_description)
        .bind(record.diagnostician_id)
        .bind(&record.cluster_code)
        .bind(record.has_acceptance_cert)
        .bind(&record.defect_part_serial_vendor)
        .bind(&record.defect_part_serial_manufacturer)
        .bind(&record.replacement_part_serial_vendor)
        .bind(&record.replacement_part_serial_manufacturer)
        .bind(&record.diagnosis_result)
        .bind(record.is_repeated_defect)
        .bind(&record.repeated_defect_reason)
        .bind(record.repeated_defect_date)
        .bind(&record.vendor_ticket_number)
        .bind(record.sent_to_vendor_at)
        .bind(record.returned_from_vendor_at)
        .bind(&record.substitute_server_serial)
        .bind(&record.resolution)
        .bind(record.resolved_at)
        .bind(&record.notes)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Defect record {} not found", record.id)))?;
        Ok(saved)
    }

    /// Terminal records previously opened for a server, newest resolution
    /// first. Input to the repeated-defect analyzer.
    pub async fn prior_records_for_server(
        &self,
        conn: &mut PgConnection,
        server_id: i32,
        exclude_id: i32,
    ) -> AppResult<Vec<DefectRecord>> {
        let records = sqlx::query_as::<_, DefectRecord>(
            r#"
            SELECT * FROM defect_records
            WHERE server_id = $1 AND id != $2 AND resolved_at IS NOT NULL
            ORDER BY resolved_at DESC
            "#,
        )
        .bind(server_id)
        .bind(exclude_id)
        .fetch_all(&mut *conn)
        .await?;
        Ok(records)
    }

    /// Append an audit event. Runs in the same transaction as the mutation
    /// it records.
    pub async fn append_event(
        &self,
        conn: &mut PgConnection,
        defect_record_id: i32,
        actor_id: Option<i32>,
        operation: &str,
        from_status: Option<DefectStatus>,
        to_status: Option<DefectStatus>,
        comment: Option<&str>,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO defect_events (
                defect_record_id, actor_id, operation, from_status, to_status, comment
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(defect_record_id)
        .bind(actor_id)
        .bind(operation)
        .bind(from_status)
        .bind(to_status)
        .bind(comment)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// Audit trail for a record, oldest first
    pub async fn events_for(&self, defect_record_id: i32) -> AppResult<Vec<DefectEvent>> {
        let events = sqlx::query_as::<_, DefectEvent>(
            "SELECT * FROM defect_events WHERE defect_record_id = $1 ORDER BY id",
        )
        .bind(defect_record_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(events)
    }

    /// List records with filters and pagination, returning (rows, total)
    pub async fn list(
        &self,
        query: &DefectQuery,
        policy: &SlaPolicy,
    ) -> AppResult<(Vec<DefectRecord>, i64)> {
        let where_clause = Self::build_where(query, policy);

        let page = query.page.unwrap_or(1).max(1);
        let per_page = query.per_page.unwrap_or(20).clamp(1, 100);
        let offset = (page - 1) * per_page;

        let total = {
            let sql = format!("SELECT COUNT(*) FROM defect_records WHERE {}", where_clause);
            let mut q = sqlx::query_scalar::<_, i64>(&sql);
            if let Some(server_id) = query.server_id {
                q = q.bind(server_id);
            }
            if let Some(status) = query.status {
                q = q.bind(status);
            }
            if let Some(part) = query.repair_part_type {
                q = q.bind(part);
            }
            if let Some(diag) = query.diagnostician_id {
                q = q.bind(diag);
            }
            if let Some(repeated) = query.is_repeated_defect {
                q = q.bind(repeated);
            }
            if let Some(from) = query.date_from {
                q = q.bind(from);
            }
            if let Some(to) = query.date_to {
                q = q.bind(to);
            }
            if let Some(ref search) = query.search {
                q = q.bind(format!("%{}%", search));
            }
            q.fetch_one(&self.pool).await?
        };

        let rows = {
            let sql = format!(
                "SELECT * FROM defect_records WHERE {} ORDER BY detected_at DESC, id DESC LIMIT {} OFFSET {}",
                where_clause, per_page, offset
            );
            let mut q = sqlx::query_as::<_, DefectRecord>(&sql);
            if let Some(server_id) = query.server_id {
                q = q.bind(server_id);
            }
            if let Some(status) = query.status {
                q = q.bind(status);
            }
            if let Some(part) = query.repair_part_type {
                q = q.bind(part);
            }
            if let Some(diag) = query.diagnostician_id {
                q = q.bind(diag);
            }
            if let Some(repeated) = query.is_repeated_defect {
                q = q.bind(repeated);
            }
            if let Some(from) = query.date_from {
                q = q.bind(from);
            }
            if let Some(to) = query.date_to {
                q = q.bind(to);
            }
            if let Some(ref search) = query.search {
                q = q.bind(format!("%{}%", search));
            }
            q.fetch_all(&self.pool).await?
        };

        Ok((rows, total))
    }

    /// Build the WHERE clause with numbered parameters matching the bind
    /// order in `list`. The SLA-breach condition is computed in SQL from
    /// the policy's numeric windows so pagination and totals stay correct.
    fn build_where(query: &DefectQuery, policy: &SlaPolicy) -> String {
        let mut conditions: Vec<String> = Vec::new();
        let mut idx = 0_usize;

        if query.server_id.is_some() {
            idx += 1;
            conditions.push(format!("server_id = ${}", idx));
        }
        if query.status.is_some() {
            idx += 1;
            conditions.push(format!("status = ${}", idx));
        }
        if query.repair_part_type.is_some() {
            idx += 1;
            conditions.push(format!("repair_part_type = ${}", idx));
        }
        if query.diagnostician_id.is_some() {
            idx += 1;
            conditions.push(format!("diagnostician_id = ${}", idx));
        }
        if query.is_repeated_defect.is_some() {
            idx += 1;
            conditions.push(format!("is_repeated_defect = ${}", idx));
        }
        if query.date_from.is_some() {
            idx += 1;
            conditions.push(format!("detected_at >= ${}", idx));
        }
        if query.date_to.is_some() {
            idx += 1;
            conditions.push(format!("detected_at <= ${}", idx));
        }
        if query.search.is_some() {
            idx += 1;
            conditions.push(format!(
                "(problem_description ILIKE ${i} OR diagnosis_result ILIKE ${i} \
                 OR defect_part_serial_vendor ILIKE ${i} OR defect_part_serial_manufacturer ILIKE ${i} \
                 OR replacement_part_serial_vendor ILIKE ${i} OR vendor_ticket_number ILIKE ${i} \
                 OR cluster_code ILIKE ${i} OR notes ILIKE ${i})",
                i = idx
            ));
        }
        if let Some(breached) = query.sla_breached {
            let breach_cond = format!(
                "(status < 6 AND detected_at + ({}) < NOW())",
                Self::sla_interval_case(policy)
            );
            if breached {
                conditions.push(breach_cond);
            } else {
                conditions.push(format!("NOT {}", breach_cond));
            }
        }

        if conditions.is_empty() {
            "TRUE".to_string()
        } else {
            conditions.join(" AND ")
        }
    }

    /// CASE expression mapping a part-type code to its SLA interval.
    /// All values are numeric config data, never caller input.
    pub fn sla_interval_case(policy: &SlaPolicy) -> String {
        let mut case = String::from("CASE repair_part_type ");
        for (part, days) in policy.override_days() {
            case.push_str(&format!(
                "WHEN {} THEN INTERVAL '{} days' ",
                i16::from(part),
                days
            ));
        }
        case.push_str(&format!(
            "ELSE INTERVAL '{} days' END",
            policy.default_days()
        ));
        case
    }
}
