//! Workflow statistics service

use sqlx::Row;

use crate::{
    api::stats::{StatEntry, StatsResponse},
    error::AppResult,
    models::{defect::DefectQuery, enums::DefectStatus},
    repository::{defects::DefectsRepository, Repository},
    workflow::SlaPolicy,
};

#[derive(Clone)]
pub struct StatsService {
    repository: Repository,
    policy: SlaPolicy,
}

impl StatsService {
    pub fn new(repository: Repository, policy: SlaPolicy) -> Self {
        Self { repository, policy }
    }

    /// Aggregate counts over defect records honoring the list filters
    /// (pagination fields are ignored)
    pub async fn get_stats(&self, query: &DefectQuery) -> AppResult<StatsResponse> {
        let pool = &self.repository.pool;
        let where_clause = self.build_where(query);

        let totals_sql = format!(
            r#"
            SELECT COUNT(*) as total,
                   COUNT(*) FILTER (WHERE is_repeated_defect) as repeated_count,
                   COUNT(*) FILTER (WHERE sent_to_vendor_at IS NOT NULL) as sent_to_vendor_count
            FROM defect_records WHERE {}
            "#,
            where_clause
        );
        let mut totals_query = sqlx::query(&totals_sql);
        if let Some(server_id) = query.server_id {
            totals_query = totals_query.bind(server_id);
        }
        if let Some(status) = query.status {
            totals_query = totals_query.bind(status);
        }
        if let Some(part) = query.repair_part_type {
            totals_query = totals_query.bind(part);
        }
        if let Some(diag) = query.diagnostician_id {
            totals_query = totals_query.bind(diag);
        }
        if let Some(repeated) = query.is_repeated_defect {
            totals_query = totals_query.bind(repeated);
        }
        if let Some(from) = query.date_from {
            totals_query = totals_query.bind(from);
        }
        if let Some(to) = query.date_to {
            totals_query = totals_query.bind(to);
        }
        if let Some(ref search) = query.search {
            totals_query = totals_query.bind(format!("%{}%", search));
        }
        let totals_row = totals_query.fetch_one(pool).await?;

        let total: i64 = totals_row.get("total");
        let repeated_count: i64 = totals_row.get("repeated_count");
        let sent_to_vendor_count: i64 = totals_row.get("sent_to_vendor_count");

        let by_status_sql = format!(
            "SELECT status, COUNT(*) as value FROM defect_records WHERE {} \
             GROUP BY status ORDER BY status",
            where_clause
        );
        let mut by_status_query = sqlx::query(&by_status_sql);
        if let Some(server_id) = query.server_id {
            by_status_query = by_status_query.bind(server_id);
        }
        if let Some(status) = query.status {
            by_status_query = by_status_query.bind(status);
        }
        if let Some(part) = query.repair_part_type {
            by_status_query = by_status_query.bind(part);
        }
        if let Some(diag) = query.diagnostician_id {
            by_status_query = by_status_query.bind(diag);
        }
        if let Some(repeated) = query.is_repeated_defect {
            by_status_query = by_status_query.bind(repeated);
        }
        if let Some(from) = query.date_from {
            by_status_query = by_status_query.bind(from);
        }
        if let Some(to) = query.date_to {
            by_status_query = by_status_query.bind(to);
        }
        if let Some(ref search) = query.search {
            by_status_query = by_status_query.bind(format!("%{}%", search));
        }
        let by_status = by_status_query
            .fetch_all(pool)
            .await?
            .into_iter()
            .map(|row| StatEntry {
                label: DefectStatus::from(row.get::<i16, _>("status")).to_string(),
                value: row.get("value"),
            })
            .collect();

        let repeated_percent = if total > 0 {
            (repeated_count as f64 / total as f64) * 100.0
        } else {
            0.0
        };

        Ok(StatsResponse {
            total,
            by_status,
            repeated_count,
            repeated_percent,
            sent_to_vendor_count,
        })
    }

    /// Same conditions and bind order as the defects list query
    fn build_where(&self, query: &DefectQuery) -> String {
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
                DefectsRepository::sla_interval_case(&self.policy)
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
}
