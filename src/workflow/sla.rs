//! SLA and repeated-defect analysis
//!
//! Pure functions over record data. The SLA window depends on the part
//! type (configured, with a default for unlisted parts); breach status is
//! frozen once a record reaches a terminal state.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

use crate::config::WorkflowConfig;
use crate::models::defect::DefectRecord;
use crate::models::enums::RepairPartType;

/// Resolution-time policy loaded from the `[workflow]` config section
#[derive(Debug, Clone)]
pub struct SlaPolicy {
    default_window: Duration,
    windows: HashMap<RepairPartType, Duration>,
    repetition_window: Duration,
}

const ALL_PARTS: &[RepairPartType] = &[
    RepairPartType::Ram,
    RepairPartType::Motherboard,
    RepairPartType::Cpu,
    RepairPartType::Hdd,
    RepairPartType::Ssd,
    RepairPartType::Psu,
    RepairPartType::Fan,
    RepairPartType::Raid,
    RepairPartType::Nic,
    RepairPartType::Backplane,
    RepairPartType::Bmc,
    RepairPartType::Cable,
    RepairPartType::Other,
];

impl SlaPolicy {
    pub fn from_config(cfg: &WorkflowConfig) -> Self {
        let mut windows = HashMap::new();
        for part in ALL_PARTS {
            if let Some(days) = cfg.sla_days.get(part.config_key()) {
                windows.insert(*part, Duration::days(*days));
            }
        }
        Self {
            default_window: Duration::days(cfg.default_sla_days),
            windows,
            repetition_window: Duration::days(cfg.repetition_window_days),
        }
    }

    /// SLA window for a part type; the default window applies while the
    /// part type is unknown or has no override.
    pub fn window(&self, part: Option<RepairPartType>) -> Duration {
        part.and_then(|p| self.windows.get(&p).copied())
            .unwrap_or(self.default_window)
    }

    pub fn repetition_window(&self) -> Duration {
        self.repetition_window
    }

    /// Per-part window overrides in days, for SQL-side breach filtering
    pub fn override_days(&self) -> impl Iterator<Item = (RepairPartType, i64)> + '_ {
        self.windows.iter().map(|(p, d)| (*p, d.num_days()))
    }

    pub fn default_days(&self) -> i64 {
        self.default_window.num_days()
    }
}

impl Default for SlaPolicy {
    fn default() -> Self {
        Self::from_config(&WorkflowConfig::default())
    }
}

/// Deadline by which an open record must be resolved
pub fn sla_deadline(record: &DefectRecord, policy: &SlaPolicy) -> DateTime<Utc> {
    record.detected_at + policy.window(record.repair_part_type)
}

/// True iff the record is past its deadline and still open.
/// Terminal records are never breached, regardless of `now`.
pub fn sla_breached(record: &DefectRecord, policy: &SlaPolicy, now: DateTime<Utc>) -> bool {
    !record.status.is_terminal() && now > sla_deadline(record, policy)
}

/// Repeated-defect classification: returns the prior record that makes
/// `record` a recurrence, if one exists.
///
/// A recurrence is a prior record for the same server with the same part
/// type, resolved within the lookback window before this record's
/// detection time. Records with no diagnosed part type never classify.
pub fn find_repetition<'a>(
    record: &DefectRecord,
    prior_records: &'a [DefectRecord],
    policy: &SlaPolicy,
) -> Option<&'a DefectRecord> {
    let part = record.repair_part_type?;
    prior_records.iter().find(|prior| {
        prior.id != record.id
            && prior.repair_part_type == Some(part)
            && prior
                .resolved_at
                .map(|resolved| {
                    resolved <= record.detected_at
                        && resolved >= record.detected_at - policy.repetition_window
                })
                .unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::enums::DefectStatus;
    use chrono::TimeZone;

    fn make_record(
        id: i32,
        server_id: i32,
        status: DefectStatus,
        part: Option<RepairPartType>,
        detected_at: DateTime<Utc>,
        resolved_at: Option<DateTime<Utc>>,
    ) -> DefectRecord {
        DefectRecord {
            id,
            server_id,
            status,
            repair_part_type: part,
            problem_description: "does not power on".to_string(),
            detected_at,
            diagnostician_id: None,
            cluster_code: None,
            has_acceptance_cert: false,
            defect_part_serial_vendor: None,
            defect_part_serial_manufacturer: None,
            replacement_part_serial_vendor: None,
            replacement_part_serial_manufacturer: None,
            diagnosis_result: None,
            is_repeated_defect: false,
            repeated_defect_reason: None,
            repeated_defect_date: None,
            vendor_ticket_number: None,
            sent_to_vendor_at: None,
            returned_from_vendor_at: None,
            substitute_server_serial: None,
            resolution: None,
            resolved_at,
            notes: None,
            created_at: detected_at,
            updated_at: detected_at,
        }
    }

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_deadline_uses_part_window() {
        let mut cfg = WorkflowConfig::default();
        cfg.sla_days.insert("PSU".to_string(), 7);
        let policy = SlaPolicy::from_config(&cfg);

        let detected = at(2024, 3, 1);
        let psu = make_record(
            1,
            42,
            DefectStatus::Repairing,
            Some(RepairPartType::Psu),
            detected,
            None,
        );
        assert_eq!(sla_deadline(&psu, &policy), detected + Duration::days(7));

        // No override for CPU: default window applies
        let cpu = make_record(
            2,
            43,
            DefectStatus::Repairing,
            Some(RepairPartType::Cpu),
            detected,
            None,
        );
        assert_eq!(sla_deadline(&cpu, &policy), detected + Duration::days(14));

        // Undiagnosed: default window applies
        let unknown = make_record(3, 44, DefectStatus::New, None, detected, None);
        assert_eq!(
            sla_deadline(&unknown, &policy),
            detected + Duration::days(14)
        );
    }

    #[test]
    fn test_breach_boundaries() {
        let policy = SlaPolicy::default();
        let detected = at(2024, 3, 1);
        let record = make_record(
            1,
            42,
            DefectStatus::Repairing,
            Some(RepairPartType::Hdd),
            detected,
            None,
        );
        let deadline = sla_deadline(&record, &policy);

        assert!(!sla_breached(&record, &policy, deadline));
        assert!(sla_breached(
            &record,
            &policy,
            deadline + Duration::seconds(1)
        ));
        assert!(!sla_breached(&record, &policy, detected));
    }

    #[test]
    fn test_breach_frozen_on_terminal() {
        let policy = SlaPolicy::default();
        let detected = at(2024, 1, 1);
        let far_future = at(2030, 1, 1);

        for status in [
            DefectStatus::Resolved,
            DefectStatus::Repeated,
            DefectStatus::Closed,
        ] {
            let record = make_record(
                1,
                42,
                status,
                Some(RepairPartType::Hdd),
                detected,
                Some(at(2024, 1, 5)),
            );
            assert!(!sla_breached(&record, &policy, far_future));
        }
    }

    #[test]
    fn test_repetition_within_window() {
        // A record resolved 2024-01-01, a new HDD defect detected 2024-01-10
        // on the same server classifies as repeated.
        let policy = SlaPolicy::default();
        let prior = make_record(
            1,
            5,
            DefectStatus::Resolved,
            Some(RepairPartType::Hdd),
            at(2023, 12, 20),
            Some(at(2024, 1, 1)),
        );
        let current = make_record(
            2,
            5,
            DefectStatus::Diagnosing,
            Some(RepairPartType::Hdd),
            at(2024, 1, 10),
            None,
        );
        let prior_records = vec![prior];

        let hit = find_repetition(&current, &prior_records, &policy);
        assert_eq!(hit.map(|r| r.id), Some(1));
    }

    #[test]
    fn test_repetition_outside_window() {
        let policy = SlaPolicy::default();
        let prior = make_record(
            1,
            5,
            DefectStatus::Resolved,
            Some(RepairPartType::Hdd),
            at(2023, 10, 1),
            Some(at(2023, 11, 1)),
        );
        let current = make_record(
            2,
            5,
            DefectStatus::Diagnosing,
            Some(RepairPartType::Hdd),
            at(2024, 1, 10),
            None,
        );
        assert!(find_repetition(&current, &[prior], &policy).is_none());
    }

    #[test]
    fn test_repetition_requires_same_part() {
        let policy = SlaPolicy::default();
        let prior = make_record(
            1,
            5,
            DefectStatus::Resolved,
            Some(RepairPartType::Psu),
            at(2023, 12, 20),
            Some(at(2024, 1, 1)),
        );
        let current = make_record(
            2,
            5,
            DefectStatus::Diagnosing,
            Some(RepairPartType::Hdd),
            at(2024, 1, 10),
            None,
        );
        assert!(find_repetition(&current, &[prior], &policy).is_none());
    }

    #[test]
    fn test_repetition_requires_diagnosed_part() {
        let policy = SlaPolicy::default();
        let prior = make_record(
            1,
            5,
            DefectStatus::Resolved,
            Some(RepairPartType::Hdd),
            at(2023, 12, 20),
            Some(at(2024, 1, 1)),
        );
        let current = make_record(2, 5, DefectStatus::New, None, at(2024, 1, 10), None);
        assert!(find_repetition(&current, &[prior], &policy).is_none());
    }

    #[test]
    fn test_repetition_ignores_unresolved_prior() {
        let policy = SlaPolicy::default();
        let prior = make_record(
            1,
            5,
            DefectStatus::Repairing,
            Some(RepairPartType::Hdd),
            at(2023, 12, 20),
            None,
        );
        let current = make_record(
            2,
            5,
            DefectStatus::Diagnosing,
            Some(RepairPartType::Hdd),
            at(2024, 1, 10),
            None,
        );
        assert!(find_repetition(&current, &[prior], &policy).is_none());
    }
}
