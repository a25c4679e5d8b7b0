//! Defect workflow service
//!
//! The only code path that mutates a defect record's status. Every
//! mutating operation runs as one transaction: the record is loaded with a
//! row lock, the transition table is consulted, guards touch the ledger /
//! tracker on locked rows, the record and its audit event are written, and
//! the transaction commits. A failed guard rolls everything back.

use chrono::Utc;
use std::collections::HashMap;
use std::future::Future;
use validator::Validate;

use crate::{
    error::{AppError, AppResult},
    models::{
        defect::{
            CreateDefect, DefectDetails, DefectQuery, DefectRecord, DiagnosisPayload,
            IssueSubstitutePayload, NotesPayload, ReplacementPayload, ResolvePayload,
            VendorShipmentPayload,
        },
        enums::DefectStatus,
        event::DefectEvent,
        reservation::InventoryReservation,
        substitute::SubstituteAssignment,
    },
    repository::Repository,
    workflow::{sla, transitions, Operation, SlaPolicy},
};

/// Bounded retry for transient persistence failures only
const MAX_DB_RETRIES: u32 = 2;

#[derive(Clone)]
pub struct WorkflowService {
    repository: Repository,
    policy: SlaPolicy,
}

impl WorkflowService {
    pub fn new(repository: Repository, policy: SlaPolicy) -> Self {
        Self { repository, policy }
    }

    pub fn policy(&self) -> &SlaPolicy {
        &self.policy
    }

    /// Readiness probe: verifies the backing store answers
    pub async fn ping_database(&self) -> AppResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.repository.pool)
            .await?;
        Ok(())
    }

    async fn with_retry<T, F, Fut>(&self, mut op: F) -> AppResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let mut attempt = 0_u32;
        loop {
            match op().await {
                Err(e) if e.is_transient() && attempt < MAX_DB_RETRIES => {
                    attempt += 1;
                    tracing::warn!(attempt, error = %e, "Transient database error, retrying");
                }
                result => return result,
            }
        }
    }

    // -----------------------------------------------------------------
    // Workflow operations
    // -----------------------------------------------------------------

    /// Open a new defect record in NEW status
    pub async fn create(
        &self,
        data: &CreateDefect,
        actor_id: Option<i32>,
    ) -> AppResult<DefectDetails> {
        self.with_retry(|| self.do_create(data, actor_id)).await
    }

    async fn do_create(
        &self,
        data: &CreateDefect,
        actor_id: Option<i32>,
    ) -> AppResult<DefectDetails> {
        data.validate()
            .map_err(|e| AppError::Validation(e.to_string()))?;
        let detected_at = data.detected_at.unwrap_or_else(Utc::now);

        let mut tx = self.repository.pool.begin().await?;
        if let Some(open_id) = self
            .repository
            .defects
            .open_defect_for_server(&mut tx, data.server_id)
            .await?
        {
            return Err(AppError::Conflict(format!(
                "Server {} already has an open defect record ({})",
                data.server_id, open_id
            )));
        }
        let record = self.repository.defects.insert(&mut tx, data, detected_at).await?;
        self.repository
            .defects
            .append_event(
                &mut tx,
                record.id,
                actor_id,
                "create",
                None,
                Some(record.status),
                None,
            )
            .await?;
        tx.commit().await?;

        tracing::info!(
            defect_id = record.id,
            server_id = data.server_id,
            "Defect record created"
        );
        self.details(record).await
    }

    /// NEW -> DIAGNOSING, recording the diagnostician
    pub async fn start_diagnosis(&self, id: i32, actor_id: Option<i32>) -> AppResult<DefectDetails> {
        self.with_retry(|| self.do_start_diagnosis(id, actor_id))
            .await
    }

    async fn do_start_diagnosis(
        &self,
        id: i32,
        actor_id: Option<i32>,
    ) -> AppResult<DefectDetails> {
        let mut tx = self.repository.pool.begin().await?;
        let mut record = self.repository.defects.get_for_update(&mut tx, id).await?;
        Operation::StartDiagnosis.check(record.status)?;

        let from = record.status;
        record.status = DefectStatus::Diagnosing;
        if record.diagnostician_id.is_none() {
            record.diagnostician_id = actor_id;
        }

        let record = self.repository.defects.save(&mut tx, &record).await?;
        self.log_transition(&mut tx, &record, actor_id, Operation::StartDiagnosis, from, None)
            .await?;
        tx.commit().await?;
        self.details(record).await
    }

    /// DIAGNOSING -> WAITING_PARTS or REPAIRING, depending on whether a
    /// reservation already exists. First point where the part type is
    /// known, so the repeated-defect analyzer runs here.
    pub async fn complete_diagnosis(
        &self,
        id: i32,
        actor_id: Option<i32>,
        payload: &DiagnosisPayload,
    ) -> AppResult<DefectDetails> {
        self.with_retry(|| self.do_complete_diagnosis(id, actor_id, payload))
            .await
    }

    async fn do_complete_diagnosis(
        &self,
        id: i32,
        actor_id: Option<i32>,
        payload: &DiagnosisPayload,
    ) -> AppResult<DefectDetails> {
        payload
            .validate()
            .map_err(|e| AppError::Validation(e.to_string()))?;

        let mut tx = self.repository.pool.begin().await?;
        let mut record = self.repository.defects.get_for_update(&mut tx, id).await?;
        Operation::CompleteDiagnosis.check(record.status)?;

        let from = record.status;
        record.repair_part_type = Some(payload.repair_part_type);
        record.diagnosis_result = Some(payload.diagnosis_result.clone());
        if payload.defect_part_serial_vendor.is_some() {
            record.defect_part_serial_vendor = payload.defect_part_serial_vendor.clone();
        }
        if payload.defect_part_serial_manufacturer.is_some() {
            record.defect_part_serial_manufacturer =
                payload.defect_part_serial_manufacturer.clone();
        }

        let prior_records = self
            .repository
            .defects
            .prior_records_for_server(&mut tx, record.server_id, record.id)
            .await?;
        if let Some(prior) = sla::find_repetition(&record, &prior_records, &self.policy) {
            record.is_repeated_defect = true;
            record.repeated_defect_date = prior.resolved_at;
            record.repeated_defect_reason = Some(format!(
                "{} defect on server {} previously resolved in record {}",
                payload.repair_part_type, record.server_id, prior.id
            ));
        }

        let has_reservation = self
            .repository
            .reservations
            .active_for_defect(&mut tx, record.id)
            .await?
            .is_some();
        record.status = if has_reservation {
            DefectStatus::Repairing
        } else {
            DefectStatus::WaitingParts
        };

        let record = self.repository.defects.save(&mut tx, &record).await?;
        self.log_transition(
            &mut tx,
            &record,
            actor_id,
            Operation::CompleteDiagnosis,
            from,
            record.diagnosis_result.as_deref(),
        )
        .await?;
        tx.commit().await?;
        self.details(record).await
    }

    /// DIAGNOSING or REPAIRING -> WAITING_PARTS
    pub async fn set_waiting_parts(
        &self,
        id: i32,
        actor_id: Option<i32>,
        notes: Option<&str>,
    ) -> AppResult<DefectDetails> {
        self.with_retry(|| self.do_set_waiting_parts(id, actor_id, notes))
            .await
    }

    async fn do_set_waiting_parts(
        &self,
        id: i32,
        actor_id: Option<i32>,
        notes: Option<&str>,
    ) -> AppResult<DefectDetails> {
        let mut tx = self.repository.pool.begin().await?;
        let mut record = self.repository.defects.get_for_update(&mut tx, id).await?;
        Operation::SetWaitingParts.check(record.status)?;

        let from = record.status;
        record.status = DefectStatus::WaitingParts;
        if let Some(notes) = notes {
            record.notes = Some(notes.to_string());
        }

        let record = self.repository.defects.save(&mut tx, &record).await?;
        self.log_transition(&mut tx, &record, actor_id, Operation::SetWaitingParts, from, notes)
            .await?;
        tx.commit().await?;
        self.details(record).await
    }

    /// Reserve a spare component against this record; status is unchanged.
    /// Fails with `InventoryConflict` if the item is held elsewhere.
    pub async fn reserve_component(
        &self,
        id: i32,
        actor_id: Option<i32>,
        inventory_item_id: i32,
    ) -> AppResult<DefectDetails> {
        self.with_retry(|| self.do_reserve_component(id, actor_id, inventory_item_id))
            .await
    }

    async fn do_reserve_component(
        &self,
        id: i32,
        actor_id: Option<i32>,
        inventory_item_id: i32,
    ) -> AppResult<DefectDetails> {
        let mut tx = self.repository.pool.begin().await?;
        let record = self.repository.defects.get_for_update(&mut tx, id).await?;
        Operation::ReserveComponent.check(record.status)?;

        if let Some(existing) = self
            .repository
            .reservations
            .active_for_defect(&mut tx, record.id)
            .await?
        {
            return Err(AppError::Conflict(format!(
                "Defect record {} already holds a reservation for inventory item {}",
                record.id, existing.inventory_item_id
            )));
        }

        let reservation = self
            .repository
            .reservations
            .reserve(&mut tx, record.id, inventory_item_id)
            .await?;
        let comment = format!("Reserved inventory item {}", inventory_item_id);
        self.log_transition(
            &mut tx,
            &record,
            actor_id,
            Operation::ReserveComponent,
            record.status,
            Some(&comment),
        )
        .await?;
        tx.commit().await?;

        let now = Utc::now();
        let assignment = self.repository.substitutes.find_active_for_defect(id).await?;
        Ok(self.make_details(record, Some(reservation), assignment, now))
    }

    /// WAITING_PARTS (with an active reservation) or DIAGNOSING -> REPAIRING
    pub async fn start_repair(&self, id: i32, actor_id: Option<i32>) -> AppResult<DefectDetails> {
        self.with_retry(|| self.do_start_repair(id, actor_id)).await
    }

    async fn do_start_repair(&self, id: i32, actor_id: Option<i32>) -> AppResult<DefectDetails> {
        let mut tx = self.repository.pool.begin().await?;
        let mut record = self.repository.defects.get_for_update(&mut tx, id).await?;
        Operation::StartRepair.check(record.status)?;

        if record.status == DefectStatus::WaitingParts {
            let has_reservation = self
                .repository
                .reservations
                .active_for_defect(&mut tx, record.id)
                .await?
                .is_some();
            if !has_reservation {
                return Err(AppError::Conflict(format!(
                    "Defect record {} has no active component reservation; reserve one first",
                    record.id
                )));
            }
        }

        let from = record.status;
        record.status = DefectStatus::Repairing;
        let record = self.repository.defects.save(&mut tx, &record).await?;
        self.log_transition(&mut tx, &record, actor_id, Operation::StartRepair, from, None)
            .await?;
        tx.commit().await?;
        self.details(record).await
    }

    /// Record the replacement serials; the reservation is consumed
    pub async fn perform_replacement(
        &self,
        id: i32,
        actor_id: Option<i32>,
        payload: &ReplacementPayload,
    ) -> AppResult<DefectDetails> {
        self.with_retry(|| self.do_perform_replacement(id, actor_id, payload))
            .await
    }

    async fn do_perform_replacement(
        &self,
        id: i32,
        actor_id: Option<i32>,
        payload: &ReplacementPayload,
    ) -> AppResult<DefectDetails> {
        payload
            .validate()
            .map_err(|e| AppError::Validation(e.to_string()))?;

        let mut tx = self.repository.pool.begin().await?;
        let mut record = self.repository.defects.get_for_update(&mut tx, id).await?;
        Operation::PerformReplacement.check(record.status)?;

        record.replacement_part_serial_vendor =
            Some(payload.replacement_part_serial_vendor.clone());
        record.replacement_part_serial_manufacturer =
            payload.replacement_part_serial_manufacturer.clone();

        // The reserved unit is now installed in the server
        self.repository
            .reservations
            .release_for_defect(&mut tx, record.id)
            .await?;

        let record = self.repository.defects.save(&mut tx, &record).await?;
        self.log_transition(
            &mut tx,
            &record,
            actor_id,
            Operation::PerformReplacement,
            record.status,
            Some("Replacement part installed"),
        )
        .await?;
        tx.commit().await?;
        self.details(record).await
    }

    /// REPAIRING or WAITING_PARTS -> SENT_TO_VENDOR (vendor RMA)
    pub async fn send_to_vendor(
        &self,
        id: i32,
        actor_id: Option<i32>,
        payload: &VendorShipmentPayload,
    ) -> AppResult<DefectDetails> {
        self.with_retry(|| self.do_send_to_vendor(id, actor_id, payload))
            .await
    }

    async fn do_send_to_vendor(
        &self,
        id: i32,
        actor_id: Option<i32>,
        payload: &VendorShipmentPayload,
    ) -> AppResult<DefectDetails> {
        payload
            .validate()
            .map_err(|e| AppError::Validation(e.to_string()))?;

        let mut tx = self.repository.pool.begin().await?;
        let mut record = self.repository.defects.get_for_update(&mut tx, id).await?;
        Operation::SendToVendor.check(record.status)?;

        let from = record.status;
        record.status = DefectStatus::SentToVendor;
        record.vendor_ticket_number = Some(payload.vendor_ticket_number.clone());
        record.sent_to_vendor_at = Some(Utc::now());

        let record = self.repository.defects.save(&mut tx, &record).await?;
        let comment = format!("Vendor ticket {}", payload.vendor_ticket_number);
        self.log_transition(
            &mut tx,
            &record,
            actor_id,
            Operation::SendToVendor,
            from,
            Some(&comment),
        )
        .await?;
        tx.commit().await?;
        self.details(record).await
    }

    /// SENT_TO_VENDOR -> RETURNED
    pub async fn return_from_vendor(
        &self,
        id: i32,
        actor_id: Option<i32>,
    ) -> AppResult<DefectDetails> {
        self.with_retry(|| self.do_return_from_vendor(id, actor_id))
            .await
    }

    async fn do_return_from_vendor(
        &self,
        id: i32,
        actor_id: Option<i32>,
    ) -> AppResult<DefectDetails> {
        let mut tx = self.repository.pool.begin().await?;
        let mut record = self.repository.defects.get_for_update(&mut tx, id).await?;
        Operation::ReturnFromVendor.check(record.status)?;

        let from = record.status;
        record.status = DefectStatus::Returned;
        record.returned_from_vendor_at = Some(Utc::now());

        let record = self.repository.defects.save(&mut tx, &record).await?;
        self.log_transition(&mut tx, &record, actor_id, Operation::ReturnFromVendor, from, None)
            .await?;
        tx.commit().await?;
        self.details(record).await
    }

    /// Issue a standby server to cover this repair; status is unchanged.
    /// Fails with `SubstituteUnavailable` if the candidate is taken or is
    /// itself under repair.
    pub async fn issue_substitute(
        &self,
        id: i32,
        actor_id: Option<i32>,
        payload: &IssueSubstitutePayload,
    ) -> AppResult<DefectDetails> {
        self.with_retry(|| self.do_issue_substitute(id, actor_id, payload))
            .await
    }

    async fn do_issue_substitute(
        &self,
        id: i32,
        actor_id: Option<i32>,
        payload: &IssueSubstitutePayload,
    ) -> AppResult<DefectDetails> {
        let mut tx = self.repository.pool.begin().await?;
        let mut record = self.repository.defects.get_for_update(&mut tx, id).await?;
        Operation::IssueSubstitute.check(record.status)?;

        if let Some(existing) = self
            .repository
            .substitutes
            .active_for_defect(&mut tx, record.id)
            .await?
        {
            return Err(AppError::SubstituteUnavailable(format!(
                "Defect record {} already has substitute server {} on loan",
                record.id, existing.substitute_server_id
            )));
        }

        let assignment = self
            .repository
            .substitutes
            .issue(&mut tx, record.id, payload.substitute_server_id)
            .await?;
        record.substitute_server_serial = payload
            .substitute_server_serial
            .clone()
            .or_else(|| Some(payload.substitute_server_id.to_string()));

        let record = self.repository.defects.save(&mut tx, &record).await?;
        let comment = format!("Issued substitute server {}", payload.substitute_server_id);
        self.log_transition(
            &mut tx,
            &record,
            actor_id,
            Operation::IssueSubstitute,
            record.status,
            Some(&comment),
        )
        .await?;
        tx.commit().await?;

        let now = Utc::now();
        let reservation = self.repository.reservations.find_active_for_defect(id).await?;
        Ok(self.make_details(record, reservation, Some(assignment), now))
    }

    /// Close the substitute loan; status is unchanged
    pub async fn return_substitute(
        &self,
        id: i32,
        actor_id: Option<i32>,
    ) -> AppResult<DefectDetails> {
        self.with_retry(|| self.do_return_substitute(id, actor_id))
            .await
    }

    async fn do_return_substitute(
        &self,
        id: i32,
        actor_id: Option<i32>,
    ) -> AppResult<DefectDetails> {
        let mut tx = self.repository.pool.begin().await?;
        let mut record = self.repository.defects.get_for_update(&mut tx, id).await?;

        let assignment = self
            .repository
            .substitutes
            .active_for_defect(&mut tx, record.id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "No active substitute assignment for defect record {}",
                    record.id
                ))
            })?;
        self.repository
            .substitutes
            .return_assignment(&mut tx, assignment.id)
            .await?;
        record.substitute_server_serial = None;

        let record = self.repository.defects.save(&mut tx, &record).await?;
        let comment = format!("Returned substitute server {}", assignment.substitute_server_id);
        self.log_transition(
            &mut tx,
            &record,
            actor_id,
            Operation::ReturnSubstitute,
            record.status,
            Some(&comment),
        )
        .await?;
        tx.commit().await?;
        self.details(record).await
    }

    /// REPAIRING or RETURNED -> RESOLVED, or REPEATED when the analyzer
    /// detects a recurrence. Releases live resources.
    pub async fn resolve(
        &self,
        id: i32,
        actor_id: Option<i32>,
        payload: &ResolvePayload,
    ) -> AppResult<DefectDetails> {
        self.with_retry(|| self.do_resolve(id, actor_id, payload))
            .await
    }

    async fn do_resolve(
        &self,
        id: i32,
        actor_id: Option<i32>,
        payload: &ResolvePayload,
    ) -> AppResult<DefectDetails> {
        payload
            .validate()
            .map_err(|e| AppError::Validation(e.to_string()))?;

        let mut tx = self.repository.pool.begin().await?;
        let mut record = self.repository.defects.get_for_update(&mut tx, id).await?;
        Operation::Resolve.check(record.status)?;

        let from = record.status;
        record.resolution = Some(payload.resolution.clone());
        record.resolved_at = Some(Utc::now());

        let prior_records = self
            .repository
            .defects
            .prior_records_for_server(&mut tx, record.server_id, record.id)
            .await?;
        if let Some(prior) = sla::find_repetition(&record, &prior_records, &self.policy) {
            record.is_repeated_defect = true;
            record.repeated_defect_date = record.repeated_defect_date.or(prior.resolved_at);
            if record.repeated_defect_reason.is_none() {
                record.repeated_defect_reason = Some(format!(
                    "Recurrence of defect record {} on server {}",
                    prior.id, record.server_id
                ));
            }
            record.status = DefectStatus::Repeated;
        } else {
            record.status = DefectStatus::Resolved;
        }

        // A closed case cannot hold live resources
        self.release_resources(&mut tx, record.id).await?;
        record.substitute_server_serial = None;

        let record = self.repository.defects.save(&mut tx, &record).await?;
        self.log_transition(
            &mut tx,
            &record,
            actor_id,
            Operation::Resolve,
            from,
            record.resolution.as_deref(),
        )
        .await?;
        tx.commit().await?;
        self.details(record).await
    }

    /// Administrative status override. Still bound by terminal-state
    /// immutability, and logged distinctly from guarded transitions.
    pub async fn update_status(
        &self,
        id: i32,
        actor_id: Option<i32>,
        status: DefectStatus,
        comment: Option<&str>,
    ) -> AppResult<DefectDetails> {
        self.with_retry(|| self.do_update_status(id, actor_id, status, comment))
            .await
    }

    async fn do_update_status(
        &self,
        id: i32,
        actor_id: Option<i32>,
        status: DefectStatus,
        comment: Option<&str>,
    ) -> AppResult<DefectDetails> {
        let mut tx = self.repository.pool.begin().await?;
        let mut record = self.repository.defects.get_for_update(&mut tx, id).await?;

        if !transitions::admin_override_allowed(record.status, status) {
            return Err(AppError::InvalidTransition {
                operation: Operation::UpdateStatus.name(),
                from: record.status,
            });
        }

        let from = record.status;
        record.status = status;
        if status.is_terminal() {
            if record.resolved_at.is_none() {
                record.resolved_at = Some(Utc::now());
            }
            if status == DefectStatus::Repeated {
                record.is_repeated_defect = true;
                record.repeated_defect_date = record.repeated_defect_date.or(record.resolved_at);
            }
            self.release_resources(&mut tx, record.id).await?;
            record.substitute_server_serial = None;
        }

        let record = self.repository.defects.save(&mut tx, &record).await?;
        self.log_override(&mut tx, &record, actor_id, from, comment).await?;
        tx.commit().await?;
        self.details(record).await
    }

    /// Administrative notes/resolution edit, legal in every state
    pub async fn update_notes(
        &self,
        id: i32,
        actor_id: Option<i32>,
        payload: &NotesPayload,
    ) -> AppResult<DefectDetails> {
        self.with_retry(|| self.do_update_notes(id, actor_id, payload))
            .await
    }

    async fn do_update_notes(
        &self,
        id: i32,
        actor_id: Option<i32>,
        payload: &NotesPayload,
    ) -> AppResult<DefectDetails> {
        let mut tx = self.repository.pool.begin().await?;
        let mut record = self.repository.defects.get_for_update(&mut tx, id).await?;

        if let Some(ref notes) = payload.notes {
            record.notes = Some(notes.clone());
        }
        if let Some(ref resolution) = payload.resolution {
            record.resolution = Some(resolution.clone());
        }

        let record = self.repository.defects.save(&mut tx, &record).await?;
        self.repository
            .defects
            .append_event(
                &mut tx,
                record.id,
                actor_id,
                Operation::UpdateNotes.name(),
                None,
                None,
                Some("Notes updated"),
            )
            .await?;
        tx.commit().await?;
        self.details(record).await
    }

    // -----------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------

    /// Record with computed SLA fields and live resource links
    pub async fn get(&self, id: i32) -> AppResult<DefectDetails> {
        let record = self.repository.defects.get_by_id(id).await?;
        self.details(record).await
    }

    /// Operation names currently legal for a record
    pub async fn available_actions(&self, id: i32) -> AppResult<Vec<&'static str>> {
        let record = self.repository.defects.get_by_id(id).await?;
        let mut actions = transitions::available_actions(record.status);

        if record.status == DefectStatus::WaitingParts {
            let has_reservation = self
                .repository
                .reservations
                .find_active_for_defect(record.id)
                .await?
                .is_some();
            if !has_reservation {
                actions.retain(|a| *a != Operation::StartRepair.name());
            }
        }
        let has_assignment = self
            .repository
            .substitutes
            .find_active_for_defect(record.id)
            .await?
            .is_some();
        if !has_assignment {
            actions.retain(|a| *a != Operation::ReturnSubstitute.name());
        }
        Ok(actions)
    }

    /// Whether a spare component unit is free to reserve
    pub async fn component_available(&self, inventory_item_id: i32) -> AppResult<bool> {
        self.repository
            .reservations
            .is_available(inventory_item_id)
            .await
    }

    /// Whether a server can be issued as substitute
    pub async fn substitute_available(&self, server_id: i32) -> AppResult<bool> {
        self.repository.substitutes.is_available(server_id).await
    }

    /// Audit trail for a record
    pub async fn history(&self, id: i32) -> AppResult<Vec<DefectEvent>> {
        // Surface NotFound for unknown records instead of an empty trail
        self.repository.defects.get_by_id(id).await?;
        self.repository.defects.events_for(id).await
    }

    /// Filtered, paginated listing with computed SLA fields
    pub async fn list(&self, query: &DefectQuery) -> AppResult<(Vec<DefectDetails>, i64)> {
        let (rows, total) = self.repository.defects.list(query, &self.policy).await?;

        let ids: Vec<i32> = rows.iter().map(|r| r.id).collect();
        let mut reservations: HashMap<i32, InventoryReservation> = self
            .repository
            .reservations
            .active_for_defects(&ids)
            .await?
            .into_iter()
            .map(|r| (r.defect_record_id, r))
            .collect();
        let mut assignments: HashMap<i32, SubstituteAssignment> = self
            .repository
            .substitutes
            .active_for_defects(&ids)
            .await?
            .into_iter()
            .map(|a| (a.defect_record_id, a))
            .collect();

        let now = Utc::now();
        let details = rows
            .into_iter()
            .map(|record| {
                let reservation = reservations.remove(&record.id);
                let assignment = assignments.remove(&record.id);
                self.make_details(record, reservation, assignment, now)
            })
            .collect();
        Ok((details, total))
    }

    // -----------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------

    fn make_details(
        &self,
        record: DefectRecord,
        active_reservation: Option<InventoryReservation>,
        substitute_assignment: Option<SubstituteAssignment>,
        now: chrono::DateTime<Utc>,
    ) -> DefectDetails {
        DefectDetails {
            sla_deadline: sla::sla_deadline(&record, &self.policy),
            sla_breached: sla::sla_breached(&record, &self.policy, now),
            record,
            active_reservation,
            substitute_assignment,
        }
    }

    async fn details(&self, record: DefectRecord) -> AppResult<DefectDetails> {
        let reservation = self
            .repository
            .reservations
            .find_active_for_defect(record.id)
            .await?;
        let assignment = self
            .repository
            .substitutes
            .find_active_for_defect(record.id)
            .await?;
        Ok(self.make_details(record, reservation, assignment, Utc::now()))
    }

    /// Release any still-held reservation and force-return any active
    /// substitute. Idempotent; runs inside the caller's transaction.
    async fn release_resources(
        &self,
        conn: &mut sqlx::PgConnection,
        defect_record_id: i32,
    ) -> AppResult<()> {
        self.repository
            .reservations
            .release_for_defect(conn, defect_record_id)
            .await?;
        self.repository
            .substitutes
            .return_for_defect(conn, defect_record_id)
            .await?;
        Ok(())
    }

    async fn log_transition(
        &self,
        conn: &mut sqlx::PgConnection,
        record: &DefectRecord,
        actor_id: Option<i32>,
        operation: Operation,
        from: DefectStatus,
        comment: Option<&str>,
    ) -> AppResult<()> {
        self.repository
            .defects
            .append_event(
                conn,
                record.id,
                actor_id,
                operation.name(),
                Some(from),
                Some(record.status),
                comment,
            )
            .await?;
        tracing::info!(
            defect_id = record.id,
            actor_id,
            operation = operation.name(),
            from = %from,
            to = %record.status,
            "Workflow transition"
        );
        Ok(())
    }

    async fn log_override(
        &self,
        conn: &mut sqlx::PgConnection,
        record: &DefectRecord,
        actor_id: Option<i32>,
        from: DefectStatus,
        comment: Option<&str>,
    ) -> AppResult<()> {
        self.repository
            .defects
            .append_event(
                conn,
                record.id,
                actor_id,
                Operation::UpdateStatus.name(),
                Some(from),
                Some(record.status),
                comment,
            )
            .await?;
        tracing::warn!(
            defect_id = record.id,
            actor_id,
            from = %from,
            to = %record.status,
            "Administrative status override"
        );
        Ok(())
    }
}
