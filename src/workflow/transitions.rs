//! Defect lifecycle transition table
//!
//! The graph is fixed and domain-specific:
//!
//! ```text
//! NEW -> DIAGNOSING -> {WAITING_PARTS | REPAIRING}
//!     -> {SENT_TO_VENDOR -> RETURNED -> REPAIRING}
//!     -> RESOLVED | REPEATED -> CLOSED
//! ```
//!
//! Every operation is checked here, in one place, against the status it
//! requires. The service layer adds the guards that need live data
//! (reservation existence, substitute availability).

use crate::error::{AppError, AppResult};
use crate::models::enums::DefectStatus;
use crate::models::enums::DefectStatus::*;

/// Named workflow operations, as exposed by the API
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    StartDiagnosis,
    CompleteDiagnosis,
    SetWaitingParts,
    ReserveComponent,
    StartRepair,
    PerformReplacement,
    SendToVendor,
    ReturnFromVendor,
    IssueSubstitute,
    ReturnSubstitute,
    Resolve,
    UpdateStatus,
    UpdateNotes,
}

const NON_TERMINAL: &[DefectStatus] = &[
    New,
    Diagnosing,
    WaitingParts,
    Repairing,
    SentToVendor,
    Returned,
];

const ALL: &[DefectStatus] = &[
    New,
    Diagnosing,
    WaitingParts,
    Repairing,
    SentToVendor,
    Returned,
    Resolved,
    Repeated,
    Closed,
];

impl Operation {
    /// Wire name of the operation
    pub fn name(self) -> &'static str {
        match self {
            Operation::StartDiagnosis => "startDiagnosis",
            Operation::CompleteDiagnosis => "completeDiagnosis",
            Operation::SetWaitingParts => "setWaitingParts",
            Operation::ReserveComponent => "reserveComponent",
            Operation::StartRepair => "startRepair",
            Operation::PerformReplacement => "performReplacement",
            Operation::SendToVendor => "sendToVendor",
            Operation::ReturnFromVendor => "returnFromVendor",
            Operation::IssueSubstitute => "issueSubstitute",
            Operation::ReturnSubstitute => "returnSubstitute",
            Operation::Resolve => "resolve",
            Operation::UpdateStatus => "updateStatus",
            Operation::UpdateNotes => "updateNotes",
        }
    }

    /// Statuses this operation may be invoked from
    pub fn allowed_from(self) -> &'static [DefectStatus] {
        match self {
            Operation::StartDiagnosis => &[New],
            Operation::CompleteDiagnosis => &[Diagnosing],
            Operation::SetWaitingParts => &[Diagnosing, Repairing],
            Operation::ReserveComponent => &[WaitingParts],
            Operation::StartRepair => &[WaitingParts, Diagnosing],
            Operation::PerformReplacement => &[Repairing],
            Operation::SendToVendor => &[Repairing, WaitingParts],
            Operation::ReturnFromVendor => &[SentToVendor],
            Operation::IssueSubstitute => NON_TERMINAL,
            // Requires an active assignment; checked by the service
            Operation::ReturnSubstitute => ALL,
            Operation::Resolve => &[Repairing, Returned],
            // Gated by admin_override_allowed, not by this table
            Operation::UpdateStatus => ALL,
            Operation::UpdateNotes => ALL,
        }
    }

    /// Verify the record's current status accepts this operation
    pub fn check(self, current: DefectStatus) -> AppResult<()> {
        if self.allowed_from().contains(&current) {
            Ok(())
        } else {
            Err(AppError::InvalidTransition {
                operation: self.name(),
                from: current,
            })
        }
    }
}

/// Whether the administrative override may move a record from `from` to `to`.
///
/// Non-terminal records accept any target; terminal records only archival
/// moves (RESOLVED -> REPEATED, RESOLVED -> CLOSED, REPEATED -> CLOSED).
/// Nothing leaves CLOSED.
pub fn admin_override_allowed(from: DefectStatus, to: DefectStatus) -> bool {
    if !from.is_terminal() {
        return true;
    }
    matches!(
        (from, to),
        (Resolved, Repeated) | (Resolved, Closed) | (Repeated, Closed)
    )
}

/// Operations the transition table permits from `status`.
///
/// Conditional entries (startRepair needing a reservation, returnSubstitute
/// needing an active assignment) are filtered by the service, which has the
/// record's live resources at hand.
pub fn available_actions(status: DefectStatus) -> Vec<&'static str> {
    let mut actions = Vec::new();
    for op in [
        Operation::StartDiagnosis,
        Operation::CompleteDiagnosis,
        Operation::SetWaitingParts,
        Operation::ReserveComponent,
        Operation::StartRepair,
        Operation::PerformReplacement,
        Operation::SendToVendor,
        Operation::ReturnFromVendor,
        Operation::IssueSubstitute,
        Operation::ReturnSubstitute,
        Operation::Resolve,
    ] {
        if op.allowed_from().contains(&status) {
            actions.push(op.name());
        }
    }
    // The override can still archive RESOLVED/REPEATED records
    if ALL
        .iter()
        .any(|&to| to != status && admin_override_allowed(status, to))
    {
        actions.push(Operation::UpdateStatus.name());
    }
    actions.push(Operation::UpdateNotes.name());
    actions
}
