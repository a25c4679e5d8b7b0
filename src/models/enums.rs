//! Shared domain enums

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

// ---------------------------------------------------------------------------
// DefectStatus
// ---------------------------------------------------------------------------

/// Defect record lifecycle status.
///
/// Codes 6 and above are terminal; the partial unique index on
/// `defect_records (server_id) WHERE status < 6` relies on this ordering.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, sqlx::Type,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i16)]
pub enum DefectStatus {
    New = 0,
    Diagnosing = 1,
    WaitingParts = 2,
    Repairing = 3,
    SentToVendor = 4,
    Returned = 5,
    Resolved = 6,
    Repeated = 7,
    Closed = 8,
}

impl DefectStatus {
    /// Terminal records accept no further workflow transitions
    /// (administrative closure aside).
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DefectStatus::Resolved | DefectStatus::Repeated | DefectStatus::Closed
        )
    }
}

impl From<i16> for DefectStatus {
    fn from(v: i16) -> Self {
        match v {
            1 => DefectStatus::Diagnosing,
            2 => DefectStatus::WaitingParts,
            3 => DefectStatus::Repairing,
            4 => DefectStatus::SentToVendor,
            5 => DefectStatus::Returned,
            6 => DefectStatus::Resolved,
            7 => DefectStatus::Repeated,
            8 => DefectStatus::Closed,
            _ => DefectStatus::New,
        }
    }
}

impl From<DefectStatus> for i16 {
    fn from(s: DefectStatus) -> Self {
        s as i16
    }
}

impl std::fmt::Display for DefectStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            DefectStatus::New => "NEW",
            DefectStatus::Diagnosing => "DIAGNOSING",
            DefectStatus::WaitingParts => "WAITING_PARTS",
            DefectStatus::Repairing => "REPAIRING",
            DefectStatus::SentToVendor => "SENT_TO_VENDOR",
            DefectStatus::Returned => "RETURNED",
            DefectStatus::Resolved => "RESOLVED",
            DefectStatus::Repeated => "REPEATED",
            DefectStatus::Closed => "CLOSED",
        };
        write!(f, "{}", label)
    }
}

// ---------------------------------------------------------------------------
// RepairPartType
// ---------------------------------------------------------------------------

/// Hardware component category under repair
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, sqlx::Type,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i16)]
pub enum RepairPartType {
    Ram = 0,
    Motherboard = 1,
    Cpu = 2,
    Hdd = 3,
    Ssd = 4,
    Psu = 5,
    Fan = 6,
    Raid = 7,
    Nic = 8,
    Backplane = 9,
    Bmc = 10,
    Cable = 11,
    Other = 12,
}

impl RepairPartType {
    /// Key used for per-part SLA window lookup in configuration.
    pub fn config_key(self) -> &'static str {
        match self {
            RepairPartType::Ram => "RAM",
            RepairPartType::Motherboard => "MOTHERBOARD",
            RepairPartType::Cpu => "CPU",
            RepairPartType::Hdd => "HDD",
            RepairPartType::Ssd => "SSD",
            RepairPartType::Psu => "PSU",
            RepairPartType::Fan => "FAN",
            RepairPartType::Raid => "RAID",
            RepairPartType::Nic => "NIC",
            RepairPartType::Backplane => "BACKPLANE",
            RepairPartType::Bmc => "BMC",
            RepairPartType::Cable => "CABLE",
            RepairPartType::Other => "OTHER",
        }
    }
}

impl From<i16> for RepairPartType {
    fn from(v: i16) -> Self {
        match v {
            0 => RepairPartType::Ram,
            1 => RepairPartType::Motherboard,
            2 => RepairPartType::Cpu,
            3 => RepairPartType::Hdd,
            4 => RepairPartType::Ssd,
            5 => RepairPartType::Psu,
            6 => RepairPartType::Fan,
            7 => RepairPartType::Raid,
            8 => RepairPartType::Nic,
            9 => RepairPartType::Backplane,
            10 => RepairPartType::Bmc,
            11 => RepairPartType::Cable,
            _ => RepairPartType::Other,
        }
    }
}

impl From<RepairPartType> for i16 {
    fn from(p: RepairPartType) -> Self {
        p as i16
    }
}

impl std::fmt::Display for RepairPartType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.config_key())
    }
}
