//! Data models for Rackmend

pub mod defect;
pub mod enums;
pub mod event;
pub mod reservation;
pub mod substitute;

// Re-export commonly used types
pub use defect::{DefectDetails, DefectRecord};
pub use enums::{DefectStatus, RepairPartType};
pub use event::DefectEvent;
pub use reservation::InventoryReservation;
pub use substitute::SubstituteAssignment;
