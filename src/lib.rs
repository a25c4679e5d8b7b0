//! Rackmend - Server Hardware Defect & Repair Workflow Engine
//!
//! The workflow core of a manufacturing-execution system for server
//! assets: defect records move through diagnosis, parts reservation,
//! repair or vendor RMA, optional substitute issuance, and closure, with
//! every transition checked against a fixed table and audited.

use std::sync::Arc;

pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod repository;
pub mod services;
pub mod workflow;

pub use config::AppConfig;
pub use error::{AppError, AppResult};

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub services: Arc<services::Services>,
}
