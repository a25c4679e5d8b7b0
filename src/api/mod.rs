//! API handlers for Rackmend REST endpoints

pub mod defects;
pub mod health;
pub mod openapi;
pub mod stats;
