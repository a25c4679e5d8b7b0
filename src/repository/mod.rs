//! Repository layer for database operations

pub mod defects;
pub mod reservations;
pub mod substitutes;

use sqlx::{Pool, Postgres};

/// Main repository struct holding database connection pool
#[derive(Clone)]
pub struct Repository {
    pub pool: Pool<Postgres>,
    pub defects: defects::DefectsRepository,
    pub reservations: reservations::ReservationsRepository,
    pub substitutes: substitutes::SubstitutesRepository,
}

impl Repository {
    /// Create a new repository with the given database pool
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self {
            defects: defects::DefectsRepository::new(pool.clone()),
            reservations: reservations::ReservationsRepository::new(pool.clone()),
            substitutes: substitutes::SubstitutesRepository::new(pool.clone()),
            pool,
        }
    }
}
