//! Business logic services

pub mod stats;
pub mod workflow;

use crate::{repository::Repository, workflow::SlaPolicy};

/// Container for all services
#[derive(Clone)]
pub struct Services {
    pub workflow: workflow::WorkflowService,
    pub stats: stats::StatsService,
}

impl Services {
    /// Create all services with the given repository and workflow policy
    pub fn new(repository: Repository, policy: SlaPolicy) -> Self {
        Self {
            workflow: workflow::WorkflowService::new(repository.clone(), policy.clone()),
            stats: stats::StatsService::new(repository, policy),
        }
    }
}
