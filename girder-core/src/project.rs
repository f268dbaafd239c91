//! Project-module collaborator port.

use crate::error::DomainResult;
use async_trait::async_trait;
use std::sync::{Mutex, PoisonError};
use uuid::Uuid;

/// Outbound notification seam toward the project module.
#[async_trait]
pub trait ProjectGateway: Send + Sync {
    /// Called once a contract is signed; the project flips to IN_PROGRESS.
    async fn mark_in_progress(&self, project_id: Uuid) -> DomainResult<()>;
}

/// Records notifications instead of delivering them.
#[derive(Default)]
pub struct MemoryProjectGateway {
    notified: Mutex<Vec<Uuid>>,
}

impl MemoryProjectGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notified(&self) -> Vec<Uuid> {
        self.notified
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl ProjectGateway for MemoryProjectGateway {
    async fn mark_in_progress(&self, project_id: Uuid) -> DomainResult<()> {
        self.notified
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(project_id);
        Ok(())
    }
}
