//! Deployment record persistence

pub mod json;
pub mod memory;

use std::collections::HashSet;

use async_trait::async_trait;

use crate::errors::PlatformError;
use crate::models::{Deployment, DeploymentStatus};

pub use json::JsonStore;
pub use memory::MemoryStore;

/// Persistence seam for deployment records.
///
/// `used_vm_ids` only reports ids from records that are not deleted, so
/// destroyed instance ids become allocatable again.
#[async_trait]
pub trait DeploymentStore: Send + Sync {
    /// Insert a new record
    async fn create(&self, deployment: Deployment) -> Result<(), PlatformError>;

    /// Replace an existing record
    async fn update(&self, deployment: Deployment) -> Result<(), PlatformError>;

    /// Fetch a record by id
    async fn get(&self, id: &str) -> Result<Option<Deployment>, PlatformError>;

    /// List all records, newest first
    async fn list(&self) -> Result<Vec<Deployment>, PlatformError>;

    /// Count records with the given status
    async fn count_by_status(&self, status: DeploymentStatus) -> Result<usize, PlatformError>;

    /// Instance ids held by non-deleted records
    async fn used_vm_ids(&self) -> Result<HashSet<u32>, PlatformError>;
}
