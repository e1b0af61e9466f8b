//! In-memory deployment store for tests

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::errors::PlatformError;
use crate::models::{Deployment, DeploymentStatus};
use crate::store::DeploymentStore;

/// In-memory store recording the order of persisted status values.
///
/// Used as a test double; the log makes lifecycle ordering assertions
/// possible without touching the filesystem.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, Deployment>>,
    status_log: Mutex<Vec<DeploymentStatus>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every status persisted through create or update, in order
    pub fn status_log(&self) -> Vec<DeploymentStatus> {
        self.status_log.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeploymentStore for MemoryStore {
    async fn create(&self, deployment: Deployment) -> Result<(), PlatformError> {
        self.status_log.lock().unwrap().push(deployment.status);
        self.records
            .lock()
            .unwrap()
            .insert(deployment.id.clone(), deployment);
        Ok(())
    }

    async fn update(&self, deployment: Deployment) -> Result<(), PlatformError> {
        let mut records = self.records.lock().unwrap();
        if !records.contains_key(&deployment.id) {
            return Err(PlatformError::NotFound(format!(
                "deployment {} not found",
                deployment.id
            )));
        }
        self.status_log.lock().unwrap().push(deployment.status);
        records.insert(deployment.id.clone(), deployment);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Deployment>, PlatformError> {
        Ok(self.records.lock().unwrap().get(id).cloned())
    }

    async fn list(&self) -> Result<Vec<Deployment>, PlatformError> {
        let records = self.records.lock().unwrap();
        let mut all: Vec<Deployment> = records.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all)
    }

    async fn count_by_status(&self, status: DeploymentStatus) -> Result<usize, PlatformError> {
        let records = self.records.lock().unwrap();
        Ok(records.values().filter(|d| d.status == status).count())
    }

    async fn used_vm_ids(&self) -> Result<HashSet<u32>, PlatformError> {
        let records = self.records.lock().unwrap();
        Ok(records
            .values()
            .filter(|d| d.status != DeploymentStatus::Deleted)
            .filter_map(|d| d.vm_id)
            .collect())
    }
}
