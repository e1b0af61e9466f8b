//! JSON file backed deployment store

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::errors::PlatformError;
use crate::filesys::file::File;
use crate::models::{Deployment, DeploymentStatus};
use crate::store::DeploymentStore;

/// Deployment store persisting to a single JSON file.
///
/// Records live in memory behind a `RwLock`; every mutation rewrites the
/// backing file atomically so a crash never leaves a half-written store.
pub struct JsonStore {
    file: File,
    records: RwLock<HashMap<String, Deployment>>,
}

impl JsonStore {
    /// Open the store, loading existing records if the file is present
    pub async fn open(file: File) -> Result<Self, PlatformError> {
        let records = if file.exists().await {
            let loaded: Vec<Deployment> = file.read_json().await?;
            loaded.into_iter().map(|d| (d.id.clone(), d)).collect()
        } else {
            HashMap::new()
        };

        Ok(Self {
            file,
            records: RwLock::new(records),
        })
    }

    async fn persist(&self, records: &HashMap<String, Deployment>) -> Result<(), PlatformError> {
        let mut all: Vec<&Deployment> = records.values().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        let contents = serde_json::to_vec_pretty(&all)?;
        self.file.write_atomic(&contents).await?;
        Ok(())
    }
}

#[async_trait]
impl DeploymentStore for JsonStore {
    async fn create(&self, deployment: Deployment) -> Result<(), PlatformError> {
        let mut records = self.records.write().await;
        records.insert(deployment.id.clone(), deployment);
        self.persist(&records).await
    }

    async fn update(&self, deployment: Deployment) -> Result<(), PlatformError> {
        let mut records = self.records.write().await;
        if !records.contains_key(&deployment.id) {
            return Err(PlatformError::NotFound(format!(
                "deployment {} not found",
                deployment.id
            )));
        }
        records.insert(deployment.id.clone(), deployment);
        self.persist(&records).await
    }

    async fn get(&self, id: &str) -> Result<Option<Deployment>, PlatformError> {
        let records = self.records.read().await;
        Ok(records.get(id).cloned())
    }

    async fn list(&self) -> Result<Vec<Deployment>, PlatformError> {
        let records = self.records.read().await;
        let mut all: Vec<Deployment> = records.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all)
    }

    async fn count_by_status(&self, status: DeploymentStatus) -> Result<usize, PlatformError> {
        let records = self.records.read().await;
        Ok(records.values().filter(|d| d.status == status).count())
    }

    async fn used_vm_ids(&self) -> Result<HashSet<u32>, PlatformError> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .filter(|d| d.status != DeploymentStatus::Deleted)
            .filter_map(|d| d.vm_id)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DeploymentKind, DeploymentRequest, ResourceSpec};

    fn request(name: &str) -> DeploymentRequest {
        DeploymentRequest {
            name: name.to_string(),
            kind: DeploymentKind::Lxc,
            framework: "flask".to_string(),
            repo_url: "https://github.com/acme/demo.git".to_string(),
            resources: ResourceSpec::default(),
            env_vars: None,
        }
    }

    #[tokio::test]
    async fn records_survive_reopen() {
        let dir = std::env::temp_dir().join(format!("skiff-store-{}", std::process::id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("deployments.json");

        let mut deployment = Deployment::from_request(&request("demo"));
        deployment.vm_id = Some(123);
        let id = deployment.id.clone();

        {
            let store = JsonStore::open(File::new(&path)).await.unwrap();
            store.create(deployment).await.unwrap();
        }

        let store = JsonStore::open(File::new(&path)).await.unwrap();
        let loaded = store.get(&id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "demo");
        assert_eq!(loaded.vm_id, Some(123));

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn deleted_records_release_their_ids() {
        let dir = std::env::temp_dir().join(format!("skiff-store-ids-{}", std::process::id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let store = JsonStore::open(File::new(dir.join("deployments.json")))
            .await
            .unwrap();

        let mut active = Deployment::from_request(&request("active"));
        active.vm_id = Some(200);
        let mut gone = Deployment::from_request(&request("gone"));
        gone.vm_id = Some(300);
        gone.status = DeploymentStatus::Deleted;

        store.create(active).await.unwrap();
        store.create(gone).await.unwrap();

        let used = store.used_vm_ids().await.unwrap();
        assert!(used.contains(&200));
        assert!(!used.contains(&300));

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn update_requires_existing_record() {
        let dir = std::env::temp_dir().join(format!("skiff-store-upd-{}", std::process::id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let store = JsonStore::open(File::new(dir.join("deployments.json")))
            .await
            .unwrap();

        let deployment = Deployment::from_request(&request("ghost"));
        assert!(store.update(deployment).await.is_err());

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }
}
