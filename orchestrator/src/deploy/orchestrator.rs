//! Deployment lifecycle orchestration

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::deploy::fsm::{transition, LifecycleEvent};
use crate::errors::PlatformError;
use crate::infra::allocator::IdAllocator;
use crate::infra::{config, InfraEngine, KeyProvider};
use crate::models::{Deployment, DeploymentKind, DeploymentRequest, DeploymentStatus, ResourceSpec};
use crate::proxmox::{resolver, ClusterInventory, InstanceNetwork};
use crate::remote::{commands, ConnectOptions, JumpHost};
use crate::remote::CommandRunner;
use crate::storage::Settings;
use crate::store::DeploymentStore;

/// Drives a deployment through its whole lifecycle.
///
/// Every status change is persisted before the next phase starts, so a
/// crash mid-flow leaves an honest record behind. There is no automatic
/// rollback and no whole-flow retry; a failed deployment keeps its
/// partially created infrastructure until it is deleted.
pub struct Orchestrator {
    store: Arc<dyn DeploymentStore>,
    engine: Arc<dyn InfraEngine>,
    runner: Arc<dyn CommandRunner>,
    network: Arc<dyn InstanceNetwork>,
    inventory: Arc<dyn ClusterInventory>,
    keys: Arc<dyn KeyProvider>,
    allocator: IdAllocator,
    settings: Settings,
    /// Serializes id allocation with its persistence; without this two
    /// concurrent deploys can pick the same free id.
    alloc_lock: Mutex<()>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn DeploymentStore>,
        engine: Arc<dyn InfraEngine>,
        runner: Arc<dyn CommandRunner>,
        network: Arc<dyn InstanceNetwork>,
        inventory: Arc<dyn ClusterInventory>,
        keys: Arc<dyn KeyProvider>,
        settings: Settings,
    ) -> Self {
        let allocator = IdAllocator::new(store.clone(), inventory.clone());
        Self {
            store,
            engine,
            runner,
            network,
            inventory,
            keys,
            allocator,
            settings,
            alloc_lock: Mutex::new(()),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Run the full deployment flow for a request.
    ///
    /// On any failure the record is marked failed with the error detail
    /// and the error is surfaced to the caller.
    pub async fn deploy(
        &self,
        request: DeploymentRequest,
    ) -> Result<Deployment, PlatformError> {
        let mut deployment = Deployment::from_request(&request);
        info!(
            "starting deployment {} ({}, {} on {})",
            deployment.name, deployment.id, request.framework, request.kind
        );
        self.store.create(deployment.clone()).await?;

        match self.run_flow(&mut deployment, &request).await {
            Ok(()) => {
                info!(
                    "deployment {} running at {:?}",
                    deployment.name, deployment.ip_address
                );
                Ok(deployment)
            }
            Err(err) => {
                self.mark_failed(&mut deployment, &err).await;
                Err(err)
            }
        }
    }

    async fn run_flow(
        &self,
        deployment: &mut Deployment,
        request: &DeploymentRequest,
    ) -> Result<(), PlatformError> {
        // Allocate and persist the instance id atomically
        {
            let _guard = self.alloc_lock.lock().await;
            let vm_id = self.allocator.allocate().await?;
            deployment.vm_id = Some(vm_id);
            self.store.update(deployment.clone()).await?;
        }
        let vm_id = deployment.vm_id.ok_or_else(|| {
            PlatformError::Internal("vm_id missing after allocation".to_string())
        })?;

        let key = self.keys.ensure_keypair().await?;
        let vars = config::generate(request, vm_id, &self.settings, &key.public_key)?;

        deployment.status = transition(deployment.status, &LifecycleEvent::Provision)?;
        self.store.update(deployment.clone()).await?;

        let applied = self.engine.apply(&vars.deployment_name, &vars).await?;
        let ip_address = match applied.ip_address {
            Some(ip) => ip,
            None => {
                info!(
                    "no address in terraform outputs for {}, polling the hypervisor",
                    vars.deployment_name
                );
                resolver::resolve_address(
                    self.network.as_ref(),
                    request.kind,
                    applied.vm_id,
                    resolver::DEFAULT_MAX_ATTEMPTS,
                    tokio::time::sleep,
                )
                .await?
            }
        };

        deployment.vm_id = Some(applied.vm_id);
        deployment.ip_address = Some(ip_address.clone());
        deployment.status = transition(deployment.status, &LifecycleEvent::Provisioned)?;
        self.store.update(deployment.clone()).await?;

        // Descriptor existence was already checked by config::generate
        let descriptor = self
            .settings
            .frameworks
            .get(&request.framework)
            .ok_or_else(|| PlatformError::UnsupportedFramework(request.framework.clone()))?;
        let command_list = commands::build_commands(
            &request.framework,
            descriptor,
            &request.repo_url,
            request.env_vars.as_ref(),
        );

        let mut options = ConnectOptions::new(&self.settings.ssh.user, &key.private_key_path);
        options.jump_host = self.settings.ssh.jump_host.as_ref().map(|j| JumpHost {
            host: j.host.clone(),
            user: j.user.clone(),
            password: j.password.clone(),
        });

        self.runner
            .connect_and_run(&ip_address, &command_list, &options)
            .await?;

        deployment.status = transition(deployment.status, &LifecycleEvent::Deployed)?;
        deployment.deployed_at = Some(Utc::now());
        self.store.update(deployment.clone()).await?;

        Ok(())
    }

    async fn mark_failed(&self, deployment: &mut Deployment, err: &PlatformError) {
        error!("deployment {} failed: {}", deployment.name, err);

        match transition(deployment.status, &LifecycleEvent::Fail(err.to_string())) {
            Ok(next) => {
                deployment.status = next;
                deployment.error_message = Some(err.to_string());
                if let Err(persist_err) = self.store.update(deployment.clone()).await {
                    error!(
                        "could not persist failure for {}: {}",
                        deployment.id, persist_err
                    );
                }
            }
            Err(transition_err) => {
                error!(
                    "could not mark {} failed: {}",
                    deployment.id, transition_err
                );
            }
        }
    }

    /// Destroy a deployment's infrastructure and mark it deleted.
    ///
    /// A failed destroy leaves the record untouched; marking a live
    /// guest deleted would orphan it.
    pub async fn delete(&self, id: &str) -> Result<Deployment, PlatformError> {
        let mut deployment = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| PlatformError::NotFound(format!("deployment {} not found", id)))?;

        let workspace = config::sanitize_hostname(&deployment.name);
        self.engine.destroy(&workspace).await?;

        deployment.status = transition(deployment.status, &LifecycleEvent::Delete)?;
        deployment.deleted_at = Some(Utc::now());
        self.store.update(deployment.clone()).await?;

        info!("deployment {} deleted", deployment.name);
        Ok(deployment)
    }

    /// Import cluster instances that no record tracks yet.
    ///
    /// Imported records get framework "unknown" and a status matching
    /// the instance state; address lookup is best effort with a single
    /// attempt per instance.
    pub async fn sync_cluster(&self) -> Result<SyncReport, PlatformError> {
        let instances = self.inventory.list_instances().await?;
        let tracked = self.store.used_vm_ids().await?;

        let mut report = SyncReport::default();

        for instance in instances {
            let name = instance
                .name
                .clone()
                .unwrap_or_else(|| format!("{}-{}", instance.kind, instance.vmid));

            if tracked.contains(&instance.vmid) {
                report.skipped.push(SyncOutcome {
                    vmid: instance.vmid,
                    name,
                    kind: instance.kind,
                    ip_address: None,
                });
                continue;
            }

            let ip_address = self.lookup_address_once(instance.kind, instance.vmid).await;

            let mut deployment = Deployment::from_request(&DeploymentRequest {
                name: name.clone(),
                kind: instance.kind,
                framework: "unknown".to_string(),
                repo_url: "imported-from-proxmox".to_string(),
                resources: ResourceSpec {
                    cores: instance.cpus.map(|c| c as u32),
                    memory_mb: instance.max_memory_bytes.map(|b| b / (1024 * 1024)),
                    disk_gb: instance.max_disk_bytes.map(|b| b / (1024 * 1024 * 1024)),
                },
                env_vars: None,
            });
            deployment.vm_id = Some(instance.vmid);
            deployment.ip_address = ip_address.clone();
            deployment.status = if instance.status == "running" {
                DeploymentStatus::Running
            } else {
                DeploymentStatus::Stopped
            };
            self.store.create(deployment).await?;

            report.imported.push(SyncOutcome {
                vmid: instance.vmid,
                name,
                kind: instance.kind,
                ip_address,
            });
        }

        info!(
            "cluster sync imported {} instances, skipped {}",
            report.imported.len(),
            report.skipped.len()
        );
        Ok(report)
    }

    async fn lookup_address_once(&self, kind: DeploymentKind, vmid: u32) -> Option<String> {
        let result = resolver::resolve_address(
            self.network.as_ref(),
            kind,
            vmid,
            1,
            |_d: Duration| async {},
        )
        .await;

        match result {
            Ok(address) => Some(address),
            Err(err) => {
                warn!("no address for imported instance {}: {}", vmid, err);
                None
            }
        }
    }
}

/// One instance touched by a cluster sync
#[derive(Debug, Clone, Serialize)]
pub struct SyncOutcome {
    pub vmid: u32,
    pub name: String,
    pub kind: DeploymentKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
}

/// Result of a cluster sync
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub imported: Vec<SyncOutcome>,
    pub skipped: Vec<SyncOutcome>,
}
