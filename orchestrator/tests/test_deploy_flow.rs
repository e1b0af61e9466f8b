//! Deployment flow tests against stubbed infrastructure

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use skiffd::deploy::Orchestrator;
use skiffd::errors::{ApplyStage, PlatformError};
use skiffd::infra::engine::{AppliedInfra, InfraEngine};
use skiffd::infra::keys::{KeyProvider, SshKeyMaterial};
use skiffd::infra::TfVars;
use skiffd::models::{DeploymentKind, DeploymentRequest, DeploymentStatus, ResourceSpec};
use skiffd::proxmox::{
    AgentInterface, ClusterInstance, ClusterInventory, GuestInterface, InstanceNetwork,
};
use skiffd::remote::{CommandRunner, ConnectOptions};
use skiffd::storage::Settings;
use skiffd::store::{DeploymentStore, MemoryStore};

struct StubEngine {
    applied: Mutex<Vec<String>>,
    destroyed: Mutex<Vec<String>>,
    fail_apply: bool,
}

impl StubEngine {
    fn new(fail_apply: bool) -> Self {
        Self {
            applied: Mutex::new(Vec::new()),
            destroyed: Mutex::new(Vec::new()),
            fail_apply,
        }
    }
}

#[async_trait]
impl InfraEngine for StubEngine {
    async fn apply(&self, name: &str, vars: &TfVars) -> Result<AppliedInfra, PlatformError> {
        self.applied.lock().unwrap().push(name.to_string());
        if self.fail_apply {
            return Err(PlatformError::ApplyFailed {
                stage: ApplyStage::Apply,
                output: "quota exceeded".to_string(),
            });
        }
        Ok(AppliedInfra {
            vm_id: vars.vm_id,
            ip_address: None,
        })
    }

    async fn destroy(&self, name: &str) -> Result<(), PlatformError> {
        self.destroyed.lock().unwrap().push(name.to_string());
        Ok(())
    }
}

struct StubRunner {
    calls: Mutex<Vec<(String, Vec<String>)>>,
}

impl StubRunner {
    fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl CommandRunner for StubRunner {
    async fn connect_and_run(
        &self,
        address: &str,
        commands: &[String],
        _options: &ConnectOptions,
    ) -> Result<(), PlatformError> {
        self.calls
            .lock()
            .unwrap()
            .push((address.to_string(), commands.to_vec()));
        Ok(())
    }
}

struct StubNetwork;

#[async_trait]
impl InstanceNetwork for StubNetwork {
    async fn lxc_interfaces(&self, _vmid: u32) -> Result<Vec<GuestInterface>, PlatformError> {
        Ok(vec![
            GuestInterface {
                name: "lo".to_string(),
                inet: Some("127.0.0.1/8".to_string()),
            },
            GuestInterface {
                name: "eth0".to_string(),
                inet: Some("192.168.100.55/24".to_string()),
            },
        ])
    }

    async fn qemu_agent_interfaces(
        &self,
        _vmid: u32,
    ) -> Result<Vec<AgentInterface>, PlatformError> {
        Ok(Vec::new())
    }
}

struct StubInventory {
    ids: HashSet<u32>,
    instances: Vec<ClusterInstance>,
}

impl StubInventory {
    fn empty() -> Self {
        Self {
            ids: HashSet::new(),
            instances: Vec::new(),
        }
    }
}

#[async_trait]
impl ClusterInventory for StubInventory {
    async fn list_instances(&self) -> Result<Vec<ClusterInstance>, PlatformError> {
        Ok(self.instances.clone())
    }

    async fn used_vm_ids(&self) -> Result<HashSet<u32>, PlatformError> {
        Ok(self.ids.clone())
    }
}

struct StubKeys;

#[async_trait]
impl KeyProvider for StubKeys {
    async fn ensure_keypair(&self) -> Result<SshKeyMaterial, PlatformError> {
        Ok(SshKeyMaterial {
            private_key_path: PathBuf::from("/tmp/test_id_rsa"),
            public_key: "ssh-rsa AAAATESTKEY test@host".to_string(),
        })
    }
}

fn flask_request() -> DeploymentRequest {
    DeploymentRequest {
        name: "demo-app".to_string(),
        kind: DeploymentKind::Lxc,
        framework: "flask".to_string(),
        repo_url: "https://github.com/acme/demo-app".to_string(),
        resources: ResourceSpec::default(),
        env_vars: None,
    }
}

fn build_orchestrator(
    store: Arc<MemoryStore>,
    engine: Arc<StubEngine>,
    inventory: Arc<StubInventory>,
) -> (Orchestrator, Arc<StubRunner>) {
    let runner = Arc::new(StubRunner::new());
    let orchestrator = Orchestrator::new(
        store,
        engine,
        runner.clone(),
        Arc::new(StubNetwork),
        inventory,
        Arc::new(StubKeys),
        Settings::default(),
    );
    (orchestrator, runner)
}

#[tokio::test]
async fn deploy_runs_full_lifecycle() {
    let store = Arc::new(MemoryStore::new());
    let engine = Arc::new(StubEngine::new(false));
    let (orchestrator, runner) =
        build_orchestrator(store.clone(), engine.clone(), Arc::new(StubInventory::empty()));

    // A display name with spaces must come out as a sanitized hostname
    let request = DeploymentRequest {
        name: "Demo App".to_string(),
        resources: ResourceSpec {
            cores: Some(1),
            memory_mb: Some(512),
            disk_gb: Some(10),
        },
        ..flask_request()
    };
    let deployment = orchestrator.deploy(request).await.unwrap();

    assert_eq!(deployment.name, "Demo App");
    assert_eq!(deployment.status, DeploymentStatus::Running);
    assert_eq!(deployment.ip_address.as_deref(), Some("192.168.100.55"));
    let vm_id = deployment.vm_id.unwrap();
    assert!((100..=999).contains(&vm_id));
    assert!(deployment.deployed_at.is_some());
    assert_eq!(
        deployment.access_url(5000).as_deref(),
        Some("http://192.168.100.55:5000")
    );

    // The workspace name is the sanitized hostname
    assert_eq!(engine.applied.lock().unwrap().as_slice(), ["demo-app"]);

    // Commands ran against the resolved address
    let calls = runner.calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "192.168.100.55");
    assert!(!calls[0].1.is_empty());

    // Every intermediate status was persisted in order
    let log = store.status_log();
    assert_eq!(
        log,
        vec![
            DeploymentStatus::Pending,
            DeploymentStatus::Pending,
            DeploymentStatus::Provisioning,
            DeploymentStatus::Deploying,
            DeploymentStatus::Running,
        ]
    );
}

#[tokio::test]
async fn deploy_skips_ids_held_by_the_cluster() {
    let store = Arc::new(MemoryStore::new());
    let engine = Arc::new(StubEngine::new(false));
    let mut inventory = StubInventory::empty();
    // Claim most of the range so the scan has to work for its answer
    inventory.ids = (100..=990).collect();
    let (orchestrator, _runner) =
        build_orchestrator(store.clone(), engine, Arc::new(inventory));

    let deployment = orchestrator.deploy(flask_request()).await.unwrap();

    let vm_id = deployment.vm_id.unwrap();
    assert!((991..=999).contains(&vm_id));
}

#[tokio::test]
async fn failed_apply_marks_deployment_failed() {
    let store = Arc::new(MemoryStore::new());
    let engine = Arc::new(StubEngine::new(true));
    let (orchestrator, runner) =
        build_orchestrator(store.clone(), engine, Arc::new(StubInventory::empty()));

    let err = orchestrator.deploy(flask_request()).await.unwrap_err();
    assert!(matches!(err, PlatformError::ApplyFailed { .. }));

    // No commands ran and no record ever reached Running
    assert!(runner.calls.lock().unwrap().is_empty());
    let log = store.status_log();
    assert_eq!(log.last(), Some(&DeploymentStatus::Failed));
    assert!(!log.contains(&DeploymentStatus::Running));

    let records = store.list().await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, DeploymentStatus::Failed);
    assert!(records[0]
        .error_message
        .as_deref()
        .unwrap()
        .contains("quota exceeded"));
}

#[tokio::test]
async fn delete_destroys_infrastructure_first() {
    let store = Arc::new(MemoryStore::new());
    let engine = Arc::new(StubEngine::new(false));
    let (orchestrator, _runner) =
        build_orchestrator(store.clone(), engine.clone(), Arc::new(StubInventory::empty()));

    let deployment = orchestrator.deploy(flask_request()).await.unwrap();
    let deleted = orchestrator.delete(&deployment.id).await.unwrap();

    assert_eq!(deleted.status, DeploymentStatus::Deleted);
    assert!(deleted.deleted_at.is_some());
    assert_eq!(engine.destroyed.lock().unwrap().as_slice(), ["demo-app"]);

    // Deleted ids are free again
    let used = store.used_vm_ids().await.unwrap();
    assert!(used.is_empty());
}

#[tokio::test]
async fn sync_imports_untracked_instances() {
    let store = Arc::new(MemoryStore::new());
    let engine = Arc::new(StubEngine::new(false));
    let mut inventory = StubInventory::empty();
    inventory.instances = vec![
        ClusterInstance {
            vmid: 300,
            name: Some("legacy-blog".to_string()),
            kind: DeploymentKind::Lxc,
            status: "running".to_string(),
            cpus: Some(2.0),
            max_memory_bytes: Some(2048 * 1024 * 1024),
            max_disk_bytes: Some(20 * 1024 * 1024 * 1024),
            uptime_secs: Some(3600),
        },
        ClusterInstance {
            vmid: 301,
            name: Some("stopped-box".to_string()),
            kind: DeploymentKind::Vm,
            status: "stopped".to_string(),
            cpus: None,
            max_memory_bytes: None,
            max_disk_bytes: None,
            uptime_secs: None,
        },
    ];
    let (orchestrator, _runner) =
        build_orchestrator(store.clone(), engine, Arc::new(inventory));

    let report = orchestrator.sync_cluster().await.unwrap();
    assert_eq!(report.imported.len(), 2);
    assert!(report.skipped.is_empty());

    let records = store.list().await.unwrap();
    assert_eq!(records.len(), 2);

    let blog = records.iter().find(|d| d.vm_id == Some(300)).unwrap();
    assert_eq!(blog.name, "legacy-blog");
    assert_eq!(blog.status, DeploymentStatus::Running);
    assert_eq!(blog.framework, "unknown");
    assert_eq!(blog.ip_address.as_deref(), Some("192.168.100.55"));

    let stopped = records.iter().find(|d| d.vm_id == Some(301)).unwrap();
    assert_eq!(stopped.status, DeploymentStatus::Stopped);

    // A second sync skips everything already tracked
    let report = orchestrator.sync_cluster().await.unwrap();
    assert!(report.imported.is_empty());
    assert_eq!(report.skipped.len(), 2);
}

#[tokio::test]
async fn deploy_with_env_vars_wires_them_into_commands() {
    let store = Arc::new(MemoryStore::new());
    let engine = Arc::new(StubEngine::new(false));
    let (orchestrator, runner) =
        build_orchestrator(store.clone(), engine, Arc::new(StubInventory::empty()));

    let mut request = flask_request();
    let mut env = BTreeMap::new();
    env.insert("SECRET_KEY".to_string(), "s3cret".to_string());
    request.env_vars = Some(env);

    orchestrator.deploy(request).await.unwrap();

    let calls = runner.calls.lock().unwrap();
    let script = calls[0].1.join("\n");
    assert!(script.contains("SECRET_KEY=s3cret"));
}
