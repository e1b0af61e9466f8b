//! Application state construction

use std::sync::Arc;

use tracing::info;

use crate::app::options::AppOptions;
use crate::deploy::Orchestrator;
use crate::errors::PlatformError;
use crate::infra::engine::{TerraformCli, TerraformEngine};
use crate::infra::keys::ManagedKeypair;
use crate::proxmox::ProxmoxClient;
use crate::remote::SshExecutor;
use crate::server::ServerState;
use crate::storage::Settings;
use crate::store::{DeploymentStore, JsonStore};

/// Build the shared server state from options and settings.
///
/// Sets up the storage layout, opens the deployment store, and wires
/// the Proxmox client, terraform engine, keypair manager, and SSH
/// executor into the orchestrator.
pub async fn init_state(
    options: &AppOptions,
    settings: Settings,
) -> Result<Arc<ServerState>, PlatformError> {
    let layout = options.storage.layout.clone();
    layout.setup().await?;
    info!("storage layout ready at {:?}", layout.base_dir);

    let store: Arc<dyn DeploymentStore> =
        Arc::new(JsonStore::open(layout.deployments_file()).await?);

    let proxmox = Arc::new(ProxmoxClient::new(&settings.proxmox)?);

    let terraform_dir = layout.terraform_dir();
    let terraform = Arc::new(TerraformCli::new(
        settings.terraform.binary.clone(),
        terraform_dir.path().to_path_buf(),
    ));
    let engine = Arc::new(TerraformEngine::new(terraform, layout.clone()));

    let keys = Arc::new(ManagedKeypair::new(layout));
    let runner = Arc::new(SshExecutor);

    let orchestrator = Arc::new(Orchestrator::new(
        store.clone(),
        engine,
        runner,
        proxmox.clone(),
        proxmox.clone(),
        keys,
        settings.clone(),
    ));

    Ok(Arc::new(ServerState::new(
        settings,
        store,
        orchestrator,
        proxmox,
    )))
}
