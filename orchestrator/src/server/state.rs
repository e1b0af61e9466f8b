//! Server state

use std::sync::Arc;

use crate::deploy::Orchestrator;
use crate::proxmox::ClusterInventory;
use crate::storage::Settings;
use crate::store::DeploymentStore;

/// Server state shared across handlers
pub struct ServerState {
    pub settings: Settings,
    pub store: Arc<dyn DeploymentStore>,
    pub orchestrator: Arc<Orchestrator>,
    pub inventory: Arc<dyn ClusterInventory>,
}

impl ServerState {
    pub fn new(
        settings: Settings,
        store: Arc<dyn DeploymentStore>,
        orchestrator: Arc<Orchestrator>,
        inventory: Arc<dyn ClusterInventory>,
    ) -> Self {
        Self {
            settings,
            store,
            orchestrator,
            inventory,
        }
    }
}
