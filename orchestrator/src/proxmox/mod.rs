//! Proxmox management API integration

pub mod client;
pub mod resolver;

use std::collections::HashSet;

use async_trait::async_trait;

use crate::errors::PlatformError;
use crate::models::DeploymentKind;

pub use client::ProxmoxClient;
pub use resolver::resolve_address;

/// One guest known to the cluster
#[derive(Debug, Clone)]
pub struct ClusterInstance {
    pub vmid: u32,
    pub name: Option<String>,
    pub kind: DeploymentKind,
    pub status: String,
    pub cpus: Option<f64>,
    pub max_memory_bytes: Option<u64>,
    pub max_disk_bytes: Option<u64>,
    pub uptime_secs: Option<u64>,
}

/// A network interface reported from inside an LXC container
#[derive(Debug, Clone)]
pub struct GuestInterface {
    pub name: String,
    /// IPv4 address, possibly with a CIDR suffix
    pub inet: Option<String>,
}

/// One address reported by the qemu guest agent
#[derive(Debug, Clone)]
pub struct AgentAddress {
    pub address: String,
    /// "ipv4" or "ipv6"
    pub kind: String,
}

/// A network interface reported by the qemu guest agent
#[derive(Debug, Clone)]
pub struct AgentInterface {
    pub name: String,
    pub addresses: Vec<AgentAddress>,
}

/// Inventory view of the cluster (instance lists and used ids)
#[async_trait]
pub trait ClusterInventory: Send + Sync {
    /// All instances on the configured node, both kinds
    async fn list_instances(&self) -> Result<Vec<ClusterInstance>, PlatformError>;

    /// Instance ids currently present on the configured node
    async fn used_vm_ids(&self) -> Result<HashSet<u32>, PlatformError>;
}

/// Guest network introspection, decoupled from the concrete client for tests
#[async_trait]
pub trait InstanceNetwork: Send + Sync {
    /// Interfaces of a running container
    async fn lxc_interfaces(&self, vmid: u32) -> Result<Vec<GuestInterface>, PlatformError>;

    /// Interfaces reported by a VM's guest agent.
    ///
    /// An error here usually means the agent is not up yet; callers treat
    /// it as "not ready" rather than a hard failure.
    async fn qemu_agent_interfaces(&self, vmid: u32)
        -> Result<Vec<AgentInterface>, PlatformError>;
}
