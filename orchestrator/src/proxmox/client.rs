//! Proxmox management API client

use std::collections::HashSet;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::errors::PlatformError;
use crate::models::DeploymentKind;
use crate::proxmox::{
    AgentAddress, AgentInterface, ClusterInstance, ClusterInventory, GuestInterface,
    InstanceNetwork,
};
use crate::storage::settings::ProxmoxSettings;

/// API response envelope
#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    data: T,
}

/// Auth ticket from `/access/ticket`
#[derive(Debug, Clone, Deserialize)]
struct Ticket {
    ticket: String,
}

#[derive(Debug, Deserialize)]
struct InstanceRow {
    vmid: u32,
    #[serde(default)]
    name: Option<String>,
    status: String,
    #[serde(default)]
    cpus: Option<f64>,
    #[serde(default)]
    maxmem: Option<u64>,
    #[serde(default)]
    maxdisk: Option<u64>,
    #[serde(default)]
    uptime: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct InterfaceRow {
    name: String,
    #[serde(default)]
    inet: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AgentResult {
    result: Vec<AgentInterfaceRow>,
}

#[derive(Debug, Deserialize)]
struct AgentInterfaceRow {
    name: String,
    #[serde(rename = "ip-addresses", default)]
    ip_addresses: Vec<AgentAddressRow>,
}

#[derive(Debug, Deserialize)]
struct AgentAddressRow {
    #[serde(rename = "ip-address")]
    ip_address: String,
    #[serde(rename = "ip-address-type")]
    ip_address_type: String,
}

/// Client for the Proxmox management API.
///
/// Authenticates with a ticket cookie; the cluster's self-signed
/// certificate is accepted, matching how the API is typically exposed.
pub struct ProxmoxClient {
    client: Client,
    base_url: String,
    user: String,
    password: String,
    node: String,
    ticket: RwLock<Option<Ticket>>,
}

impl ProxmoxClient {
    /// Create a new client from settings
    pub fn new(settings: &ProxmoxSettings) -> Result<Self, PlatformError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .danger_accept_invalid_certs(true)
            .build()?;

        Ok(Self {
            client,
            base_url: settings.api_url.trim_end_matches('/').to_string(),
            user: settings.user.clone(),
            password: settings.password.clone(),
            node: settings.node.clone(),
            ticket: RwLock::new(None),
        })
    }

    /// Node the client operates on
    pub fn node(&self) -> &str {
        &self.node
    }

    async fn login(&self) -> Result<Ticket, PlatformError> {
        let url = format!("{}/access/ticket", self.base_url);
        debug!("POST {}", url);

        let response = self
            .client
            .post(&url)
            .form(&[("username", self.user.as_str()), ("password", self.password.as_str())])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PlatformError::ProxmoxError(format!(
                "authentication failed: {}: {}",
                status, body
            )));
        }

        let envelope: ApiEnvelope<Ticket> = response.json().await?;
        Ok(envelope.data)
    }

    async fn ensure_ticket(&self) -> Result<String, PlatformError> {
        {
            let ticket = self.ticket.read().await;
            if let Some(t) = ticket.as_ref() {
                return Ok(t.ticket.clone());
            }
        }
        let fresh = self.login().await?;
        let cookie = fresh.ticket.clone();
        *self.ticket.write().await = Some(fresh);
        Ok(cookie)
    }

    /// GET an API path, re-authenticating once on an expired ticket
    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, PlatformError> {
        let url = format!("{}{}", self.base_url, path);
        let mut cookie = self.ensure_ticket().await?;

        for retry in 0..2 {
            debug!("GET {}", url);
            let response = self
                .client
                .get(&url)
                .header("Cookie", format!("PVEAuthCookie={}", cookie))
                .send()
                .await?;

            if response.status() == reqwest::StatusCode::UNAUTHORIZED && retry == 0 {
                *self.ticket.write().await = None;
                cookie = self.ensure_ticket().await?;
                continue;
            }

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                return Err(PlatformError::ProxmoxError(format!(
                    "GET {}: {}: {}",
                    path, status, body
                )));
            }

            let envelope: ApiEnvelope<T> = response.json().await?;
            return Ok(envelope.data);
        }

        Err(PlatformError::ProxmoxError(format!(
            "GET {}: ticket refresh failed",
            path
        )))
    }

    async fn list_kind(&self, kind: DeploymentKind) -> Result<Vec<ClusterInstance>, PlatformError> {
        let segment = match kind {
            DeploymentKind::Vm => "qemu",
            DeploymentKind::Lxc => "lxc",
        };
        let rows: Vec<InstanceRow> = self
            .get(&format!("/nodes/{}/{}", self.node, segment))
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| ClusterInstance {
                vmid: row.vmid,
                name: row.name,
                kind,
                status: row.status,
                cpus: row.cpus,
                max_memory_bytes: row.maxmem,
                max_disk_bytes: row.maxdisk,
                uptime_secs: row.uptime,
            })
            .collect())
    }
}

#[async_trait]
impl ClusterInventory for ProxmoxClient {
    async fn list_instances(&self) -> Result<Vec<ClusterInstance>, PlatformError> {
        let mut instances = self.list_kind(DeploymentKind::Vm).await?;
        instances.extend(self.list_kind(DeploymentKind::Lxc).await?);
        Ok(instances)
    }

    async fn used_vm_ids(&self) -> Result<HashSet<u32>, PlatformError> {
        // Best effort: a failing list for one kind is logged and skipped
        // so the other kind's ids are still accounted for.
        let mut ids = HashSet::new();
        let mut any_ok = false;

        for kind in [DeploymentKind::Vm, DeploymentKind::Lxc] {
            match self.list_kind(kind).await {
                Ok(instances) => {
                    any_ok = true;
                    ids.extend(instances.into_iter().map(|i| i.vmid));
                }
                Err(err) => {
                    warn!("failed to list {} instances: {}", kind, err);
                }
            }
        }

        if !any_ok {
            return Err(PlatformError::ProxmoxError(
                "instance inventory unavailable".to_string(),
            ));
        }
        Ok(ids)
    }
}

#[async_trait]
impl InstanceNetwork for ProxmoxClient {
    async fn lxc_interfaces(&self, vmid: u32) -> Result<Vec<GuestInterface>, PlatformError> {
        let rows: Vec<InterfaceRow> = self
            .get(&format!("/nodes/{}/lxc/{}/interfaces", self.node, vmid))
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| GuestInterface {
                name: row.name,
                inet: row.inet,
            })
            .collect())
    }

    async fn qemu_agent_interfaces(
        &self,
        vmid: u32,
    ) -> Result<Vec<AgentInterface>, PlatformError> {
        let data: AgentResult = self
            .get(&format!(
                "/nodes/{}/qemu/{}/agent/network-get-interfaces",
                self.node, vmid
            ))
            .await?;

        Ok(data
            .result
            .into_iter()
            .map(|row| AgentInterface {
                name: row.name,
                addresses: row
                    .ip_addresses
                    .into_iter()
                    .map(|a| AgentAddress {
                        address: a.ip_address,
                        kind: a.ip_address_type,
                    })
                    .collect(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticket_parses_from_a_full_auth_response() {
        let body = r#"{
            "data": {
                "ticket": "PVE:root@pam:1234ABCD::signature",
                "CSRFPreventionToken": "1234ABCD:token",
                "username": "root@pam"
            }
        }"#;
        let envelope: ApiEnvelope<Ticket> = serde_json::from_str(body).unwrap();
        assert_eq!(envelope.data.ticket, "PVE:root@pam:1234ABCD::signature");
    }
}
