//! Deployment models

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::generate_uuid;

/// Kind of guest backing a deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentKind {
    /// Full virtual machine
    Vm,

    /// System container
    Lxc,
}

impl DeploymentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentKind::Vm => "vm",
            DeploymentKind::Lxc => "lxc",
        }
    }
}

impl std::fmt::Display for DeploymentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deployment lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    /// Record created, nothing provisioned yet
    Pending,

    /// Infrastructure creation in progress
    Provisioning,

    /// Guest exists, application setup in progress
    Deploying,

    /// Application launched
    Running,

    /// A lifecycle step failed
    Failed,

    /// Guest exists but is not running (imported state)
    Stopped,

    /// Infrastructure destroyed
    Deleted,
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Pending => "pending",
            DeploymentStatus::Provisioning => "provisioning",
            DeploymentStatus::Deploying => "deploying",
            DeploymentStatus::Running => "running",
            DeploymentStatus::Failed => "failed",
            DeploymentStatus::Stopped => "stopped",
            DeploymentStatus::Deleted => "deleted",
        }
    }

    /// Whether the status admits no further lifecycle progress
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeploymentStatus::Deleted)
    }
}

impl std::fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requested guest sizing; unset fields fall back to per-kind defaults
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ResourceSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cores: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_mb: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_gb: Option<u64>,
}

/// Immutable input describing a requested deployment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentRequest {
    /// Deployment name (becomes the guest hostname after sanitization)
    pub name: String,

    /// Guest kind
    pub kind: DeploymentKind,

    /// Framework id from the catalog
    pub framework: String,

    /// Git repository to deploy
    pub repo_url: String,

    /// Requested sizing
    #[serde(default)]
    pub resources: ResourceSpec,

    /// Environment variables materialized as `.env` on the guest
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_vars: Option<BTreeMap<String, String>>,
}

/// A deployment record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    /// Unique deployment ID
    pub id: String,

    /// Deployment name
    pub name: String,

    /// Guest kind
    pub kind: DeploymentKind,

    /// Framework id
    pub framework: String,

    /// Git repository URL
    pub repo_url: String,

    /// Requested sizing
    #[serde(default)]
    pub resources: ResourceSpec,

    /// Current status
    pub status: DeploymentStatus,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// When the application reached running
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployed_at: Option<DateTime<Utc>>,

    /// When the infrastructure was destroyed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,

    /// Guest address once known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,

    /// Numeric hypervisor instance id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vm_id: Option<u32>,

    /// Failure detail when status is failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl Deployment {
    /// Create a fresh pending record from a request
    pub fn from_request(request: &DeploymentRequest) -> Self {
        Self {
            id: generate_uuid(),
            name: request.name.clone(),
            kind: request.kind,
            framework: request.framework.clone(),
            repo_url: request.repo_url.clone(),
            resources: request.resources,
            status: DeploymentStatus::Pending,
            created_at: Utc::now(),
            deployed_at: None,
            deleted_at: None,
            ip_address: None,
            vm_id: None,
            error_message: None,
        }
    }

    /// URL the deployed application answers on, once an address is known
    pub fn access_url(&self, port: u16) -> Option<String> {
        self.ip_address
            .as_deref()
            .map(|ip| format!("http://{}:{}", ip, port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&DeploymentStatus::Provisioning).unwrap();
        assert_eq!(json, "\"provisioning\"");
        let back: DeploymentStatus = serde_json::from_str("\"running\"").unwrap();
        assert_eq!(back, DeploymentStatus::Running);
    }

    #[test]
    fn access_url_needs_address() {
        let request = DeploymentRequest {
            name: "demo".to_string(),
            kind: DeploymentKind::Lxc,
            framework: "flask".to_string(),
            repo_url: "https://github.com/acme/demo.git".to_string(),
            resources: ResourceSpec::default(),
            env_vars: None,
        };
        let mut deployment = Deployment::from_request(&request);
        assert!(deployment.access_url(5000).is_none());

        deployment.ip_address = Some("192.168.100.42".to_string());
        assert_eq!(
            deployment.access_url(5000).as_deref(),
            Some("http://192.168.100.42:5000")
        );
    }
}
