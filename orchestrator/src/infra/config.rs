//! Terraform variable generation

use serde::Serialize;

use crate::errors::PlatformError;
use crate::models::{DeploymentKind, DeploymentRequest};
use crate::storage::settings::{Language, Settings};

/// Variables written to `terraform.tfvars.json` for one deployment
#[derive(Debug, Clone, Serialize)]
pub struct TfVars {
    /// Sanitized name, used as the guest hostname
    pub deployment_name: String,
    pub vm_id: u32,
    pub deployment_type: String,
    pub framework: String,
    pub framework_language: Language,
    pub framework_port: u16,

    pub proxmox_url: String,
    pub proxmox_user: String,
    pub proxmox_password: String,
    pub proxmox_node: String,
    pub proxmox_storage: String,
    pub network_bridge: String,

    pub cores: u32,
    pub memory: u64,
    pub disk_size: u64,

    pub gateway: String,
    /// Comma-joined list, the shape the terraform module expects
    pub dns_servers: String,

    pub ssh_user: String,
    pub ssh_public_keys: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub os_template: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vm_template: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iso_image: Option<String>,
}

/// Make a name usable as a DNS hostname.
///
/// Lowercases, turns spaces and underscores into hyphens, and drops
/// everything else outside [a-z0-9-]. Idempotent.
pub fn sanitize_hostname(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| if c == ' ' || c == '_' { '-' } else { c })
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-')
        .collect()
}

/// Build the terraform variables for a deployment request.
///
/// Unknown frameworks are rejected here, before any infrastructure work
/// starts. Missing resource fields fall back to per-kind defaults.
pub fn generate(
    request: &DeploymentRequest,
    vm_id: u32,
    settings: &Settings,
    ssh_public_key: &str,
) -> Result<TfVars, PlatformError> {
    let descriptor = settings
        .frameworks
        .get(&request.framework)
        .ok_or_else(|| PlatformError::UnsupportedFramework(request.framework.clone()))?;

    let defaults = match request.kind {
        DeploymentKind::Vm => settings.resources.vm,
        DeploymentKind::Lxc => settings.resources.lxc,
    };

    let (os_template, vm_template, iso_image) = match request.kind {
        DeploymentKind::Lxc => (Some(settings.templates.lxc_os_template.clone()), None, None),
        DeploymentKind::Vm => (
            None,
            Some(settings.templates.vm_template.clone()),
            Some(settings.templates.vm_iso.clone()),
        ),
    };

    Ok(TfVars {
        deployment_name: sanitize_hostname(&request.name),
        vm_id,
        deployment_type: request.kind.as_str().to_string(),
        framework: request.framework.clone(),
        framework_language: descriptor.language,
        framework_port: descriptor.port,

        proxmox_url: settings.proxmox.api_url.clone(),
        proxmox_user: settings.proxmox.user.clone(),
        proxmox_password: settings.proxmox.password.clone(),
        proxmox_node: settings.proxmox.node.clone(),
        proxmox_storage: settings.proxmox.storage.clone(),
        network_bridge: settings.proxmox.network_bridge.clone(),

        cores: request.resources.cores.unwrap_or(defaults.cores),
        memory: request.resources.memory_mb.unwrap_or(defaults.memory_mb),
        disk_size: request.resources.disk_gb.unwrap_or(defaults.disk_gb),

        gateway: settings.network.gateway.clone(),
        dns_servers: settings.network.dns_servers.join(","),

        ssh_user: settings.ssh.user.clone(),
        ssh_public_keys: vec![ssh_public_key.to_string()],

        os_template,
        vm_template,
        iso_image,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ResourceSpec;

    fn request(kind: DeploymentKind, framework: &str) -> DeploymentRequest {
        DeploymentRequest {
            name: "My App_Name".to_string(),
            kind,
            framework: framework.to_string(),
            repo_url: "https://github.com/acme/demo.git".to_string(),
            resources: ResourceSpec::default(),
            env_vars: None,
        }
    }

    #[test]
    fn sanitize_is_idempotent() {
        for name in ["My App_Name", "demo-app", "Big  Server!!", "X_y z-9"] {
            let once = sanitize_hostname(name);
            assert_eq!(sanitize_hostname(&once), once);
        }
        assert_eq!(sanitize_hostname("My App_Name"), "my-app-name");
        assert_eq!(sanitize_hostname("Big  Server!!"), "big--server");
    }

    #[test]
    fn unknown_framework_is_rejected() {
        let settings = Settings::default();
        let err = generate(&request(DeploymentKind::Lxc, "rails"), 123, &settings, "ssh-rsa k")
            .unwrap_err();
        match err {
            PlatformError::UnsupportedFramework(name) => assert_eq!(name, "rails"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn container_defaults_and_template() {
        let settings = Settings::default();
        let vars = generate(&request(DeploymentKind::Lxc, "flask"), 123, &settings, "ssh-rsa k")
            .unwrap();

        assert_eq!(vars.deployment_name, "my-app-name");
        assert_eq!(vars.cores, 1);
        assert_eq!(vars.memory, 1024);
        assert_eq!(vars.disk_size, 10);
        assert_eq!(vars.framework_port, 5000);
        assert!(vars.os_template.is_some());
        assert!(vars.vm_template.is_none());
        assert_eq!(vars.dns_servers, "8.8.8.8,8.8.4.4");
    }

    #[test]
    fn explicit_resources_override_vm_defaults() {
        let settings = Settings::default();
        let mut req = request(DeploymentKind::Vm, "django");
        req.resources = ResourceSpec {
            cores: Some(4),
            memory_mb: Some(8192),
            disk_gb: None,
        };

        let vars = generate(&req, 456, &settings, "ssh-rsa k").unwrap();
        assert_eq!(vars.cores, 4);
        assert_eq!(vars.memory, 8192);
        assert_eq!(vars.disk_size, 20);
        assert!(vars.vm_template.is_some());
        assert!(vars.iso_image.is_some());
        assert!(vars.os_template.is_none());
    }
}
