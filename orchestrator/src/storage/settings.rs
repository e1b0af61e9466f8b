//! Settings file management

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::logs::LogLevel;

/// Orchestrator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerSettings,

    /// Proxmox cluster configuration
    #[serde(default)]
    pub proxmox: ProxmoxSettings,

    /// Guest network configuration
    #[serde(default)]
    pub network: NetworkSettings,

    /// SSH configuration for reaching guests
    #[serde(default)]
    pub ssh: SshSettings,

    /// Terraform invocation configuration
    #[serde(default)]
    pub terraform: TerraformSettings,

    /// Per-kind resource defaults
    #[serde(default)]
    pub resources: ResourceSettings,

    /// Guest image templates
    #[serde(default)]
    pub templates: TemplateSettings,

    /// Deployable framework catalog, keyed by framework id
    #[serde(default = "default_frameworks")]
    pub frameworks: BTreeMap<String, FrameworkDescriptor>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            server: ServerSettings::default(),
            proxmox: ProxmoxSettings::default(),
            network: NetworkSettings::default(),
            ssh: SshSettings::default(),
            terraform: TerraformSettings::default(),
            resources: ResourceSettings::default(),
            templates: TemplateSettings::default(),
            frameworks: default_frameworks(),
        }
    }
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Bind host
    #[serde(default = "default_server_host")]
    pub host: String,

    /// Bind port
    #[serde(default = "default_server_port")]
    pub port: u16,
}

fn default_server_host() -> String {
    "0.0.0.0".to_string()
}

fn default_server_port() -> u16 {
    5000
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
        }
    }
}

/// Proxmox cluster settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxmoxSettings {
    /// Base URL of the management API, e.g. `https://pve:8006/api2/json`
    #[serde(default = "default_proxmox_url")]
    pub api_url: String,

    /// API user, e.g. `root@pam`
    #[serde(default = "default_proxmox_user")]
    pub user: String,

    /// API password
    #[serde(default)]
    pub password: String,

    /// Target node name
    #[serde(default = "default_proxmox_node")]
    pub node: String,

    /// Storage pool for guest disks
    #[serde(default = "default_proxmox_storage")]
    pub storage: String,

    /// Bridge interface for guest networking
    #[serde(default = "default_network_bridge")]
    pub network_bridge: String,
}

fn default_proxmox_url() -> String {
    "https://192.168.1.100:8006/api2/json".to_string()
}

fn default_proxmox_user() -> String {
    "root@pam".to_string()
}

fn default_proxmox_node() -> String {
    "pve".to_string()
}

fn default_proxmox_storage() -> String {
    "local-lvm".to_string()
}

fn default_network_bridge() -> String {
    "vmbr0".to_string()
}

impl Default for ProxmoxSettings {
    fn default() -> Self {
        Self {
            api_url: default_proxmox_url(),
            user: default_proxmox_user(),
            password: String::new(),
            node: default_proxmox_node(),
            storage: default_proxmox_storage(),
            network_bridge: default_network_bridge(),
        }
    }
}

/// Guest network settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSettings {
    /// Default gateway handed to guests
    #[serde(default = "default_gateway")]
    pub gateway: String,

    /// DNS servers handed to guests
    #[serde(default = "default_dns_servers")]
    pub dns_servers: Vec<String>,
}

fn default_gateway() -> String {
    "192.168.100.1".to_string()
}

fn default_dns_servers() -> Vec<String> {
    vec!["8.8.8.8".to_string(), "8.8.4.4".to_string()]
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            gateway: default_gateway(),
            dns_servers: default_dns_servers(),
        }
    }
}

/// SSH settings for reaching provisioned guests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshSettings {
    /// Login user on the guest
    #[serde(default = "default_ssh_user")]
    pub user: String,

    /// Optional jump host routing SSH into the guest network
    #[serde(default)]
    pub jump_host: Option<JumpHostSettings>,
}

fn default_ssh_user() -> String {
    "root".to_string()
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            user: default_ssh_user(),
            jump_host: None,
        }
    }
}

/// Jump host settings (the hypervisor doubling as an SSH proxy)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JumpHostSettings {
    /// Jump host address
    pub host: String,

    /// Jump host login user
    #[serde(default = "default_ssh_user")]
    pub user: String,

    /// Jump host password
    #[serde(default)]
    pub password: String,
}

/// Terraform invocation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerraformSettings {
    /// Terraform binary to invoke
    #[serde(default = "default_terraform_binary")]
    pub binary: String,
}

fn default_terraform_binary() -> String {
    "terraform".to_string()
}

impl Default for TerraformSettings {
    fn default() -> Self {
        Self {
            binary: default_terraform_binary(),
        }
    }
}

/// Default sizing for one guest kind
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ResourceDefaults {
    pub cores: u32,
    pub memory_mb: u64,
    pub disk_gb: u64,
}

/// Per-kind resource defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceSettings {
    #[serde(default = "default_vm_resources")]
    pub vm: ResourceDefaults,

    #[serde(default = "default_lxc_resources")]
    pub lxc: ResourceDefaults,
}

fn default_vm_resources() -> ResourceDefaults {
    ResourceDefaults {
        cores: 2,
        memory_mb: 2048,
        disk_gb: 20,
    }
}

fn default_lxc_resources() -> ResourceDefaults {
    ResourceDefaults {
        cores: 1,
        memory_mb: 1024,
        disk_gb: 10,
    }
}

impl Default for ResourceSettings {
    fn default() -> Self {
        Self {
            vm: default_vm_resources(),
            lxc: default_lxc_resources(),
        }
    }
}

/// Guest image templates
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateSettings {
    /// Cloud-init template cloned for VMs
    #[serde(default = "default_vm_template")]
    pub vm_template: String,

    /// ISO image attached to VMs
    #[serde(default = "default_vm_iso")]
    pub vm_iso: String,

    /// Container OS template
    #[serde(default = "default_lxc_template")]
    pub lxc_os_template: String,
}

fn default_vm_template() -> String {
    "ubuntu-22-cloudinit".to_string()
}

fn default_vm_iso() -> String {
    "ubuntu-22.04-server-amd64.iso".to_string()
}

fn default_lxc_template() -> String {
    "local:vztmpl/ubuntu-22.04-standard_22.04-1_amd64.tar.zst".to_string()
}

impl Default for TemplateSettings {
    fn default() -> Self {
        Self {
            vm_template: default_vm_template(),
            vm_iso: default_vm_iso(),
            lxc_os_template: default_lxc_template(),
        }
    }
}

/// Language runtime a framework needs on the guest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    Nodejs,
    Php,
}

/// One deployable framework
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameworkDescriptor {
    /// Display name
    pub name: String,

    /// Language runtime
    pub language: Language,

    /// Advertised framework version
    pub version: String,

    /// Port the app listens on once launched
    pub port: u16,

    /// Catalog-advertised install command
    pub install_cmd: String,
}

/// The built-in framework catalog
pub fn default_frameworks() -> BTreeMap<String, FrameworkDescriptor> {
    let mut frameworks = BTreeMap::new();

    frameworks.insert(
        "django".to_string(),
        FrameworkDescriptor {
            name: "Django".to_string(),
            language: Language::Python,
            version: "4.2".to_string(),
            port: 8000,
            install_cmd: "pip install django gunicorn".to_string(),
        },
    );
    frameworks.insert(
        "laravel".to_string(),
        FrameworkDescriptor {
            name: "Laravel".to_string(),
            language: Language::Php,
            version: "10.x".to_string(),
            port: 8000,
            install_cmd: "composer global require laravel/installer".to_string(),
        },
    );
    frameworks.insert(
        "express".to_string(),
        FrameworkDescriptor {
            name: "Express.js".to_string(),
            language: Language::Nodejs,
            version: "18.x".to_string(),
            port: 3000,
            install_cmd: "npm install express".to_string(),
        },
    );
    frameworks.insert(
        "flask".to_string(),
        FrameworkDescriptor {
            name: "Flask".to_string(),
            language: Language::Python,
            version: "3.0".to_string(),
            port: 5000,
            install_cmd: "pip install flask gunicorn".to_string(),
        },
    );
    frameworks.insert(
        "fastapi".to_string(),
        FrameworkDescriptor {
            name: "FastAPI".to_string(),
            language: Language::Python,
            version: "0.104".to_string(),
            port: 8000,
            install_cmd: "pip install fastapi uvicorn".to_string(),
        },
    );
    frameworks.insert(
        "react".to_string(),
        FrameworkDescriptor {
            name: "React".to_string(),
            language: Language::Nodejs,
            version: "18.x".to_string(),
            port: 3000,
            install_cmd: "npx create-react-app".to_string(),
        },
    );
    frameworks.insert(
        "vuejs".to_string(),
        FrameworkDescriptor {
            name: "Vue.js".to_string(),
            language: Language::Nodejs,
            version: "3.x".to_string(),
            port: 8080,
            install_cmd: "npm install -g @vue/cli".to_string(),
        },
    );
    frameworks.insert(
        "nextjs".to_string(),
        FrameworkDescriptor {
            name: "Next.js".to_string(),
            language: Language::Nodejs,
            version: "14.x".to_string(),
            port: 3000,
            install_cmd: "npx create-next-app@latest".to_string(),
        },
    );

    frameworks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_catalog_has_eight_frameworks() {
        let frameworks = default_frameworks();
        assert_eq!(frameworks.len(), 8);
        assert_eq!(frameworks["flask"].port, 5000);
        assert_eq!(frameworks["flask"].language, Language::Python);
        assert_eq!(frameworks["vuejs"].port, 8080);
        assert_eq!(frameworks["laravel"].language, Language::Php);
    }

    #[test]
    fn settings_round_trip_with_defaults() {
        let parsed: Settings = serde_json::from_str("{}").unwrap();
        assert_eq!(parsed.server.port, 5000);
        assert_eq!(parsed.resources.vm.cores, 2);
        assert_eq!(parsed.resources.lxc.memory_mb, 1024);
        assert!(parsed.ssh.jump_host.is_none());
        assert_eq!(parsed.frameworks.len(), 8);
    }
}
