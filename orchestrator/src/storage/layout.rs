//! Storage layout configuration

use std::path::PathBuf;

use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// Storage layout for the orchestrator
#[derive(Debug, Clone)]
pub struct StorageLayout {
    /// Base directory for all storage
    pub base_dir: PathBuf,
}

impl StorageLayout {
    /// Create a new storage layout
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Get the settings file path
    pub fn settings_file(&self) -> File {
        File::new(self.base_dir.join("settings.json"))
    }

    /// Get the deployment records file path
    pub fn deployments_file(&self) -> File {
        File::new(self.base_dir.join("deployments.json"))
    }

    /// Get the managed SSH key directory
    pub fn ssh_keys_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("ssh_keys"))
    }

    /// Get the managed SSH private key path
    pub fn ssh_private_key(&self) -> File {
        self.ssh_keys_dir().file("id_rsa")
    }

    /// Get the managed SSH public key path
    pub fn ssh_public_key(&self) -> File {
        self.ssh_keys_dir().file("id_rsa.pub")
    }

    /// Get the terraform configuration directory
    pub fn terraform_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("terraform"))
    }

    /// Get the per-workspace terraform state directory
    pub fn terraform_states_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("terraform").join("states"))
    }

    /// Get the state directory for a single deployment workspace
    pub fn workspace_state_dir(&self, name: &str) -> Dir {
        self.terraform_states_dir().subdir(name)
    }

    /// Get the logs directory
    pub fn logs_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("logs"))
    }

    /// Setup the storage layout (create directories)
    pub async fn setup(&self) -> Result<(), crate::errors::PlatformError> {
        self.ssh_keys_dir().create().await?;
        self.terraform_states_dir().create().await?;
        self.logs_dir().create().await?;
        Ok(())
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        // Use /etc/skiff on Linux, or user home directory on other platforms
        #[cfg(target_os = "linux")]
        let base_dir = PathBuf::from("/etc/skiff");

        #[cfg(not(target_os = "linux"))]
        let base_dir = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".skiff");

        Self::new(base_dir)
    }
}

// Add dirs crate functionality inline for cross-platform support
#[cfg(not(target_os = "linux"))]
mod dirs {
    use std::path::PathBuf;

    pub fn home_dir() -> Option<PathBuf> {
        std::env::var_os("HOME")
            .or_else(|| std::env::var_os("USERPROFILE"))
            .map(PathBuf::from)
    }
}
