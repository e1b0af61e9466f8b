//! Managed SSH keypair

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::info;

use crate::errors::PlatformError;
use crate::storage::StorageLayout;

/// Key material handed to provisioning and remote execution
#[derive(Debug, Clone)]
pub struct SshKeyMaterial {
    /// Path to the private key on disk
    pub private_key_path: PathBuf,

    /// Public key line, as placed in authorized_keys
    pub public_key: String,
}

/// Seam for obtaining the deployment key material
#[async_trait]
pub trait KeyProvider: Send + Sync {
    async fn ensure_keypair(&self) -> Result<SshKeyMaterial, PlatformError>;
}

/// Keypair stored under the layout's `ssh_keys/` directory.
///
/// If either half is missing the pair is regenerated as a whole; a
/// private key without its public half is useless for provisioning.
pub struct ManagedKeypair {
    layout: StorageLayout,
}

impl ManagedKeypair {
    pub fn new(layout: StorageLayout) -> Self {
        Self { layout }
    }

    async fn generate(&self) -> Result<(), PlatformError> {
        let private = self.layout.ssh_private_key();
        let public = self.layout.ssh_public_key();

        self.layout.ssh_keys_dir().create().await?;
        private.delete().await?;
        public.delete().await?;

        info!("generating deployment SSH keypair at {:?}", private.path());

        let output = Command::new("ssh-keygen")
            .arg("-t")
            .arg("rsa")
            .arg("-b")
            .arg("2048")
            .arg("-N")
            .arg("")
            .arg("-q")
            .arg("-f")
            .arg(private.path())
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            return Err(PlatformError::ConfigError(format!(
                "ssh-keygen failed: {}",
                stderr
            )));
        }

        private.set_permissions_600().await?;
        Ok(())
    }
}

#[async_trait]
impl KeyProvider for ManagedKeypair {
    async fn ensure_keypair(&self) -> Result<SshKeyMaterial, PlatformError> {
        let private = self.layout.ssh_private_key();
        let public = self.layout.ssh_public_key();

        if !private.exists().await || !public.exists().await {
            self.generate().await?;
        }

        let public_key = public.read_string().await?.trim().to_string();

        Ok(SshKeyMaterial {
            private_key_path: private.path().to_path_buf(),
            public_key,
        })
    }
}
