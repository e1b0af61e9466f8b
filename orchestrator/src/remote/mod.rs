//! Remote application deployment over SSH

pub mod commands;
pub mod ssh;

use async_trait::async_trait;

use crate::errors::PlatformError;

pub use ssh::{ConnectOptions, JumpHost, SshExecutor};

/// Seam for running a command sequence on a provisioned guest
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run the commands in order, aborting at the first failure
    async fn connect_and_run(
        &self,
        address: &str,
        commands: &[String],
        options: &ConnectOptions,
    ) -> Result<(), PlatformError>;
}
