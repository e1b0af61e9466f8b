//! Error types for the skiffd platform

use thiserror::Error;

/// Stage of the Terraform lifecycle an apply failed in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyStage {
    Init,
    Workspace,
    Plan,
    Apply,
    Output,
}

impl std::fmt::Display for ApplyStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ApplyStage::Init => "init",
            ApplyStage::Workspace => "workspace",
            ApplyStage::Plan => "plan",
            ApplyStage::Apply => "apply",
            ApplyStage::Output => "output",
        };
        f.write_str(s)
    }
}

/// Main error type for the skiffd platform
#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("SSH error: {0}")]
    SshError(#[from] ssh2::Error),

    #[error("no free infrastructure IDs in range 100-999")]
    AllocationExhausted,

    #[error("unsupported framework: {0}")]
    UnsupportedFramework(String),

    #[error("terraform {stage} failed: {output}")]
    ApplyFailed { stage: ApplyStage, output: String },

    #[error("terraform destroy failed: {0}")]
    DestroyFailed(String),

    #[error("no terraform state found for deployment '{0}'")]
    NoStateFound(String),

    #[error("could not resolve address for instance {vm_id} after {attempts} attempts")]
    AddressUnresolved { vm_id: u32, attempts: u32 },

    #[error("SSH connection failed: {0}")]
    ConnectionFailed(String),

    #[error("remote command {index} exited with status {exit_code}: {stderr}")]
    CommandFailed {
        index: usize,
        exit_code: i32,
        stderr: String,
    },

    #[error("invalid status transition: {0}")]
    TransitionError(String),

    #[error("Proxmox API error: {0}")]
    ProxmoxError(String),

    #[error("storage error: {0}")]
    StorageError(String),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("server error: {0}")]
    ServerError(String),

    #[error("shutdown error: {0}")]
    ShutdownError(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for PlatformError {
    fn from(err: anyhow::Error) -> Self {
        PlatformError::Internal(err.to_string())
    }
}
