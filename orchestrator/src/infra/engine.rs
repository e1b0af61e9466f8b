//! Terraform apply/destroy engine

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{info, warn};

use crate::errors::{ApplyStage, PlatformError};
use crate::infra::config::TfVars;
use crate::storage::StorageLayout;

/// Output sentinels meaning terraform does not know the address yet
const ADDRESS_SENTINELS: [&str; 3] = [
    "Check Proxmox Console",
    "pending",
    "Pending (Check Dashboard)",
];

/// Captured result of one terraform invocation
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// stderr, falling back to stdout when stderr is empty
    pub fn detail(&self) -> String {
        if self.stderr.trim().is_empty() {
            self.stdout.clone()
        } else {
            self.stderr.clone()
        }
    }
}

/// Seam over the terraform binary; tests script exit codes and output
#[async_trait]
pub trait TerraformExec: Send + Sync {
    async fn run(&self, args: &[&str]) -> Result<ExecOutput, PlatformError>;
}

/// Real terraform invocation in the configured working directory
pub struct TerraformCli {
    binary: String,
    working_dir: std::path::PathBuf,
}

impl TerraformCli {
    pub fn new(binary: impl Into<String>, working_dir: impl Into<std::path::PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            working_dir: working_dir.into(),
        }
    }
}

#[async_trait]
impl TerraformExec for TerraformCli {
    async fn run(&self, args: &[&str]) -> Result<ExecOutput, PlatformError> {
        let output = Command::new(&self.binary)
            .args(args)
            .current_dir(&self.working_dir)
            .output()
            .await?;

        Ok(ExecOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

/// Result of a successful apply
#[derive(Debug, Clone)]
pub struct AppliedInfra {
    pub vm_id: u32,

    /// None when terraform only reported a placeholder; the caller must
    /// resolve the address through the hypervisor instead.
    pub ip_address: Option<String>,
}

/// Seam for infrastructure creation and destruction
#[async_trait]
pub trait InfraEngine: Send + Sync {
    async fn apply(&self, name: &str, vars: &TfVars) -> Result<AppliedInfra, PlatformError>;
    async fn destroy(&self, name: &str) -> Result<(), PlatformError>;
}

/// Name-keyed async locks, one per terraform workspace
#[derive(Default)]
struct WorkspaceLocks {
    locks: std::sync::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl WorkspaceLocks {
    fn acquire(&self, name: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap();
        locks.entry(name.to_string()).or_default().clone()
    }
}

/// Workspace-per-deployment terraform engine.
///
/// Every apply and destroy for a given deployment runs under that
/// deployment's workspace lock, so concurrent operations on the same
/// workspace cannot interleave terraform commands.
pub struct TerraformEngine {
    exec: Arc<dyn TerraformExec>,
    layout: StorageLayout,
    locks: WorkspaceLocks,
}

impl TerraformEngine {
    pub fn new(exec: Arc<dyn TerraformExec>, layout: StorageLayout) -> Self {
        Self {
            exec,
            layout,
            locks: WorkspaceLocks::default(),
        }
    }

    /// Path of the workspace tfvars file relative to the terraform dir
    fn var_file_arg(name: &str) -> String {
        format!("-var-file=states/{}/terraform.tfvars.json", name)
    }

    async fn select_or_create_workspace(&self, name: &str) -> Result<(), PlatformError> {
        let list = self.exec.run(&["workspace", "list"]).await?;
        if !list.success() {
            return Err(PlatformError::ApplyFailed {
                stage: ApplyStage::Workspace,
                output: list.detail(),
            });
        }

        let exists = list
            .stdout
            .lines()
            .any(|line| line.trim_start_matches('*').trim() == name);

        let result = if exists {
            info!("selecting terraform workspace {}", name);
            self.exec.run(&["workspace", "select", name]).await?
        } else {
            info!("creating terraform workspace {}", name);
            self.exec.run(&["workspace", "new", name]).await?
        };

        if !result.success() {
            return Err(PlatformError::ApplyFailed {
                stage: ApplyStage::Workspace,
                output: result.detail(),
            });
        }
        Ok(())
    }

    /// Run plan, recovering once from state drift.
    ///
    /// Exit code 1 with a "vm ... not found" stderr means the guest was
    /// removed behind terraform's back; dropping the resource from state
    /// and re-planning recreates it. Any other failure, or a second
    /// failure after the state fix, is fatal.
    async fn plan_with_drift_recovery(
        &self,
        name: &str,
        vars: &TfVars,
    ) -> Result<(), PlatformError> {
        let var_file = Self::var_file_arg(name);
        let plan_args = ["plan", "-input=false", "-detailed-exitcode", var_file.as_str()];

        let first = self.exec.run(&plan_args).await?;
        if first.exit_code == 0 || first.exit_code == 2 {
            return Ok(());
        }

        let stderr = first.stderr.to_lowercase();
        let drift = stderr.contains("vm") && stderr.contains("not found");
        if !drift {
            return Err(PlatformError::ApplyFailed {
                stage: ApplyStage::Plan,
                output: first.detail(),
            });
        }

        warn!(
            "state drift detected for {}, removing stale resource from state",
            name
        );
        let resource = if vars.deployment_type == "lxc" {
            "proxmox_lxc.deployment_lxc[0]"
        } else {
            "proxmox_vm_qemu.deployment_vm[0]"
        };
        // Best effort: if the address is already gone, the retry decides.
        let _ = self.exec.run(&["state", "rm", resource]).await?;

        let second = self.exec.run(&plan_args).await?;
        if second.exit_code == 0 || second.exit_code == 2 {
            return Ok(());
        }
        Err(PlatformError::ApplyFailed {
            stage: ApplyStage::Plan,
            output: second.detail(),
        })
    }

    fn parse_outputs(stdout: &str, fallback_vm_id: u32) -> AppliedInfra {
        let outputs: serde_json::Value = serde_json::from_str(stdout).unwrap_or_default();

        let vm_id = outputs
            .get("vm_id")
            .and_then(|o| o.get("value"))
            .and_then(|v| {
                v.as_u64()
                    .map(|n| n as u32)
                    .or_else(|| v.as_str().and_then(|s| s.parse().ok()))
            })
            .unwrap_or(fallback_vm_id);

        let ip_address = outputs
            .get("ip_address")
            .and_then(|o| o.get("value"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .filter(|ip| !ip.is_empty() && !ADDRESS_SENTINELS.contains(&ip.as_str()));

        AppliedInfra { vm_id, ip_address }
    }
}

#[async_trait]
impl InfraEngine for TerraformEngine {
    async fn apply(&self, name: &str, vars: &TfVars) -> Result<AppliedInfra, PlatformError> {
        let lock = self.locks.acquire(name);
        let _guard = lock.lock().await;

        info!("applying infrastructure for {}", name);

        let init = self.exec.run(&["init", "-input=false"]).await?;
        if !init.success() {
            return Err(PlatformError::ApplyFailed {
                stage: ApplyStage::Init,
                output: init.detail(),
            });
        }

        self.select_or_create_workspace(name).await?;

        let state_dir = self.layout.workspace_state_dir(name);
        state_dir.create().await?;
        state_dir.file("terraform.tfvars.json").write_json(vars).await?;

        self.plan_with_drift_recovery(name, vars).await?;

        let var_file = Self::var_file_arg(name);
        let apply = self
            .exec
            .run(&["apply", "-input=false", "-auto-approve", var_file.as_str()])
            .await?;
        if !apply.success() {
            return Err(PlatformError::ApplyFailed {
                stage: ApplyStage::Apply,
                output: apply.detail(),
            });
        }

        let output = self.exec.run(&["output", "-json"]).await?;
        if !output.success() {
            return Err(PlatformError::ApplyFailed {
                stage: ApplyStage::Output,
                output: output.detail(),
            });
        }

        let applied = Self::parse_outputs(&output.stdout, vars.vm_id);
        info!(
            "infrastructure applied for {} (vm_id {}, address {:?})",
            name, applied.vm_id, applied.ip_address
        );
        Ok(applied)
    }

    async fn destroy(&self, name: &str) -> Result<(), PlatformError> {
        let lock = self.locks.acquire(name);
        let _guard = lock.lock().await;

        info!("destroying infrastructure for {}", name);

        let state_dir = self.layout.workspace_state_dir(name);
        if !state_dir.file("terraform.tfvars.json").exists().await {
            return Err(PlatformError::NoStateFound(name.to_string()));
        }

        let select = self.exec.run(&["workspace", "select", name]).await?;
        if !select.success() {
            return Err(PlatformError::DestroyFailed(select.detail()));
        }

        let var_file = Self::var_file_arg(name);
        let destroy = self
            .exec
            .run(&["destroy", var_file.as_str(), "-auto-approve"])
            .await?;
        if !destroy.success() {
            return Err(PlatformError::DestroyFailed(destroy.detail()));
        }

        // Workspace teardown after a successful destroy is best effort
        if let Err(err) = async {
            self.exec.run(&["workspace", "select", "default"]).await?;
            self.exec.run(&["workspace", "delete", name]).await?;
            Ok::<_, PlatformError>(())
        }
        .await
        {
            warn!("workspace cleanup for {} failed: {}", name, err);
        }
        if let Err(err) = state_dir.delete().await {
            warn!("state directory cleanup for {} failed: {}", name, err);
        }

        info!("infrastructure destroyed for {}", name);
        Ok(())
    }
}
