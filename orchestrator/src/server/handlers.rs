//! HTTP request handlers

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::{info, warn};

use crate::deploy::SyncReport;
use crate::errors::PlatformError;
use crate::models::{Deployment, DeploymentRequest, DeploymentStatus};
use crate::server::state::ServerState;
use crate::server::validate::validate_request;
use crate::storage::settings::FrameworkDescriptor;
use crate::utils::version_info;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "skiffd".to_string(),
        version: version.version,
    })
}

/// Version response
#[derive(Debug, Serialize)]
pub struct VersionResponse {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    let version = version_info();
    Json(VersionResponse {
        version: version.version,
        git_hash: version.git_hash,
        build_time: version.build_time,
    })
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    success: bool,
    error: String,
}

fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            success: false,
            error: error.into(),
        }),
    )
        .into_response()
}

fn internal_error(err: PlatformError) -> Response {
    error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}

/// Frameworks response
#[derive(Debug, Serialize)]
pub struct FrameworksResponse {
    pub success: bool,
    pub frameworks: BTreeMap<String, FrameworkDescriptor>,
}

/// Framework catalog handler
pub async fn frameworks_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    Json(FrameworksResponse {
        success: true,
        frameworks: state.settings.frameworks.clone(),
    })
}

/// A deployment as returned by the API
#[derive(Debug, Serialize)]
pub struct DeploymentView {
    #[serde(flatten)]
    pub deployment: Deployment,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_url: Option<String>,
}

impl DeploymentView {
    fn build(deployment: Deployment, state: &ServerState) -> Self {
        let access_url = state
            .settings
            .frameworks
            .get(&deployment.framework)
            .and_then(|descriptor| deployment.access_url(descriptor.port));
        Self {
            deployment,
            access_url,
        }
    }
}

/// Validation failure response
#[derive(Debug, Serialize)]
pub struct ValidationResponse {
    pub success: bool,
    pub errors: Vec<String>,
}

/// Deploy success response
#[derive(Debug, Serialize)]
pub struct DeployResponse {
    pub success: bool,
    pub message: String,
    pub deployment: DeploymentView,
}

/// Deployment creation handler.
///
/// The whole flow runs within this request; provisioning and remote
/// setup take minutes, and the response reports the final outcome.
pub async fn deploy_handler(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<DeploymentRequest>,
) -> Response {
    let errors = validate_request(&request, &state.settings.frameworks);
    if !errors.is_empty() {
        warn!("deployment request rejected: {:?}", errors);
        return (
            StatusCode::BAD_REQUEST,
            Json(ValidationResponse {
                success: false,
                errors,
            }),
        )
            .into_response();
    }

    info!(
        "deployment request accepted: {} ({} on {})",
        request.name, request.framework, request.kind
    );

    match state.orchestrator.deploy(request).await {
        Ok(deployment) => Json(DeployResponse {
            success: true,
            message: "Application deployed successfully".to_string(),
            deployment: DeploymentView::build(deployment, &state),
        })
        .into_response(),
        Err(err) => internal_error(err),
    }
}

/// Deployment list response
#[derive(Debug, Serialize)]
pub struct DeploymentListResponse {
    pub success: bool,
    pub deployments: Vec<DeploymentView>,
}

/// Deployment list handler
pub async fn list_deployments_handler(State(state): State<Arc<ServerState>>) -> Response {
    match state.store.list().await {
        Ok(deployments) => Json(DeploymentListResponse {
            success: true,
            deployments: deployments
                .into_iter()
                .map(|d| DeploymentView::build(d, &state))
                .collect(),
        })
        .into_response(),
        Err(err) => internal_error(err),
    }
}

/// Single deployment response
#[derive(Debug, Serialize)]
pub struct DeploymentResponse {
    pub success: bool,
    pub deployment: DeploymentView,
}

/// Single deployment handler
pub async fn get_deployment_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Response {
    match state.store.get(&id).await {
        Ok(Some(deployment)) => Json(DeploymentResponse {
            success: true,
            deployment: DeploymentView::build(deployment, &state),
        })
        .into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, "Deployment not found"),
        Err(err) => internal_error(err),
    }
}

/// Deletion response
#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub success: bool,
    pub message: String,
}

/// Deployment deletion handler
pub async fn delete_deployment_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Response {
    match state.orchestrator.delete(&id).await {
        Ok(_) => Json(DeleteResponse {
            success: true,
            message: "Deployment deleted successfully".to_string(),
        })
        .into_response(),
        Err(PlatformError::NotFound(message)) => {
            error_response(StatusCode::NOT_FOUND, message)
        }
        Err(err) => internal_error(err),
    }
}

/// Platform statistics
#[derive(Debug, Serialize)]
pub struct Stats {
    pub total_deployments: usize,
    pub running_deployments: usize,
    pub failed_deployments: usize,
    pub success_rate: f64,
}

/// Statistics response
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub success: bool,
    pub stats: Stats,
}

/// Statistics handler
pub async fn stats_handler(State(state): State<Arc<ServerState>>) -> Response {
    let result = async {
        let total = state.store.list().await?.len();
        let running = state.store.count_by_status(DeploymentStatus::Running).await?;
        let failed = state.store.count_by_status(DeploymentStatus::Failed).await?;
        Ok::<_, PlatformError>(Stats {
            total_deployments: total,
            running_deployments: running,
            failed_deployments: failed,
            success_rate: if total > 0 {
                running as f64 / total as f64 * 100.0
            } else {
                0.0
            },
        })
    }
    .await;

    match result {
        Ok(stats) => Json(StatsResponse {
            success: true,
            stats,
        })
        .into_response(),
        Err(err) => internal_error(err),
    }
}

/// One cluster resource row
#[derive(Debug, Serialize)]
pub struct ClusterResource {
    pub vmid: u32,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub status: String,
    pub cpu: f64,
    /// MB
    pub memory: u64,
    /// GB
    pub disk: u64,
    pub uptime: u64,
}

/// Cluster resources response
#[derive(Debug, Serialize)]
pub struct ClusterResourcesResponse {
    pub success: bool,
    pub resources: Vec<ClusterResource>,
    pub count: usize,
}

/// Cluster inventory handler
pub async fn cluster_resources_handler(State(state): State<Arc<ServerState>>) -> Response {
    match state.inventory.list_instances().await {
        Ok(instances) => {
            let resources: Vec<ClusterResource> = instances
                .into_iter()
                .map(|i| ClusterResource {
                    name: i
                        .name
                        .clone()
                        .unwrap_or_else(|| format!("{}-{}", i.kind, i.vmid)),
                    vmid: i.vmid,
                    kind: i.kind.as_str().to_string(),
                    status: i.status,
                    cpu: i.cpus.unwrap_or(0.0),
                    memory: i.max_memory_bytes.unwrap_or(0) / (1024 * 1024),
                    disk: i.max_disk_bytes.unwrap_or(0) / (1024 * 1024 * 1024),
                    uptime: i.uptime_secs.unwrap_or(0),
                })
                .collect();
            let count = resources.len();
            Json(ClusterResourcesResponse {
                success: true,
                resources,
                count,
            })
            .into_response()
        }
        Err(err) => internal_error(err),
    }
}

/// Cluster sync response
#[derive(Debug, Serialize)]
pub struct ClusterSyncResponse {
    pub success: bool,
    pub imported: usize,
    pub skipped: usize,
    pub report: SyncReport,
}

/// Cluster sync handler
pub async fn cluster_sync_handler(State(state): State<Arc<ServerState>>) -> Response {
    match state.orchestrator.sync_cluster().await {
        Ok(report) => Json(ClusterSyncResponse {
            success: true,
            imported: report.imported.len(),
            skipped: report.skipped.len(),
            report,
        })
        .into_response(),
        Err(err) => internal_error(err),
    }
}
