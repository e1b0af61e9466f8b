//! HTTP server setup

use std::future::Future;
use std::sync::Arc;

use axum::{
    routing::{delete, get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::app::options::ServerOptions;
use crate::errors::PlatformError;
use crate::server::handlers::{
    cluster_resources_handler, cluster_sync_handler, delete_deployment_handler, deploy_handler,
    frameworks_handler, get_deployment_handler, health_handler, list_deployments_handler,
    stats_handler, version_handler,
};
use crate::server::state::ServerState;

/// Start the HTTP server
pub async fn serve(
    options: &ServerOptions,
    state: Arc<ServerState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<JoinHandle<Result<(), PlatformError>>, PlatformError> {
    let app = Router::new()
        // Health and version
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        // Catalog
        .route("/frameworks", get(frameworks_handler))
        // Deployments
        .route("/deploy", post(deploy_handler))
        .route("/deployments", get(list_deployments_handler))
        .route("/deployments/{id}", get(get_deployment_handler))
        .route("/deployments/{id}", delete(delete_deployment_handler))
        // Statistics
        .route("/stats", get(stats_handler))
        // Cluster
        .route("/cluster/resources", get(cluster_resources_handler))
        .route("/cluster/sync", post(cluster_sync_handler))
        // State and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = format!("{}:{}", options.host, options.port);
    info!("Starting HTTP server on {}", addr);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| PlatformError::ServerError(e.to_string()))?;

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| PlatformError::ServerError(e.to_string()))
    });

    Ok(handle)
}
