//! Application lifecycle

use std::future::Future;

use tokio::sync::oneshot;
use tracing::{error, info};

use crate::app::options::AppOptions;
use crate::app::state::init_state;
use crate::errors::PlatformError;
use crate::server;
use crate::storage::Settings;

/// Run the platform until the shutdown signal resolves.
///
/// The HTTP server is started on a background task and asked to drain
/// once the signal fires. If it does not stop within the configured
/// delay the run fails with a shutdown error.
pub async fn run(
    options: AppOptions,
    settings: Settings,
    shutdown_signal: impl Future<Output = ()>,
) -> Result<(), PlatformError> {
    let state = init_state(&options, settings).await?;

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let server_handle = server::serve(&options.server, state, async {
        let _ = shutdown_rx.await;
    })
    .await?;

    shutdown_signal.await;
    info!("shutdown signal received, draining server");
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(options.lifecycle.max_shutdown_delay, server_handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => {
            error!("server task failed: {join_err}");
            Err(PlatformError::ShutdownError(join_err.to_string()))
        }
        Err(_) => {
            error!("server did not stop within the shutdown delay");
            Err(PlatformError::ShutdownError(
                "server did not stop in time".to_string(),
            ))
        }
    }
}
