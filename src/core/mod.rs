use std::{future::Future, path::Path, sync::Arc};

use anyhow::Context;
use log::{info, warn};
use tokio::{
    net::UnixListener,
    signal::unix::{signal, SignalKind},
};

mod api;
mod cmd;
mod error;
mod metas;
mod msg;
mod network;

pub use api::router;
pub use cmd::*;
pub use error::{DriverError, DriverResult};
pub use metas::{PersistenceGateway, Snapshot, DATASTORE_FILE};
pub use msg::*;
pub use network::*;

async fn run_daemon(args: DaemonArgs) -> anyhow::Result<()> {
    let store = PersistenceGateway::in_dir(&args.dir_path);
    store.init().await?;

    let endpoints = EndpointController::new(
        Arc::new(TapProvisioner::new()),
        Arc::new(VdePlugAttacher::new(&args.vde_plug)),
    )
    .with_timeout(args.call_timeout);

    let driver = Arc::new(Driver::bootstrap(store, endpoints, args.clean).await);

    serve(driver, &args.socket, shutdown_signal()).await
}

/// Serve the plugin API on `socket` until `shutdown` resolves.
///
/// A socket file left behind by an earlier run is replaced, and the socket
/// file is removed again on the way out.
pub async fn serve(
    driver: Arc<Driver>,
    socket: &Path,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    // Delete the old socket file
    match tokio::fs::remove_file(socket).await {
        Ok(()) => info!("Removed stale socket {}", socket.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e).context(format!("Failed to remove {}", socket.display())),
    }
    if let Some(dir) = socket.parent() {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }

    let listener = UnixListener::bind(socket)
        .with_context(|| format!("Failed to bind {}", socket.display()))?;

    info!("[Daemon]: Driver is running and listening on {}", socket.display());

    let res = axum::serve(listener, router(driver))
        .with_graceful_shutdown(shutdown)
        .await;

    info!("[Daemon]: Driver is exiting");
    if let Err(e) = tokio::fs::remove_file(socket).await {
        warn!("Failed to remove socket {}: {e}", socket.display());
    }

    res.context("Plugin API server failed")
}

async fn shutdown_signal() {
    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(terminate) => terminate,
        Err(e) => {
            warn!("Failed to install SIGTERM handler: {e}");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
        _ = terminate.recv() => info!("Terminated"),
    }
}

pub fn daemon(args: DaemonArgs) -> anyhow::Result<()> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build the runtime")?
        .block_on(run_daemon(args))
}
