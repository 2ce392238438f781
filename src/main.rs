use std::time::Duration;

use anyhow::anyhow;
use axum::{routing::get, Router};
use tokio_graceful_shutdown::{SubsystemBuilder, SubsystemHandle, Toplevel};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;
mod cookies;
mod delivery;
mod error;
mod handler;
mod janitor;
mod media;
mod producer;
mod selection;
mod state;
mod util;
mod workspace;
mod workspace_store;

pub use error::{Error, Result};

use config::Config;
use janitor::Janitor;
use state::AppState;
use workspace::WorkspaceManager;
use workspace_store::WorkspaceStore;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("media_relay=info")),
    )
    .init();

  let config = Config::from_env()?;

  let store = WorkspaceStore::open(
    &config.workspace_root,
    config.workspace_capacity,
    config.reclaim_delay,
  )
  .await?
  .spawn();

  let cookie_file =
    cookies::install(config.cookies.as_deref(), &config.workspace_root);
  let workspaces = WorkspaceManager::new(
    &config.workspace_root,
    store.clone(),
    config.reclaim_delay,
  );
  let janitor = Janitor::new(store, config.sweep_interval);
  let state = AppState::new(config, workspaces, cookie_file);

  Toplevel::new(|s| async move {
    s.start(SubsystemBuilder::new("janitor", |subsys| janitor.run(subsys)));
    s.start(SubsystemBuilder::new("http", |subsys| serve(state, subsys)));
  })
  .catch_signals()
  .handle_shutdown_requests(SHUTDOWN_TIMEOUT)
  .await
  .map_err(|e| anyhow!("shutdown failed: {e}"))
}

fn router(state: AppState) -> Router {
  Router::new()
    .route("/", get(handler::status))
    .route("/health", get(handler::health))
    .route("/info", get(handler::info))
    .route("/formats", get(handler::formats))
    .route("/search", get(handler::search))
    .route("/download", get(handler::download))
    .route("/download-audio", get(handler::download_audio))
    .route("/stream", get(handler::stream))
    .with_state(state)
}

async fn serve(state: AppState, subsys: SubsystemHandle) -> Result<()> {
  let addr = state.config.listen_addr;
  let app = router(state.clone());

  info!("listening on {}", addr);
  axum::Server::try_bind(&addr)
    .map_err(|e| Error::Server(Box::new(e)))?
    .serve(app.into_make_service())
    .with_graceful_shutdown(subsys.on_shutdown_requested())
    .await
    .map_err(|e| Error::Server(Box::new(e)))?;

  // requests still waiting for a producer slot give up
  state.close();
  info!("server stopped");
  Ok(())
}
