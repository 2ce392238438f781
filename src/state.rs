use std::{path::PathBuf, sync::Arc};

use axum::{body::BoxBody, http::Response};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::{
  config::Config,
  delivery::{deliver, DeliveryOptions},
  producer::{Ffmpeg, Producer, Ytdlp},
  selection::Selection,
  util::ByteRange,
  workspace::WorkspaceManager,
  Error, Result,
};

#[derive(Clone)]
pub struct AppState {
  pub config: Arc<Config>,
  pub workspaces: WorkspaceManager,
  pub ytdlp: Ytdlp,
  pub ffmpeg: Ffmpeg,
  pub http: reqwest::Client,
  admission: Arc<Semaphore>,
  pub cookies_loaded: bool,
}

impl AppState {
  pub fn new(
    config: Config,
    workspaces: WorkspaceManager,
    cookie_file: Option<PathBuf>,
  ) -> Self {
    Self {
      ytdlp: Ytdlp::new(&config, cookie_file.clone()),
      ffmpeg: Ffmpeg::new(&config),
      http: reqwest::Client::new(),
      admission: Arc::new(Semaphore::new(config.producer_concurrency)),
      cookies_loaded: cookie_file.is_some(),
      config: Arc::new(config),
      workspaces,
    }
  }

  // Wait for a free producer slot.
  pub async fn admit(&self) -> Result<OwnedSemaphorePermit> {
    self
      .admission
      .clone()
      .acquire_owned()
      .await
      .map_err(|_| Error::ShuttingDown)
  }

  pub fn close(&self) {
    self.admission.close();
  }

  // Take a producer slot, allocate a workspace, produce the artifact into it
  // and start delivering. Once allocated, the workspace ends up scheduled for
  // reclaim whatever the outcome.
  pub async fn serve(
    &self,
    producer: &dyn Producer,
    source: &str,
    selection: &Selection,
    range: Option<ByteRange>,
  ) -> Result<Response<BoxBody>> {
    let permit = self.admit().await?;
    let workspace = self.workspaces.allocate().await?;

    let artifact = producer.produce(source, selection, &workspace).await;
    drop(permit);

    let opts = DeliveryOptions {
      chunk_size: self.config.chunk_size,
      range,
      http: &self.http,
    };
    deliver(artifact?, workspace, &opts).await
  }
}
