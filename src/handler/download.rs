use axum::{
  body::BoxBody,
  extract::{Query, State},
  http::Response,
};
use serde::Deserialize;
use tracing::info;

use crate::{
  producer::YtdlpFile,
  selection::{AudioCodec, Selection},
  state::AppState,
  Result,
};

use super::required;

#[derive(Debug, Deserialize)]
pub struct DownloadReq {
  url: Option<String>,
  #[serde(alias = "q", alias = "height")]
  quality: Option<String>,
  format_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AudioReq {
  url: Option<String>,
  quality: Option<String>,
  audio_format: Option<String>,
  format_id: Option<String>,
}

pub async fn download(
  State(state): State<AppState>,
  Query(req): Query<DownloadReq>,
) -> Result<Response<BoxBody>> {
  let url = required(&req.url, "url")?;
  let selection =
    Selection::video(req.quality.as_deref(), req.format_id.as_deref())?;

  info!("download {} with {}", url, selection.format_selector());
  let producer = YtdlpFile::video(state.ytdlp.clone());
  state.serve(&producer, url, &selection, None).await
}

pub async fn download_audio(
  State(state): State<AppState>,
  Query(req): Query<AudioReq>,
) -> Result<Response<BoxBody>> {
  let url = required(&req.url, "url")?;
  let selection =
    Selection::audio(req.quality.as_deref(), req.format_id.as_deref())?;
  let codec = AudioCodec::parse(req.audio_format.as_deref())?;

  info!("download {} as {}", url, codec);
  let producer = YtdlpFile::audio(state.ytdlp.clone(), codec);
  state.serve(&producer, url, &selection, None).await
}
