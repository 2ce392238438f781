use axum::{
  body::BoxBody,
  extract::{Query, State},
  http::{HeaderMap, Response},
};
use serde::Deserialize;
use tracing::info;

use crate::{
  producer::StreamProducer, selection::MediaType, state::AppState,
  util::ByteRange, Result,
};

use super::{flag, required};

#[derive(Debug, Deserialize)]
pub struct StreamReq {
  url: Option<String>,
  quality: Option<String>,
  #[serde(rename = "type", alias = "media_type")]
  media_type: Option<String>,
  transcode: Option<String>,
}

pub async fn stream(
  State(state): State<AppState>,
  Query(req): Query<StreamReq>,
  headers: HeaderMap,
) -> Result<Response<BoxBody>> {
  let url = required(&req.url, "url")?;
  let media = MediaType::parse(req.media_type.as_deref())?;
  let selection = media.selection(req.quality.as_deref())?;
  let transcode = flag(req.transcode.as_deref(), "transcode")?;
  let range = ByteRange::from_headers(&headers);

  info!("stream {} with {}", url, selection.format_selector());
  let producer = StreamProducer::new(
    state.ytdlp.clone(),
    state.ffmpeg.clone(),
    media,
    transcode,
    state.config.chunk_size,
  );
  state.serve(&producer, url, &selection, range).await
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn test_media_type_aliases() {
    let req: StreamReq =
      serde_json::from_str(r#"{"url": "u", "type": "audio"}"#).unwrap();
    assert_eq!(req.media_type.as_deref(), Some("audio"));

    let req: StreamReq =
      serde_json::from_str(r#"{"url": "u", "media_type": "video"}"#).unwrap();
    assert_eq!(req.media_type.as_deref(), Some("video"));
  }
}
