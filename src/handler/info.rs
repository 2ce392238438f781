use axum::{
  extract::{Query, State},
  Json,
};
use serde::Deserialize;

use crate::{
  media::{FormatsDocument, InfoDocument, SearchDocument},
  state::AppState,
  Error, Result,
};

use super::required;

const DEFAULT_SEARCH_LIMIT: u32 = 10;
const MAX_SEARCH_LIMIT: u32 = 50;

#[derive(Debug, Deserialize)]
pub struct UrlReq {
  url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SearchReq {
  #[serde(alias = "query")]
  q: Option<String>,
  #[serde(alias = "max_results")]
  limit: Option<String>,
}

pub async fn info(
  State(state): State<AppState>,
  Query(req): Query<UrlReq>,
) -> Result<Json<InfoDocument>> {
  let url = required(&req.url, "url")?;

  let _permit = state.admit().await?;
  let meta = state.ytdlp.metadata(url).await?;
  Ok(Json(meta.into()))
}

pub async fn formats(
  State(state): State<AppState>,
  Query(req): Query<UrlReq>,
) -> Result<Json<FormatsDocument>> {
  let url = required(&req.url, "url")?;

  let _permit = state.admit().await?;
  let meta = state.ytdlp.metadata(url).await?;
  Ok(Json(meta.into()))
}

pub async fn search(
  State(state): State<AppState>,
  Query(req): Query<SearchReq>,
) -> Result<Json<SearchDocument>> {
  let query = required(&req.q, "q")?.to_string();
  let limit = search_limit(req.limit.as_deref())?;

  let _permit = state.admit().await?;
  let listing = state.ytdlp.search(&query, limit).await?;
  Ok(Json(SearchDocument::new(query, listing)))
}

fn search_limit(raw: Option<&str>) -> Result<u32> {
  let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
    return Ok(DEFAULT_SEARCH_LIMIT);
  };

  raw
    .parse::<i64>()
    .map(|n| n.clamp(1, MAX_SEARCH_LIMIT as i64) as u32)
    .map_err(|_| {
      Error::BadRequest("limit", format!("expected a number, got {raw:?}"))
    })
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn test_search_limit() {
    assert_eq!(search_limit(None).unwrap(), 10);
    assert_eq!(search_limit(Some("")).unwrap(), 10);
    assert_eq!(search_limit(Some("5")).unwrap(), 5);
    assert_eq!(search_limit(Some("0")).unwrap(), 1);
    assert_eq!(search_limit(Some("-3")).unwrap(), 1);
    assert_eq!(search_limit(Some("500")).unwrap(), 50);
    assert!(search_limit(Some("lots")).is_err());
  }

  #[test]
  fn test_search_aliases() {
    let req: SearchReq =
      serde_json::from_str(r#"{"query": "rust", "max_results": "3"}"#)
        .unwrap();
    assert_eq!(req.q.as_deref(), Some("rust"));
    assert_eq!(req.limit.as_deref(), Some("3"));
  }
}
