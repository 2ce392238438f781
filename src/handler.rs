mod download;
mod info;
mod stream;

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::{state::AppState, Error, Result};

pub use download::{download, download_audio};
pub use info::{formats, info, search};
pub use stream::stream;

pub async fn status(State(state): State<AppState>) -> Json<Value> {
  let cookies = if state.cookies_loaded { "loaded" } else { "none" };
  Json(json!({
    "message": "media-relay is running",
    "status": "ok",
    "cookies": cookies,
  }))
}

pub async fn health() -> &'static str {
  "ok"
}

fn required<'a>(
  value: &'a Option<String>,
  name: &'static str,
) -> Result<&'a str> {
  value
    .as_deref()
    .map(str::trim)
    .filter(|v| !v.is_empty())
    .ok_or_else(|| Error::BadRequest(name, "missing value".into()))
}

fn flag(value: Option<&str>, name: &'static str) -> Result<bool> {
  match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
    None | Some("") | Some("false") | Some("0") | Some("no") => Ok(false),
    Some("true") | Some("1") | Some("yes") => Ok(true),
    Some(other) => Err(Error::BadRequest(
      name,
      format!("expected a boolean, got {other:?}"),
    )),
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn test_required() {
    assert_eq!(required(&Some(" x ".into()), "url").unwrap(), "x");
    assert!(matches!(
      required(&Some("  ".into()), "url"),
      Err(Error::BadRequest("url", _))
    ));
    assert!(required(&None, "url").is_err());
  }

  #[test]
  fn test_flag() {
    assert!(!flag(None, "transcode").unwrap());
    assert!(flag(Some("TRUE"), "transcode").unwrap());
    assert!(flag(Some("1"), "transcode").unwrap());
    assert!(!flag(Some("false"), "transcode").unwrap());
    assert!(flag(Some("maybe"), "transcode").is_err());
  }
}
