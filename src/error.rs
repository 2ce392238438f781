use axum::{
  http::StatusCode,
  response::{IntoResponse, Response},
  Json,
};
use serde_json::json;
use tracing::warn;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
  #[error("invalid parameter `{0}`: {1}")]
  BadRequest(&'static str, String),

  // the resolver's own message, verbatim
  #[error("{0}")]
  Resolver(String),

  #[error("{0}")]
  BotBlocked(String),

  #[error("no format matches the requested selection: {0}")]
  NoMatchingFormat(String),

  #[error("{0} file not found after processing")]
  ArtifactNotFound(&'static str),

  #[error("failed to allocate workspace: {0}")]
  Workspace(#[source] std::io::Error),

  #[error("workspace store is not running")]
  StoreUnavailable,

  #[error("all {0} workspaces are in use")]
  CapacityExhausted(usize),

  #[error("range not satisfiable: {0}")]
  UnsatisfiableRange(String),

  #[error("server is shutting down")]
  ShuttingDown,

  #[error("invalid configuration: {0}")]
  Config(String),

  #[error("failed to spawn {0}: {1}")]
  Spawn(String, #[source] std::io::Error),

  #[error(transparent)]
  IO(#[from] std::io::Error),

  #[error(transparent)]
  Json(#[from] serde_json::Error),

  #[error(transparent)]
  Http(#[from] http::Error),

  #[error(transparent)]
  Upstream(#[from] reqwest::Error),

  #[error("server error: {0}")]
  Server(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
  pub fn status(&self) -> StatusCode {
    match self {
      Error::BadRequest(..) => StatusCode::BAD_REQUEST,
      Error::BotBlocked(_) => StatusCode::FORBIDDEN,
      Error::UnsatisfiableRange(_) => StatusCode::RANGE_NOT_SATISFIABLE,
      Error::ShuttingDown | Error::CapacityExhausted(_) => {
        StatusCode::SERVICE_UNAVAILABLE
      }
      _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }
}

impl IntoResponse for Error {
  fn into_response(self) -> Response {
    let status = self.status();
    if status.is_server_error() {
      warn!("request failed: {}", self);
    }

    (status, Json(json!({ "error": self.to_string() }))).into_response()
  }
}
