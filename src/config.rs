use std::{net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct Config {
  pub listen_addr: SocketAddr,
  pub workspace_root: PathBuf,
  pub reclaim_delay: Duration,
  pub sweep_interval: Duration,
  // max live workspaces before the oldest one is evicted
  pub workspace_capacity: usize,
  // max concurrent resolver/producer invocations
  pub producer_concurrency: usize,
  pub chunk_size: usize,
  pub ytdlp_path: PathBuf,
  pub ffmpeg_path: PathBuf,
  pub ytdlp_proxy: Option<String>,
  pub ytdlp_retries: u32,
  // raw cookie-file text
  pub cookies: Option<String>,
}

impl Config {
  pub fn from_env() -> Result<Self> {
    dotenvy::dotenv().ok();
    Self::from_lookup(|key| std::env::var(key).ok())
  }

  pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
    let var = |key: &str| {
      lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
    };

    let config = Config {
      listen_addr: parse(
        &var,
        "LISTEN_ADDR",
        SocketAddr::from(([0, 0, 0, 0], 8080)),
      )?,
      workspace_root: var("WORKSPACE_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::temp_dir().join("media-relay")),
      reclaim_delay: Duration::from_secs(parse(
        &var,
        "RECLAIM_DELAY_SECS",
        600,
      )?),
      sweep_interval: Duration::from_secs(parse(
        &var,
        "SWEEP_INTERVAL_SECS",
        30,
      )?),
      workspace_capacity: parse(&var, "WORKSPACE_CAPACITY", 64)?,
      producer_concurrency: parse(&var, "YTDLP_CONCURRENCY", 2)?,
      chunk_size: parse(&var, "CHUNK_SIZE", 64 * 1024)?,
      ytdlp_path: var("YTDLP_PATH").unwrap_or("yt-dlp".into()).into(),
      ffmpeg_path: var("FFMPEG_PATH").unwrap_or("ffmpeg".into()).into(),
      ytdlp_proxy: var("YTDLP_PROXY"),
      ytdlp_retries: parse(&var, "YTDLP_RETRIES", 3)?,
      // cookie text is taken as-is apart from surrounding whitespace
      cookies: lookup("YOUTUBE_COOKIES")
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty()),
    };

    config.validate()?;
    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    let nonzero = [
      ("WORKSPACE_CAPACITY", self.workspace_capacity),
      ("YTDLP_CONCURRENCY", self.producer_concurrency),
      ("CHUNK_SIZE", self.chunk_size),
      ("SWEEP_INTERVAL_SECS", self.sweep_interval.as_secs() as usize),
    ];

    for (key, value) in nonzero {
      if value == 0 {
        return Err(Error::Config(format!("{key} must be greater than 0")));
      }
    }

    Ok(())
  }
}

fn parse<T: FromStr>(
  var: impl Fn(&str) -> Option<String>,
  key: &str,
  default: T,
) -> Result<T> {
  match var(key) {
    None => Ok(default),
    Some(raw) => raw
      .parse()
      .map_err(|_| Error::Config(format!("{key}: cannot parse {raw:?}"))),
  }
}
