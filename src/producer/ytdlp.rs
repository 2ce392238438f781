use std::{
  path::{Path, PathBuf},
  process::Stdio,
};

use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use crate::{
  config::Config,
  media::{SearchListing, VideoMetadata},
  selection::{AudioCodec, Selection},
  util::redact_credentials,
  Error, Result,
};

static BOT_BLOCK_REGEX: Lazy<Regex> =
  Lazy::new(|| Regex::new(r"(?i)sign in to confirm|not a bot").unwrap());

const NO_MATCHING_FORMAT: &str = "Requested format is not available";

// Runs the yt-dlp command line. Built once at startup; the cookie file, proxy
// and retry count apply to every invocation. Retrying is left entirely to
// yt-dlp itself.
#[derive(Debug, Clone)]
pub struct Ytdlp {
  binary: PathBuf,
  cookie_file: Option<PathBuf>,
  proxy: Option<String>,
  retries: u32,
}

// A direct media URL picked by the resolver, with the headers it must be
// fetched with.
#[derive(Debug, Clone, PartialEq)]
pub struct Source {
  pub url: String,
  pub ext: Option<String>,
  pub headers: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct Resolved {
  pub title: String,
  // one progressive source, or separate video and audio sources
  pub sources: Vec<Source>,
}

// What yt-dlp prints once the final file is in place.
#[derive(Debug, Default, Deserialize, PartialEq)]
pub struct DownloadReport {
  pub title: Option<String>,
  pub filepath: Option<PathBuf>,
  pub ext: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub enum PostProcess {
  MergeToMp4,
  ExtractAudio(AudioCodec),
}

impl Ytdlp {
  pub fn new(config: &Config, cookie_file: Option<PathBuf>) -> Self {
    Self {
      binary: config.ytdlp_path.clone(),
      cookie_file,
      proxy: config.ytdlp_proxy.clone(),
      retries: config.ytdlp_retries,
    }
  }

  fn command(&self) -> Command {
    let mut cmd = Command::new(&self.binary);

    cmd
      .arg("--no-warnings")
      .arg("--no-progress")
      .arg("--retries")
      .arg(self.retries.to_string());

    if let Some(cookie_file) = &self.cookie_file {
      cmd.arg("--cookies").arg(cookie_file);
    }

    if let Some(proxy) = &self.proxy {
      debug!("using proxy: {}", redact_credentials(proxy));
      cmd.arg("--proxy").arg(proxy);
    }

    cmd.stdin(Stdio::null()).kill_on_drop(true);
    cmd
  }

  pub async fn metadata(&self, url: &str) -> Result<VideoMetadata> {
    let mut cmd = self.command();
    cmd.arg("-J").arg("--no-playlist").arg("--").arg(url);

    debug!("fetching metadata for {}", url);
    let stdout = self.run(cmd).await?;
    Ok(serde_json::from_slice(&stdout)?)
  }

  pub async fn search(&self, query: &str, limit: u32) -> Result<SearchListing> {
    let mut cmd = self.command();
    cmd
      // don't fetch video pages
      .arg("--flat-playlist")
      .arg("-J")
      .arg("--")
      .arg(format!("ytsearch{limit}:{query}"));

    debug!("searching for {:?}", query);
    let stdout = self.run(cmd).await?;
    Ok(serde_json::from_slice(&stdout)?)
  }

  // Pick formats without downloading and return their direct URLs.
  pub async fn resolve(
    &self,
    url: &str,
    selection: &Selection,
  ) -> Result<Resolved> {
    let mut cmd = self.command();
    cmd
      .arg("-J")
      .arg("--no-playlist")
      .arg("-f")
      .arg(selection.format_selector())
      .arg("--")
      .arg(url);

    debug!("resolving {} with {}", url, selection.format_selector());
    let stdout = self.run(cmd).await?;
    let meta: VideoMetadata = serde_json::from_slice(&stdout)?;
    resolved_sources(meta)
  }

  // Download into the workspace. The file name follows the title, so the
  // final path is taken from what yt-dlp prints after moving the file.
  pub async fn download(
    &self,
    url: &str,
    selection: &Selection,
    dir: &Path,
    post: PostProcess,
  ) -> Result<DownloadReport> {
    let mut cmd = self.command();
    cmd
      .arg("--no-playlist")
      .arg("-f")
      .arg(selection.format_selector())
      .arg("-P")
      .arg(dir)
      .arg("-o")
      .arg("%(title).100B.%(ext)s")
      .arg("--print")
      .arg("after_move:%(.{title,filepath,ext})j");

    match post {
      PostProcess::MergeToMp4 => {
        cmd.arg("--merge-output-format").arg("mp4");
      }
      PostProcess::ExtractAudio(codec) => {
        cmd
          .arg("-x")
          .arg("--audio-format")
          .arg(codec.extension())
          .arg("--audio-quality")
          .arg(selection.audio_quality().audio_quality_arg());
      }
    }

    cmd.arg("--").arg(url);

    debug!("downloading {} into {}", url, dir.display());
    let stdout = self.run(cmd).await?;
    Ok(DownloadReport::parse(&stdout))
  }

  async fn run(&self, mut cmd: Command) -> Result<Vec<u8>> {
    // stdout and stderr are drained together until exit
    let output = cmd
      .output()
      .await
      .map_err(|e| Error::Spawn(self.binary.display().to_string(), e))?;

    if !output.status.success() {
      let err = detect_error(&output.stderr).unwrap_or_else(|| {
        Error::Resolver(format!("yt-dlp exited with {}", output.status))
      });
      return Err(err);
    }

    Ok(output.stdout)
  }
}

impl DownloadReport {
  // the last JSON line wins; anything unparsable means no report
  pub fn parse(stdout: &[u8]) -> Self {
    String::from_utf8_lossy(stdout)
      .lines()
      .rev()
      .map(str::trim)
      .find(|line| line.starts_with('{'))
      .and_then(|line| serde_json::from_str(line).ok())
      .unwrap_or_default()
  }
}

// Turn yt-dlp's stderr into an error, keeping its own wording.
fn detect_error(stderr: &[u8]) -> Option<Error> {
  let text = String::from_utf8_lossy(stderr);
  let errors = text
    .lines()
    .filter(|line| line.starts_with("ERROR:"))
    .join("\n");
  let message = if errors.is_empty() {
    text.trim().to_string()
  } else {
    errors
  };

  if message.is_empty() {
    return None;
  }

  let err = if BOT_BLOCK_REGEX.is_match(&message) {
    Error::BotBlocked(message)
  } else if message.contains(NO_MATCHING_FORMAT) {
    Error::NoMatchingFormat(message)
  } else {
    Error::Resolver(message)
  };

  Some(err)
}

fn resolved_sources(meta: VideoMetadata) -> Result<Resolved> {
  let title = meta.title.clone().unwrap_or_else(|| "media".into());

  let sources: Vec<Source> = match meta.requested_formats {
    Some(formats) => formats
      .into_iter()
      .filter_map(|f| {
        let url = f.url?;
        Some(Source {
          url,
          ext: f.ext,
          headers: f.http_headers.into_iter().sorted().collect(),
        })
      })
      .collect(),
    None => meta
      .url
      .map(|url| Source {
        url,
        ext: meta.ext,
        headers: meta.http_headers.into_iter().sorted().collect(),
      })
      .into_iter()
      .collect(),
  };

  if sources.is_empty() {
    return Err(Error::NoMatchingFormat(
      "the resolver returned no direct URL".into(),
    ));
  }

  Ok(Resolved { title, sources })
}
