mod ffmpeg;
pub mod pipe;
mod stream;
mod ytdlp;
mod ytdlp_file;

use std::path::PathBuf;

use async_trait::async_trait;

use crate::{selection::Selection, workspace::Workspace, Result};

pub use ffmpeg::Ffmpeg;
pub use pipe::PipedOutput;
pub use stream::StreamProducer;
pub use ytdlp::{Source, Ytdlp};
pub use ytdlp_file::YtdlpFile;

// A media file sitting in the request's workspace.
#[derive(Debug, Clone)]
pub struct FileArtifact {
  pub path: PathBuf,
  pub title: String,
  pub size: u64,
}

impl FileArtifact {
  pub fn extension(&self) -> &str {
    self
      .path
      .extension()
      .and_then(|ext| ext.to_str())
      .unwrap_or("bin")
  }

  pub fn mime_type(&self) -> &'static str {
    mime_for_extension(self.extension())
  }
}

// A subprocess writing the media to its stdout.
pub struct PipeArtifact {
  pub output: PipedOutput,
  pub mime_type: &'static str,
}

// Media served straight from the upstream host.
#[derive(Debug, Clone)]
pub struct ProxyArtifact {
  pub url: String,
  pub headers: Vec<(String, String)>,
  pub mime_type: &'static str,
}

pub enum Artifact {
  File(FileArtifact),
  Pipe(PipeArtifact),
  Proxy(ProxyArtifact),
}

pub fn mime_for_extension(ext: &str) -> &'static str {
  match ext.to_ascii_lowercase().as_str() {
    "mp4" => "video/mp4",
    "webm" => "video/webm",
    "mkv" => "video/x-matroska",
    "mp3" => "audio/mpeg",
    "m4a" => "audio/mp4",
    "opus" => "audio/ogg",
    "flac" => "audio/flac",
    "wav" => "audio/wav",
    _ => "application/octet-stream",
  }
}

#[async_trait]
pub trait Producer: Send + Sync {
  async fn produce(
    &self,
    source: &str,
    selection: &Selection,
    workspace: &Workspace,
  ) -> Result<Artifact>;
}
