use std::path::PathBuf;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::{
  selection::{AudioCodec, Selection},
  workspace::{has_extension, Workspace},
  Error, Result,
};

use super::{
  ytdlp::{DownloadReport, PostProcess},
  Artifact, FileArtifact, Producer, Ytdlp,
};

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "webm", "mkv"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Output {
  // merged into an mp4 container
  Video,
  // audio extracted and converted to the codec
  Audio(AudioCodec),
}

// Downloads the selection into the workspace with yt-dlp and hands back the
// finished file.
pub struct YtdlpFile {
  ytdlp: Ytdlp,
  output: Output,
}

impl YtdlpFile {
  pub fn video(ytdlp: Ytdlp) -> Self {
    Self {
      ytdlp,
      output: Output::Video,
    }
  }

  pub fn audio(ytdlp: Ytdlp, codec: AudioCodec) -> Self {
    Self {
      ytdlp,
      output: Output::Audio(codec),
    }
  }
}

#[async_trait]
impl Producer for YtdlpFile {
  async fn produce(
    &self,
    source: &str,
    selection: &Selection,
    workspace: &Workspace,
  ) -> Result<Artifact> {
    let post = match self.output {
      Output::Video => PostProcess::MergeToMp4,
      Output::Audio(codec) => PostProcess::ExtractAudio(codec),
    };

    let report = self
      .ytdlp
      .download(source, selection, workspace.path(), post)
      .await?;

    let path = locate(workspace, &report, self.output).await?;
    let size = tokio::fs::metadata(&path).await?.len();
    let title = report
      .title
      .or_else(|| {
        path
          .file_stem()
          .map(|stem| stem.to_string_lossy().into_owned())
      })
      .unwrap_or_else(|| "media".into());

    info!(
      "produced {} ({} bytes) in workspace {}",
      path.display(),
      size,
      workspace.id()
    );

    Ok(Artifact::File(FileArtifact { path, title, size }))
  }
}

// Only the reported file name is trusted; it is always looked up inside the
// workspace. Without a usable report the workspace is scanned instead.
async fn locate(
  workspace: &Workspace,
  report: &DownloadReport,
  output: Output,
) -> Result<PathBuf> {
  let reported = report
    .filepath
    .as_ref()
    .and_then(|path| path.file_name())
    .map(|name| workspace.path().join(name));

  if let Some(path) = reported {
    if tokio::fs::metadata(&path).await.is_ok_and(|m| m.is_file()) {
      return Ok(path);
    }
    warn!("reported file {} is missing, scanning", path.display());
  }

  match output {
    Output::Video => workspace
      .find(has_extension(VIDEO_EXTENSIONS))
      .await?
      .ok_or(Error::ArtifactNotFound("video")),
    Output::Audio(codec) => workspace
      .find(has_extension(&[codec.extension()]))
      .await?
      .ok_or(Error::ArtifactNotFound("audio")),
  }
}
