use async_trait::async_trait;
use tracing::info;

use crate::{
  selection::{MediaType, Selection},
  workspace::Workspace,
  Result,
};

use super::{
  mime_for_extension, pipe, Artifact, Ffmpeg, PipeArtifact, Producer,
  ProxyArtifact, Ytdlp,
};

// Produces media that is delivered while it is still being produced: either
// relayed from the single upstream URL, or remuxed by ffmpeg into a pipe.
pub struct StreamProducer {
  ytdlp: Ytdlp,
  ffmpeg: Ffmpeg,
  media: MediaType,
  transcode: bool,
  chunk_size: usize,
}

impl StreamProducer {
  pub fn new(
    ytdlp: Ytdlp,
    ffmpeg: Ffmpeg,
    media: MediaType,
    transcode: bool,
    chunk_size: usize,
  ) -> Self {
    Self {
      ytdlp,
      ffmpeg,
      media,
      transcode,
      chunk_size,
    }
  }
}

#[async_trait]
impl Producer for StreamProducer {
  async fn produce(
    &self,
    source: &str,
    selection: &Selection,
    workspace: &Workspace,
  ) -> Result<Artifact> {
    let resolved = self.ytdlp.resolve(source, selection).await?;

    if let ([single], false) = (resolved.sources.as_slice(), self.transcode) {
      info!("relaying {} from upstream", resolved.title);
      let mime_type = proxy_mime_type(single.ext.as_deref(), self.media);
      return Ok(Artifact::Proxy(ProxyArtifact {
        url: single.url.clone(),
        headers: single.headers.clone(),
        mime_type,
      }));
    }

    info!(
      "piping {} ({} sources) through ffmpeg",
      resolved.title,
      resolved.sources.len()
    );
    let mut cmd = self.ffmpeg.remux(&resolved.sources, self.media);
    // scratch files, if any, land in the workspace
    cmd.current_dir(workspace.path());

    let output = pipe::spawn(cmd, self.chunk_size)?;
    Ok(Artifact::Pipe(PipeArtifact {
      output,
      mime_type: Ffmpeg::mime_type(self.media),
    }))
  }
}

fn proxy_mime_type(ext: Option<&str>, media: MediaType) -> &'static str {
  match (media, ext) {
    (MediaType::Audio, Some("webm")) => "audio/webm",
    (_, Some(ext)) => mime_for_extension(ext),
    (_, None) => "application/octet-stream",
  }
}
