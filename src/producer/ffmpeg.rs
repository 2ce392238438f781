use std::path::PathBuf;

use itertools::Itertools;
use tokio::process::Command;

use crate::{config::Config, selection::MediaType};

use super::Source;

// Remuxes or transcodes resolved sources into a format that can be written to
// a pipe and played while it is still arriving.
#[derive(Debug, Clone)]
pub struct Ffmpeg {
  binary: PathBuf,
}

impl Ffmpeg {
  pub fn new(config: &Config) -> Self {
    Self {
      binary: config.ffmpeg_path.clone(),
    }
  }

  pub fn remux(&self, sources: &[Source], media: MediaType) -> Command {
    let mut cmd = Command::new(&self.binary);
    cmd.args(["-hide_banner", "-loglevel", "error", "-nostdin"]);

    for source in sources {
      if !source.headers.is_empty() {
        let headers = source
          .headers
          .iter()
          .map(|(k, v)| format!("{k}: {v}\r\n"))
          .join("");
        cmd.arg("-headers").arg(headers);
      }
      cmd.arg("-i").arg(&source.url);
    }

    match media {
      MediaType::Video => {
        if sources.len() > 1 {
          cmd.args(["-map", "0:v:0", "-map", "1:a:0"]);
        }
        // fragmented mp4 needs no seeking back to write the index
        cmd.args([
          "-c",
          "copy",
          "-movflags",
          "frag_keyframe+empty_moov",
          "-f",
          "mp4",
          "pipe:1",
        ]);
      }
      MediaType::Audio => {
        cmd.args([
          "-vn", "-c:a", "libmp3lame", "-q:a", "2", "-f", "mp3", "pipe:1",
        ]);
      }
    }

    cmd
  }

  pub fn mime_type(media: MediaType) -> &'static str {
    match media {
      MediaType::Video => "video/mp4",
      MediaType::Audio => "audio/mpeg",
    }
  }
}

#[cfg(test)]
mod test {
  use super::*;

  fn args(cmd: &Command) -> Vec<String> {
    cmd
      .as_std()
      .get_args()
      .map(|arg| arg.to_string_lossy().into_owned())
      .collect()
  }

  fn source(url: &str, headers: &[(&str, &str)]) -> Source {
    Source {
      url: url.into(),
      ext: None,
      headers: headers
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect(),
    }
  }

  #[test]
  fn test_merge_video_and_audio() {
    let ffmpeg = Ffmpeg {
      binary: "ffmpeg".into(),
    };
    let sources = [
      source("https://cdn/v", &[("User-Agent", "ua")]),
      source("https://cdn/a", &[]),
    ];

    let args = args(&ffmpeg.remux(&sources, MediaType::Video));
    assert_eq!(
      args,
      [
        "-hide_banner",
        "-loglevel",
        "error",
        "-nostdin",
        "-headers",
        "User-Agent: ua\r\n",
        "-i",
        "https://cdn/v",
        "-i",
        "https://cdn/a",
        "-map",
        "0:v:0",
        "-map",
        "1:a:0",
        "-c",
        "copy",
        "-movflags",
        "frag_keyframe+empty_moov",
        "-f",
        "mp4",
        "pipe:1",
      ]
    );
  }

  #[test]
  fn test_transcode_audio() {
    let ffmpeg = Ffmpeg {
      binary: "ffmpeg".into(),
    };
    let sources = [source("https://cdn/a", &[])];
    let args = args(&ffmpeg.remux(&sources, MediaType::Audio));

    assert!(!args.contains(&"-map".to_string()));
    assert_eq!(
      args[args.len() - 8..],
      ["-vn", "-c:a", "libmp3lame", "-q:a", "2", "-f", "mp3", "pipe:1"]
    );
    assert_eq!(Ffmpeg::mime_type(MediaType::Audio), "audio/mpeg");
  }
}
