use std::fmt;

use crate::{Error, Result};

// Unspecified video quality falls back to this height ceiling, while "best"
// lifts the ceiling altogether.
pub const DEFAULT_MAX_HEIGHT: u32 = 1080;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoQuality {
  Best,
  AtMost(u32),
}

impl Default for VideoQuality {
  fn default() -> Self {
    VideoQuality::AtMost(DEFAULT_MAX_HEIGHT)
  }
}

impl VideoQuality {
  pub fn parse(raw: Option<&str>) -> Result<Self> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
      None => Ok(Self::default()),
      Some(s) if s.eq_ignore_ascii_case("best") => Ok(Self::Best),
      Some(s) => parse_ceiling(s, 'p', "quality").map(Self::AtMost),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AudioQuality {
  #[default]
  Best,
  // kbps
  AtMost(u32),
}

impl AudioQuality {
  pub fn parse(raw: Option<&str>) -> Result<Self> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
      None => Ok(Self::default()),
      Some(s) if s.eq_ignore_ascii_case("best") => Ok(Self::Best),
      Some(s) => parse_ceiling(s, 'k', "quality").map(Self::AtMost),
    }
  }

  // value for the resolver's --audio-quality, 0 being the best VBR setting
  pub fn audio_quality_arg(&self) -> String {
    match self {
      AudioQuality::Best => "0".into(),
      AudioQuality::AtMost(kbps) => format!("{kbps}K"),
    }
  }
}

fn parse_ceiling(s: &str, suffix: char, param: &'static str) -> Result<u32> {
  let digits = s
    .strip_suffix(suffix)
    .or_else(|| s.strip_suffix(suffix.to_ascii_uppercase()))
    .unwrap_or(s);

  match digits.parse::<u32>() {
    Ok(n) if n > 0 => Ok(n),
    _ => Err(Error::BadRequest(
      param,
      format!("expected \"best\" or a positive number, got {s:?}"),
    )),
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
  Video(VideoQuality),
  Audio(AudioQuality),
  // explicit format id, bypassing quality negotiation
  Format(String),
}

impl Selection {
  pub fn video(quality: Option<&str>, format_id: Option<&str>) -> Result<Self> {
    match explicit_format(format_id) {
      Some(id) => Ok(Selection::Format(id)),
      None => VideoQuality::parse(quality).map(Selection::Video),
    }
  }

  pub fn audio(quality: Option<&str>, format_id: Option<&str>) -> Result<Self> {
    match explicit_format(format_id) {
      Some(id) => Ok(Selection::Format(id)),
      None => AudioQuality::parse(quality).map(Selection::Audio),
    }
  }

  pub fn format_selector(&self) -> String {
    match self {
      Selection::Video(VideoQuality::Best) => "bv*+ba/b".into(),
      Selection::Video(VideoQuality::AtMost(h)) => {
        format!("bv*[height<={h}]+ba/b[height<={h}]/b")
      }
      Selection::Audio(AudioQuality::Best) => "ba/b".into(),
      Selection::Audio(AudioQuality::AtMost(kbps)) => {
        format!("ba[abr<={kbps}]/ba")
      }
      Selection::Format(id) => id.clone(),
    }
  }

  pub fn audio_quality(&self) -> AudioQuality {
    match self {
      Selection::Audio(q) => *q,
      _ => AudioQuality::Best,
    }
  }
}

fn explicit_format(format_id: Option<&str>) -> Option<String> {
  format_id
    .map(str::trim)
    .filter(|s| !s.is_empty())
    .map(str::to_string)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AudioCodec {
  #[default]
  Mp3,
  M4a,
  Opus,
  Flac,
  Wav,
}

impl AudioCodec {
  pub fn parse(raw: Option<&str>) -> Result<Self> {
    let Some(s) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
      return Ok(Self::default());
    };

    match s.to_ascii_lowercase().as_str() {
      "mp3" => Ok(AudioCodec::Mp3),
      "m4a" => Ok(AudioCodec::M4a),
      "opus" => Ok(AudioCodec::Opus),
      "flac" => Ok(AudioCodec::Flac),
      "wav" => Ok(AudioCodec::Wav),
      _ => Err(Error::BadRequest(
        "audio_format",
        format!("unsupported audio format {s:?}"),
      )),
    }
  }

  pub fn extension(&self) -> &'static str {
    match self {
      AudioCodec::Mp3 => "mp3",
      AudioCodec::M4a => "m4a",
      AudioCodec::Opus => "opus",
      AudioCodec::Flac => "flac",
      AudioCodec::Wav => "wav",
    }
  }
}

impl fmt::Display for AudioCodec {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.extension())
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MediaType {
  #[default]
  Video,
  Audio,
}

impl MediaType {
  pub fn parse(raw: Option<&str>) -> Result<Self> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
      None => Ok(Self::default()),
      Some(s) if s.eq_ignore_ascii_case("video") => Ok(MediaType::Video),
      Some(s) if s.eq_ignore_ascii_case("audio") => Ok(MediaType::Audio),
      Some(s) => Err(Error::BadRequest(
        "type",
        format!("expected \"video\" or \"audio\", got {s:?}"),
      )),
    }
  }

  pub fn selection(&self, quality: Option<&str>) -> Result<Selection> {
    match self {
      MediaType::Video => Selection::video(quality, None),
      MediaType::Audio => Selection::audio(quality, None),
    }
  }
}
