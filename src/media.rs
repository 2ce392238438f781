use std::{cmp::Reverse, collections::HashMap};

use itertools::Itertools;
use serde::{Deserialize, Serialize};

// The subset of the resolver's `-J` output we care about.
#[derive(Debug, Deserialize, Default)]
pub struct VideoMetadata {
  pub id: Option<String>,
  pub title: Option<String>,
  pub uploader: Option<String>,
  pub duration: Option<f64>,
  pub thumbnail: Option<String>,
  #[serde(default)]
  pub thumbnails: Vec<Thumbnail>,
  pub description: Option<String>,
  #[serde(default)]
  pub formats: Vec<Format>,
  pub url: Option<String>,
  pub ext: Option<String>,
  #[serde(default)]
  pub http_headers: HashMap<String, String>,
  // present when the selector picked separate video and audio formats
  pub requested_formats: Option<Vec<Format>>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Thumbnail {
  pub url: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Format {
  pub format_id: Option<String>,
  pub format_note: Option<String>,
  pub url: Option<String>,
  pub ext: Option<String>,
  pub resolution: Option<String>,
  pub height: Option<u32>,
  pub fps: Option<f64>,
  pub vcodec: Option<String>,
  pub acodec: Option<String>,
  pub filesize: Option<u64>,
  #[serde(default)]
  pub http_headers: HashMap<String, String>,
}

impl Format {
  fn has_video(&self) -> bool {
    self.vcodec.as_deref().map_or(true, |c| c != "none")
  }

  fn has_audio(&self) -> bool {
    self.acodec.as_deref().map_or(true, |c| c != "none")
  }
}

impl VideoMetadata {
  pub fn best_thumbnail(&self) -> Option<String> {
    self
      .thumbnail
      .clone()
      .or_else(|| self.thumbnails.last().map(|t| t.url.clone()))
  }
}

#[derive(Debug, Serialize)]
pub struct InfoDocument {
  pub id: Option<String>,
  pub title: String,
  pub author: String,
  pub uploader: String,
  pub duration: f64,
  pub thumbnail: Option<String>,
  pub description: String,
  pub streaming_formats: Vec<StreamingFormat>,
  pub all_formats: Vec<FormatDescriptor>,
}

// a format carrying both audio and video, playable without muxing
#[derive(Debug, Serialize, PartialEq)]
pub struct StreamingFormat {
  pub resolution: String,
  pub url: Option<String>,
  pub fps: f64,
  pub ext: Option<String>,
  pub filesize: Option<u64>,
  pub format_id: Option<String>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct FormatDescriptor {
  pub format_id: Option<String>,
  pub ext: Option<String>,
  pub resolution: String,
  pub fps: Option<f64>,
  pub vcodec: Option<String>,
  pub acodec: Option<String>,
  pub filesize: Option<u64>,
  pub label: String,
}

#[derive(Debug, Serialize)]
pub struct FormatsDocument {
  pub id: Option<String>,
  pub title: String,
  pub formats: Vec<FormatDescriptor>,
}

impl From<VideoMetadata> for InfoDocument {
  fn from(meta: VideoMetadata) -> Self {
    let thumbnail = meta.best_thumbnail();
    let uploader = meta.uploader.unwrap_or_else(|| "Unknown".into());

    Self {
      streaming_formats: streaming_formats(&meta.formats),
      all_formats: meta.formats.iter().map(Into::into).collect(),
      id: meta.id,
      title: meta.title.unwrap_or_else(|| "Unknown".into()),
      author: uploader.clone(),
      uploader,
      duration: meta.duration.unwrap_or_default(),
      thumbnail,
      description: meta.description.unwrap_or_default(),
    }
  }
}

impl From<VideoMetadata> for FormatsDocument {
  fn from(meta: VideoMetadata) -> Self {
    Self {
      formats: meta.formats.iter().map(Into::into).collect(),
      id: meta.id,
      title: meta.title.unwrap_or_else(|| "Unknown".into()),
    }
  }
}

// one muxed format per height, tallest first; the first one listed wins
fn streaming_formats(formats: &[Format]) -> Vec<StreamingFormat> {
  formats
    .iter()
    .filter(|f| f.has_video() && f.has_audio())
    .filter_map(|f| f.height.map(|h| (h, f)))
    .unique_by(|(h, _)| *h)
    .sorted_by_key(|(h, _)| Reverse(*h))
    .map(|(h, f)| StreamingFormat {
      resolution: format!("{h}p"),
      url: f.url.clone(),
      fps: f.fps.unwrap_or_default(),
      ext: f.ext.clone(),
      filesize: f.filesize,
      format_id: f.format_id.clone(),
    })
    .collect()
}

impl From<&Format> for FormatDescriptor {
  fn from(f: &Format) -> Self {
    let label = format!(
      "{} - {} ({}, {})",
      f.format_note
        .as_deref()
        .or(f.resolution.as_deref())
        .unwrap_or("audio"),
      f.ext.as_deref().unwrap_or("unknown"),
      f.vcodec.as_deref().unwrap_or("no video"),
      f.acodec.as_deref().unwrap_or("no audio"),
    );

    Self {
      format_id: f.format_id.clone(),
      ext: f.ext.clone(),
      resolution: f.resolution.clone().unwrap_or_else(|| "audio only".into()),
      fps: f.fps,
      vcodec: f.vcodec.clone(),
      acodec: f.acodec.clone(),
      filesize: f.filesize,
      label,
    }
  }
}

#[derive(Debug, Deserialize, Default)]
pub struct SearchListing {
  #[serde(default)]
  pub entries: Vec<Option<SearchEntry>>,
}

#[derive(Debug, Deserialize)]
pub struct SearchEntry {
  pub id: Option<String>,
  pub title: Option<String>,
  pub uploader: Option<String>,
  pub channel: Option<String>,
  pub duration: Option<f64>,
  pub thumbnail: Option<String>,
  #[serde(default)]
  pub thumbnails: Vec<Thumbnail>,
  pub webpage_url: Option<String>,
  pub url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SearchDocument {
  pub query: String,
  pub results: Vec<SearchResult>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct SearchResult {
  pub id: Option<String>,
  pub title: Option<String>,
  pub uploader: Option<String>,
  pub duration: Option<f64>,
  pub thumbnail: Option<String>,
  pub url: Option<String>,
}

impl SearchDocument {
  pub fn new(query: String, listing: SearchListing) -> Self {
    let results = listing.entries.into_iter().flatten().map(Into::into);
    Self {
      query,
      results: results.collect(),
    }
  }
}

impl From<SearchEntry> for SearchResult {
  fn from(e: SearchEntry) -> Self {
    let url = e.webpage_url.or(e.url).or_else(|| {
      e.id
        .as_ref()
        .map(|id| format!("https://www.youtube.com/watch?v={id}"))
    });
    let thumbnail = e
      .thumbnail
      .or_else(|| e.thumbnails.last().map(|t| t.url.clone()));

    Self {
      id: e.id,
      title: e.title,
      uploader: e.uploader.or(e.channel),
      duration: e.duration,
      thumbnail,
      url,
    }
  }
}
