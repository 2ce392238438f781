use axum::http::{header, HeaderMap, HeaderValue};

// A single `bytes=start-end` request range. `end` is inclusive.
//
// Only the forms that can be served from a forward-only stream are accepted;
// suffix ranges (`bytes=-500`) and multiple ranges are treated as absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
  pub start: u64,
  pub end: Option<u64>,
}

impl ByteRange {
  pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
    headers
      .get(header::RANGE)
      .and_then(|value| value.to_str().ok())
      .and_then(Self::parse)
  }

  pub fn parse(value: &str) -> Option<Self> {
    let spec = value.trim().strip_prefix("bytes=")?;
    if spec.contains(',') {
      return None;
    }

    let (start, end) = spec.split_once('-')?;
    let start = start.trim().parse::<u64>().ok()?;
    let end = match end.trim() {
      "" => None,
      end => Some(end.parse::<u64>().ok()?),
    };

    match end {
      Some(end) if end < start => None,
      _ => Some(ByteRange { start, end }),
    }
  }

  pub fn byte_count(&self) -> Option<u64> {
    self.end.map(|end| end - self.start + 1)
  }

  // The unknown total length of a live stream is spelled `*`. An open-ended
  // range has no valid Content-Range without the total.
  pub fn content_range(&self, total: Option<u64>) -> Option<HeaderValue> {
    let end = self.end.or_else(|| total.map(|t| t.saturating_sub(1)))?;
    let total = total.map_or("*".to_string(), |t| t.to_string());
    let value = format!("bytes {}-{}/{}", self.start, end, total);

    Some(HeaderValue::from_str(&value).expect("range header is ascii"))
  }

  pub fn to_header(&self) -> HeaderValue {
    let value = match self.end {
      Some(end) => format!("bytes={}-{}", self.start, end),
      None => format!("bytes={}-", self.start),
    };

    HeaderValue::from_str(&value).expect("range header is ascii")
  }
}
