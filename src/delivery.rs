use std::{
  path::Path,
  pin::Pin,
  task::{ready, Context, Poll},
};

use axum::{
  body::{self, BoxBody, StreamBody},
  http::{header, HeaderValue, Response, StatusCode},
};
use bytes::Bytes;
use futures::{stream::BoxStream, Stream, StreamExt, TryStreamExt};
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use crate::{
  producer::{Artifact, FileArtifact, ProxyArtifact},
  util::{ByteRange, ByteStream},
  workspace::Workspace,
  Error, Result,
};

const MAX_FILENAME_CHARS: usize = 100;
const FALLBACK_FILENAME: &str = "download";

// headers relayed from the upstream response in proxy mode
const RELAYED_HEADERS: [header::HeaderName; 4] = [
  header::CONTENT_TYPE,
  header::CONTENT_LENGTH,
  header::CONTENT_RANGE,
  header::ACCEPT_RANGES,
];

pub struct DeliveryOptions<'a> {
  pub chunk_size: usize,
  pub range: Option<ByteRange>,
  pub http: &'a reqwest::Client,
}

// Owns the workspace for as long as the client is being served. Dropping it,
// whether after the last chunk or mid-way, renews the workspace's lease.
pub struct Delivery<S> {
  stream: S,
  workspace: Workspace,
  sent: u64,
  finished: bool,
}

impl<S> Delivery<S> {
  pub fn new(stream: S, workspace: Workspace) -> Self {
    Self {
      stream,
      workspace,
      sent: 0,
      finished: false,
    }
  }
}

impl<S: Unpin> Unpin for Delivery<S> {}

impl<S> Stream for Delivery<S>
where
  S: Stream<Item = Result<Bytes>> + Unpin,
{
  type Item = Result<Bytes>;

  fn poll_next(
    mut self: Pin<&mut Self>,
    cx: &mut Context<'_>,
  ) -> Poll<Option<Self::Item>> {
    let this = &mut *self;

    match ready!(Pin::new(&mut this.stream).poll_next(cx)) {
      Some(Ok(bytes)) => {
        this.sent += bytes.len() as u64;
        Poll::Ready(Some(Ok(bytes)))
      }
      Some(Err(e)) => {
        let id = this.workspace.id();
        warn!("delivery from workspace {} failed: {}", id, e);
        this.finished = true;
        Poll::Ready(Some(Err(e)))
      }
      None => {
        this.finished = true;
        Poll::Ready(None)
      }
    }
  }
}

impl<S> Drop for Delivery<S> {
  fn drop(&mut self) {
    if self.finished {
      debug!(
        "delivered {} bytes from workspace {}",
        self.sent,
        self.workspace.id()
      );
    } else {
      debug!(
        "client left after {} bytes from workspace {}",
        self.sent,
        self.workspace.id()
      );
    }
  }
}

pub async fn file_stream(
  path: &Path,
  chunk_size: usize,
) -> Result<BoxStream<'static, Result<Bytes>>> {
  let file = tokio::fs::File::open(path).await?;
  let stream = ReaderStream::with_capacity(file, chunk_size)
    .map_err(Error::from)
    .boxed();
  Ok(stream)
}

pub async fn deliver(
  artifact: Artifact,
  workspace: Workspace,
  opts: &DeliveryOptions<'_>,
) -> Result<Response<BoxBody>> {
  match artifact {
    Artifact::File(file) => attachment(file, workspace, opts.chunk_size).await,
    Artifact::Pipe(pipe) => {
      // the reaper keeps running on its own and logs the exit status
      inline(pipe.output.stream, pipe.mime_type, opts.range, workspace)
    }
    Artifact::Proxy(source) => {
      proxy(opts.http, source, opts.range, workspace).await
    }
  }
}

pub async fn attachment(
  file: FileArtifact,
  workspace: Workspace,
  chunk_size: usize,
) -> Result<Response<BoxBody>> {
  let stream = file_stream(&file.path, chunk_size).await?;
  let filename = safe_filename(&file.title);
  let disposition =
    format!("attachment; filename=\"{}.{}\"", filename, file.extension());
  let body = StreamBody::new(Delivery::new(stream, workspace));

  let resp = Response::builder()
    .status(StatusCode::OK)
    .header(header::CONTENT_TYPE, file.mime_type())
    .header(header::CONTENT_LENGTH, file.size)
    .header(header::CONTENT_DISPOSITION, disposition)
    .body(body::boxed(body))?;

  Ok(resp)
}

// A live stream has no known length, so only ranges with an end, or ones
// starting at zero, can be served.
pub fn inline(
  stream: BoxStream<'static, Result<Bytes>>,
  mime_type: &str,
  range: Option<ByteRange>,
  workspace: Workspace,
) -> Result<Response<BoxBody>> {
  let builder = Response::builder()
    .header(header::CONTENT_TYPE, mime_type)
    .header(header::ACCEPT_RANGES, "bytes");

  let range = range.filter(|r| !(r.start == 0 && r.end.is_none()));
  let Some(range) = range else {
    let body = StreamBody::new(Delivery::new(stream, workspace));
    return Ok(builder.status(StatusCode::OK).body(body::boxed(body))?);
  };

  let Some(content_range) = range.content_range(None) else {
    let requested = format!("bytes={}- on a live stream", range.start);
    return Err(Error::UnsatisfiableRange(requested));
  };

  let stream = ByteStream::for_range(stream, &range);
  let body = StreamBody::new(Delivery::new(stream, workspace));
  let resp = builder
    .status(StatusCode::PARTIAL_CONTENT)
    .header(header::CONTENT_RANGE, content_range)
    .body(body::boxed(body))?;

  Ok(resp)
}

pub async fn proxy(
  http: &reqwest::Client,
  source: ProxyArtifact,
  range: Option<ByteRange>,
  workspace: Workspace,
) -> Result<Response<BoxBody>> {
  let mut req = http.get(&source.url);
  for (name, value) in &source.headers {
    req = req.header(name.as_str(), value.as_str());
  }
  if let Some(range) = range {
    req = req.header(header::RANGE, range.to_header());
  }

  debug!("proxying upstream media for workspace {}", workspace.id());
  let upstream = req.send().await?;

  let mut builder = Response::builder().status(upstream.status());
  for name in RELAYED_HEADERS {
    if let Some(value) = upstream.headers().get(&name) {
      builder = builder.header(name, value.clone());
    }
  }

  let has_type = upstream.headers().contains_key(header::CONTENT_TYPE);
  if !has_type {
    let mime_type = HeaderValue::from_static(source.mime_type);
    builder = builder.header(header::CONTENT_TYPE, mime_type);
  }

  let stream = upstream.bytes_stream().map_err(Error::from).boxed();
  let body = StreamBody::new(Delivery::new(stream, workspace));
  Ok(builder.body(body::boxed(body))?)
}

// Keep the title recognizable but safe for a quoted header parameter.
pub fn safe_filename(title: &str) -> String {
  let name: String = title
    .chars()
    .take(MAX_FILENAME_CHARS)
    .map(|c| match c {
      'a'..='z' | 'A'..='Z' | '0'..='9' | ' ' | '.' | '_' | '-' => c,
      _ => '_',
    })
    .collect();

  let name = name.trim();
  if name.is_empty() {
    FALLBACK_FILENAME.to_string()
  } else {
    name.to_string()
  }
}
