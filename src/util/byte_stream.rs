use std::{
  pin::Pin,
  task::{ready, Context, Poll},
};

use bytes::Bytes;
use futures::Stream;

use crate::Result;

use super::ByteRange;

// Slices a forward-only byte stream: drops the first `skip_bytes` and stops
// after `limit_bytes`. Used to answer range requests on streams that cannot
// seek, such as a subprocess's stdout.
pub struct ByteStream<T> {
  stream: T,
  skip_bytes: u64,
  limit_bytes: Option<u64>,
}

impl<T> ByteStream<T> {
  pub fn new(stream: T) -> Self {
    ByteStream {
      stream,
      skip_bytes: 0,
      limit_bytes: None,
    }
  }

  pub fn for_range(stream: T, range: &ByteRange) -> Self {
    let stream = ByteStream::new(stream).skip_bytes(range.start);
    match range.byte_count() {
      Some(count) => stream.limit_bytes(count),
      None => stream,
    }
  }

  pub fn skip_bytes(self, bytes: u64) -> Self {
    ByteStream {
      skip_bytes: bytes,
      ..self
    }
  }

  pub fn limit_bytes(self, bytes: u64) -> Self {
    ByteStream {
      limit_bytes: Some(bytes),
      ..self
    }
  }
}

impl<T> Stream for ByteStream<T>
where
  T: Stream<Item = Result<Bytes>> + Unpin,
{
  type Item = Result<Bytes>;

  fn poll_next(
    mut self: Pin<&mut Self>,
    cx: &mut Context<'_>,
  ) -> Poll<Option<Self::Item>> {
    let this = &mut *self;

    loop {
      // don't pull from upstream once the limit is reached
      if this.limit_bytes == Some(0) {
        return Poll::Ready(None);
      }

      let bytes = match ready!(Pin::new(&mut this.stream).poll_next(cx)) {
        Some(Ok(bytes)) => bytes,
        other => return Poll::Ready(other),
      };

      let len = bytes.len() as u64;
      if len <= this.skip_bytes {
        this.skip_bytes -= len;
        continue;
      }

      let mut bytes = bytes.slice(this.skip_bytes as usize..);
      this.skip_bytes = 0;

      if let Some(limit) = this.limit_bytes {
        if bytes.len() as u64 > limit {
          bytes = bytes.slice(..limit as usize);
        }
        this.limit_bytes = Some(limit - bytes.len() as u64);
      }

      return Poll::Ready(Some(Ok(bytes)));
    }
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use futures::executor::block_on_stream;

  #[test]
  fn test_byte_stream() {
    assert_bytes(&[b"hello", b"world"], &[b"hello", b"world"], 0, None);
    assert_bytes(&[b"hello", b"world"], &[b"llo", b"world"], 2, None);
    assert_bytes(&[b"hello", b"world"], &[b"hello", b"w"], 0, Some(6));
    assert_bytes(&[b"hello", b"world"], &[b"llo", b"wor"], 2, Some(6));

    assert_bytes(&[b"hello", b"world"], &[b"world"], 5, None);
    assert_bytes(&[b"hello", b"world"], &[b"orld"], 6, None);
    assert_bytes(&[b"hello", b"world"], &[b"hel"], 0, Some(3));
    assert_bytes(&[b"hello", b"world"], &[b"hello"], 0, Some(5));
    assert_bytes(&[b"hello", b"world"], &[], 0, Some(0));

    assert_bytes(&[b"hello", b"world"], &[], 100, None);
    assert_bytes(&[b"hello", b"world"], &[b"hello", b"world"], 0, Some(100));
    assert_bytes(&[b"hello", b"world"], &[], 100, Some(100));

    assert_bytes(&[], &[], 0, None);
    assert_bytes(&[], &[], 100, None);
    assert_bytes(&[], &[], 0, Some(100));
    assert_bytes(&[], &[], 100, Some(100));
  }

  #[test]
  fn test_for_range() {
    let chunks: &[&[u8]] = &[b"0123", b"4567", b"89"];

    let range = ByteRange::parse("bytes=3-6").unwrap();
    assert_eq!(collect(ByteStream::for_range(source(chunks), &range)), b"3456");

    let range = ByteRange::parse("bytes=7-").unwrap();
    assert_eq!(collect(ByteStream::for_range(source(chunks), &range)), b"789");
  }

  #[test]
  fn test_limit_stops_pulling_upstream() {
    let upstream = futures::stream::iter(vec![
      Ok(Bytes::from_static(b"hello")),
      Err(crate::Error::Resolver("must not be reached".into())),
    ]);

    let items = block_on_stream(ByteStream::new(upstream).limit_bytes(5))
      .collect::<Vec<_>>();
    assert_eq!(items.len(), 1);
    assert!(items[0].is_ok());
  }

  fn source(
    chunks: &[&[u8]],
  ) -> impl Stream<Item = Result<Bytes>> + Unpin {
    futures::stream::iter(
      chunks
        .iter()
        .map(|bytes| Ok(Bytes::copy_from_slice(bytes)))
        .collect::<Vec<_>>(),
    )
  }

  fn collect(stream: impl Stream<Item = Result<Bytes>> + Unpin) -> Vec<u8> {
    block_on_stream(stream)
      .map(Result::unwrap)
      .flat_map(|bytes| bytes.to_vec())
      .collect()
  }

  fn assert_bytes(
    stream: &[&[u8]],
    expect: &[&[u8]],
    skip: u64,
    limit: Option<u64>,
  ) {
    let stream = ByteStream::new(source(stream)).skip_bytes(skip);
    let stream = match limit {
      Some(limit) => stream.limit_bytes(limit),
      None => stream,
    };

    let bytes = block_on_stream(stream)
      .map(Result::unwrap)
      .collect::<Vec<_>>();

    let expect = expect
      .iter()
      .map(|bytes| Bytes::copy_from_slice(bytes))
      .collect::<Vec<_>>();

    assert_eq!(bytes, expect);
  }
}
