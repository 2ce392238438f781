use std::process::Stdio;

use bytes::Bytes;
use futures::{stream::BoxStream, StreamExt};
use tokio::{
  io::{AsyncRead, AsyncReadExt},
  process::Command,
  task::JoinHandle,
};
use tokio_util::io::ReaderStream;
use tracing::{debug, error};

use crate::{Error, Result};

// bytes of stderr kept for the exit report
const STDERR_TAIL: usize = 8 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exit {
  Success,
  Failed { code: Option<i32>, stderr: String },
}

// The stdout of a running subprocess. Failures after the first byte cannot be
// reported to the client any more, so they only surface through `exit`; the
// stream itself carries nothing but stdout.
pub struct PipedOutput {
  pub stream: BoxStream<'static, Result<Bytes>>,
  pub exit: JoinHandle<Exit>,
}

pub fn spawn(mut cmd: Command, chunk_size: usize) -> Result<PipedOutput> {
  let program = cmd.as_std().get_program().to_string_lossy().into_owned();

  let mut child = cmd
    .stdin(Stdio::null())
    .stdout(Stdio::piped())
    .stderr(Stdio::piped())
    .kill_on_drop(true)
    .spawn()
    .map_err(|e| Error::Spawn(program.clone(), e))?;

  let stdout = child.stdout.take().expect("stdout not opened");
  let stderr = child.stderr.take().expect("stderr not opened");

  // drained concurrently so a chatty process can't block on a full pipe
  let stderr_tail = tokio::spawn(drain_tail(stderr, STDERR_TAIL));

  let exit = tokio::spawn(async move {
    let status = child.wait().await;
    let stderr = stderr_tail.await.unwrap_or_default();

    match status {
      Ok(status) if status.success() => {
        debug!("{} finished", program);
        Exit::Success
      }
      Ok(status) => {
        error!("{} exited with {}: {}", program, status, stderr.trim());
        Exit::Failed {
          code: status.code(),
          stderr,
        }
      }
      Err(e) => {
        error!("failed to wait for {}: {}", program, e);
        Exit::Failed { code: None, stderr }
      }
    }
  });

  let stream = ReaderStream::with_capacity(stdout, chunk_size)
    .map(|res| res.map_err(Error::from))
    .boxed();

  Ok(PipedOutput { stream, exit })
}

// Read to the end, keeping only the last `limit` bytes.
async fn drain_tail(
  mut reader: impl AsyncRead + Unpin,
  limit: usize,
) -> String {
  let mut tail = Vec::with_capacity(limit);
  let mut buf = [0u8; 4096];

  loop {
    let n = match reader.read(&mut buf).await {
      Ok(0) | Err(_) => break,
      Ok(n) => n,
    };

    tail.extend_from_slice(&buf[..n]);
    if tail.len() > limit {
      tail.drain(..tail.len() - limit);
    }
  }

  String::from_utf8_lossy(&tail).into_owned()
}

#[cfg(test)]
mod test {
  use super::*;

  fn sh(script: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(script);
    cmd
  }

  async fn read_all(output: &mut PipedOutput) -> Vec<u8> {
    let mut body = Vec::new();
    while let Some(chunk) = output.stream.next().await {
      body.extend_from_slice(&chunk.unwrap());
    }
    body
  }

  #[tokio::test]
  async fn test_success() {
    let mut output = spawn(sh("printf hello"), 1024).unwrap();
    assert_eq!(read_all(&mut output).await, b"hello");
    assert_eq!(output.exit.await.unwrap(), Exit::Success);
  }

  #[tokio::test]
  async fn test_failure_after_partial_output() {
    let script = "head -c 4096 /dev/zero; echo 'ERROR: boom' >&2; exit 1";
    let mut output = spawn(sh(script), 1024).unwrap();

    // the stream ends cleanly, with only what was written
    let body = read_all(&mut output).await;
    assert_eq!(body.len(), 4096);

    match output.exit.await.unwrap() {
      Exit::Failed { code, stderr } => {
        assert_eq!(code, Some(1));
        assert_eq!(stderr.trim(), "ERROR: boom");
      }
      Exit::Success => panic!("expected failure"),
    }
  }

  #[tokio::test]
  async fn test_chunks_respect_capacity() {
    let mut output = spawn(sh("head -c 10000 /dev/zero"), 1000).unwrap();

    let mut total = 0;
    while let Some(chunk) = output.stream.next().await {
      let chunk = chunk.unwrap();
      assert!(chunk.len() <= 1000);
      total += chunk.len();
    }
    assert_eq!(total, 10000);
  }

  #[tokio::test]
  async fn test_noisy_stderr_does_not_block() {
    let script = "head -c 200000 /dev/zero >&2; printf done";
    let mut output = spawn(sh(script), 1024).unwrap();

    assert_eq!(read_all(&mut output).await, b"done");
    assert_eq!(output.exit.await.unwrap(), Exit::Success);
  }

  #[tokio::test]
  async fn test_drain_tail_keeps_the_end() {
    let input: Vec<u8> =
      (0..10_000u32).map(|i| b'a' + (i % 26) as u8).collect();
    let tail = drain_tail(&input[..], 100).await;

    assert_eq!(tail.len(), 100);
    assert_eq!(tail.as_bytes(), &input[input.len() - 100..]);
  }

  #[tokio::test]
  async fn test_spawn_failure() {
    let cmd = Command::new("/nonexistent/ffmpeg");
    assert!(matches!(spawn(cmd, 1024), Err(Error::Spawn(..))));
  }
}
