use std::{
  fmt,
  io::ErrorKind,
  path::{Path, PathBuf},
  sync::{
    atomic::{AtomicU32, Ordering},
    Arc,
  },
  time::Duration,
};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{workspace_store::WorkspaceStoreRef, Error, Result};

// attempts before giving up on finding an unused id
const MAX_ATTEMPTS: usize = 8;

#[derive(
  Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub struct WorkspaceId(String);

impl WorkspaceId {
  pub fn parse(s: &str) -> Option<Self> {
    let valid = (4..=32).contains(&s.len())
      && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
    valid.then(|| WorkspaceId(s.to_string()))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for WorkspaceId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl TryFrom<String> for WorkspaceId {
  type Error = String;

  fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
    Self::parse(&s).ok_or_else(|| format!("invalid workspace id {s:?}"))
  }
}

impl From<WorkspaceId> for String {
  fn from(id: WorkspaceId) -> Self {
    id.0
  }
}

pub trait IdSource: Send + Sync {
  fn next_id(&self) -> WorkspaceId;
}

// A process-local counter followed by a random suffix. The suffix keeps ids
// distinct across restarts, the counter keeps them distinct within a run.
#[derive(Default)]
pub struct CounterIds {
  counter: AtomicU32,
}

impl IdSource for CounterIds {
  fn next_id(&self) -> WorkspaceId {
    let n = self.counter.fetch_add(1, Ordering::Relaxed) & 0xffff;
    let suffix: u32 = rand::random();
    WorkspaceId(format!("{n:04x}{suffix:08x}"))
  }
}

#[derive(Clone)]
pub struct WorkspaceManager {
  root: PathBuf,
  ids: Arc<dyn IdSource>,
  store: WorkspaceStoreRef,
  delay: Duration,
}

impl WorkspaceManager {
  pub fn new(
    root: impl Into<PathBuf>,
    store: WorkspaceStoreRef,
    delay: Duration,
  ) -> Self {
    Self::with_ids(root, store, delay, Arc::new(CounterIds::default()))
  }

  pub fn with_ids(
    root: impl Into<PathBuf>,
    store: WorkspaceStoreRef,
    delay: Duration,
    ids: Arc<dyn IdSource>,
  ) -> Self {
    Self {
      root: root.into(),
      ids,
      store,
      delay,
    }
  }

  // Create a fresh directory and register it as held right away, so the
  // workspace is reclaimed no matter how the request ends.
  pub async fn allocate(&self) -> Result<Workspace> {
    for _ in 0..MAX_ATTEMPTS {
      let id = self.ids.next_id();
      let path = self.root.join(id.as_str());

      match tokio::fs::create_dir(&path).await {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
          warn!("workspace id {} already taken, retrying", id);
          continue;
        }
        Err(e) => return Err(Error::Workspace(e)),
      }

      if let Err(e) =
        self.store.schedule(id.clone(), path.clone(), self.delay).await
      {
        tokio::fs::remove_dir(&path).await.ok();
        return Err(e);
      }

      info!("allocated workspace {}", id);
      return Ok(Workspace {
        id,
        path,
        store: self.store.clone(),
        delay: self.delay,
      });
    }

    Err(Error::Workspace(std::io::Error::new(
      ErrorKind::AlreadyExists,
      "no unused workspace id found",
    )))
  }
}

// Handle to one request's workspace. The workspace is never reclaimed while
// the handle is alive. Dropping it releases the lease with a deadline of
// `now + delay`.
pub struct Workspace {
  id: WorkspaceId,
  path: PathBuf,
  store: WorkspaceStoreRef,
  delay: Duration,
}

impl Workspace {
  pub fn id(&self) -> &WorkspaceId {
    &self.id
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  // regular files currently in the workspace, sorted by name
  pub async fn entries(&self) -> Result<Vec<PathBuf>> {
    let mut entries = Vec::new();
    let mut dir = tokio::fs::read_dir(&self.path).await?;
    while let Some(entry) = dir.next_entry().await? {
      if entry.file_type().await?.is_file() {
        entries.push(entry.path());
      }
    }

    entries.sort();
    Ok(entries)
  }

  pub async fn find(
    &self,
    predicate: impl Fn(&Path) -> bool,
  ) -> Result<Option<PathBuf>> {
    let entries = self.entries().await?;
    Ok(entries.into_iter().find(|path| predicate(path)))
  }
}

pub fn has_extension<'a>(
  extensions: &'a [&'a str],
) -> impl Fn(&Path) -> bool + 'a {
  move |path: &Path| {
    path
      .extension()
      .and_then(|ext| ext.to_str())
      .map(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
      .unwrap_or(false)
  }
}

impl Drop for Workspace {
  fn drop(&mut self) {
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
      return;
    };

    let store = self.store.clone();
    let id = self.id.clone();
    let delay = self.delay;
    runtime.spawn(async move {
      if let Err(e) = store.renew(id.clone(), delay).await {
        debug!("failed to renew workspace {}: {}", id, e);
      }
    });
  }
}
