use std::{
  collections::HashMap,
  path::{Path, PathBuf},
  time::Duration,
};

use chrono::{DateTime, Utc};
use itertools::Itertools;
use kameo::{actor::ActorRef, error::SendError, messages, Actor};
use lru_time_cache::LruCache;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{janitor::reclaim, workspace::WorkspaceId, Error, Result};

pub const LEDGER_FILE: &str = "reclaim.json";

// A workspace is `held` from allocation until its handle is dropped. Held
// workspaces are never swept or evicted; the deadline only counts once the
// lease is released.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lease {
  pub id: WorkspaceId,
  pub path: PathBuf,
  pub deadline: DateTime<Utc>,
  #[serde(default)]
  pub held: bool,
}

// Reclaim deadlines of all live workspaces. Every change is written to the
// ledger file so pending reclaims survive a restart.
//
// The cache is only used for its recency order. Eviction is done here
// before every insert, so the cache's own capacity bound never drops a lease
// on its own.
#[derive(Actor)]
pub struct WorkspaceStore {
  ledger: PathBuf,
  capacity: usize,
  leases: LruCache<WorkspaceId, Lease>,
}

#[derive(Clone)]
pub struct WorkspaceStoreRef(ActorRef<WorkspaceStore>);

#[messages]
impl WorkspaceStore {
  #[message]
  async fn schedule(
    &mut self,
    id: WorkspaceId,
    path: PathBuf,
    delay: Duration,
  ) -> Result<()> {
    let deadline = deadline_after(Utc::now(), delay);

    if let Some(lease) = self.leases.get_mut(&id) {
      lease.deadline = lease.deadline.max(deadline);
      lease.held = true;
    } else {
      self.make_room().await?;
      let lease = Lease {
        id: id.clone(),
        path,
        deadline,
        held: true,
      };
      self.leases.insert(id, lease);
    }

    self.persist().await;
    Ok(())
  }

  // Release a lease; it is reclaimed once `now + delay` has passed.
  #[message]
  async fn renew(&mut self, id: WorkspaceId, delay: Duration) -> Result<()> {
    let deadline = deadline_after(Utc::now(), delay);

    // a reclaimed workspace stays reclaimed
    let Some(lease) = self.leases.get_mut(&id) else {
      return Ok(());
    };

    lease.deadline = lease.deadline.max(deadline);
    lease.held = false;
    self.persist().await;
    Ok(())
  }

  #[message]
  async fn sweep(&mut self, now: DateTime<Utc>) -> Result<usize> {
    let expired: Vec<WorkspaceId> = self
      .leases
      .peek_iter()
      .filter(|(_, lease)| !lease.held && lease.deadline <= now)
      .map(|(id, _)| id.clone())
      .collect();

    if expired.is_empty() {
      return Ok(0);
    }

    for id in &expired {
      if let Some(lease) = self.leases.remove(id) {
        reclaim(&lease.path).await;
      }
    }

    self.persist().await;
    Ok(expired.len())
  }

  #[message]
  async fn pending(&mut self) -> Result<usize> {
    Ok(self.leases.len())
  }

  #[message]
  async fn get_lease(&mut self, id: WorkspaceId) -> Result<Option<Lease>> {
    Ok(self.leases.peek(&id).cloned())
  }
}

impl WorkspaceStore {
  // Load the ledger under `root` and adopt workspace directories it doesn't
  // know about, e.g. ones created right before a crash.
  pub async fn open(
    root: impl AsRef<Path>,
    capacity: usize,
    delay: Duration,
  ) -> Result<Self> {
    let root = root.as_ref();
    std::fs::create_dir_all(root).map_err(Error::Workspace)?;

    let now = Utc::now();
    let ledger = root.join(LEDGER_FILE);
    let mut known: HashMap<WorkspaceId, Lease> = read_ledger(&ledger)
      .into_iter()
      .filter(|lease| lease.path.is_dir())
      .map(|lease| (lease.id.clone(), release(lease, now, delay)))
      .collect();

    for entry in std::fs::read_dir(root)?.flatten() {
      let Ok(file_type) = entry.file_type() else {
        continue;
      };
      let name = entry.file_name();
      let Some(id) = name.to_str().and_then(WorkspaceId::parse) else {
        continue;
      };
      if !file_type.is_dir() || known.contains_key(&id) {
        continue;
      }

      let created = entry
        .metadata()
        .and_then(|m| m.modified())
        .map(DateTime::<Utc>::from)
        .unwrap_or(now);
      info!("adopting orphaned workspace {}", id);
      let lease = Lease {
        id: id.clone(),
        path: entry.path(),
        deadline: deadline_after(created, delay),
        held: false,
      };
      known.insert(id, lease);
    }

    let mut store = Self {
      ledger,
      capacity,
      leases: LruCache::with_capacity(capacity),
    };

    let sorted = known.into_values().sorted_by_key(|lease| lease.deadline);
    for lease in sorted {
      // nothing is held yet, so there is always room
      store.make_room().await?;
      store.leases.insert(lease.id.clone(), lease);
    }

    store.persist().await;
    Ok(store)
  }

  pub fn spawn(self) -> WorkspaceStoreRef {
    WorkspaceStoreRef(kameo::spawn(self))
  }

  // Reclaim the least recently touched released workspace when the table is
  // full. Fails when every workspace is still in use.
  async fn make_room(&mut self) -> Result<()> {
    if self.leases.len() < self.capacity {
      return Ok(());
    }

    // most recently used first
    let victim = self
      .leases
      .peek_iter()
      .filter(|(_, lease)| !lease.held)
      .map(|(id, _)| id.clone())
      .last();

    let Some(lease) = victim.and_then(|id| self.leases.remove(&id)) else {
      warn!("all {} workspaces are in use", self.leases.len());
      return Err(Error::CapacityExhausted(self.capacity));
    };

    info!("evicting workspace {} ahead of its deadline", lease.id);
    reclaim(&lease.path).await;
    Ok(())
  }

  async fn persist(&self) {
    let leases: Vec<&Lease> =
      self.leases.peek_iter().map(|(_, lease)| lease).collect();

    if let Err(e) = write_ledger(&self.ledger, &leases).await {
      warn!("failed to persist {}: {}", self.ledger.display(), e);
    }
  }
}

impl WorkspaceStoreRef {
  // Register a held lease, reclaimed no earlier than `now + delay`.
  pub async fn schedule(
    &self,
    id: WorkspaceId,
    path: PathBuf,
    delay: Duration,
  ) -> Result<()> {
    let msg = Schedule { id, path, delay };
    self.0.ask(msg).send().await.map_err(store_error)
  }

  pub async fn renew(&self, id: WorkspaceId, delay: Duration) -> Result<()> {
    let msg = Renew { id, delay };
    self.0.ask(msg).send().await.map_err(store_error)
  }

  // Reclaim every released workspace whose deadline is at or before `now`.
  pub async fn sweep(&self, now: DateTime<Utc>) -> Result<usize> {
    self.0.ask(Sweep { now }).send().await.map_err(store_error)
  }

  pub async fn pending(&self) -> Result<usize> {
    self.0.ask(Pending {}).send().await.map_err(store_error)
  }

  pub async fn lease(&self, id: WorkspaceId) -> Result<Option<Lease>> {
    self.0.ask(GetLease { id }).send().await.map_err(store_error)
  }
}

fn store_error<M>(e: SendError<M, Error>) -> Error {
  match e {
    SendError::HandlerError(e) => e,
    _ => Error::StoreUnavailable,
  }
}

// A lease held when the process stopped has no handle left to release it.
fn release(mut lease: Lease, now: DateTime<Utc>, delay: Duration) -> Lease {
  if lease.held {
    lease.deadline = lease.deadline.max(deadline_after(now, delay));
    lease.held = false;
  }
  lease
}

fn deadline_after(start: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
  let delay = chrono::Duration::from_std(delay)
    .unwrap_or_else(|_| chrono::Duration::days(365));
  start + delay
}

fn read_ledger(path: &Path) -> Vec<Lease> {
  let content = match std::fs::read(path) {
    Ok(content) => content,
    Err(_) => return Vec::new(),
  };

  serde_json::from_slice(&content).unwrap_or_else(|e| {
    warn!("ignoring unreadable ledger {}: {}", path.display(), e);
    Vec::new()
  })
}

async fn write_ledger(path: &Path, leases: &[&Lease]) -> Result<()> {
  let json = serde_json::to_vec_pretty(leases)?;
  let temp_path = path.with_extension("json.tmp");
  tokio::fs::write(&temp_path, json).await?;
  tokio::fs::rename(&temp_path, path).await?;
  Ok(())
}

#[cfg(test)]
mod test {
  use super::*;

  fn id(s: &str) -> WorkspaceId {
    WorkspaceId::parse(s).unwrap()
  }

  fn make_workspace(root: &Path, name: &str) -> PathBuf {
    let path = root.join(name);
    std::fs::create_dir(&path).unwrap();
    std::fs::write(path.join("video.mp4"), b"data").unwrap();
    path
  }

  const DELAY: Duration = Duration::from_secs(600);

  async fn spawn_store(root: &Path, capacity: usize) -> WorkspaceStoreRef {
    WorkspaceStore::open(root, capacity, DELAY)
      .await
      .unwrap()
      .spawn()
  }

  #[tokio::test]
  async fn test_sweep_respects_deadline() {
    let root = tempfile::tempdir().unwrap();
    let store = spawn_store(root.path(), 8).await;

    let path = make_workspace(root.path(), "abc123");
    store.schedule(id("abc123"), path.clone(), DELAY).await.unwrap();
    store.renew(id("abc123"), DELAY).await.unwrap();

    assert_eq!(store.sweep(Utc::now()).await.unwrap(), 0);
    assert!(path.exists());

    let later = Utc::now() + chrono::Duration::seconds(601);
    assert_eq!(store.sweep(later).await.unwrap(), 1);
    assert!(!path.exists());
    assert_eq!(store.pending().await.unwrap(), 0);

    // nothing left to do the second time
    assert_eq!(store.sweep(later).await.unwrap(), 0);
  }

  #[tokio::test]
  async fn test_held_lease_is_never_swept() {
    let root = tempfile::tempdir().unwrap();
    let store = spawn_store(root.path(), 8).await;

    let path = make_workspace(root.path(), "abc123");
    std::fs::write(path.join("clip.f137.mp4.part"), b"partial").unwrap();
    store.schedule(id("abc123"), path.clone(), DELAY).await.unwrap();

    let much_later = Utc::now() + chrono::Duration::days(7);
    assert_eq!(store.sweep(much_later).await.unwrap(), 0);
    assert!(path.join("clip.f137.mp4.part").exists());

    let lease = store.lease(id("abc123")).await.unwrap().unwrap();
    assert!(lease.held);

    store.renew(id("abc123"), DELAY).await.unwrap();
    let lease = store.lease(id("abc123")).await.unwrap().unwrap();
    assert!(!lease.held);
    assert_eq!(store.sweep(much_later).await.unwrap(), 1);
    assert!(!path.exists());
  }

  #[tokio::test]
  async fn test_renew_extends_but_never_resurrects() {
    let root = tempfile::tempdir().unwrap();
    let store = spawn_store(root.path(), 8).await;

    let path = make_workspace(root.path(), "abc123");
    let short = Duration::from_secs(1);
    store.schedule(id("abc123"), path.clone(), short).await.unwrap();

    let before = Utc::now();
    store.renew(id("abc123"), DELAY).await.unwrap();
    let lease = store.lease(id("abc123")).await.unwrap().unwrap();
    assert!(lease.deadline >= before + chrono::Duration::seconds(600));

    let soon = Utc::now() + chrono::Duration::seconds(5);
    assert_eq!(store.sweep(soon).await.unwrap(), 0);

    let later = Utc::now() + chrono::Duration::seconds(601);
    assert_eq!(store.sweep(later).await.unwrap(), 1);

    store.renew(id("abc123"), DELAY).await.unwrap();
    assert_eq!(store.pending().await.unwrap(), 0);
    assert!(store.lease(id("abc123")).await.unwrap().is_none());
  }

  #[tokio::test]
  async fn test_ledger_survives_restart() {
    let root = tempfile::tempdir().unwrap();
    let path = make_workspace(root.path(), "abc123");

    {
      let store = spawn_store(root.path(), 8).await;
      store.schedule(id("abc123"), path.clone(), DELAY).await.unwrap();
      store.renew(id("abc123"), DELAY).await.unwrap();
    }

    let ledger =
      std::fs::read_to_string(root.path().join(LEDGER_FILE)).unwrap();
    assert!(ledger.contains("abc123"));

    let store = WorkspaceStore::open(root.path(), 8, DELAY).await.unwrap();
    assert_eq!(store.leases.len(), 1);

    let store = store.spawn();
    let later = Utc::now() + chrono::Duration::seconds(601);
    assert_eq!(store.sweep(later).await.unwrap(), 1);
    assert!(!path.exists());
  }

  #[tokio::test]
  async fn test_held_lease_is_released_on_restart() {
    let root = tempfile::tempdir().unwrap();
    let path = make_workspace(root.path(), "abc123");
    let held = Lease {
      id: id("abc123"),
      path: path.clone(),
      deadline: Utc::now() - chrono::Duration::hours(1),
      held: true,
    };
    write_ledger(&root.path().join(LEDGER_FILE), &[&held])
      .await
      .unwrap();

    let store = spawn_store(root.path(), 8).await;
    let lease = store.lease(id("abc123")).await.unwrap().unwrap();
    assert!(!lease.held);

    // gets a fresh delay rather than being swept right away
    assert_eq!(store.sweep(Utc::now()).await.unwrap(), 0);
    let later = Utc::now() + chrono::Duration::seconds(601);
    assert_eq!(store.sweep(later).await.unwrap(), 1);
    assert!(!path.exists());
  }

  #[tokio::test]
  async fn test_open_adopts_orphans() {
    let root = tempfile::tempdir().unwrap();
    let orphan = make_workspace(root.path(), "0001deadbeef");
    // not workspaces
    std::fs::create_dir(root.path().join("not-a-workspace")).unwrap();
    std::fs::write(root.path().join("cookies.txt"), b"cookie").unwrap();

    let store = WorkspaceStore::open(root.path(), 8, DELAY).await.unwrap();
    assert_eq!(store.leases.len(), 1);

    let store = store.spawn();
    let later = Utc::now() + chrono::Duration::seconds(601);
    assert_eq!(store.sweep(later).await.unwrap(), 1);
    assert!(!orphan.exists());
    assert!(root.path().join("not-a-workspace").exists());
    assert!(root.path().join("cookies.txt").exists());
  }

  #[tokio::test]
  async fn test_open_drops_stale_ledger_entries() {
    let root = tempfile::tempdir().unwrap();
    let stale = Lease {
      id: id("abc123"),
      path: root.path().join("abc123"),
      deadline: Utc::now(),
      held: false,
    };
    write_ledger(&root.path().join(LEDGER_FILE), &[&stale])
      .await
      .unwrap();

    let store = WorkspaceStore::open(root.path(), 8, DELAY).await.unwrap();
    assert_eq!(store.leases.len(), 0);
  }

  #[tokio::test]
  async fn test_open_over_capacity_reclaims_oldest() {
    let root = tempfile::tempdir().unwrap();
    let orphans: Vec<_> = ["aaa111", "bbb222", "ccc333"]
      .into_iter()
      .map(|name| make_workspace(root.path(), name))
      .collect();

    let store = WorkspaceStore::open(root.path(), 2, DELAY).await.unwrap();
    assert_eq!(store.leases.len(), 2);

    let remaining = orphans.iter().filter(|path| path.exists()).count();
    assert_eq!(remaining, 2);
  }

  #[tokio::test]
  async fn test_capacity_evicts_oldest() {
    let root = tempfile::tempdir().unwrap();
    let store = spawn_store(root.path(), 2).await;

    let paths: Vec<_> = ["aaa111", "bbb222", "ccc333"]
      .into_iter()
      .map(|name| make_workspace(root.path(), name))
      .collect();

    store.schedule(id("aaa111"), paths[0].clone(), DELAY).await.unwrap();
    store.schedule(id("bbb222"), paths[1].clone(), DELAY).await.unwrap();
    store.renew(id("aaa111"), DELAY).await.unwrap();
    store.renew(id("bbb222"), DELAY).await.unwrap();

    store.schedule(id("ccc333"), paths[2].clone(), DELAY).await.unwrap();

    assert_eq!(store.pending().await.unwrap(), 2);
    assert!(!paths[0].exists());
    assert!(paths[1].exists());
    assert!(paths[2].exists());
    assert!(store.lease(id("aaa111")).await.unwrap().is_none());
  }

  #[tokio::test]
  async fn test_capacity_skips_held_workspaces() {
    let root = tempfile::tempdir().unwrap();
    let store = spawn_store(root.path(), 2).await;

    let paths: Vec<_> = ["aaa111", "bbb222", "ccc333", "ddd444"]
      .into_iter()
      .map(|name| make_workspace(root.path(), name))
      .collect();

    // aaa111 is older but still in use, bbb222 is done
    store.schedule(id("aaa111"), paths[0].clone(), DELAY).await.unwrap();
    store.schedule(id("bbb222"), paths[1].clone(), DELAY).await.unwrap();
    store.renew(id("bbb222"), DELAY).await.unwrap();

    store.schedule(id("ccc333"), paths[2].clone(), DELAY).await.unwrap();
    assert!(paths[0].exists());
    assert!(!paths[1].exists());

    // both remaining workspaces are in use
    let err = store
      .schedule(id("ddd444"), paths[3].clone(), DELAY)
      .await
      .unwrap_err();
    assert!(matches!(err, Error::CapacityExhausted(2)));
    assert!(paths[0].exists());
    assert!(paths[2].exists());
    assert_eq!(store.pending().await.unwrap(), 2);
  }
}
