use std::{io::ErrorKind, path::Path, time::Duration};

use chrono::Utc;
use tokio::{fs::DirEntry, time::MissedTickBehavior};
use tokio_graceful_shutdown::SubsystemHandle;
use tracing::{debug, info, warn};

use crate::{workspace_store::WorkspaceStoreRef, Result};

// Delete every entry of a workspace, then the workspace itself.
//
// Returns whether the directory was removed by this call. A missing
// directory is not an error, and any other failure is logged and left
// alone: a reclaim is never retried and never propagates.
pub async fn reclaim(path: &Path) -> bool {
  let mut entries = match tokio::fs::read_dir(path).await {
    Ok(entries) => entries,
    Err(e) if e.kind() == ErrorKind::NotFound => return false,
    Err(e) => {
      warn!("cannot list workspace {}: {}", path.display(), e);
      return false;
    }
  };

  loop {
    match entries.next_entry().await {
      Ok(Some(entry)) => remove_entry(entry).await,
      Ok(None) => break,
      Err(e) => {
        warn!("cannot list workspace {}: {}", path.display(), e);
        break;
      }
    }
  }

  match tokio::fs::remove_dir(path).await {
    Ok(()) => {
      info!("reclaimed workspace {}", path.display());
      true
    }
    Err(e) if e.kind() == ErrorKind::NotFound => false,
    Err(e) => {
      warn!("failed to reclaim workspace {}: {}", path.display(), e);
      false
    }
  }
}

async fn remove_entry(entry: DirEntry) {
  let path = entry.path();
  let result = match entry.file_type().await {
    Ok(file_type) if file_type.is_dir() => {
      tokio::fs::remove_dir_all(&path).await
    }
    _ => tokio::fs::remove_file(&path).await,
  };

  match result {
    Ok(()) => debug!("removed {}", path.display()),
    Err(e) if e.kind() == ErrorKind::NotFound => {}
    Err(e) => warn!("failed to remove {}: {}", path.display(), e),
  }
}

// Periodically reclaims workspaces whose deadline has passed.
pub struct Janitor {
  store: WorkspaceStoreRef,
  interval: Duration,
}

impl Janitor {
  pub fn new(store: WorkspaceStoreRef, interval: Duration) -> Self {
    Self { store, interval }
  }

  pub async fn run(self, subsys: SubsystemHandle) -> Result<()> {
    let mut ticker = tokio::time::interval(self.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
      tokio::select! {
        _ = subsys.on_shutdown_requested() => break,
        _ = ticker.tick() => self.sweep().await,
      }
    }

    debug!("janitor stopped");
    Ok(())
  }

  async fn sweep(&self) {
    match self.store.sweep(Utc::now()).await {
      Ok(0) => {}
      Ok(n) => info!("reclaimed {} expired workspace(s)", n),
      Err(e) => warn!("workspace sweep failed: {}", e),
    }
  }
}
