use std::path::{Path, PathBuf};

use tracing::{info, warn};

pub const COOKIE_FILE: &str = "cookies.txt";

// Write the cookie text supplied at startup to `<root>/cookies.txt`.
//
// Called once before the server accepts requests; the returned path is
// handed to the resolver and the file is never touched again. A failed write
// only disables authenticated access.
pub fn install(cookies: Option<&str>, root: &Path) -> Option<PathBuf> {
  let cookies = cookies.map(str::trim).filter(|c| !c.is_empty())?;
  let path = root.join(COOKIE_FILE);

  match write_private(&path, &format!("{cookies}\n")) {
    Ok(()) => {
      info!("cookies loaded into {}", path.display());
      Some(path)
    }
    Err(e) => {
      warn!("failed to write cookie file {}: {}", path.display(), e);
      None
    }
  }
}

#[cfg(unix)]
fn write_private(path: &Path, content: &str) -> std::io::Result<()> {
  use std::io::Write;
  use std::os::unix::fs::OpenOptionsExt;

  let mut file = std::fs::OpenOptions::new()
    .write(true)
    .create(true)
    .truncate(true)
    .mode(0o600)
    .open(path)?;
  file.write_all(content.as_bytes())
}

#[cfg(not(unix))]
fn write_private(path: &Path, content: &str) -> std::io::Result<()> {
  std::fs::write(path, content)
}
