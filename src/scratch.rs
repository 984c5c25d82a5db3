use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    time::Duration,
};

use tracing::{error, info, warn};
use uuid::Uuid;

const REMOVE_ATTEMPTS: u32 = 5;
const REMOVE_DELAY: Duration = Duration::from_millis(500);

/// Shared directory holding per-run chart files.
#[derive(Debug, Clone)]
pub struct ScratchSpace {
    root: PathBuf,
}

impl ScratchSpace {
    pub fn new(root: impl Into<PathBuf>) -> Self { Self { root: root.into() } }

    /// Creates a fresh `run_<uuid>` directory.
    pub fn new_run(&self) -> std::io::Result<PathBuf> {
        let dir = self.root.join(format!("run_{}", Uuid::new_v4().simple()));
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }
}

/// Deletes a file or directory, retrying while access is denied. Never fails.
pub async fn remove_with_retry(path: &Path) -> bool {
    remove_with_retry_using(path, REMOVE_ATTEMPTS, REMOVE_DELAY, remove_path).await
}

async fn remove_with_retry_using<F>(path: &Path, attempts: u32, delay: Duration, mut remove: F) -> bool
where
    F: FnMut(&Path) -> std::io::Result<()>,
{
    for attempt in 1..=attempts {
        match remove(path) {
            Ok(()) => {
                info!(path = %path.display(), "Removed temporary artifact");
                return true;
            }
            Err(e) if e.kind() == ErrorKind::NotFound => return true,
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                warn!("Attempt {}/{} to remove {} failed: {}", attempt, attempts, path.display(), e);
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                error!("Unexpected error removing {}: {}", path.display(), e);
                return false;
            }
        }
    }
    error!("Failed to remove temporary artifact after {} attempts: {}", attempts, path.display());
    false
}

fn remove_path(path: &Path) -> std::io::Result<()> {
    if path.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    }
}
