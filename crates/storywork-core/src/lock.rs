use crate::error::{Result, StoryworkError};
use crate::{io, paths};
use chrono::Utc;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

/// A lock file older than this is assumed abandoned.
pub const STALE_AFTER: Duration = Duration::from_secs(60 * 60);

/// Single-host guard against two batch runs on the same root.
///
/// Holds `<root>/.lock` for its lifetime; the file is removed on drop, which
/// covers normal exit, `?` propagation and interrupts alike.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
}

impl LockGuard {
    pub fn acquire(root: &Path, force: bool) -> Result<Self> {
        Self::acquire_with(root, force, STALE_AFTER)
    }

    pub fn acquire_with(root: &Path, force: bool, stale_after: Duration) -> Result<Self> {
        let path = paths::lock_path(root);
        std::fs::create_dir_all(root)?;
        let content = lock_content();

        match std::fs::metadata(&path) {
            Ok(meta) => {
                let age = meta
                    .modified()
                    .ok()
                    .and_then(|m| SystemTime::now().duration_since(m).ok())
                    .unwrap_or_default();
                if age < stale_after && !force {
                    return Err(StoryworkError::LockHeld {
                        path,
                        age_secs: age.as_secs(),
                    });
                }
                if force {
                    warn!(path = %path.display(), age_secs = age.as_secs(), "overriding lock (--force)");
                } else {
                    warn!(path = %path.display(), age_secs = age.as_secs(), "taking over stale lock");
                }
                io::atomic_write(&path, content.as_bytes())?;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let mut file = match std::fs::OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .open(&path)
                {
                    Ok(f) => f,
                    Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                        return Err(StoryworkError::LockHeld { path, age_secs: 0 });
                    }
                    Err(e) => return Err(e.into()),
                };
                file.write_all(content.as_bytes())?;
            }
            Err(e) => return Err(e.into()),
        }

        debug!(path = %path.display(), "lock acquired");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "lock released"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), "failed to remove lock: {e}"),
        }
    }
}

fn lock_content() -> String {
    format!("pid:{}\n{}\n", std::process::id(), Utc::now().to_rfc3339())
}
