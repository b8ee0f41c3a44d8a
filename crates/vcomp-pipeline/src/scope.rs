//! Per-job resource scope.
//!
//! A scope owns the job's unique temp directory and a stack of release
//! callbacks. Release runs the callbacks in LIFO order and then deletes the
//! directory with bounded retries. Release is idempotent and never fails
//! the job: teardown errors are logged and swallowed.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{ErrorKind, PipelineError, PipelineResult};

type ReleaseFn = Box<dyn FnOnce() + Send>;

/// Scoped temp directory plus tracked cleanup callbacks.
pub struct ResourceScope {
    root: PathBuf,
    cleanups: Mutex<Vec<ReleaseFn>>,
    released: AtomicBool,
    cleanup_attempts: u32,
    cleanup_backoff: Duration,
}

impl ResourceScope {
    /// Create a scope under `work_dir`, owning a fresh unique directory.
    pub fn create(work_dir: impl AsRef<Path>, job_id: &str) -> PipelineResult<Self> {
        let root = work_dir
            .as_ref()
            .join(format!("job_{}_{}", job_id, Uuid::new_v4().simple()));

        std::fs::create_dir_all(&root).map_err(|e| {
            PipelineError::new(
                "scope",
                ErrorKind::Resource,
                format!("failed to create scope directory {}", root.display()),
            )
            .with_cause(e)
        })?;

        debug!(scope = %root.display(), "Resource scope created");

        Ok(Self {
            root,
            cleanups: Mutex::new(Vec::new()),
            released: AtomicBool::new(false),
            cleanup_attempts: 3,
            cleanup_backoff: Duration::from_millis(100),
        })
    }

    /// Configure deletion retries for filesystems that briefly refuse to
    /// remove recently-closed files.
    pub fn with_cleanup_retry(mut self, attempts: u32, backoff: Duration) -> Self {
        self.cleanup_attempts = attempts.max(1);
        self.cleanup_backoff = backoff;
        self
    }

    /// The scope's temp directory.
    pub fn dir(&self) -> &Path {
        &self.root
    }

    /// Create and track a subdirectory inside the scope.
    pub fn acquire_temp(&self, name: &str) -> PipelineResult<PathBuf> {
        let path = self.root.join(name);
        std::fs::create_dir_all(&path).map_err(|e| {
            PipelineError::new(
                "scope",
                ErrorKind::Resource,
                format!("failed to create temp directory {}", path.display()),
            )
            .with_cause(e)
        })?;
        Ok(path)
    }

    /// Register a cleanup callback, run in LIFO order at release.
    pub fn track<F>(&self, release_fn: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.released.load(Ordering::SeqCst) {
            warn!("Cleanup registered on a released scope, running immediately");
            release_fn();
            return;
        }
        if let Ok(mut cleanups) = self.cleanups.lock() {
            cleanups.push(Box::new(release_fn));
        }
    }

    /// Run all cleanups in LIFO order, then delete the directory.
    ///
    /// Safe against repeated calls; teardown errors are logged, never
    /// re-raised.
    pub async fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }

        let cleanups: Vec<ReleaseFn> = match self.cleanups.lock() {
            Ok(mut guard) => guard.drain(..).collect(),
            Err(_) => Vec::new(),
        };
        for cleanup in cleanups.into_iter().rev() {
            cleanup();
        }

        for attempt in 1..=self.cleanup_attempts {
            match tokio::fs::remove_dir_all(&self.root).await {
                Ok(()) => {
                    debug!(scope = %self.root.display(), "Resource scope released");
                    return;
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
                Err(e) if attempt < self.cleanup_attempts => {
                    debug!(
                        scope = %self.root.display(),
                        attempt = attempt,
                        error = %e,
                        "Scope deletion failed, retrying"
                    );
                    tokio::time::sleep(self.cleanup_backoff * attempt).await;
                }
                Err(e) => {
                    warn!(
                        scope = %self.root.display(),
                        error = %e,
                        "Failed to delete scope directory after retries"
                    );
                }
            }
        }
    }

    /// Whether release has run.
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

impl Drop for ResourceScope {
    fn drop(&mut self) {
        if !self.released.load(Ordering::SeqCst) {
            // Last-resort synchronous cleanup; release() is the normal path.
            warn!(scope = %self.root.display(), "Scope dropped without release, cleaning up");
            if let Err(e) = std::fs::remove_dir_all(&self.root) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(scope = %self.root.display(), error = %e, "Drop cleanup failed");
                }
            }
        }
    }
}
