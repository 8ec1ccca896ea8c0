//! Serialisation of ledger read-modify-write cycles.
//!
//! Ancestor ledgers are shared by every container below them. Two
//! containers updating the same ledger concurrently would lose one update,
//! so every reservation and release runs inside a [`LedgerLock`].

use std::fmt;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use nix::fcntl::{Flock, FlockArg};
use rtbox_common::error::{Result, RtboxError};

/// Mutual exclusion around a ledger update.
pub trait LedgerLock: fmt::Debug + Send + Sync {
    /// Runs `f` while holding the lock.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock cannot be taken, or whatever `f` returns.
    fn with_lock(&self, f: &mut dyn FnMut() -> Result<()>) -> Result<()>;
}

/// No locking: the caller guarantees a single writer (e.g. one daemon
/// serialising all container operations).
#[derive(Debug, Clone, Copy, Default)]
pub struct CallerSerialized;

impl LedgerLock for CallerSerialized {
    fn with_lock(&self, f: &mut dyn FnMut() -> Result<()>) -> Result<()> {
        f()
    }
}

/// In-process lock for runtimes that drive several containers from threads.
#[derive(Debug, Default)]
pub struct ProcessLock(Mutex<()>);

impl LedgerLock for ProcessLock {
    fn with_lock(&self, f: &mut dyn FnMut() -> Result<()>) -> Result<()> {
        let _guard = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        f()
    }
}

/// Host-wide exclusive `flock(2)` on a lock file.
#[derive(Debug, Clone)]
pub struct FileLock {
    path: PathBuf,
}

impl FileLock {
    /// Creates a lock backed by `path`; the file is created on first use.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the lock file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LedgerLock for FileLock {
    fn with_lock(&self, f: &mut dyn FnMut() -> Result<()>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| RtboxError::io(parent, e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&self.path)
            .map_err(|e| RtboxError::io(&self.path, e))?;
        let guard = Flock::lock(file, FlockArg::LockExclusive)
            .map_err(|(_, errno)| RtboxError::io(&self.path, errno.into()))?;
        tracing::trace!(path = %self.path.display(), "ledger lock acquired");
        let result = f();
        drop(guard);
        result
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn file_lock_runs_closure_and_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let lock = FileLock::new(dir.path().join("run").join("ledger.lock"));
        let mut ran = false;
        lock.with_lock(&mut || {
            ran = true;
            Ok(())
        })
        .unwrap();
        assert!(ran);
        assert!(lock.path().exists());
    }

    #[test]
    fn lock_propagates_closure_error() {
        let err = CallerSerialized
            .with_lock(&mut || {
                Err(RtboxError::Config {
                    message: "boom".into(),
                })
            })
            .unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn process_lock_serialises_threads() {
        let lock = Arc::new(ProcessLock::default());
        let inside = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let lock = Arc::clone(&lock);
                let inside = Arc::clone(&inside);
                std::thread::spawn(move || {
                    lock.with_lock(&mut || {
                        assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                        std::thread::sleep(std::time::Duration::from_millis(5));
                        let _ = inside.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    }
}
