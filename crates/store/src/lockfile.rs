//! Per-key advisory file locks.
//!
//! Locks coordinate cooperating processes: shared for readers, exclusive
//! for writers and removers. One lock file per key under the lock
//! directory; the lock is released when the guard is dropped.

use fs4::FileExt;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

const LOCK_FILE_PERM: u32 = 0o660;

/// An acquired advisory lock on a key. Dropping releases it.
pub struct KeyLock {
    file: File,
}

impl KeyLock {
    fn open(dir: &Path, key: &str) -> io::Result<File> {
        debug_assert!(!key.contains('/'), "lock key must not contain '/'");
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .mode(LOCK_FILE_PERM)
            .open(dir.join(key))
    }

    /// Acquire a shared lock on the key, blocking until available.
    pub fn shared(dir: &Path, key: &str) -> io::Result<Self> {
        let file = Self::open(dir, key)?;
        file.lock_shared()?;
        Ok(Self { file })
    }

    /// Acquire an exclusive lock on the key, blocking until available.
    pub fn exclusive(dir: &Path, key: &str) -> io::Result<Self> {
        let file = Self::open(dir, key)?;
        file.lock_exclusive()?;
        Ok(Self { file })
    }

    /// Try to acquire an exclusive lock without blocking.
    pub fn try_exclusive(dir: &Path, key: &str) -> io::Result<Option<Self>> {
        let file = Self::open(dir, key)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self { file })),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl Drop for KeyLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_locks_coexist() {
        let dir = tempfile::tempdir().unwrap();
        let a = KeyLock::shared(dir.path(), "sha256-aaaa").unwrap();
        let _b = KeyLock::shared(dir.path(), "sha256-aaaa").unwrap();
        drop(a);
    }

    #[test]
    fn test_exclusive_blocks_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let held = KeyLock::exclusive(dir.path(), "sha256-aaaa").unwrap();
        assert!(
            KeyLock::try_exclusive(dir.path(), "sha256-aaaa")
                .unwrap()
                .is_none()
        );
        drop(held);
        assert!(
            KeyLock::try_exclusive(dir.path(), "sha256-aaaa")
                .unwrap()
                .is_some()
        );
    }

    #[test]
    fn test_distinct_keys_are_independent() {
        let dir = tempfile::tempdir().unwrap();
        let _a = KeyLock::exclusive(dir.path(), "sha256-aaaa").unwrap();
        assert!(
            KeyLock::try_exclusive(dir.path(), "sha256-bbbb")
                .unwrap()
                .is_some()
        );
    }
}
