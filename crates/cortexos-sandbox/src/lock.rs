use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

/// Non-VCS fallback mutual exclusion for paths outside any worktree.
/// Lock acquisition relies on `create_dir`'s atomicity: a concurrent
/// acquire on the same key races the filesystem, not CortexOS.
pub struct FileLockManager {
    lock_root: PathBuf,
}

fn lock_key(absolute_path: &Path) -> String {
    let digest = Sha256::digest(absolute_path.to_string_lossy().as_bytes());
    hex::encode(&digest[..8])
}

impl FileLockManager {
    pub fn new(lock_root: PathBuf) -> Self {
        Self { lock_root }
    }

    fn lock_dir(&self, absolute_path: &Path) -> PathBuf {
        self.lock_root.join(format!("{}.lock", lock_key(absolute_path)))
    }

    /// Returns `true` if the lock was newly acquired, `false` if another
    /// holder already owns it.
    pub async fn acquire(&self, absolute_path: &Path) -> std::io::Result<bool> {
        tokio::fs::create_dir_all(&self.lock_root).await?;
        match tokio::fs::create_dir(self.lock_dir(absolute_path)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn release(&self, absolute_path: &Path) -> std::io::Result<()> {
        match tokio::fs::remove_dir(self.lock_dir(absolute_path)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Sweeps every lock this manager's project has taken, for use at the
    /// end of a run regardless of individual lock state.
    pub async fn release_all(&self) -> std::io::Result<()> {
        let mut entries = match tokio::fs::read_dir(&self.lock_root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                let _ = tokio::fs::remove_dir(entry.path()).await;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_acquire_on_same_path_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let manager = FileLockManager::new(dir.path().join("locks"));
        let target = PathBuf::from("/project/src/lib.rs");
        assert!(manager.acquire(&target).await.unwrap());
        assert!(!manager.acquire(&target).await.unwrap());
    }

    #[tokio::test]
    async fn release_allows_reacquire() {
        let dir = tempfile::tempdir().unwrap();
        let manager = FileLockManager::new(dir.path().join("locks"));
        let target = PathBuf::from("/project/src/lib.rs");
        manager.acquire(&target).await.unwrap();
        manager.release(&target).await.unwrap();
        assert!(manager.acquire(&target).await.unwrap());
    }

    #[tokio::test]
    async fn release_all_clears_every_lock() {
        let dir = tempfile::tempdir().unwrap();
        let manager = FileLockManager::new(dir.path().join("locks"));
        manager.acquire(&PathBuf::from("/a")).await.unwrap();
        manager.acquire(&PathBuf::from("/b")).await.unwrap();
        manager.release_all().await.unwrap();
        assert!(manager.acquire(&PathBuf::from("/a")).await.unwrap());
    }
}
