//! Advisory file locks, held in-process for the lifetime of the runtime.
//!
//! Grounded on the teacher's `WorktreeManager` git-lock pattern: a single
//! `Mutex` guarding a set of held paths, with the same "serialize, don't
//! block forever" posture. A real multi-process deployment would back this
//! with a shared store (e.g. the teacher's Postgres advisory locks); this
//! reference implementation is in-process only, matching the rest of the
//! reference runtime.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use tcr_core::capabilities::LockManager;

pub struct InMemoryLockManager {
    held: Mutex<HashSet<String>>,
}

impl InMemoryLockManager {
    pub fn new() -> Self {
        Self {
            held: Mutex::new(HashSet::new()),
        }
    }
}

impl Default for InMemoryLockManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LockManager for InMemoryLockManager {
    async fn acquire(&self, patterns: &[String]) -> anyhow::Result<Vec<String>> {
        let mut held = self.held.lock().unwrap();
        for pattern in patterns {
            if held.contains(pattern) {
                anyhow::bail!("path already locked: {pattern}");
            }
        }
        for pattern in patterns {
            held.insert(pattern.clone());
        }
        Ok(patterns.to_vec())
    }

    async fn release(&self, paths: &[String]) -> anyhow::Result<()> {
        let mut held = self.held.lock().unwrap();
        for path in paths {
            held.remove(path);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn conflicting_acquire_is_rejected() {
        let manager = InMemoryLockManager::new();
        manager.acquire(&["a/**".to_string()]).await.unwrap();
        assert!(manager.acquire(&["a/**".to_string()]).await.is_err());
    }

    #[tokio::test]
    async fn release_allows_reacquire() {
        let manager = InMemoryLockManager::new();
        let paths = manager.acquire(&["a/**".to_string()]).await.unwrap();
        manager.release(&paths).await.unwrap();
        assert!(manager.acquire(&["a/**".to_string()]).await.is_ok());
    }
}
