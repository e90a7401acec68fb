//! Per-key async locks
//!
//! One `tokio::sync::Mutex` per session or sensor id, created on first use.
//! Unrelated keys never contend.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Default)]
pub struct KeyedLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`
    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let mutex = Arc::clone(&*self.locks.entry(key.to_string()).or_default());
        mutex.lock_owned().await
    }

    /// Forget the lock for `key` if nobody holds or waits on it
    pub fn remove_idle(&self, key: &str) -> bool {
        self.locks
            .remove_if(key, |_, mutex| Arc::strong_count(mutex) == 1)
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_key_is_exclusive() {
        let locks = Arc::new(KeyedLocks::new());
        let guard = locks.lock("sensor-1").await;

        let contender = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _guard = locks.lock("sensor-1").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn test_different_keys_do_not_contend() {
        let locks = KeyedLocks::new();
        let _a = locks.lock("a").await;
        let _b = tokio::time::timeout(Duration::from_millis(50), locks.lock("b"))
            .await
            .unwrap();
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn test_remove_idle_skips_held_locks() {
        let locks = KeyedLocks::new();
        let guard = locks.lock("a").await;
        assert!(!locks.remove_idle("a"));
        drop(guard);
        assert!(locks.remove_idle("a"));
        assert!(locks.is_empty());
    }
}
