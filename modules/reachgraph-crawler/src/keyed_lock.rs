use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::OwnedMutexGuard;

/// Registry of one async mutex per key. Acquisitions on the same key queue
/// up in arrival order (tokio's mutex is fair); distinct keys never contend.
/// The guard releases on drop, so a lock cannot leak past its holder's scope.
#[derive(Default)]
pub struct KeyedLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap();
            locks.entry(key.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Number of keys ever locked and still registered.
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn same_key_acquisitions_are_served_in_order() {
        let locks = Arc::new(KeyedLocks::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        let first = locks.acquire("acct").await;

        let mut handles = Vec::new();
        for i in 0..4 {
            let locks = locks.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.acquire("acct").await;
                order.lock().unwrap().push(i);
            }));
            // Give each task time to join the wait queue before the next.
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        assert!(order.lock().unwrap().is_empty(), "holder still owns the lock");
        drop(first);

        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn distinct_keys_do_not_block_each_other() {
        let locks = Arc::new(KeyedLocks::new());
        let _held = locks.acquire("a").await;

        let concurrent = Arc::new(AtomicUsize::new(0));
        let locks2 = locks.clone();
        let concurrent2 = concurrent.clone();
        let other = tokio::spawn(async move {
            let _guard = locks2.acquire("b").await;
            concurrent2.store(1, Ordering::SeqCst);
        });

        tokio::time::timeout(Duration::from_secs(1), other)
            .await
            .expect("acquire on a different key must not wait")
            .unwrap();
        assert_eq!(concurrent.load(Ordering::SeqCst), 1);
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn dropping_the_guard_releases_exactly_once() {
        let locks = KeyedLocks::new();
        {
            let _guard = locks.acquire("acct").await;
        }
        // Reacquire must succeed immediately after the drop above.
        let reacquired =
            tokio::time::timeout(Duration::from_millis(100), locks.acquire("acct")).await;
        assert!(reacquired.is_ok());
    }
}
