use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// One async mutex per key, created on demand.
pub struct KeyedLocks<K> {
    inner: Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: K) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            // Drop entries nobody holds or waits on.
            map.retain(|_, lock| Arc::strong_count(lock) > 1);
            map.entry(key)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }
}
