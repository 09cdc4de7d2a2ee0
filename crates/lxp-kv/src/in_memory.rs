use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{
    Mutex,
    OwnedMutexGuard,
};

use crate::error::{
    KvError,
    KvResult,
};
use crate::traits::{
    KvStore,
    Lock,
};

/// In-process fake `KvStore`, the way `kftray-server`'s tests substitute a
/// hand-written `MockHandler` for `ProxyHandler` instead of pulling in a
/// mocking framework. Every lock name gets its own `tokio::sync::Mutex`,
/// created lazily on first use.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    values: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn lock_mutex(&self, name: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

#[async_trait]
impl KvStore for InMemoryStore {
    async fn get(&self, key: &str) -> KvResult<Option<Vec<u8>>> {
        Ok(self.values.lock().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> KvResult<()> {
        self.values.lock().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn compare_and_swap(
        &self, key: &str, expected: Option<&[u8]>, new_value: Vec<u8>,
    ) -> KvResult<bool> {
        let mut values = self.values.lock().await;
        let current = values.get(key).map(Vec::as_slice);
        if current != expected {
            return Ok(false);
        }
        values.insert(key.to_string(), new_value);
        Ok(true)
    }

    fn lock(&self, name: &str) -> Box<dyn Lock> {
        Box::new(InMemoryLock {
            store: self.clone(),
            name: name.to_string(),
            guard: None,
        })
    }
}

struct InMemoryLock {
    store: InMemoryStore,
    name: String,
    guard: Option<OwnedMutexGuard<()>>,
}

#[async_trait]
impl Lock for InMemoryLock {
    async fn acquire(&mut self, acquire_timeout: Duration) -> KvResult<()> {
        let mutex = self.store.lock_mutex(&self.name).await;
        match tokio::time::timeout(acquire_timeout, mutex.lock_owned()).await {
            Ok(guard) => {
                self.guard = Some(guard);
                Ok(())
            }
            Err(_) => Err(KvError::LockTimeout(self.name.clone())),
        }
    }

    async fn release(&mut self) -> KvResult<()> {
        self.guard = None;
        Ok(())
    }
}
