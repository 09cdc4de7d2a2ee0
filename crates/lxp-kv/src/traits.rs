use std::time::Duration;

use async_trait::async_trait;

use crate::error::KvResult;

/// A linearizable key-value store. Values are opaque byte strings — callers
/// serialize structured data as JSON text before calling `put`.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> KvResult<Option<Vec<u8>>>;

    async fn put(&self, key: &str, value: Vec<u8>) -> KvResult<()>;

    /// Atomically writes `new_value` iff the current value equals
    /// `expected` (`None` meaning "key absent"). Returns whether the swap
    /// happened.
    async fn compare_and_swap(
        &self, key: &str, expected: Option<&[u8]>, new_value: Vec<u8>,
    ) -> KvResult<bool>;

    /// Opens a named, session-scoped lock handle. The lock isn't held until
    /// `Lock::acquire` succeeds.
    fn lock(&self, name: &str) -> Box<dyn Lock>;
}

/// An advisory, named, leased lock. `acquire` blocks until held or the
/// timeout elapses; `release` is idempotent — releasing an unheld or
/// already-released lock is not an error.
#[async_trait]
pub trait Lock: Send + Sync {
    async fn acquire(&mut self, timeout: Duration) -> KvResult<()>;

    async fn release(&mut self) -> KvResult<()>;
}
