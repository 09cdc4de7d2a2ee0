mod error;

use std::collections::{
    BTreeSet,
    HashMap,
    HashSet,
};
use std::sync::Arc;
use std::time::Duration;

use lxp_kv::KvStore;
use serde::{
    Deserialize,
    Serialize,
};
use tracing::{
    debug,
    warn,
};

pub use crate::error::{
    AllocatorError,
    AllocatorResult,
};

const AVAILABLE_KEY: &str = "available_ports";
const PENDING_KEY: &str = "pending_ports";

/// `reserved_at` is a decimal-text epoch-seconds timestamp, not a JSON
/// number — `original_source/api.py:202` writes it via `now.strftime('%s')`,
/// and spec.md §8 scenario 2's round-trip example (`{"reserved_at":
/// "1686799510"}`) is itself a JSON string. `deserialize_reserved_at`
/// also accepts a bare JSON integer so a differently-written record
/// still loads.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
struct PendingEntry {
    #[serde(deserialize_with = "deserialize_reserved_at")]
    reserved_at: String,
}

fn deserialize_reserved_at<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrInt {
        String(String),
        Int(i64),
    }

    match StringOrInt::deserialize(deserializer)? {
        StringOrInt::String(s) => Ok(s),
        StringOrInt::Int(i) => Ok(i.to_string()),
    }
}

/// Lock-guarded port allocator. `available`/`pending` live in the KV store
/// under `available_ports`/`pending_ports`; the allocated set is never
/// stored — callers pass it in, computed from the live instance fleet, the
/// way spec.md §3 requires ("not stored in KV; computed on demand").
pub struct PortAllocator<K: KvStore> {
    kv: Arc<K>,
    lock_name: String,
    lock_timeout: Duration,
    range_start: u16,
    range_end: u16,
}

impl<K: KvStore> PortAllocator<K> {
    pub fn new(kv: Arc<K>, lock_name: impl Into<String>, lock_timeout: Duration, range: (u16, u16)) -> Self {
        Self {
            kv,
            lock_name: lock_name.into(),
            lock_timeout,
            range_start: range.0,
            range_end: range.1,
        }
    }

    fn full_range(&self) -> BTreeSet<u16> {
        (self.range_start..self.range_end).collect()
    }

    async fn load_available(&self, pending: &HashMap<u16, PendingEntry>) -> AllocatorResult<BTreeSet<u16>> {
        match self.kv.get(AVAILABLE_KEY).await? {
            Some(raw) => {
                let ports: Vec<u16> = serde_json::from_slice(&raw)
                    .map_err(|e| AllocatorError::Corrupt(AVAILABLE_KEY.to_string(), e.to_string()))?;
                Ok(ports.into_iter().collect())
            }
            None => {
                let mut range = self.full_range();
                for port in pending.keys() {
                    range.remove(port);
                }
                Ok(range)
            }
        }
    }

    async fn load_pending(&self) -> AllocatorResult<HashMap<u16, PendingEntry>> {
        match self.kv.get(PENDING_KEY).await? {
            Some(raw) => {
                let map: HashMap<String, PendingEntry> = serde_json::from_slice(&raw)
                    .map_err(|e| AllocatorError::Corrupt(PENDING_KEY.to_string(), e.to_string()))?;
                Ok(map
                    .into_iter()
                    .filter_map(|(k, v)| k.parse::<u16>().ok().map(|port| (port, v)))
                    .collect())
            }
            None => Ok(HashMap::new()),
        }
    }

    async fn store_available(&self, available: &BTreeSet<u16>) -> AllocatorResult<()> {
        let ports: Vec<u16> = available.iter().copied().collect();
        let bytes = serde_json::to_vec(&ports)
            .map_err(|e| AllocatorError::Corrupt(AVAILABLE_KEY.to_string(), e.to_string()))?;
        self.kv.put(AVAILABLE_KEY, bytes).await?;
        Ok(())
    }

    async fn store_pending(&self, pending: &HashMap<u16, PendingEntry>) -> AllocatorResult<()> {
        let map: HashMap<String, &PendingEntry> =
            pending.iter().map(|(k, v)| (k.to_string(), v)).collect();
        let bytes = serde_json::to_vec(&map)
            .map_err(|e| AllocatorError::Corrupt(PENDING_KEY.to_string(), e.to_string()))?;
        self.kv.put(PENDING_KEY, bytes).await?;
        Ok(())
    }

    /// Reserves up to `n` ports, returning as many as could be found free.
    /// Never blocks past `lock_timeout`; the lock is released in a guard
    /// scope regardless of where the critical section fails, so a partial
    /// write never strands the lock held.
    pub async fn reserve(&self, n: usize, allocated: &HashSet<u16>, now: i64) -> AllocatorResult<Vec<u16>> {
        let mut lock = self.kv.lock(&self.lock_name);
        lock.acquire(self.lock_timeout)
            .await
            .map_err(AllocatorError::Kv)?;

        let result = self.reserve_locked(n, allocated, now).await;

        if let Err(e) = lock.release().await {
            warn!(lock = %self.lock_name, error = %e, "failed to release port allocator lock");
        }

        result
    }

    async fn reserve_locked(&self, n: usize, allocated: &HashSet<u16>, now: i64) -> AllocatorResult<Vec<u16>> {
        let mut pending = self.load_pending().await?;
        let mut available = self.load_available(&pending).await?;

        let free: Vec<u16> = available
            .iter()
            .copied()
            .filter(|p| !allocated.contains(p) && !pending.contains_key(p))
            .take(n)
            .collect();

        if free.is_empty() && n > 0 {
            debug!(range_start = self.range_start, range_end = self.range_end, "no ports free to reserve");
        }

        for &port in &free {
            pending.insert(port, PendingEntry { reserved_at: now.to_string() });
            available.remove(&port);
        }

        self.store_pending(&pending).await?;
        self.store_available(&available).await?;

        Ok(free)
    }

    /// Removes `port` from `pending`. Absent key is a no-op — called on
    /// both the success path (port now lives on a created instance) and
    /// the failure path (pipeline aborted).
    pub async fn release_pending(&self, port: u16) -> AllocatorResult<()> {
        let mut lock = self.kv.lock(&self.lock_name);
        lock.acquire(self.lock_timeout)
            .await
            .map_err(AllocatorError::Kv)?;

        let result = async {
            let mut pending = self.load_pending().await?;
            pending.remove(&port);
            self.store_pending(&pending).await
        }
        .await;

        if let Err(e) = lock.release().await {
            warn!(lock = %self.lock_name, error = %e, "failed to release port allocator lock");
        }

        result
    }

    /// Overwrites `available` from an authoritative snapshot, used at
    /// startup or recovery.
    pub async fn restore_available(&self, ports: impl IntoIterator<Item = u16>) -> AllocatorResult<()> {
        let mut lock = self.kv.lock(&self.lock_name);
        lock.acquire(self.lock_timeout)
            .await
            .map_err(AllocatorError::Kv)?;

        let available: BTreeSet<u16> = ports.into_iter().collect();
        let result = self.store_available(&available).await;

        if let Err(e) = lock.release().await {
            warn!(lock = %self.lock_name, error = %e, "failed to release port allocator lock");
        }

        result
    }

    pub async fn pending_snapshot(&self) -> AllocatorResult<HashMap<u16, String>> {
        Ok(self
            .load_pending()
            .await?
            .into_iter()
            .map(|(port, entry)| (port, entry.reserved_at))
            .collect())
    }

    pub async fn available_snapshot(&self) -> AllocatorResult<BTreeSet<u16>> {
        let pending = self.load_pending().await?;
        self.load_available(&pending).await
    }
}

/// Test-only helper computing the union of available/pending/allocated for
/// checking the Conservation property — not a pipeline operation, a pure
/// function beside the stateful manager in the way
/// `find_next_available_address` sits beside `AddressPoolManager`.
pub fn conserved_set(
    available: &BTreeSet<u16>, pending: &HashMap<u16, String>, allocated: &HashSet<u16>,
) -> BTreeSet<u16> {
    let mut all = available.clone();
    all.extend(pending.keys().copied());
    all.extend(allocated.iter().copied());
    all
}
