//! Storage for issued economic traces.
//!
//! Traces are kept so that callers can reconcile them after execution.
//! Each trace sits behind its own mutex: reconciliations of different
//! traces never contend, and two reconciliations of the same trace are
//! serialized so exactly one of them wins.
//!
//! The in-memory store is bounded. Traces older than the TTL are dropped,
//! and past capacity the oldest trace goes first.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::trace::EconomicTrace;

/// A stored trace with exclusive access for reconciliation.
pub type TraceHandle = Arc<Mutex<EconomicTrace>>;

#[async_trait]
pub trait TraceStore: Send + Sync {
    /// Whether this store persists data across restarts.
    fn is_persistent(&self) -> bool;

    /// Store a newly issued trace.
    async fn insert(&self, trace: EconomicTrace) -> Result<(), String>;

    /// Snapshot of a trace by ID.
    async fn get(&self, id: Uuid) -> Result<Option<EconomicTrace>, String>;

    /// Exclusive handle to a trace, for in-place updates.
    async fn handle(&self, id: Uuid) -> Result<Option<TraceHandle>, String>;

    /// Delete a trace. Returns whether it existed.
    async fn remove(&self, id: Uuid) -> Result<bool, String>;

    /// Drop expired traces. Returns how many were removed.
    async fn purge(&self) -> Result<usize, String>;

    /// Number of stored traces.
    async fn count(&self) -> usize;
}

#[derive(Default)]
struct Traces {
    by_id: HashMap<Uuid, TraceHandle>,
    /// Insertion order, oldest first
    order: VecDeque<(DateTime<Utc>, Uuid)>,
}

/// In-memory trace store (non-persistent).
#[derive(Clone)]
pub struct InMemoryTraceStore {
    traces: Arc<RwLock<Traces>>,
    capacity: usize,
    ttl: Option<Duration>,
}

impl InMemoryTraceStore {
    pub const DEFAULT_CAPACITY: usize = 10_000;
    pub const DEFAULT_TTL_HOURS: u64 = 24;
    /// Longer TTLs are clamped to ten years.
    const MAX_TTL_HOURS: u64 = 24 * 365 * 10;

    pub fn new() -> Self {
        Self::with_limits(Self::DEFAULT_CAPACITY, Some(Self::DEFAULT_TTL_HOURS))
    }

    /// A store holding at most `capacity` traces, each for at most `ttl_hours`.
    ///
    /// `None` or `Some(0)` keeps traces until capacity forces them out.
    pub fn with_limits(capacity: usize, ttl_hours: Option<u64>) -> Self {
        let ttl = ttl_hours
            .filter(|h| *h > 0)
            .map(|h| Duration::hours(h.min(Self::MAX_TTL_HOURS) as i64));
        Self {
            traces: Arc::new(RwLock::new(Traces::default())),
            capacity: capacity.max(1),
            ttl,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Remove expired traces, then the oldest ones beyond capacity.
    fn evict(&self, traces: &mut Traces, now: DateTime<Utc>) -> usize {
        let mut evicted = 0;
        while let Some(&(created_at, id)) = traces.order.front() {
            let expired = self.ttl.is_some_and(|ttl| now - created_at > ttl);
            if !expired && traces.by_id.len() <= self.capacity {
                break;
            }
            traces.order.pop_front();
            if traces.by_id.remove(&id).is_some() {
                evicted += 1;
            }
        }
        evicted
    }
}

impl Default for InMemoryTraceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TraceStore for InMemoryTraceStore {
    fn is_persistent(&self) -> bool {
        false
    }

    async fn insert(&self, trace: EconomicTrace) -> Result<(), String> {
        let id = trace.id();
        let created_at = trace.created_at();
        let mut traces = self.traces.write().await;
        if traces.by_id.contains_key(&id) {
            return Err(format!("Trace {} already exists", id));
        }
        traces.by_id.insert(id, Arc::new(Mutex::new(trace)));
        traces.order.push_back((created_at, id));

        let evicted = self.evict(&mut traces, Utc::now());
        if evicted > 0 {
            tracing::debug!(evicted, remaining = traces.by_id.len(), "Evicted old traces");
        }
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<EconomicTrace>, String> {
        let Some(handle) = self.handle(id).await? else {
            return Ok(None);
        };
        let trace = handle.lock().await;
        Ok(Some(trace.clone()))
    }

    async fn handle(&self, id: Uuid) -> Result<Option<TraceHandle>, String> {
        Ok(self.traces.read().await.by_id.get(&id).cloned())
    }

    async fn remove(&self, id: Uuid) -> Result<bool, String> {
        let mut traces = self.traces.write().await;
        let removed = traces.by_id.remove(&id).is_some();
        if removed {
            traces.order.retain(|(_, queued)| *queued != id);
        }
        Ok(removed)
    }

    async fn purge(&self) -> Result<usize, String> {
        let mut traces = self.traces.write().await;
        Ok(self.evict(&mut traces, Utc::now()))
    }

    async fn count(&self) -> usize {
        self.traces.read().await.by_id.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::{Budget, RateCatalog};
    use crate::economist::Economist;
    use crate::request::RequestPayload;

    fn issue(economist: &Economist) -> EconomicTrace {
        let request = RequestPayload::new("gpt-4o", "hello world")
            .unwrap()
            .with_budget(Budget::unconstrained());
        economist.check_execution(&request).unwrap()
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let economist = Economist::new(RateCatalog::default());
        let store = InMemoryTraceStore::new();
        let trace = issue(&economist);
        let id = trace.id();

        store.insert(trace.clone()).await.unwrap();

        assert_eq!(store.get(id).await.unwrap(), Some(trace.clone()));
        assert_eq!(store.get(Uuid::new_v4()).await.unwrap(), None);
        assert_eq!(store.count().await, 1);
        assert!(store.insert(trace).await.is_err());
    }

    #[tokio::test]
    async fn test_remove() {
        let economist = Economist::new(RateCatalog::default());
        let store = InMemoryTraceStore::new();
        let trace = issue(&economist);
        let id = trace.id();
        store.insert(trace).await.unwrap();

        assert!(store.remove(id).await.unwrap());
        assert!(!store.remove(id).await.unwrap());
        assert_eq!(store.get(id).await.unwrap(), None);
        assert_eq!(store.count().await, 0);
    }

    #[tokio::test]
    async fn test_capacity_evicts_oldest() {
        let economist = Economist::new(RateCatalog::default());
        let store = InMemoryTraceStore::with_limits(3, None);
        let mut ids = Vec::new();
        for _ in 0..5 {
            let trace = issue(&economist);
            ids.push(trace.id());
            store.insert(trace).await.unwrap();
        }

        assert_eq!(store.count().await, 3);
        assert_eq!(store.get(ids[0]).await.unwrap(), None);
        assert_eq!(store.get(ids[1]).await.unwrap(), None);
        for id in &ids[2..] {
            assert!(store.get(*id).await.unwrap().is_some());
        }
    }

    #[tokio::test]
    async fn test_purge_drops_expired_traces() {
        let economist = Economist::new(RateCatalog::default());
        let store = InMemoryTraceStore::with_limits(10, Some(1));
        let fresh = issue(&economist);
        let fresh_id = fresh.id();
        store.insert(fresh).await.unwrap();

        // Backdate a queued entry past the TTL
        let stale = issue(&economist);
        let stale_id = stale.id();
        {
            let mut traces = store.traces.write().await;
            traces.by_id.insert(stale_id, Arc::new(Mutex::new(stale)));
            traces.order.push_front((Utc::now() - Duration::hours(2), stale_id));
        }
        assert_eq!(store.count().await, 2);

        assert_eq!(store.purge().await.unwrap(), 1);
        assert_eq!(store.get(stale_id).await.unwrap(), None);
        assert!(store.get(fresh_id).await.unwrap().is_some());
        assert_eq!(store.purge().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_reconcile_has_one_winner() {
        let economist = Arc::new(Economist::new(RateCatalog::default()));
        let store = InMemoryTraceStore::new();
        let trace = issue(&economist);
        let id = trace.id();
        store.insert(trace).await.unwrap();

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                let economist = Arc::clone(&economist);
                tokio::spawn(async move {
                    let handle = store.handle(id).await.unwrap().unwrap();
                    let mut trace = handle.lock().await;
                    let actual = crate::budget::CostEstimate::new(0.001, 100, 10).unwrap();
                    economist.reconcile(&mut trace, actual).is_ok()
                })
            })
            .collect();

        let mut wins = 0;
        for task in tasks {
            if task.await.unwrap() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
        assert!(store.get(id).await.unwrap().unwrap().is_reconciled());
    }
}
