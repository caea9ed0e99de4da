//! TTL + LRU page cache with single-flight loading
//!
//! Every mutation happens under one mutex. A miss in [`Cache::get_or_load`]
//! registers an in-flight marker for its key before the lock is released, so
//! concurrent callers for the same key await the same load instead of
//! starting their own. The load runs on its own task: it finishes and fills
//! the cache even if every caller gives up waiting.

use crate::error::SourceError;
use crate::models::{CacheKey, ContentItem};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

/// A cached page. Shared so a hit never copies the list.
pub type Items = Arc<Vec<ContentItem>>;

pub type LoadResult = Result<Items, SourceError>;

type InFlight = Shared<BoxFuture<'static, LoadResult>>;

struct CacheEntry {
    items: Items,
    inserted_at: Instant,
    last_accessed: Instant,
    /// Logical clock values; instants can tie
    inserted_seq: u64,
    accessed_seq: u64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    /// Callers that waited on a load another caller started
    pub coalesced: u64,
    pub loads: u64,
    pub evictions: u64,
    pub expirations: u64,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<CacheKey, CacheEntry>,
    in_flight: HashMap<CacheKey, InFlight>,
    tick: u64,
    stats: CacheStats,
}

impl CacheState {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }
}

#[derive(Clone)]
pub struct Cache {
    state: Arc<Mutex<CacheState>>,
    max_entries: usize,
    ttl: Duration,
}

impl Cache {
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(CacheState::default())),
            max_entries: max_entries.max(1),
            ttl,
        }
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_expired(&self, entry: &CacheEntry, now: Instant) -> bool {
        now.duration_since(entry.inserted_at) > self.ttl
    }

    /// Hit refreshes recency; an expired entry is removed and reads as a miss
    fn lookup(&self, state: &mut CacheState, key: &CacheKey) -> Option<Items> {
        let now = Instant::now();
        let tick = state.next_tick();

        let expired = match state.entries.get_mut(key) {
            Some(entry) if !self.is_expired(entry, now) => {
                entry.last_accessed = now;
                entry.accessed_seq = tick;
                state.stats.hits += 1;
                return Some(entry.items.clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            state.entries.remove(key);
            state.stats.expirations += 1;
            log::debug!("Cache entry {} expired", key);
        }
        state.stats.misses += 1;
        None
    }

    /// Cached items for `key`, if present and fresh. Never loads.
    pub fn get(&self, key: &CacheKey) -> Option<Items> {
        let mut guard = self.lock();
        self.lookup(&mut guard, key)
    }

    /// Store `items` under `key`, evicting as needed
    pub fn insert(&self, key: CacheKey, items: Vec<ContentItem>) -> Items {
        let items = Arc::new(items);
        let mut guard = self.lock();
        self.insert_locked(&mut guard, key, items.clone());
        items
    }

    fn insert_locked(&self, state: &mut CacheState, key: CacheKey, items: Items) {
        let now = Instant::now();
        self.purge_locked(state, now);

        let tick = state.next_tick();
        state.entries.insert(
            key,
            CacheEntry {
                items,
                inserted_at: now,
                last_accessed: now,
                inserted_seq: tick,
                accessed_seq: tick,
            },
        );

        while state.entries.len() > self.max_entries {
            let victim = state
                .entries
                .iter()
                .min_by_key(|(_, entry)| (entry.accessed_seq, entry.inserted_seq))
                .map(|(key, _)| key.clone());

            match victim {
                Some(victim) => {
                    state.entries.remove(&victim);
                    state.stats.evictions += 1;
                    log::debug!("Evicted cache entry {}", victim);
                }
                None => break,
            }
        }
    }

    fn purge_locked(&self, state: &mut CacheState, now: Instant) -> usize {
        let before = state.entries.len();
        let ttl = self.ttl;
        state
            .entries
            .retain(|_, entry| now.duration_since(entry.inserted_at) <= ttl);
        let purged = before - state.entries.len();
        state.stats.expirations += purged as u64;
        purged
    }

    /// Remove every expired entry, returning how many went
    pub fn purge_expired(&self) -> usize {
        let mut guard = self.lock();
        let purged = self.purge_locked(&mut guard, Instant::now());
        if purged > 0 {
            log::debug!("Purged {} expired cache entries", purged);
        }
        purged
    }

    /// Cached items for `key`, or the result of `loader`.
    ///
    /// Only the first caller on a miss invokes `loader`; everyone arriving
    /// while it runs gets the same outcome. Failures are handed to all
    /// waiters and never stored.
    pub async fn get_or_load<F, Fut>(&self, key: CacheKey, loader: F) -> LoadResult
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<ContentItem>, SourceError>> + Send + 'static,
    {
        let pending = {
            let mut guard = self.lock();
            let state = &mut *guard;

            if let Some(items) = self.lookup(state, &key) {
                return Ok(items);
            }

            match state.in_flight.get(&key) {
                Some(pending) => {
                    state.stats.coalesced += 1;
                    log::debug!("Joining in-flight load for {}", key);
                    pending.clone()
                }
                None => {
                    state.stats.loads += 1;
                    let pending = self.start_load(key.clone(), loader());
                    state.in_flight.insert(key, pending.clone());
                    pending
                }
            }
        };

        pending.await
    }

    fn start_load<Fut>(&self, key: CacheKey, load: Fut) -> InFlight
    where
        Fut: Future<Output = Result<Vec<ContentItem>, SourceError>> + Send + 'static,
    {
        let cache = self.clone();
        let handle = tokio::spawn(async move {
            let mut marker = InFlightMarker {
                cache: cache.clone(),
                key: Some(key.clone()),
            };

            let result = load.await.map(Arc::new);

            let mut guard = cache.lock();
            guard.in_flight.remove(&key);
            marker.key = None;
            if let Ok(items) = &result {
                cache.insert_locked(&mut guard, key, items.clone());
            }
            result
        });

        async move {
            match handle.await {
                Ok(result) => result,
                Err(e) => Err(SourceError::Internal(e.to_string())),
            }
        }
        .boxed()
        .shared()
    }

    pub fn stats(&self) -> CacheStats {
        let guard = self.lock();
        CacheStats {
            entries: guard.entries.len(),
            ..guard.stats
        }
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a load for `key` is currently running
    pub fn is_loading(&self, key: &CacheKey) -> bool {
        self.lock().in_flight.contains_key(key)
    }

    /// When `key` was last read or written
    pub fn last_accessed(&self, key: &CacheKey) -> Option<Instant> {
        self.lock().entries.get(key).map(|entry| entry.last_accessed)
    }
}

/// Clears the in-flight marker if a load task unwinds before finishing
struct InFlightMarker {
    cache: Cache,
    key: Option<CacheKey>,
}

impl Drop for InFlightMarker {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.cache.lock().in_flight.remove(&key);
        }
    }
}
