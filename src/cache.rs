//! In-memory response cache with TTL expiry and least-recently-used eviction.

use std::collections::HashMap;
use std::time::Instant;

use parking_lot::{Mutex, MutexGuard};

use crate::{CacheConfig, HttpResponse};

/// Entry-count bound applied before every insertion.
pub const DEFAULT_CACHE_CAPACITY: usize = 100;

#[derive(Clone, Debug)]
struct CacheEntry {
    response: HttpResponse,
    inserted_at: Instant,
    last_used: u64,
}

struct CacheState {
    entries: HashMap<String, CacheEntry>,
    tick: u64,
}

impl CacheState {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }
}

/// Thread-safe key to response map shared by every caller of a client.
pub struct ResponseCache {
    state: Mutex<CacheState>,
    capacity: usize,
}

impl ResponseCache {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CACHE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                tick: 0,
            }),
            capacity: capacity.max(1),
        }
    }

    fn state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock()
    }

    /// Returns a fresh cached response for `key`, or `None`.
    ///
    /// `NoCache` and `NetworkOnly` always miss. An expired entry is evicted.
    pub fn lookup(&self, key: &str, config: &CacheConfig) -> Option<HttpResponse> {
        self.lookup_at(key, config, Instant::now())
    }

    pub(crate) fn lookup_at(
        &self,
        key: &str,
        config: &CacheConfig,
        now: Instant,
    ) -> Option<HttpResponse> {
        if !config.strategy.reads_cache() {
            return None;
        }

        let mut state = self.state();
        let inserted_at = state.entries.get(key)?.inserted_at;
        if now.saturating_duration_since(inserted_at) > config.max_age() {
            state.entries.remove(key);
            #[cfg(feature = "tracing")]
            tracing::debug!(key, "evicted expired cache entry");
            return None;
        }

        let tick = state.next_tick();
        let entry = state.entries.get_mut(key)?;
        entry.last_used = tick;
        Some(entry.response.clone())
    }

    /// Stores `response` under `key` unless the strategy is `NoCache`.
    ///
    /// When the cache is full the least recently used entry is evicted first.
    pub fn store(&self, key: &str, response: &HttpResponse, config: &CacheConfig) {
        self.store_at(key, response, config, Instant::now());
    }

    pub(crate) fn store_at(
        &self,
        key: &str,
        response: &HttpResponse,
        config: &CacheConfig,
        now: Instant,
    ) {
        if !config.strategy.writes_cache() {
            return;
        }

        let mut state = self.state();
        if !state.entries.contains_key(key) && state.entries.len() >= self.capacity {
            let oldest = state
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(key, _)| key.clone());
            if let Some(oldest) = oldest {
                state.entries.remove(&oldest);
                #[cfg(feature = "tracing")]
                tracing::debug!(key = %oldest, "evicted least recently used cache entry");
            }
        }

        let last_used = state.next_tick();
        state.entries.insert(
            key.to_owned(),
            CacheEntry {
                response: response.clone(),
                inserted_at: now,
                last_used,
            },
        );
    }

    pub fn contains(&self, key: &str) -> bool {
        self.state().entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&self) {
        self.state().entries.clear();
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new()
    }
}
