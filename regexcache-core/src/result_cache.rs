//  Copyright 2024 regexcache contributors
//
//  Licensed under the Apache License, Version 2.0 (the "License");
//  you may not use this file except in compliance with the License.
//  You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0
//
//  Unless required by applicable law or agreed to in writing, software
//  distributed under the License is distributed on an "AS IS" BASIS,
//  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//  See the License for the specific language governing permissions and
//  limitations under the License.

//! The Pattern Result Cache (§4.2): caches match outcomes keyed by
//! `(pattern descriptor, input, operation)`, independent of whether the
//! backing compiled program is still `LIVE`.
//!
//! Unlike the Pattern Compilation Cache this tier never refcounts entries —
//! a result is a plain value, not a handle to an engine resource — so
//! eviction here can simply drop an entry with no deferred-reclaim step.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::RwLock;
use rand::seq::IteratorRandom;
use regexcache_common::metrics::CacheCounters;
use regexcache_common::{Fingerprint, LockOrderGuard};

use crate::descriptor::{OpKind, PatternDescriptor};
use crate::engine::Span;
use crate::handle::Clock;

/// §3: the Pattern Result Cache key. Combines the pattern descriptor's
/// fingerprint with a fingerprint of the input and the operation kind, so
/// two operations over the same `(pattern, input)` never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResultKey(u128);

impl ResultKey {
    pub fn new(descriptor: &PatternDescriptor, input: &str, op: OpKind) -> Self {
        let pattern_fp = descriptor.fingerprint();
        let input_fp = Fingerprint::of(&input);
        let op_fp = Fingerprint::of(&(op as u8));
        Self(pattern_fp.combine(input_fp).combine(op_fp).as_u128())
    }
}

/// A cached match outcome. Cloned out on every lookup, so kept small;
/// spans reference byte offsets into whatever input the caller re-supplies.
#[derive(Debug, Clone)]
pub enum CachedResult {
    Bool(bool),
    Spans(Vec<Option<Span>>),
    SpanGroups(Vec<Vec<Option<Span>>>),
}

struct Entry {
    value: CachedResult,
    last_used_nanos: std::sync::atomic::AtomicU64,
    created_at_nanos: u64,
}

/// The Pattern Result Cache. Disabled entirely (every `lookup` misses, every
/// `insert` is a no-op) when `capacity == 0`, matching §4.2's default.
pub struct ResultCache {
    map: RwLock<HashMap<ResultKey, Entry>>,
    capacity: usize,
    pub counters: CacheCounters,
    clock: Clock,
}

impl ResultCache {
    pub fn new(capacity: usize) -> Self {
        let counters = CacheCounters::default();
        counters.capacity.store(capacity, Ordering::Relaxed);
        Self { map: RwLock::new(HashMap::new()), capacity, counters, clock: Clock::new() }
    }

    pub fn is_enabled(&self) -> bool {
        self.capacity > 0
    }

    pub fn len(&self) -> usize {
        let _order = LockOrderGuard::acquire();
        self.map.read().len()
    }

    pub fn lookup(&self, key: ResultKey) -> Option<CachedResult> {
        if !self.is_enabled() {
            return None;
        }
        let _order = LockOrderGuard::acquire();
        let guard = self.map.read();
        match guard.get(&key) {
            Some(entry) => {
                entry.last_used_nanos.store(self.clock.now_nanos(), Ordering::Relaxed);
                self.counters.record_hit();
                tracing::debug!("result cache hit");
                Some(entry.value.clone())
            }
            None => {
                self.counters.record_miss();
                tracing::debug!("result cache miss");
                None
            }
        }
    }

    /// Insert a freshly computed result. If at or over capacity, evicts one
    /// sampled LRU victim first (§4.2 Policy) rather than refusing the
    /// insert — the cache stays full rather than degrading to a no-op tier.
    pub fn insert(&self, key: ResultKey, value: CachedResult) {
        if !self.is_enabled() {
            return;
        }
        let now = self.clock.now_nanos();
        let _order = LockOrderGuard::acquire();
        let mut guard = self.map.write();
        if guard.len() >= self.capacity && !guard.contains_key(&key) {
            if let Some(victim) = sample_lru_key(&guard, DEFAULT_EVICTION_SAMPLE) {
                guard.remove(&victim);
                self.counters.evictions_lru.fetch_add(1, Ordering::Relaxed);
            }
        }
        guard.insert(
            key,
            Entry { value, last_used_nanos: std::sync::atomic::AtomicU64::new(now), created_at_nanos: now },
        );
    }

    pub fn clear(&self) {
        let _order = LockOrderGuard::acquire();
        let mut guard = self.map.write();
        let cleared = guard.len();
        guard.clear();
        if cleared > 0 {
            self.counters.evictions_lru.fetch_add(cleared as u64, Ordering::Relaxed);
        }
    }

    /// Evict entries idle for at least `idle_timeout_nanos` (§4.4 step 2).
    /// `0` disables idle eviction.
    pub fn evict_idle(&self, idle_timeout_nanos: u64) -> usize {
        if idle_timeout_nanos == 0 {
            return 0;
        }
        let now = self.clock.now_nanos();
        let _order = LockOrderGuard::acquire();
        let mut guard = self.map.write();
        let before = guard.len();
        guard.retain(|_, entry| now.saturating_sub(entry.last_used_nanos.load(Ordering::Relaxed)) < idle_timeout_nanos);
        let evicted = before - guard.len();
        if evicted > 0 {
            self.counters.evictions_idle.fetch_add(evicted as u64, Ordering::Relaxed);
        }
        evicted
    }

    /// Sampled-LRU sweep over capacity (§4.4 step 1), mirroring the pattern
    /// cache's policy but without any protection window or refcounting —
    /// there is nothing here that can be "in use".
    pub fn evict_lru_over_capacity(&self, sample_size: usize) -> usize {
        if !self.is_enabled() {
            return 0;
        }
        let mut evicted = 0;
        let _order = LockOrderGuard::acquire();
        let mut guard = self.map.write();
        while guard.len() > self.capacity {
            match sample_lru_key(&guard, sample_size) {
                Some(victim) => {
                    guard.remove(&victim);
                    evicted += 1;
                }
                None => break,
            }
        }
        if evicted > 0 {
            self.counters.evictions_lru.fetch_add(evicted as u64, Ordering::Relaxed);
        }
        evicted
    }
}

const DEFAULT_EVICTION_SAMPLE: usize = 16;

fn sample_lru_key(map: &HashMap<ResultKey, Entry>, sample_size: usize) -> Option<ResultKey> {
    let mut rng = rand::thread_rng();
    map.keys()
        .choose_multiple(&mut rng, sample_size.min(map.len()))
        .into_iter()
        .min_by_key(|k| map[k].last_used_nanos.load(Ordering::Relaxed))
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::PatternOptions;

    fn descriptor() -> PatternDescriptor {
        PatternDescriptor::new("abc", PatternOptions::default())
    }

    #[test]
    fn disabled_cache_never_stores_anything() {
        let cache = ResultCache::new(0);
        let key = ResultKey::new(&descriptor(), "input", OpKind::FullMatch);
        cache.insert(key, CachedResult::Bool(true));
        assert!(cache.lookup(key).is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn hit_after_insert() {
        let cache = ResultCache::new(10);
        let key = ResultKey::new(&descriptor(), "input", OpKind::FullMatch);
        cache.insert(key, CachedResult::Bool(true));
        match cache.lookup(key) {
            Some(CachedResult::Bool(b)) => assert!(b),
            other => panic!("expected cached bool, got {other:?}"),
        }
    }

    #[test]
    fn distinct_ops_over_same_pattern_and_input_do_not_collide() {
        let d = descriptor();
        let full = ResultKey::new(&d, "input", OpKind::FullMatch);
        let partial = ResultKey::new(&d, "input", OpKind::PartialMatch);
        assert_ne!(full, partial);
    }

    #[test]
    fn eviction_keeps_cache_at_capacity() {
        let cache = ResultCache::new(4);
        for i in 0..20 {
            let d = PatternDescriptor::new(format!("p{i}"), PatternOptions::default());
            let key = ResultKey::new(&d, "input", OpKind::FullMatch);
            cache.insert(key, CachedResult::Bool(true));
        }
        assert!(cache.len() <= 4);
    }

    #[test]
    fn idle_eviction_removes_old_entries_only() {
        let cache = ResultCache::new(10);
        let key = ResultKey::new(&descriptor(), "input", OpKind::FullMatch);
        cache.insert(key, CachedResult::Bool(true));
        assert_eq!(cache.evict_idle(0), 0);
        let evicted = cache.evict_idle(u64::MAX);
        assert_eq!(evicted, 0); // fresh entry: elapsed nanos is tiny, never >= u64::MAX
    }

    impl std::fmt::Debug for CachedResult {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                CachedResult::Bool(b) => write!(f, "Bool({b})"),
                CachedResult::Spans(s) => write!(f, "Spans({s:?})"),
                CachedResult::SpanGroups(g) => write!(f, "SpanGroups({g:?})"),
            }
        }
    }

    impl PartialEq for CachedResult {
        fn eq(&self, other: &Self) -> bool {
            match (self, other) {
                (CachedResult::Bool(a), CachedResult::Bool(b)) => a == b,
                (CachedResult::Spans(a), CachedResult::Spans(b)) => a == b,
                (CachedResult::SpanGroups(a), CachedResult::SpanGroups(b)) => a == b,
                _ => false,
            }
        }
    }
}
