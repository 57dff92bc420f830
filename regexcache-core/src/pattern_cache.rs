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

//! The Pattern Compilation Cache (§4.1): compiles each descriptor at most
//! once while `LIVE`, single-flighting concurrent misses, and handing
//! referenced evictees to the Deferred Cache.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Condvar, Mutex, RwLock};
use rand::seq::IteratorRandom;
use regexcache_common::metrics::PatternCounters;
use regexcache_common::{CacheError, ErrorKind, LockOrderGuard};

use crate::config::{MapImpl, PatternCacheConfig};
use crate::deferred_cache::DeferredCache;
use crate::descriptor::PatternDescriptor;
use crate::engine::{self, Program};
use crate::handle::{Clock, CompileOutcome, CompiledPattern, Membership};

/// How long a negative-cache (`COMPILE_FAILED`) marker is honored before a
/// retry is allowed to recompile. Fixed rather than independently
/// configurable — see the Open Question resolution in SPEC_FULL.md §9.
const NEGATIVE_CACHE_TTL_NANOS: u64 = 1_000_000_000;

enum Map {
    Rwlock(RwLock<HashMap<PatternDescriptor, Arc<CompiledPattern>>>),
    Concurrent(DashMap<PatternDescriptor, Arc<CompiledPattern>>),
}

impl Map {
    fn new(impl_: MapImpl) -> Self {
        match impl_ {
            MapImpl::Rwlock => Map::Rwlock(RwLock::new(HashMap::new())),
            MapImpl::Concurrent => Map::Concurrent(DashMap::new()),
        }
    }

    fn get(&self, key: &PatternDescriptor) -> Option<Arc<CompiledPattern>> {
        let _order = LockOrderGuard::acquire();
        match self {
            Map::Rwlock(m) => m.read().get(key).cloned(),
            Map::Concurrent(m) => m.get(key).map(|e| e.clone()),
        }
    }

    fn insert(&self, key: PatternDescriptor, value: Arc<CompiledPattern>) {
        let _order = LockOrderGuard::acquire();
        match self {
            Map::Rwlock(m) => {
                m.write().insert(key, value);
            }
            Map::Concurrent(m) => {
                m.insert(key, value);
            }
        }
    }

    fn len(&self) -> usize {
        let _order = LockOrderGuard::acquire();
        match self {
            Map::Rwlock(m) => m.read().len(),
            Map::Concurrent(m) => m.len(),
        }
    }

    /// Snapshot of `(descriptor, entry)` pairs, used for sampled-LRU victim
    /// selection and idle scanning. Cloning the `Arc`s here means the scan
    /// never holds the map lock while policy decisions are made.
    fn snapshot(&self) -> Vec<(PatternDescriptor, Arc<CompiledPattern>)> {
        let _order = LockOrderGuard::acquire();
        match self {
            Map::Rwlock(m) => m.read().iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            Map::Concurrent(m) => m.iter().map(|e| (e.key().clone(), e.value().clone())).collect(),
        }
    }

    /// Remove `key` only if it still maps to the same entry (`Arc::ptr_eq`).
    /// Used by eviction and negative-cache expiry to avoid erasing an entry
    /// that was replaced since it was observed.
    fn remove_if_same(&self, key: &PatternDescriptor, expected: &Arc<CompiledPattern>) -> Option<Arc<CompiledPattern>> {
        let _order = LockOrderGuard::acquire();
        match self {
            Map::Rwlock(m) => {
                let mut guard = m.write();
                match guard.get(key) {
                    Some(current) if Arc::ptr_eq(current, expected) => guard.remove(key),
                    _ => None,
                }
            }
            Map::Concurrent(m) => {
                let mut hit = false;
                m.remove_if_mut(key, |_, v| {
                    hit = Arc::ptr_eq(v, expected);
                    hit
                });
                if hit { Some(expected.clone()) } else { None }
            }
        }
    }

    fn drain_all(&self) -> Vec<Arc<CompiledPattern>> {
        let _order = LockOrderGuard::acquire();
        match self {
            Map::Rwlock(m) => m.write().drain().map(|(_, v)| v).collect(),
            Map::Concurrent(m) => {
                let keys: Vec<_> = m.iter().map(|e| e.key().clone()).collect();
                keys.into_iter().filter_map(|k| m.remove(&k)).map(|(_, v)| v).collect()
            }
        }
    }
}

/// A one-shot broadcast of a single-flighted compilation's outcome to every
/// caller that arrived while it was in progress.
struct InFlight {
    result: Mutex<Option<Result<Arc<CompiledPattern>, CacheError>>>,
    cvar: Condvar,
}

impl InFlight {
    fn new() -> Self {
        Self { result: Mutex::new(None), cvar: Condvar::new() }
    }

    fn publish(&self, result: Result<Arc<CompiledPattern>, CacheError>) {
        *self.result.lock() = Some(result);
        self.cvar.notify_all();
    }

    fn wait(&self) -> Result<Arc<CompiledPattern>, CacheError> {
        let mut guard = self.result.lock();
        loop {
            if let Some(result) = guard.as_ref() {
                return result.clone();
            }
            self.cvar.wait(&mut guard);
        }
    }
}

/// A balanced `acquire`; `Drop` releases it exactly once.
pub struct PatternHandle {
    cache: Arc<PatternCache>,
    entry: Arc<CompiledPattern>,
    released: AtomicBool,
}

impl PatternHandle {
    pub fn program(&self) -> &Program {
        // Only constructed over a successful compilation; see `acquire`.
        self.entry.outcome.program().expect("handle always wraps a compiled program")
    }

    pub fn descriptor(&self) -> &PatternDescriptor {
        &self.entry.descriptor
    }

    pub fn refs(&self) -> usize {
        self.entry.refs()
    }

    /// Explicit release. Double-release is a logged `MISUSE`, not fatal
    /// (§6.2); `Drop` calls this too, so using either alone is enough.
    pub fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            tracing::warn!(pattern = %self.entry.descriptor.pattern, "double-release on pattern handle");
            return;
        }
        self.cache.release_entry(&self.entry);
    }
}

impl Drop for PatternHandle {
    fn drop(&mut self) {
        self.release();
    }
}

pub struct PatternCache {
    map: Map,
    inflight: Mutex<HashMap<PatternDescriptor, Arc<InFlight>>>,
    pub counters: PatternCounters,
    pub config: PatternCacheConfig,
    clock: Clock,
    deferred_cache: Arc<DeferredCache>,
}

impl PatternCache {
    /// `deferred_cache` is shared with the background engine so that a
    /// `release` which drops a `DEFERRED` entry's refcount to zero can
    /// reclaim it immediately (§4.1/§5) rather than waiting for the next
    /// sweep.
    pub fn new(config: PatternCacheConfig, deferred_cache: Arc<DeferredCache>) -> Arc<Self> {
        let counters = PatternCounters::default();
        counters.base.capacity.store(config.capacity, Ordering::Relaxed);
        Arc::new(Self {
            map: Map::new(config.map_impl),
            inflight: Mutex::new(HashMap::new()),
            counters,
            config,
            clock: Clock::new(),
            deferred_cache,
        })
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// §8 Boundary behaviors: `capacity == 0` disables the cache entirely —
    /// `acquire` still compiles on every call but never inserts into the
    /// live map, mirroring `ResultCache::is_enabled()`.
    pub fn is_enabled(&self) -> bool {
        self.config.capacity > 0
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    fn validate_pattern_length(descriptor: &PatternDescriptor, max_pattern_length: usize) -> Result<(), CacheError> {
        if descriptor.pattern.len() > max_pattern_length {
            return Err(CacheError::PatternTooLarge { limit: max_pattern_length, actual: descriptor.pattern.len() });
        }
        Ok(())
    }

    /// §4.1 `acquire`: single-flighted compile-or-fetch, returning a
    /// refcounted handle on success.
    pub fn acquire(
        self_: &Arc<Self>,
        descriptor: &PatternDescriptor,
        max_pattern_length: usize,
    ) -> Result<Arc<PatternHandle>, CacheError> {
        Self::validate_pattern_length(descriptor, max_pattern_length)?;

        if let Some(entry) = self_.map.get(descriptor) {
            if let Some(result) = self_.resolve_existing(self_, descriptor, &entry) {
                return result;
            }
            // negative entry expired; fall through to recompile
        }

        enum Role {
            Winner(Arc<InFlight>),
            Waiter(Arc<InFlight>),
        }

        let role = {
            let _order = LockOrderGuard::acquire();
            let mut inflight = self_.inflight.lock();
            if let Some(existing) = inflight.get(descriptor) {
                Role::Waiter(existing.clone())
            } else {
                let marker = Arc::new(InFlight::new());
                inflight.insert(descriptor.clone(), marker.clone());
                Role::Winner(marker)
            }
        };

        match role {
            Role::Winner(marker) => self_.compile_and_publish(self_, descriptor, &marker),
            Role::Waiter(marker) => {
                self_.counters.base.record_miss();
                let entry = marker.wait()?;
                Ok(self_.wrap(self_, entry, true))
            }
        }
    }

    /// `entry` was found in the live map: return `Some(hit-or-cached-error)`,
    /// or `None` to signal "treat as miss and recompile" (an expired
    /// negative-cache entry).
    fn resolve_existing(
        &self,
        self_: &Arc<Self>,
        descriptor: &PatternDescriptor,
        entry: &Arc<CompiledPattern>,
    ) -> Option<Result<Arc<PatternHandle>, CacheError>> {
        match &entry.outcome {
            CompileOutcome::Compiled(_) => {
                self.counters.base.record_hit();
                tracing::debug!(pattern = %descriptor.pattern, "pattern cache hit");
                Some(Ok(self.wrap(self_, entry.clone(), true)))
            }
            CompileOutcome::Failed(err) => {
                if entry.age_nanos(&self.clock) <= NEGATIVE_CACHE_TTL_NANOS {
                    self.counters.base.record_hit();
                    tracing::debug!(pattern = %descriptor.pattern, "negative-cache hit, suppressing recompile");
                    Some(Err(err.clone()))
                } else {
                    self.map.remove_if_same(descriptor, entry);
                    None
                }
            }
        }
    }

    fn wrap(&self, self_: &Arc<Self>, entry: Arc<CompiledPattern>, touch: bool) -> Arc<PatternHandle> {
        if touch {
            entry.touch(&self.clock);
        }
        entry.inc_refs();
        self.counters.observe_refcount_delta(1);
        Arc::new(PatternHandle { cache: self_.clone(), entry, released: AtomicBool::new(false) })
    }

    fn compile_and_publish(
        &self,
        self_: &Arc<Self>,
        descriptor: &PatternDescriptor,
        marker: &Arc<InFlight>,
    ) -> Result<Arc<PatternHandle>, CacheError> {
        self.counters.base.record_miss();
        tracing::debug!(pattern = %descriptor.pattern, "pattern cache miss, compiling");

        // Never hold a cache lock while calling into the engine (§5).
        let outcome = match engine::compile_program(descriptor) {
            Ok(program) => {
                self.counters.compilations_succeeded.fetch_add(1, Ordering::Relaxed);
                CompileOutcome::Compiled(program)
            }
            Err(err) => {
                self.counters.compilations_failed.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(pattern = %descriptor.pattern, error = %err, "pattern compilation failed");
                CompileOutcome::Failed(err)
            }
        };
        let failed = outcome.is_failed();
        let entry = Arc::new(CompiledPattern::new(descriptor.clone(), outcome, &self.clock));

        // The winner publishes to the live map before releasing its
        // in-flight marker, so any caller arriving after this point takes
        // the ordinary hit path instead of needing to find a waiter queue.
        // §8 Boundary behaviors: capacity=0 disables the cache entirely —
        // this acquire still compiles, but the entry never becomes
        // reachable from the live map for a later acquire to hit.
        if self.is_enabled() {
            self.map.insert(descriptor.clone(), entry.clone());
        }
        {
            let _order = LockOrderGuard::acquire();
            self.inflight.lock().remove(descriptor);
        }

        if failed {
            let err = match &entry.outcome {
                CompileOutcome::Failed(e) => e.clone(),
                CompileOutcome::Compiled(_) => unreachable!(),
            };
            marker.publish(Err(err.clone()));
            Err(err)
        } else {
            let handle = self.wrap(self_, entry.clone(), false);
            marker.publish(Ok(entry));
            Ok(handle)
        }
    }

    /// §4.1 `release`: decrement the refcount and, if this was the last
    /// reference to an entry already evicted into `DEFERRED`, reclaim it on
    /// the spot (§5: "release... may block briefly... on the destruction of
    /// the compiled program") rather than leaving it for the next sweep.
    pub fn release_entry(&self, entry: &Arc<CompiledPattern>) {
        let remaining = entry.dec_refs();
        self.counters.observe_refcount_delta(-1);
        if remaining == 0 && entry.membership() == Membership::Deferred {
            self.deferred_cache.try_reclaim_one(entry);
        }
    }

    pub fn lookup_stats(&self, descriptor: &PatternDescriptor) -> Option<PatternStats> {
        self.map.get(descriptor).map(|entry| PatternStats {
            refcount: entry.refs(),
            last_used_nanos: entry.last_used_nanos(),
            size: entry.outcome.program().map(Program::size_bytes).unwrap_or(0),
            groups: entry.outcome.program().map(Program::num_capturing_groups).unwrap_or(0),
            is_literal: entry.descriptor.is_literal(),
            compiled: entry.outcome.program().is_some(),
        })
    }

    /// §4.1 `clear`: atomically move all `LIVE` entries out; the caller
    /// (`Core`) hands each to the deferred cache.
    pub fn clear(&self) -> Vec<Arc<CompiledPattern>> {
        self.map.drain_all()
    }

    /// Sampled-LRU victim selection (§4.1 Policy): a random sample of size
    /// `k` (capped at cache size), sorted by last-used ascending, filtered
    /// by the eviction protection window. Also counts (and records in
    /// `evictions_skipped_protected`) every sampled entry the protection
    /// window excluded, since those are candidates the policy considered and
    /// explicitly declined to evict (§4.6 requires the count be visible).
    pub fn sample_lru_victims(&self, k: usize, protection_nanos: u64) -> Vec<(PatternDescriptor, Arc<CompiledPattern>)> {
        let snapshot = self.map.snapshot();
        let sample_size = k.min(snapshot.len());
        let mut rng = rand::thread_rng();
        let mut sample: Vec<_> = snapshot.into_iter().choose_multiple(&mut rng, sample_size);
        sample.sort_by_key(|(_, entry)| entry.last_used_nanos());
        let (victims, skipped): (Vec<_>, Vec<_>) =
            sample.into_iter().partition(|(_, entry)| entry.age_nanos(&self.clock) >= protection_nanos);
        if !skipped.is_empty() {
            self.counters.base.evictions_skipped_protected.fetch_add(skipped.len() as u64, Ordering::Relaxed);
        }
        victims
    }

    /// Entries idle for at least `idle_timeout_nanos`. `0` disables idle
    /// eviction entirely.
    pub fn idle_candidates(&self, idle_timeout_nanos: u64) -> Vec<(PatternDescriptor, Arc<CompiledPattern>)> {
        if idle_timeout_nanos == 0 {
            return Vec::new();
        }
        self.map
            .snapshot()
            .into_iter()
            .filter(|(_, entry)| entry.idle_nanos(&self.clock) >= idle_timeout_nanos)
            .collect()
    }

    /// Evict `descriptor` from `LIVE`, re-checking under the erase that it
    /// is still the sampled entry (§4.4 Ordering guarantees). Returns `None`
    /// if nothing was evicted (already replaced or removed); otherwise the
    /// outcome for the removed entry.
    pub fn evict_live(&self, descriptor: &PatternDescriptor, expected: &Arc<CompiledPattern>) -> Option<EvictOutcome> {
        let removed = self.map.remove_if_same(descriptor, expected)?;
        if removed.refs() > 0 {
            Some(EvictOutcome::StillReferenced(removed))
        } else {
            Some(EvictOutcome::Dropped)
        }
    }
}

pub enum EvictOutcome {
    /// Evicted from `LIVE` but still referenced; must move to the deferred
    /// cache rather than being destroyed.
    StillReferenced(Arc<CompiledPattern>),
    /// Evicted from `LIVE` with no outstanding references; safe to drop.
    Dropped,
}

#[derive(Debug, Clone)]
pub struct PatternStats {
    pub refcount: usize,
    pub last_used_nanos: u64,
    pub size: usize,
    pub groups: usize,
    pub is_literal: bool,
    pub compiled: bool,
}
