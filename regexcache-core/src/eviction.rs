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

//! The Background Eviction Engine (§4.4/§5): one dedicated OS thread that
//! periodically sweeps every tier. No cooperative scheduler, no event loop —
//! a `JoinHandle` plus a `parking_lot::Condvar` for cancellation, exactly
//! the primitive the concurrency model calls for.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use regexcache_common::metrics::BackgroundCounters;

use crate::config::{Config, DeferredCacheConfig, EvictionConfig, ResultCacheConfig};
use crate::deferred_cache::DeferredCache;
use crate::pattern_cache::{EvictOutcome, PatternCache};
use crate::result_cache::ResultCache;

/// Per-tick work shared across the engine's lifetime. Holding these as
/// `Arc`s (rather than borrowing) lets the background thread outlive the
/// `Core` method call that spawned it.
pub struct EvictionTargets {
    pub pattern_cache: Arc<PatternCache>,
    pub result_cache: Arc<ResultCache>,
    pub result_cache_config: ResultCacheConfig,
    pub deferred_cache: Arc<DeferredCache>,
    pub deferred_cache_config: DeferredCacheConfig,
}

struct StopSignal {
    stop: Mutex<bool>,
    cvar: Condvar,
}

/// Handle to the running background thread. Dropping this does not stop the
/// thread — call `stop()` explicitly (normally from `Core::shutdown`).
pub struct EvictionEngine {
    signal: Arc<StopSignal>,
    handle: Mutex<Option<std::thread::JoinHandle<()>>>,
    running: AtomicBool,
}

impl EvictionEngine {
    pub fn spawn(targets: EvictionTargets, config: EvictionConfig, counters: Arc<BackgroundCounters>) -> Arc<Self> {
        let signal = Arc::new(StopSignal { stop: Mutex::new(false), cvar: Condvar::new() });
        let engine = Arc::new(Self { signal: signal.clone(), handle: Mutex::new(None), running: AtomicBool::new(true) });

        let tick = Duration::from_millis(config.tick_interval_millis.max(1));
        let thread_signal = signal;
        let pattern_cfg = targets.pattern_cache.config.clone();
        let result_cfg = targets.result_cache_config;
        let deferred_cfg = targets.deferred_cache_config;
        let result_cache = targets.result_cache;
        let pattern_cache = targets.pattern_cache;
        let deferred_cache = targets.deferred_cache;

        let handle = std::thread::Builder::new()
            .name("regexcache-evict".into())
            .spawn(move || {
                loop {
                    let mut guard = thread_signal.stop.lock();
                    if *guard {
                        return;
                    }
                    let timed_out = thread_signal.cvar.wait_for(&mut guard, tick).timed_out();
                    let should_stop = *guard;
                    drop(guard);
                    if should_stop {
                        return;
                    }
                    if timed_out {
                        run_tick(&pattern_cache, &pattern_cfg, &result_cache, &result_cfg, &deferred_cache, &deferred_cfg, &counters);
                    }
                }
            })
            .expect("failed to spawn regexcache-evict thread");

        *engine.handle.lock() = Some(handle);
        engine
    }

    pub fn from_config(
        config: &Config,
        pattern_cache: Arc<PatternCache>,
        result_cache: Arc<ResultCache>,
        deferred_cache: Arc<DeferredCache>,
        counters: Arc<BackgroundCounters>,
    ) -> Arc<Self> {
        Self::spawn(
            EvictionTargets {
                pattern_cache,
                result_cache,
                result_cache_config: config.result_cache.clone(),
                deferred_cache,
                deferred_cache_config: config.deferred_cache.clone(),
            },
            config.eviction.clone(),
            counters,
        )
    }

    /// Request a stop and join the thread. Idempotent; safe to call from
    /// `Core::shutdown` even if already stopped.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        {
            let mut guard = self.signal.stop.lock();
            *guard = true;
        }
        self.signal.cvar.notify_all();
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for EvictionEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Sample size for the result cache's over-capacity sweep. The result cache
/// has no `lru_sample_size` knob of its own in §6.3 (only the pattern cache
/// does); this mirrors that default rather than inventing a new config key.
const RESULT_CACHE_LRU_SAMPLE_SIZE: usize = 500;

/// One tick: pattern-cache LRU + idle eviction, result-cache LRU + idle
/// eviction, deferred-cache drain. Each step takes at most one cache's lock
/// at a time (§5 Shared-resource policy) — the engine never holds two
/// cache locks simultaneously, so it can never be part of a lock-ordering
/// cycle with a caller thread.
fn run_tick(
    pattern_cache: &Arc<PatternCache>,
    pattern_cfg: &crate::config::PatternCacheConfig,
    result_cache: &Arc<ResultCache>,
    result_cfg: &ResultCacheConfig,
    deferred_cache: &Arc<DeferredCache>,
    deferred_cfg: &DeferredCacheConfig,
    counters: &BackgroundCounters,
) {
    let start = std::time::Instant::now();

    sweep_pattern_cache(pattern_cache, pattern_cfg, deferred_cache);

    let result_idle_nanos = Duration::from_secs(result_cfg.idle_timeout_seconds).as_nanos() as u64;
    result_cache.evict_idle(result_idle_nanos);
    result_cache.evict_lru_over_capacity(RESULT_CACHE_LRU_SAMPLE_SIZE);

    // §4.3/§6.3: the deferred cache sweeps on its own configured interval,
    // not on every eviction-engine tick.
    let sweep_interval_nanos = Duration::from_secs(deferred_cfg.sweep_interval_seconds).as_nanos() as u64;
    deferred_cache.drain_if_due(pattern_cache.clock(), sweep_interval_nanos);

    counters.record_sweep(start.elapsed().as_micros() as u64);
}

fn sweep_pattern_cache(pattern_cache: &Arc<PatternCache>, cfg: &crate::config::PatternCacheConfig, deferred_cache: &Arc<DeferredCache>) {
    let protection_nanos = Duration::from_secs(cfg.protection_seconds).as_nanos() as u64;
    let idle_nanos = Duration::from_secs(cfg.idle_timeout_seconds).as_nanos() as u64;

    let over_capacity = pattern_cache.len().saturating_sub(cfg.capacity);
    let mut lru_victim_count = 0;
    let mut candidates = Vec::new();
    if over_capacity > 0 {
        // The sample is sorted oldest-first; evict only enough of it to
        // come back within capacity (§4.1: "evicts oldest first until
        // within capacity"), not the entire sample — the sample size is an
        // approximation knob for which entries are *considered*, not how
        // many get evicted.
        let victims: Vec<_> =
            pattern_cache.sample_lru_victims(cfg.lru_sample_size, protection_nanos).into_iter().take(over_capacity).collect();
        lru_victim_count = victims.len();
        candidates.extend(victims);
    }
    // An entry can be both over-capacity-evictable and idle-evictable; skip
    // it here rather than attempting a second, already-gone erase below
    // (which would otherwise be miscounted as "skipped, still in use").
    let already_selected: std::collections::HashSet<_> = candidates.iter().map(|(d, _)| d.clone()).collect();
    let idle_victims = pattern_cache.idle_candidates(idle_nanos).into_iter().filter(|(d, _)| !already_selected.contains(d));
    candidates.extend(idle_victims);

    for (i, (descriptor, entry)) in candidates.into_iter().enumerate() {
        let is_lru_victim = i < lru_victim_count;
        match pattern_cache.evict_live(&descriptor, &entry) {
            Some(EvictOutcome::Dropped) => {
                if is_lru_victim {
                    pattern_cache.counters.base.evictions_lru.fetch_add(1, Ordering::Relaxed);
                } else {
                    pattern_cache.counters.base.evictions_idle.fetch_add(1, Ordering::Relaxed);
                }
            }
            Some(EvictOutcome::StillReferenced(entry)) => {
                if is_lru_victim {
                    pattern_cache.counters.base.evictions_lru.fetch_add(1, Ordering::Relaxed);
                } else {
                    pattern_cache.counters.base.evictions_idle.fetch_add(1, Ordering::Relaxed);
                }
                deferred_cache.add(entry, pattern_cache.clock());
            }
            None => {
                pattern_cache.counters.base.evictions_skipped_in_use.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}
