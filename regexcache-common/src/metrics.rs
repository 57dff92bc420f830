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

//! Atomic counters shared by every cache tier, and the JSON snapshot DTOs
//! they're rendered into.
//!
//! Each cache owns one [`CacheCounters`]; the background engine owns one
//! [`BackgroundCounters`]. Snapshot construction only reads atomics — it never
//! takes a cache lock, so it can never block the eviction loop (§4.6).

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::Serialize;

/// Counters common to all three caches.
#[derive(Debug, Default)]
pub struct CacheCounters {
    pub capacity: AtomicUsize,
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub evictions_lru: AtomicU64,
    pub evictions_idle: AtomicU64,
    pub evictions_deferred: AtomicU64,
    pub evictions_skipped_protected: AtomicU64,
    pub evictions_skipped_in_use: AtomicU64,
}

impl CacheCounters {
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, entries: usize) -> CacheSnapshot {
        let capacity = self.capacity.load(Ordering::Relaxed);
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheSnapshot {
            entries,
            capacity,
            utilization_pct: pct(entries, capacity),
            hits,
            misses,
            hit_rate_pct: if total == 0 { 0.0 } else { pct(hits as usize, total as usize) },
            evictions_lru: self.evictions_lru.load(Ordering::Relaxed),
            evictions_idle: self.evictions_idle.load(Ordering::Relaxed),
            evictions_deferred: self.evictions_deferred.load(Ordering::Relaxed),
            evictions_skipped_protected: self.evictions_skipped_protected.load(Ordering::Relaxed),
            evictions_skipped_in_use: self.evictions_skipped_in_use.load(Ordering::Relaxed),
        }
    }
}

fn pct(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        (numerator as f64 / denominator as f64) * 100.0
    }
}

/// Counters specific to the pattern compilation cache: compile outcomes and
/// the refcount high-water mark.
#[derive(Debug, Default)]
pub struct PatternCounters {
    pub base: CacheCounters,
    pub compilations_succeeded: AtomicU64,
    pub compilations_failed: AtomicU64,
    pub current_refcount_sum: AtomicUsize,
    pub max_refcount_observed: AtomicUsize,
}

impl PatternCounters {
    pub fn observe_refcount_delta(&self, delta: i64) {
        if delta >= 0 {
            let prev = self.current_refcount_sum.fetch_add(delta as usize, Ordering::Relaxed);
            let new = prev + delta as usize;
            self.max_refcount_observed.fetch_max(new, Ordering::Relaxed);
        } else {
            self.current_refcount_sum.fetch_sub((-delta) as usize, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self, entries: usize) -> PatternCacheSnapshot {
        PatternCacheSnapshot {
            base: self.base.snapshot(entries),
            compilations_succeeded: self.compilations_succeeded.load(Ordering::Relaxed),
            compilations_failed: self.compilations_failed.load(Ordering::Relaxed),
            current_refcount_sum: self.current_refcount_sum.load(Ordering::Relaxed),
            max_refcount_observed: self.max_refcount_observed.load(Ordering::Relaxed),
        }
    }
}

/// Counters for the background eviction engine, independent of any one cache.
#[derive(Debug, Default)]
pub struct BackgroundCounters {
    pub sweeps: AtomicU64,
    pub total_sweep_duration_micros: AtomicU64,
    pub forced_reclaims: AtomicU64,
}

impl BackgroundCounters {
    pub fn record_sweep(&self, duration_micros: u64) {
        self.sweeps.fetch_add(1, Ordering::Relaxed);
        self.total_sweep_duration_micros.fetch_add(duration_micros, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> BackgroundSnapshot {
        let sweeps = self.sweeps.load(Ordering::Relaxed);
        let total = self.total_sweep_duration_micros.load(Ordering::Relaxed);
        BackgroundSnapshot {
            background_sweeps: sweeps,
            avg_sweep_duration_micros: if sweeps == 0 { 0 } else { total / sweeps },
            forced_reclaims: self.forced_reclaims.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct CacheSnapshot {
    pub entries: usize,
    pub capacity: usize,
    pub utilization_pct: f64,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate_pct: f64,
    pub evictions_lru: u64,
    pub evictions_idle: u64,
    pub evictions_deferred: u64,
    pub evictions_skipped_protected: u64,
    pub evictions_skipped_in_use: u64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct PatternCacheSnapshot {
    #[serde(flatten)]
    pub base: CacheSnapshot,
    pub compilations_succeeded: u64,
    pub compilations_failed: u64,
    pub current_refcount_sum: usize,
    pub max_refcount_observed: usize,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct BackgroundSnapshot {
    pub background_sweeps: u64,
    pub avg_sweep_duration_micros: u64,
    pub forced_reclaims: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineSnapshot {
    pub name: &'static str,
    pub guarantees: &'static str,
}

impl Default for EngineSnapshot {
    fn default() -> Self {
        Self {
            name: "regex",
            guarantees: "linear-time, no backtracking",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub pattern_cache: PatternCacheSnapshot,
    pub result_cache: CacheSnapshot,
    pub deferred_cache: CacheSnapshot,
    pub background: BackgroundSnapshot,
    pub engine: EngineSnapshot,
    pub generated_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_rate_with_no_traffic_is_zero() {
        let c = CacheCounters::default();
        let s = c.snapshot(0);
        assert_eq!(s.hit_rate_pct, 0.0);
    }

    #[test]
    fn hit_rate_reflects_hits_and_misses() {
        let c = CacheCounters::default();
        c.record_hit();
        c.record_hit();
        c.record_miss();
        let s = c.snapshot(2);
        assert!((s.hit_rate_pct - 66.666).abs() < 0.01);
    }

    #[test]
    fn refcount_high_water_mark_tracks_peak_not_current() {
        let p = PatternCounters::default();
        p.observe_refcount_delta(5);
        p.observe_refcount_delta(-3);
        let s = p.snapshot(1);
        assert_eq!(s.current_refcount_sum, 2);
        assert_eq!(s.max_refcount_observed, 5);
    }
}
