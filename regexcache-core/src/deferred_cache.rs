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

//! The Deferred Reclamation Cache (§4.3): holds compiled programs whose
//! `LIVE` eviction was requested while a handle was still outstanding.

use std::sync::atomic::{AtomicBool, AtomicU64};
use std::sync::Arc;

use parking_lot::Mutex;
use regexcache_common::metrics::{BackgroundCounters, CacheCounters};

use crate::handle::{Clock, CompiledPattern, Membership};

pub struct DeferredCache {
    entries: Mutex<Vec<Arc<CompiledPattern>>>,
    pub counters: CacheCounters,
    /// Clock-relative timestamp of the last periodic `drain()`, gating
    /// `drain_if_due` against `deferred_cache.sweep_interval_seconds`
    /// (§4.3/§6.3).
    last_drain_nanos: AtomicU64,
    /// Whether `drain_if_due` has ever run a sweep. A freshly created
    /// `Clock` reads close to zero nanos, so `last_drain_nanos == 0` cannot
    /// double as "never swept" the way it can for idle/age tracking — this
    /// flag makes the very first tick always due, regardless of how large
    /// the configured interval is.
    has_swept: AtomicBool,
}

impl DeferredCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            counters: CacheCounters::default(),
            last_drain_nanos: AtomicU64::new(0),
            has_swept: AtomicBool::new(false),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Insert an entry evicted from `LIVE` while still referenced. Sets its
    /// membership to `Deferred`.
    pub fn add(&self, entry: Arc<CompiledPattern>, clock: &Clock) {
        entry.mark_deferred(clock);
        self.entries.lock().push(entry);
    }

    /// Reclaim `entry` immediately if its refcount has already reached zero
    /// (the "immediate reclaim path" of §4.3, invoked from `release`).
    /// Returns `true` if the entry was found and reclaimed.
    pub fn try_reclaim_one(&self, entry: &Arc<CompiledPattern>) -> bool {
        if entry.refs() != 0 {
            return false;
        }
        let mut entries = self.entries.lock();
        if let Some(pos) = entries.iter().position(|e| Arc::ptr_eq(e, entry)) {
            // Re-check under the lock: another thread may have re-acquired
            // a reference between our refs()==0 check and taking the lock.
            if entries[pos].refs() != 0 {
                return false;
            }
            let removed = entries.remove(pos);
            removed.set_membership(Membership::Detached);
            self.counters.evictions_deferred.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Periodic sweep (§4.4 step 4): reclaim every entry with refcount zero.
    /// Returns the number reclaimed.
    pub fn drain(&self) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|e| {
            if e.refs() == 0 {
                e.set_membership(Membership::Detached);
                false
            } else {
                true
            }
        });
        let reclaimed = before - entries.len();
        if reclaimed > 0 {
            self.counters.evictions_deferred.fetch_add(reclaimed as u64, std::sync::atomic::Ordering::Relaxed);
        }
        reclaimed
    }

    /// Run `drain()` only if at least `interval_nanos` has elapsed since the
    /// last sweep, honoring `deferred_cache.sweep_interval_seconds` (§4.3:
    /// "Sweeps run on the background thread on a configurable interval")
    /// rather than sweeping on every eviction-engine tick regardless of the
    /// configured interval. The first call always sweeps. `interval_nanos`
    /// of `0` disables throttling (every call sweeps). Returns `None` if the
    /// interval hasn't elapsed yet (no sweep attempted).
    pub fn drain_if_due(&self, clock: &Clock, interval_nanos: u64) -> Option<usize> {
        use std::sync::atomic::Ordering;

        let now = clock.now_nanos();
        let due = !self.has_swept.load(Ordering::Relaxed)
            || now.saturating_sub(self.last_drain_nanos.load(Ordering::Relaxed)) >= interval_nanos;
        if !due {
            return None;
        }
        self.last_drain_nanos.store(now, Ordering::Relaxed);
        self.has_swept.store(true, Ordering::Relaxed);
        Some(self.drain())
    }

    /// Destroy every entry regardless of refcount (process shutdown only).
    /// Returns the number of entries that were forcibly reclaimed while
    /// still referenced.
    pub fn force_drain(&self, background: &BackgroundCounters) -> usize {
        let mut entries = self.entries.lock();
        let forced = entries.iter().filter(|e| e.refs() != 0).count();
        for e in entries.iter() {
            e.set_membership(Membership::Detached);
        }
        if forced > 0 {
            tracing::warn!(forced, "force_drain reclaiming referenced deferred entries at shutdown");
            background.forced_reclaims.fetch_add(forced as u64, std::sync::atomic::Ordering::Relaxed);
        }
        let count = entries.len();
        entries.clear();
        count
    }
}

impl Default for DeferredCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{PatternDescriptor, PatternOptions};
    use crate::engine::compile_program;
    use crate::handle::CompileOutcome;

    fn compiled_entry(clock: &Clock) -> Arc<CompiledPattern> {
        let d = PatternDescriptor::new("abc", PatternOptions::default());
        let program = compile_program(&d).unwrap();
        Arc::new(CompiledPattern::new(d, CompileOutcome::Compiled(program), clock))
    }

    #[test]
    fn drain_reclaims_only_zero_refcount_entries() {
        let clock = Clock::new();
        let deferred = DeferredCache::new();
        let referenced = compiled_entry(&clock);
        referenced.inc_refs();
        let unreferenced = compiled_entry(&clock);

        deferred.add(referenced.clone(), &clock);
        deferred.add(unreferenced, &clock);
        assert_eq!(deferred.len(), 2);

        let reclaimed = deferred.drain();
        assert_eq!(reclaimed, 1);
        assert_eq!(deferred.len(), 1);
    }

    #[test]
    fn drain_if_due_throttles_to_the_configured_interval() {
        let clock = Clock::new();
        let deferred = DeferredCache::new();
        deferred.add(compiled_entry(&clock), &clock);

        // First call always runs (last_drain_nanos starts at 0).
        assert_eq!(deferred.drain_if_due(&clock, u64::MAX), Some(1));
        assert_eq!(deferred.len(), 0);

        deferred.add(compiled_entry(&clock), &clock);
        // Interval hasn't elapsed yet: must not sweep.
        assert_eq!(deferred.drain_if_due(&clock, u64::MAX), None);
        assert_eq!(deferred.len(), 1, "drain_if_due must not reclaim before the configured interval elapses");

        // interval_nanos=0 disables throttling: every call sweeps.
        assert_eq!(deferred.drain_if_due(&clock, 0), Some(1));
    }

    #[test]
    fn immediate_reclaim_on_release() {
        let clock = Clock::new();
        let deferred = DeferredCache::new();
        let entry = compiled_entry(&clock);
        entry.inc_refs();
        deferred.add(entry.clone(), &clock);

        assert!(!deferred.try_reclaim_one(&entry));
        entry.dec_refs();
        assert!(deferred.try_reclaim_one(&entry));
        assert_eq!(deferred.len(), 0);
    }

    #[test]
    fn force_drain_counts_forced_reclaims() {
        let clock = Clock::new();
        let deferred = DeferredCache::new();
        let held = compiled_entry(&clock);
        held.inc_refs();
        deferred.add(held, &clock);

        let background = BackgroundCounters::default();
        let count = deferred.force_drain(&background);
        assert_eq!(count, 1);
        assert_eq!(background.forced_reclaims.load(std::sync::atomic::Ordering::Relaxed), 1);
    }
}
