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

//! `regexcache-core`: a linear-time regex compilation and result cache.
//!
//! [`Core`] is the single entry point. It owns the Pattern Compilation
//! Cache, the Pattern Result Cache, the Deferred Reclamation Cache, and the
//! Background Eviction Engine, and exposes the handle API described in
//! SPEC_FULL.md §6.2.

pub mod config;
pub mod deferred_cache;
pub mod descriptor;
pub mod engine;
pub mod eviction;
pub mod handle;
pub mod pattern_cache;
pub mod result_cache;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use regexcache_common::metrics::{BackgroundCounters, EngineSnapshot, MetricsSnapshot};
use regexcache_common::CacheError;

pub use config::Config;
pub use descriptor::{OpKind, PatternDescriptor, PatternOptions};
pub use engine::{ReplaceMode, Span};
pub use pattern_cache::PatternHandle;

use deferred_cache::DeferredCache;
use eviction::EvictionEngine;
use pattern_cache::PatternCache;
use result_cache::{CachedResult, ResultCache, ResultKey};

/// Time one handle-API operation and publish its latency and outcome through
/// the `metrics` crate registry (§4.5: "Records per-operation latency and
/// outcome metrics"). The histogram/counter names are left unprefixed by
/// cache tier since an operation like `match_full` can touch more than one
/// tier (result cache, then pattern/engine) in a single call.
fn timed_op<T>(op: &'static str, f: impl FnOnce() -> Result<T, CacheError>) -> Result<T, CacheError> {
    let start = std::time::Instant::now();
    let result = f();
    metrics::histogram!("regexcache_operation_duration_seconds", "op" => op).record(start.elapsed().as_secs_f64());
    let outcome = if result.is_ok() { "ok" } else { "error" };
    metrics::counter!("regexcache_operation_total", "op" => op, "outcome" => outcome).increment(1);
    result
}

/// Which cache tier a `clear()` call targets (§6.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearTarget {
    Patterns,
    Results,
    All,
}

/// The top-level handle API: acquires compiled patterns, evaluates them
/// against inputs through the result cache, and owns the lifetime of the
/// background eviction thread.
pub struct Core {
    config: Config,
    pattern_cache: Arc<PatternCache>,
    result_cache: Arc<ResultCache>,
    deferred_cache: Arc<DeferredCache>,
    background_counters: Arc<BackgroundCounters>,
    engine: Arc<EvictionEngine>,
}

impl Core {
    /// §6.2 `configure`: construct a fresh instance from validated
    /// configuration. The background eviction thread starts immediately.
    pub fn configure(config: Config) -> Result<Arc<Self>, CacheError> {
        config.validate()?;

        let deferred_cache = Arc::new(DeferredCache::new());
        let pattern_cache = PatternCache::new(config.pattern_cache.clone(), deferred_cache.clone());
        let result_cache = Arc::new(ResultCache::new(config.result_cache.capacity));
        let background_counters = Arc::new(BackgroundCounters::default());

        let engine = EvictionEngine::from_config(
            &config,
            pattern_cache.clone(),
            result_cache.clone(),
            deferred_cache.clone(),
            background_counters.clone(),
        );

        Ok(Arc::new(Self { config, pattern_cache, result_cache, deferred_cache, background_counters, engine }))
    }

    /// §6.2 `acquire`: compile (or reuse) a pattern, returning a refcounted
    /// handle.
    pub fn acquire(self: &Arc<Self>, descriptor: &PatternDescriptor) -> Result<Arc<PatternHandle>, CacheError> {
        timed_op("acquire", || PatternCache::acquire(&self.pattern_cache, descriptor, self.config.limits.max_pattern_length))
    }

    fn validate_input<'a>(&self, input: &'a str) -> Result<&'a str, CacheError> {
        if input.len() > self.config.limits.max_input_length {
            return Err(CacheError::InputTooLarge { limit: self.config.limits.max_input_length, actual: input.len() });
        }
        Ok(input)
    }

    /// §6.2 `match_full`: does `input` match the whole pattern?
    pub fn match_full(&self, handle: &PatternHandle, input: &str) -> Result<bool, CacheError> {
        timed_op("match_full", || {
            self.validate_input(input)?;
            let key = ResultKey::new(handle.descriptor(), input, OpKind::FullMatch);
            if let Some(CachedResult::Bool(b)) = self.result_cache.lookup(key) {
                return Ok(b);
            }
            let result = handle.program().full_match(input);
            self.result_cache.insert(key, CachedResult::Bool(result));
            Ok(result)
        })
    }

    /// §6.2 `match_partial`: does `input` contain a match anywhere?
    pub fn match_partial(&self, handle: &PatternHandle, input: &str) -> Result<bool, CacheError> {
        timed_op("match_partial", || {
            self.validate_input(input)?;
            let key = ResultKey::new(handle.descriptor(), input, OpKind::PartialMatch);
            if let Some(CachedResult::Bool(b)) = self.result_cache.lookup(key) {
                return Ok(b);
            }
            let result = handle.program().partial_match(input);
            self.result_cache.insert(key, CachedResult::Bool(result));
            Ok(result)
        })
    }

    /// §6.2 `extract`: the first match's capture-group spans, if any.
    pub fn extract(&self, handle: &PatternHandle, input: &str) -> Result<Option<Vec<Option<Span>>>, CacheError> {
        timed_op("extract", || {
            self.validate_input(input)?;
            let key = ResultKey::new(handle.descriptor(), input, OpKind::Extract);
            if let Some(CachedResult::SpanGroups(mut groups)) = self.result_cache.lookup(key) {
                return Ok(groups.pop());
            }
            let result = handle.program().extract_groups(input);
            self.result_cache.insert(key, CachedResult::SpanGroups(result.clone().into_iter().collect()));
            Ok(result)
        })
    }

    /// §6.2 `find_all`: every match's capture-group spans.
    pub fn find_all(&self, handle: &PatternHandle, input: &str) -> Result<Vec<Vec<Option<Span>>>, CacheError> {
        timed_op("find_all", || {
            self.validate_input(input)?;
            let key = ResultKey::new(handle.descriptor(), input, OpKind::FindAll);
            if let Some(CachedResult::SpanGroups(groups)) = self.result_cache.lookup(key) {
                return Ok(groups);
            }
            let result = handle.program().find_all(input);
            self.result_cache.insert(key, CachedResult::SpanGroups(result.clone()));
            Ok(result)
        })
    }

    /// §6.2 `replace`: not result-cached — an arbitrary replacement
    /// template makes the output unbounded in shape, unlike the fixed-shape
    /// match/span results the other operations cache.
    pub fn replace(&self, handle: &PatternHandle, input: &str, template: &str, mode: ReplaceMode) -> Result<String, CacheError> {
        timed_op("replace", || {
            self.validate_input(input)?;
            Ok(handle.program().replace(input, template, mode))
        })
    }

    /// §6.2 `get_metrics`: a lock-free snapshot of every counter.
    pub fn get_metrics(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            pattern_cache: self.pattern_cache.counters.snapshot(self.pattern_cache.len()),
            result_cache: self.result_cache.counters.snapshot(self.result_cache.len()),
            deferred_cache: self.deferred_cache.counters.snapshot(self.deferred_cache.len()),
            background: self.background_counters.snapshot(),
            engine: EngineSnapshot::default(),
            generated_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// §6.2 `get_pattern_metrics`: per-pattern diagnostics for an already
    /// cached descriptor.
    pub fn get_pattern_metrics(&self, descriptor: &PatternDescriptor) -> Option<pattern_cache::PatternStats> {
        self.pattern_cache.lookup_stats(descriptor)
    }

    /// Drain every `LIVE` pattern-cache entry, handing still-referenced ones
    /// to the deferred cache rather than destroying them out from under a
    /// caller. Shared by `clear(Patterns)` and `shutdown`, which both need
    /// every `LIVE` entry to stop being reachable from the pattern cache.
    fn drain_pattern_cache_into_deferred(&self) {
        for entry in self.pattern_cache.clear() {
            if entry.refs() > 0 {
                self.deferred_cache.add(entry, self.pattern_cache.clock());
            }
        }
    }

    /// §6.2 `clear`: evict an entire tier immediately. Live pattern entries
    /// that are still referenced move to the deferred cache rather than
    /// being destroyed out from under a caller.
    pub fn clear(&self, target: ClearTarget) {
        if matches!(target, ClearTarget::Patterns | ClearTarget::All) {
            self.drain_pattern_cache_into_deferred();
        }
        if matches!(target, ClearTarget::Results | ClearTarget::All) {
            self.result_cache.clear();
        }
    }

    /// §6.2 `shutdown`: stop the background thread, move every remaining
    /// `LIVE` pattern-cache entry into the deferred path (so a bare
    /// `acquire()` with no `release()` is reachable from the deferred cache,
    /// per §8 E6), then force-drain the deferred cache (Open Question (b):
    /// detach and warn rather than block indefinitely on outstanding
    /// handles — see SPEC_FULL.md §9).
    pub fn shutdown(&self) {
        self.engine.stop();
        self.drain_pattern_cache_into_deferred();
        self.deferred_cache.force_drain(&self.background_counters);
    }
}

impl Drop for Core {
    fn drop(&mut self) {
        self.shutdown();
    }
}
