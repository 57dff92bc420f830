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

//! Property tests for the universal invariants of §8: random balanced
//! acquire/release sequences and random result-cache traffic, asserted
//! against a real `Core` rather than a model.

use proptest::prelude::*;
use regexcache_core::config::{Config, PatternCacheConfig, ResultCacheConfig};
use regexcache_core::engine::live_program_count;
use regexcache_core::{ClearTarget, Core, PatternDescriptor, PatternOptions};

/// Invariant 1 (§8): for any sequence of balanced `acquire`/`release` pairs,
/// no compiled program outlives the handles referencing it. Every operation
/// here drops its handle before the next one is acquired, so at quiescence
/// the live-program count must return exactly to its pre-test baseline.
fn balanced_acquire_release_returns_to_baseline(names: Vec<String>) {
    let before = live_program_count();
    let core = Core::configure(Config::default()).unwrap();

    for name in &names {
        let d = PatternDescriptor::new(name.clone(), PatternOptions::default());
        if let Ok(handle) = core.acquire(&d) {
            let _ = core.match_partial(&handle, "probe");
            drop(handle);
        }
    }

    core.clear(ClearTarget::All);
    core.shutdown();
    drop(core);
    assert_eq!(live_program_count(), before, "balanced acquire/release must leave no compiled program alive");
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_balanced_acquire_release_leaves_no_leaks(
        names in prop::collection::vec("[a-z]{1,6}", 0..24)
    ) {
        balanced_acquire_release_returns_to_baseline(names);
    }

    /// Invariant 6 (§8): after `clear(pattern)`, the next `acquire` on the
    /// same descriptor is a fresh compilation — its handle's refcount starts
    /// at 1, never observing a stale count left over from before the clear.
    #[test]
    fn prop_refcount_restarts_at_one_after_clear(pattern in "[a-z]{1,8}") {
        let core = Core::configure(Config::default()).unwrap();
        let d = PatternDescriptor::new(pattern, PatternOptions::default());

        let first = core.acquire(&d).unwrap();
        prop_assert_eq!(first.refs(), 1);
        core.clear(ClearTarget::Patterns);
        drop(first);

        let second = core.acquire(&d).unwrap();
        prop_assert_eq!(second.refs(), 1);
        drop(second);
        core.shutdown();
    }

    /// Invariant 5 (§8): a result cache entry is immutable after insert and
    /// round-trips through `lookup` for any input that fits within capacity.
    #[test]
    fn prop_result_cache_round_trips(
        pattern in "[a-z]{1,6}",
        inputs in prop::collection::vec("[a-z0-9]{0,12}", 1..8)
    ) {
        let mut config = Config::default();
        config.pattern_cache = PatternCacheConfig { capacity: 256, ..Default::default() };
        config.result_cache = ResultCacheConfig { capacity: 256, idle_timeout_seconds: 300 };
        let core = Core::configure(config).unwrap();

        let d = PatternDescriptor::new(pattern, PatternOptions::default());
        let handle = core.acquire(&d).unwrap();

        for input in &inputs {
            let first = core.match_partial(&handle, input).unwrap();
            let second = core.match_partial(&handle, input).unwrap();
            prop_assert_eq!(first, second, "a cached result must round-trip identically on re-lookup");
        }

        drop(handle);
        core.shutdown();
    }
}
