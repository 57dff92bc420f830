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

//! End-to-end scenarios E1-E6 (§8), with the literal values the spec gives.

use std::time::Duration;

use regexcache_core::config::{Config, PatternCacheConfig, ResultCacheConfig};
use regexcache_core::{Core, PatternDescriptor, PatternOptions, ReplaceMode};

/// E1: capacity 2, no protection window; acquire "a", "b", "c" in order,
/// releasing each immediately; after an eviction tick, exactly 2 entries
/// remain, one LRU eviction occurred, and the evicted descriptor is "a"
/// (the oldest by last-used).
#[test]
fn e1_capacity_two_evicts_oldest() {
    let mut config = Config::default();
    config.pattern_cache = PatternCacheConfig { capacity: 2, protection_seconds: 0, ..Default::default() };
    config.eviction.tick_interval_millis = 20;
    let core = Core::configure(config).unwrap();

    for name in ["a", "b", "c"] {
        let d = PatternDescriptor::new(name, PatternOptions::default());
        drop(core.acquire(&d).unwrap());
        // Ensure strictly increasing last-used timestamps across patterns.
        std::thread::sleep(Duration::from_millis(5));
    }

    std::thread::sleep(Duration::from_millis(150));

    let metrics = core.get_metrics();
    assert_eq!(metrics.pattern_cache.base.entries, 2);
    assert_eq!(metrics.pattern_cache.base.evictions_lru, 1);

    let evicted = PatternDescriptor::new("a", PatternOptions::default());
    assert!(core.get_pattern_metrics(&evicted).is_none(), "\"a\" should have been evicted as the oldest entry");
    for name in ["b", "c"] {
        let d = PatternDescriptor::new(name, PatternOptions::default());
        assert!(core.get_pattern_metrics(&d).is_some(), "{name} should still be cached");
    }

    core.shutdown();
}

/// E2: result cache capacity 4; calling `match_partial` twice with the same
/// `(pattern, input)` records a hit, not a miss, on the second call.
#[test]
fn e2_repeated_match_partial_hits_result_cache() {
    let mut config = Config::default();
    config.result_cache = ResultCacheConfig { capacity: 4, idle_timeout_seconds: 60 };
    let core = Core::configure(config).unwrap();

    let d = PatternDescriptor::new(r"\d+", PatternOptions::default());
    let handle = core.acquire(&d).unwrap();

    assert!(core.match_partial(&handle, "abc123").unwrap());
    let after_first = core.get_metrics().result_cache;
    assert_eq!(after_first.hits, 0);
    assert_eq!(after_first.misses, 1);

    assert!(core.match_partial(&handle, "abc123").unwrap());
    let after_second = core.get_metrics().result_cache;
    assert_eq!(after_second.hits, 1);
    assert_eq!(after_second.misses, 1);

    core.shutdown();
}

/// E3: a simple anchored pattern matches the whole string or not at all.
#[test]
fn e3_full_match_anchors_to_whole_input() {
    let core = Core::configure(Config::default()).unwrap();
    let d = PatternDescriptor::new("^foo$", PatternOptions::default());
    let handle = core.acquire(&d).unwrap();

    assert!(core.match_full(&handle, "foo").unwrap());
    assert!(!core.match_full(&handle, "foobar").unwrap());

    drop(handle);
    core.shutdown();
}

/// E4: a named capture group round-trips through `extract`.
#[test]
fn e4_extract_resolves_named_group() {
    let core = Core::configure(Config::default()).unwrap();
    let d = PatternDescriptor::new(r"(?P<n>\d+)", PatternOptions::default());
    let handle = core.acquire(&d).unwrap();

    let groups = core.extract(&handle, "id=42").unwrap().expect("pattern matches");
    let idx = handle.program().group_names()["n"];
    let (start, end) = groups[idx].expect("group n participated in the match");
    assert_eq!(&"id=42"[start..end], "42");

    core.shutdown();
}

/// E5: `replace` with a literal template over every vowel.
#[test]
fn e5_replace_all_vowels() {
    let core = Core::configure(Config::default()).unwrap();
    let d = PatternDescriptor::new("[aeiou]", PatternOptions::default());
    let handle = core.acquire(&d).unwrap();

    let out = core.replace(&handle, "banana", "*", ReplaceMode::All).unwrap();
    assert_eq!(out, "b*n*n*");

    core.shutdown();
}

/// E6: acquiring and shutting down without releasing forces exactly one
/// reclaim and bumps `forced_reclaims` by one.
#[test]
fn e6_shutdown_without_release_forces_one_reclaim() {
    let core = Core::configure(Config::default()).unwrap();
    let d = PatternDescriptor::new("never-released", PatternOptions::default());
    let handle = core.acquire(&d).unwrap();

    let before = core.get_metrics().background.forced_reclaims;
    core.shutdown();
    assert_eq!(core.get_metrics().background.forced_reclaims, before + 1);

    drop(handle);
}
