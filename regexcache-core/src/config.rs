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

//! Typed configuration, defaults, and validation (§6.3).
//!
//! `Config::validate` collects every violation it finds rather than failing
//! on the first — a careful loader should tell an operator about all of
//! their mistakes in one pass, not make them fix-and-retry one field at a
//! time (SPEC_FULL.md §6).

use regexcache_common::CacheError;
use serde::{Deserialize, Serialize};

/// Which concurrent map implementation backs a cache shard (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MapImpl {
    /// A single `parking_lot::RwLock` over a `HashMap`.
    Rwlock,
    /// A `dashmap::DashMap`, erase-safe under per-shard locking.
    Concurrent,
}

impl Default for MapImpl {
    fn default() -> Self {
        MapImpl::Rwlock
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternCacheConfig {
    pub capacity: usize,
    pub idle_timeout_seconds: u64,
    pub protection_seconds: u64,
    pub lru_sample_size: usize,
    pub map_impl: MapImpl,
}

impl Default for PatternCacheConfig {
    fn default() -> Self {
        Self {
            capacity: 50_000,
            idle_timeout_seconds: 300,
            protection_seconds: 1,
            lru_sample_size: 500,
            map_impl: MapImpl::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResultCacheConfig {
    pub capacity: usize,
    pub idle_timeout_seconds: u64,
}

impl Default for ResultCacheConfig {
    fn default() -> Self {
        Self { capacity: 0, idle_timeout_seconds: 60 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeferredCacheConfig {
    pub sweep_interval_seconds: u64,
}

impl Default for DeferredCacheConfig {
    fn default() -> Self {
        Self { sweep_interval_seconds: 5 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvictionConfig {
    pub tick_interval_millis: u64,
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self { tick_interval_millis: 100 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_pattern_length: usize,
    pub max_input_length: usize,
}

/// The one hard ceiling §6.3 allows regardless of configuration: a safety
/// backstop so a misconfigured `max_input_length` cannot make every match
/// call attempt to allocate an unbounded buffer.
pub const MAX_INPUT_LENGTH_SAFETY_CEILING: usize = 1 << 30; // 1 GiB

impl Default for LimitsConfig {
    fn default() -> Self {
        Self { max_pattern_length: 65_536, max_input_length: 16_777_216 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub pattern_cache: PatternCacheConfig,
    pub result_cache: ResultCacheConfig,
    pub deferred_cache: DeferredCacheConfig,
    pub eviction: EvictionConfig,
    pub limits: LimitsConfig,
}

impl Config {
    pub fn from_json(json: &str) -> Result<Config, CacheError> {
        let config: Config =
            serde_json::from_str(json).map_err(|e| CacheError::ConfigRejected(format!("invalid JSON: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), CacheError> {
        let mut problems = Vec::new();

        if self.pattern_cache.lru_sample_size == 0 && self.pattern_cache.capacity > 0 {
            problems.push("pattern_cache.lru_sample_size must be > 0 when capacity > 0".to_string());
        }
        if self.limits.max_pattern_length == 0 {
            problems.push("limits.max_pattern_length must be > 0".to_string());
        }
        if self.limits.max_input_length == 0 {
            problems.push("limits.max_input_length must be > 0".to_string());
        }
        if self.limits.max_input_length > MAX_INPUT_LENGTH_SAFETY_CEILING {
            problems.push(format!(
                "limits.max_input_length ({}) exceeds the safety ceiling of {} bytes",
                self.limits.max_input_length, MAX_INPUT_LENGTH_SAFETY_CEILING
            ));
        }
        if self.eviction.tick_interval_millis == 0 {
            problems.push("eviction.tick_interval_millis must be > 0".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(CacheError::ConfigRejected(problems.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let c = Config::default();
        assert_eq!(c.pattern_cache.capacity, 50_000);
        assert_eq!(c.pattern_cache.idle_timeout_seconds, 300);
        assert_eq!(c.pattern_cache.protection_seconds, 1);
        assert_eq!(c.pattern_cache.lru_sample_size, 500);
        assert_eq!(c.result_cache.capacity, 0);
        assert_eq!(c.deferred_cache.sweep_interval_seconds, 5);
        assert_eq!(c.eviction.tick_interval_millis, 100);
        assert_eq!(c.limits.max_pattern_length, 65_536);
        assert_eq!(c.limits.max_input_length, 16_777_216);
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let c = Config::from_json(r#"{"pattern_cache": {"capacity": 2, "protection_seconds": 0}}"#).unwrap();
        assert_eq!(c.pattern_cache.capacity, 2);
        assert_eq!(c.pattern_cache.protection_seconds, 0);
        assert_eq!(c.pattern_cache.idle_timeout_seconds, 300);
    }

    #[test]
    fn rejects_zero_tick_interval() {
        let c = Config { eviction: EvictionConfig { tick_interval_millis: 0 }, ..Default::default() };
        assert!(c.validate().is_err());
    }

    #[test]
    fn collects_multiple_problems_at_once() {
        let c = Config {
            limits: LimitsConfig { max_pattern_length: 0, max_input_length: 0 },
            ..Default::default()
        };
        let err = c.validate().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("max_pattern_length"));
        assert!(msg.contains("max_input_length"));
    }

    #[test]
    fn rejects_input_length_above_safety_ceiling() {
        let c = Config {
            limits: LimitsConfig { max_pattern_length: 1, max_input_length: usize::MAX },
            ..Default::default()
        };
        assert!(c.validate().is_err());
    }
}
