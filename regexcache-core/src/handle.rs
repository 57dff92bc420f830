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

//! [`CompiledPattern`] and the `LIVE` / `DEFERRED` / `DETACHED` membership
//! state machine (§3).

use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};

use regexcache_common::CacheError;

use crate::descriptor::PatternDescriptor;
use crate::engine::Program;

/// A monotonic clock shared by every entry in a cache, so ages can be
/// compared with plain integer arithmetic instead of juggling `Instant`s
/// inside atomics.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    epoch: std::time::Instant,
}

impl Clock {
    pub fn new() -> Self {
        Self { epoch: std::time::Instant::now() }
    }

    pub fn now_nanos(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

/// Reachability state of a [`CompiledPattern`] (§3 invariants).
///
/// `LIVE`: reachable from exactly the Pattern Cache's live map.
/// `DEFERRED`: reachable from exactly the Deferred Cache.
/// `DETACHED`: reachable from nowhere, about to be destroyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Membership {
    Live = 0,
    Deferred = 1,
    Detached = 2,
}

impl Membership {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Membership::Live,
            1 => Membership::Deferred,
            _ => Membership::Detached,
        }
    }
}

/// Either a successfully compiled program, or a retained compilation
/// diagnostic (the negative-cache marker of §4.1/§7).
pub enum CompileOutcome {
    Compiled(Program),
    Failed(CacheError),
}

impl CompileOutcome {
    pub fn program(&self) -> Option<&Program> {
        match self {
            CompileOutcome::Compiled(p) => Some(p),
            CompileOutcome::Failed(_) => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, CompileOutcome::Failed(_))
    }
}

/// One entry in the Pattern Compilation Cache: an engine program (or a
/// negative-cache diagnostic), its refcount, and its membership state.
///
/// Every field besides `refcount`, `last_used_nanos`, and `membership` is set
/// at construction and never mutated again (§5 Shared-resource policy).
pub struct CompiledPattern {
    pub descriptor: PatternDescriptor,
    pub outcome: CompileOutcome,
    pub created_at_nanos: u64,
    last_used_nanos: AtomicU64,
    refcount: AtomicUsize,
    membership: AtomicU8,
    /// Set when `membership` transitions to `Deferred`; used only for
    /// diagnostics (age-in-deferred-cache).
    deferred_at_nanos: AtomicU64,
}

impl CompiledPattern {
    pub fn new(descriptor: PatternDescriptor, outcome: CompileOutcome, clock: &Clock) -> Self {
        let now = clock.now_nanos();
        Self {
            descriptor,
            outcome,
            created_at_nanos: now,
            last_used_nanos: AtomicU64::new(now),
            refcount: AtomicUsize::new(0),
            membership: AtomicU8::new(Membership::Live as u8),
            deferred_at_nanos: AtomicU64::new(0),
        }
    }

    pub fn refs(&self) -> usize {
        self.refcount.load(Ordering::Acquire)
    }

    pub fn inc_refs(&self) -> usize {
        self.refcount.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Returns the refcount *after* the decrement.
    pub fn dec_refs(&self) -> usize {
        let prev = self.refcount.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "refcount underflow: release without matching acquire");
        prev - 1
    }

    pub fn membership(&self) -> Membership {
        Membership::from_u8(self.membership.load(Ordering::Acquire))
    }

    pub fn set_membership(&self, m: Membership) {
        self.membership.store(m as u8, Ordering::Release);
    }

    pub fn last_used_nanos(&self) -> u64 {
        self.last_used_nanos.load(Ordering::Relaxed)
    }

    pub fn touch(&self, clock: &Clock) {
        self.last_used_nanos.store(clock.now_nanos(), Ordering::Relaxed);
    }

    pub fn mark_deferred(&self, clock: &Clock) {
        self.deferred_at_nanos.store(clock.now_nanos(), Ordering::Relaxed);
        self.set_membership(Membership::Deferred);
    }

    pub fn age_nanos(&self, clock: &Clock) -> u64 {
        clock.now_nanos().saturating_sub(self.created_at_nanos)
    }

    pub fn idle_nanos(&self, clock: &Clock) -> u64 {
        clock.now_nanos().saturating_sub(self.last_used_nanos())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::PatternOptions;

    fn entry() -> CompiledPattern {
        let clock = Clock::new();
        let descriptor = PatternDescriptor::new("abc", PatternOptions::default());
        let outcome = CompileOutcome::Failed(CacheError::CompileFailed { diagnostic: "x".into() });
        CompiledPattern::new(descriptor, outcome, &clock)
    }

    #[test]
    fn refcount_round_trips() {
        let e = entry();
        assert_eq!(e.inc_refs(), 1);
        assert_eq!(e.inc_refs(), 2);
        assert_eq!(e.dec_refs(), 1);
        assert_eq!(e.dec_refs(), 0);
    }

    #[test]
    fn membership_defaults_to_live() {
        let e = entry();
        assert_eq!(e.membership(), Membership::Live);
        e.mark_deferred(&Clock::new());
        assert_eq!(e.membership(), Membership::Deferred);
        e.set_membership(Membership::Detached);
        assert_eq!(e.membership(), Membership::Detached);
    }
}
