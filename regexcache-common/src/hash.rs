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

//! Fingerprinting primitives shared by the pattern descriptor key and the
//! result cache key.
//!
//! Fingerprints are process-local (no persistence, no cross-node use — see
//! the Non-goals in §1), so a fast non-cryptographic hash is appropriate.
//! We combine two independently-seeded `ahash` passes into a 128-bit value to
//! keep accidental collisions between unrelated `(pattern, input)` pairs
//! astronomically unlikely without paying for a cryptographic hash.

use std::hash::{Hash, Hasher};

use ahash::RandomState;

const SEED_A: RandomState = RandomState::with_seeds(
    0x243F_6A88_85A3_08D3,
    0x1319_8A2E_0370_7344,
    0xA409_3822_299F_31D0,
    0x082E_FA98_EC4E_6C89,
);
const SEED_B: RandomState = RandomState::with_seeds(
    0x4528_21E6_38D0_1377,
    0xBE54_66CF_34E9_0C6C,
    0xC0AC_29B7_C97C_50DD,
    0x3F84_D5B5_B547_0917,
);

/// A 128-bit fingerprint over arbitrary hashable content.
///
/// Used both as the canonical [`PatternDescriptor`](crate) key component and
/// as the `(pattern, input, op_kind)` triple that forms a `ResultKey`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(u64, u64);

impl Fingerprint {
    pub fn of<T: Hash + ?Sized>(value: &T) -> Self {
        let mut a = SEED_A.build_hasher();
        value.hash(&mut a);
        let mut b = SEED_B.build_hasher();
        value.hash(&mut b);
        Fingerprint(a.finish(), b.finish())
    }

    /// Combine this fingerprint with another, producing a fingerprint over
    /// both. Used to build a `ResultKey` from a pattern fingerprint and an
    /// input-bytes fingerprint without re-hashing the pattern string.
    pub fn combine(self, other: Fingerprint) -> Fingerprint {
        let mut a = SEED_A.build_hasher();
        self.hash(&mut a);
        other.hash(&mut a);
        let mut b = SEED_B.build_hasher();
        self.hash(&mut b);
        other.hash(&mut b);
        Fingerprint(a.finish(), b.finish())
    }

    pub fn as_u128(self) -> u128 {
        ((self.0 as u128) << 64) | self.1 as u128
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:032x}", self.as_u128())
    }
}
