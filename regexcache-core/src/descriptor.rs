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

//! [`PatternDescriptor`]: the canonicalized `(pattern, options)` pair used as
//! the Pattern Compilation Cache key (§3).

use std::hash::{Hash, Hasher};

use regexcache_common::Fingerprint;
use serde::{Deserialize, Serialize};

/// Compilation options for a pattern. Every field defaults to RE2/`regex`'s
/// usual default, so `PatternOptions::default()` is the descriptor for a
/// plain pattern with no flags.
///
/// Canonicalization is structural, not lexical: because this is a fixed-shape
/// struct (not an open string-keyed option bag), there is no "unsorted option
/// set" to normalize — two descriptors with the same field values are always
/// byte-identical once serialized, which is what §3 requires of equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PatternOptions {
    /// Case-insensitive matching.
    pub case_insensitive: bool,
    /// Leftmost-longest (POSIX) matching instead of leftmost-first.
    ///
    /// Carried through the descriptor and the cache key so that two
    /// otherwise-identical patterns requesting different match-kind
    /// semantics never collide in the compilation cache, even though the
    /// bundled `regex` engine does not itself distinguish the two (see
    /// `engine.rs` and `DESIGN.md`).
    pub longest_match: bool,
    /// `^`/`$` match at line boundaries rather than only string boundaries.
    pub multi_line: bool,
    /// `.` matches `\n` as well.
    pub dot_matches_new_line: bool,
    /// Require the match to start at byte offset 0 of the input.
    pub anchored: bool,
    /// Reject compilation if the resulting program would exceed this many
    /// bytes. `None` means no per-pattern ceiling beyond the global
    /// `limits.max_pattern_length` source-length check.
    pub max_program_size: Option<usize>,
}

impl Default for PatternOptions {
    fn default() -> Self {
        Self {
            case_insensitive: false,
            longest_match: false,
            multi_line: false,
            dot_matches_new_line: false,
            anchored: false,
            max_program_size: None,
        }
    }
}

/// The Pattern Compilation Cache key: a pattern string plus its canonicalized
/// compilation options (§3). Two descriptors are equal iff both fields are
/// byte-equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PatternDescriptor {
    pub pattern: String,
    pub options: PatternOptions,
}

impl PatternDescriptor {
    pub fn new(pattern: impl Into<String>, options: PatternOptions) -> Self {
        Self { pattern: pattern.into(), options }
    }

    /// Fingerprint over the canonical `(pattern, options)` pair, used to key
    /// the result cache independently of whether this descriptor's compiled
    /// program is still live (§4.2 Correctness).
    pub fn fingerprint(&self) -> Fingerprint {
        struct Canonical<'a>(&'a str, &'a PatternOptions);
        impl Hash for Canonical<'_> {
            fn hash<H: Hasher>(&self, state: &mut H) {
                self.0.hash(state);
                self.1.hash(state);
            }
        }
        Fingerprint::of(&Canonical(&self.pattern, &self.options))
    }

    /// A pattern built from no metacharacters outside of escaped literals is
    /// eligible for the original system's fast substring-search path;
    /// `regex` does this literal optimization internally, but we still
    /// surface the flag for parity with `libre2-java`'s diagnostics (see
    /// SPEC_FULL.md §3).
    pub fn is_literal(&self) -> bool {
        const META: &[char] = &['\\', '.', '*', '+', '?', '(', ')', '[', ']', '{', '}', '|', '^', '$'];
        !self.pattern.contains(META)
    }
}

/// Distinguishes the operation kind folded into a `ResultKey` (§3): two
/// identical `(pattern, input)` pairs evaluated with different operations
/// must not share a result cache entry, since e.g. a full match and a
/// partial match can disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    FullMatch,
    PartialMatch,
    Extract,
    FindAll,
}
