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

//! The engine contract (§6.1) and its one bundled implementation.
//!
//! Everything above this module talks to `Program`/`compile_program`, never
//! to `regex::Regex` directly — this is the seam the spec describes as
//! "fixed external dependency; not part of this spec". Swapping engines
//! means replacing this file alone.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use regex::{Regex, RegexBuilder};
use regexcache_common::CacheError;

use crate::descriptor::PatternDescriptor;

/// Count of currently-live [`Program`]s, for the leak check in
/// `tests/leak_check.rs`: §8 property 3 requires every compiled program be
/// destroyed exactly once, with no leaks. A global counter plus the `Drop`
/// impl below is this crate's in-repo substitute for the asan/valgrind
/// verification SPEC_FULL.md §8 calls out as a CI-level concern.
static LIVE_PROGRAMS: AtomicUsize = AtomicUsize::new(0);

/// Current number of constructed-but-not-yet-dropped [`Program`]s.
pub fn live_program_count() -> usize {
    LIVE_PROGRAMS.load(Ordering::SeqCst)
}

/// One compiled engine program plus the metadata §3 says must be derived
/// from it at compile time.
pub struct Program {
    regex: Regex,
    size_bytes: usize,
    group_names: HashMap<String, usize>,
}

impl Drop for Program {
    fn drop(&mut self) {
        LIVE_PROGRAMS.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A single match span, `(start, end)` byte offsets into the input.
pub type Span = (usize, usize);

/// One `replace` call's mode, per §6.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplaceMode {
    First,
    All,
}

impl Program {
    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    pub fn num_capturing_groups(&self) -> usize {
        // `captures_len()` includes the implicit whole-match group 0.
        self.regex.captures_len().saturating_sub(1)
    }

    pub fn group_names(&self) -> &HashMap<String, usize> {
        &self.group_names
    }

    pub fn full_match(&self, input: &str) -> bool {
        match self.regex.find(input) {
            Some(m) => m.start() == 0 && m.end() == input.len(),
            None => false,
        }
    }

    pub fn partial_match(&self, input: &str) -> bool {
        self.regex.is_match(input)
    }

    pub fn find_all(&self, input: &str) -> Vec<Vec<Option<Span>>> {
        self.regex
            .captures_iter(input)
            .map(|caps| {
                (0..caps.len())
                    .map(|i| caps.get(i).map(|m| (m.start(), m.end())))
                    .collect()
            })
            .collect()
    }

    pub fn extract_groups(&self, input: &str) -> Option<Vec<Option<Span>>> {
        let caps = self.regex.captures(input)?;
        Some((0..caps.len()).map(|i| caps.get(i).map(|m| (m.start(), m.end()))).collect())
    }

    pub fn replace(&self, input: &str, template: &str, mode: ReplaceMode) -> String {
        match mode {
            ReplaceMode::First => self.regex.replace(input, template).into_owned(),
            ReplaceMode::All => self.regex.replace_all(input, template).into_owned(),
        }
    }
}

/// Rough program-size estimator.
///
/// `regex::Regex` does not expose the byte size of its compiled automaton,
/// so capacity/size-based policy (§4.1's `max_program_size`, the `size`
/// field in `lookup_stats`) uses this heuristic instead of a true engine
/// measurement. It scales with pattern length and capture-group count, which
/// dominate a real NFA/DFA's memory footprint, and is deliberately
/// conservative (overestimates rather than under). See DESIGN.md.
fn estimate_program_size(pattern: &str, num_groups: usize) -> usize {
    const BASE_OVERHEAD: usize = 256;
    const BYTES_PER_PATTERN_BYTE: usize = 48;
    const BYTES_PER_GROUP: usize = 64;
    BASE_OVERHEAD + pattern.len() * BYTES_PER_PATTERN_BYTE + num_groups * BYTES_PER_GROUP
}

/// Compile a [`PatternDescriptor`] into a [`Program`].
///
/// `longest_match` is accepted and folded into the descriptor's cache key
/// (so two requests differing only in match-kind never collide), but the
/// bundled `regex` engine always performs leftmost-first matching; POSIX
/// leftmost-longest semantics are not available in the `regex` crate's
/// public API. This only affects capture/replace boundaries on ambiguous
/// alternations, never whether a match exists — see DESIGN.md.
pub fn compile_program(descriptor: &PatternDescriptor) -> Result<Program, CacheError> {
    let opts = &descriptor.options;
    let pattern = if opts.anchored {
        format!("^(?:{})", descriptor.pattern)
    } else {
        descriptor.pattern.clone()
    };

    let regex = RegexBuilder::new(&pattern)
        .case_insensitive(opts.case_insensitive)
        .multi_line(opts.multi_line)
        .dot_matches_new_line(opts.dot_matches_new_line)
        .build()
        .map_err(|e| CacheError::CompileFailed { diagnostic: e.to_string() })?;

    let group_names = regex
        .capture_names()
        .enumerate()
        .filter_map(|(i, name)| name.map(|n| (n.to_string(), i)))
        .collect();

    let num_groups = regex.captures_len().saturating_sub(1);
    let size_bytes = estimate_program_size(&descriptor.pattern, num_groups);

    if let Some(limit) = opts.max_program_size {
        if size_bytes > limit {
            return Err(CacheError::CompileFailed {
                diagnostic: format!(
                    "compiled program ({size_bytes} bytes) exceeds configured max_program_size ({limit} bytes)"
                ),
            });
        }
    }

    LIVE_PROGRAMS.fetch_add(1, Ordering::SeqCst);
    Ok(Program { regex, size_bytes, group_names })
}
