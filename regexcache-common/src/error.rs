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

//! The error taxonomy shared by every cache tier and the handle API.
//!
//! Each variant corresponds to one of the error kinds in the handle API
//! contract: `COMPILE_FAILED`, `PATTERN_TOO_LARGE`, `CONFIG_REJECTED`,
//! `INPUT_TOO_LARGE`, `MISUSE`.

use thiserror::Error;

/// The kind of a [`CacheError`], exposed separately so callers can match on
/// it without string comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    CompileFailed,
    PatternTooLarge,
    ConfigRejected,
    InputTooLarge,
    Misuse,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::CompileFailed => "COMPILE_FAILED",
            ErrorKind::PatternTooLarge => "PATTERN_TOO_LARGE",
            ErrorKind::ConfigRejected => "CONFIG_REJECTED",
            ErrorKind::InputTooLarge => "INPUT_TOO_LARGE",
            ErrorKind::Misuse => "MISUSE",
        }
    }
}

/// The unified error type returned by the handle API.
///
/// A failed operation never mutates cache state beyond metric increments and,
/// for [`CacheError::CompileFailed`], the brief negative-cache marker — see
/// §7 of the design spec.
#[derive(Debug, Error, Clone)]
pub enum CacheError {
    #[error("pattern compilation failed: {diagnostic}")]
    CompileFailed { diagnostic: String },

    #[error("pattern source exceeds the configured maximum of {limit} bytes (got {actual})")]
    PatternTooLarge { limit: usize, actual: usize },

    #[error("configuration rejected: {0}")]
    ConfigRejected(String),

    #[error("input exceeds the configured maximum of {limit} bytes (got {actual})")]
    InputTooLarge { limit: usize, actual: usize },

    #[error("misuse: {0}")]
    Misuse(String),
}

impl CacheError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CacheError::CompileFailed { .. } => ErrorKind::CompileFailed,
            CacheError::PatternTooLarge { .. } => ErrorKind::PatternTooLarge,
            CacheError::ConfigRejected(_) => ErrorKind::ConfigRejected,
            CacheError::InputTooLarge { .. } => ErrorKind::InputTooLarge,
            CacheError::Misuse(_) => ErrorKind::Misuse,
        }
    }

    pub fn diagnostic(&self) -> String {
        self.to_string()
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
