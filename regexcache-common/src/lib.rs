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

//! Common primitives shared by the regexcache cache tiers: fingerprinting,
//! the error taxonomy, and the atomic metrics counters. No cache logic
//! lives here — see `regexcache-core`.

pub mod error;
pub mod hash;
pub mod lock_order;
pub mod metrics;

pub use error::{CacheError, ErrorKind, Result};
pub use hash::Fingerprint;
pub use lock_order::LockOrderGuard;
