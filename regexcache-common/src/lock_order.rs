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

//! Lock-order assertion: no code path may hold more than one
//! cache-internal lock on the same thread at once. Each cache tier's
//! lock-acquiring methods take a [`LockOrderGuard`] for exactly as long as
//! the underlying `parking_lot`/`dashmap` guard is held; nesting two on one
//! thread trips a `debug_assert!` in debug builds rather than silently
//! permitting a lock-order cycle. Release builds pay nothing for this:
//! the thread-local is never touched.

use std::cell::Cell;

thread_local! {
    static HELD: Cell<bool> = const { Cell::new(false) };
}

/// RAII marker held for the duration of one cache-internal lock.
pub struct LockOrderGuard {
    _not_send_sync: std::marker::PhantomData<*const ()>,
}

impl LockOrderGuard {
    /// Record that this thread is about to take a cache-internal lock.
    /// Must be dropped no later than the lock guard it accompanies.
    pub fn acquire() -> Self {
        if cfg!(debug_assertions) {
            HELD.with(|held| {
                debug_assert!(!held.get(), "cache-internal lock acquired while another is already held on this thread");
                held.set(true);
            });
        }
        Self { _not_send_sync: std::marker::PhantomData }
    }
}

impl Drop for LockOrderGuard {
    fn drop(&mut self) {
        if cfg!(debug_assertions) {
            HELD.with(|held| held.set(false));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequential_acquire_release_is_fine() {
        {
            let _g = LockOrderGuard::acquire();
        }
        {
            let _g = LockOrderGuard::acquire();
        }
    }

    #[test]
    #[should_panic(expected = "cache-internal lock acquired while another is already held")]
    #[cfg(debug_assertions)]
    fn nested_acquire_on_same_thread_panics() {
        let _outer = LockOrderGuard::acquire();
        let _inner = LockOrderGuard::acquire();
    }
}
