// Copyright 2024 The distq Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Constants fixed by the engine's design, collected in one place rather
//! than duplicated as magic numbers at each call site.

use std::ptr;

use crate::node;

/// A peer's clock and every transaction's timestamp start here. Even, so
/// tentative.
pub const INITIAL_CLOCK: i64 = 0;

/// Advancing a tentative clock always moves it by this much, keeping it
/// even (tentative) until a transaction explicitly freezes it odd.
pub const CLOCK_TICK: i64 = 2;

/// A peer's incoming list, permanently closed: future `queue` calls drop
/// their node instead of linking it (spec.md §4.2, "Closed"). The null
/// pointer, same as an ordinary unset `AtomicPtr` — the list can never
/// legitimately hold a null link otherwise, since every real node comes
/// from `Arc::into_raw`.
pub(crate) const CLOSED: *mut node::Inner = ptr::null_mut();

/// A peer's incoming list, empty but still open. Distinct from `CLOSED`:
/// a fixed, non-null, never-dereferenced address, so it can never collide
/// with a real heap-allocated node.
pub(crate) fn tail_sentinel() -> *mut node::Inner {
    static TAIL_TOKEN: u8 = 0;
    &TAIL_TOKEN as *const u8 as *mut node::Inner
}
