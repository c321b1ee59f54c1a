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

//! 63-bit timestamp algebra shared by peer clocks and transaction
//! timestamps: an even value is tentative and may still grow, an odd value
//! is committed and frozen forever.
//!
//! Every operation here uses [`Ordering::Relaxed`]. That is deliberate, not
//! an oversight: synchronizing a clock scalar publishes no other state, so
//! there is nothing for a stronger ordering to protect. The one edge that
//! actually carries "this message's state is visible" is the
//! `n_committed` release/acquire pair in [`crate::peer`] — do not
//! "upgrade" these to `SeqCst` to make a bug disappear; it won't be this
//! module's fault.

use std::sync::atomic::{AtomicI64, Ordering};

/// True if `v`'s LSB marks it committed.
#[inline]
pub fn is_committed(v: i64) -> bool {
    v & 1 == 1
}

/// Raise `t` to at least `to`, looping on a relaxed CAS. `to` must be even
/// (the caller is synchronizing against a tentative value, never a frozen
/// one). Undefined to call once `t` is already committed; `distq` logs a
/// warning and proceeds rather than panicking, since the original design
/// treats this as a documented misuse rather than a hard contract.
pub fn force_sync(t: &AtomicI64, to: i64) {
    debug_assert!(to & 1 == 0, "force_sync target must be an even (tentative) value");
    let mut cur = t.load(Ordering::Relaxed);
    loop {
        if is_committed(cur) {
            tracing::warn!(current = cur, target = to, "force_sync against a committed timestamp");
        }
        if cur >= to {
            return;
        }
        match t.compare_exchange_weak(cur, to, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => return,
            Err(observed) => cur = observed,
        }
    }
}

/// Like [`force_sync`], but if `t` is already committed, leaves it alone
/// and returns the committed value. Returns the post-operation value of
/// `t` either way.
pub fn try_sync(t: &AtomicI64, to: i64) -> i64 {
    debug_assert!(to & 1 == 0, "try_sync target must be an even (tentative) value");
    let mut cur = t.load(Ordering::Relaxed);
    loop {
        if is_committed(cur) || cur >= to {
            return cur;
        }
        match t.compare_exchange_weak(cur, to, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => return to,
            Err(observed) => cur = observed,
        }
    }
}

/// Advance a tentative clock by one tick (`+2`), keeping it even. Panics
/// (via `debug_assert!`) if `t` somehow already reads as committed — that
/// would mean a peer clock was mistaken for a transaction timestamp.
pub fn tick(t: &AtomicI64) -> i64 {
    let prev = t.fetch_add(crate::config::CLOCK_TICK, Ordering::Relaxed);
    debug_assert!(!is_committed(prev), "tick() on an already-committed timestamp");
    prev + crate::config::CLOCK_TICK
}

/// Freeze a tentative value odd (`+1`). Callers must guarantee only one
/// thread ever commits a given atomic — `distq` only calls this from
/// `Tx::commit`, which a [`crate::stage::Stage`] calls at most once per
/// transaction.
pub fn commit(t: &AtomicI64) -> i64 {
    let prev = t.fetch_add(1, Ordering::Relaxed);
    debug_assert!(!is_committed(prev), "commit() on an already-committed timestamp");
    prev + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn force_sync_raises_to_target() {
        let t = AtomicI64::new(4);
        force_sync(&t, 10);
        assert_eq!(t.load(Ordering::Relaxed), 10);
    }

    #[test]
    fn force_sync_never_lowers() {
        let t = AtomicI64::new(10);
        force_sync(&t, 4);
        assert_eq!(t.load(Ordering::Relaxed), 10);
    }

    #[test]
    fn try_sync_leaves_committed_untouched() {
        let t = AtomicI64::new(5); // odd => committed
        let result = try_sync(&t, 100);
        assert_eq!(result, 5);
        assert_eq!(t.load(Ordering::Relaxed), 5);
    }

    #[test]
    fn try_sync_raises_tentative() {
        let t = AtomicI64::new(2);
        let result = try_sync(&t, 8);
        assert_eq!(result, 8);
        assert_eq!(t.load(Ordering::Relaxed), 8);
    }

    #[test]
    fn tick_advances_by_two() {
        let t = AtomicI64::new(0);
        assert_eq!(tick(&t), 2);
        assert_eq!(tick(&t), 4);
    }

    #[test]
    fn commit_flips_to_odd() {
        let t = AtomicI64::new(6);
        assert_eq!(commit(&t), 7);
        assert!(is_committed(t.load(Ordering::Relaxed)));
    }
}
