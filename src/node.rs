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

//! One pending delivery to one destination peer.
//!
//! A node is linked into at most one of {incoming, busy, ready} at a time.
//! The incoming list is the only one that needs an intrusive, unsafe,
//! lock-free link (`next_queue`, mirrored on
//! `synthesizer_io_core::queue::Node`'s `child` pointer) — busy and ready
//! membership is tracked by ordinary owned collections in
//! [`crate::peer::Peer`], since the peer owner has exclusive (`&mut self`)
//! access to those for free. See `DESIGN.md` (OQ-2) for why this departs
//! from a fully intrusive three-list design.

use std::ptr;
use std::sync::atomic::{AtomicI64, AtomicPtr, Ordering};
use std::sync::{Arc, OnceLock};

use crate::tx::Tx;

/// Sentinel meaning "not yet resolved"; a node's timestamp is only ever
/// read once it has moved into the ready tree.
pub const UNSET: i64 = i64::MIN;

pub(crate) struct Inner {
    pub(crate) next_queue: AtomicPtr<Inner>,
    tx: OnceLock<Tx>,
    timestamp: AtomicI64,
}

/// A reference-counted handle to one queue-node. `Clone` plays the role of
/// the spec's `N::claim`.
#[derive(Clone)]
pub struct Node(pub(crate) Arc<Inner>);

impl Node {
    /// A fresh, unclaimed node: no transaction, no resolved timestamp, not
    /// linked anywhere.
    pub fn new() -> Node {
        Node(Arc::new(Inner {
            next_queue: AtomicPtr::new(ptr::null_mut()),
            tx: OnceLock::new(),
            timestamp: AtomicI64::new(UNSET),
        }))
    }

    /// An additional owned reference to the same node.
    pub fn claim(&self) -> Node {
        self.clone()
    }

    /// Identity used as part of the ready-tree sort key and for `pop`'s
    /// "is this the head" assertion.
    pub fn identity(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }

    /// The transaction this node was queued under. Panics if called before
    /// the node has been queued — a programming error, per spec.md §7
    /// ("committing a node without a TX").
    pub fn tx(&self) -> &Tx {
        self.0.tx.get().expect("Node::tx() called before the node was queued")
    }

    pub(crate) fn has_tx(&self) -> bool {
        self.0.tx.get().is_some()
    }

    /// Attach `tx` to this node. Precondition (spec.md §4.2): `N.tx ==
    /// null`; attaching twice is a programming error.
    pub(crate) fn attach(&self, tx: Tx) {
        self.0
            .tx
            .set(tx)
            .unwrap_or_else(|_| panic!("Node already attached to a transaction"));
    }

    /// Set once, when the node moves from busy into the ready tree.
    pub(crate) fn set_resolved_timestamp(&self, ts: i64) {
        self.0.timestamp.store(ts, Ordering::Relaxed);
    }

    pub(crate) fn resolved_timestamp(&self) -> i64 {
        self.0.timestamp.load(Ordering::Relaxed)
    }

    pub(crate) fn is_resolved(&self) -> bool {
        self.resolved_timestamp() != UNSET
    }

    pub(crate) fn from_raw(raw: *mut Inner) -> Node {
        // SAFETY: caller is handing back a pointer that was produced by
        // `Arc::into_raw` on a `Node`'s inner `Arc` and has not been freed.
        Node(unsafe { Arc::from_raw(raw as *const Inner) })
    }

    pub(crate) fn into_raw(self) -> *mut Inner {
        Arc::into_raw(self.0) as *mut Inner
    }
}

impl Default for Node {
    fn default() -> Node {
        Node::new()
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Node) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
impl Eq for Node {}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("identity", &self.identity())
            .field("resolved_timestamp", &self.resolved_timestamp())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_node_is_unresolved_and_unattached() {
        let n = Node::new();
        assert!(!n.is_resolved());
        assert!(!n.has_tx());
    }

    #[test]
    fn claim_shares_identity() {
        let n = Node::new();
        let c = n.claim();
        assert_eq!(n.identity(), c.identity());
        assert_eq!(n, c);
    }

    #[test]
    #[should_panic(expected = "already attached")]
    fn attaching_twice_panics() {
        let n = Node::new();
        n.attach(Tx::new());
        n.attach(Tx::new());
    }

    #[test]
    #[should_panic(expected = "called before the node was queued")]
    fn tx_before_attach_panics() {
        let n = Node::new();
        let _ = n.tx();
    }
}
