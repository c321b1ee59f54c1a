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

//! The message carrier: four tagged variants sharing a node and a
//! pre-allocated transaction, collaborators in spec.md §6 that this crate
//! supplements minimally so [`crate::stage::Stage`] has something concrete
//! to stage and commit (see `SPEC_FULL.md` §[MESSAGE]).
//!
//! Resolving an [`ObjectId`](crate::ids::ObjectId) or
//! [`HandleId`](crate::ids::HandleId) to a destination peer is explicitly
//! the caller's job — that's the excluded naming/rbtree layer's
//! responsibility in the original system, so `Message::new` takes the
//! resolved [`PeerSender`] directly rather than performing any lookup.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::ids::{HandleId, ObjectId};
use crate::node::Node;
use crate::peer::PeerSender;
use crate::tx::Tx;

/// The payload-specific part of a message. `T` is the CUSTOM payload type;
/// callers pick whatever representation suits them (bytes, an enum of
/// application messages, ...) — the engine never inspects it.
pub enum Kind<T> {
    Custom(T),
    ObjectRelease(ObjectId),
    HandleRelease(HandleId),
    HandleDestruction(HandleId),
}

/// One pre-shaped delivery, ready to be staged. Every message owns its own
/// node and its own freshly-allocated transaction; a [`crate::stage::Stage`]
/// adopts exactly one staged message's transaction for the whole batch and
/// discards the rest, avoiding a separate allocation purely for the
/// adoption decision.
pub struct Message<T> {
    kind: Kind<T>,
    dest: PeerSender,
    node: Node,
    tx: Tx,
    staged: AtomicBool,
}

impl<T> Message<T> {
    pub fn new(kind: Kind<T>, dest: PeerSender) -> Message<T> {
        Message {
            kind,
            dest,
            node: Node::new(),
            tx: Tx::new(),
            staged: AtomicBool::new(false),
        }
    }

    pub fn kind(&self) -> &Kind<T> {
        &self.kind
    }

    pub fn dest(&self) -> &PeerSender {
        &self.dest
    }

    pub(crate) fn node(&self) -> &Node {
        &self.node
    }

    pub(crate) fn tx(&self) -> &Tx {
        &self.tx
    }

    /// `true` once this message has been handed to a
    /// [`crate::stage::Stage`]. Reproduces the "`m.next == null`"
    /// at-most-staged-once precondition from spec.md §4.3 without a
    /// literal intrusive link field (see `DESIGN.md` OQ-3).
    pub(crate) fn mark_staged(&self) {
        let already = self.staged.swap(true, Ordering::AcqRel);
        assert!(!already, "message staged twice concurrently");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::Peer;

    #[test]
    fn new_message_is_unstaged() {
        let (_peer, sender) = Peer::new();
        let m = Message::new(Kind::Custom(42u32), sender);
        assert!(!m.staged.load(Ordering::Relaxed));
    }

    #[test]
    #[should_panic(expected = "staged twice")]
    fn marking_staged_twice_panics() {
        let (_peer, sender) = Peer::new();
        let m = Message::new(Kind::Custom(()), sender);
        m.mark_staged();
        m.mark_staged();
    }
}
