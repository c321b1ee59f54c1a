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

//! The staged-commit transaction: collects messages bound for possibly
//! many destinations and commits them as a single, atomically-ordered
//! multicast (spec.md §4.3).

use crate::error::{Error, Result};
use crate::message::Message;
use crate::peer::PeerSender;
use crate::tx::Tx;

/// A builder scoped to one sender peer. Messages are held in an ordinary
/// `Vec` rather than spec.md's intrusive `next`-linked list — `Stage` owns
/// its messages exclusively and nothing else ever walks this list
/// concurrently, so there is nothing an intrusive link would buy here (see
/// `DESIGN.md` OQ-3); [`Message::mark_staged`]'s guard reproduces the
/// "staged at most once" precondition the intrusive link enforced.
pub struct Stage<T> {
    sender: PeerSender,
    messages: Vec<Message<T>>,
}

impl<T> Stage<T> {
    pub fn new(sender: PeerSender) -> Stage<T> {
        Stage { sender, messages: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Append `m`. Fails with [`Error::OutOfMemory`] if growing the
    /// backing storage fails; fails (panics) a message already staged
    /// elsewhere, via [`Message::mark_staged`] — a programming error, not
    /// a recoverable condition, per spec.md §7.
    pub fn add(&mut self, m: Message<T>) -> Result<()> {
        self.messages
            .try_reserve(1)
            .map_err(|_| Error::OutOfMemory)?;
        m.mark_staged();
        self.messages.push(m);
        Ok(())
    }

    /// Submit then settle every staged message as one transaction. Once
    /// submit begins this cannot fail: every staged message is guaranteed
    /// to reach its destination's incoming list or be silently dropped
    /// against a closed one (spec.md §4.3, §7).
    pub fn commit(self) {
        if self.messages.is_empty() {
            tracing::debug!("commit on an empty stage; nothing to do");
            return;
        }

        // Phase 1: adopt a TX. The first staged message's pre-allocated
        // transaction becomes the context for the whole stage, avoiding a
        // separate allocation per send.
        let tx: Tx = self.messages[0].tx().claim();

        // Phase 2: submit — link every node into its destination's
        // incoming list under the shared TX.
        for m in &self.messages {
            m.node().queue(&tx, m.dest());
        }

        // Phase 3: settle — freeze the TX once, then publish every node.
        // All destinations observe the same TX.timestamp, which is what
        // makes the multicast atomic: any two staged deliveries compare
        // equal on `tx` identity, so no receiver can observe a third,
        // unrelated transaction interleaved between them.
        tx.commit(&self.sender);
        for m in &self.messages {
            m.node().commit(m.dest());
        }

        tracing::trace!(
            tx = tx.identity(),
            timestamp = tx.timestamp(),
            count = self.messages.len(),
            "stage committed"
        );
        // Phase 4: cleanup — dropping `self` releases the stage's
        // temporary references to each message/node.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Kind;
    use crate::peer::Peer;
    use crate::timestamp;

    #[test]
    fn multicast_atomicity_same_tx_everywhere() {
        let (mut receivers, senders): (Vec<Peer>, Vec<PeerSender>) = {
            let pairs: Vec<(Peer, PeerSender)> = (0..3).map(|_| Peer::new()).collect();
            pairs.into_iter().unzip()
        };
        let (_sender_peer, sender_handle) = Peer::new();

        let mut stage = Stage::new(sender_handle);
        for dest in &senders {
            stage
                .add(Message::new(Kind::Custom(7u32), dest.clone()))
                .unwrap();
        }
        assert_eq!(stage.len(), 3);
        stage.commit();

        let mut seen_tx = None;
        for peer in receivers.iter_mut() {
            let n = peer.peek().cloned().expect("every peer sees the multicast");
            assert!(timestamp::is_committed(n.tx().timestamp()));
            match seen_tx {
                None => seen_tx = Some(n.tx().identity()),
                Some(expected) => assert_eq!(expected, n.tx().identity()),
            }
            peer.pop(&n);
        }
    }

    #[test]
    fn adding_an_already_staged_message_panics() {
        let (_peer, sender) = Peer::new();
        let m = Message::new(Kind::ObjectRelease(crate::ids::ObjectId(1)), sender.clone());
        let mut stage = Stage::new(sender);
        m.mark_staged(); // as if a concurrent stage already claimed it
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = stage.add(m);
        }));
        assert!(result.is_err());
    }

    #[test]
    fn empty_stage_commit_is_a_no_op() {
        let (_peer, sender) = Peer::new();
        let stage: Stage<()> = Stage::new(sender);
        stage.commit();
    }
}
