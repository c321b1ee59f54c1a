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

//! The per-peer distributed queue: a lock-free multi-producer incoming
//! list feeding an owner-private busy list and ready tree.
//!
//! Mirrors the `Sender<T>` / `Receiver<T>` split in
//! `synthesizer_io_core::queue`: [`PeerSender`] is the cheaply-`Clone`able,
//! `Send + Sync` producer handle, [`Peer`] is the owner/receiver handle
//! whose mutating methods take `&mut self`. That split turns spec.md §5's
//! "the peer owner must serialize `peek`/`pop`/`finalize` as if holding a
//! write-lock" from a documented discipline into a compile-time guarantee:
//! there is no safe way to call a `&mut Peer` method from two places at
//! once, and `Peer` is intentionally not `Clone`.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, AtomicPtr, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use crate::config;
use crate::node::{self, Node};
use crate::timestamp;
use crate::tx::Tx;

/// `(timestamp, tx_identity, node_identity)` — the ready tree's sort key.
/// Timestamps can tie when two sends issue from the same sender at the
/// same tick; the pointer-identity tie-break gives every peer the same
/// answer, since both see the same (process-local) addresses.
type ReadyKey = (i64, usize, usize);

fn is_tail(p: *mut node::Inner) -> bool {
    p == config::tail_sentinel()
}

pub(crate) struct Shared {
    incoming_head: AtomicPtr<node::Inner>,
    clock: AtomicI64,
    n_committed: AtomicI64,
    waiter: (Mutex<()>, Condvar),
}

/// The producer-facing handle: queuing and committing deliveries, and
/// reading (not mutating) the peer's clock/ready-counter.
#[derive(Clone)]
pub struct PeerSender(Arc<Shared>);

/// The owner/receiver handle: `peek`, `pop`, `finalize`. Not `Clone` — a
/// peer has exactly one owner.
pub struct Peer {
    shared: Arc<Shared>,
    busy: Vec<Node>,
    ready: BTreeMap<ReadyKey, Node>,
    local: i64,
}

impl PeerSender {
    pub fn clock(&self) -> i64 {
        self.0.clock.load(Ordering::Relaxed)
    }

    /// Advance this peer's clock by one tick. Exposed for callers outside
    /// the engine that need to mint a fresh tentative time (e.g. a
    /// side-channel sender); the engine itself only advances `clock` via
    /// `force_sync` in `queue`/`commit`.
    pub fn tick(&self) -> i64 {
        timestamp::tick(&self.0.clock)
    }

    /// `true` iff there is at least one committed, undelivered message —
    /// pairs with `commit`'s release store; observing `true` here implies
    /// every write that produced it is visible.
    pub fn poll(&self) -> bool {
        self.0.n_committed.load(Ordering::Acquire) > 0
    }

    fn wake(&self) {
        let (lock, cvar) = &self.0.waiter;
        let _guard = lock.lock().unwrap();
        cvar.notify_all();
    }

    /// Block the calling thread until [`PeerSender::poll`] would return
    /// `true`. Cancellation (e.g. via a timeout wrapped around this call)
    /// is the caller's responsibility — the engine itself has no
    /// suspension points of its own.
    pub fn wait_until_ready(&self) {
        let (lock, cvar) = &self.0.waiter;
        let mut guard = lock.lock().unwrap();
        while !self.poll() {
            guard = cvar.wait(guard).unwrap();
        }
    }
}

impl Node {
    /// Link this node at the head of `dest`'s incoming list via CAS, then
    /// forward-sync `tx`'s timestamp up to `dest`'s current clock.
    ///
    /// Precondition: the node has no transaction yet. If `dest` is closed,
    /// the node is dropped immediately (spec.md §7, "Closed" — silently
    /// absorbed, not an error).
    pub fn queue(&self, tx: &Tx, dest: &PeerSender) {
        assert!(!self.has_tx(), "Node::queue precondition violated: node already has a transaction");
        self.attach(tx.claim());
        let raw = self.clone().into_raw();
        loop {
            let head = dest.0.incoming_head.load(Ordering::Acquire);
            if head.is_null() {
                tracing::debug!("queue against a closed peer; message dropped");
                // Reclaim and drop the strong ref we took for the list.
                drop(Node::from_raw(raw));
                return;
            }
            // SAFETY: `raw` was just produced by `into_raw` above and is
            // not yet visible to any other thread (the CAS below is what
            // publishes it), so writing its link field is race-free.
            unsafe {
                (*raw).next_queue.store(head, Ordering::Relaxed);
            }
            match dest.0.incoming_head.compare_exchange_weak(
                head,
                raw,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(_) => continue,
            }
        }
        timestamp::force_sync(tx.timestamp_atomic(), dest.clock());
    }

    /// Publish this (already-committed) node to `dest`: bump its
    /// ready-counter (the release edge `poll` pairs with), then narrow —
    /// but not close — the side-channel race by forward-syncing `dest`'s
    /// clock past this node's committed timestamp.
    pub fn commit(&self, dest: &PeerSender) {
        let committed_ts = self.tx().timestamp();
        debug_assert!(
            timestamp::is_committed(committed_ts),
            "Node::commit called before its transaction was committed"
        );
        let prev = dest.0.n_committed.fetch_add(1, Ordering::Release);
        if prev + 1 > 0 {
            dest.wake();
        }
        timestamp::force_sync(&dest.0.clock, committed_ts + 1);
    }
}

impl Peer {
    /// A fresh, empty peer and its producer-facing handle.
    pub fn new() -> (Peer, PeerSender) {
        let shared = Arc::new(Shared {
            incoming_head: AtomicPtr::new(config::tail_sentinel()),
            clock: AtomicI64::new(crate::config::INITIAL_CLOCK),
            n_committed: AtomicI64::new(0),
            waiter: (Mutex::new(()), Condvar::new()),
        });
        let peer = Peer {
            shared: shared.clone(),
            busy: Vec::new(),
            ready: BTreeMap::new(),
            local: crate::config::INITIAL_CLOCK,
        };
        (peer, PeerSender(shared))
    }

    pub fn sender(&self) -> PeerSender {
        PeerSender(self.shared.clone())
    }

    pub fn clock(&self) -> i64 {
        self.shared.clock.load(Ordering::Relaxed)
    }

    pub fn poll(&self) -> bool {
        self.shared.n_committed.load(Ordering::Acquire) > 0
    }

    /// `n_committed`'s raw value, for tests/diagnostics. May be transiently
    /// negative (spec.md §4.2, `pop`): benign, reconciled by `poll`'s
    /// acquire barrier.
    pub fn n_committed(&self) -> i64 {
        self.shared.n_committed.load(Ordering::Relaxed)
    }

    fn drain_incoming(&self) -> Vec<Node> {
        // Never swap `tail_sentinel()` in blind: that would momentarily
        // reopen an already-closed list, wide enough a window for a
        // concurrent `Node::queue` to land a node we'd then clobber by
        // writing `CLOSED` back over it. Check first and bail without
        // writing anything if the list is already closed.
        if self.shared.incoming_head.load(Ordering::Acquire).is_null() {
            return Vec::new();
        }
        let old = self.shared.incoming_head.swap(config::tail_sentinel(), Ordering::AcqRel);
        debug_assert!(
            !old.is_null(),
            "drain_incoming raced with a close; only the exclusive owner \
             (peek/finalize, both &mut self) ever calls this, so the check above \
             and this swap cannot straddle a finalize"
        );
        if is_tail(old) {
            return Vec::new();
        }
        let mut nodes = Vec::new();
        let mut cur = old;
        while !is_tail(cur) {
            let node = Node::from_raw(cur);
            // SAFETY: `cur` is a live node previously published via the
            // CAS in `Node::queue`; reading its link is race-free because
            // only the single owner thread ever drains the list.
            let next = unsafe { (*cur).next_queue.load(Ordering::Relaxed) };
            nodes.push(node);
            cur = next;
        }
        // The list is LIFO (most-recently-queued first); reverse to
        // arrival order, matching synthesizer_io_core::queue::Node::reverse.
        nodes.reverse();
        nodes
    }

    fn promote_committed(&mut self) {
        let mut i = 0;
        while i < self.busy.len() {
            let ts = self.busy[i].tx().timestamp();
            if timestamp::is_committed(ts) {
                let n = self.busy.swap_remove(i);
                self.insert_ready(n, ts);
            } else {
                i += 1;
            }
        }
    }

    fn insert_ready(&mut self, n: Node, ts: i64) {
        n.set_resolved_timestamp(ts);
        let key = (ts, n.tx().identity(), n.identity());
        self.ready.insert(key, n);
    }

    fn ready_first_key(&self) -> Option<ReadyKey> {
        self.ready.keys().next().copied()
    }

    fn ready_last_key(&self) -> Option<ReadyKey> {
        self.ready.keys().next_back().copied()
    }

    /// Resolve the next deliverable message, if any. See spec.md §4.2 for
    /// the two-pass prefetch/sync algorithm this implements verbatim.
    pub fn peek(&mut self) -> Option<&Node> {
        if let Some(key) = self.ready_first_key() {
            if key.0 < self.local {
                return self.ready.get(&key);
            }
        }

        // Prefetch: promote anything in busy that's already committed,
        // then drain incoming onto busy exactly once and re-promote.
        self.promote_committed();
        let drained = self.drain_incoming();
        self.busy.extend(drained);
        self.promote_committed();

        let first_key = match self.ready_first_key() {
            Some(k) => k,
            None => return None,
        };

        if first_key.0 >= self.local {
            let last_key = self.ready_last_key().unwrap();
            self.local = last_key.0 + 1;
            timestamp::force_sync(&self.shared.clock, self.local);

            let local = self.local;
            let mut i = 0;
            while i < self.busy.len() {
                let synced = timestamp::try_sync(self.busy[i].tx().timestamp_atomic(), local);
                if timestamp::is_committed(synced) {
                    let n = self.busy.swap_remove(i);
                    self.insert_ready(n, synced);
                } else {
                    i += 1;
                }
            }
        }

        self.ready.values().next()
    }

    /// Remove `n` from the front of the ready queue. `n` must be the node
    /// most recently returned by [`Peer::peek`] — a programming error
    /// otherwise (asserted, not recoverable).
    pub fn pop(&mut self, n: &Node) {
        let key = self.ready_first_key().expect("pop called with an empty ready queue");
        assert_eq!(key.2, n.identity(), "pop: n is not the head returned by peek");
        let popped = self.ready.remove(&key).expect("ready key just observed must still be present");
        debug_assert!(popped == *n);
        popped.set_resolved_timestamp(node::UNSET);
        self.shared.n_committed.fetch_sub(1, Ordering::Relaxed);
    }

    /// Tear the peer down: close `incoming` permanently (future `queue`
    /// calls drop their node) and return every still-queued node —
    /// ready-tree nodes first, then busy, then whatever was left in
    /// incoming — for the caller to drop. Idempotent: a second call
    /// returns an empty chain.
    pub fn finalize(&mut self) -> Vec<Node> {
        let old_head = self.shared.incoming_head.swap(config::CLOSED, Ordering::AcqRel);
        let mut incoming_nodes = Vec::new();
        if !old_head.is_null() && !is_tail(old_head) {
            let mut cur = old_head;
            while !is_tail(cur) {
                let node = Node::from_raw(cur);
                let next = unsafe { (*cur).next_queue.load(Ordering::Relaxed) };
                incoming_nodes.push(node);
                cur = next;
            }
            incoming_nodes.reverse();
        }

        let mut chain: Vec<Node> = std::mem::take(&mut self.ready).into_values().collect();
        chain.extend(std::mem::take(&mut self.busy));
        chain.extend(incoming_nodes);
        tracing::debug!(count = chain.len(), "peer finalized");
        chain
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    // Shadows the prelude `#[test]`: every test below runs with `tracing`
    // output captured and printed on failure, the way `submerge-base`
    // wires its own tests.
    use test_log::test;

    #[test]
    fn s1_empty_peer_peek_is_none() {
        let (mut peer, _sender) = Peer::new();
        assert!(peer.peek().is_none());
    }

    #[test]
    fn s1_double_finalize_is_idempotent() {
        let (mut peer, _sender) = Peer::new();
        let first = peer.finalize();
        assert!(first.is_empty());
        let second = peer.finalize();
        assert!(second.is_empty());
    }

    #[test]
    fn s2_empty_tx_commit() {
        let (_peer, sender) = Peer::new();
        let tx = Tx::new();
        assert_eq!(tx.timestamp(), 0);
        tx.commit(&sender);
        assert_eq!(tx.timestamp(), 1);
    }

    #[test]
    fn s3_unicast_isolated() {
        let (_p1, s1) = Peer::new();
        let (mut p2, s2) = Peer::new();

        let node = Node::new();
        let tx = Tx::new();
        node.queue(&tx, &s2);
        tx.commit(&s1);
        node.commit(&s2);

        assert_eq!(p2.clock(), 2);
        assert!(p2.poll());
        let popped = p2.peek().cloned().expect("message should be visible");
        assert_eq!(popped, node);
        p2.pop(&popped);
        assert!(!p2.poll());
    }

    #[test]
    fn s4_unicast_contested() {
        let (p1, sender1) = Peer::new();
        let (p2, sender2) = Peer::new();
        let (mut recv, recv_sender) = Peer::new();
        drop(p1);
        drop(p2);

        let node1 = Node::new();
        let node2 = Node::new();
        let tx1 = Tx::new();
        let tx2 = Tx::new();

        node1.queue(&tx1, &recv_sender);
        node2.queue(&tx2, &recv_sender);

        tx1.commit(&sender1);
        node1.commit(&recv_sender);

        let first = recv.peek().cloned().expect("tx1's node must resolve");
        assert_eq!(first, node1);
        assert_eq!(tx1.timestamp(), 1);
        assert_eq!(tx2.timestamp(), 2); // forced to sync past tx1 while still tentative
        assert_eq!(recv.clock(), 2);
        recv.pop(&first);

        tx2.commit(&sender2);
        node2.commit(&recv_sender);
        assert_eq!(tx2.timestamp(), 3);
        assert_eq!(recv.clock(), 4);

        let second = recv.peek().cloned().expect("tx2's node must resolve");
        assert_eq!(second, node2);
        recv.pop(&second);
        assert!(!recv.poll());
    }

    #[test]
    fn s5_multicast_to_k_peers() {
        const K: usize = 4;
        let mut peers: Vec<(Peer, PeerSender)> = (0..K).map(|_| Peer::new()).collect();
        let (_sender_peer, sender) = Peer::new();

        let tx = Tx::new();
        let nodes: Vec<Node> = peers
            .iter()
            .map(|(_, dest_sender)| {
                let n = Node::new();
                n.queue(&tx, dest_sender);
                n
            })
            .collect();

        tx.commit(&sender);
        for (node, (_, dest_sender)) in nodes.iter().zip(peers.iter()) {
            node.commit(dest_sender);
        }

        for (peer, _) in peers.iter_mut() {
            let n = peer.peek().cloned().expect("every peer must see the multicast");
            assert!(timestamp::is_committed(n.tx().timestamp()));
            assert_eq!(n.tx().identity(), tx.identity());
            peer.pop(&n);
            assert!(!peer.poll());
        }
    }

    #[test]
    fn s6_finalize_races_with_queue() {
        let (mut peer, sender) = Peer::new();
        let chain = peer.finalize();
        assert!(chain.is_empty());

        // A send arriving after finalize must be dropped, never delivered.
        let node = Node::new();
        let tx = Tx::new();
        node.queue(&tx, &sender);
        assert!(peer.finalize().is_empty());
    }
}
