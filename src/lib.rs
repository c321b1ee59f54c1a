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

//! A lock-free distributed queue and staged-commit transaction engine.
//!
//! Peers send messages that reference opaque objects via transferable
//! handles. A message fan-out to several destinations ("a multicast") is
//! staged as a single [`Stage`] and committed atomically: every destination
//! agrees on the same global order for the multicast's deliveries, without
//! any process-wide lock or central sequencer. Ordering is carried entirely
//! by [`timestamp`] bookkeeping on a per-peer and per-transaction basis.
//!
//! The three cooperating pieces are:
//!
//! * [`timestamp`] — even/odd timestamp algebra (tentative vs. committed).
//! * [`peer`] — the per-peer lock-free incoming list, owner-local busy list
//!   and ready tree, with `peek`/`pop`/`finalize` semantics.
//! * [`stage`] — the three-phase submit/settle protocol that composes many
//!   per-destination [`node::Node`] insertions into one atomically-ordered
//!   event.

pub mod config;
pub mod error;
pub mod ids;
pub mod message;
pub mod node;
pub mod peer;
pub mod stage;
pub mod timestamp;
pub mod tx;

pub use error::Error;
pub use message::{Kind, Message};
pub use node::Node;
pub use peer::{Peer, PeerSender};
pub use stage::Stage;
pub use tx::Tx;
