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

//! Errors surfaced by the engine.
//!
//! The engine only ever reports one condition to its callers: running out
//! of memory before a stage's submit phase begins. "Closed" (queuing
//! against a finalized peer) is not an error — it is silently absorbed,
//! see [`crate::peer::PeerSender::queue`]. Contract violations (re-queueing
//! a linked node, popping a node that isn't the head, ...) are programming
//! errors, reported with `assert!`/`debug_assert!`, not through this type.

use std::fmt;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Error {
    /// Allocating a message, node, or stage element failed. Can only occur
    /// before a stage's submit phase begins; once submit starts, every
    /// staged message is guaranteed to reach its destination.
    OutOfMemory,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::OutOfMemory => write!(f, "out of memory while staging a message"),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;
