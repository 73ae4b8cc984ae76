// Level-triggered I/O readiness demultiplexer built on the select syscall.
//
// SPDX-License-Identifier: Apache-2.0
//
// Written in 2021-2025 by
//     Dr. Maxim Orlovsky <orlovsky@ubideco.org>
//     Alexis Sellier <alexis@cloudhead.io>
//
// Copyright 2022-2025 UBIDECO Labs, InDCS, Lugano, Switzerland. All Rights reserved.
// Copyright 2021-2023 Alexis Sellier <alexis@cloudhead.io>. All Rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use this file except
// in compliance with the License. You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software distributed under the License
// is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express
// or implied. See the License for the specific language governing permissions and limitations under
// the License.

//! Events which can be registered within the demultiplexer.

use std::fmt::{self, Display, Formatter};
use std::os::unix::io::RawFd;
use std::sync::Arc;

/// Direction of the I/O interest an event is registered for.
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug)]
pub enum Direction {
    /// Interest in the descriptor having data to read.
    Read,
    /// Interest in the descriptor being ready for write operations.
    Write,
    /// No interest. Events with this direction are ignored by the demultiplexer.
    None,
}

impl Direction {
    pub fn is_read(self) -> bool { self == Direction::Read }
    pub fn is_write(self) -> bool { self == Direction::Write }
    pub fn is_none(self) -> bool { self == Direction::None }
}

impl Display for Direction {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Read => f.write_str("read"),
            Direction::Write => f.write_str("write"),
            Direction::None => f.write_str("none"),
        }
    }
}

/// I/O event which may be registered for polling.
///
/// The demultiplexer does not own events: it keeps only a weak reference to them, so the event
/// lifetime stays with its creator. An event dropped before it gets removed from the
/// demultiplexer is never dispatched.
pub trait Event {
    /// OS-level I/O handle the event is interested in. Must be non-negative for the event to be
    /// registered.
    fn descriptor(&self) -> RawFd;

    /// Direction of the interest.
    fn direction(&self) -> Direction;
}

impl<E: Event + ?Sized> Event for Arc<E> {
    fn descriptor(&self) -> RawFd { E::descriptor(self) }
    fn direction(&self) -> Direction { E::direction(self) }
}
