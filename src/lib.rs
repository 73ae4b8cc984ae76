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

#![deny(
    non_upper_case_globals,
    non_camel_case_types,
    non_snake_case,
    unused_mut,
    unused_imports,
    dead_code,
    //missing_docs
)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Level-triggered readiness demultiplexer ([`Demux`]) built on the `select(2)` syscall.
//!
//! The demultiplexer tracks events, each of them interested either in reading from or in
//! writing to a file descriptor. On each [`Demux::poll`] it blocks until at least one of the
//! descriptors gets ready (or the timeout elapses), and then calls a single handler once per
//! ready event, going from the highest descriptor to the lowest one, with the read event of a
//! descriptor coming before its write event.
//!
//! Registrations can be frozen ([`Demux::freeze`]) to temporarily exclude them from polling
//! without losing them, and thawed back ([`Demux::thaw`]).
//!
//! Each poll works on private copies of the registration masks, so it can be split into
//! [`Demux::prepare`], [`Cycle::wait`] and dispatching with [`Demux::next_ready`]; registrations
//! may change while the cycle is blocked on the syscall.
//!
//! [`probe_writable`] is a standalone check for a single descriptor becoming writable.

#[macro_use]
extern crate amplify;

mod demux;
mod event;
pub mod fdmask;
pub mod poller;
mod probe;
mod registry;

pub use demux::{Cycle, Demux, Error, Handler};
pub use event::{Direction, Event};
pub use fdmask::FdMask;
pub use poller::{Select, Selector};
pub use probe::{probe_writable, probe_writable_with};
pub use registry::Registry;
