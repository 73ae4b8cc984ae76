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

//! Dispatch cycle of the demultiplexer.

#![allow(unused_variables)] // because we need them for feature-gated logger

use std::io;
use std::mem;
use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::time::Duration;

use crate::fdmask::{words_for, FdMask};
use crate::poller::{select_retrying, Select, Selector};
use crate::{Direction, Event, Registry};

/// Demultiplexer errors.
#[derive(Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum Error {
    /// readiness syscall has failed. Details: {0}
    #[from]
    Select(io::Error),
}

impl Error {
    /// OS error code reported by the syscall.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Error::Select(err) => err.raw_os_error(),
        }
    }
}

/// Callback invoked by [`Demux::poll`] for each ready event.
pub type Handler<E> = Box<dyn FnMut(Arc<E>) + Send>;

/// Single readiness cycle, detached from the [`Demux`] which has prepared it.
///
/// The cycle owns private copies of the readiness masks, so the demultiplexer registrations may
/// be changed while the cycle is blocked in [`Cycle::wait`]. Such changes are picked up by the
/// next cycle only.
#[derive(Debug)]
pub struct Cycle {
    read: FdMask,
    write: FdMask,
    max_fd: RawFd,
    ready: bool,
    cursor: RawFd,
    direction: Direction,
}

impl Cycle {
    fn new(read: FdMask, write: FdMask, max_fd: RawFd) -> Self {
        Self {
            read,
            write,
            max_fd,
            ready: false,
            cursor: max_fd,
            direction: Direction::Read,
        }
    }

    /// Highest descriptor covered by the cycle.
    pub fn max_fd(&self) -> RawFd { self.max_fd }

    /// Blocks on the `select(2)` syscall until any of the descriptors becomes ready or the timeout
    /// elapses. See [`Cycle::wait_with`].
    pub fn wait(&mut self, timeout: Option<Duration>) -> Result<usize, Error> {
        self.wait_with(&mut Select, timeout)
    }

    /// Blocks on the selector until any of the descriptors becomes ready or the timeout elapses.
    /// `None` timeout blocks indefinitely.
    ///
    /// Interruptions by signals are retried transparently.
    ///
    /// # Returns
    ///
    /// Number of ready descriptors reported by the selector. When it is zero, the cycle yields no
    /// ready events.
    ///
    /// # Errors
    ///
    /// With [`Error::Select`] on any other syscall failure; the cycle then yields no ready events.
    pub fn wait_with<S: Selector + ?Sized>(
        &mut self,
        selector: &mut S,
        timeout: Option<Duration>,
    ) -> Result<usize, Error> {
        self.ready = false;
        let Some(nfds) = self.max_fd.checked_add(1) else {
            #[cfg(feature = "log")]
            log::error!(target: "demux", "Descriptor {} is out of the select range", self.max_fd);
            return Err(Error::Select(io::Error::from_raw_os_error(libc::EBADF)));
        };

        #[cfg(feature = "log")]
        log::trace!(target: "demux", "Selecting over {nfds} descriptors with timeout {timeout:?}");

        let count = select_retrying(
            selector,
            nfds,
            Some(&mut self.read),
            Some(&mut self.write),
            timeout,
        )
        .map_err(|err| {
            #[cfg(feature = "log")]
            log::error!(target: "demux", "Error during select: {err}");
            Error::from(err)
        })?;
        self.ready = count > 0;
        self.cursor = self.max_fd;
        self.direction = Direction::Read;

        #[cfg(feature = "log")]
        log::trace!(target: "demux", "Select resulted in {count} ready descriptor(s)");

        Ok(count)
    }

    /// Takes the next ready event registered in the provided registry.
    ///
    /// Descriptors are visited from the highest to the lowest; for the same descriptor the read
    /// event comes before the write event. Registrations are looked up at the moment of the call,
    /// so events removed after the cycle was prepared are skipped.
    pub fn next_ready<E: ?Sized>(&mut self, registry: &Registry<E>) -> Option<Arc<E>> {
        if !self.ready {
            return None;
        }
        while self.cursor >= 0 {
            let fd = self.cursor;
            let direction = self.direction;
            let fired = match direction {
                Direction::Read => {
                    self.direction = Direction::Write;
                    self.read.is_set(fd)
                }
                _ => {
                    self.direction = Direction::Read;
                    self.cursor -= 1;
                    self.write.is_set(fd)
                }
            };
            if !fired {
                continue;
            }
            if let Some(event) = registry.event(fd, direction) {
                return Some(event);
            }

            #[cfg(feature = "log")]
            {
                if registry.is_registered(fd, direction) {
                    log::warn!(target: "demux", "Event registered for {direction} on fd {fd} was dropped without being removed");
                }
            }
        }
        None
    }
}

/// Level-triggered readiness demultiplexer.
///
/// Tracks events registered for read or write readiness of their descriptors and dispatches the
/// ready ones to a single handler on each [`Demux::poll`]. Events may be temporarily excluded from
/// polling with [`Demux::freeze`] without losing their registration.
///
/// The demultiplexer does no internal locking. When shared between threads, registration calls
/// must be serialized against [`Demux::prepare`] and dispatching; only [`Cycle::wait`] may run
/// unguarded.
pub struct Demux<E: ?Sized, S: Selector = Select> {
    registry: Registry<E>,
    selector: S,
    handler: Option<Handler<E>>,
    /// Transient masks reused between cycles.
    transient: (FdMask, FdMask),
}

impl<E: Event + ?Sized> Default for Demux<E> {
    fn default() -> Self { Self::new() }
}

impl<E: Event + ?Sized> Demux<E> {
    /// Constructs empty demultiplexer using the `select(2)` syscall and having no handler.
    pub fn new() -> Self { Self::with_selector(Select) }
}

impl<E: Event + ?Sized, S: Selector> Demux<E, S> {
    /// Constructs empty demultiplexer using the provided selector and having no handler.
    pub fn with_selector(selector: S) -> Self {
        Self {
            registry: Registry::new(),
            selector,
            handler: None,
            transient: Default::default(),
        }
    }

    /// Sets the handler, consuming the demultiplexer.
    pub fn with_handler(mut self, handler: impl FnMut(Arc<E>) + Send + 'static) -> Self {
        self.set_handler(handler);
        self
    }

    /// Sets the handler receiving ready events, returning the previously set one.
    ///
    /// The handler has no access to the demultiplexer, so it can't change registrations while
    /// events are dispatched. Callers which need that should drive the cycle by themselves with
    /// [`Demux::prepare`], [`Cycle::wait`] and [`Demux::next_ready`], changing registrations
    /// between the ready events.
    pub fn set_handler(
        &mut self,
        handler: impl FnMut(Arc<E>) + Send + 'static,
    ) -> Option<Handler<E>> {
        self.handler.replace(Box::new(handler))
    }

    /// Removes the handler. Ready events are not dispatched until a new handler is set.
    pub fn take_handler(&mut self) -> Option<Handler<E>> { self.handler.take() }

    /// Checks whether the handler is set.
    pub fn has_handler(&self) -> bool { self.handler.is_some() }

    /// Registrations of the demultiplexer.
    pub fn registry(&self) -> &Registry<E> { &self.registry }

    /// Highest registered descriptor, or `-1` if nothing is registered.
    pub fn max_fd(&self) -> RawFd { self.registry.max_fd() }

    /// Checks whether there are no registrations.
    pub fn is_empty(&self) -> bool { self.registry.is_empty() }

    /// Registers an event for polling. See [`Registry::insert`].
    pub fn insert(&mut self, event: &Arc<E>) { self.registry.insert(event) }

    /// Unregisters an event. See [`Registry::remove`].
    pub fn remove<T: Event + ?Sized>(&mut self, event: &T) { self.registry.remove(event) }

    /// Excludes an event from polling, keeping the registration. See [`Registry::freeze`].
    pub fn freeze<T: Event + ?Sized>(&mut self, event: &T) { self.registry.freeze(event) }

    /// Returns frozen event to polling. See [`Registry::thaw`].
    pub fn thaw<T: Event + ?Sized>(&mut self, event: &T) { self.registry.thaw(event) }

    /// Prepares a new readiness cycle from the current registrations.
    ///
    /// Registrations which are frozen do not participate in the cycle.
    ///
    /// # Returns
    ///
    /// `None` if nothing is registered.
    pub fn prepare(&mut self) -> Option<Cycle> {
        let max_fd = self.registry.max_fd();
        if max_fd == -1 {
            return None;
        }

        let (mut read, mut write) = mem::take(&mut self.transient);
        read.grow(self.registry.words(), false);
        write.grow(self.registry.words(), false);
        self.registry.snapshot(&mut read, &mut write, words_for(max_fd));

        Some(Cycle::new(read, write, max_fd))
    }

    /// Takes the next ready event of the cycle. See [`Cycle::next_ready`].
    pub fn next_ready(&self, cycle: &mut Cycle) -> Option<Arc<E>> { cycle.next_ready(&self.registry) }

    /// Completes the cycle, keeping its masks for reuse by the next one.
    pub fn finish(&mut self, cycle: Cycle) {
        if cycle.read.word_len() >= self.transient.0.word_len() {
            self.transient = (cycle.read, cycle.write);
        }
    }

    /// Performs a single readiness cycle: blocks until any of the registered descriptors is ready
    /// or the timeout elapses, and calls the handler for each ready event.
    ///
    /// Returns immediately, without calling the syscall, if nothing is registered. If no handler
    /// is set, the ready events are not dispatched.
    ///
    /// # Returns
    ///
    /// Number of events dispatched to the handler.
    ///
    /// # Errors
    ///
    /// With [`Error::Select`] if the syscall has failed for a reason other than an interruption;
    /// no events are dispatched in this case.
    pub fn poll(&mut self, timeout: Option<Duration>) -> Result<usize, Error> {
        let Some(mut cycle) = self.prepare() else {
            #[cfg(feature = "log")]
            log::trace!(target: "demux", "Nothing to poll");
            return Ok(0);
        };

        let res = cycle.wait_with(&mut self.selector, timeout).map(|_| self.dispatch(&mut cycle));
        self.finish(cycle);
        res
    }

    fn dispatch(&mut self, cycle: &mut Cycle) -> usize {
        let Some(handler) = self.handler.as_mut() else {
            #[cfg(feature = "log")]
            log::trace!(target: "demux", "No handler is set; skipping dispatch");
            return 0;
        };
        let mut count = 0;
        while let Some(event) = cycle.next_ready(&self.registry) {
            handler(event);
            count += 1;
        }

        #[cfg(feature = "log")]
        log::trace!(target: "demux", "Dispatched {count} event(s)");

        count
    }
}
