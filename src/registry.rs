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

//! Persistent registration state of the demultiplexer.

#![allow(unused_variables)] // because we need them for feature-gated logger

use std::os::unix::io::RawFd;
use std::sync::{Arc, Weak};

use crate::fdmask::{words_for, FdMask, WORD_BITS};
use crate::{Direction, Event};

/// Registration state for a single I/O direction.
///
/// Both masks and the reference map are always resized together, so they stay index-congruent.
#[derive(Debug)]
struct Lane<E: ?Sized> {
    /// Descriptors registered for the direction.
    registered: FdMask,
    /// Overlay of registrations participating in polling. A registered descriptor with the bit
    /// cleared here is frozen.
    active: FdMask,
    /// Non-owning references to the registered events, indexed by descriptor.
    events: Vec<Option<Weak<E>>>,
}

impl<E: ?Sized> Lane<E> {
    fn new() -> Self {
        Self {
            registered: FdMask::new(),
            active: FdMask::new(),
            events: empty!(),
        }
    }

    fn grow(&mut self, words: usize) {
        self.registered.grow(words, false);
        self.active.grow(words, true);
        self.events.resize_with(words * WORD_BITS, || None);
    }

    fn insert(&mut self, fd: RawFd, event: Weak<E>) {
        self.registered.set(fd);
        self.active.set(fd);
        self.events[fd as usize] = Some(event);
    }

    fn remove(&mut self, fd: RawFd) {
        self.registered.clear(fd);
        self.active.clear(fd);
        self.events[fd as usize] = None;
    }

    fn event(&self, fd: RawFd) -> Option<&Weak<E>> {
        if fd < 0 {
            return None;
        }
        self.events.get(fd as usize).and_then(Option::as_ref)
    }
}

/// Persistent registrations of events for the read and write directions.
///
/// The storage is allocated lazily on the first registration and grows by doubling; it is never
/// shrunk during the registry lifetime.
#[derive(Debug)]
pub struct Registry<E: ?Sized> {
    read: Lane<E>,
    write: Lane<E>,
    /// Highest descriptor registered in any of the directions, or `-1` if there is none.
    max_fd: RawFd,
    /// Number of storage words allocated for each of the masks.
    words: usize,
}

impl<E: ?Sized> Default for Registry<E> {
    fn default() -> Self { Self::new() }
}

impl<E: Event + ?Sized> Registry<E> {
    /// Registers an event for polling.
    ///
    /// The registration is active (not frozen). Registering an event for a descriptor and
    /// direction which already has a registration replaces the previous event. Events with
    /// [`Direction::None`] or a negative descriptor are ignored.
    pub fn insert(&mut self, event: &Arc<E>) {
        let Some(fd) = self.sanitize(&**event) else {
            return;
        };
        let weak = Arc::downgrade(event);
        let Some(lane) = self.lane_mut(event.direction()) else {
            return;
        };
        lane.insert(fd, weak);
        self.max_fd = self.max_fd.max(fd);

        #[cfg(feature = "log")]
        log::trace!(target: "demux", "Registered {} interest for fd {fd}", event.direction());
    }

    /// Unregisters the descriptor and direction of the event, also removing the reference to
    /// the registered event. Removing a registration which does not exist does nothing.
    pub fn remove<T: Event + ?Sized>(&mut self, event: &T) {
        let Some(fd) = self.sanitize(event) else {
            return;
        };
        let Some(lane) = self.lane_mut(event.direction()) else {
            return;
        };
        lane.remove(fd);

        while self.max_fd >= 0
            && !self.read.registered.is_set(self.max_fd)
            && !self.write.registered.is_set(self.max_fd)
        {
            self.max_fd -= 1;
        }

        #[cfg(feature = "log")]
        log::trace!(target: "demux", "Unregistered {} interest for fd {fd}; max fd is {}", event.direction(), self.max_fd);
    }

    /// Excludes the registration from polling without removing it.
    pub fn freeze<T: Event + ?Sized>(&mut self, event: &T) {
        let Some(fd) = self.sanitize(event) else {
            return;
        };
        if let Some(lane) = self.lane_mut(event.direction()) {
            lane.active.clear(fd);
        }
    }

    /// Brings a frozen registration back to polling.
    pub fn thaw<T: Event + ?Sized>(&mut self, event: &T) {
        let Some(fd) = self.sanitize(event) else {
            return;
        };
        if let Some(lane) = self.lane_mut(event.direction()) {
            lane.active.set(fd);
        }
    }

    fn sanitize<T: Event + ?Sized>(&mut self, event: &T) -> Option<RawFd> {
        let fd = event.descriptor();
        if event.direction().is_none() {
            return None;
        }
        if fd < 0 {
            #[cfg(feature = "log")]
            log::warn!(target: "demux", "Ignoring {} event with negative descriptor {fd}", event.direction());
            return None;
        }
        self.ensure_capacity(fd);
        Some(fd)
    }
}

impl<E: ?Sized> Registry<E> {
    /// Constructs empty registry; no memory is allocated until the first registration.
    pub fn new() -> Self {
        Self {
            read: Lane::new(),
            write: Lane::new(),
            max_fd: -1,
            words: 0,
        }
    }

    /// Highest registered descriptor, or `-1` if nothing is registered.
    pub fn max_fd(&self) -> RawFd { self.max_fd }

    /// Checks whether there are no registrations.
    pub fn is_empty(&self) -> bool { self.max_fd == -1 }

    /// Number of descriptors the registry is able to address without growing.
    pub fn capacity(&self) -> usize { self.words * WORD_BITS }

    /// Number of storage words allocated for each mask.
    pub(crate) fn words(&self) -> usize { self.words }

    /// Checks whether the descriptor is registered for the direction, frozen or not.
    pub fn is_registered(&self, fd: RawFd, direction: Direction) -> bool {
        self.lane(direction).map(|lane| lane.registered.is_set(fd)).unwrap_or_default()
    }

    /// Checks whether the descriptor is registered for the direction but excluded from polling.
    pub fn is_frozen(&self, fd: RawFd, direction: Direction) -> bool {
        self.lane(direction)
            .map(|lane| lane.registered.is_set(fd) && !lane.active.is_set(fd))
            .unwrap_or_default()
    }

    /// Returns the event registered for the descriptor and direction, if it is still alive.
    pub fn event(&self, fd: RawFd, direction: Direction) -> Option<Arc<E>> {
        self.lane(direction)?.event(fd)?.upgrade()
    }

    /// Guarantees that all the storage is able to address `fd`.
    ///
    /// The storage grows by doubling, starting from a single word. New registration bits are
    /// cleared, new activity bits are set and new event slots are empty.
    fn ensure_capacity(&mut self, fd: RawFd) {
        let target = words_for(fd);
        if target <= self.words {
            return;
        }

        let mut words = self.words.max(1);
        while words < target {
            words *= 2;
        }

        #[cfg(feature = "log")]
        log::debug!(target: "demux", "Growing capacity from {} to {} descriptors for fd {fd}", self.capacity(), words * WORD_BITS);

        self.read.grow(words);
        self.write.grow(words);
        self.words = words;
    }

    /// Computes `registered AND active` for both directions over the first `words` words.
    pub(crate) fn snapshot(&self, read: &mut FdMask, write: &mut FdMask, words: usize) {
        read.assign_and(&self.read.registered, &self.read.active, words);
        write.assign_and(&self.write.registered, &self.write.active, words);
    }

    fn lane(&self, direction: Direction) -> Option<&Lane<E>> {
        match direction {
            Direction::Read => Some(&self.read),
            Direction::Write => Some(&self.write),
            Direction::None => None,
        }
    }

    fn lane_mut(&mut self, direction: Direction) -> Option<&mut Lane<E>> {
        match direction {
            Direction::Read => Some(&mut self.read),
            Direction::Write => Some(&mut self.write),
            Direction::None => None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[derive(Debug)]
    struct Ev(RawFd, Direction);
    impl Event for Ev {
        fn descriptor(&self) -> RawFd { self.0 }
        fn direction(&self) -> Direction { self.1 }
    }

    fn read(fd: RawFd) -> Arc<Ev> { Arc::new(Ev(fd, Direction::Read)) }
    fn write(fd: RawFd) -> Arc<Ev> { Arc::new(Ev(fd, Direction::Write)) }

    #[test]
    fn empty() {
        let registry = Registry::<Ev>::new();
        assert_eq!(registry.max_fd(), -1);
        assert_eq!(registry.capacity(), 0);
        assert!(registry.is_empty());
        assert!(!registry.is_registered(0, Direction::Read));
        assert!(registry.event(0, Direction::Write).is_none());
    }

    #[test]
    fn capacity_doubles() {
        let mut registry = Registry::new();
        let mut events = vec![];
        let mut last = 0;
        for fd in [0, 3, 63, 64, 65, 200, 700, 701, 4000] {
            let ev = read(fd);
            registry.insert(&ev);
            events.push(ev);

            let words = registry.capacity() / WORD_BITS;
            assert!(words.is_power_of_two(), "capacity {} is not a power of two", words);
            assert!(registry.capacity() > fd as usize);
            assert!(registry.capacity() >= last);
            last = registry.capacity();

            for ev in &events {
                assert!(registry.is_registered(ev.0, Direction::Read));
                assert!(!registry.is_frozen(ev.0, Direction::Read));
                assert!(Arc::ptr_eq(&registry.event(ev.0, Direction::Read).unwrap(), ev));
            }
        }
        assert_eq!(registry.max_fd(), 4000);
    }

    #[test]
    fn growth_keeps_new_slots_active() {
        let mut registry = Registry::new();
        let ev = read(1);
        registry.insert(&ev);
        registry.freeze(&*ev);
        let far = write(10 * WORD_BITS as RawFd);
        registry.insert(&far);

        assert!(registry.is_frozen(1, Direction::Read));
        assert!(!registry.is_frozen(far.0, Direction::Write));
        assert!(registry.read.active.is_set(far.0 + 1));
        assert!(!registry.read.registered.is_set(far.0 + 1));
    }

    #[test]
    fn insert_remove() {
        let mut registry = Registry::new();
        let ev = write(9);
        registry.insert(&ev);
        assert!(registry.is_registered(9, Direction::Write));
        assert!(!registry.is_registered(9, Direction::Read));
        assert_eq!(registry.max_fd(), 9);

        registry.remove(&*ev);
        assert!(!registry.is_registered(9, Direction::Write));
        assert!(!registry.write.active.is_set(9));
        assert!(registry.write.event(9).is_none());
        assert_eq!(registry.max_fd(), -1);
        assert!(registry.capacity() > 0, "capacity is never released");
    }

    #[test]
    fn reinsert_overwrites() {
        let mut registry = Registry::new();
        let first = read(4);
        let second = read(4);
        registry.insert(&first);
        registry.insert(&second);
        assert!(Arc::ptr_eq(&registry.event(4, Direction::Read).unwrap(), &second));

        registry.remove(&*first);
        assert!(registry.event(4, Direction::Read).is_none());
    }

    #[test]
    fn max_fd_shrink() {
        let mut registry = Registry::new();
        let events = [read(3), read(7), write(5)];
        for ev in &events {
            registry.insert(ev);
        }
        assert_eq!(registry.max_fd(), 7);

        registry.remove(&*events[1]);
        assert_eq!(registry.max_fd(), 5);
        registry.remove(&*events[2]);
        assert_eq!(registry.max_fd(), 3);
        registry.remove(&*events[0]);
        assert_eq!(registry.max_fd(), -1);
    }

    #[test]
    fn max_fd_keeps_other_direction() {
        let mut registry = Registry::new();
        let r = read(6);
        let w = write(6);
        registry.insert(&r);
        registry.insert(&w);
        registry.remove(&*r);
        assert_eq!(registry.max_fd(), 6);
        registry.remove(&*w);
        assert_eq!(registry.max_fd(), -1);
    }

    #[test]
    fn remove_unregistered() {
        let mut registry = Registry::new();
        let ev = read(2);
        registry.insert(&ev);
        registry.remove(&Ev(2, Direction::Write));
        registry.remove(&Ev(100, Direction::Read));
        assert!(registry.is_registered(2, Direction::Read));
        assert_eq!(registry.max_fd(), 2);
    }

    #[test]
    fn freeze_thaw() {
        let mut registry = Registry::new();
        let ev = read(12);
        registry.insert(&ev);
        let before = registry.read.active.clone();

        registry.freeze(&*ev);
        assert!(registry.is_frozen(12, Direction::Read));
        assert!(registry.is_registered(12, Direction::Read));
        assert!(registry.event(12, Direction::Read).is_some());

        registry.thaw(&*ev);
        registry.thaw(&*ev);
        assert!(!registry.is_frozen(12, Direction::Read));
        assert_eq!(registry.read.active, before);
    }

    #[test]
    fn freeze_unregistered() {
        let mut registry = Registry::<Ev>::new();
        registry.freeze(&Ev(3, Direction::Write));
        assert!(!registry.is_frozen(3, Direction::Write));
        assert!(!registry.is_registered(3, Direction::Write));
        assert_eq!(registry.max_fd(), -1);
    }

    #[test]
    fn ignored_events() {
        let mut registry = Registry::new();
        registry.insert(&Arc::new(Ev(5, Direction::None)));
        registry.insert(&Arc::new(Ev(-3, Direction::Read)));
        registry.freeze(&Ev(-1, Direction::Write));
        registry.remove(&Ev(5, Direction::None));
        assert!(registry.is_empty());
        assert!(!registry.is_registered(5, Direction::None));
    }

    #[test]
    fn dropped_event() {
        let mut registry = Registry::new();
        let ev = read(1);
        registry.insert(&ev);
        drop(ev);
        assert!(registry.is_registered(1, Direction::Read));
        assert!(registry.event(1, Direction::Read).is_none());
    }

    #[test]
    fn snapshot_excludes_frozen() {
        let mut registry = Registry::new();
        let a = read(1);
        let b = read(2);
        let c = write(2);
        registry.insert(&a);
        registry.insert(&b);
        registry.insert(&c);
        registry.freeze(&*b);

        let mut rd = FdMask::new();
        let mut wr = FdMask::new();
        rd.grow(registry.words(), true);
        wr.grow(registry.words(), true);
        registry.snapshot(&mut rd, &mut wr, words_for(registry.max_fd()));
        assert_eq!(rd.iter_desc().collect::<Vec<_>>(), vec![1]);
        assert_eq!(wr.iter_desc().collect::<Vec<_>>(), vec![2]);
    }
}
