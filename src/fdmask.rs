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

//! Growable descriptor bit-sets.

use std::os::unix::io::RawFd;

/// Storage unit of a [`FdMask`]. Matches the `fd_mask` word of the kernel `fd_set`.
pub type Word = usize;

/// Number of descriptors addressed by a single [`Word`].
pub const WORD_BITS: usize = Word::BITS as usize;

/// Number of words required to address all descriptors in `0..=fd`.
///
/// Returns zero for any negative descriptor.
pub fn words_for(fd: RawFd) -> usize {
    if fd < 0 {
        return 0;
    }
    fd as usize / WORD_BITS + 1
}

fn locate(fd: RawFd) -> (usize, Word) {
    debug_assert!(fd >= 0, "negative file descriptor {fd}");
    let fd = fd as usize;
    (fd / WORD_BITS, 1 << (fd % WORD_BITS))
}

/// Bit-set indexed by file descriptor.
///
/// The in-memory layout is the one of the `fd_set` structure, so the words can be handed to the
/// `select` syscall directly, regardless of `FD_SETSIZE`. The mask never shrinks: it can only be
/// grown with [`FdMask::grow`].
#[derive(Clone, Eq, PartialEq, Hash, Debug, Default)]
pub struct FdMask {
    words: Vec<Word>,
}

impl FdMask {
    /// Constructs empty mask without any allocated storage.
    pub fn new() -> Self { Self { words: empty!() } }

    /// Constructs mask able to address `fd`, having only `fd` set.
    pub fn with_fd(fd: RawFd) -> Self {
        let mut mask = Self::new();
        mask.grow(words_for(fd), false);
        mask.set(fd);
        mask
    }

    /// Number of descriptors the mask is able to address.
    pub fn capacity(&self) -> usize { self.words.len() * WORD_BITS }

    /// Number of allocated storage words.
    pub fn word_len(&self) -> usize { self.words.len() }

    /// Grows the storage to `words` words, filling the new region with all-ones if `fill` is set
    /// or all-zeros otherwise. Existing content is preserved; does nothing if the mask is already
    /// large enough.
    pub fn grow(&mut self, words: usize, fill: bool) {
        if words <= self.words.len() {
            return;
        }
        let value = if fill { Word::MAX } else { 0 };
        self.words.resize(words, value);
    }

    /// Sets the bit for `fd`.
    ///
    /// # Panics
    ///
    /// If `fd` is negative or outside of the mask capacity.
    pub fn set(&mut self, fd: RawFd) {
        let (index, bit) = locate(fd);
        self.words[index] |= bit;
    }

    /// Clears the bit for `fd`.
    ///
    /// # Panics
    ///
    /// If `fd` is negative or outside of the mask capacity.
    pub fn clear(&mut self, fd: RawFd) {
        let (index, bit) = locate(fd);
        self.words[index] &= !bit;
    }

    /// Checks whether the bit for `fd` is set. Descriptors outside of the capacity are never set.
    pub fn is_set(&self, fd: RawFd) -> bool {
        if fd < 0 {
            return false;
        }
        let (index, bit) = locate(fd);
        self.words.get(index).map(|word| word & bit != 0).unwrap_or_default()
    }

    /// Clears all bits, keeping the storage.
    pub fn zero(&mut self) { self.words.iter_mut().for_each(|word| *word = 0) }

    /// Writes `lhs AND rhs` over the first `words` words into `self`.
    ///
    /// # Panics
    ///
    /// If any of the masks has less than `words` words allocated.
    pub fn assign_and(&mut self, lhs: &FdMask, rhs: &FdMask, words: usize) {
        let dst = &mut self.words[..words];
        for ((dst, lhs), rhs) in dst.iter_mut().zip(&lhs.words[..words]).zip(&rhs.words[..words]) {
            *dst = lhs & rhs;
        }
    }

    /// Iterates over the descriptors which are set, in descending order.
    pub fn iter_desc(&self) -> impl Iterator<Item = RawFd> + '_ {
        (0..self.capacity()).rev().map(|fd| fd as RawFd).filter(|fd| self.is_set(*fd))
    }

    /// Highest descriptor which is set and is below `limit`, if any.
    pub fn highest_below(&self, limit: RawFd) -> Option<RawFd> {
        let limit = (limit.max(0) as usize).min(self.capacity());
        let words = (limit + WORD_BITS - 1) / WORD_BITS;
        for index in (0..words).rev() {
            let mut word = self.words[index];
            let end = limit - index * WORD_BITS;
            if end < WORD_BITS {
                word &= (1 << end) - 1;
            }
            if word != 0 {
                let bit = WORD_BITS - 1 - word.leading_zeros() as usize;
                return Some((index * WORD_BITS + bit) as RawFd);
            }
        }
        None
    }

    /// Mutable access to the raw words, for passing to the syscall.
    pub fn as_words_mut(&mut self) -> &mut [Word] { &mut self.words }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn words_for_fd() {
        assert_eq!(words_for(-1), 0);
        assert_eq!(words_for(0), 1);
        assert_eq!(words_for(WORD_BITS as RawFd - 1), 1);
        assert_eq!(words_for(WORD_BITS as RawFd), 2);
        assert_eq!(words_for(3 * WORD_BITS as RawFd + 5), 4);
    }

    #[test]
    fn set_clear() {
        let mut mask = FdMask::new();
        assert_eq!(mask.capacity(), 0);
        assert!(!mask.is_set(0));

        mask.grow(2, false);
        assert_eq!(mask.capacity(), 2 * WORD_BITS);
        mask.set(3);
        mask.set(WORD_BITS as RawFd + 1);
        assert!(mask.is_set(3));
        assert!(mask.is_set(WORD_BITS as RawFd + 1));
        assert!(!mask.is_set(4));
        assert!(!mask.is_set(-1));
        assert!(!mask.is_set(1000 * WORD_BITS as RawFd));

        mask.clear(3);
        mask.clear(3);
        assert!(!mask.is_set(3));
        assert_eq!(mask.iter_desc().collect::<Vec<_>>(), vec![WORD_BITS as RawFd + 1]);
    }

    #[test]
    fn grow_preserves_and_fills() {
        let mut mask = FdMask::new();
        mask.grow(1, false);
        mask.set(5);
        mask.grow(4, true);
        assert_eq!(mask.word_len(), 4);
        assert!(mask.is_set(5));
        assert!(!mask.is_set(6));
        assert!(mask.is_set(WORD_BITS as RawFd));
        assert!(mask.is_set(4 * WORD_BITS as RawFd - 1));

        // never shrinks
        mask.grow(2, false);
        assert_eq!(mask.word_len(), 4);
    }

    #[test]
    fn and_over_range() {
        let mut lhs = FdMask::new();
        let mut rhs = FdMask::new();
        let mut dst = FdMask::new();
        lhs.grow(2, false);
        rhs.grow(2, true);
        dst.grow(2, true);
        lhs.set(1);
        lhs.set(2);
        lhs.set(WORD_BITS as RawFd + 2);
        rhs.clear(2);

        dst.assign_and(&lhs, &rhs, 1);
        assert!(dst.is_set(1));
        assert!(!dst.is_set(2));
        assert!(!dst.is_set(0));
        // second word is outside of the range and stays untouched
        assert!(dst.is_set(WORD_BITS as RawFd));
    }

    #[test]
    fn highest() {
        let mut mask = FdMask::new();
        assert_eq!(mask.highest_below(100), None);
        mask.grow(3, false);
        mask.set(2);
        mask.set(WORD_BITS as RawFd);
        mask.set(2 * WORD_BITS as RawFd + 7);
        assert_eq!(mask.highest_below(RawFd::MAX), Some(2 * WORD_BITS as RawFd + 7));
        assert_eq!(mask.highest_below(2 * WORD_BITS as RawFd + 7), Some(WORD_BITS as RawFd));
        assert_eq!(mask.highest_below(WORD_BITS as RawFd + 1), Some(WORD_BITS as RawFd));
        assert_eq!(mask.highest_below(WORD_BITS as RawFd), Some(2));
        assert_eq!(mask.highest_below(2), None);
        assert_eq!(mask.highest_below(-5), None);
    }

    #[test]
    fn single_fd() {
        let mask = FdMask::with_fd(70);
        assert_eq!(mask.iter_desc().collect::<Vec<_>>(), vec![70]);
        assert!(mask.capacity() > 70);
    }
}
