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

#![allow(unused_variables)] // because we need them for feature-gated logger

use std::io;
use std::os::unix::io::RawFd;
use std::ptr;

use super::Selector;
use crate::fdmask::{words_for, FdMask};

/// Readiness checks with the `select(2)` syscall.
///
/// Unlike the `libc::fd_set` structure, masks are not limited by `FD_SETSIZE`: the kernel is given
/// as many words as required to address `nfds` descriptors.
///
/// The kernel silently ignores descriptors above the size of the process descriptor table,
/// leaving their bits untouched. To not report such descriptors as ready, the highest requested
/// descriptor must be open, otherwise the call fails with `EBADF` without reaching the kernel.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
pub struct Select;

impl Select {
    pub fn new() -> Self { Select }
}

fn as_fd_set(mask: Option<&mut FdMask>, words: usize) -> io::Result<*mut libc::fd_set> {
    match mask {
        None => Ok(ptr::null_mut()),
        Some(mask) if mask.word_len() < words => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("descriptor mask of {} bits is too short for select", mask.capacity()),
        )),
        Some(mask) => Ok(mask.as_words_mut().as_mut_ptr() as *mut libc::fd_set),
    }
}

fn highest(mask: &Option<&mut FdMask>, nfds: RawFd) -> Option<RawFd> {
    mask.as_deref().and_then(|mask| mask.highest_below(nfds))
}

/// Checks that the descriptor is open in the current process.
pub(crate) fn check_open(fd: RawFd) -> io::Result<()> {
    // SAFETY: `F_GETFD` only queries descriptor flags and accepts any descriptor value.
    if unsafe { libc::fcntl(fd, libc::F_GETFD) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

impl Selector for Select {
    fn select(
        &mut self,
        nfds: RawFd,
        read: Option<&mut FdMask>,
        write: Option<&mut FdMask>,
        except: Option<&mut FdMask>,
        timeout: Option<&mut libc::timeval>,
    ) -> io::Result<usize> {
        let top = highest(&read, nfds).max(highest(&write, nfds)).max(highest(&except, nfds));
        if let Some(fd) = top {
            check_open(fd).map_err(|err| {
                #[cfg(feature = "log")]
                log::debug!(target: "select", "Highest requested fd {fd} is not open: {err}");
                err
            })?;
        }

        let words = words_for(nfds - 1);
        let read = as_fd_set(read, words)?;
        let write = as_fd_set(write, words)?;
        let except = as_fd_set(except, words)?;
        let timeout = timeout.map(|tv| tv as *mut libc::timeval).unwrap_or(ptr::null_mut());

        // Blocking call
        // SAFETY: each non-null mask points to at least `words` initialized words, which is all
        // the kernel accesses for `nfds` descriptors; the timeout points to a valid `timeval`.
        let ret = unsafe { libc::select(nfds, read, write, except, timeout) };
        if ret < 0 {
            let err = io::Error::last_os_error();
            #[cfg(feature = "log")]
            {
                if err.kind() != io::ErrorKind::Interrupted {
                    log::trace!(target: "select", "Select over {nfds} descriptors failed: {err}");
                }
            }
            return Err(err);
        }

        #[cfg(feature = "log")]
        log::trace!(target: "select", "Select over {nfds} descriptors reported {ret} ready");

        Ok(ret as usize)
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::*;
    use crate::poller::test::{close, closed_fd, pipe, send_byte};
    use crate::poller::timeval;

    #[test]
    fn readiness() {
        let (rx, tx) = pipe();
        let nfds = rx.max(tx) + 1;

        let mut read = FdMask::with_fd(nfds);
        let mut write = FdMask::with_fd(nfds);
        read.zero();
        write.zero();
        read.set(rx);
        write.set(tx);
        let mut tv = timeval(Duration::ZERO);
        let count = Select.select(nfds, Some(&mut read), Some(&mut write), None, Some(&mut tv));
        assert_eq!(count.unwrap(), 1);
        assert!(!read.is_set(rx));
        assert!(write.is_set(tx));

        send_byte(tx);
        read.set(rx);
        let mut tv = timeval(Duration::ZERO);
        let count = Select.select(nfds, Some(&mut read), None, None, Some(&mut tv));
        assert_eq!(count.unwrap(), 1);
        assert!(read.is_set(rx));

        close((rx, tx));
    }

    #[test]
    fn short_mask() {
        let mut read = FdMask::new();
        let err = Select.select(10, Some(&mut read), None, None, None).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn bad_descriptor() {
        let rx = closed_fd(1000);
        let mut read = FdMask::with_fd(rx);
        let mut tv = timeval(Duration::ZERO);
        let err = Select.select(rx + 1, Some(&mut read), None, None, Some(&mut tv)).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EBADF));
    }

    #[test]
    fn descriptor_beyond_table() {
        let (rx, tx) = pipe();
        let fd = 1 << 20;
        let mut write = FdMask::with_fd(fd);
        write.set(tx);
        let mut tv = timeval(Duration::ZERO);
        let err = Select.select(fd + 1, None, Some(&mut write), None, Some(&mut tv)).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EBADF));
        close((rx, tx));
    }
}
