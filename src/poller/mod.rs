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

//! Boundary to the OS readiness-check primitive.

mod select;

use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

pub(crate) use self::select::check_open;
pub use self::select::Select;
use crate::fdmask::FdMask;

/// Readiness-check primitive working on descriptor bit-sets.
///
/// The demultiplexer and the writability probe use it in place of the raw syscall, which allows
/// to plug alternative implementations (like scripted ones for testing).
pub trait Selector {
    /// Performs a single readiness check over descriptors below `nfds`.
    ///
    /// On input, masks contain descriptors of interest; on success they are overwritten to contain
    /// ready descriptors only, and the number of ready descriptors is returned. `None` for a mask
    /// means no interest in that condition; `None` for a timeout means blocking indefinitely. The
    /// timeout may be updated with the time left.
    ///
    /// # Errors
    ///
    /// With the OS error reported by the syscall, including [`io::ErrorKind::Interrupted`], which
    /// is never retried at this level.
    fn select(
        &mut self,
        nfds: RawFd,
        read: Option<&mut FdMask>,
        write: Option<&mut FdMask>,
        except: Option<&mut FdMask>,
        timeout: Option<&mut libc::timeval>,
    ) -> io::Result<usize>;
}

impl<S: Selector + ?Sized> Selector for Box<S> {
    fn select(
        &mut self,
        nfds: RawFd,
        read: Option<&mut FdMask>,
        write: Option<&mut FdMask>,
        except: Option<&mut FdMask>,
        timeout: Option<&mut libc::timeval>,
    ) -> io::Result<usize> {
        S::select(self, nfds, read, write, except, timeout)
    }
}

/// Converts timeout into the syscall representation.
pub fn timeval(timeout: Duration) -> libc::timeval {
    libc::timeval {
        tv_sec: timeout.as_secs().min(libc::time_t::MAX as u64) as libc::time_t,
        tv_usec: timeout.subsec_micros() as libc::suseconds_t,
    }
}

/// Runs [`Selector::select`], retrying immediately each time it gets interrupted by a signal.
///
/// All retries use the same arguments. Interruptions are not reported in any way.
pub fn select_retrying<S: Selector + ?Sized>(
    selector: &mut S,
    nfds: RawFd,
    mut read: Option<&mut FdMask>,
    mut write: Option<&mut FdMask>,
    timeout: Option<Duration>,
) -> io::Result<usize> {
    let mut tv = timeout.map(timeval);
    loop {
        match selector.select(nfds, read.as_deref_mut(), write.as_deref_mut(), None, tv.as_mut()) {
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            res => return res,
        }
    }
}
