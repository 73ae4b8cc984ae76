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

//! One-shot writability check of a single descriptor.

use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

use crate::fdmask::FdMask;
use crate::poller::{check_open, timeval, Select, Selector};

/// Blocks up to `timeout` for the descriptor to become writable or to raise an exceptional
/// condition, using the `select(2)` syscall. Useful to check completion of a non-blocking
/// `connect`.
///
/// Unlike [`crate::Demux::poll`], syscall failures are not returned as errors: they are written
/// into `error`, which is cleared on entry, and the function returns `false`.
///
/// # Returns
///
/// Whether the descriptor is writable. An exceptional condition is reported as not writable.
pub fn probe_writable(fd: RawFd, timeout: Duration, error: &mut Option<io::Error>) -> bool {
    probe_writable_with(&mut Select, fd, timeout, error)
}

/// Same as [`probe_writable`], but uses the provided selector.
pub fn probe_writable_with<S: Selector + ?Sized>(
    selector: &mut S,
    fd: RawFd,
    timeout: Duration,
    error: &mut Option<io::Error>,
) -> bool {
    *error = None;

    if fd < 0 {
        *error = Some(io::Error::from_raw_os_error(libc::EBADF));
        return false;
    }
    if let Err(err) = check_open(fd) {
        #[cfg(feature = "log")]
        log::debug!(target: "demux", "Probing fd {fd} for writability has failed: {err}");
        *error = Some(err);
        return false;
    }

    let mut tv = timeval(timeout);
    let mut write = FdMask::with_fd(fd);
    let mut except = FdMask::with_fd(fd);
    loop {
        write.zero();
        except.zero();
        write.set(fd);
        except.set(fd);

        match selector.select(fd + 1, None, Some(&mut write), Some(&mut except), Some(&mut tv)) {
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {
                *error = None;
                continue;
            }
            Err(err) => {
                #[cfg(feature = "log")]
                log::debug!(target: "demux", "Probing fd {fd} for writability has failed: {err}");
                *error = Some(err);
                return false;
            }
            Ok(_) => return write.is_set(fd),
        }
    }
}
