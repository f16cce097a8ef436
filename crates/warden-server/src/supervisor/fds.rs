// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Descriptor hygiene for spawned children.
//!
//! Runs between fork and exec, so only async-signal-safe calls are allowed:
//! no allocation, no locks, no `/proc` enumeration.

use std::os::raw::{c_int, c_uint};

/// `CLOSE_RANGE_CLOEXEC` from linux/close_range.h.
#[cfg(target_os = "linux")]
const CLOSE_RANGE_CLOEXEC: c_uint = 1 << 2;

/// Upper bound for the fcntl fallback when the limit is unknown or huge.
const FALLBACK_MAX_FD: c_int = 65536;

/// Mark every descriptor above stderr close-on-exec.
///
/// std reports exec failures through its own CLOEXEC pipe, so descriptors are
/// marked rather than closed. Only descriptors present in the child's table at
/// the time of the call are affected.
pub fn close_other_fds() {
    #[cfg(target_os = "linux")]
    {
        if try_close_range() {
            return;
        }
    }
    mark_cloexec_up_to(max_fd());
}

/// close_range(2), Linux 5.11+ for the CLOEXEC flag.
#[cfg(target_os = "linux")]
fn try_close_range() -> bool {
    let result = unsafe {
        libc::syscall(
            libc::SYS_close_range,
            3 as c_uint,
            c_uint::MAX,
            CLOSE_RANGE_CLOEXEC,
        )
    };
    result == 0
}

fn max_fd() -> c_int {
    let mut limit = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    let ok = unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut limit) } == 0;
    if !ok || limit.rlim_cur == libc::RLIM_INFINITY {
        return FALLBACK_MAX_FD;
    }
    c_int::try_from(limit.rlim_cur)
        .unwrap_or(FALLBACK_MAX_FD)
        .min(FALLBACK_MAX_FD)
}

fn mark_cloexec_up_to(max: c_int) {
    for fd in 3..max {
        unsafe {
            let flags = libc::fcntl(fd, libc::F_GETFD);
            if flags >= 0 && flags & libc::FD_CLOEXEC == 0 {
                libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_fd_is_positive() {
        let max = max_fd();
        assert!(max > 2);
        assert!(max <= FALLBACK_MAX_FD);
    }

    #[test]
    fn test_fallback_marks_descriptors() {
        use std::os::fd::AsRawFd;

        let file = tempfile::tempfile().unwrap();
        let fd = file.as_raw_fd();
        unsafe {
            let flags = libc::fcntl(fd, libc::F_GETFD);
            libc::fcntl(fd, libc::F_SETFD, flags & !libc::FD_CLOEXEC);
        }

        mark_cloexec_up_to(fd + 1);

        let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
        assert_ne!(flags & libc::FD_CLOEXEC, 0);
    }
}
