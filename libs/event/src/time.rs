// Copyright (c) 2022 Huawei Technologies Co.,Ltd. All rights reserved.
//
// sysMaster is licensed under Mulan PSL v2.
// You can use this software according to the terms and conditions of the Mulan
// PSL v2.
// You may obtain a copy of Mulan PSL v2 at:
//         http://license.coscl.org.cn/MulanPSL2
// THIS SOFTWARE IS PROVIDED ON AN "AS IS" BASIS, WITHOUT WARRANTIES OF ANY
// KIND, EITHER EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO
// NON-INFRINGEMENT, MERCHANTABILITY OR FIT FOR A PARTICULAR PURPOSE.
// See the Mulan PSL v2 for more details.

//! Monotonic time in microseconds, the unit every deadline in the reactor is expressed in.
use std::mem::MaybeUninit;

/// "never"
pub const USEC_INFINITY: u64 = u64::MAX;
///
pub const USEC_PER_SEC: u64 = 1_000_000;
///
pub const USEC_PER_MSEC: u64 = 1_000;
///
pub const NSEC_PER_SEC: u64 = 1_000_000_000;
///
pub const NSEC_PER_USEC: u64 = 1_000;

/// Read CLOCK_MONOTONIC in microseconds.
pub fn now_monotonic() -> u64 {
    let mut tp = MaybeUninit::<libc::timespec>::zeroed();
    let ret = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, tp.as_mut_ptr()) };
    if ret < 0 {
        return 0;
    }
    timespec_load(unsafe { tp.assume_init() })
}

/// Convert a timespec to microseconds, saturating at USEC_INFINITY.
pub fn timespec_load(ts: libc::timespec) -> u64 {
    if ts.tv_sec < 0 || ts.tv_nsec < 0 {
        return USEC_INFINITY;
    }

    if (ts.tv_sec as u64) > (USEC_INFINITY - (ts.tv_nsec as u64) / NSEC_PER_USEC) / USEC_PER_SEC {
        return USEC_INFINITY;
    }

    (ts.tv_sec as u64) * USEC_PER_SEC + (ts.tv_nsec as u64) / NSEC_PER_USEC
}

/// Convert microseconds to a timespec.
pub fn timespec_store(usec: u64) -> libc::timespec {
    libc::timespec {
        tv_sec: (usec / USEC_PER_SEC) as libc::time_t,
        tv_nsec: ((usec % USEC_PER_SEC) * NSEC_PER_USEC) as libc::c_long,
    }
}

/// a + b, where anything reaching USEC_INFINITY stays there
pub fn usec_add(a: u64, b: u64) -> u64 {
    a.checked_add(b).unwrap_or(USEC_INFINITY)
}

/// Seconds to microseconds; zero means "no limit" in unit configuration.
pub fn sec_to_usec(sec: u64) -> u64 {
    if sec == 0 {
        return USEC_INFINITY;
    }
    sec.checked_mul(USEC_PER_SEC).unwrap_or(USEC_INFINITY)
}
