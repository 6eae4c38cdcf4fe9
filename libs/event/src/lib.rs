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

//! # A single-threaded event reactor based on epoll
//!
//! One `wait` call multiplexes three kinds of wakeups:
//!
//! * child exits, collected through a signalfd for SIGCHLD and a non-blocking reap loop;
//! * one monotonic deadline, backed by a timerfd armed with an absolute time;
//! * external readiness sources implementing the [`Source`] trait.
//!
//! Deadlines of individual owners are kept in a [`TimerQueue`]; the owner of the loop arms the
//! reactor with the queue's earliest deadline before every wait.
//!
//! # Example:
//! ```rust,no_run
//! use event::{time, Events, TimerQueue};
//!
//! let events = Events::new(&[]).unwrap();
//! let mut timers = TimerQueue::new();
//! timers.arm("job", time::now_monotonic() + time::USEC_PER_SEC).unwrap();
//!
//! let wakeup = events.wait(timers.next_deadline()).unwrap();
//! if wakeup.timer {
//!     for key in timers.pop_expired(events.now()) {
//!         println!("{} timed out", key);
//!     }
//! }
//! ```
pub mod error;
pub mod events;
pub mod poll;
pub mod source;
pub mod time;
pub mod timer;

pub use crate::events::{Events, Wakeup};
pub(crate) use crate::poll::Poll;
pub use crate::source::Source;
pub use crate::timer::TimerQueue;
pub use error::*;
pub use nix::sys::wait::WaitStatus;
