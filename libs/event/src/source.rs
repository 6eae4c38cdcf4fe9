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

//! # External readiness sources must implement the Source trait
use crate::Events;
use std::fmt::Debug;
use std::os::unix::io::RawFd;

/// An opaque fd whose readiness is reported to the owner of the event loop.
///
/// The reactor never reads from the fd; interpreting the payload is left to `dispatch`.
pub trait Source {
    /// the fd to watch for EPOLLIN
    fn fd(&self) -> RawFd;

    /// The token identifies the source in wakeups, it must be unique within one `Events`.
    /// Tokens at or above `u64::MAX - 1` are reserved by the reactor.
    fn token(&self) -> u64;

    /// Set the priority, -127i8 ~ 128i8, the smaller the value, the higher the priority
    fn priority(&self) -> i8 {
        0
    }

    /// The code of callback
    fn dispatch(&self, event: &Events) -> i32;

    /// The short description of this source
    fn description(&self) -> String {
        String::from("default")
    }
}

impl Debug for dyn Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Source")
            .field("token", &self.token())
            .field("description", &self.description())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct TestSource {
        token: u64,
        hits: Cell<u32>,
    }

    impl Source for TestSource {
        fn fd(&self) -> RawFd {
            -1
        }

        fn token(&self) -> u64 {
            self.token
        }

        fn dispatch(&self, _: &Events) -> i32 {
            self.hits.set(self.hits.get() + 1);
            0
        }
    }

    #[test]
    fn test_source_defaults() {
        let source = TestSource {
            token: 123,
            hits: Cell::new(0),
        };
        assert_eq!(source.token(), 123);
        assert_eq!(source.priority(), 0);
        assert_eq!(source.description(), "default");
        let s: &dyn Source = &source;
        assert!(format!("{:?}", s).contains("123"));
    }

    #[test]
    fn test_source_dispatch() {
        let source = TestSource {
            token: 7,
            hits: Cell::new(0),
        };
        let events = Events::new(&[]).unwrap();
        assert_eq!(source.dispatch(&events), 0);
        assert_eq!(source.hits.get(), 1);
    }
}
