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

//! Encapsulation of the epoll interface

use crate::Result;
use libc::epoll_event;
use std::os::unix::{io::AsRawFd, io::RawFd};
pub(crate) mod epoll;

use epoll::Epoll as Poller;

/// Encapsulation of the epoll interface
#[derive(Debug)]
pub struct Poll {
    poller: Poller,
}

impl Poll {
    /// create a new poller
    pub fn new() -> Result<Poll> {
        Ok(Poll {
            poller: Poller::new()?,
        })
    }

    /// Wait for readiness; `timeout` is in milliseconds, -1 blocks.
    pub fn poll(&self, timeout: i32) -> Result<Vec<epoll_event>> {
        self.poller.poll(timeout)
    }

    /// watch `fd` for EPOLLIN, reporting `token`
    pub fn register(&mut self, fd: RawFd, token: u64) -> Result<()> {
        let mut event = epoll_event {
            events: libc::EPOLLIN as u32,
            u64: token,
        };
        self.poller.register(fd, &mut event)
    }

    /// stop watching `fd`
    pub fn unregister(&mut self, fd: RawFd) -> Result<()> {
        self.poller.unregister(fd)
    }
}

impl AsRawFd for Poll {
    fn as_raw_fd(&self) -> RawFd {
        self.poller.as_raw_fd()
    }
}

#[cfg(test)]
mod test {
    use super::Poll;
    use nix::unistd::{close, pipe, write};
    use std::os::unix::io::AsRawFd;

    #[test]
    fn epoll_pipe_readiness() {
        let mut poll = Poll::new().unwrap();
        assert!(poll.as_raw_fd() > 0);

        let (rd, wr) = pipe().unwrap();
        poll.register(rd, 42).unwrap();
        assert!(poll.poll(0).unwrap().is_empty());

        write(wr, b"x").unwrap();
        let events = poll.poll(100).unwrap();
        assert_eq!(events.len(), 1);
        let token = events[0].u64;
        assert_eq!(token, 42);

        poll.unregister(rd).unwrap();
        assert!(poll.poll(0).unwrap().is_empty());
        let _ = close(rd);
        let _ = close(wr);
    }
}
