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

//! The reactor: one epoll set multiplexing child exits, one timer and external sources.
use crate::error::*;
use crate::time::{now_monotonic, timespec_store, USEC_INFINITY};
use crate::{Poll, Source};
use nix::errno::Errno;
use nix::sys::signal::Signal;
use nix::sys::signalfd::{SfdFlags, SigSet, SignalFd};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{self, Pid};
use snafu::ResultExt;
use std::cell::RefCell;
use std::collections::HashMap;
use std::convert::TryFrom;
use std::os::unix::prelude::{AsRawFd, RawFd};
use std::ptr;
use std::rc::Rc;

const TOKEN_SIGNAL: u64 = u64::MAX;
const TOKEN_TIMER: u64 = u64::MAX - 1;

/// Everything one return from the wait call produced.
#[derive(Debug, Default)]
pub struct Wakeup {
    /// reaped children, in reaping order
    pub exited: Vec<WaitStatus>,
    /// the armed deadline has passed
    pub timer: bool,
    /// control signals other than SIGCHLD
    pub signals: Vec<Signal>,
    /// ready external tokens, by priority then registration order
    pub external: Vec<u64>,
}

impl Wakeup {
    /// nothing happened (e.g. interrupted wait)
    pub fn is_empty(&self) -> bool {
        self.exited.is_empty() && !self.timer && self.signals.is_empty() && self.external.is_empty()
    }
}

/// A single-threaded reactor based on epoll
#[derive(Debug)]
pub struct Events {
    data: RefCell<EventsData>,
}

impl Events {
    /// Create the reactor. SIGCHLD is always watched; `signals` adds further control signals.
    /// All of them are blocked on the calling thread so they queue on the signalfd.
    pub fn new(signals: &[Signal]) -> Result<Events> {
        Ok(Events {
            data: RefCell::new(EventsData::new(signals)?),
        })
    }

    /// add an external readiness source
    pub fn add_source(&self, source: Rc<dyn Source>) -> Result<()> {
        self.data.borrow_mut().add_source(source)
    }

    /// remove an external source by token
    pub fn del_source(&self, token: u64) -> Result<()> {
        self.data.borrow_mut().del_source(token)
    }

    /// look up an external source
    pub fn source(&self, token: u64) -> Option<Rc<dyn Source>> {
        self.data.borrow().sources.get(&token).map(|(_, s)| Rc::clone(s))
    }

    /// check if the source exists
    pub fn has_source(&self, token: u64) -> bool {
        self.data.borrow().sources.contains_key(&token)
    }

    /// Run the callback of the external source `token`.
    pub fn dispatch(&self, token: u64) -> Option<i32> {
        let source = self.source(token)?;
        Some(source.dispatch(self))
    }

    /// Block until something happens. `deadline` is an absolute CLOCK_MONOTONIC time in usec;
    /// `None` waits without a timer.
    pub fn wait(&self, deadline: Option<u64>) -> Result<Wakeup> {
        self.data.borrow_mut().wait(deadline)
    }

    /// Reap every exited child without blocking.
    pub fn reap(&self) -> Result<Vec<WaitStatus>> {
        reap_children()
    }

    /// current monotonic time
    pub fn now(&self) -> u64 {
        now_monotonic()
    }

    /// for all: exit event loop
    pub fn set_exit(&self) {
        self.data.borrow_mut().exit = true;
    }

    /// whether set_exit was called
    pub fn exit(&self) -> bool {
        self.data.borrow().exit
    }
}

#[derive(Debug)]
pub(crate) struct EventsData {
    poller: Poll,
    exit: bool,
    signalfd: SignalFd,
    timerfd: RawFd,
    sources: HashMap<u64, (u64, Rc<dyn Source>)>,
    seq: u64,
}

impl Drop for EventsData {
    fn drop(&mut self) {
        let _ = unistd::close(self.timerfd);
    }
}

// the declaration "pub(self)" is for identification only.
impl EventsData {
    pub(self) fn new(signals: &[Signal]) -> Result<EventsData> {
        let mut mask = SigSet::empty();
        mask.add(Signal::SIGCHLD);
        for sig in signals {
            mask.add(*sig);
        }
        mask.thread_block().context(NixSnafu)?;

        let signalfd = SignalFd::with_flags(&mask, SfdFlags::SFD_NONBLOCK | SfdFlags::SFD_CLOEXEC)
            .context(NixSnafu)?;
        let timerfd = crate::syscall!(timerfd_create(
            libc::CLOCK_MONOTONIC,
            libc::TFD_NONBLOCK | libc::TFD_CLOEXEC
        ))?;

        let mut poller = Poll::new()?;
        poller.register(signalfd.as_raw_fd(), TOKEN_SIGNAL)?;
        poller.register(timerfd, TOKEN_TIMER)?;

        Ok(EventsData {
            poller,
            exit: false,
            signalfd,
            timerfd,
            sources: HashMap::new(),
            seq: 0,
        })
    }

    pub(self) fn add_source(&mut self, source: Rc<dyn Source>) -> Result<()> {
        let token = source.token();
        if token >= TOKEN_TIMER {
            return Err(Error::Other {
                word: "token is reserved",
            });
        }
        if self.sources.contains_key(&token) {
            return Err(Error::Other {
                word: "token already registered",
            });
        }

        self.poller.register(source.fd(), token)?;
        self.seq += 1;
        self.sources.insert(token, (self.seq, source));
        Ok(())
    }

    pub(self) fn del_source(&mut self, token: u64) -> Result<()> {
        let (_, source) = self.sources.remove(&token).ok_or(Error::Other {
            word: "item not found",
        })?;
        self.poller.unregister(source.fd())
    }

    pub(self) fn wait(&mut self, deadline: Option<u64>) -> Result<Wakeup> {
        self.arm_timer(deadline)?;

        let mut wakeup = Wakeup::default();
        let events = match self.poller.poll(-1) {
            Ok(v) => v,
            Err(e) if e.is_interrupted() => return Ok(wakeup),
            Err(e) => return Err(e),
        };

        let mut ready = Vec::new();
        for event in events.iter() {
            let token = event.u64;
            match token {
                TOKEN_SIGNAL => self.read_signals(&mut wakeup)?,
                TOKEN_TIMER => {
                    self.flush_timer();
                    wakeup.timer = true;
                }
                _ => {
                    if let Some((seq, source)) = self.sources.get(&token) {
                        ready.push((source.priority(), *seq, token));
                    }
                }
            }
        }

        if let Some(d) = deadline {
            if d <= now_monotonic() {
                wakeup.timer = true;
            }
        }

        ready.sort_unstable();
        wakeup.external = ready.into_iter().map(|(_, _, token)| token).collect();
        Ok(wakeup)
    }

    fn read_signals(&mut self, wakeup: &mut Wakeup) -> Result<()> {
        let mut sigchld = false;
        loop {
            let info = match self.signalfd.read_signal() {
                Ok(Some(v)) => v,
                Ok(None) => break,
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(Error::Nix { source: e }),
            };
            match Signal::try_from(info.ssi_signo as i32) {
                Ok(Signal::SIGCHLD) => sigchld = true,
                Ok(sig) => {
                    if !wakeup.signals.contains(&sig) {
                        wakeup.signals.push(sig);
                    }
                }
                Err(_) => {}
            }
        }

        if sigchld {
            wakeup.exited = reap_children()?;
        }
        Ok(())
    }

    fn arm_timer(&mut self, deadline: Option<u64>) -> Result<()> {
        let zero = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        let value = match deadline {
            None | Some(USEC_INFINITY) => zero,
            // an all-zero it_value would disarm the timer
            Some(d) => timespec_store(d.max(1)),
        };
        let spec = libc::itimerspec {
            it_interval: zero,
            it_value: value,
        };
        crate::syscall!(timerfd_settime(
            self.timerfd,
            libc::TFD_TIMER_ABSTIME,
            &spec,
            ptr::null_mut()
        ))?;
        Ok(())
    }

    fn flush_timer(&self) {
        // expiration count is irrelevant, only readiness matters
        let mut buf = [0u8; 8];
        let _ = unistd::read(self.timerfd, &mut buf);
    }
}

fn reap_children() -> Result<Vec<WaitStatus>> {
    let mut exited = Vec::new();
    loop {
        match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => break,
            Ok(status) => exited.push(status),
            Err(Errno::ECHILD) => break,
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(Error::Nix { source: e }),
        }
    }
    Ok(exited)
}
