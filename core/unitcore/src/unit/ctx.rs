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

//! The side-effect channel of a unit variant.
//!
//! A variant never reaches into the graph or the job table. Process and timer calls go out
//! immediately; everything touching other subsystems is recorded as a [`UnitEffect`] and
//! applied by the manager, in order, once the variant returned.
use super::state::{UnitActiveState, UnitNotifyFlags};
use crate::error::*;
use crate::exec::{EmergencyAction, ExecCommand, ExecContext, Executor};
use crate::job::{JobKind, JobMode};
use event::time::{usec_add, USEC_INFINITY};
use event::TimerQueue;
use nix::sys::signal::Signal;
use nix::unistd::Pid;
use std::cell::RefCell;

/// Owner of an entry in the manager's timer heap.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum TimerKey {
    /// the phase timer of a unit
    Unit(String),
    /// the timeout of a job
    Job(u128),
}

/// What a variant asked for, applied after it returns.
#[derive(Clone, PartialEq, Eq, Debug)]
pub(crate) enum UnitEffect {
    WatchPid(Pid),
    UnwatchPid(Pid),
    Notify {
        os: UnitActiveState,
        ns: UnitActiveState,
        flags: UnitNotifyFlags,
    },
    QueueJob {
        unit: String,
        kind: JobKind,
        mode: JobMode,
    },
    Emergency {
        action: EmergencyAction,
        reason: String,
    },
}

pub(crate) struct UnitCtx<'a> {
    unit: &'a str,
    now: u64,
    exec: &'a dyn Executor,
    timers: &'a RefCell<TimerQueue<TimerKey>>,
    stop_pending: bool,
    triggers: Vec<String>,
    effects: Vec<UnitEffect>,
}

impl<'a> UnitCtx<'a> {
    pub(crate) fn new(
        unit: &'a str,
        now: u64,
        exec: &'a dyn Executor,
        timers: &'a RefCell<TimerQueue<TimerKey>>,
    ) -> UnitCtx<'a> {
        UnitCtx {
            unit,
            now,
            exec,
            timers,
            stop_pending: false,
            triggers: Vec::new(),
            effects: Vec::new(),
        }
    }

    /// a stop job is installed on the unit
    pub(crate) fn with_stop_pending(mut self, stop_pending: bool) -> Self {
        self.stop_pending = stop_pending;
        self
    }

    /// the units this one triggers
    pub(crate) fn with_triggers(mut self, triggers: Vec<String>) -> Self {
        self.triggers = triggers;
        self
    }

    pub(crate) fn unit(&self) -> &str {
        self.unit
    }

    pub(crate) fn now(&self) -> u64 {
        self.now
    }

    pub(crate) fn stop_pending(&self) -> bool {
        self.stop_pending
    }

    pub(crate) fn triggers(&self) -> &[String] {
        &self.triggers
    }

    /// Spawn `cmd` and watch the new pid.
    pub(crate) fn spawn(&mut self, cmd: &ExecCommand, ctx: &ExecContext) -> Result<Pid> {
        let pid = self.exec.spawn(self.unit, cmd, ctx)?;
        self.watch_pid(pid);
        Ok(pid)
    }

    /// Signal `pid`, false if it could not be signaled (usually because it is gone).
    pub(crate) fn kill(&self, pid: Pid, signal: Signal) -> bool {
        match self.exec.kill(pid, signal) {
            Ok(_) => true,
            Err(e) => {
                log::debug!("{} failed to send {} to {}: {}", self.unit, signal, pid, e);
                false
            }
        }
    }

    pub(crate) fn watch_pid(&mut self, pid: Pid) {
        self.effects.push(UnitEffect::WatchPid(pid));
    }

    pub(crate) fn unwatch_pid(&mut self, pid: Pid) {
        self.effects.push(UnitEffect::UnwatchPid(pid));
    }

    /// Arm the phase timer `usec` from now. An infinite timeout disarms it.
    pub(crate) fn arm_timer(&mut self, usec: u64) -> Result<()> {
        if usec == USEC_INFINITY {
            self.disarm_timer();
            return Ok(());
        }
        self.arm_timer_at(usec_add(self.now, usec))
    }

    /// Arm the phase timer at an absolute deadline.
    pub(crate) fn arm_timer_at(&mut self, deadline: u64) -> Result<()> {
        self.timers
            .borrow_mut()
            .arm(TimerKey::Unit(self.unit.to_string()), deadline)
            .map_err(|e| Error::Resources {
                what: format!("timer of {}: {}", self.unit, e),
            })
    }

    pub(crate) fn disarm_timer(&mut self) {
        self.timers
            .borrow_mut()
            .disarm(&TimerKey::Unit(self.unit.to_string()));
    }

    /// Record an active state transition.
    pub(crate) fn notify(
        &mut self,
        os: UnitActiveState,
        ns: UnitActiveState,
        flags: UnitNotifyFlags,
    ) {
        self.effects.push(UnitEffect::Notify { os, ns, flags });
    }

    pub(crate) fn queue_job(&mut self, unit: &str, kind: JobKind, mode: JobMode) {
        self.effects.push(UnitEffect::QueueJob {
            unit: unit.to_string(),
            kind,
            mode,
        });
    }

    pub(crate) fn emergency_action(&mut self, action: EmergencyAction, reason: &str) {
        if action == EmergencyAction::None {
            return;
        }
        self.effects.push(UnitEffect::Emergency {
            action,
            reason: reason.to_string(),
        });
    }

    pub(crate) fn into_effects(self) -> Vec<UnitEffect> {
        self.effects
    }
}
