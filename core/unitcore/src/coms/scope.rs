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

//! Scope units group processes that were started elsewhere and attached afterwards.
#![allow(non_snake_case)]
use super::{parse_value, SubUnit, UnitEvent, UnitResult};
use crate::error::*;
use crate::unit::{timeout_usec, UnitActiveState, UnitCtx, UnitDefaults, UnitNotifyFlags};
use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;
use nix::unistd::Pid;
use serde::Deserialize;
use std::collections::BTreeSet;

/// The `[Unit.Scope]` table of a unit definition.
#[derive(Deserialize, Clone, Debug, Default)]
#[serde(default)]
pub struct SectionScope {
    pub TimeoutStopSec: Option<u64>,
}

#[derive(PartialEq, Eq, Debug, Copy, Clone)]
pub(super) enum ScopeState {
    Dead,
    Running,
    Abandoned,
    StopSigterm,
    StopSigkill,
    Failed,
}

enum_names!(ScopeState {
    Dead => "dead",
    Running => "running",
    Abandoned => "abandoned",
    StopSigterm => "stop-sigterm",
    StopSigkill => "stop-sigkill",
    Failed => "failed",
});

impl ScopeState {
    fn to_unit_active_state(self) -> UnitActiveState {
        match self {
            ScopeState::Dead => UnitActiveState::InActive,
            ScopeState::Running | ScopeState::Abandoned => UnitActiveState::Active,
            ScopeState::StopSigterm | ScopeState::StopSigkill => UnitActiveState::DeActivating,
            ScopeState::Failed => UnitActiveState::Failed,
        }
    }
}

pub(crate) struct ScopeUnit {
    timeout_stop_usec: u64,
    state: ScopeState,
    result: UnitResult,
    pids: BTreeSet<Pid>,
}

impl ScopeUnit {
    pub(crate) fn new(defaults: &UnitDefaults) -> ScopeUnit {
        ScopeUnit {
            timeout_stop_usec: defaults.timeout_stop_usec,
            state: ScopeState::Dead,
            result: UnitResult::Success,
            pids: BTreeSet::new(),
        }
    }

    pub(crate) fn load(&mut self, section: Option<&SectionScope>, defaults: &UnitDefaults) -> Result<()> {
        self.timeout_stop_usec = timeout_usec(
            section.and_then(|s| s.TimeoutStopSec),
            defaults.timeout_stop_usec,
        );
        Ok(())
    }

    fn attach_pids(&mut self, ctx: &mut UnitCtx, pids: Vec<Pid>) -> Result<()> {
        if matches!(self.state, ScopeState::StopSigterm | ScopeState::StopSigkill) {
            return Err(Error::UnitActionEAgain);
        }
        for pid in pids {
            if self.pids.insert(pid) {
                ctx.watch_pid(pid);
            }
        }
        Ok(())
    }

    fn abandon(&mut self, ctx: &mut UnitCtx) -> Result<()> {
        match self.state {
            ScopeState::Abandoned => Ok(()),
            ScopeState::Running => {
                self.set_state(ctx, ScopeState::Abandoned);
                Ok(())
            }
            _ => Err(Error::UnitActionEBadR),
        }
    }

    fn enter_signal(&mut self, ctx: &mut UnitCtx, state: ScopeState, res: UnitResult) {
        if self.result == UnitResult::Success {
            self.result = res;
        }

        let sig = match state {
            ScopeState::StopSigterm => Signal::SIGTERM,
            _ => Signal::SIGKILL,
        };
        let mut wait = false;
        for pid in self.pids.iter() {
            if ctx.kill(*pid, sig) {
                wait = true;
            }
        }

        if !wait {
            self.enter_dead(ctx, UnitResult::Success);
            return;
        }
        if let Err(e) = ctx.arm_timer(self.timeout_stop_usec) {
            log::warn!("{} failed to arm the stop timer: {}", ctx.unit(), e);
            self.enter_dead(ctx, UnitResult::FailureResources);
            return;
        }
        self.set_state(ctx, state);
    }

    fn enter_dead(&mut self, ctx: &mut UnitCtx, res: UnitResult) {
        if self.result == UnitResult::Success {
            self.result = res;
        }
        if self.result == UnitResult::Success {
            self.set_state(ctx, ScopeState::Dead);
        } else {
            self.set_state(ctx, ScopeState::Failed);
        }
    }

    fn set_state(&mut self, ctx: &mut UnitCtx, state: ScopeState) {
        let original_state = self.state;
        self.state = state;
        log::debug!(
            "unit: {}, original state: {}, change to: {}",
            ctx.unit(),
            original_state,
            state
        );

        if !matches!(state, ScopeState::StopSigterm | ScopeState::StopSigkill) {
            ctx.disarm_timer();
        }
        if matches!(state, ScopeState::Dead | ScopeState::Failed) {
            for pid in std::mem::take(&mut self.pids) {
                ctx.unwatch_pid(pid);
            }
        }

        ctx.notify(
            original_state.to_unit_active_state(),
            state.to_unit_active_state(),
            UnitNotifyFlags::EMPTY,
        );
    }
}

impl SubUnit for ScopeUnit {
    fn active_state(&self) -> UnitActiveState {
        self.state.to_unit_active_state()
    }

    fn sub_state(&self) -> String {
        self.state.to_string()
    }

    fn result(&self) -> String {
        self.result.to_string()
    }

    fn start_check(&self) -> Result<bool> {
        Ok(matches!(self.state, ScopeState::Running | ScopeState::Abandoned))
    }

    fn enter_start(&mut self, ctx: &mut UnitCtx) -> Result<()> {
        if self.start_check()? {
            return Ok(());
        }

        self.result = UnitResult::Success;
        if self.pids.is_empty() {
            log::error!("{} has no processes attached, refusing to start", ctx.unit());
            self.enter_dead(ctx, UnitResult::FailureResources);
            return Ok(());
        }
        self.set_state(ctx, ScopeState::Running);
        Ok(())
    }

    fn enter_stop(&mut self, ctx: &mut UnitCtx) -> Result<()> {
        if matches!(self.state, ScopeState::Running | ScopeState::Abandoned) {
            self.enter_signal(ctx, ScopeState::StopSigterm, UnitResult::Success);
        }
        Ok(())
    }

    fn process_exit(&mut self, ctx: &mut UnitCtx, pid: Pid, _status: &WaitStatus) {
        if !self.pids.remove(&pid) {
            return;
        }
        ctx.unwatch_pid(pid);

        if self.pids.is_empty()
            && matches!(
                self.state,
                ScopeState::Running
                    | ScopeState::Abandoned
                    | ScopeState::StopSigterm
                    | ScopeState::StopSigkill
            )
        {
            self.enter_dead(ctx, UnitResult::Success);
        }
    }

    fn process_timeout(&mut self, ctx: &mut UnitCtx) {
        match self.state {
            ScopeState::StopSigterm => {
                log::warn!("{} stopping timed out. Killing.", ctx.unit());
                self.enter_signal(ctx, ScopeState::StopSigkill, UnitResult::FailureTimeout);
            }
            ScopeState::StopSigkill => {
                log::warn!("{} still around after SIGKILL. Ignoring.", ctx.unit());
                self.enter_dead(ctx, UnitResult::FailureTimeout);
            }
            _ => {}
        }
    }

    fn unit_event(&mut self, ctx: &mut UnitCtx, event: UnitEvent) -> Result<()> {
        match event {
            UnitEvent::AttachPids(pids) => self.attach_pids(ctx, pids),
            UnitEvent::Abandon => self.abandon(ctx),
            _ => Err(Error::UnitActionEOpNotSupp),
        }
    }

    fn reset_failed(&mut self, ctx: &mut UnitCtx) {
        if self.state == ScopeState::Failed {
            self.set_state(ctx, ScopeState::Dead);
        }
        self.result = UnitResult::Success;
    }

    fn start_limit_hit(&mut self, ctx: &mut UnitCtx) {
        self.result = UnitResult::FailureStartLimitHit;
        self.enter_dead(ctx, UnitResult::FailureStartLimitHit);
    }

    fn serialize(&self) -> Vec<(String, String)> {
        let pids: Vec<String> = self.pids.iter().map(|p| p.to_string()).collect();
        vec![
            ("state".to_string(), self.state.to_string()),
            ("result".to_string(), self.result.to_string()),
            ("pids".to_string(), pids.join(" ")),
        ]
    }

    fn deserialize_item(&mut self, key: &str, value: &str) -> Result<bool> {
        match key {
            "state" => self.state = parse_value(key, value)?,
            "result" => self.result = parse_value(key, value)?,
            "pids" => {
                self.pids.clear();
                for word in value.split_whitespace() {
                    self.pids.insert(Pid::from_raw(parse_value(key, word)?));
                }
            }
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn coldplug(&mut self, ctx: &mut UnitCtx) {
        for pid in self.pids.iter() {
            ctx.watch_pid(*pid);
        }
    }

    fn pids(&self) -> Vec<Pid> {
        self.pids.iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::FakeExecutor;
    use crate::unit::TimerKey;
    use event::TimerQueue;
    use std::cell::RefCell;

    #[test]
    fn test_scope_lifecycle() {
        let exec = FakeExecutor::new();
        let timers = RefCell::new(TimerQueue::<TimerKey>::new());
        let mut ctx = UnitCtx::new("session-1.scope", 0, &exec, &timers);
        let mut s = ScopeUnit::new(&UnitDefaults::default());

        s.enter_start(&mut ctx).unwrap();
        assert_eq!(s.state, ScopeState::Failed);
        assert_eq!(s.result(), "resources");
        s.reset_failed(&mut ctx);

        let (a, b) = (Pid::from_raw(100), Pid::from_raw(101));
        s.unit_event(&mut ctx, UnitEvent::AttachPids(vec![a, b]))
            .unwrap();
        s.enter_start(&mut ctx).unwrap();
        assert_eq!(s.state, ScopeState::Running);

        s.unit_event(&mut ctx, UnitEvent::Abandon).unwrap();
        assert_eq!(s.state, ScopeState::Abandoned);

        s.process_exit(&mut ctx, a, &WaitStatus::Exited(a, 0));
        assert_eq!(s.state, ScopeState::Abandoned);
        s.process_exit(&mut ctx, b, &WaitStatus::Exited(b, 1));
        assert_eq!(s.state, ScopeState::Dead);
        assert_eq!(s.result(), "success");
    }

    #[test]
    fn test_scope_stop_timeout() {
        let exec = FakeExecutor::new();
        let timers = RefCell::new(TimerQueue::<TimerKey>::new());
        let mut ctx = UnitCtx::new("session-2.scope", 0, &exec, &timers);
        let mut s = ScopeUnit::new(&UnitDefaults::default());

        let pid = exec.adopt();
        s.unit_event(&mut ctx, UnitEvent::AttachPids(vec![pid]))
            .unwrap();
        s.enter_start(&mut ctx).unwrap();
        s.enter_stop(&mut ctx).unwrap();
        assert_eq!(s.state, ScopeState::StopSigterm);
        s.process_timeout(&mut ctx);
        assert_eq!(s.state, ScopeState::StopSigkill);
        s.process_timeout(&mut ctx);
        assert_eq!(s.state, ScopeState::Failed);
        assert_eq!(s.result(), "timeout");
        assert!(s.pids().is_empty());
    }

    #[test]
    fn test_scope_serialize() {
        let mut s = ScopeUnit::new(&UnitDefaults::default());
        s.deserialize_item("pids", "7 9").unwrap();
        s.deserialize_item("state", "abandoned").unwrap();
        assert_eq!(s.pids(), vec![Pid::from_raw(7), Pid::from_raw(9)]);
        assert_eq!(s.active_state(), UnitActiveState::Active);
        assert!(s.serialize().contains(&("pids".to_string(), "7 9".to_string())));
    }
}
