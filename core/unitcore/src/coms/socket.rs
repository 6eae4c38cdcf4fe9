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

//! Socket units listen on behalf of the unit they trigger. The listening itself is an
//! external readiness source bound to the unit; the socket only reacts to it.
#![allow(non_snake_case)]
use super::{format_pid, parse_pid, parse_value, sigchld_result, SubUnit, UnitEvent, UnitResult};
use crate::error::*;
use crate::exec::{ExecCommand, ExecContext};
use crate::job::{JobKind, JobMode};
use crate::unit::{timeout_usec, UnitActiveState, UnitCtx, UnitDefaults, UnitNotifyFlags};
use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;
use nix::unistd::Pid;
use serde::Deserialize;
use std::collections::VecDeque;

/// The `[Unit.Socket]` table of a unit definition.
#[derive(Deserialize, Clone, Debug, Default)]
#[serde(default)]
pub struct SectionSocket {
    pub ExecStartPre: Vec<String>,
    pub ExecStopPost: Vec<String>,
    pub Service: Option<String>,
    pub TimeoutSec: Option<u64>,
}

#[derive(PartialEq, Eq, Debug, Copy, Clone)]
pub(super) enum SocketState {
    Dead,
    StartPre,
    Listening,
    Running,
    StopPost,
    FinalSigterm,
    FinalSigkill,
    Failed,
}

enum_names!(SocketState {
    Dead => "dead",
    StartPre => "start-pre",
    Listening => "listening",
    Running => "running",
    StopPost => "stop-post",
    FinalSigterm => "final-sigterm",
    FinalSigkill => "final-sigkill",
    Failed => "failed",
});

impl SocketState {
    fn to_unit_active_state(self) -> UnitActiveState {
        match self {
            SocketState::Dead => UnitActiveState::InActive,
            SocketState::StartPre => UnitActiveState::Activating,
            SocketState::Listening | SocketState::Running => UnitActiveState::Active,
            SocketState::StopPost | SocketState::FinalSigterm | SocketState::FinalSigkill => {
                UnitActiveState::DeActivating
            }
            SocketState::Failed => UnitActiveState::Failed,
        }
    }
}

#[derive(PartialEq, Eq, Debug, Copy, Clone)]
pub(super) enum SocketCommand {
    StartPre,
    StopPost,
}

enum_names!(SocketCommand {
    StartPre => "start-pre",
    StopPost => "stop-post",
});

pub(crate) struct SocketUnit {
    start_pre: Vec<ExecCommand>,
    stop_post: Vec<ExecCommand>,
    timeout_usec: u64,

    state: SocketState,
    result: UnitResult,
    control_pid: Option<Pid>,
    control_cmd_type: Option<SocketCommand>,
    control_command: VecDeque<ExecCommand>,
}

impl SocketUnit {
    pub(crate) fn new(defaults: &UnitDefaults) -> SocketUnit {
        SocketUnit {
            start_pre: Vec::new(),
            stop_post: Vec::new(),
            timeout_usec: defaults.timeout_start_usec,
            state: SocketState::Dead,
            result: UnitResult::Success,
            control_pid: None,
            control_cmd_type: None,
            control_command: VecDeque::new(),
        }
    }

    pub(crate) fn load(&mut self, section: Option<&SectionSocket>, defaults: &UnitDefaults) -> Result<()> {
        let section = match section {
            Some(s) => s,
            None => return Ok(()),
        };
        self.start_pre = ExecCommand::parse_many(&section.ExecStartPre)?;
        self.stop_post = ExecCommand::parse_many(&section.ExecStopPost)?;
        self.timeout_usec = timeout_usec(section.TimeoutSec, defaults.timeout_start_usec);
        Ok(())
    }

    fn exec_cmds(&self, cmd_type: SocketCommand) -> &[ExecCommand] {
        match cmd_type {
            SocketCommand::StartPre => &self.start_pre,
            SocketCommand::StopPost => &self.stop_post,
        }
    }

    fn control_command_fill(&mut self, cmd_type: SocketCommand) {
        self.control_command = self.exec_cmds(cmd_type).iter().cloned().collect();
        self.control_cmd_type = Some(cmd_type);
    }

    /// Spawn the next queued control command, false if the queue was empty.
    fn run_next(&mut self, ctx: &mut UnitCtx) -> Result<bool> {
        let cmd = match self.control_command.pop_front() {
            Some(cmd) => cmd,
            None => return Ok(false),
        };
        ctx.arm_timer(self.timeout_usec)?;
        self.control_pid = Some(ctx.spawn(&cmd, &ExecContext::new())?);
        Ok(true)
    }

    fn enter_start_pre(&mut self, ctx: &mut UnitCtx) {
        self.control_command_fill(SocketCommand::StartPre);
        match self.run_next(ctx) {
            Ok(true) => self.set_state(ctx, SocketState::StartPre),
            Ok(false) => self.enter_listening(ctx),
            Err(e) => {
                log::error!("Failed to run ExecStartPre of {}: {}", ctx.unit(), e);
                self.enter_dead(ctx, UnitResult::FailureResources);
            }
        }
    }

    fn enter_listening(&mut self, ctx: &mut UnitCtx) {
        self.set_state(ctx, SocketState::Listening);
    }

    fn enter_running(&mut self, ctx: &mut UnitCtx) {
        if ctx.stop_pending() {
            log::debug!("{} is being stopped, ignoring the incoming connection", ctx.unit());
            return;
        }

        if ctx.triggers().is_empty() {
            log::error!("{} has no unit to trigger", ctx.unit());
            self.enter_stop_post(ctx, UnitResult::FailureResources);
            return;
        }

        for unit in ctx.triggers().to_vec() {
            ctx.queue_job(&unit, JobKind::Start, JobMode::Replace);
        }
        self.set_state(ctx, SocketState::Running);
    }

    fn enter_stop_post(&mut self, ctx: &mut UnitCtx, res: UnitResult) {
        if self.result == UnitResult::Success {
            self.result = res;
        }

        self.control_command_fill(SocketCommand::StopPost);
        match self.run_next(ctx) {
            Ok(true) => self.set_state(ctx, SocketState::StopPost),
            Ok(false) => self.enter_signal(ctx, SocketState::FinalSigterm, UnitResult::Success),
            Err(e) => {
                log::error!("Failed to run ExecStopPost of {}: {}", ctx.unit(), e);
                self.enter_signal(ctx, SocketState::FinalSigterm, UnitResult::FailureResources);
            }
        }
    }

    fn enter_signal(&mut self, ctx: &mut UnitCtx, state: SocketState, res: UnitResult) {
        if self.result == UnitResult::Success {
            self.result = res;
        }

        let sig = if state == SocketState::FinalSigterm {
            Signal::SIGTERM
        } else {
            Signal::SIGKILL
        };
        let wait = self.control_pid.map_or(false, |pid| ctx.kill(pid, sig));
        if wait {
            if let Err(e) = ctx.arm_timer(self.timeout_usec) {
                log::warn!("{} failed to arm the kill timer: {}", ctx.unit(), e);
                self.enter_dead(ctx, UnitResult::FailureResources);
                return;
            }
            self.set_state(ctx, state);
        } else if state == SocketState::FinalSigterm {
            self.enter_signal(ctx, SocketState::FinalSigkill, UnitResult::Success);
        } else {
            self.enter_dead(ctx, UnitResult::Success);
        }
    }

    fn enter_dead(&mut self, ctx: &mut UnitCtx, res: UnitResult) {
        if self.result == UnitResult::Success {
            self.result = res;
        }
        let state = if self.result == UnitResult::Success {
            SocketState::Dead
        } else {
            SocketState::Failed
        };
        self.set_state(ctx, state);
    }

    fn set_state(&mut self, ctx: &mut UnitCtx, state: SocketState) {
        let original_state = self.state;
        self.state = state;
        log::debug!(
            "unit: {}, original state: {}, change to: {}",
            ctx.unit(),
            original_state,
            state
        );

        if !matches!(
            state,
            SocketState::StartPre
                | SocketState::StopPost
                | SocketState::FinalSigterm
                | SocketState::FinalSigkill
        ) {
            ctx.disarm_timer();
            if let Some(pid) = self.control_pid.take() {
                ctx.unwatch_pid(pid);
            }
            self.control_command.clear();
            self.control_cmd_type = None;
        }

        ctx.notify(
            original_state.to_unit_active_state(),
            state.to_unit_active_state(),
            UnitNotifyFlags::EMPTY,
        );
    }
}

impl SubUnit for SocketUnit {
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
        match self.state {
            SocketState::StopPost | SocketState::FinalSigterm | SocketState::FinalSigkill => {
                Err(Error::UnitActionEAgain)
            }
            SocketState::StartPre => Ok(true),
            _ => Ok(false),
        }
    }

    fn enter_start(&mut self, ctx: &mut UnitCtx) -> Result<()> {
        if self.start_check()? {
            return Ok(());
        }
        self.result = UnitResult::Success;
        self.enter_start_pre(ctx);
        Ok(())
    }

    fn enter_stop(&mut self, ctx: &mut UnitCtx) -> Result<()> {
        match self.state {
            SocketState::StartPre => {
                self.enter_signal(ctx, SocketState::FinalSigterm, UnitResult::Success)
            }
            SocketState::Listening | SocketState::Running => {
                self.enter_stop_post(ctx, UnitResult::Success)
            }
            _ => {}
        }
        Ok(())
    }

    fn process_exit(&mut self, ctx: &mut UnitCtx, pid: Pid, status: &WaitStatus) {
        if self.control_pid != Some(pid) {
            return;
        }
        self.control_pid = None;
        ctx.unwatch_pid(pid);

        let f = sigchld_result(status, false);
        if f == UnitResult::Success && !self.control_command.is_empty() {
            if let Err(e) = self.run_next(ctx) {
                log::error!("Failed to run next command of {}: {}", ctx.unit(), e);
                self.enter_signal(ctx, SocketState::FinalSigterm, UnitResult::FailureResources);
            }
            return;
        }

        match self.state {
            SocketState::StartPre => {
                if f == UnitResult::Success {
                    self.enter_listening(ctx);
                } else {
                    self.enter_signal(ctx, SocketState::FinalSigterm, f);
                }
            }
            SocketState::StopPost => self.enter_signal(ctx, SocketState::FinalSigterm, f),
            SocketState::FinalSigterm | SocketState::FinalSigkill => self.enter_dead(ctx, f),
            _ => {}
        }
    }

    fn process_timeout(&mut self, ctx: &mut UnitCtx) {
        match self.state {
            SocketState::StartPre => {
                log::warn!("{} starting timed out. Terminating.", ctx.unit());
                self.enter_signal(ctx, SocketState::FinalSigterm, UnitResult::FailureTimeout);
            }
            SocketState::StopPost => {
                log::warn!("{} stop-post timed out. Terminating.", ctx.unit());
                self.enter_signal(ctx, SocketState::FinalSigterm, UnitResult::FailureTimeout);
            }
            SocketState::FinalSigterm => {
                log::warn!("{} stopping timed out (2). Killing.", ctx.unit());
                self.enter_signal(ctx, SocketState::FinalSigkill, UnitResult::FailureTimeout);
            }
            SocketState::FinalSigkill => {
                log::warn!("{} still around after SIGKILL (2). Entering failed mode.", ctx.unit());
                self.enter_dead(ctx, UnitResult::FailureTimeout);
            }
            _ => {}
        }
    }

    fn trigger_notify(&mut self, ctx: &mut UnitCtx, other: &str, state: UnitActiveState) {
        if self.state == SocketState::Running && state.is_inactive_or_failed() {
            log::debug!("{} went down, {} listens again", other, ctx.unit());
            self.enter_listening(ctx);
        }
    }

    fn unit_event(&mut self, ctx: &mut UnitCtx, event: UnitEvent) -> Result<()> {
        if event != UnitEvent::Ready {
            return Err(Error::UnitActionEOpNotSupp);
        }
        if self.state == SocketState::Listening {
            self.enter_running(ctx);
        }
        Ok(())
    }

    fn reset_failed(&mut self, ctx: &mut UnitCtx) {
        if self.state == SocketState::Failed {
            self.set_state(ctx, SocketState::Dead);
        }
        self.result = UnitResult::Success;
    }

    fn start_limit_hit(&mut self, ctx: &mut UnitCtx) {
        self.result = UnitResult::FailureStartLimitHit;
        self.enter_dead(ctx, UnitResult::FailureStartLimitHit);
    }

    fn serialize(&self) -> Vec<(String, String)> {
        let control_command = match self.control_cmd_type {
            Some(cmd_type) => {
                let left = self.control_command.len();
                match self.exec_cmds(cmd_type).len().checked_sub(left + 1) {
                    Some(index) => format!("{}:{}", cmd_type, index),
                    None => "-".to_string(),
                }
            }
            None => "-".to_string(),
        };
        vec![
            ("state".to_string(), self.state.to_string()),
            ("result".to_string(), self.result.to_string()),
            ("control-pid".to_string(), format_pid(self.control_pid)),
            ("control-command".to_string(), control_command),
        ]
    }

    fn deserialize_item(&mut self, key: &str, value: &str) -> Result<bool> {
        match key {
            "state" => self.state = parse_value(key, value)?,
            "result" => self.result = parse_value(key, value)?,
            "control-pid" => self.control_pid = parse_pid(value)?,
            "control-command" => {
                self.control_command.clear();
                self.control_cmd_type = None;
                if let Some((cmd_type, index)) = value.split_once(':') {
                    let cmd_type: SocketCommand = parse_value(key, cmd_type)?;
                    let index: usize = parse_value(key, index)?;
                    self.control_command = self
                        .exec_cmds(cmd_type)
                        .iter()
                        .skip(index + 1)
                        .cloned()
                        .collect();
                    self.control_cmd_type = Some(cmd_type);
                }
            }
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn coldplug(&mut self, ctx: &mut UnitCtx) {
        if let Some(pid) = self.control_pid {
            ctx.watch_pid(pid);
        }
    }

    fn pids(&self) -> Vec<Pid> {
        self.control_pid.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::FakeExecutor;
    use crate::unit::{TimerKey, UnitEffect};
    use event::TimerQueue;
    use std::cell::RefCell;

    fn socket_unit(section: &str) -> SocketUnit {
        let section: SectionSocket = toml::from_str(section).unwrap();
        let defaults = UnitDefaults::default();
        let mut s = SocketUnit::new(&defaults);
        s.load(Some(&section), &defaults).unwrap();
        s
    }

    #[test]
    fn test_socket_triggers_service() {
        let exec = FakeExecutor::new();
        let timers = RefCell::new(TimerQueue::<TimerKey>::new());
        let mut s = socket_unit("ExecStartPre = [\"/bin/prepare\"]");

        let mut ctx = UnitCtx::new("web.socket", 0, &exec, &timers)
            .with_triggers(vec!["web.service".to_string()]);
        s.enter_start(&mut ctx).unwrap();
        assert_eq!(s.state, SocketState::StartPre);
        let pid = s.control_pid.unwrap();
        s.process_exit(&mut ctx, pid, &WaitStatus::Exited(pid, 0));
        assert_eq!(s.state, SocketState::Listening);

        s.unit_event(&mut ctx, UnitEvent::Ready).unwrap();
        assert_eq!(s.state, SocketState::Running);
        assert!(ctx.into_effects().contains(&UnitEffect::QueueJob {
            unit: "web.service".to_string(),
            kind: JobKind::Start,
            mode: JobMode::Replace
        }));

        let mut ctx = UnitCtx::new("web.socket", 0, &exec, &timers);
        s.trigger_notify(&mut ctx, "web.service", UnitActiveState::InActive);
        assert_eq!(s.state, SocketState::Listening);
    }

    #[test]
    fn test_socket_without_trigger_stops() {
        let exec = FakeExecutor::new();
        let timers = RefCell::new(TimerQueue::<TimerKey>::new());
        let mut s = socket_unit("");
        let mut ctx = UnitCtx::new("lonely.socket", 0, &exec, &timers);

        s.enter_start(&mut ctx).unwrap();
        assert_eq!(s.state, SocketState::Listening);
        s.unit_event(&mut ctx, UnitEvent::Ready).unwrap();
        assert_eq!(s.state, SocketState::Failed);
        assert_eq!(s.result(), "resources");
    }

    #[test]
    fn test_socket_stop_post() {
        let exec = FakeExecutor::new();
        let timers = RefCell::new(TimerQueue::<TimerKey>::new());
        let mut s = socket_unit("ExecStopPost = [\"/bin/a\", \"/bin/b\"]");
        let mut ctx = UnitCtx::new("web.socket", 0, &exec, &timers);

        s.enter_start(&mut ctx).unwrap();
        s.enter_stop(&mut ctx).unwrap();
        assert_eq!(s.state, SocketState::StopPost);
        assert_eq!(
            s.serialize()[3],
            ("control-command".to_string(), "stop-post:0".to_string())
        );

        let first = s.control_pid.unwrap();
        exec.exit(first);
        s.process_exit(&mut ctx, first, &WaitStatus::Exited(first, 0));
        let second = s.control_pid.unwrap();
        exec.exit(second);
        s.process_exit(&mut ctx, second, &WaitStatus::Exited(second, 0));
        assert_eq!(s.state, SocketState::Dead);
        assert_eq!(exec.spawned().len(), 2);
    }
}
