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

use super::rentry::{
    ExitStatus, SectionService, ServiceCommand, ServiceConfig, ServiceRestart, ServiceState,
    ServiceType,
};
use crate::coms::{format_pid, parse_pid, parse_value, sigchld_result, SubUnit, UnitResult};
use crate::error::*;
use crate::exec::ExecCommand;
use crate::job::{JobKind, JobMode};
use crate::unit::{UnitActiveState, UnitCtx, UnitDefaults, UnitNotifyFlags};
use event::time::USEC_INFINITY;
use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;
use nix::unistd::Pid;
use std::collections::VecDeque;

pub(crate) struct ServiceUnit {
    config: ServiceConfig,

    state: ServiceState,
    result: UnitResult,
    reload_result: UnitResult,
    main_pid: Option<Pid>,
    control_pid: Option<Pid>,
    main_command: VecDeque<ExecCommand>,
    current_main_command: Option<ExecCommand>,
    control_command: VecDeque<ExecCommand>,
    current_control_command: Option<ExecCommand>,
    control_cmd_type: Option<ServiceCommand>,
    forbid_restart: bool,
    will_auto_restart: bool,
    restarts: u32,
    exit_status: Option<ExitStatus>,
}

impl ServiceUnit {
    pub(crate) fn new(defaults: &UnitDefaults) -> ServiceUnit {
        ServiceUnit {
            config: ServiceConfig::new(defaults),
            state: ServiceState::Dead,
            result: UnitResult::Success,
            reload_result: UnitResult::Success,
            main_pid: None,
            control_pid: None,
            main_command: VecDeque::new(),
            current_main_command: None,
            control_command: VecDeque::new(),
            current_control_command: None,
            control_cmd_type: None,
            forbid_restart: false,
            will_auto_restart: false,
            restarts: 0,
            exit_status: None,
        }
    }

    pub(crate) fn load(&mut self, section: &SectionService, defaults: &UnitDefaults) -> Result<()> {
        self.config = ServiceConfig::from_section(section, defaults)?;
        Ok(())
    }

    fn start_action(&mut self, ctx: &mut UnitCtx) {
        self.result = UnitResult::Success;
        self.reload_result = UnitResult::Success;
        self.exit_status = None;
        self.forbid_restart = false;
        self.enter_prestart(ctx);
    }

    fn stop_action(&mut self, ctx: &mut UnitCtx) {
        self.forbid_restart = true;
        match self.state {
            ServiceState::Stop
            | ServiceState::StopSigterm
            | ServiceState::StopSigkill
            | ServiceState::StopPost
            | ServiceState::FinalSigterm
            | ServiceState::FinalSigkill => {}
            // the restart is canceled, nothing runs
            ServiceState::AutoRestart => self.set_state(ctx, ServiceState::Dead),
            ServiceState::StartPre
            | ServiceState::Start
            | ServiceState::StartPost
            | ServiceState::Reload => self.enter_signal(ctx, ServiceState::StopSigterm, UnitResult::Success),
            ServiceState::Running | ServiceState::Exited => {
                self.enter_stop_cmd(ctx, UnitResult::Success)
            }
            ServiceState::Dead | ServiceState::Failed => {}
        }
    }

    fn enter_prestart(&mut self, ctx: &mut UnitCtx) {
        self.unwatch_control(ctx);
        self.control_command_fill(ServiceCommand::StartPre);
        match self.control_command_pop() {
            Some(cmd) => {
                if let Err(e) = self.spawn_control(ctx, cmd, self.config.timeout_start_usec) {
                    log::error!("Failed to run ExecStartPre of {}: {}", ctx.unit(), e);
                    self.enter_dead(ctx, UnitResult::FailureResources, true);
                    return;
                }
                self.set_state(ctx, ServiceState::StartPre);
            }
            None => self.enter_start_main(ctx),
        }
    }

    fn enter_start_main(&mut self, ctx: &mut UnitCtx) {
        self.unwatch_control(ctx);
        self.unwatch_main(ctx);
        self.main_command_fill();
        let cmd = match self.main_command_pop() {
            Some(cmd) => cmd,
            None => {
                if self.config.service_type == ServiceType::Oneshot {
                    self.enter_start_post(ctx);
                } else {
                    log::error!("{} has no ExecStart", ctx.unit());
                    self.enter_signal(ctx, ServiceState::StopSigterm, UnitResult::FailureResources);
                }
                return;
            }
        };

        let timeout = match self.config.service_type {
            ServiceType::Simple => USEC_INFINITY,
            ServiceType::Oneshot => self.config.timeout_start_usec,
        };
        if let Err(e) = self.spawn_main(ctx, cmd, timeout) {
            log::error!("Failed to run ExecStart of {}: {}", ctx.unit(), e);
            self.enter_signal(ctx, ServiceState::StopSigterm, UnitResult::FailureResources);
            return;
        }

        match self.config.service_type {
            ServiceType::Simple => self.enter_start_post(ctx),
            ServiceType::Oneshot => self.set_state(ctx, ServiceState::Start),
        }
    }

    fn enter_start_post(&mut self, ctx: &mut UnitCtx) {
        self.unwatch_control(ctx);
        self.control_command_fill(ServiceCommand::StartPost);
        match self.control_command_pop() {
            Some(cmd) => {
                if let Err(e) = self.spawn_control(ctx, cmd, self.config.timeout_start_usec) {
                    log::error!("Failed to run ExecStartPost of {}: {}", ctx.unit(), e);
                    self.enter_stop_cmd(ctx, UnitResult::FailureResources);
                    return;
                }
                self.set_state(ctx, ServiceState::StartPost);
            }
            None => self.enter_running(ctx, UnitResult::Success),
        }
    }

    fn enter_running(&mut self, ctx: &mut UnitCtx, sr: UnitResult) {
        self.unwatch_control(ctx);
        if self.result == UnitResult::Success {
            self.result = sr;
        }

        if self.result != UnitResult::Success {
            self.enter_signal(ctx, ServiceState::StopSigterm, sr);
        } else if self.main_pid.is_some() {
            self.set_state(ctx, ServiceState::Running);
            log::info!("Started {}", ctx.unit());
        } else if self.config.remain_after_exit {
            self.set_state(ctx, ServiceState::Exited);
        } else {
            self.enter_stop_cmd(ctx, sr);
        }
    }

    fn enter_stop_cmd(&mut self, ctx: &mut UnitCtx, res: UnitResult) {
        log::debug!("{} running stop command, service result: {}", ctx.unit(), res);
        if self.result == UnitResult::Success {
            self.result = res;
        }

        self.unwatch_control(ctx);
        self.control_command_fill(ServiceCommand::Stop);
        let cmd = match self.control_command_pop() {
            None => {
                self.enter_signal(ctx, ServiceState::StopSigterm, UnitResult::Success);
                return;
            }
            Some(v) => v,
        };

        if let Err(e) = self.spawn_control(ctx, cmd, self.config.timeout_stop_usec) {
            log::error!("Failed to run ExecStop of {}: {}", ctx.unit(), e);
            self.enter_signal(ctx, ServiceState::StopSigterm, UnitResult::FailureResources);
            return;
        }
        self.set_state(ctx, ServiceState::Stop);
    }

    fn enter_stop_post(&mut self, ctx: &mut UnitCtx, res: UnitResult) {
        log::debug!("{} running stop post, service result: {}", ctx.unit(), res);
        if self.result == UnitResult::Success {
            self.result = res;
        }

        self.unwatch_control(ctx);
        self.control_command_fill(ServiceCommand::StopPost);
        let cmd = match self.control_command_pop() {
            None => {
                self.enter_signal(ctx, ServiceState::FinalSigterm, UnitResult::Success);
                return;
            }
            Some(v) => v,
        };

        if let Err(e) = self.spawn_control(ctx, cmd, self.config.timeout_stop_usec) {
            log::error!("Failed to run ExecStopPost of {}: {}", ctx.unit(), e);
            self.enter_signal(ctx, ServiceState::FinalSigterm, UnitResult::FailureResources);
            return;
        }
        self.set_state(ctx, ServiceState::StopPost);
    }

    fn enter_dead(&mut self, ctx: &mut UnitCtx, res: UnitResult, allow_restart: bool) {
        log::debug!(
            "{} running into dead state, res: {}, current res: {}, restart: {}",
            ctx.unit(),
            res,
            self.result,
            allow_restart
        );
        if self.result == UnitResult::Success {
            self.result = res;
        }

        let state = if self.result == UnitResult::Success {
            ServiceState::Dead
        } else {
            ServiceState::Failed
        };

        let restart = allow_restart && !ctx.stop_pending() && self.shall_restart();
        if restart {
            self.will_auto_restart = true;
        }

        self.set_state(ctx, state);
        if restart {
            self.will_auto_restart = false;
            if let Err(e) = ctx.arm_timer(self.config.restart_usec) {
                log::warn!("{} failed to schedule the restart: {}", ctx.unit(), e);
                self.enter_dead(ctx, UnitResult::FailureResources, false);
                return;
            }
            self.set_state(ctx, ServiceState::AutoRestart);
        } else {
            log::info!("Stopped {}", ctx.unit());
        }

        self.forbid_restart = false;
    }

    fn enter_reload(&mut self, ctx: &mut UnitCtx) {
        self.unwatch_control(ctx);
        self.control_command_fill(ServiceCommand::Reload);
        self.reload_result = UnitResult::Success;

        match self.control_command_pop() {
            Some(cmd) => {
                if let Err(e) = self.spawn_control(ctx, cmd, self.config.timeout_start_usec) {
                    log::error!("Failed to run ExecReload of {}: {}", ctx.unit(), e);
                    self.reload_result = UnitResult::FailureResources;
                    self.enter_running(ctx, UnitResult::Success);
                    return;
                }
                self.set_state(ctx, ServiceState::Reload);
            }
            None => self.enter_running(ctx, UnitResult::Success),
        }
    }

    fn enter_restart(&mut self, ctx: &mut UnitCtx) {
        if ctx.stop_pending() {
            log::info!("{} has a stop job pending, not restarting", ctx.unit());
            return;
        }

        let unit = ctx.unit().to_string();
        ctx.queue_job(&unit, JobKind::Restart, JobMode::Replace);
        self.restarts += 1;
        log::info!("restart unit {}; restart times: {}", unit, self.restarts);
    }

    fn enter_signal(&mut self, ctx: &mut UnitCtx, state: ServiceState, res: UnitResult) {
        log::debug!(
            "{} sending signal of state: {}, service result: {}",
            ctx.unit(),
            state,
            res
        );
        if self.result == UnitResult::Success {
            self.result = res;
        }

        let sig = match state {
            ServiceState::StopSigterm | ServiceState::FinalSigterm => Signal::SIGTERM,
            _ => Signal::SIGKILL,
        };
        let mut wait = false;
        for pid in [self.main_pid, self.control_pid].iter().flatten() {
            if ctx.kill(*pid, sig) {
                wait = true;
            }
        }

        let stopping = matches!(state, ServiceState::StopSigterm | ServiceState::StopSigkill);
        if wait {
            if let Err(e) = ctx.arm_timer(self.config.timeout_stop_usec) {
                log::error!("{} in enter signal start timer error: {}", ctx.unit(), e);
                if stopping {
                    self.enter_stop_post(ctx, UnitResult::FailureResources);
                } else {
                    self.enter_dead(ctx, UnitResult::FailureResources, true);
                }
                return;
            }
            self.set_state(ctx, state);
        } else if stopping {
            self.enter_stop_post(ctx, UnitResult::Success);
        } else if state == ServiceState::FinalSigterm {
            self.enter_signal(ctx, ServiceState::FinalSigkill, UnitResult::Success);
        } else {
            self.enter_dead(ctx, UnitResult::Success, true);
        }
    }

    fn set_state(&mut self, ctx: &mut UnitCtx, state: ServiceState) {
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
            ServiceState::StartPre
                | ServiceState::Start
                | ServiceState::StartPost
                | ServiceState::Reload
                | ServiceState::Stop
                | ServiceState::StopSigterm
                | ServiceState::StopSigkill
                | ServiceState::StopPost
                | ServiceState::FinalSigterm
                | ServiceState::FinalSigkill
                | ServiceState::AutoRestart
        ) {
            ctx.disarm_timer();
        }

        if !matches!(
            state,
            ServiceState::Start
                | ServiceState::StartPost
                | ServiceState::Running
                | ServiceState::Reload
                | ServiceState::Stop
                | ServiceState::StopSigterm
                | ServiceState::StopSigkill
                | ServiceState::StopPost
                | ServiceState::FinalSigterm
                | ServiceState::FinalSigkill
        ) {
            self.unwatch_main(ctx);
            self.main_command.clear();
            self.current_main_command = None;
        }

        if !matches!(
            state,
            ServiceState::StartPre
                | ServiceState::Start
                | ServiceState::StartPost
                | ServiceState::Reload
                | ServiceState::Stop
                | ServiceState::StopSigterm
                | ServiceState::StopSigkill
                | ServiceState::StopPost
                | ServiceState::FinalSigterm
                | ServiceState::FinalSigkill
        ) {
            self.unwatch_control(ctx);
        }

        let os = original_state.to_unit_active_state();
        let ns = state.to_unit_active_state();
        let mut flags = UnitNotifyFlags::EMPTY;
        if self.will_auto_restart {
            flags |= UnitNotifyFlags::WILL_AUTO_RESTART;
        }
        if self.reload_result != UnitResult::Success {
            flags |= UnitNotifyFlags::RELOAD_FAILURE;
        }
        ctx.notify(os, ns, flags);
    }

    fn shall_restart(&self) -> bool {
        if self.forbid_restart {
            return false;
        }

        if let Some(exit) = self.exit_status {
            if self.config.restart_prevent.exit_status_enabled(exit) {
                return false;
            }
        }

        match self.config.restart {
            ServiceRestart::No => false,
            ServiceRestart::OnSuccess => self.result == UnitResult::Success,
            ServiceRestart::OnFailure => self.result != UnitResult::Success,
            ServiceRestart::OnAbnormal => !matches!(
                self.result,
                UnitResult::Success | UnitResult::FailureExitCode
            ),
            ServiceRestart::OnAbort => matches!(
                self.result,
                UnitResult::FailureSignal | UnitResult::FailureCoreDump
            ),
            ServiceRestart::Always => true,
        }
    }

    fn spawn_main(&mut self, ctx: &mut UnitCtx, cmd: ExecCommand, timeout: u64) -> Result<()> {
        ctx.arm_timer(timeout)?;
        let pid = ctx.spawn(&cmd, &self.config.exec_ctx)?;
        self.main_pid = Some(pid);
        self.current_main_command = Some(cmd);
        Ok(())
    }

    fn spawn_control(&mut self, ctx: &mut UnitCtx, cmd: ExecCommand, timeout: u64) -> Result<()> {
        ctx.arm_timer(timeout)?;
        let pid = ctx.spawn(&cmd, &self.config.exec_ctx)?;
        self.control_pid = Some(pid);
        self.current_control_command = Some(cmd);
        Ok(())
    }

    fn run_next_main(&mut self, ctx: &mut UnitCtx) {
        let cmd = match self.main_command_pop() {
            Some(cmd) => cmd,
            None => return,
        };
        if let Err(e) = self.spawn_main(ctx, cmd, self.config.timeout_start_usec) {
            log::error!("Failed to run next main command of {}: {}", ctx.unit(), e);
            self.enter_signal(ctx, ServiceState::StopSigterm, UnitResult::FailureResources);
        }
    }

    fn run_next_control(&mut self, ctx: &mut UnitCtx) {
        let cmd = match self.control_command_pop() {
            Some(cmd) => cmd,
            None => return,
        };
        let timeout = match self.control_cmd_type {
            Some(ServiceCommand::Stop) | Some(ServiceCommand::StopPost) => {
                self.config.timeout_stop_usec
            }
            _ => self.config.timeout_start_usec,
        };
        if let Err(e) = self.spawn_control(ctx, cmd, timeout) {
            log::error!("Failed to run next control command of {}: {}", ctx.unit(), e);
            match self.state {
                ServiceState::StartPre | ServiceState::StartPost => {
                    self.enter_signal(ctx, ServiceState::StopSigterm, UnitResult::FailureResources)
                }
                ServiceState::Reload => {
                    self.reload_result = UnitResult::FailureResources;
                    self.enter_running(ctx, UnitResult::Success);
                }
                ServiceState::Stop => {
                    self.enter_signal(ctx, ServiceState::StopSigterm, UnitResult::FailureResources)
                }
                _ => self.enter_signal(ctx, ServiceState::FinalSigterm, UnitResult::FailureResources),
            }
        }
    }

    fn unwatch_main(&mut self, ctx: &mut UnitCtx) {
        if let Some(pid) = self.main_pid.take() {
            ctx.unwatch_pid(pid);
        }
    }

    fn unwatch_control(&mut self, ctx: &mut UnitCtx) {
        if let Some(pid) = self.control_pid.take() {
            ctx.unwatch_pid(pid);
        }
        self.control_command.clear();
        self.current_control_command = None;
        self.control_cmd_type = None;
    }

    fn main_command_fill(&mut self) {
        self.main_command = self.config.start.iter().cloned().collect();
    }

    fn main_command_pop(&mut self) -> Option<ExecCommand> {
        self.main_command.pop_front()
    }

    fn control_command_fill(&mut self, cmd_type: ServiceCommand) {
        self.control_command = self.config.get_exec_cmds(cmd_type).iter().cloned().collect();
        self.control_cmd_type = Some(cmd_type);
    }

    fn control_command_pop(&mut self) -> Option<ExecCommand> {
        self.control_command.pop_front()
    }

    fn main_exit(&mut self, ctx: &mut UnitCtx, pid: Pid, wait_status: &WaitStatus) {
        let clean = self.config.service_type != ServiceType::Oneshot;
        let mut res = sigchld_result(wait_status, clean);
        let exit = ExitStatus::from_wait_status(wait_status);
        if let Some(e) = exit {
            if self.config.success_status.exit_status_enabled(e) {
                res = UnitResult::Success;
            }
        }

        self.main_pid = None;
        ctx.unwatch_pid(pid);
        self.exit_status = exit;

        if self
            .current_main_command
            .as_ref()
            .map_or(false, |c| c.ignore_failure())
        {
            res = UnitResult::Success;
        }

        if self.result == UnitResult::Success {
            self.result = res;
        }

        if !self.main_command.is_empty()
            && res == UnitResult::Success
            && self.config.service_type == ServiceType::Oneshot
        {
            self.run_next_main(ctx);
            return;
        }
        self.main_command.clear();

        match self.state {
            ServiceState::Start if self.config.service_type == ServiceType::Oneshot => {
                if res == UnitResult::Success {
                    self.enter_start_post(ctx);
                } else {
                    self.enter_signal(ctx, ServiceState::StopSigterm, res);
                }
            }
            ServiceState::Start | ServiceState::Running => self.enter_running(ctx, res),
            // wait for the control process
            ServiceState::StartPost | ServiceState::Reload | ServiceState::Stop => {}
            ServiceState::StopSigterm | ServiceState::StopSigkill => {
                if self.control_pid.is_none() {
                    self.enter_stop_post(ctx, res);
                }
            }
            ServiceState::StopPost => {
                if self.control_pid.is_none() {
                    self.enter_signal(ctx, ServiceState::FinalSigterm, res);
                }
            }
            ServiceState::FinalSigterm | ServiceState::FinalSigkill => {
                if self.control_pid.is_none() {
                    self.enter_dead(ctx, res, true);
                }
            }
            _ => log::warn!(
                "{} main pid exited in unexpected state {}",
                ctx.unit(),
                self.state
            ),
        }
    }

    fn control_exit(&mut self, ctx: &mut UnitCtx, pid: Pid, wait_status: &WaitStatus) {
        let mut res = sigchld_result(wait_status, false);
        self.control_pid = None;
        ctx.unwatch_pid(pid);

        if self
            .current_control_command
            .as_ref()
            .map_or(false, |c| c.ignore_failure())
        {
            res = UnitResult::Success;
        }

        if !self.control_command.is_empty() && res == UnitResult::Success {
            self.run_next_control(ctx);
            return;
        }

        self.control_command.clear();
        self.current_control_command = None;
        self.control_cmd_type = None;
        match self.state {
            ServiceState::StartPre => {
                if res == UnitResult::Success {
                    self.enter_start_main(ctx);
                } else {
                    self.enter_signal(ctx, ServiceState::StopSigterm, res);
                }
            }
            ServiceState::StartPost => {
                if res == UnitResult::Success {
                    self.enter_running(ctx, UnitResult::Success);
                } else {
                    self.enter_signal(ctx, ServiceState::StopSigterm, res);
                }
            }
            ServiceState::Reload => {
                self.reload_result = res;
                self.enter_running(ctx, UnitResult::Success);
            }
            ServiceState::Stop => self.enter_signal(ctx, ServiceState::StopSigterm, res),
            ServiceState::StopSigterm | ServiceState::StopSigkill => {
                if self.main_pid.is_none() {
                    self.enter_stop_post(ctx, res);
                }
            }
            ServiceState::StopPost => {
                if self.main_pid.is_none() {
                    self.enter_signal(ctx, ServiceState::FinalSigterm, res);
                }
            }
            ServiceState::FinalSigterm | ServiceState::FinalSigkill => {
                if self.main_pid.is_none() {
                    self.enter_dead(ctx, res, true);
                }
            }
            _ => log::warn!(
                "{} control process exited in unexpected state {}",
                ctx.unit(),
                self.state
            ),
        }
    }

    fn command_index(cmds: &[ExecCommand], left: usize) -> Option<usize> {
        cmds.len().checked_sub(left + 1)
    }
}

impl ServiceState {
    fn to_unit_active_state(self) -> UnitActiveState {
        match self {
            ServiceState::Dead => UnitActiveState::InActive,
            ServiceState::StartPre
            | ServiceState::Start
            | ServiceState::StartPost
            | ServiceState::AutoRestart => UnitActiveState::Activating,
            ServiceState::Running | ServiceState::Exited => UnitActiveState::Active,
            ServiceState::Reload => UnitActiveState::Reloading,
            ServiceState::Stop
            | ServiceState::StopSigterm
            | ServiceState::StopSigkill
            | ServiceState::StopPost
            | ServiceState::FinalSigterm
            | ServiceState::FinalSigkill => UnitActiveState::DeActivating,
            ServiceState::Failed => UnitActiveState::Failed,
        }
    }
}

impl SubUnit for ServiceUnit {
    fn active_state(&self) -> UnitActiveState {
        self.state.to_unit_active_state()
    }

    fn sub_state(&self) -> String {
        self.state.to_string()
    }

    fn result(&self) -> String {
        self.result.to_string()
    }

    fn can_reload(&self) -> bool {
        !self.config.reload.is_empty()
    }

    fn start_check(&self) -> Result<bool> {
        match self.state {
            ServiceState::Stop
            | ServiceState::StopSigterm
            | ServiceState::StopSigkill
            | ServiceState::StopPost
            | ServiceState::FinalSigterm
            | ServiceState::FinalSigkill => Err(Error::UnitActionEAgain),
            // the start jobs wait for the restart job to complete
            ServiceState::AutoRestart => Err(Error::UnitActionEAgain),
            ServiceState::StartPre | ServiceState::Start | ServiceState::StartPost => Ok(true),
            _ => Ok(false),
        }
    }

    fn enter_start(&mut self, ctx: &mut UnitCtx) -> Result<()> {
        if self.start_check()? {
            return Ok(());
        }
        self.start_action(ctx);
        Ok(())
    }

    fn enter_stop(&mut self, ctx: &mut UnitCtx) -> Result<()> {
        self.stop_action(ctx);
        Ok(())
    }

    fn reload(&mut self, ctx: &mut UnitCtx) -> Result<()> {
        self.enter_reload(ctx);
        Ok(())
    }

    fn process_exit(&mut self, ctx: &mut UnitCtx, pid: Pid, status: &WaitStatus) {
        log::debug!(
            "{} sigchld {:?}, main_pid: {:?}, control_pid: {:?}, state: {}",
            ctx.unit(),
            status,
            self.main_pid,
            self.control_pid,
            self.state
        );
        if self.main_pid == Some(pid) {
            self.main_exit(ctx, pid, status);
        } else if self.control_pid == Some(pid) {
            self.control_exit(ctx, pid, status);
        }
    }

    fn process_timeout(&mut self, ctx: &mut UnitCtx) {
        match self.state {
            ServiceState::StartPre | ServiceState::Start => {
                log::warn!("{} start operation timed out. Terminating.", ctx.unit());
                self.enter_signal(ctx, ServiceState::FinalSigterm, UnitResult::FailureTimeout);
            }
            ServiceState::StartPost => {
                log::warn!("{} start-post operation timed out. Stopping.", ctx.unit());
                self.enter_stop_cmd(ctx, UnitResult::FailureTimeout);
            }
            ServiceState::Reload => {
                log::warn!("{} reload operation timed out. Killing reload process.", ctx.unit());
                if let Some(pid) = self.control_pid {
                    ctx.kill(pid, Signal::SIGKILL);
                }
                self.reload_result = UnitResult::FailureTimeout;
                self.enter_running(ctx, UnitResult::Success);
            }
            ServiceState::Stop => {
                log::warn!("{} stopping timed out. Terminating.", ctx.unit());
                self.enter_signal(ctx, ServiceState::StopSigterm, UnitResult::FailureTimeout);
            }
            ServiceState::StopSigterm => {
                log::warn!("{} stop-sigterm timed out. Killing.", ctx.unit());
                self.enter_signal(ctx, ServiceState::StopSigkill, UnitResult::FailureTimeout);
            }
            ServiceState::StopSigkill => {
                log::warn!(
                    "{} still around after SIGKILL. Ignoring.",
                    ctx.unit()
                );
                self.enter_stop_post(ctx, UnitResult::FailureTimeout);
            }
            ServiceState::StopPost => {
                log::warn!("{} stop-post timed out. Terminating.", ctx.unit());
                self.enter_signal(ctx, ServiceState::FinalSigterm, UnitResult::FailureTimeout);
            }
            ServiceState::FinalSigterm => {
                log::warn!("{} stop-final-sigterm timed out. Killing.", ctx.unit());
                self.enter_signal(ctx, ServiceState::FinalSigkill, UnitResult::FailureTimeout);
            }
            ServiceState::FinalSigkill => {
                log::warn!(
                    "{} still around after final SIGKILL. Entering failed mode.",
                    ctx.unit()
                );
                self.enter_dead(ctx, UnitResult::FailureTimeout, true);
            }
            ServiceState::AutoRestart => self.enter_restart(ctx),
            _ => log::debug!("{} timer fired in state {}, ignoring", ctx.unit(), self.state),
        }
    }

    fn reset_failed(&mut self, ctx: &mut UnitCtx) {
        if self.state == ServiceState::Failed {
            self.set_state(ctx, ServiceState::Dead);
        }
        self.result = UnitResult::Success;
        self.reload_result = UnitResult::Success;
        self.restarts = 0;
    }

    fn start_limit_hit(&mut self, ctx: &mut UnitCtx) {
        self.result = UnitResult::FailureStartLimitHit;
        self.enter_dead(ctx, UnitResult::FailureStartLimitHit, false);
    }

    fn serialize(&self) -> Vec<(String, String)> {
        let main_command = match &self.current_main_command {
            Some(_) => Self::command_index(&self.config.start, self.main_command.len())
                .map_or_else(|| "-".to_string(), |i| i.to_string()),
            None => "-".to_string(),
        };
        let control_command = match (&self.current_control_command, self.control_cmd_type) {
            (Some(_), Some(cmd_type)) => Self::command_index(
                self.config.get_exec_cmds(cmd_type),
                self.control_command.len(),
            )
            .map_or_else(|| "-".to_string(), |i| format!("{}:{}", cmd_type, i)),
            _ => "-".to_string(),
        };

        vec![
            ("state".to_string(), self.state.to_string()),
            ("result".to_string(), self.result.to_string()),
            ("reload-result".to_string(), self.reload_result.to_string()),
            ("main-pid".to_string(), format_pid(self.main_pid)),
            ("control-pid".to_string(), format_pid(self.control_pid)),
            ("main-command".to_string(), main_command),
            ("control-command".to_string(), control_command),
            ("restarts".to_string(), self.restarts.to_string()),
            ("forbid-restart".to_string(), self.forbid_restart.to_string()),
            (
                "exit-status".to_string(),
                self.exit_status
                    .map_or_else(|| "-".to_string(), |e| e.to_string()),
            ),
        ]
    }

    fn deserialize_item(&mut self, key: &str, value: &str) -> Result<bool> {
        match key {
            "state" => self.state = parse_value(key, value)?,
            "result" => self.result = parse_value(key, value)?,
            "reload-result" => self.reload_result = parse_value(key, value)?,
            "main-pid" => self.main_pid = parse_pid(value)?,
            "control-pid" => self.control_pid = parse_pid(value)?,
            "main-command" => {
                self.current_main_command = None;
                self.main_command.clear();
                if value != "-" {
                    let index: usize = parse_value(key, value)?;
                    let cmds = &self.config.start;
                    self.current_main_command = cmds.get(index).cloned();
                    self.main_command = cmds.iter().skip(index + 1).cloned().collect();
                }
            }
            "control-command" => {
                self.current_control_command = None;
                self.control_command.clear();
                self.control_cmd_type = None;
                if let Some((cmd_type, index)) = value.split_once(':') {
                    let cmd_type: ServiceCommand = parse_value(key, cmd_type)?;
                    let index: usize = parse_value(key, index)?;
                    let cmds = self.config.get_exec_cmds(cmd_type);
                    self.current_control_command = cmds.get(index).cloned();
                    self.control_command = cmds.iter().skip(index + 1).cloned().collect();
                    self.control_cmd_type = Some(cmd_type);
                }
            }
            "restarts" => self.restarts = parse_value(key, value)?,
            "forbid-restart" => self.forbid_restart = parse_value(key, value)?,
            "exit-status" => {
                self.exit_status = match value {
                    "-" => None,
                    v => Some(parse_value(key, v)?),
                }
            }
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn coldplug(&mut self, ctx: &mut UnitCtx) {
        for pid in [self.main_pid, self.control_pid].iter().flatten() {
            ctx.watch_pid(*pid);
        }
    }

    fn pids(&self) -> Vec<Pid> {
        [self.main_pid, self.control_pid]
            .iter()
            .flatten()
            .copied()
            .collect()
    }
}
