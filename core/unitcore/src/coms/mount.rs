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

//! Mount units run mount(8) and umount(8) and follow the mount table.
#![allow(non_snake_case)]
use super::{format_pid, parse_pid, parse_value, sigchld_result, SubUnit, UnitEvent, UnitResult};
use crate::error::*;
use crate::exec::{ExecCommand, ExecContext};
use crate::unit::{timeout_usec, UnitActiveState, UnitCtx, UnitDefaults, UnitNotifyFlags};
use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;
use nix::unistd::Pid;
use serde::Deserialize;

const MOUNT_BIN: &str = "/usr/bin/mount";
const UMOUNT_BIN: &str = "/usr/bin/umount";

/// The `[Unit.Mount]` table of a unit definition.
#[derive(Deserialize, Clone, Debug, Default)]
#[serde(default)]
pub struct SectionMount {
    pub What: String,
    pub Where: Option<String>,
    pub Type: String,
    pub Options: String,
    pub TimeoutSec: Option<u64>,
}

#[derive(PartialEq, Eq, Debug, Copy, Clone)]
pub(super) enum MountState {
    Dead,
    Mounting,
    Mounted,
    Remounting,
    Unmounting,
    MountingSigterm,
    MountingSigkill,
    UnmountingSigterm,
    UnmountingSigkill,
    Failed,
}

enum_names!(MountState {
    Dead => "dead",
    Mounting => "mounting",
    Mounted => "mounted",
    Remounting => "remounting",
    Unmounting => "unmounting",
    MountingSigterm => "mounting-sigterm",
    MountingSigkill => "mounting-sigkill",
    UnmountingSigterm => "unmounting-sigterm",
    UnmountingSigkill => "unmounting-sigkill",
    Failed => "failed",
});

impl MountState {
    fn to_unit_active_state(self) -> UnitActiveState {
        match self {
            MountState::Dead => UnitActiveState::InActive,
            MountState::Mounting | MountState::MountingSigterm | MountState::MountingSigkill => {
                UnitActiveState::Activating
            }
            MountState::Mounted => UnitActiveState::Active,
            MountState::Remounting => UnitActiveState::Reloading,
            MountState::Unmounting
            | MountState::UnmountingSigterm
            | MountState::UnmountingSigkill => UnitActiveState::DeActivating,
            MountState::Failed => UnitActiveState::Failed,
        }
    }

    fn has_control(self) -> bool {
        !matches!(
            self,
            MountState::Dead | MountState::Mounted | MountState::Failed
        )
    }
}

/// "/mnt/data" for "mnt-data.mount", "/" for "-.mount". `\xNN` escapes are decoded.
pub(super) fn mount_point_from_name(name: &str) -> String {
    let prefix = name.strip_suffix(".mount").unwrap_or(name);
    if prefix == "-" {
        return "/".to_string();
    }

    let mut path = String::from("/");
    let mut chars = prefix.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '-' => path.push('/'),
            '\\' if chars.peek() == Some(&'x') => {
                chars.next();
                let hex: String = chars.by_ref().take(2).collect();
                match u8::from_str_radix(&hex, 16) {
                    Ok(b) => path.push(char::from(b)),
                    Err(_) => {
                        path.push_str("\\x");
                        path.push_str(&hex);
                    }
                }
            }
            c => path.push(c),
        }
    }
    path
}

pub(crate) struct MountUnit {
    mount_where: String,
    what: String,
    fstype: String,
    options: String,
    timeout_usec: u64,

    state: MountState,
    result: UnitResult,
    reload_result: UnitResult,
    control_pid: Option<Pid>,
    mounted: bool,
}

impl MountUnit {
    pub(crate) fn new(name: &str, defaults: &UnitDefaults) -> MountUnit {
        MountUnit {
            mount_where: mount_point_from_name(name),
            what: String::new(),
            fstype: String::new(),
            options: String::new(),
            timeout_usec: defaults.timeout_start_usec,
            state: MountState::Dead,
            result: UnitResult::Success,
            reload_result: UnitResult::Success,
            control_pid: None,
            mounted: false,
        }
    }

    pub(crate) fn load(&mut self, section: Option<&SectionMount>, defaults: &UnitDefaults) -> Result<()> {
        let section = match section {
            Some(s) => s,
            None => return Ok(()),
        };
        if let Some(w) = &section.Where {
            if !w.starts_with('/') {
                return Err(Error::ConfigureError {
                    msg: format!("mount point '{}' is not absolute", w),
                });
            }
            self.mount_where = w.clone();
        }
        self.what = section.What.clone();
        self.fstype = section.Type.clone();
        self.options = section.Options.clone();
        self.timeout_usec = timeout_usec(section.TimeoutSec, defaults.timeout_start_usec);
        Ok(())
    }

    fn mount_command(&self) -> ExecCommand {
        let mut argv = vec![
            MOUNT_BIN.to_string(),
            self.what.clone(),
            self.mount_where.clone(),
        ];
        if !self.fstype.is_empty() {
            argv.push("-t".to_string());
            argv.push(self.fstype.clone());
        }
        if !self.options.is_empty() {
            argv.push("-o".to_string());
            argv.push(self.options.clone());
        }
        ExecCommand::new(MOUNT_BIN.to_string(), argv)
    }

    fn remount_command(&self) -> ExecCommand {
        let options = if self.options.is_empty() {
            "remount".to_string()
        } else {
            format!("remount,{}", self.options)
        };
        ExecCommand::new(
            MOUNT_BIN.to_string(),
            vec![
                MOUNT_BIN.to_string(),
                self.what.clone(),
                self.mount_where.clone(),
                "-o".to_string(),
                options,
            ],
        )
    }

    fn umount_command(&self) -> ExecCommand {
        ExecCommand::new(
            UMOUNT_BIN.to_string(),
            vec![UMOUNT_BIN.to_string(), self.mount_where.clone()],
        )
    }

    fn spawn_control(&mut self, ctx: &mut UnitCtx, cmd: &ExecCommand) -> Result<()> {
        ctx.arm_timer(self.timeout_usec)?;
        let pid = ctx.spawn(cmd, &ExecContext::new())?;
        self.control_pid = Some(pid);
        Ok(())
    }

    fn enter_mounting(&mut self, ctx: &mut UnitCtx) {
        if self.what.is_empty() {
            log::error!("{} has nothing to mount", ctx.unit());
            self.enter_dead(ctx, UnitResult::FailureResources);
            return;
        }

        let cmd = self.mount_command();
        if let Err(e) = self.spawn_control(ctx, &cmd) {
            log::error!(
                "Failed to mount {} to {}: {}",
                self.what,
                self.mount_where,
                e
            );
            self.enter_dead(ctx, UnitResult::FailureResources);
            return;
        }
        self.set_state(ctx, MountState::Mounting);
    }

    fn enter_remounting(&mut self, ctx: &mut UnitCtx) {
        self.reload_result = UnitResult::Success;
        let cmd = self.remount_command();
        if let Err(e) = self.spawn_control(ctx, &cmd) {
            log::error!("Failed to remount {}: {}", self.mount_where, e);
            self.reload_result = UnitResult::FailureResources;
            self.enter_dead_or_mounted(ctx, UnitResult::Success);
            return;
        }
        self.set_state(ctx, MountState::Remounting);
    }

    fn enter_unmounting(&mut self, ctx: &mut UnitCtx) {
        let cmd = self.umount_command();
        if let Err(e) = self.spawn_control(ctx, &cmd) {
            log::error!("Failed to umount {}: {}", self.mount_where, e);
            self.enter_dead_or_mounted(ctx, UnitResult::FailureResources);
            return;
        }
        self.set_state(ctx, MountState::Unmounting);
    }

    fn enter_signal(&mut self, ctx: &mut UnitCtx, state: MountState, res: UnitResult) {
        if self.result == UnitResult::Success {
            self.result = res;
        }

        let sig = match state {
            MountState::MountingSigterm | MountState::UnmountingSigterm => Signal::SIGTERM,
            _ => Signal::SIGKILL,
        };
        let wait = self.control_pid.map_or(false, |pid| ctx.kill(pid, sig));
        if wait {
            if let Err(e) = ctx.arm_timer(self.timeout_usec) {
                log::warn!("{} failed to arm the kill timer: {}", ctx.unit(), e);
                self.enter_dead_or_mounted(ctx, UnitResult::FailureResources);
                return;
            }
            self.set_state(ctx, state);
        } else if state == MountState::MountingSigterm {
            self.enter_signal(ctx, MountState::MountingSigkill, UnitResult::Success);
        } else if state == MountState::UnmountingSigterm {
            self.enter_signal(ctx, MountState::UnmountingSigkill, UnitResult::Success);
        } else {
            self.enter_dead_or_mounted(ctx, UnitResult::Success);
        }
    }

    fn enter_dead_or_mounted(&mut self, ctx: &mut UnitCtx, res: UnitResult) {
        if self.mounted {
            self.enter_mounted(ctx, res);
        } else {
            self.enter_dead(ctx, res);
        }
    }

    fn enter_dead(&mut self, ctx: &mut UnitCtx, res: UnitResult) {
        if self.result == UnitResult::Success {
            self.result = res;
        }
        log::info!("Mountpoint {} enter dead", ctx.unit());
        if self.result == UnitResult::Success {
            self.set_state(ctx, MountState::Dead);
        } else {
            self.set_state(ctx, MountState::Failed);
        }
    }

    fn enter_mounted(&mut self, ctx: &mut UnitCtx, res: UnitResult) {
        if self.result == UnitResult::Success {
            self.result = res;
        }
        self.set_state(ctx, MountState::Mounted);
    }

    fn set_state(&mut self, ctx: &mut UnitCtx, state: MountState) {
        let original_state = self.state;
        self.state = state;
        log::debug!(
            "unit: {}, original state: {}, change to: {}",
            ctx.unit(),
            original_state,
            state
        );

        if !state.has_control() {
            ctx.disarm_timer();
            if let Some(pid) = self.control_pid.take() {
                ctx.unwatch_pid(pid);
            }
        }

        let mut flags = UnitNotifyFlags::EMPTY;
        if self.reload_result != UnitResult::Success {
            flags |= UnitNotifyFlags::RELOAD_FAILURE;
        }
        ctx.notify(
            original_state.to_unit_active_state(),
            state.to_unit_active_state(),
            flags,
        );
    }
}

impl SubUnit for MountUnit {
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
        true
    }

    fn start_check(&self) -> Result<bool> {
        match self.state {
            MountState::Unmounting
            | MountState::UnmountingSigterm
            | MountState::UnmountingSigkill
            | MountState::MountingSigterm
            | MountState::MountingSigkill => Err(Error::UnitActionEAgain),
            MountState::Mounting => Ok(true),
            _ => Ok(false),
        }
    }

    fn enter_start(&mut self, ctx: &mut UnitCtx) -> Result<()> {
        if self.start_check()? {
            return Ok(());
        }

        self.result = UnitResult::Success;
        self.reload_result = UnitResult::Success;
        self.enter_mounting(ctx);
        Ok(())
    }

    fn enter_stop(&mut self, ctx: &mut UnitCtx) -> Result<()> {
        match self.state {
            MountState::Unmounting
            | MountState::UnmountingSigterm
            | MountState::UnmountingSigkill => {}
            MountState::Mounting | MountState::Remounting => {
                self.enter_signal(ctx, MountState::UnmountingSigterm, UnitResult::Success)
            }
            MountState::MountingSigterm => self.set_state(ctx, MountState::UnmountingSigterm),
            MountState::MountingSigkill => self.set_state(ctx, MountState::UnmountingSigkill),
            MountState::Mounted => self.enter_unmounting(ctx),
            MountState::Dead | MountState::Failed => {}
        }
        Ok(())
    }

    fn reload(&mut self, ctx: &mut UnitCtx) -> Result<()> {
        if self.state != MountState::Mounted {
            return Err(Error::UnitActionEAgain);
        }
        self.enter_remounting(ctx);
        Ok(())
    }

    fn process_exit(&mut self, ctx: &mut UnitCtx, pid: Pid, status: &WaitStatus) {
        if self.control_pid != Some(pid) {
            return;
        }
        self.control_pid = None;
        ctx.unwatch_pid(pid);

        let f = sigchld_result(status, false);
        log::debug!("{} mount process exited, result: {}", ctx.unit(), f);
        match self.state {
            MountState::Mounting => {
                if f == UnitResult::Success {
                    self.mounted = true;
                    self.enter_mounted(ctx, UnitResult::Success);
                } else {
                    self.enter_dead(ctx, f);
                }
            }
            MountState::Remounting => {
                self.reload_result = f;
                self.enter_dead_or_mounted(ctx, UnitResult::Success);
            }
            MountState::Unmounting => {
                if f == UnitResult::Success {
                    self.mounted = false;
                }
                self.enter_dead_or_mounted(ctx, f);
            }
            MountState::MountingSigterm
            | MountState::MountingSigkill
            | MountState::UnmountingSigterm
            | MountState::UnmountingSigkill => self.enter_dead_or_mounted(ctx, f),
            _ => {}
        }
    }

    fn process_timeout(&mut self, ctx: &mut UnitCtx) {
        match self.state {
            MountState::Mounting => {
                log::warn!("{} mounting timed out. Terminating.", ctx.unit());
                self.enter_signal(ctx, MountState::MountingSigterm, UnitResult::FailureTimeout);
            }
            MountState::MountingSigterm => {
                log::warn!("{} mounting timed out. Killing.", ctx.unit());
                self.enter_signal(ctx, MountState::MountingSigkill, UnitResult::FailureTimeout);
            }
            MountState::Remounting => {
                log::warn!("{} remounting timed out. Killing remount process.", ctx.unit());
                if let Some(pid) = self.control_pid {
                    ctx.kill(pid, Signal::SIGKILL);
                }
                self.reload_result = UnitResult::FailureTimeout;
                self.enter_dead_or_mounted(ctx, UnitResult::Success);
            }
            MountState::Unmounting => {
                log::warn!("{} unmounting timed out. Terminating.", ctx.unit());
                self.enter_signal(ctx, MountState::UnmountingSigterm, UnitResult::FailureTimeout);
            }
            MountState::UnmountingSigterm => {
                log::warn!("{} unmounting timed out. Killing.", ctx.unit());
                self.enter_signal(ctx, MountState::UnmountingSigkill, UnitResult::FailureTimeout);
            }
            MountState::MountingSigkill | MountState::UnmountingSigkill => {
                log::warn!("{} mount process still around after SIGKILL. Ignoring.", ctx.unit());
                self.enter_dead_or_mounted(ctx, UnitResult::FailureTimeout);
            }
            _ => {}
        }
    }

    fn unit_event(&mut self, ctx: &mut UnitCtx, event: UnitEvent) -> Result<()> {
        let mounted = match event {
            UnitEvent::Mount(m) => m,
            _ => return Err(Error::UnitActionEOpNotSupp),
        };

        self.mounted = mounted;
        match (mounted, self.state) {
            (false, MountState::Mounted) => self.enter_dead(ctx, UnitResult::Success),
            (true, MountState::Dead) | (true, MountState::Failed) => {
                self.result = UnitResult::Success;
                self.reload_result = UnitResult::Success;
                self.enter_mounted(ctx, UnitResult::Success);
            }
            // an operation is in flight, its exit decides
            _ => {}
        }
        Ok(())
    }

    fn reset_failed(&mut self, ctx: &mut UnitCtx) {
        if self.state == MountState::Failed {
            self.set_state(ctx, MountState::Dead);
        }
        self.result = UnitResult::Success;
        self.reload_result = UnitResult::Success;
    }

    fn start_limit_hit(&mut self, ctx: &mut UnitCtx) {
        self.result = UnitResult::FailureStartLimitHit;
        self.enter_dead(ctx, UnitResult::FailureStartLimitHit);
    }

    fn serialize(&self) -> Vec<(String, String)> {
        vec![
            ("state".to_string(), self.state.to_string()),
            ("result".to_string(), self.result.to_string()),
            ("reload-result".to_string(), self.reload_result.to_string()),
            ("control-pid".to_string(), format_pid(self.control_pid)),
            ("mounted".to_string(), self.mounted.to_string()),
        ]
    }

    fn deserialize_item(&mut self, key: &str, value: &str) -> Result<bool> {
        match key {
            "state" => self.state = parse_value(key, value)?,
            "result" => self.result = parse_value(key, value)?,
            "reload-result" => self.reload_result = parse_value(key, value)?,
            "control-pid" => self.control_pid = parse_pid(value)?,
            "mounted" => self.mounted = parse_value(key, value)?,
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
