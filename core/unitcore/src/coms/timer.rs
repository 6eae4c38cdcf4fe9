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


//! Timer units start the unit they trigger after a monotonic delay.
#![allow(non_snake_case)]
use super::{parse_value, SubUnit, UnitResult};
use crate::error::*;
use crate::job::{JobKind, JobMode};
use crate::unit::{UnitActiveState, UnitCtx, UnitNotifyFlags};
use event::time::{usec_add, USEC_PER_SEC};
use nix::sys::wait::WaitStatus;
use nix::unistd::Pid;
use serde::Deserialize;

/// The `[Unit.Timer]` table of a unit definition.
#[derive(Deserialize, Clone, Debug, Default)]
#[serde(default)]
pub struct SectionTimer {
    /// relative to when the timer was started
    pub OnActiveSec: Option<u64>,
    /// relative to when the triggered unit was last activated
    pub OnUnitActiveSec: Option<u64>,
    pub Unit: Option<String>,
}

#[derive(PartialEq, Eq, Debug, Copy, Clone)]
pub(super) enum TimerState {
    Dead,
    Waiting,
    Running,
    Elapsed,
    Failed,
}

enum_names!(TimerState {
    Dead => "dead",
    Waiting => "waiting",
    Running => "running",
    Elapsed => "elapsed",
    Failed => "failed",
});

impl TimerState {
    fn to_unit_active_state(self) -> UnitActiveState {
        match self {
            TimerState::Dead => UnitActiveState::InActive,
            TimerState::Waiting | TimerState::Running | TimerState::Elapsed => {
                UnitActiveState::Active
            }
            TimerState::Failed => UnitActiveState::Failed,
        }
    }
}

fn parse_usec(value: &str) -> Result<Option<u64>> {
    match value {
        "-" => Ok(None),
        v => parse_value("usec", v).map(Some),
    }
}

fn format_usec(value: Option<u64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

pub(crate) struct TimerUnit {
    on_active_usec: Option<u64>,
    on_unit_active_usec: Option<u64>,

    state: TimerState,
    result: UnitResult,
    activated_at: u64,
    active_fired: bool,
    unit_active_at: Option<u64>,
    last_trigger: Option<u64>,
}

impl TimerUnit {
    pub(crate) fn new() -> TimerUnit {
        TimerUnit {
            on_active_usec: None,
            on_unit_active_usec: None,
            state: TimerState::Dead,
            result: UnitResult::Success,
            activated_at: 0,
            active_fired: false,
            unit_active_at: None,
            last_trigger: None,
        }
    }

    pub(crate) fn load(&mut self, section: Option<&SectionTimer>) {
        let to_usec = |sec: u64| sec.saturating_mul(USEC_PER_SEC);
        self.on_active_usec = section.and_then(|s| s.OnActiveSec).map(to_usec);
        self.on_unit_active_usec = section.and_then(|s| s.OnUnitActiveSec).map(to_usec);
    }

    /// The next elapse, and whether it is the OnActiveSec one.
    ///
    /// When both fall on the same usec OnActiveSec wins: the elapse sets `active_fired` and
    /// the triggered unit starts once.
    fn next_elapse(&self) -> Option<(u64, bool)> {
        let on_active = match (self.on_active_usec, self.active_fired) {
            (Some(v), false) => Some((usec_add(self.activated_at, v), true)),
            _ => None,
        };
        let on_unit_active = match (self.on_unit_active_usec, self.unit_active_at) {
            (Some(v), Some(base)) => Some((usec_add(base, v), false)),
            _ => None,
        };

        match (on_active, on_unit_active) {
            (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
            (a, b) => a.or(b),
        }
    }

    fn enter_waiting(&mut self, ctx: &mut UnitCtx) {
        let (deadline, _) = match self.next_elapse() {
            Some(v) => v,
            None => {
                log::debug!("{} is elapsed", ctx.unit());
                self.set_state(ctx, TimerState::Elapsed);
                return;
            }
        };

        if let Err(e) = ctx.arm_timer_at(deadline) {
            log::warn!("{} failed to arm the timer: {}", ctx.unit(), e);
            self.enter_dead(ctx, UnitResult::FailureResources);
            return;
        }
        self.set_state(ctx, TimerState::Waiting);
    }

    fn enter_running(&mut self, ctx: &mut UnitCtx) {
        if ctx.stop_pending() {
            return;
        }

        if ctx.triggers().is_empty() {
            log::warn!("{} has no unit to trigger", ctx.unit());
            self.enter_dead(ctx, UnitResult::FailureResources);
            return;
        }

        if let Some((_, true)) = self.next_elapse() {
            self.active_fired = true;
        }
        for unit in ctx.triggers().to_vec() {
            ctx.queue_job(&unit, JobKind::Start, JobMode::Replace);
        }
        self.last_trigger = Some(ctx.now());
        self.set_state(ctx, TimerState::Running);
    }

    fn enter_dead(&mut self, ctx: &mut UnitCtx, res: UnitResult) {
        log::debug!("timer enter dead state, res {}", res);
        if self.result == UnitResult::Success {
            self.result = res;
        }
        let state = if self.result == UnitResult::Success {
            TimerState::Dead
        } else {
            TimerState::Failed
        };
        self.set_state(ctx, state);
    }

    fn set_state(&mut self, ctx: &mut UnitCtx, state: TimerState) {
        let original_state = self.state;
        self.state = state;
        log::debug!(
            "{} original state: {}, change to: {}",
            ctx.unit(),
            original_state,
            state
        );

        if state != TimerState::Waiting {
            ctx.disarm_timer();
        }
        ctx.notify(
            original_state.to_unit_active_state(),
            state.to_unit_active_state(),
            UnitNotifyFlags::EMPTY,
        );
    }
}

impl SubUnit for TimerUnit {
    fn active_state(&self) -> UnitActiveState {
        self.state.to_unit_active_state()
    }

    fn sub_state(&self) -> String {
        self.state.to_string()
    }

    fn result(&self) -> String {
        self.result.to_string()
    }

    fn enter_start(&mut self, ctx: &mut UnitCtx) -> Result<()> {
        if ctx.triggers().is_empty() {
            log::error!("{} has no unit to trigger, refusing to start", ctx.unit());
            return Err(Error::UnitActionENoExec);
        }

        self.result = UnitResult::Success;
        self.activated_at = ctx.now();
        self.active_fired = false;
        self.enter_waiting(ctx);
        Ok(())
    }

    fn enter_stop(&mut self, ctx: &mut UnitCtx) -> Result<()> {
        self.enter_dead(ctx, UnitResult::Success);
        Ok(())
    }

    fn process_exit(&mut self, _ctx: &mut UnitCtx, _pid: Pid, _status: &WaitStatus) {}

    fn process_timeout(&mut self, ctx: &mut UnitCtx) {
        if self.state == TimerState::Waiting {
            self.enter_running(ctx);
        }
    }

    fn trigger_notify(&mut self, ctx: &mut UnitCtx, other: &str, state: UnitActiveState) {
        if state == UnitActiveState::Active {
            self.unit_active_at = Some(ctx.now());
        }

        match self.state {
            TimerState::Waiting | TimerState::Elapsed => self.enter_waiting(ctx),
            TimerState::Running => {
                if state.is_inactive_or_failed() {
                    log::debug!("{} finished, {} waits again", other, ctx.unit());
                    self.enter_waiting(ctx);
                }
            }
            TimerState::Dead | TimerState::Failed => {}
        }
    }

    fn reset_failed(&mut self, ctx: &mut UnitCtx) {
        if self.state == TimerState::Failed {
            self.set_state(ctx, TimerState::Dead);
        }
        self.result = UnitResult::Success;
    }

    fn start_limit_hit(&mut self, ctx: &mut UnitCtx) {
        self.result = UnitResult::FailureStartLimitHit;
        self.enter_dead(ctx, UnitResult::FailureStartLimitHit);
    }

    fn serialize(&self) -> Vec<(String, String)> {
        vec![
            ("state".to_string(), self.state.to_string()),
            ("result".to_string(), self.result.to_string()),
            ("activated-at".to_string(), self.activated_at.to_string()),
            ("active-fired".to_string(), self.active_fired.to_string()),
            ("unit-active-at".to_string(), format_usec(self.unit_active_at)),
            ("last-trigger".to_string(), format_usec(self.last_trigger)),
        ]
    }

    fn deserialize_item(&mut self, key: &str, value: &str) -> Result<bool> {
        match key {
            "state" => self.state = parse_value(key, value)?,
            "result" => self.result = parse_value(key, value)?,
            "activated-at" => self.activated_at = parse_value(key, value)?,
            "active-fired" => self.active_fired = parse_value(key, value)?,
            "unit-active-at" => self.unit_active_at = parse_usec(value)?,
            "last-trigger" => self.last_trigger = parse_usec(value)?,
            _ => return Ok(false),
        }
        Ok(true)
    }
}
