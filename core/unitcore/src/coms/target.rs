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


//! Target units are synchronization points: they become active and inactive right away.
use super::SubUnit;
use crate::error::*;
use crate::unit::{UnitActiveState, UnitCtx, UnitNotifyFlags};
use nix::sys::wait::WaitStatus;
use nix::unistd::Pid;

#[derive(PartialEq, Eq, Debug, Copy, Clone)]
pub(super) enum TargetState {
    Dead,
    Active,
}

enum_names!(TargetState {
    Dead => "dead",
    Active => "active",
});

impl TargetState {
    fn to_unit_state(self) -> UnitActiveState {
        match self {
            TargetState::Dead => UnitActiveState::InActive,
            TargetState::Active => UnitActiveState::Active,
        }
    }
}

pub(crate) struct TargetUnit {
    state: TargetState,
}

impl TargetUnit {
    pub(crate) fn new() -> TargetUnit {
        TargetUnit {
            state: TargetState::Dead,
        }
    }

    fn set_state(&mut self, ctx: &mut UnitCtx, new_state: TargetState) {
        let old_state = self.state;
        self.state = new_state;
        if new_state != old_state {
            log::debug!(
                "{} original state[{}] ->new state[{}]",
                ctx.unit(),
                old_state,
                new_state,
            );
        }
        ctx.notify(
            old_state.to_unit_state(),
            new_state.to_unit_state(),
            UnitNotifyFlags::EMPTY,
        );
    }
}

impl SubUnit for TargetUnit {
    fn active_state(&self) -> UnitActiveState {
        self.state.to_unit_state()
    }

    fn sub_state(&self) -> String {
        self.state.to_string()
    }

    fn result(&self) -> String {
        "success".to_string()
    }

    fn enter_start(&mut self, ctx: &mut UnitCtx) -> Result<()> {
        if self.state == TargetState::Active {
            return Err(Error::UnitActionEAlready);
        }
        self.set_state(ctx, TargetState::Active);
        Ok(())
    }

    fn enter_stop(&mut self, ctx: &mut UnitCtx) -> Result<()> {
        if self.state == TargetState::Dead {
            return Err(Error::UnitActionEAlready);
        }
        self.set_state(ctx, TargetState::Dead);
        Ok(())
    }

    fn process_exit(&mut self, _ctx: &mut UnitCtx, _pid: Pid, _status: &WaitStatus) {}

    fn process_timeout(&mut self, _ctx: &mut UnitCtx) {}

    fn reset_failed(&mut self, _ctx: &mut UnitCtx) {}

    fn start_limit_hit(&mut self, ctx: &mut UnitCtx) {
        log::warn!("{} start request repeated too quickly", ctx.unit());
    }

    fn serialize(&self) -> Vec<(String, String)> {
        vec![("state".to_string(), self.state.to_string())]
    }

    fn deserialize_item(&mut self, key: &str, value: &str) -> Result<bool> {
        if key != "state" {
            return Ok(false);
        }
        self.state = super::parse_value(key, value)?;
        Ok(true)
    }
}
