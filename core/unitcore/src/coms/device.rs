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


//! Device units mirror what the device notifications report. They are never started or
//! stopped by the manager itself: a start job simply waits for the device to show up.
use super::{parse_value, SubUnit, UnitEvent};
use crate::error::*;
use crate::unit::{UnitActiveState, UnitCtx, UnitNotifyFlags};
use nix::sys::wait::WaitStatus;
use nix::unistd::Pid;

/// What a device notification says about a device.
#[derive(PartialEq, Eq, Debug, Copy, Clone)]
pub enum DeviceFound {
    ///
    Absent,
    /// seen in the mount table, but not announced
    Tentative,
    ///
    Plugged,
}

enum_names!(DeviceFound {
    Absent => "absent",
    Tentative => "tentative",
    Plugged => "plugged",
});

#[derive(PartialEq, Eq, Debug, Copy, Clone)]
pub(super) enum DeviceState {
    Dead,
    Tentative,
    Plugged,
}

enum_names!(DeviceState {
    Dead => "dead",
    Tentative => "tentative",
    Plugged => "plugged",
});

impl DeviceState {
    fn to_unit_active_state(self) -> UnitActiveState {
        match self {
            DeviceState::Dead => UnitActiveState::InActive,
            DeviceState::Tentative => UnitActiveState::Activating,
            DeviceState::Plugged => UnitActiveState::Active,
        }
    }
}

pub(crate) struct DeviceUnit {
    state: DeviceState,
}

impl DeviceUnit {
    pub(crate) fn new() -> DeviceUnit {
        DeviceUnit {
            state: DeviceState::Dead,
        }
    }

    fn set_state(&mut self, ctx: &mut UnitCtx, state: DeviceState) {
        let original_state = self.state;
        self.state = state;
        log::debug!("{} device state {} -> {}", ctx.unit(), original_state, state);
        ctx.notify(
            original_state.to_unit_active_state(),
            state.to_unit_active_state(),
            UnitNotifyFlags::EMPTY,
        );
    }
}

impl SubUnit for DeviceUnit {
    fn active_state(&self) -> UnitActiveState {
        self.state.to_unit_active_state()
    }

    fn sub_state(&self) -> String {
        self.state.to_string()
    }

    fn result(&self) -> String {
        "success".to_string()
    }

    fn enter_start(&mut self, ctx: &mut UnitCtx) -> Result<()> {
        log::debug!("{} waiting for the device to be plugged", ctx.unit());
        Ok(())
    }

    fn enter_stop(&mut self, _ctx: &mut UnitCtx) -> Result<()> {
        Err(Error::UnitActionEOpNotSupp)
    }

    fn process_exit(&mut self, _ctx: &mut UnitCtx, _pid: Pid, _status: &WaitStatus) {}

    fn process_timeout(&mut self, _ctx: &mut UnitCtx) {}

    fn unit_event(&mut self, ctx: &mut UnitCtx, event: UnitEvent) -> Result<()> {
        let found = match event {
            UnitEvent::Device(found) => found,
            _ => return Err(Error::UnitActionEOpNotSupp),
        };
        let state = match found {
            DeviceFound::Absent => DeviceState::Dead,
            DeviceFound::Tentative => DeviceState::Tentative,
            DeviceFound::Plugged => DeviceState::Plugged,
        };
        if state != self.state {
            self.set_state(ctx, state);
        }
        Ok(())
    }

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
        self.state = parse_value(key, value)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::FakeExecutor;
    use crate::unit::{TimerKey, UnitEffect};
    use event::TimerQueue;
    use std::cell::RefCell;

    #[test]
    fn test_device_follows_notifications() {
        let exec = FakeExecutor::new();
        let timers = RefCell::new(TimerQueue::<TimerKey>::new());
        let mut ctx = UnitCtx::new("dev-sda.device", 0, &exec, &timers);
        let mut d = DeviceUnit::new();

        d.enter_start(&mut ctx).unwrap();
        assert_eq!(d.active_state(), UnitActiveState::InActive);

        d.unit_event(&mut ctx, UnitEvent::Device(DeviceFound::Tentative))
            .unwrap();
        d.unit_event(&mut ctx, UnitEvent::Device(DeviceFound::Plugged))
            .unwrap();
        d.unit_event(&mut ctx, UnitEvent::Device(DeviceFound::Plugged))
            .unwrap();
        assert_eq!(d.sub_state(), "plugged");
        assert!(matches!(
            d.enter_stop(&mut ctx),
            Err(Error::UnitActionEOpNotSupp)
        ));

        let effects = ctx.into_effects();
        assert_eq!(effects.len(), 2);
        assert_eq!(
            effects[1],
            UnitEffect::Notify {
                os: UnitActiveState::Activating,
                ns: UnitActiveState::Active,
                flags: UnitNotifyFlags::EMPTY
            }
        );
    }
}
