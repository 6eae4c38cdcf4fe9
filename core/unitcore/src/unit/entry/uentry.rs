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

use super::config::{UnitConf, UnitConfig, UnitDefaults};
use super::ratelimit::StartLimit;
use crate::coms::{SubUnit, UnitEvent, UnitVariant};
use crate::error::*;
use crate::exec::EmergencyAction;
use crate::job::JobKind;
use crate::unit::ctx::UnitCtx;
use crate::unit::deps::UnitType;
use crate::unit::state::{UnitActiveState, UnitLoadState, UnitNotifyFlags};
use event::time::sec_to_usec;
use nix::sys::wait::WaitStatus;
use nix::unistd::Pid;
use std::cell::{Cell, RefCell};

/// One node of the unit graph: the common part of every unit plus its variant.
pub struct Unit {
    id: String,
    unit_type: UnitType,
    load_state: Cell<UnitLoadState>,
    conf: RefCell<UnitConf>,
    start_limit: RefCell<StartLimit>,
    sub: RefCell<UnitVariant>,
}

impl Unit {
    pub(crate) fn new(name: &str, unit_type: UnitType, defaults: &UnitDefaults) -> Unit {
        let mut conf = UnitConf::new(defaults);
        conf.ignore_on_isolate = Self::type_ignores_isolate(unit_type);
        Unit {
            id: name.to_string(),
            unit_type,
            load_state: Cell::new(UnitLoadState::Stub),
            conf: RefCell::new(conf),
            start_limit: RefCell::new(StartLimit::new(
                defaults.start_limit_interval_usec,
                defaults.start_limit_burst,
            )),
            sub: RefCell::new(UnitVariant::new(name, unit_type, defaults)),
        }
    }

    // devices and scopes come and go from outside
    fn type_ignores_isolate(unit_type: UnitType) -> bool {
        matches!(unit_type, UnitType::UnitDevice | UnitType::UnitScope)
    }

    /// Apply a definition. The runtime state of the variant is kept.
    pub(crate) fn load(&self, config: &UnitConfig, defaults: &UnitDefaults) -> Result<()> {
        if config.Masked {
            log::info!("{} is masked", self.id);
            self.load_state.set(UnitLoadState::Masked);
            return Ok(());
        }

        let mut conf = UnitConf::from_config(config, defaults);
        conf.ignore_on_isolate |= Self::type_ignores_isolate(self.unit_type);
        *self.conf.borrow_mut() = conf;

        let interval = config
            .StartLimitIntervalSec
            .map_or(defaults.start_limit_interval_usec, sec_to_usec);
        let burst = config.StartLimitBurst.unwrap_or(defaults.start_limit_burst);
        self.start_limit
            .borrow_mut()
            .init_from_config(interval, burst);

        if let Err(e) = self.sub.borrow_mut().load(config, defaults) {
            log::error!("Failed to load {}: {}", self.id, e);
            self.load_state.set(UnitLoadState::Error);
            return Err(e);
        }

        self.load_state.set(UnitLoadState::Loaded);
        Ok(())
    }

    ///
    pub fn id(&self) -> &str {
        &self.id
    }

    ///
    pub fn unit_type(&self) -> UnitType {
        self.unit_type
    }

    ///
    pub fn load_state(&self) -> UnitLoadState {
        self.load_state.get()
    }

    pub(crate) fn set_load_state(&self, state: UnitLoadState) {
        self.load_state.set(state);
    }

    ///
    pub fn active_state(&self) -> UnitActiveState {
        self.sub.borrow().active_state()
    }

    /// the state name of the variant
    pub fn sub_state(&self) -> String {
        self.sub.borrow().sub_state()
    }

    ///
    pub fn result(&self) -> String {
        self.sub.borrow().result()
    }

    ///
    pub fn description(&self) -> String {
        self.conf.borrow().description.clone()
    }

    pub(crate) fn can_reload(&self) -> bool {
        self.sub.borrow().can_reload()
    }

    pub(crate) fn pids(&self) -> Vec<Pid> {
        self.sub.borrow().pids()
    }

    pub(crate) fn default_dependencies(&self) -> bool {
        self.conf.borrow().default_dependencies
    }

    pub(crate) fn ignore_on_isolate(&self) -> bool {
        self.conf.borrow().ignore_on_isolate
    }

    pub(crate) fn allow_isolate(&self) -> bool {
        self.conf.borrow().allow_isolate
    }

    pub(crate) fn refuse_manual_start(&self) -> bool {
        self.conf.borrow().refuse_manual_start
    }

    pub(crate) fn refuse_manual_stop(&self) -> bool {
        self.conf.borrow().refuse_manual_stop
    }

    pub(crate) fn job_timeout_usec(&self) -> u64 {
        self.conf.borrow().job_timeout_usec
    }

    pub(crate) fn failure_action(&self) -> EmergencyAction {
        self.conf.borrow().failure_action
    }

    pub(crate) fn success_action(&self) -> EmergencyAction {
        self.conf.borrow().success_action
    }

    pub(crate) fn job_timeout_action(&self) -> EmergencyAction {
        self.conf.borrow().job_timeout_action
    }

    /// Whether a job of `kind` makes sense for this unit at all.
    pub(crate) fn job_is_applicable(&self, kind: JobKind) -> bool {
        match kind {
            JobKind::Start | JobKind::Stop | JobKind::Verify | JobKind::Nop => true,
            JobKind::ReloadOrStart => true,
            JobKind::Reload | JobKind::TryReload => self.can_reload(),
            JobKind::Restart | JobKind::TryRestart => self.unit_type != UnitType::UnitDevice,
        }
    }

    /// start the unit
    pub(crate) fn start(&self, ctx: &mut UnitCtx) -> Result<()> {
        let active_state = self.active_state();
        if active_state.is_active_or_reloading() {
            log::debug!(
                "The unit {} is already active or reloading, skipping.",
                self.id
            );
            return Err(Error::UnitActionEAlready);
        }

        if active_state == UnitActiveState::Maintenance {
            log::error!("Failed to start {}: unit is in maintenance", self.id);
            return Err(Error::UnitActionEAgain);
        }

        if self.load_state() != UnitLoadState::Loaded {
            log::error!("Failed to start {}: unit hasn't been loaded.", self.id);
            return Err(Error::UnitActionEFailed);
        }

        // a busy or already starting variant must not be charged a start
        if self.sub.borrow().start_check()? {
            return Ok(());
        }

        if active_state != UnitActiveState::Activating
            && !self.start_limit.borrow_mut().ratelimit_below(ctx.now())
        {
            log::warn!(
                "{} start request repeated too quickly, refusing to start.",
                self.id
            );
            self.sub.borrow_mut().start_limit_hit(ctx);
            let action = self.conf.borrow().start_limit_action;
            ctx.emergency_action(action, &format!("{} hit the start limit", self.id));
            return Err(Error::UnitActionECanceled);
        }

        self.sub.borrow_mut().enter_start(ctx)
    }

    /// stop the unit
    pub(crate) fn stop(&self, ctx: &mut UnitCtx) -> Result<()> {
        if self.active_state().is_inactive_or_failed() {
            log::debug!(
                "The unit {} is already inactive or dead, skipping.",
                self.id
            );
            return Err(Error::UnitActionEAlready);
        }

        self.sub.borrow_mut().enter_stop(ctx)
    }

    /// reload the unit
    pub(crate) fn reload(&self, ctx: &mut UnitCtx) -> Result<()> {
        if !self.can_reload() {
            log::info!("Unit {} can not be reloaded", self.id);
            return Err(Error::UnitActionEOpNotSupp);
        }

        let active_state = self.active_state();
        if active_state == UnitActiveState::Reloading {
            log::info!("Unit {} is being reloading", self.id);
            return Err(Error::UnitActionEAgain);
        }

        if active_state != UnitActiveState::Active {
            log::info!("Unit {} is not active, no need to reload", self.id);
            return Err(Error::UnitActionENoExec);
        }

        log::info!("Reloading {}", self.id);
        match self.sub.borrow_mut().reload(ctx) {
            Ok(_) => Ok(()),
            Err(Error::UnitActionEOpNotSupp) => {
                ctx.notify(active_state, active_state, UnitNotifyFlags::EMPTY);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// The check of a verify-active job.
    pub(crate) fn verify(&self) -> Result<()> {
        match self.active_state() {
            UnitActiveState::Active | UnitActiveState::Reloading => {
                Err(Error::UnitActionEAlready)
            }
            UnitActiveState::Activating => Err(Error::UnitActionEAgain),
            _ => {
                log::info!("{} is not active, verification skipped.", self.id);
                Err(Error::UnitActionEBadR)
            }
        }
    }

    pub(crate) fn process_exit(&self, ctx: &mut UnitCtx, pid: Pid, status: &WaitStatus) {
        self.sub.borrow_mut().process_exit(ctx, pid, status)
    }

    pub(crate) fn process_timeout(&self, ctx: &mut UnitCtx) {
        self.sub.borrow_mut().process_timeout(ctx)
    }

    pub(crate) fn trigger_notify(&self, ctx: &mut UnitCtx, other: &str, state: UnitActiveState) {
        self.sub.borrow_mut().trigger_notify(ctx, other, state)
    }

    pub(crate) fn unit_event(&self, ctx: &mut UnitCtx, event: UnitEvent) -> Result<()> {
        self.sub.borrow_mut().unit_event(ctx, event)
    }

    pub(crate) fn reset_failed(&self, ctx: &mut UnitCtx) {
        self.start_limit.borrow_mut().reset_limit();
        self.sub.borrow_mut().reset_failed(ctx)
    }

    pub(crate) fn coldplug(&self, ctx: &mut UnitCtx) {
        self.sub.borrow_mut().coldplug(ctx)
    }

    /// The `key=value` pairs of the unit's state group, without the leading `unit=`.
    pub(crate) fn serialize(&self) -> Vec<(String, String)> {
        let mut items = vec![("load-state".to_string(), self.load_state().to_string())];
        items.append(&mut self.sub.borrow().serialize());
        let stamps: Vec<String> = self
            .start_limit
            .borrow()
            .stamps()
            .iter()
            .map(|s| s.to_string())
            .collect();
        items.push(("start-limit".to_string(), stamps.join(" ")));
        items
    }

    /// Restore one pair, false if nobody knows the key.
    pub(crate) fn deserialize_item(&self, key: &str, value: &str) -> Result<bool> {
        match key {
            "load-state" => {
                let state = value
                    .parse::<UnitLoadState>()
                    .map_err(|msg| Error::ConfigureError { msg })?;
                // a definition read at startup takes precedence
                if self.load_state() == UnitLoadState::Stub {
                    self.load_state.set(state);
                }
                Ok(true)
            }
            "start-limit" => {
                let mut stamps = Vec::new();
                for s in value.split_whitespace() {
                    stamps.push(crate::coms::parse_value::<u64>(key, s)?);
                }
                self.start_limit.borrow_mut().restore(&stamps);
                Ok(true)
            }
            _ => self.sub.borrow_mut().deserialize_item(key, value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::FakeExecutor;
    use crate::unit::ctx::{TimerKey, UnitEffect};
    use event::TimerQueue;

    fn target(name: &str, burst: Option<u32>) -> Unit {
        let defaults = UnitDefaults::default();
        let unit = Unit::new(name, UnitType::UnitTarget, &defaults);
        let mut config = UnitConfig::new(name);
        config.StartLimitBurst = burst;
        config.StartLimitAction = EmergencyAction::Reboot;
        unit.load(&config, &defaults).unwrap();
        unit
    }

    #[test]
    fn test_unit_load_states() {
        let defaults = UnitDefaults::default();
        let unit = Unit::new("a.service", UnitType::UnitService, &defaults);
        assert_eq!(unit.load_state(), UnitLoadState::Stub);

        /* a service without its table fails to load */
        assert!(unit.load(&UnitConfig::new("a.service"), &defaults).is_err());
        assert_eq!(unit.load_state(), UnitLoadState::Error);

        let mut config = UnitConfig::new("a.service");
        config.Masked = true;
        unit.load(&config, &defaults).unwrap();
        assert_eq!(unit.load_state(), UnitLoadState::Masked);

        let dev = Unit::new("dev-sda.device", UnitType::UnitDevice, &defaults);
        assert!(dev.ignore_on_isolate());
        assert!(!dev.job_is_applicable(JobKind::Restart));
    }

    #[test]
    fn test_start_stop_checks() {
        let exec = FakeExecutor::new();
        let timers = RefCell::new(TimerQueue::<TimerKey>::new());
        let defaults = UnitDefaults::default();

        let stub = Unit::new("b.target", UnitType::UnitTarget, &defaults);
        let mut ctx = UnitCtx::new("b.target", 0, &exec, &timers);
        assert!(matches!(stub.start(&mut ctx), Err(Error::UnitActionEFailed)));

        let unit = target("a.target", None);
        let mut ctx = UnitCtx::new("a.target", 0, &exec, &timers);
        assert!(matches!(unit.stop(&mut ctx), Err(Error::UnitActionEAlready)));
        assert!(matches!(unit.verify(), Err(Error::UnitActionEBadR)));
        unit.start(&mut ctx).unwrap();
        assert!(matches!(unit.start(&mut ctx), Err(Error::UnitActionEAlready)));
        assert!(matches!(unit.verify(), Err(Error::UnitActionEAlready)));
        assert!(matches!(unit.reload(&mut ctx), Err(Error::UnitActionEOpNotSupp)));
    }

    #[test]
    fn test_start_limit_refuses() {
        let exec = FakeExecutor::new();
        let timers = RefCell::new(TimerQueue::<TimerKey>::new());
        let unit = target("a.target", Some(2));

        for now in [1, 3] {
            let mut ctx = UnitCtx::new("a.target", now, &exec, &timers);
            unit.start(&mut ctx).unwrap();
            unit.stop(&mut ctx).unwrap();
        }

        let mut ctx = UnitCtx::new("a.target", 5, &exec, &timers);
        assert!(matches!(unit.start(&mut ctx), Err(Error::UnitActionECanceled)));
        assert_eq!(unit.active_state(), UnitActiveState::InActive);
        assert_eq!(
            ctx.into_effects(),
            vec![UnitEffect::Emergency {
                action: EmergencyAction::Reboot,
                reason: "a.target hit the start limit".to_string()
            }]
        );

        /* reset-failed clears the window */
        let mut ctx = UnitCtx::new("a.target", 6, &exec, &timers);
        unit.reset_failed(&mut ctx);
        unit.start(&mut ctx).unwrap();
    }

    #[test]
    fn test_serialize_group() {
        let exec = FakeExecutor::new();
        let timers = RefCell::new(TimerQueue::<TimerKey>::new());
        let unit = target("a.target", None);
        let mut ctx = UnitCtx::new("a.target", 42, &exec, &timers);
        unit.start(&mut ctx).unwrap();

        let items = unit.serialize();
        assert_eq!(
            items,
            vec![
                ("load-state".to_string(), "loaded".to_string()),
                ("state".to_string(), "active".to_string()),
                ("start-limit".to_string(), "42".to_string()),
            ]
        );

        let defaults = UnitDefaults::default();
        let other = Unit::new("a.target", UnitType::UnitTarget, &defaults);
        for (key, value) in items.iter() {
            assert!(other.deserialize_item(key, value).unwrap());
        }
        assert_eq!(other.serialize(), items);
        assert!(!other.deserialize_item("bogus", "1").unwrap());
    }
}
