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

//! The manager: owns the unit graph, the job engine and the timers, and turns events into
//! unit calls and jobs.
//!
//! Every unit call runs with a [`UnitCtx`]. The effects it recorded are applied right after
//! the call returns, in order, and may recurse into other units (trigger notification) or
//! into the job engine. The dispatch loop runs at the end of every public entry point.
pub use config::ManagerConfig;

mod config;
mod serialize;

use crate::coms::{DeviceFound, UnitEvent, UnitVariant};
use crate::error::*;
use crate::exec::{EmergencyAction, Executor};
use crate::job::{JobInfo, JobKind, JobManager, JobMode, JobRunner, JobSubscriber};
use crate::unit::{
    DepCursor, DepDirection, TimerKey, Unit, UnitActiveState, UnitConfig, UnitCtx, UnitDb,
    UnitDefaults, UnitDependencyMask, UnitEffect, UnitLoadState, UnitNotifyFlags,
    UnitRelationAtom, UnitRelations, UnitSet, UnitState,
};
use event::time::{now_monotonic, usec_add};
use event::{Events, TimerQueue};
use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;
use nix::unistd::Pid;
use snafu::ResultExt;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::path::Path;
use std::rc::Rc;

/// One input of the manager.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    /// a watched child was reaped
    ProcessExit(WaitStatus),
    /// a timer elapsed
    Timer(TimerKey),
    /// an external source became ready
    External(u64),
    /// a control signal arrived
    Signal(Signal),
}

/// Why [`Manager::run`] returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ManagerExit {
    /// shut down
    Exit,
    /// serialize and execute ourselves again
    Reexec,
}

/// The service manager.
pub struct Manager {
    defaults: UnitDefaults,
    exec: Rc<dyn Executor>,

    // owned objects
    db: Rc<UnitDb>,
    timers: Rc<RefCell<TimerQueue<TimerKey>>>,
    jm: JobManager,
    pins: RefCell<HashMap<u64, String>>,

    // status
    clock: Cell<Option<u64>>,
    exit: Cell<Option<ManagerExit>>,
}

impl Drop for Manager {
    fn drop(&mut self) {
        log::debug!("Manager drop, clear.");
        self.jm.clear();
        self.db.clear();
    }
}

impl Manager {
    /// A manager with no units, spawning through `exec`.
    pub fn new(config: &ManagerConfig, exec: Rc<dyn Executor>) -> Manager {
        let db = Rc::new(UnitDb::new());
        let timers = Rc::new(RefCell::new(TimerQueue::new()));
        let jm = JobManager::new(&db, &timers);
        Manager {
            defaults: config.unit_defaults(),
            exec,
            db,
            timers,
            jm,
            pins: RefCell::new(HashMap::new()),
            clock: Cell::new(None),
            exit: Cell::new(None),
        }
    }

    /// Drive time by hand from now on. Timers that are due fire right away.
    pub fn set_clock(&self, now: u64) {
        self.clock.set(Some(now));
        self.fire_timers();
        self.jm.dispatch(self);
    }

    /// Move the manual clock forward by `usec`.
    pub fn advance_clock(&self, usec: u64) {
        self.set_clock(usec_add(self.now(), usec));
    }

    /// the manager's monotonic time in usec
    pub fn now(&self) -> u64 {
        self.clock.get().unwrap_or_else(now_monotonic)
    }

    pub fn subscribe(&self, subscriber: Rc<dyn JobSubscriber>) {
        self.jm.register(subscriber);
    }

    /// Load every definition of `set`; failing units are logged and left in `error`.
    pub fn load_units(&self, set: &UnitSet) {
        for config in set.Unit.iter() {
            if let Err(e) = self.load_unit(config) {
                log::error!("Failed to load {}: {}", config.Name, e);
            }
        }
    }

    /// Apply the definition of one unit, creating it when needed. Dependencies naming
    /// unknown units create stubs, invalid ones are skipped with a warning.
    pub fn load_unit(&self, config: &UnitConfig) -> Result<()> {
        let name = config.Name.as_str();
        let u = self.db.get_or_create(name, &self.defaults)?;
        u.load(config, &self.defaults)?;
        if u.load_state() == UnitLoadState::Masked {
            return Ok(());
        }

        if !u.default_dependencies() {
            self.db.dep_remove_implied(name);
        }

        for (relation, other) in config.dependencies() {
            if let Err(e) = self.dep_insert(name, relation, other, UnitDependencyMask::FILE) {
                log::warn!("Ignoring {} {} {}: {}", name, relation, other, e);
            }
        }

        if let Some(other) = UnitVariant::default_trigger(name, config) {
            if self.db.dep_gets(name, UnitRelations::UnitTriggers).is_empty() {
                let mask = UnitDependencyMask::IMPLICIT;
                if let Err(e) = self.dep_insert(name, UnitRelations::UnitTriggers, &other, mask) {
                    log::warn!("{} can not trigger {}: {}", name, other, e);
                }
            }
        }

        log::debug!("Loaded {}", name);
        Ok(())
    }

    fn dep_insert(
        &self,
        source: &str,
        relation: UnitRelations,
        dest: &str,
        mask: UnitDependencyMask,
    ) -> Result<()> {
        self.db.get_or_create(source, &self.defaults)?;
        self.db.get_or_create(dest, &self.defaults)?;
        self.db.dep_insert(source, relation, dest, mask)
    }

    /// Add `from relation to` at runtime. It is not written back into any definition.
    pub fn add_dependency(&self, from: &str, relation: UnitRelations, to: &str) -> Result<()> {
        self.dep_insert(from, relation, to, UnitDependencyMask::FILE)
    }

    pub fn remove_dependency(&self, from: &str, relation: UnitRelations, to: &str) {
        self.db.dep_remove(from, relation, to);
    }

    /// Walk the units related to `name` by `relation`.
    pub fn neighbors(
        &self,
        name: &str,
        relation: UnitRelations,
        direction: DepDirection,
    ) -> DepCursor<'_> {
        self.db.neighbors(name, relation, direction)
    }

    /// Queue `kind` on `unit`, as asked for by a client.
    pub fn submit_job(
        &self,
        unit: &str,
        kind: JobKind,
        mode: JobMode,
    ) -> Result<(u128, Vec<JobInfo>)> {
        log::info!("Requested {} of {} ({})", kind, unit, mode);
        let ret = self.jm.exec(unit, kind, mode, true, self.now())?;
        self.jm.dispatch(self);
        Ok(ret)
    }

    pub fn get_unit_state(&self, name: &str) -> Result<UnitState> {
        let u = self.unit_get(name)?;
        Ok(UnitState {
            load_state: u.load_state(),
            active_state: u.active_state(),
            sub_state: u.sub_state(),
            result: u.result(),
            job_id: self.jm.get_job_id(name),
        })
    }

    /// Turn a failed unit back into an inactive one and forget its start history.
    pub fn reset_failed(&self, name: &str) -> Result<()> {
        let u = self.unit_get(name)?;
        self.with_ctx(&u, |ctx| u.reset_failed(ctx));
        self.jm.dispatch(self);
        Ok(())
    }

    /// Cancel a waiting job; its hard dependents fail with it.
    pub fn cancel_job(&self, id: u128) -> Result<()> {
        self.jm.cancel(id)?;
        self.jm.dispatch(self);
        Ok(())
    }

    pub fn list_jobs(&self) -> Vec<JobInfo> {
        self.jm.list()
    }

    /// The device `name` was plugged or removed.
    pub fn device_changed(&self, name: &str, plugged: bool) -> Result<()> {
        let found = match plugged {
            true => DeviceFound::Plugged,
            false => DeviceFound::Absent,
        };
        self.unit_event(name, UnitEvent::Device(found), true)
    }

    /// The mount table shows `name` as mounted or not.
    pub fn mount_changed(&self, name: &str, mounted: bool) -> Result<()> {
        self.unit_event(name, UnitEvent::Mount(mounted), true)
    }

    /// Hand `pids` to the scope `name`. The scope starts through a regular start job.
    pub fn attach_scope_pids(&self, name: &str, pids: &[Pid]) -> Result<()> {
        self.unit_event(name, UnitEvent::AttachPids(pids.to_vec()), true)
    }

    pub fn abandon_scope(&self, name: &str) -> Result<()> {
        self.unit_event(name, UnitEvent::Abandon, false)
    }

    /// Route the external source `token` to `unit`. The unit is kept from collection.
    pub fn watch_external(&self, token: u64, unit: &str) -> Result<()> {
        self.unit_get(unit)?;
        self.pins.borrow_mut().insert(token, unit.to_string());
        Ok(())
    }

    /// Drop the placeholder units nothing refers to.
    pub fn gc(&self) -> Vec<String> {
        let pins: Vec<String> = self.pins.borrow().values().cloned().collect();
        let pinned = |id: &str| self.jm.has_job(id) || pins.iter().any(|p| p == id);
        let removed = self.db.gc_unreferenced(&pinned);
        for name in removed.iter() {
            self.timers
                .borrow_mut()
                .disarm(&TimerKey::Unit(name.to_string()));
        }
        removed
    }

    /// Cancel every job and leave the run loop.
    pub fn shutdown(&self) {
        log::info!("Shutting down, canceling {} jobs", self.jm.len());
        self.jm.cancel_all();
        self.exit.set(Some(ManagerExit::Exit));
    }

    /// why the run loop is about to return, if it is
    pub fn exit_state(&self) -> Option<ManagerExit> {
        self.exit.get()
    }

    /// The state file contents.
    pub fn serialize(&self) -> String {
        serialize::state_serialize(&self.db, &self.jm)
    }

    pub fn serialize_to(&self, path: &Path) -> Result<()> {
        serialize::state_write(path, &self.serialize())
    }

    /// Restore units and jobs from a state file, then coldplug them.
    pub fn deserialize(&self, state: &str) -> Result<()> {
        let units = serialize::state_deserialize(&self.db, &self.jm, &self.defaults, state)?;
        for name in units.iter() {
            if let Some(u) = self.db.units_get(name) {
                self.with_ctx(&u, |ctx| u.coldplug(ctx));
            }
        }
        self.jm.coldplug();
        log::info!("Restored {} units, {} jobs", units.len(), self.jm.len());
        Ok(())
    }

    pub fn deserialize_from(&self, path: &Path) -> Result<()> {
        let state = serialize::state_read(path)?;
        self.deserialize(&state)
    }

    /// Serve events until asked to exit or re-execute.
    pub fn run(&self, events: &Events) -> Result<ManagerExit> {
        self.jm.dispatch(self);
        loop {
            if let Some(exit) = self.exit.get() {
                return Ok(exit);
            }

            let deadline = self.timers.borrow_mut().next_deadline();
            let wakeup = match events.wait(deadline) {
                Ok(w) => w,
                Err(e) if e.is_interrupted() => continue,
                Err(e) => return Err(e).context(EventSnafu),
            };

            for status in wakeup.exited {
                self.handle_event(Event::ProcessExit(status));
            }
            self.fire_timers();
            for token in wakeup.external {
                events.dispatch(token);
                self.handle_event(Event::External(token));
            }
            for signal in wakeup.signals {
                self.handle_event(Event::Signal(signal));
            }
            self.jm.dispatch(self);
        }
    }

    /// Handle one event, then run the dispatch loop.
    pub fn handle_event(&self, event: Event) {
        match event {
            Event::ProcessExit(status) => self.dispatch_sigchld(status),
            Event::Timer(key) => self.dispatch_timer(key),
            Event::External(token) => self.dispatch_external(token),
            Event::Signal(signal) => self.dispatch_signal(signal),
        }
        self.jm.dispatch(self);
    }

    fn fire_timers(&self) {
        let now = self.now();
        let generation = self.timers.borrow().generation();
        // one key at a time: a handler may disarm or re-arm the keys behind it
        loop {
            let key = self.timers.borrow_mut().pop_next_expired(now, generation);
            match key {
                Some(key) => self.handle_event(Event::Timer(key)),
                None => break,
            }
        }
    }

    fn dispatch_sigchld(&self, status: WaitStatus) {
        let pid = match status.pid() {
            Some(pid) => pid,
            None => return,
        };
        let u = match self.db.get_unit_by_pid(pid) {
            Some(u) => u,
            None => {
                log::debug!("Reaped {}, not watched by any unit", pid);
                return;
            }
        };

        log::debug!("Process {} of {} exited: {:?}", pid, u.id(), status);
        self.db.child_unwatch_pid(u.id(), pid);
        self.with_ctx(&u, |ctx| u.process_exit(ctx, pid, &status));
    }

    fn dispatch_timer(&self, key: TimerKey) {
        match key {
            TimerKey::Unit(name) => {
                if let Some(u) = self.db.units_get(&name) {
                    self.with_ctx(&u, |ctx| u.process_timeout(ctx));
                }
            }
            TimerKey::Job(id) => {
                let unit = match self.jm.timeout(id) {
                    Some(unit) => unit,
                    None => return,
                };
                if let Some(u) = self.db.units_get(&unit) {
                    let reason = format!("job {} of {} timed out", id, unit);
                    self.emergency_action(u.job_timeout_action(), &reason);
                }
            }
        }
    }

    fn dispatch_external(&self, token: u64) {
        let unit = match self.pins.borrow().get(&token) {
            Some(unit) => unit.clone(),
            None => {
                log::debug!("No unit watches source {}", token);
                return;
            }
        };
        if let Err(e) = self.unit_event(&unit, UnitEvent::Ready, false) {
            log::warn!("{} failed to handle source {}: {}", unit, token, e);
        }
    }

    fn dispatch_signal(&self, signal: Signal) {
        match signal {
            Signal::SIGHUP => {
                log::info!("Received {}, re-executing", signal);
                self.exit.set(Some(ManagerExit::Reexec));
            }
            Signal::SIGTERM | Signal::SIGINT => {
                log::info!("Received {}, exiting", signal);
                self.shutdown();
            }
            _ => log::debug!("Ignoring {}", signal),
        }
    }

    fn unit_get(&self, name: &str) -> Result<Rc<Unit>> {
        self.db.units_get(name).ok_or_else(|| Error::NoSuchUnit {
            name: name.to_string(),
        })
    }

    /// Deliver `event` to `name`; with `create`, a unit seen for the first time is loaded
    /// with an empty definition.
    fn unit_event(&self, name: &str, event: UnitEvent, create: bool) -> Result<()> {
        let u = match create {
            true => self.db.get_or_create(name, &self.defaults)?,
            false => self.unit_get(name)?,
        };
        if create && u.load_state() == UnitLoadState::Stub {
            u.load(&UnitConfig::new(name), &self.defaults)?;
        }

        let ret = self.with_ctx(&u, |ctx| u.unit_event(ctx, event));
        self.jm.dispatch(self);
        ret
    }

    /// Run `f` against `u` and apply what it asked for.
    fn with_ctx<R>(&self, u: &Rc<Unit>, f: impl FnOnce(&mut UnitCtx) -> R) -> R {
        let triggers = self.db.dep_gets_atom(u.id(), UnitRelationAtom::TRIGGERS);
        let mut ctx = UnitCtx::new(u.id(), self.now(), self.exec.as_ref(), &self.timers)
            .with_stop_pending(self.jm.has_stop_job(u.id()))
            .with_triggers(triggers);
        let ret = f(&mut ctx);
        for effect in ctx.into_effects() {
            self.apply_effect(u.id(), effect);
        }
        ret
    }

    fn apply_effect(&self, unit: &str, effect: UnitEffect) {
        match effect {
            UnitEffect::WatchPid(pid) => self.db.child_add_watch_pid(unit, pid),
            UnitEffect::UnwatchPid(pid) => self.db.child_unwatch_pid(unit, pid),
            UnitEffect::Notify { os, ns, flags } => self.unit_notify(unit, os, ns, flags),
            UnitEffect::QueueJob { unit: other, kind, mode } => {
                self.queue_job(&other, kind, mode, unit)
            }
            UnitEffect::Emergency { action, reason } => self.emergency_action(action, &reason),
        }
    }

    fn queue_job(&self, unit: &str, kind: JobKind, mode: JobMode, by: &str) {
        if let Err(e) = self.jm.exec(unit, kind, mode, false, self.now()) {
            log::warn!("Failed to queue {} of {} for {}: {}", kind, unit, by, e);
        }
    }

    fn emergency_action(&self, action: EmergencyAction, reason: &str) {
        if action == EmergencyAction::None {
            return;
        }
        log::warn!("{}, running {}", reason, action);
        if matches!(action, EmergencyAction::Exit | EmergencyAction::ExitForce) {
            self.exit.set(Some(ManagerExit::Exit));
        }
        self.exec.emergency_action(action, reason);
    }

    /// A unit changed its active state.
    fn unit_notify(
        &self,
        unit: &str,
        os: UnitActiveState,
        ns: UnitActiveState,
        flags: UnitNotifyFlags,
    ) {
        log::debug!("{} changed {} -> {}", unit, os, ns);
        let u = match self.db.units_get(unit) {
            Some(u) => u,
            None => return,
        };

        // first the job on the unit, then the units reacting to a change it did not cause
        if !self.jm.try_finish(unit, ns, flags) {
            for (other, kind, mode) in self.jm.notify_event(unit, os, ns) {
                self.queue_job(&other, kind, mode, unit);
            }
        }

        if !flags.contains(UnitNotifyFlags::WILL_AUTO_RESTART) {
            if ns == UnitActiveState::Failed && os != UnitActiveState::Failed {
                for (other, kind, mode) in self.jm.notify_result(unit, UnitRelationAtom::ON_FAILURE) {
                    self.queue_job(&other, kind, mode, unit);
                }
                self.emergency_action(u.failure_action(), &format!("{} failed", unit));
            }

            if ns == UnitActiveState::InActive && os.is_active_or_reloading() {
                for (other, kind, mode) in self.jm.notify_result(unit, UnitRelationAtom::ON_SUCCESS) {
                    self.queue_job(&other, kind, mode, unit);
                }
                self.emergency_action(u.success_action(), &format!("{} succeeded", unit));
            }
        }

        if os != ns {
            for other in self.db.dep_gets_atom(unit, UnitRelationAtom::TRIGGERED_BY) {
                if let Some(ou) = self.db.units_get(&other) {
                    self.with_ctx(&ou, |ctx| ou.trigger_notify(ctx, unit, ns));
                }
            }
        }
    }
}

impl JobRunner for Manager {
    fn job_action(&self, unit: &str, run_kind: JobKind) -> Result<()> {
        let u = self.unit_get(unit)?;
        match run_kind {
            JobKind::Start => self.with_ctx(&u, |ctx| u.start(ctx)),
            JobKind::Stop => self.with_ctx(&u, |ctx| u.stop(ctx)),
            JobKind::Reload => self.with_ctx(&u, |ctx| u.reload(ctx)),
            JobKind::Verify => u.verify(),
            JobKind::Nop => Err(Error::UnitActionEAlready),
            _ => Err(Error::UnitActionEOpNotSupp),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobResult, JobStage};
    use crate::test_utils::TestManager;
    use event::time::USEC_PER_SEC;
    use std::collections::BTreeSet;

    fn active(t: &TestManager, unit: &str) -> UnitActiveState {
        t.mgr.get_unit_state(unit).unwrap().active_state
    }

    fn kinds(infos: &[JobInfo]) -> Vec<(String, JobKind)> {
        let mut v: Vec<(String, JobKind)> =
            infos.iter().map(|i| (i.unit.clone(), i.kind)).collect();
        v.sort();
        v
    }

    #[test]
    fn test_requires_after_short_circuit() {
        let t = TestManager::new(
            r#"
            [[Unit]]
            Name = "a.service"
            Requires = ["b.service"]
            After = ["b.service"]
            Service = { ExecStart = ["/bin/a"] }

            [[Unit]]
            Name = "b.service"
            Service = { Type = "oneshot", ExecStart = ["/bin/b"] }
            "#,
        );

        let (a, infos) = t
            .mgr
            .submit_job("a.service", JobKind::Start, JobMode::Replace)
            .unwrap();
        assert_eq!(
            kinds(&infos),
            vec![
                ("a.service".to_string(), JobKind::Start),
                ("b.service".to_string(), JobKind::Start)
            ]
        );
        assert_eq!(t.exec.spawned_by("b.service").len(), 1);
        assert!(t.exec.spawned_by("a.service").is_empty());

        t.exit(t.last_pid("b.service"), 1);
        assert_eq!(active(&t, "b.service"), UnitActiveState::Failed);
        assert_eq!(t.sub.result_of(a), Some(JobResult::Dependency));
        assert!(t.exec.spawned_by("a.service").is_empty());
        assert!(t.mgr.list_jobs().is_empty());
    }

    #[test]
    fn test_order_cycle_broken_at_lowest_name() {
        let t = TestManager::new(
            r#"
            [[Unit]]
            Name = "a.target"
            DefaultDependencies = false
            Wants = ["b.target", "c.target"]
            After = ["b.target"]

            [[Unit]]
            Name = "b.target"
            DefaultDependencies = false
            After = ["c.target"]

            [[Unit]]
            Name = "c.target"
            DefaultDependencies = false
            After = ["a.target"]
            "#,
        );

        let (a, infos) = t
            .mgr
            .submit_job("a.target", JobKind::Start, JobMode::Replace)
            .unwrap();
        assert_eq!(infos.len(), 3);
        assert_eq!(t.sub.result_of(a), Some(JobResult::Done));
        assert_eq!(t.sub.units(), vec!["a.target", "c.target", "b.target"]);
        for unit in ["a.target", "b.target", "c.target"] {
            assert_eq!(active(&t, unit), UnitActiveState::Active);
        }
    }

    #[test]
    fn test_isolate() {
        let t = TestManager::new(
            r#"
            [[Unit]]
            Name = "a.target"
            AllowIsolate = true

            [[Unit]]
            Name = "b.target"

            [[Unit]]
            Name = "c.target"
            "#,
        );
        for unit in ["a.target", "b.target", "c.target"] {
            t.mgr
                .submit_job(unit, JobKind::Start, JobMode::Replace)
                .unwrap();
        }

        let (_, infos) = t
            .mgr
            .submit_job("a.target", JobKind::Start, JobMode::Isolate)
            .unwrap();
        let mut stops: Vec<String> = infos
            .iter()
            .filter(|i| i.kind == JobKind::Stop)
            .map(|i| i.unit.clone())
            .collect();
        stops.sort();
        assert_eq!(stops, vec!["b.target", "c.target"]);
        assert_eq!(active(&t, "a.target"), UnitActiveState::Active);
        assert_eq!(active(&t, "b.target"), UnitActiveState::InActive);
        assert_eq!(active(&t, "c.target"), UnitActiveState::InActive);

        assert!(matches!(
            t.mgr.submit_job("b.target", JobKind::Start, JobMode::Isolate),
            Err(Error::NoIsolation { .. })
        ));
    }

    #[test]
    fn test_start_limit() {
        let t = TestManager::new(
            r#"
            [[Unit]]
            Name = "a.service"
            StartLimitIntervalSec = 10
            StartLimitBurst = 3
            Service = { Type = "oneshot", ExecStart = ["/bin/a"] }
            "#,
        );

        for _ in 0..3 {
            let (id, _) = t
                .mgr
                .submit_job("a.service", JobKind::Start, JobMode::Replace)
                .unwrap();
            t.exit(t.last_pid("a.service"), 0);
            assert_eq!(t.sub.result_of(id), Some(JobResult::Done));
        }

        let (id, _) = t
            .mgr
            .submit_job("a.service", JobKind::Start, JobMode::Replace)
            .unwrap();
        assert_eq!(t.sub.result_of(id), Some(JobResult::Failed));
        let state = t.mgr.get_unit_state("a.service").unwrap();
        assert_eq!(state.active_state, UnitActiveState::Failed);
        assert_eq!(state.result, "start-limit-hit");
        assert_eq!(t.exec.spawned_by("a.service").len(), 3);

        /* resetting forgets the history */
        t.mgr.reset_failed("a.service").unwrap();
        assert_eq!(active(&t, "a.service"), UnitActiveState::InActive);
        t.mgr
            .submit_job("a.service", JobKind::Start, JobMode::Replace)
            .unwrap();
        assert_eq!(t.exec.spawned_by("a.service").len(), 4);
    }

    #[test]
    fn test_start_while_stopping_is_not_charged() {
        let t = TestManager::new(
            r#"
            [[Unit]]
            Name = "a.service"
            StartLimitIntervalSec = 10
            StartLimitBurst = 3
            Service = { ExecStart = ["/bin/a"], ExecStop = ["/bin/a-stop"] }
            "#,
        );
        t.mgr
            .submit_job("a.service", JobKind::Start, JobMode::Replace)
            .unwrap();
        let main = t.last_pid("a.service");
        t.mgr
            .submit_job("a.service", JobKind::Stop, JobMode::Replace)
            .unwrap();
        assert_eq!(t.sub_state("a.service"), "stop");
        let stop = t.last_pid("a.service");

        let (id, _) = t
            .mgr
            .submit_job("a.service", JobKind::Start, JobMode::Replace)
            .unwrap();
        /* every wakeup retries the waiting start job */
        for token in 100..106 {
            t.mgr.handle_event(Event::External(token));
        }
        let state = t.mgr.get_unit_state("a.service").unwrap();
        assert_eq!(state.active_state, UnitActiveState::DeActivating);
        assert_ne!(state.result, "start-limit-hit");
        assert_eq!(t.sub.result_of(id), None);
        assert!(t.exec.emergencies().is_empty());

        t.exit(stop, 0);
        t.exit(main, 0);
        assert_eq!(t.sub_state("a.service"), "running");
        assert_eq!(t.sub.result_of(id), Some(JobResult::Done));
        assert_eq!(t.exec.spawned_by("a.service").len(), 3);
    }

    #[test]
    fn test_auto_restart() {
        let t = TestManager::new(
            r#"
            [[Unit]]
            Name = "a.service"
            Service = { ExecStart = ["/bin/a"], Restart = "on-failure", RestartSec = 5 }
            "#,
        );
        t.mgr
            .submit_job("a.service", JobKind::Start, JobMode::Replace)
            .unwrap();
        assert_eq!(t.sub_state("a.service"), "running");

        t.exit(t.last_pid("a.service"), 1);
        assert_eq!(t.sub_state("a.service"), "auto-restart");
        assert_eq!(active(&t, "a.service"), UnitActiveState::Activating);

        t.mgr.advance_clock(4 * USEC_PER_SEC);
        assert_eq!(t.exec.spawned_by("a.service").len(), 1);

        t.mgr.advance_clock(USEC_PER_SEC);
        assert_eq!(t.sub_state("a.service"), "running");
        assert_eq!(t.exec.spawned_by("a.service").len(), 2);
        assert!(t.mgr.list_jobs().is_empty());
    }

    #[test]
    fn test_merge_idempotence() {
        let t = TestManager::new(
            r#"
            [[Unit]]
            Name = "x.service"
            After = ["y.service"]
            Service = { Type = "oneshot", ExecStart = ["/bin/x"] }

            [[Unit]]
            Name = "y.service"
            Service = { Type = "oneshot", ExecStart = ["/bin/y"] }
            "#,
        );
        t.mgr
            .submit_job("y.service", JobKind::Start, JobMode::Replace)
            .unwrap();

        let (first, _) = t
            .mgr
            .submit_job("x.service", JobKind::Start, JobMode::Replace)
            .unwrap();
        let (second, _) = t
            .mgr
            .submit_job("x.service", JobKind::Start, JobMode::Replace)
            .unwrap();
        assert_eq!(first, second);

        let jobs = t.mgr.list_jobs();
        assert_eq!(jobs.len(), 2);
        let x = jobs.iter().find(|j| j.id == first).unwrap();
        assert_eq!(x.stage, JobStage::Wait);
        assert_eq!(t.sub.count_of(first), 0);
    }

    #[test]
    fn test_one_job_per_unit() {
        let t = TestManager::new(
            r#"
            [[Unit]]
            Name = "a.service"
            Requires = ["c.service"]
            Service = { Type = "oneshot", ExecStart = ["/bin/a"] }

            [[Unit]]
            Name = "b.service"
            Requires = ["c.service"]
            Wants = ["a.service"]
            Service = { Type = "oneshot", ExecStart = ["/bin/b"] }

            [[Unit]]
            Name = "c.service"
            Service = { Type = "oneshot", ExecStart = ["/bin/c"] }
            "#,
        );

        for (unit, kind) in [
            ("a.service", JobKind::Start),
            ("b.service", JobKind::Start),
            ("c.service", JobKind::Start),
            ("a.service", JobKind::Restart),
        ] {
            t.mgr.submit_job(unit, kind, JobMode::Replace).unwrap();
            let jobs = t.mgr.list_jobs();
            let units: BTreeSet<&str> = jobs.iter().map(|j| j.unit.as_str()).collect();
            assert_eq!(units.len(), jobs.len());
        }
        assert_eq!(t.mgr.list_jobs().len(), 3);
    }

    #[test]
    fn test_soft_dependency_isolation() {
        let t = TestManager::new(
            r#"
            [[Unit]]
            Name = "a.service"
            Wants = ["b.service"]
            Service = { ExecStart = ["/bin/a"] }

            [[Unit]]
            Name = "b.service"
            Service = { Type = "oneshot", ExecStart = ["/bin/b"] }
            "#,
        );

        let (a, _) = t
            .mgr
            .submit_job("a.service", JobKind::Start, JobMode::Replace)
            .unwrap();
        t.exit(t.last_pid("b.service"), 1);
        assert_eq!(active(&t, "b.service"), UnitActiveState::Failed);
        assert_eq!(t.sub.result_of(a), Some(JobResult::Done));
        assert_eq!(t.sub_state("a.service"), "running");
    }

    #[test]
    fn test_accepted_transactions_complete() {
        let t = TestManager::new(
            r#"
            [[Unit]]
            Name = "a.target"
            Wants = ["b.target", "d.target"]
            Before = ["d.target"]

            [[Unit]]
            Name = "b.target"
            Requires = ["c.target"]
            Before = ["c.target"]

            [[Unit]]
            Name = "c.target"
            Wants = ["a.target"]

            [[Unit]]
            Name = "d.target"
            "#,
        );

        for mode in [JobMode::Replace, JobMode::Fail, JobMode::IgnoreDependencies] {
            for unit in ["a.target", "b.target", "c.target", "d.target"] {
                t.mgr.submit_job(unit, JobKind::Start, mode).unwrap();
                assert!(t.mgr.list_jobs().is_empty());
                t.mgr.submit_job(unit, JobKind::Stop, mode).unwrap();
                assert!(t.mgr.list_jobs().is_empty());
            }
        }
    }

    #[test]
    fn test_load_unit() {
        let t = TestManager::new(
            r#"
            [[Unit]]
            Name = "web.socket"
            Socket = { TimeoutSec = 5 }

            [[Unit]]
            Name = "app.target"
            Wants = ["ghost.service", "not a name"]
            "#,
        );

        let triggers: Vec<String> = t
            .mgr
            .neighbors("web.socket", UnitRelations::UnitTriggers, DepDirection::Forward)
            .collect();
        assert_eq!(triggers, vec!["web.service"]);
        let wanted_by: Vec<String> = t
            .mgr
            .neighbors("ghost.service", UnitRelations::UnitWants, DepDirection::Reverse)
            .collect();
        assert_eq!(wanted_by, vec!["app.target"]);

        let ghost = t.mgr.get_unit_state("ghost.service").unwrap();
        assert_eq!(ghost.load_state, UnitLoadState::Stub);
        assert!(matches!(
            t.mgr.submit_job("ghost.service", JobKind::Start, JobMode::Replace),
            Err(Error::NoSuchUnit { .. })
        ));

        /* masked units stay masked and get no edges */
        let mut config = UnitConfig::new("hidden.target");
        config.Masked = true;
        config.Wants = vec!["app.target".to_string()];
        t.mgr.load_unit(&config).unwrap();
        assert_eq!(
            t.mgr.get_unit_state("hidden.target").unwrap().load_state,
            UnitLoadState::Masked
        );
        assert_eq!(
            t.mgr
                .neighbors("hidden.target", UnitRelations::UnitWants, DepDirection::Forward)
                .count(),
            0
        );
    }

    #[test]
    fn test_add_dependency() {
        let t = TestManager::new(
            r#"
            [[Unit]]
            Name = "a.target"

            [[Unit]]
            Name = "b.target"
            "#,
        );

        assert!(matches!(
            t.mgr
                .add_dependency("a.target", UnitRelations::UnitWants, "a.target"),
            Err(Error::InvalidDependency { .. })
        ));
        assert!(matches!(
            t.mgr
                .add_dependency("a.target", UnitRelations::UnitTriggers, "b.target"),
            Err(Error::InvalidDependency { .. })
        ));

        t.mgr
            .add_dependency("a.target", UnitRelations::UnitRequires, "b.target")
            .unwrap();
        let (_, infos) = t
            .mgr
            .submit_job("a.target", JobKind::Start, JobMode::Replace)
            .unwrap();
        assert_eq!(infos.len(), 2);

        t.mgr
            .remove_dependency("a.target", UnitRelations::UnitRequires, "b.target");
        t.mgr
            .submit_job("b.target", JobKind::Stop, JobMode::Replace)
            .unwrap();
        assert_eq!(active(&t, "a.target"), UnitActiveState::Active);
    }

    #[test]
    fn test_socket_activation() {
        let t = TestManager::new(
            r#"
            [[Unit]]
            Name = "web.socket"
            Socket = { TimeoutSec = 5 }

            [[Unit]]
            Name = "web.service"
            Service = { ExecStart = ["/bin/web"] }
            "#,
        );
        t.mgr
            .submit_job("web.socket", JobKind::Start, JobMode::Replace)
            .unwrap();
        assert_eq!(t.sub_state("web.socket"), "listening");

        assert!(matches!(
            t.mgr.watch_external(7, "nope.socket"),
            Err(Error::NoSuchUnit { .. })
        ));
        t.mgr.watch_external(7, "web.socket").unwrap();
        t.mgr.handle_event(Event::External(7));
        assert_eq!(t.sub_state("web.socket"), "running");
        assert_eq!(t.sub_state("web.service"), "running");

        /* the service going away puts the socket back to listening */
        t.exit(t.last_pid("web.service"), 0);
        assert_eq!(active(&t, "web.service"), UnitActiveState::InActive);
        assert_eq!(t.sub_state("web.socket"), "listening");
    }

    #[test]
    fn test_cancel_job() {
        let t = TestManager::new(
            r#"
            [[Unit]]
            Name = "a.service"
            Requires = ["b.service"]
            Service = { Type = "oneshot", ExecStart = ["/bin/a"] }

            [[Unit]]
            Name = "b.service"
            Service = { Type = "oneshot", ExecStart = ["/bin/b"] }
            "#,
        );
        let (a, _) = t
            .mgr
            .submit_job("a.service", JobKind::Start, JobMode::Replace)
            .unwrap();
        let b = t.mgr.get_unit_state("b.service").unwrap().job_id.unwrap();

        assert!(matches!(
            t.mgr.cancel_job(b),
            Err(Error::JobRunning { .. })
        ));
        t.mgr.cancel_job(a).unwrap();
        assert_eq!(t.sub.result_of(a), Some(JobResult::Canceled));
        assert!(matches!(
            t.mgr.cancel_job(a),
            Err(Error::NoSuchJob { .. })
        ));
        assert_eq!(t.mgr.list_jobs().len(), 1);
    }

    #[test]
    fn test_device_start_waits_for_plug() {
        let t = TestManager::new(
            r#"
            [[Unit]]
            Name = "app.target"
            Wants = ["dev-sda.device"]
            After = ["dev-sda.device"]
            "#,
        );
        t.mgr.device_changed("dev-sda.device", false).unwrap();

        let (app, _) = t
            .mgr
            .submit_job("app.target", JobKind::Start, JobMode::Replace)
            .unwrap();
        assert_eq!(t.mgr.list_jobs().len(), 2);

        t.mgr.device_changed("dev-sda.device", true).unwrap();
        assert_eq!(t.sub_state("dev-sda.device"), "plugged");
        assert_eq!(t.sub.result_of(app), Some(JobResult::Done));

        t.mgr.device_changed("dev-sda.device", false).unwrap();
        assert_eq!(active(&t, "dev-sda.device"), UnitActiveState::InActive);
    }

    #[test]
    fn test_mount_retroactive() {
        let t = TestManager::new(
            r#"
            [[Unit]]
            Name = "data.mount"
            DefaultDependencies = false
            Wants = ["helper.target"]
            Mount = { What = "/dev/sdb", Where = "/data" }

            [[Unit]]
            Name = "helper.target"

            [[Unit]]
            Name = "app.target"
            BindsTo = ["data.mount"]
            "#,
        );

        /* mounted behind our back: wanted units follow */
        t.mgr.mount_changed("data.mount", true).unwrap();
        assert_eq!(t.sub_state("data.mount"), "mounted");
        assert_eq!(active(&t, "helper.target"), UnitActiveState::Active);

        t.mgr
            .submit_job("app.target", JobKind::Start, JobMode::Replace)
            .unwrap();
        assert_eq!(active(&t, "app.target"), UnitActiveState::Active);

        /* unmounted behind our back: bound units stop */
        t.mgr.mount_changed("data.mount", false).unwrap();
        assert_eq!(active(&t, "data.mount"), UnitActiveState::InActive);
        assert_eq!(active(&t, "app.target"), UnitActiveState::InActive);
        assert_eq!(active(&t, "helper.target"), UnitActiveState::Active);
    }

    #[test]
    fn test_scope() {
        let t = TestManager::new("");
        let pid = t.exec.adopt();

        assert!(matches!(
            t.mgr.abandon_scope("session-1.scope"),
            Err(Error::NoSuchUnit { .. })
        ));
        t.mgr.attach_scope_pids("session-1.scope", &[pid]).unwrap();
        t.mgr
            .submit_job("session-1.scope", JobKind::Start, JobMode::Replace)
            .unwrap();
        assert_eq!(t.sub_state("session-1.scope"), "running");

        t.mgr.abandon_scope("session-1.scope").unwrap();
        assert_eq!(t.sub_state("session-1.scope"), "abandoned");

        t.exit(pid, 0);
        assert_eq!(active(&t, "session-1.scope"), UnitActiveState::InActive);
    }

    #[test]
    fn test_gc() {
        let t = TestManager::new(
            r#"
            [[Unit]]
            Name = "a.target"
            DefaultDependencies = false
            Wants = ["ghost.service", "pinned.service"]
            "#,
        );
        assert!(t.mgr.gc().is_empty());

        t.mgr.watch_external(3, "pinned.service").unwrap();
        t.mgr
            .remove_dependency("a.target", UnitRelations::UnitWants, "ghost.service");
        t.mgr
            .remove_dependency("a.target", UnitRelations::UnitWants, "pinned.service");
        assert_eq!(t.mgr.gc(), vec!["ghost.service"]);
        assert!(t.mgr.get_unit_state("ghost.service").is_err());
        assert!(t.mgr.get_unit_state("pinned.service").is_ok());
        assert!(t.mgr.get_unit_state("a.target").is_ok());
    }

    #[test]
    fn test_on_failure() {
        let t = TestManager::new(
            r#"
            [[Unit]]
            Name = "a.service"
            OnFailure = ["rescue.target"]
            FailureAction = "exit"
            Service = { ExecStart = ["/bin/a"] }

            [[Unit]]
            Name = "rescue.target"
            "#,
        );
        t.mgr
            .submit_job("a.service", JobKind::Start, JobMode::Replace)
            .unwrap();
        assert_eq!(t.mgr.exit_state(), None);

        t.exit(t.last_pid("a.service"), 1);
        assert_eq!(active(&t, "a.service"), UnitActiveState::Failed);
        assert_eq!(active(&t, "rescue.target"), UnitActiveState::Active);
        assert_eq!(
            t.exec.emergencies(),
            vec![(EmergencyAction::Exit, "a.service failed".to_string())]
        );
        assert_eq!(t.mgr.exit_state(), Some(ManagerExit::Exit));
    }

    #[test]
    fn test_job_timeout() {
        let t = TestManager::new(
            r#"
            [[Unit]]
            Name = "slow.service"
            JobTimeoutSec = 5
            JobTimeoutAction = "reboot"
            Service = { Type = "oneshot", ExecStart = ["/bin/slow"] }
            "#,
        );
        let (id, _) = t
            .mgr
            .submit_job("slow.service", JobKind::Start, JobMode::Replace)
            .unwrap();

        t.mgr.advance_clock(5 * USEC_PER_SEC);
        assert_eq!(t.sub.result_of(id), Some(JobResult::Timeout));
        assert_eq!(t.exec.emergencies().len(), 1);
        assert_eq!(t.exec.emergencies()[0].0, EmergencyAction::Reboot);
        /* the unit keeps going */
        assert_eq!(t.sub_state("slow.service"), "start");
    }

    #[test]
    fn test_timer_handler_rearms_later_key() {
        let t = TestManager::new(
            r#"
            [[Unit]]
            Name = "db.service"
            Service = { Type = "oneshot", ExecStart = ["/bin/db"], TimeoutStartSec = 5 }

            [[Unit]]
            Name = "app.service"
            BindsTo = ["db.service"]
            Service = { Type = "oneshot", ExecStart = ["/bin/app"], TimeoutStartSec = 5, TimeoutStopSec = 10 }
            "#,
        );
        t.mgr
            .submit_job("db.service", JobKind::Start, JobMode::Replace)
            .unwrap();
        t.mgr
            .submit_job("app.service", JobKind::Start, JobMode::Replace)
            .unwrap();
        let app = t.last_pid("app.service");
        assert_eq!(t.sub_state("app.service"), "start");

        /* both time out together; db going down stops app, which re-arms its own timer */
        t.mgr.advance_clock(5 * USEC_PER_SEC);
        assert_eq!(t.sub_state("db.service"), "final-sigterm");
        assert_eq!(t.sub_state("app.service"), "stop-sigterm");
        assert!(t.exec.killed().contains(&(app, Signal::SIGTERM)));
        assert!(!t.exec.killed().contains(&(app, Signal::SIGKILL)));

        t.mgr.advance_clock(10 * USEC_PER_SEC);
        assert_eq!(t.sub_state("app.service"), "stop-sigkill");
        assert!(t.exec.killed().contains(&(app, Signal::SIGKILL)));
    }

    #[test]
    fn test_signals() {
        let t = TestManager::new(
            r#"
            [[Unit]]
            Name = "a.service"
            Service = { Type = "oneshot", ExecStart = ["/bin/a"] }
            "#,
        );
        t.mgr.handle_event(Event::Signal(Signal::SIGHUP));
        assert_eq!(t.mgr.exit_state(), Some(ManagerExit::Reexec));

        let (id, _) = t
            .mgr
            .submit_job("a.service", JobKind::Start, JobMode::Replace)
            .unwrap();
        t.mgr.handle_event(Event::Signal(Signal::SIGTERM));
        assert_eq!(t.mgr.exit_state(), Some(ManagerExit::Exit));
        assert_eq!(t.sub.result_of(id), Some(JobResult::Canceled));
        assert!(t.mgr.list_jobs().is_empty());
    }

    #[test]
    fn test_refuse_manual() {
        let t = TestManager::new(
            r#"
            [[Unit]]
            Name = "a.target"
            RefuseManualStart = true
            "#,
        );
        assert!(matches!(
            t.mgr.submit_job("a.target", JobKind::Start, JobMode::Replace),
            Err(Error::RefuseManual { .. })
        ));
        t.mgr
            .submit_job("a.target", JobKind::Stop, JobMode::Replace)
            .unwrap();
    }

    #[test]
    fn test_unknown_child() {
        let t = TestManager::new("");
        t.mgr.handle_event(Event::ProcessExit(WaitStatus::Exited(
            Pid::from_raw(4242),
            0,
        )));
        assert!(t.mgr.list_jobs().is_empty());
    }
}
