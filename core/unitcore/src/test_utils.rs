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

//! Test doubles shared by the unit tests of the crate.
use crate::error::*;
use crate::exec::{EmergencyAction, ExecCommand, ExecContext, Executor};
use crate::job::{JobNotification, JobResult, JobSubscriber};
use crate::manager::{Event, Manager, ManagerConfig};
use crate::unit::{UnitConfig, UnitSet};
use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;
use nix::unistd::Pid;
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;

#[derive(Default)]
struct FakeData {
    last_pid: i32,
    alive: BTreeSet<Pid>,
    spawned: Vec<(String, Pid, ExecCommand)>,
    killed: Vec<(Pid, Signal)>,
    emergencies: Vec<(EmergencyAction, String)>,
}

/// An executor that never forks: spawned pids stay alive until the test says they exited.
#[derive(Default)]
pub(crate) struct FakeExecutor {
    data: RefCell<FakeData>,
}

impl FakeExecutor {
    pub(crate) fn new() -> FakeExecutor {
        FakeExecutor {
            data: RefCell::new(FakeData {
                last_pid: 1000,
                ..Default::default()
            }),
        }
    }

    fn new_pid(&self) -> Pid {
        let mut data = self.data.borrow_mut();
        data.last_pid += 1;
        let pid = Pid::from_raw(data.last_pid);
        data.alive.insert(pid);
        pid
    }

    /// a live process nobody spawned, as attached to a scope
    pub(crate) fn adopt(&self) -> Pid {
        self.new_pid()
    }

    pub(crate) fn exit(&self, pid: Pid) {
        self.data.borrow_mut().alive.remove(&pid);
    }

    pub(crate) fn is_alive(&self, pid: Pid) -> bool {
        self.data.borrow().alive.contains(&pid)
    }

    pub(crate) fn spawned(&self) -> Vec<(Pid, ExecCommand)> {
        self.data
            .borrow()
            .spawned
            .iter()
            .map(|(_, pid, cmd)| (*pid, cmd.clone()))
            .collect()
    }

    /// pids spawned for `unit`, oldest first
    pub(crate) fn spawned_by(&self, unit: &str) -> Vec<Pid> {
        self.data
            .borrow()
            .spawned
            .iter()
            .filter(|(u, _, _)| u == unit)
            .map(|(_, pid, _)| *pid)
            .collect()
    }

    pub(crate) fn killed(&self) -> Vec<(Pid, Signal)> {
        self.data.borrow().killed.clone()
    }

    pub(crate) fn emergencies(&self) -> Vec<(EmergencyAction, String)> {
        self.data.borrow().emergencies.clone()
    }
}

impl Executor for FakeExecutor {
    fn spawn(&self, unit: &str, cmd: &ExecCommand, _ctx: &ExecContext) -> Result<Pid> {
        let pid = self.new_pid();
        self.data
            .borrow_mut()
            .spawned
            .push((unit.to_string(), pid, cmd.clone()));
        Ok(pid)
    }

    fn kill(&self, pid: Pid, signal: Signal) -> Result<()> {
        let mut data = self.data.borrow_mut();
        if !data.alive.contains(&pid) {
            return Err(Error::Nix {
                source: nix::Error::ESRCH,
            });
        }
        data.killed.push((pid, signal));
        Ok(())
    }

    fn emergency_action(&self, action: EmergencyAction, reason: &str) {
        self.data
            .borrow_mut()
            .emergencies
            .push((action, reason.to_string()));
    }
}

/// Keeps every job notification in arrival order.
#[derive(Default)]
pub(crate) struct RecordingSubscriber {
    seen: RefCell<Vec<JobNotification>>,
}

impl RecordingSubscriber {
    pub(crate) fn all(&self) -> Vec<JobNotification> {
        self.seen.borrow().clone()
    }

    pub(crate) fn result_of(&self, id: u128) -> Option<JobResult> {
        self.seen
            .borrow()
            .iter()
            .find(|n| n.id == id)
            .map(|n| n.result)
    }

    pub(crate) fn count_of(&self, id: u128) -> usize {
        self.seen.borrow().iter().filter(|n| n.id == id).count()
    }

    /// the units in completion order
    pub(crate) fn units(&self) -> Vec<String> {
        self.seen.borrow().iter().map(|n| n.unit.clone()).collect()
    }
}

impl JobSubscriber for RecordingSubscriber {
    fn job_finished(&self, notification: &JobNotification) {
        self.seen.borrow_mut().push(notification.clone());
    }
}

/// An empty target, the simplest loadable unit.
pub(crate) fn target(name: &str) -> UnitConfig {
    UnitConfig::new(name)
}

/// A simple service running `exec_start`.
pub(crate) fn service(name: &str, exec_start: &str) -> UnitConfig {
    let mut config = UnitConfig::new(name);
    config.Service =
        Some(toml::from_str(&format!("ExecStart = [\"{}\"]", exec_start)).unwrap());
    config
}

/// A manager on a manual clock at 0, wired to fakes.
pub(crate) struct TestManager {
    pub(crate) mgr: Manager,
    pub(crate) exec: Rc<FakeExecutor>,
    pub(crate) sub: Rc<RecordingSubscriber>,
}

impl TestManager {
    pub(crate) fn new(units: &str) -> TestManager {
        let exec = Rc::new(FakeExecutor::new());
        let sub = Rc::new(RecordingSubscriber::default());
        let mgr = Manager::new(&ManagerConfig::default(), exec.clone());
        mgr.set_clock(0);
        mgr.subscribe(sub.clone());
        mgr.load_units(&UnitSet::from_toml(units).unwrap());
        TestManager { mgr, exec, sub }
    }

    /// `pid` exited with `code`, as the reactor would report it.
    pub(crate) fn exit(&self, pid: Pid, code: i32) {
        self.exec.exit(pid);
        self.mgr
            .handle_event(Event::ProcessExit(WaitStatus::Exited(pid, code)));
    }

    /// the latest pid spawned for `unit`
    pub(crate) fn last_pid(&self, unit: &str) -> Pid {
        *self.exec.spawned_by(unit).last().unwrap()
    }

    pub(crate) fn sub_state(&self, unit: &str) -> String {
        self.mgr.get_unit_state(unit).unwrap().sub_state
    }
}
