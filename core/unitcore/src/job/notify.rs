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

use super::entry::{JobKind, JobMode, JobNotification, JobSubscriber};
use crate::unit::{UnitActiveState, UnitDb, UnitRelationAtom};
use std::cell::RefCell;
use std::rc::Rc;

/// The jobs queued when `unit` succeeded or failed: start every OnSuccess=/OnFailure= unit.
pub(super) fn job_notify_result(
    db: &UnitDb,
    unit: &str,
    atom: UnitRelationAtom,
) -> Vec<(String, JobKind, JobMode)> {
    debug_assert!(atom == UnitRelationAtom::ON_SUCCESS || atom == UnitRelationAtom::ON_FAILURE);
    db.dep_gets_atom(unit, atom)
        .into_iter()
        .map(|other| (other, JobKind::Start, JobMode::Replace))
        .collect()
}

/// The jobs queued when `unit` changed its state without a job asking for it.
pub(super) fn job_notify_event(
    db: &UnitDb,
    unit: &str,
    os: UnitActiveState,
    ns: UnitActiveState,
) -> Vec<(String, JobKind, JobMode)> {
    let mut targets = Vec::new();
    if os.is_inactive_or_deactivating() && !ns.is_inactive_or_deactivating() {
        targets.append(&mut notify_event_start(db, unit));
    }
    if !os.is_inactive_or_deactivating() && ns.is_inactive_or_deactivating() {
        targets.append(&mut notify_event_stop(db, unit));
    }
    targets
}

fn is_up(db: &UnitDb, unit: &str) -> bool {
    db.units_get(unit)
        .map_or(false, |u| u.active_state().is_active_or_activating())
}

fn is_down(db: &UnitDb, unit: &str) -> bool {
    db.units_get(unit)
        .map_or(true, |u| u.active_state().is_inactive_or_deactivating())
}

fn notify_event_start(db: &UnitDb, unit: &str) -> Vec<(String, JobKind, JobMode)> {
    let mut targets = Vec::new();

    for (atom, mode) in [
        (UnitRelationAtom::RETRO_ACTIVE_START_REPLACE, JobMode::Replace),
        (UnitRelationAtom::RETRO_ACTIVE_START_FAIL, JobMode::Fail),
    ] {
        for other in db.dep_gets_atom(unit, atom).into_iter() {
            if !db.dep_is_dep_atom_with(unit, UnitRelationAtom::AFTER, &other)
                && !is_up(db, &other)
            {
                targets.push((other, JobKind::Start, mode));
            }
        }
    }

    for other in db
        .dep_gets_atom(unit, UnitRelationAtom::RETRO_ACTIVE_STOP_ON_START)
        .into_iter()
    {
        if !is_down(db, &other) {
            targets.push((other, JobKind::Stop, JobMode::Replace));
        }
    }

    targets
}

fn notify_event_stop(db: &UnitDb, unit: &str) -> Vec<(String, JobKind, JobMode)> {
    let mut targets = Vec::new();

    for other in db
        .dep_gets_atom(unit, UnitRelationAtom::RETRO_ACTIVE_STOP_ON_STOP)
        .into_iter()
    {
        if !is_down(db, &other) {
            targets.push((other, JobKind::Stop, JobMode::Replace));
        }
    }

    targets
}

/// The registered receivers of job results.
pub(super) struct JobNotifier {
    subscribers: RefCell<Vec<Rc<dyn JobSubscriber>>>,
}

impl JobNotifier {
    pub(super) fn new() -> JobNotifier {
        JobNotifier {
            subscribers: RefCell::new(Vec::new()),
        }
    }

    pub(super) fn register(&self, subscriber: Rc<dyn JobSubscriber>) {
        self.subscribers.borrow_mut().push(subscriber);
    }

    pub(super) fn notify(&self, notification: &JobNotification) {
        // a subscriber may register another one while being called
        let subscribers = self.subscribers.borrow().clone();
        for subscriber in subscribers.iter() {
            subscriber.job_finished(notification);
        }
    }
}
