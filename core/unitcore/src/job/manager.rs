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

use super::alloc::JobAlloc;
use super::entry::{
    job_is_superset, job_process_unit, job_rkind_new, job_trigger_err_to_result, Job, JobInfo,
    JobKind, JobMode, JobNotification, JobResult, JobStage, JobSubscriber,
};
use super::notify::{self, JobNotifier};
use super::table::JobTable;
use super::transaction::{job_trans_build, Transaction};
use crate::error::*;
use crate::unit::{TimerKey, UnitActiveState, UnitDb, UnitNotifyFlags};
use crate::unit::{UnitRelationAtom, UnitRelations};
use event::time::{usec_add, USEC_INFINITY};
use event::TimerQueue;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Carries out the unit side of a job.
pub(crate) trait JobRunner {
    /// Run `run_kind` on `unit`. `Ok` means the unit took the request and reports the
    /// outcome through a state notification.
    fn job_action(&self, unit: &str, run_kind: JobKind) -> Result<()>;
}

pub(crate) struct JobManager {
    // associated objects
    db: Rc<UnitDb>,
    timers: Rc<RefCell<TimerQueue<TimerKey>>>,

    // owned objects
    alloc: JobAlloc,
    jobs: JobTable,
    notifier: JobNotifier,

    // status
    dispatching: Cell<bool>,
}

impl JobManager {
    pub(crate) fn new(
        dbr: &Rc<UnitDb>,
        timersr: &Rc<RefCell<TimerQueue<TimerKey>>>,
    ) -> JobManager {
        JobManager {
            db: Rc::clone(dbr),
            timers: Rc::clone(timersr),
            alloc: JobAlloc::new(),
            jobs: JobTable::new(),
            notifier: JobNotifier::new(),
            dispatching: Cell::new(false),
        }
    }

    pub(crate) fn register(&self, subscriber: Rc<dyn JobSubscriber>) {
        self.notifier.register(subscriber);
    }

    /// Build and apply the transaction for one request. Returns the anchor job id and every
    /// job the transaction installed or merged into.
    pub(crate) fn exec(
        &self,
        unit: &str,
        kind: JobKind,
        mode: JobMode,
        manual: bool,
        now: u64,
    ) -> Result<(u128, Vec<JobInfo>)> {
        let tr = job_trans_build(&self.db, &self.jobs, unit, kind, mode, manual)?;
        Ok(self.apply(tr, now))
    }

    fn apply(&self, tr: Transaction, now: u64) -> (u128, Vec<JobInfo>) {
        // replaced and flushed jobs go first, without touching their dependencies
        for id in tr.replaces.iter().chain(tr.cancels.iter()) {
            self.finish(*id, JobResult::Canceled, false);
        }

        let mut anchor_id = 0;
        let mut ids = Vec::new();
        for (unit, tj) in tr.jobs.into_iter() {
            let deadline = self
                .db
                .units_get(&unit)
                .map(|u| u.job_timeout_usec())
                .filter(|t| *t != USEC_INFINITY)
                .map(|t| usec_add(now, t));

            let id = match tj.merge_into {
                Some((id, merged)) => {
                    let mut job = match self.jobs.get(id) {
                        Some(j) => j,
                        None => continue,
                    };
                    let requeue = job.stage == JobStage::Running && !job_is_superset(job.kind, tj.kind);
                    if merged != job.kind {
                        job.kind = merged;
                        if job.stage == JobStage::Wait {
                            job.run_kind = job_rkind_new(merged);
                        }
                    }
                    if requeue {
                        log::debug!("Job {} on {} re-queued as {}", id, unit, merged);
                        job.stage = JobStage::Wait;
                        job.run_kind = job_rkind_new(merged);
                    }
                    job.attr.or(&tj.attr);
                    job.order_exempt.extend(tj.order_exempt);
                    job.deadline = match (job.deadline, deadline) {
                        (Some(a), Some(b)) => Some(a.min(b)),
                        (a, b) => a.or(b),
                    };
                    self.arm_timer(&mut job);
                    self.jobs.update(&job);
                    id
                }
                None => {
                    let mut job = self.alloc.alloc(&unit, tj.kind, tj.attr);
                    job.order_exempt = tj.order_exempt;
                    job.deadline = deadline;
                    self.arm_timer(&mut job);
                    let id = job.id;
                    log::debug!("Installed job {}/{} as {}", unit, job.kind, id);
                    self.jobs.insert(job);
                    id
                }
            };

            if unit == tr.anchor {
                anchor_id = id;
            }
            ids.push(id);
        }

        let infos = ids
            .iter()
            .filter_map(|id| self.jobs.get(*id))
            .map(|j| JobInfo::map(&j))
            .collect();
        (anchor_id, infos)
    }

    fn arm_timer(&self, job: &mut Job) {
        let deadline = match job.deadline {
            Some(d) => d,
            None => return,
        };
        if let Err(e) = self
            .timers
            .borrow_mut()
            .arm(TimerKey::Job(job.id), deadline)
        {
            log::warn!(
                "Failed to arm the timeout of job {}, running without it: {}",
                job.id,
                e
            );
            job.deadline = None;
        }
    }

    /// Run every ready job until a pass changes nothing.
    pub(crate) fn dispatch(&self, runner: &dyn JobRunner) {
        // repeating protection
        if self.dispatching.get() {
            return;
        }
        self.dispatching.set(true);

        loop {
            let mut progress = false;
            for id in self.jobs.waiting_ids() {
                let job = match self.jobs.get(id) {
                    Some(j) if j.stage == JobStage::Wait => j,
                    _ => continue,
                };
                if !self.is_ready(&job) {
                    continue;
                }
                progress |= self.run_job(runner, job);
            }
            if !progress {
                break;
            }
        }

        self.dispatching.set(false);
    }

    fn is_ready(&self, job: &Job) -> bool {
        if job.attr.ignore_order {
            return true;
        }

        for (relation, atom) in [
            (UnitRelations::UnitAfter, UnitRelationAtom::AFTER),
            (UnitRelations::UnitBefore, UnitRelationAtom::BEFORE),
        ] {
            for other in self.db.dep_gets(&job.unit, relation).iter() {
                if let Some(oj) = self.jobs.get_by_unit(other) {
                    if job.is_order_with(&oj, atom) > 0 {
                        return false;
                    }
                }
            }
        }
        true
    }

    fn run_job(&self, runner: &dyn JobRunner, job: Job) -> bool {
        let id = job.id;
        self.jobs.set_stage(id, JobStage::Running);
        log::debug!("Running job {}/{} ({})", job.unit, job.run_kind, id);

        let ret = match job.run_kind {
            JobKind::Nop => Err(Error::UnitActionEAlready),
            kind => runner.job_action(&job.unit, kind),
        };

        // the unit may have finished the job through its notification already
        let pending = matches!(
            self.jobs.get(id),
            Some(j) if j.stage == JobStage::Running && j.run_kind == job.run_kind
        );
        match ret {
            Ok(_) => true,
            Err(_) if !pending => true,
            Err(e) => match job_trigger_err_to_result(e) {
                None => {
                    self.jobs.set_stage(id, JobStage::Wait);
                    false
                }
                Some(result) => {
                    self.finish(id, result, true);
                    true
                }
            },
        }
    }

    /// Map a state change of `unit` onto its job. False if the change was not caused by it.
    pub(crate) fn try_finish(
        &self,
        unit: &str,
        ns: UnitActiveState,
        flags: UnitNotifyFlags,
    ) -> bool {
        let job = match self.jobs.get_by_unit(unit) {
            Some(j) => j,
            None => return false,
        };

        let (result, generated) = job_process_unit(job.run_kind, job.stage, ns, flags);
        if let Some(r) = result {
            self.finish(job.id, r, true);
        }
        generated
    }

    /// End job `id` with `result`. Failures fail the waiting jobs depending on it when
    /// `propagate` is set.
    pub(crate) fn finish(&self, id: u128, result: JobResult, propagate: bool) {
        let mut job = match self.jobs.get(id) {
            Some(j) => j,
            None => return,
        };

        if result == JobResult::Done && job.update_runkind() {
            log::debug!("Job {}/{} goes on with {}", job.unit, job.kind, job.run_kind);
            job.stage = JobStage::Wait;
            self.jobs.update(&job);
            return;
        }

        self.jobs.remove(id);
        self.timers.borrow_mut().disarm(&TimerKey::Job(id));
        if result == JobResult::Done {
            log::info!("Job {}/{} finished, result={}", job.unit, job.kind, result);
        } else {
            log::warn!("Job {}/{} finished, result={}", job.unit, job.kind, result);
        }

        self.notifier.notify(&JobNotification {
            id,
            unit: job.unit.clone(),
            kind: job.kind,
            result,
        });

        if propagate && result != JobResult::Done {
            self.finish_relation(&job);
        }
    }

    fn finish_relation(&self, job: &Job) {
        let (atom, start_only) = match job.run_kind {
            JobKind::Start | JobKind::Verify => (UnitRelationAtom::PROPAGATE_START_FAILURE, false),
            JobKind::Stop => (UnitRelationAtom::PROPAGATE_STOP_FAILURE, true),
            _ => return,
        };

        for other in self.db.dep_gets_atom(&job.unit, atom).iter() {
            let oj = match self.jobs.get_by_unit(other) {
                Some(j) => j,
                None => continue,
            };
            let hit = match oj.run_kind {
                JobKind::Start => true,
                JobKind::Verify => !start_only,
                _ => false,
            };
            if oj.stage == JobStage::Wait && hit {
                self.finish(oj.id, JobResult::Dependency, true);
            }
        }
    }

    /// Cancel a waiting job; a running one can not be preempted.
    pub(crate) fn cancel(&self, id: u128) -> Result<()> {
        let job = self.jobs.get(id).ok_or(Error::NoSuchJob { id })?;
        if job.stage == JobStage::Running {
            return Err(Error::JobRunning { id });
        }
        self.finish(id, JobResult::Canceled, true);
        Ok(())
    }

    /// The timeout of job `id` elapsed; returns the unit it was on.
    pub(crate) fn timeout(&self, id: u128) -> Option<String> {
        let job = self.jobs.get(id)?;
        self.finish(id, JobResult::Timeout, true);
        Some(job.unit)
    }

    /// Cancel everything, nothing propagates.
    pub(crate) fn cancel_all(&self) {
        for job in self.jobs.jobs() {
            self.finish(job.id, JobResult::Canceled, false);
        }
    }

    /// The jobs to queue after `unit` changed its state on its own.
    pub(crate) fn notify_event(
        &self,
        unit: &str,
        os: UnitActiveState,
        ns: UnitActiveState,
    ) -> Vec<(String, JobKind, JobMode)> {
        notify::job_notify_event(&self.db, unit, os, ns)
    }

    /// The OnSuccess=/OnFailure= jobs of `unit`.
    pub(crate) fn notify_result(
        &self,
        unit: &str,
        atom: UnitRelationAtom,
    ) -> Vec<(String, JobKind, JobMode)> {
        notify::job_notify_result(&self.db, unit, atom)
    }

    pub(crate) fn get_job(&self, id: u128) -> Option<JobInfo> {
        self.jobs.get(id).map(|j| JobInfo::map(&j))
    }

    pub(crate) fn get_job_id(&self, unit: &str) -> Option<u128> {
        self.jobs.get_by_unit(unit).map(|j| j.id)
    }

    pub(crate) fn has_job(&self, unit: &str) -> bool {
        self.jobs.has_job(unit)
    }

    pub(crate) fn has_stop_job(&self, unit: &str) -> bool {
        self.jobs
            .get_by_unit(unit)
            .map_or(false, |j| j.kind == JobKind::Stop)
    }

    pub(crate) fn list(&self) -> Vec<JobInfo> {
        self.jobs.infos()
    }

    pub(crate) fn len(&self) -> usize {
        self.jobs.len()
    }

    /// the installed job of `unit`, for the state file
    pub(crate) fn snapshot(&self, unit: &str) -> Option<Job> {
        self.jobs.get_by_unit(unit)
    }

    pub(crate) fn next_id(&self) -> u128 {
        self.alloc.next_id()
    }

    pub(crate) fn set_next_id(&self, next_id: u128) {
        self.alloc.set_next_id(next_id);
    }

    /// Put back a job read from the state file.
    pub(crate) fn restore(&self, job: Job) {
        self.alloc.set_next_id(job.id + 1);
        self.jobs.insert(job);
    }

    /// Re-arm the timeouts of the restored jobs.
    pub(crate) fn coldplug(&self) {
        for mut job in self.jobs.jobs() {
            if job.deadline.is_some() {
                self.arm_timer(&mut job);
                self.jobs.update(&job);
            }
        }
    }

    pub(crate) fn clear(&self) {
        for job in self.jobs.jobs() {
            self.timers.borrow_mut().disarm(&TimerKey::Job(job.id));
        }
        self.jobs.clear();
        self.alloc.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::entry::JobAttr;
    use crate::test_utils::RecordingSubscriber;
    use crate::unit::{UnitConfig, UnitDefaults, UnitDependencyMask};
    use std::collections::HashMap;

    /// Records actions; units listed in `results` answer with that error, the rest accept.
    struct FakeRunner {
        actions: RefCell<Vec<(String, JobKind)>>,
        results: RefCell<HashMap<String, Error>>,
    }

    impl FakeRunner {
        fn new() -> FakeRunner {
            FakeRunner {
                actions: RefCell::new(Vec::new()),
                results: RefCell::new(HashMap::new()),
            }
        }

        fn answer(&self, unit: &str, e: Error) {
            self.results.borrow_mut().insert(unit.to_string(), e);
        }

        fn actions(&self) -> Vec<(String, JobKind)> {
            self.actions.borrow().clone()
        }
    }

    impl JobRunner for FakeRunner {
        fn job_action(&self, unit: &str, run_kind: JobKind) -> Result<()> {
            self.actions.borrow_mut().push((unit.to_string(), run_kind));
            match self.results.borrow_mut().remove(unit) {
                Some(e) => Err(e),
                None => Ok(()),
            }
        }
    }

    struct Harness {
        db: Rc<UnitDb>,
        timers: Rc<RefCell<TimerQueue<TimerKey>>>,
        jm: JobManager,
        runner: FakeRunner,
        sub: Rc<RecordingSubscriber>,
    }

    impl Harness {
        fn new(units: &[&str]) -> Harness {
            let defaults = UnitDefaults::default();
            let db = Rc::new(UnitDb::new());
            for name in units {
                db.get_or_create(name, &defaults)
                    .unwrap()
                    .load(&UnitConfig::new(name), &defaults)
                    .unwrap();
            }
            let timers = Rc::new(RefCell::new(TimerQueue::new()));
            let jm = JobManager::new(&db, &timers);
            let sub = Rc::new(RecordingSubscriber::default());
            jm.register(sub.clone());
            Harness {
                db,
                timers,
                jm,
                runner: FakeRunner::new(),
                sub,
            }
        }

        fn dep(&self, from: &str, relation: UnitRelations, to: &str) {
            self.db
                .dep_insert(from, relation, to, UnitDependencyMask::FILE)
                .unwrap();
        }

        fn submit(&self, unit: &str, kind: JobKind, mode: JobMode) -> u128 {
            let (id, _) = self.jm.exec(unit, kind, mode, true, 0).unwrap();
            self.jm.dispatch(&self.runner);
            id
        }

        /// the unit reports `ns`, then the queue moves on
        fn report(&self, unit: &str, ns: UnitActiveState) {
            self.jm.try_finish(unit, ns, UnitNotifyFlags::EMPTY);
            self.jm.dispatch(&self.runner);
        }
    }

    fn action(unit: &str, kind: JobKind) -> (String, JobKind) {
        (unit.to_string(), kind)
    }

    #[test]
    fn test_order_and_short_circuit() {
        let h = Harness::new(&["a.target", "b.target"]);
        h.dep("a.target", UnitRelations::UnitRequires, "b.target");

        let a = h.submit("a.target", JobKind::Start, JobMode::Replace);
        assert_eq!(h.runner.actions(), vec![action("b.target", JobKind::Start)]);
        assert_eq!(h.jm.len(), 2);

        /* b fails, a is failed without running */
        h.report("b.target", UnitActiveState::Failed);
        assert_eq!(h.sub.result_of(a), Some(JobResult::Dependency));
        assert_eq!(h.runner.actions().len(), 1);
        assert_eq!(h.jm.len(), 0);
    }

    #[test]
    fn test_soft_dependency_isolation() {
        let h = Harness::new(&["a.target", "b.target"]);
        h.dep("a.target", UnitRelations::UnitWants, "b.target");

        let a = h.submit("a.target", JobKind::Start, JobMode::Replace);
        h.report("b.target", UnitActiveState::Failed);
        assert_eq!(
            h.runner.actions(),
            vec![
                action("b.target", JobKind::Start),
                action("a.target", JobKind::Start)
            ]
        );
        h.report("a.target", UnitActiveState::Active);
        assert_eq!(h.sub.result_of(a), Some(JobResult::Done));
    }

    #[test]
    fn test_merge_idempotence() {
        let h = Harness::new(&["a.target", "b.target"]);
        h.dep("a.target", UnitRelations::UnitAfter, "b.target");
        h.submit("b.target", JobKind::Start, JobMode::Replace);

        let first = h.submit("a.target", JobKind::Start, JobMode::Replace);
        let second = h.submit("a.target", JobKind::Start, JobMode::Replace);
        assert_eq!(first, second);
        assert_eq!(h.jm.len(), 2);
        assert_eq!(h.jm.get_job(first).unwrap().stage, JobStage::Wait);
    }

    #[test]
    fn test_action_results() {
        let h = Harness::new(&["a.target", "b.target", "c.target"]);

        h.runner.answer("a.target", Error::UnitActionEAlready);
        let a = h.submit("a.target", JobKind::Start, JobMode::Replace);
        assert_eq!(h.sub.result_of(a), Some(JobResult::Done));

        h.runner.answer("b.target", Error::UnitActionEBadR);
        let b = h.submit("b.target", JobKind::Verify, JobMode::Replace);
        assert_eq!(h.sub.result_of(b), Some(JobResult::Skipped));

        /* busy: the job waits for the next round */
        h.runner.answer("c.target", Error::UnitActionEAgain);
        let c = h.submit("c.target", JobKind::Start, JobMode::Replace);
        assert_eq!(h.jm.get_job(c).unwrap().stage, JobStage::Wait);
        h.jm.dispatch(&h.runner);
        assert_eq!(h.jm.get_job(c).unwrap().stage, JobStage::Running);
    }

    #[test]
    fn test_restart_requeues() {
        let h = Harness::new(&["a.target"]);
        let id = h.submit("a.target", JobKind::Restart, JobMode::Replace);
        assert_eq!(h.runner.actions(), vec![action("a.target", JobKind::Stop)]);

        h.report("a.target", UnitActiveState::InActive);
        assert_eq!(h.jm.get_job(id).unwrap().run_kind, JobKind::Start);
        assert_eq!(
            h.runner.actions(),
            vec![
                action("a.target", JobKind::Stop),
                action("a.target", JobKind::Start)
            ]
        );
        h.report("a.target", UnitActiveState::Active);
        assert_eq!(h.sub.result_of(id), Some(JobResult::Done));
        assert_eq!(h.sub.count_of(id), 1);
    }

    #[test]
    fn test_replace_cancels_without_propagation() {
        let h = Harness::new(&["a.target", "b.target"]);
        h.dep("a.target", UnitRelations::UnitRequires, "b.target");
        h.dep("a.target", UnitRelations::UnitAfter, "b.target");
        h.runner.answer("b.target", Error::UnitActionEAgain);
        let a = h.submit("a.target", JobKind::Start, JobMode::Replace);
        let b = h.jm.get_job_id("b.target").unwrap();

        let stop = h.submit("b.target", JobKind::Stop, JobMode::Replace);
        assert_eq!(h.sub.result_of(b), Some(JobResult::Canceled));
        /* stopping b stops a too, replacing its start */
        assert_eq!(h.sub.result_of(a), Some(JobResult::Canceled));
        assert!(h.jm.get_job(stop).is_some());
    }

    #[test]
    fn test_cancel() {
        let h = Harness::new(&["a.target", "b.target"]);
        h.dep("a.target", UnitRelations::UnitRequires, "b.target");
        let a = h.submit("a.target", JobKind::Start, JobMode::Replace);
        let b = h.jm.get_job_id("b.target").unwrap();

        assert!(matches!(h.jm.cancel(b), Err(Error::JobRunning { .. })));
        assert!(matches!(h.jm.cancel(99), Err(Error::NoSuchJob { .. })));
        h.jm.cancel(a).unwrap();
        assert_eq!(h.sub.result_of(a), Some(JobResult::Canceled));
        assert!(h.jm.has_job("b.target"));
    }

    #[test]
    fn test_job_timeout() {
        let h = Harness::new(&["a.target", "b.target"]);
        let mut config = UnitConfig::new("b.target");
        config.JobTimeoutSec = Some(5);
        h.db.units_get("b.target")
            .unwrap()
            .load(&config, &UnitDefaults::default())
            .unwrap();
        h.dep("a.target", UnitRelations::UnitRequires, "b.target");

        let a = h.submit("a.target", JobKind::Start, JobMode::Replace);
        let b = h.jm.get_job_id("b.target").unwrap();
        assert_eq!(
            h.timers.borrow().deadline(&TimerKey::Job(b)),
            Some(5_000_000)
        );

        assert_eq!(h.jm.timeout(b), Some("b.target".to_string()));
        assert_eq!(h.sub.result_of(b), Some(JobResult::Timeout));
        assert_eq!(h.sub.result_of(a), Some(JobResult::Dependency));
        assert!(h.timers.borrow().is_empty());
    }

    #[test]
    fn test_restore() {
        let h = Harness::new(&["a.target"]);
        let mut job = Job::new(41, "a.target", JobKind::Start, JobAttr::default());
        job.deadline = Some(100);
        h.jm.restore(job);
        h.jm.coldplug();
        assert_eq!(h.jm.next_id(), 42);
        assert!(h.timers.borrow().is_armed(&TimerKey::Job(41)));

        h.jm.clear();
        assert_eq!(h.jm.len(), 0);
        assert!(h.timers.borrow().is_empty());
    }
}
