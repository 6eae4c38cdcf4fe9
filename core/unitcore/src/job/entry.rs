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

use crate::error::*;
use crate::unit::{UnitActiveState, UnitNotifyFlags, UnitRelationAtom};
use std::collections::BTreeSet;
use std::fmt;

/// The state change a job asks for.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub enum JobKind {
    // 'type' is better, but it's keyword in rust
    // basic kind
    /* mut: the stage of unit can be changed */
    ///
    Start,
    ///
    Stop,
    ///
    Reload,
    ///
    Restart,

    /* non-mut: the stage of unit can not be changed */
    /// the unit must be active already
    Verify,
    ///
    Nop,

    // compound kind, collapsed against the unit state before use
    ///
    TryRestart,
    ///
    TryReload,
    ///
    ReloadOrStart,
}

enum_names!(JobKind {
    Start => "start",
    Stop => "stop",
    Reload => "reload",
    Restart => "restart",
    Verify => "verify-active",
    Nop => "nop",
    TryRestart => "try-restart",
    TryReload => "try-reload",
    ReloadOrStart => "reload-or-start",
});

/// How a new request interacts with the jobs already queued.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum JobMode {
    /// fail if it conflicts with a queued job
    Fail,
    /// replace conflicting queued jobs
    Replace,
    /// replace, and may not be replaced itself
    ReplaceIrreversible,
    /// stop everything else
    Isolate,
    /// cancel every other queued job
    Flush,
    /// no expansion, no ordering
    IgnoreDependencies,
    /// no requirement pull-in
    IgnoreRequirements,
    /// stop the units triggering this one too
    Trigger,
}

enum_names!(JobMode {
    Fail => "fail",
    Replace => "replace",
    ReplaceIrreversible => "replace-irreversible",
    Isolate => "isolate",
    Flush => "flush",
    IgnoreDependencies => "ignore-dependencies",
    IgnoreRequirements => "ignore-requirements",
    Trigger => "trigger",
});

/// How a job ended.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum JobResult {
    ///
    Done,
    ///
    Canceled,
    ///
    Timeout,
    ///
    Failed,
    /// a hard dependency failed
    Dependency,
    /// the condition of a verify job did not hold
    Skipped,
    /// not applicable in the current unit state
    Invalid,
    /// not supported by the unit type
    UnSupported,
    /// folded into another job
    Merged,
}

enum_names!(JobResult {
    Done => "done",
    Canceled => "canceled",
    Timeout => "timeout",
    Failed => "failed",
    Dependency => "dependency",
    Skipped => "skipped",
    Invalid => "invalid",
    UnSupported => "unsupported",
    Merged => "merged",
});

///
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum JobStage {
    ///
    Wait,
    ///
    Running,
}

enum_names!(JobStage {
    Wait => "waiting",
    Running => "running",
});

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct JobAttr {
    pub(crate) ignore_order: bool,
    pub(crate) irreversible: bool,
}

impl JobAttr {
    pub(crate) fn new(ignore_order: bool, irreversible: bool) -> JobAttr {
        JobAttr {
            ignore_order,
            irreversible,
        }
    }

    pub(crate) fn or(&mut self, other: &Self) -> &Self {
        self.ignore_order |= other.ignore_order;
        self.irreversible |= other.irreversible;
        self
    }
}

/// One pending or running state-change request on one unit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Job {
    pub(crate) id: u128,
    pub(crate) unit: String,
    pub(crate) kind: JobKind,
    pub(crate) run_kind: JobKind,
    pub(crate) stage: JobStage,
    pub(crate) attr: JobAttr,
    pub(crate) deadline: Option<u64>,
    /// units this job is no longer ordered against, after cycle breaking
    pub(crate) order_exempt: BTreeSet<String>,
}

impl Job {
    pub(crate) fn new(id: u128, unit: &str, kind: JobKind, attr: JobAttr) -> Job {
        Job {
            id,
            unit: unit.to_string(),
            kind,
            run_kind: job_rkind_new(kind),
            stage: JobStage::Wait,
            attr,
            deadline: None,
            order_exempt: BTreeSet::new(),
        }
    }

    /// Whether `self` must wait for `other`, given the edge `atom` from self's unit to
    /// other's unit.
    pub(crate) fn is_order_with(&self, other: &Job, atom: UnitRelationAtom) -> i8 {
        if self.attr.ignore_order || other.attr.ignore_order {
            return 0;
        }
        if self.order_exempt.contains(&other.unit) || other.order_exempt.contains(&self.unit) {
            return 0;
        }
        job_order_compare(self.run_kind, other.run_kind, atom)
    }

    /// Move to the next run-kind after a successful step, true if there is one.
    pub(crate) fn update_runkind(&mut self) -> bool {
        let last_rkind = self.run_kind;
        self.run_kind = job_rkind_map(self.kind, last_rkind);
        last_rkind != self.run_kind
    }
}

/// The public snapshot of a job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobInfo {
    ///
    pub id: u128,
    ///
    pub unit: String,
    ///
    pub kind: JobKind,
    /// what the job currently executes, the stop half of a restart runs as stop
    pub run_kind: JobKind,
    ///
    pub stage: JobStage,
}

impl JobInfo {
    pub(crate) fn map(job: &Job) -> JobInfo {
        JobInfo {
            id: job.id,
            unit: job.unit.clone(),
            kind: job.kind,
            run_kind: job.run_kind,
            stage: job.stage,
        }
    }
}

impl fmt::Display for JobInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "job {} {}/{} {}",
            self.id, self.unit, self.kind, self.stage
        )
    }
}

/// Sent once per job when it reaches a terminal result.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobNotification {
    ///
    pub id: u128,
    ///
    pub unit: String,
    ///
    pub kind: JobKind,
    ///
    pub result: JobResult,
}

/// Receiver of job results.
pub trait JobSubscriber {
    /// `notification` is delivered exactly once per job
    fn job_finished(&self, notification: &JobNotification);
}

pub(crate) fn job_rkind_new(kind: JobKind) -> JobKind {
    match kind {
        JobKind::Restart => JobKind::Stop,
        _ => kind,
    }
}

fn job_rkind_map(kind: JobKind, last_rkind: JobKind) -> JobKind {
    match (kind, last_rkind) {
        (JobKind::Restart, JobKind::Stop) => JobKind::Start, // next: start
        (JobKind::Restart, JobKind::Start) => JobKind::Start, // next: nothing
        _ => kind,
    }
}

/// Resolve a compound kind against the unit's current state.
pub(crate) fn job_collapse(kind: JobKind, state: UnitActiveState, can_reload: bool) -> JobKind {
    let running = !state.is_inactive_or_deactivating();
    match (kind, running) {
        (JobKind::TryReload, false) => JobKind::Nop,
        (JobKind::TryReload, true) => JobKind::Reload,
        (JobKind::TryRestart, false) => JobKind::Nop,
        (JobKind::TryRestart, true) => JobKind::Restart,
        (JobKind::ReloadOrStart, true) if can_reload => JobKind::Reload,
        (JobKind::ReloadOrStart, _) => JobKind::Start,
        (kind, _) => kind,
    }
}

/// The kind doing the work of both, `None` when they conflict. The result may be compound.
pub(crate) fn job_merge(a: JobKind, b: JobKind) -> Option<JobKind> {
    if a == b {
        return Some(a);
    }

    match (a, b) {
        (JobKind::Nop, other) | (other, JobKind::Nop) => Some(other),
        (JobKind::Stop, _) | (_, JobKind::Stop) => None,
        (JobKind::Start, JobKind::Verify) | (JobKind::Verify, JobKind::Start) => {
            Some(JobKind::Start)
        }
        (JobKind::Start, JobKind::Reload) | (JobKind::Reload, JobKind::Start) => {
            Some(JobKind::ReloadOrStart)
        }
        (JobKind::Verify, JobKind::Reload) | (JobKind::Reload, JobKind::Verify) => {
            Some(JobKind::Reload)
        }
        (JobKind::Restart, JobKind::Start | JobKind::Verify | JobKind::Reload)
        | (JobKind::Start | JobKind::Verify | JobKind::Reload, JobKind::Restart) => {
            Some(JobKind::Restart)
        }
        _ => None,
    }
}

/// Whether a job of kind `a` already does everything `b` asks for.
pub(crate) fn job_is_superset(a: JobKind, b: JobKind) -> bool {
    if a == b || b == JobKind::Nop {
        return true;
    }

    matches!(
        (a, b),
        (JobKind::Start, JobKind::Verify)
            | (JobKind::Reload, JobKind::Verify)
            | (
                JobKind::Restart,
                JobKind::Start | JobKind::Verify | JobKind::Reload
            )
    )
}

/// Positive when `rk_a` has to wait for `rk_b` across an edge of `atom` from a to b.
pub(crate) fn job_order_compare(rk_a: JobKind, rk_b: JobKind, atom: UnitRelationAtom) -> i8 {
    if rk_a == JobKind::Nop || rk_b == JobKind::Nop {
        return 0; // independent
    }

    if atom == UnitRelationAtom::AFTER {
        return -job_order_compare(rk_b, rk_a, UnitRelationAtom::BEFORE);
    }

    match rk_b {
        JobKind::Stop => 1, // order: b -> a
        _ => -1,            // order: a -> b
    }
}

/// Map the error of a unit operation onto a job result; `None` means try again later.
pub(crate) fn job_trigger_err_to_result(err: Error) -> Option<JobResult> {
    match err {
        Error::UnitActionEAgain => None, // re-trigger again
        Error::UnitActionEAlready => Some(JobResult::Done), // over already
        Error::UnitActionEBadR => Some(JobResult::Skipped),
        Error::UnitActionENoExec => Some(JobResult::Invalid),
        Error::UnitActionEOpNotSupp => Some(JobResult::UnSupported),
        Error::UnitActionEFailed => Some(JobResult::Failed),
        Error::UnitActionECanceled => Some(JobResult::Failed),
        _ => Some(JobResult::Failed),
    }
}

/// Decide what a unit state change means for the job on the unit. The flag is false when
/// the change was not caused by the job.
pub(crate) fn job_process_unit(
    run_kind: JobKind,
    stage: JobStage,
    ns: UnitActiveState,
    flags: UnitNotifyFlags,
) -> (Option<JobResult>, bool) {
    let running = stage == JobStage::Running;
    match run_kind {
        JobKind::Start | JobKind::Verify => job_process_unit_start(running, ns, flags),
        JobKind::Stop => job_process_unit_stop(running, ns),
        JobKind::Reload if running => job_process_unit_reload(ns, flags),
        _ => (None, false),
    }
}

fn job_process_unit_start(
    running: bool,
    ns: UnitActiveState,
    flags: UnitNotifyFlags,
) -> (Option<JobResult>, bool) {
    if ns.is_active_or_reloading() {
        return (Some(JobResult::Done), true);
    }
    // the unit goes down only to come up again
    if flags.contains(UnitNotifyFlags::WILL_AUTO_RESTART) || ns == UnitActiveState::Activating {
        return (None, true);
    }
    if !running {
        return (None, false);
    }
    match ns {
        UnitActiveState::InActive => (Some(JobResult::Done), false),
        UnitActiveState::Failed => (Some(JobResult::Failed), false),
        _ => (None, false),
    }
}

fn job_process_unit_stop(running: bool, ns: UnitActiveState) -> (Option<JobResult>, bool) {
    match ns {
        UnitActiveState::InActive | UnitActiveState::Failed => (Some(JobResult::Done), true),
        UnitActiveState::DeActivating => (None, true),
        _ if running => (Some(JobResult::Failed), false),
        _ => (None, false),
    }
}

fn job_process_unit_reload(
    ns: UnitActiveState,
    flags: UnitNotifyFlags,
) -> (Option<JobResult>, bool) {
    let mut result = JobResult::Done;
    if flags.intersects(UnitNotifyFlags::RELOAD_FAILURE) {
        result = JobResult::Failed;
    }
    match ns {
        UnitActiveState::Active => (Some(result), true),
        UnitActiveState::Activating | UnitActiveState::Reloading => (None, true),
        _ => (Some(JobResult::Failed), false),
    }
}
