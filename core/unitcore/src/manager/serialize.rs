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

//! The state file handed over across re-execution.
//!
//! ```text
//! version=1
//! next-job-id=7
//!
//! unit=a.service
//! load-state=loaded
//! state=running
//! ...
//! job-id=5
//! job-kind=start
//!
//! ```
//!
//! Unknown keys are skipped with a warning so that an older manager can read a newer file.
use crate::error::*;
use crate::job::{Job, JobAttr, JobKind, JobManager, JobStage};
use crate::unit::{UnitDb, UnitDefaults};
use snafu::ResultExt;
use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::path::Path;
use std::rc::Rc;

const STATE_VERSION: u32 = 1;

/// Write every unit and its job.
pub(super) fn state_serialize(db: &UnitDb, jm: &JobManager) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "version={}", STATE_VERSION);
    let _ = writeln!(out, "next-job-id={}", jm.next_id());
    out.push('\n');

    for unit in db.units_get_all(None) {
        let _ = writeln!(out, "unit={}", unit.id());
        for (key, value) in unit.serialize() {
            let _ = writeln!(out, "{}={}", key, value);
        }
        if let Some(job) = jm.snapshot(unit.id()) {
            job_serialize(&mut out, &job);
        }
        out.push('\n');
    }
    out
}

fn job_serialize(out: &mut String, job: &Job) {
    let exempt: Vec<&str> = job.order_exempt.iter().map(|s| s.as_str()).collect();
    let deadline = job
        .deadline
        .map_or_else(|| "-".to_string(), |d| d.to_string());
    let _ = writeln!(out, "job-id={}", job.id);
    let _ = writeln!(out, "job-kind={}", job.kind);
    let _ = writeln!(out, "job-run-kind={}", job.run_kind);
    let _ = writeln!(out, "job-stage={}", job.stage);
    let _ = writeln!(out, "job-deadline={}", deadline);
    let _ = writeln!(out, "job-irreversible={}", job.attr.irreversible);
    let _ = writeln!(out, "job-ignore-order={}", job.attr.ignore_order);
    let _ = writeln!(out, "job-order-exempt={}", exempt.join(" "));
}

/// The job keys of one group, collected until the group ends.
#[derive(Default)]
struct JobSnapshot {
    id: Option<u128>,
    kind: Option<JobKind>,
    run_kind: Option<JobKind>,
    stage: Option<JobStage>,
    deadline: Option<u64>,
    irreversible: bool,
    ignore_order: bool,
    order_exempt: BTreeSet<String>,
}

impl JobSnapshot {
    fn is_empty(&self) -> bool {
        self.id.is_none() && self.kind.is_none()
    }

    fn set(&mut self, key: &str, value: &str) -> Result<bool> {
        match key {
            "job-id" => self.id = Some(parse(key, value)?),
            "job-kind" => self.kind = Some(parse(key, value)?),
            "job-run-kind" => self.run_kind = Some(parse(key, value)?),
            "job-stage" => self.stage = Some(parse(key, value)?),
            "job-deadline" => {
                self.deadline = match value {
                    "-" => None,
                    v => Some(parse(key, v)?),
                }
            }
            "job-irreversible" => self.irreversible = parse(key, value)?,
            "job-ignore-order" => self.ignore_order = parse(key, value)?,
            "job-order-exempt" => {
                self.order_exempt = value.split_whitespace().map(|s| s.to_string()).collect()
            }
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn into_job(self, unit: &str) -> std::result::Result<Job, String> {
        let id = self.id.ok_or("job without job-id")?;
        let kind = self.kind.ok_or("job without job-kind")?;
        let mut job = Job::new(
            id,
            unit,
            kind,
            JobAttr::new(self.ignore_order, self.irreversible),
        );
        if let Some(run_kind) = self.run_kind {
            job.run_kind = run_kind;
        }
        job.stage = self.stage.unwrap_or(JobStage::Wait);
        job.deadline = self.deadline;
        job.order_exempt = self.order_exempt;
        Ok(job)
    }
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.parse::<T>().map_err(|_| Error::ConfigureError {
        msg: format!("invalid value '{}' of {}", value, key),
    })
}

/// The keys of one unit group, validated but not applied yet.
struct UnitGroup {
    unit: String,
    items: Vec<(usize, String, String)>,
    job: Option<Job>,
}

/// Restore units and jobs. Returns the restored unit names, in file order, for coldplug.
///
/// The whole file is parsed before any unit is touched, so a broken file changes nothing.
pub(super) fn state_deserialize(
    db: &Rc<UnitDb>,
    jm: &JobManager,
    defaults: &UnitDefaults,
    s: &str,
) -> Result<Vec<String>> {
    let (next_id, groups) = state_parse(defaults, s)?;

    let mut units = Vec::new();
    let mut jobs = Vec::new();
    for group in groups {
        let u = db
            .get_or_create(&group.unit, defaults)
            .map_err(|e| Error::Parse {
                line: group.items.first().map_or(0, |(line, _, _)| *line),
                what: e.to_string(),
            })?;
        for (line, key, value) in group.items.iter() {
            u.deserialize_item(key, value).map_err(|e| Error::Parse {
                line: *line,
                what: e.to_string(),
            })?;
        }
        if let Some(job) = group.job {
            jobs.push(job);
        }
        units.push(group.unit);
    }

    for name in units.iter() {
        if let Some(u) = db.units_get(name) {
            for pid in u.pids() {
                db.child_add_watch_pid(name, pid);
            }
        }
    }

    let mut max_id = 0;
    for job in jobs {
        max_id = max_id.max(job.id);
        jm.restore(job);
    }
    jm.set_next_id(next_id.max(max_id + 1));

    Ok(units)
}

/// Split the file into its header and unit groups. Every value is checked on a stub unit of
/// a scratch store.
fn state_parse(defaults: &UnitDefaults, s: &str) -> Result<(u128, Vec<UnitGroup>)> {
    let staging = UnitDb::new();
    let mut next_id: u128 = 1;
    let mut groups = Vec::new();

    let mut current: Option<(UnitGroup, JobSnapshot)> = None;
    let mut in_header = true;

    for (idx, raw) in s.lines().enumerate() {
        let line = idx + 1;
        let err = |what: String| Error::Parse { line, what };

        if raw.trim().is_empty() {
            if let Some((group, snapshot)) = current.take() {
                groups.push(group_close(group, snapshot, line)?);
            }
            in_header = false;
            continue;
        }

        let (key, value) = raw
            .split_once('=')
            .ok_or_else(|| err(format!("no '=' in '{}'", raw)))?;

        if in_header {
            match key {
                "version" => {
                    let version: u32 = parse(key, value).map_err(|e| err(e.to_string()))?;
                    if version > STATE_VERSION {
                        return Err(err(format!("unsupported version {}", version)));
                    }
                }
                "next-job-id" => next_id = parse(key, value).map_err(|e| err(e.to_string()))?,
                _ => log::warn!("Ignoring unknown state header key {} at line {}", key, line),
            }
            continue;
        }

        match current.as_mut() {
            None => {
                if key != "unit" {
                    return Err(err(format!("'{}' outside of a unit group", key)));
                }
                staging
                    .get_or_create(value, defaults)
                    .map_err(|e| err(e.to_string()))?;
                let group = UnitGroup {
                    unit: value.to_string(),
                    items: Vec::new(),
                    job: None,
                };
                current = Some((group, JobSnapshot::default()));
            }
            Some((group, snapshot)) => {
                if key.starts_with("job-") {
                    if !snapshot.set(key, value).map_err(|e| err(e.to_string()))? {
                        log::warn!("Ignoring unknown job key {} of {}", key, group.unit);
                    }
                    continue;
                }
                let stub = staging
                    .units_get(&group.unit)
                    .ok_or_else(|| err(format!("lost {}", group.unit)))?;
                if !stub.deserialize_item(key, value).map_err(|e| err(e.to_string()))? {
                    log::warn!("Ignoring unknown key {} of {}", key, group.unit);
                    continue;
                }
                group.items.push((line, key.to_string(), value.to_string()));
            }
        }
    }

    // the last group may miss its blank line
    if let Some((group, snapshot)) = current.take() {
        groups.push(group_close(group, snapshot, s.lines().count())?);
    }

    Ok((next_id, groups))
}

fn group_close(mut group: UnitGroup, snapshot: JobSnapshot, line: usize) -> Result<UnitGroup> {
    if !snapshot.is_empty() {
        let job = snapshot.into_job(&group.unit).map_err(|what| Error::Parse {
            line,
            what: what.to_string(),
        })?;
        group.job = Some(job);
    }
    Ok(group)
}

/// Write the state to `path`, replacing it atomically.
pub(super) fn state_write(path: &Path, state: &str) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).context(IoSnafu)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, state).context(IoSnafu)?;
    std::fs::rename(&tmp, path).context(IoSnafu)
}

pub(super) fn state_read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).context(IoSnafu)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobKind, JobMode, JobStage};
    use crate::test_utils::TestManager;
    use crate::unit::UnitActiveState;
    use libtests::get_clean_test_dir;

    const UNITS: &str = r#"
        [[Unit]]
        Name = "a.service"
        Service = { ExecStart = ["/bin/a"] }

        [[Unit]]
        Name = "b.service"
        Requires = ["a.service"]
        After = ["a.service"]
        Service = { Type = "oneshot", ExecStart = ["/bin/b"] }
    "#;

    fn reloaded(state: &str) -> TestManager {
        let fresh = TestManager::new(UNITS);
        fresh.mgr.deserialize(state).unwrap();
        fresh
    }

    #[test]
    fn test_round_trip() {
        let t = TestManager::new(UNITS);
        t.mgr
            .submit_job("b.service", JobKind::Start, JobMode::Replace)
            .unwrap();
        let a_pid = t.last_pid("a.service");
        let state = t.mgr.serialize();
        assert!(state.starts_with("version=1\n"));

        let r = reloaded(&state);
        assert_eq!(r.mgr.serialize(), state);

        let a = r.mgr.get_unit_state("a.service").unwrap();
        assert_eq!(a.active_state, UnitActiveState::Active);
        let b = r.mgr.get_unit_state("b.service").unwrap();
        let job = r.mgr.list_jobs();
        assert_eq!(job.len(), 1);
        assert_eq!(b.job_id, Some(job[0].id));
        assert_eq!(job[0].stage, JobStage::Running);

        /* the restored pid index still routes exits */
        r.exit(a_pid, 1);
        assert_eq!(
            r.mgr.get_unit_state("a.service").unwrap().active_state,
            UnitActiveState::Failed
        );
        /* coldplug spawns nothing */
        assert!(r.exec.spawned().is_empty());
    }

    #[test]
    fn test_next_job_id_survives() {
        let t = TestManager::new(UNITS);
        let (id, _) = t
            .mgr
            .submit_job("a.service", JobKind::Start, JobMode::Replace)
            .unwrap();
        t.exit(t.last_pid("a.service"), 0);
        assert!(t.mgr.list_jobs().is_empty());

        let r = reloaded(&t.mgr.serialize());
        let (next, _) = r
            .mgr
            .submit_job("b.service", JobKind::Start, JobMode::Replace)
            .unwrap();
        assert!(next > id);
    }

    #[test]
    fn test_unknown_keys() {
        let state = "version=1\nnext-job-id=4\nfuture=1\n\nunit=a.service\nload-state=loaded\nshiny=yes\n\n";
        let m = TestManager::new(UNITS);
        m.mgr.deserialize(state).unwrap();
        assert_eq!(
            m.mgr.get_unit_state("a.service").unwrap().active_state,
            UnitActiveState::InActive
        );
    }

    #[test]
    fn test_parse_errors() {
        let m = TestManager::new(UNITS);
        assert!(matches!(
            m.mgr.deserialize("version=1\n\nstate=running\n"),
            Err(Error::Parse { line: 3, .. })
        ));
        assert!(matches!(
            m.mgr.deserialize("version=1\n\nunit=a.service\nbroken\n"),
            Err(Error::Parse { line: 4, .. })
        ));
        assert!(matches!(
            m.mgr.deserialize("version=1\n\nunit=a.service\njob-kind=start\n\n"),
            Err(Error::Parse { line: 5, .. })
        ));
    }

    #[test]
    fn test_broken_file_changes_nothing() {
        let m = TestManager::new(UNITS);
        let before = m.mgr.serialize();

        /* a bad value after a good group */
        let state = "version=1\nnext-job-id=9\n\nunit=a.service\nstate=running\nmain-pid=42\n\nunit=c.service\nstate=bogus\n";
        assert!(matches!(
            m.mgr.deserialize(state),
            Err(Error::Parse { line: 9, .. })
        ));
        /* cut off in the middle of a job */
        let state = "version=1\n\nunit=a.service\nstate=running\njob-id=3\n";
        assert!(matches!(
            m.mgr.deserialize(state),
            Err(Error::Parse { line: 5, .. })
        ));

        assert_eq!(m.mgr.serialize(), before);
        assert_eq!(m.sub_state("a.service"), "dead");
        assert!(m.mgr.get_unit_state("c.service").is_err());
        assert!(m.mgr.list_jobs().is_empty());
    }

    #[test]
    fn test_state_file() {
        let dir = get_clean_test_dir("unitcore-state").unwrap();
        let path = dir.join("state");
        let t = TestManager::new(UNITS);
        t.mgr.serialize_to(&path).unwrap();

        let r = TestManager::new(UNITS);
        r.mgr.deserialize_from(&path).unwrap();
        assert_eq!(r.mgr.serialize(), t.mgr.serialize());
    }
}
