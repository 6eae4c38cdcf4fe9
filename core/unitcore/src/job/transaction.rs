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

//! Turning one request into a transaction: expansion, isolation, merging, ordering and the
//! checks against the installed jobs. Nothing here mutates the installed state; the result
//! is applied by the job manager as a whole.
use super::entry::{job_collapse, job_merge, job_order_compare, job_rkind_new, JobAttr};
use super::entry::{JobKind, JobMode};
use super::table::JobTable;
use crate::error::*;
use crate::unit::{Unit, UnitDb, UnitLoadState, UnitRelationAtom, UnitRelations};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::rc::Rc;

type StageKey = (String, JobKind);

/// One job of a built transaction.
#[derive(Clone, Debug)]
pub(super) struct TrJob {
    pub(super) kind: JobKind,
    pub(super) attr: JobAttr,
    pub(super) matters: bool,
    pub(super) order_exempt: BTreeSet<String>,
    /// the installed job this one folds into, with the merged kind
    pub(super) merge_into: Option<(u128, JobKind)>,
}

pub(super) struct Transaction {
    pub(super) anchor: String,
    pub(super) mode: JobMode,
    pub(super) jobs: BTreeMap<String, TrJob>,
    /// installed jobs replaced by this transaction
    pub(super) replaces: Vec<u128>,
    /// installed jobs flushed by isolate or flush mode
    pub(super) cancels: Vec<u128>,
}

struct TransCtx<'a> {
    db: &'a UnitDb,
    jobs: &'a JobTable,
    mode: JobMode,
}

#[derive(Default)]
struct Stage {
    keys: BTreeSet<StageKey>,
    // (from, to, hard)
    links: Vec<(StageKey, StageKey, bool)>,
    roots: Vec<StageKey>,
}

impl Stage {
    fn record(&mut self, key: &StageKey, by: Option<(&StageKey, bool)>) -> bool {
        match by {
            Some((from, hard)) => self.links.push((from.clone(), key.clone(), hard)),
            None => self.roots.push(key.clone()),
        }
        self.keys.insert(key.clone())
    }

    fn has_unit(&self, unit: &str) -> bool {
        self.keys.iter().any(|(u, _)| u == unit)
    }

    /// Follow links from the roots, hard ones only if `hard_only`, never through `dropped`.
    fn reach(
        &self,
        roots: &[StageKey],
        hard_only: bool,
        dropped: &BTreeSet<StageKey>,
    ) -> BTreeSet<StageKey> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<StageKey> = roots
            .iter()
            .filter(|k| !dropped.contains(*k))
            .cloned()
            .collect();
        while let Some(key) = queue.pop_front() {
            if !seen.insert(key.clone()) {
                continue;
            }
            for (from, to, hard) in self.links.iter() {
                if *from == key && (*hard || !hard_only) && !dropped.contains(to) {
                    queue.push_back(to.clone());
                }
            }
        }
        seen
    }
}

/// Build the transaction for `kind` on `unit`. `manual` requests honor RefuseManual*.
pub(super) fn job_trans_build(
    db: &UnitDb,
    jobs: &JobTable,
    unit: &str,
    kind: JobKind,
    mode: JobMode,
    manual: bool,
) -> Result<Transaction> {
    let ctx = TransCtx { db, jobs, mode };

    // check input
    let u = db.units_get(unit).ok_or_else(|| Error::NoSuchUnit {
        name: unit.to_string(),
    })?;
    trans_check_anchor(&u, kind, mode, manual)?;

    // expand
    let mut stage = Stage::default();
    trans_expand(&ctx, &mut stage, unit, kind, None)?;

    // affect
    match mode {
        JobMode::Isolate => trans_affect_isolate(&ctx, &mut stage),
        JobMode::Trigger => trans_affect_trigger(&ctx, &mut stage, unit),
        _ => {}
    }

    // merge inside, order, merge against the installed jobs
    let mut tr = trans_merge_stage(&ctx, &stage, unit)?;
    trans_order(&ctx, &mut tr)?;
    trans_merge_installed(&ctx, &mut tr)?;
    trans_flush(&ctx, &mut tr);

    if !tr.jobs.contains_key(unit) {
        return Err(Error::TransactionAborted {
            reason: format!("the job for {} was dropped", unit),
        });
    }
    Ok(tr)
}

fn trans_check_anchor(u: &Rc<Unit>, kind: JobKind, mode: JobMode, manual: bool) -> Result<()> {
    let kind = job_collapse(kind, u.active_state(), u.can_reload());
    trans_expand_check_input(u, kind)?;

    if manual {
        let refused = match kind {
            JobKind::Start => u.refuse_manual_start(),
            JobKind::Stop => u.refuse_manual_stop(),
            JobKind::Restart => u.refuse_manual_start() || u.refuse_manual_stop(),
            _ => false,
        };
        if refused {
            return Err(Error::RefuseManual {
                name: u.id().to_string(),
            });
        }
    }

    if mode == JobMode::Isolate && (kind != JobKind::Start || !u.allow_isolate()) {
        return Err(Error::NoIsolation {
            name: u.id().to_string(),
        });
    }

    if mode == JobMode::Trigger && kind != JobKind::Stop {
        return Err(Error::InvalidJobType {
            name: u.id().to_string(),
            kind: kind.to_string(),
        });
    }
    Ok(())
}

fn trans_expand_check_input(u: &Unit, kind: JobKind) -> Result<()> {
    if !matches!(kind, JobKind::Stop | JobKind::Nop) && u.load_state() != UnitLoadState::Loaded {
        return Err(Error::NoSuchUnit {
            name: u.id().to_string(),
        });
    }

    if !u.job_is_applicable(kind) {
        return Err(Error::InvalidJobType {
            name: u.id().to_string(),
            kind: kind.to_string(),
        });
    }
    Ok(())
}

fn trans_expand(
    ctx: &TransCtx,
    stage: &mut Stage,
    unit: &str,
    kind: JobKind,
    by: Option<(&StageKey, bool)>,
) -> Result<()> {
    let u = ctx.db.units_get(unit).ok_or_else(|| Error::NoSuchUnit {
        name: unit.to_string(),
    })?;
    let kind = job_collapse(kind, u.active_state(), u.can_reload());
    if kind == JobKind::Nop && by.is_some() {
        return Ok(()); // a dependency with nothing to do
    }
    trans_expand_check_input(&u, kind)?;

    // record
    let key = (unit.to_string(), kind);
    let new = stage.record(&key, by);

    // expand
    if trans_is_expand(kind, new, ctx.mode) {
        match kind {
            JobKind::Start => trans_expand_start(ctx, stage, &key)?,
            JobKind::Stop => trans_expand_stop(ctx, stage, &key)?,
            JobKind::Reload => trans_expand_reload(ctx, stage, &key),
            JobKind::Restart => {
                trans_expand_start(ctx, stage, &key)?;
                trans_expand_stop(ctx, stage, &key)?
            }
            _ => {}
        }
    }

    Ok(())
}

/// A hard pull: errors abort the transaction, except the kind not applying to the unit.
fn trans_expand_hard(
    ctx: &TransCtx,
    stage: &mut Stage,
    unit: &str,
    kind: JobKind,
    by: &StageKey,
) -> Result<()> {
    match trans_expand(ctx, stage, unit, kind, Some((by, true))) {
        Err(Error::InvalidJobType { .. }) => Ok(()),
        r => r,
    }
}

/// A soft pull: errors are ignored.
fn trans_expand_soft(ctx: &TransCtx, stage: &mut Stage, unit: &str, kind: JobKind, by: &StageKey) {
    if let Err(e) = trans_expand(ctx, stage, unit, kind, Some((by, false))) {
        log::debug!("Ignoring {} of {} pulled in by {}: {}", kind, unit, by.0, e);
    }
}

fn trans_is_running_or_queued(ctx: &TransCtx, unit: &str) -> bool {
    let active = ctx
        .db
        .units_get(unit)
        .map_or(false, |u| !u.active_state().is_inactive_or_failed());
    active || ctx.jobs.has_job(unit)
}

fn trans_expand_start(ctx: &TransCtx, stage: &mut Stage, key: &StageKey) -> Result<()> {
    if ctx.mode == JobMode::IgnoreRequirements {
        return Ok(());
    }
    let db = ctx.db;
    let unit = &key.0;

    for other in db.dep_gets_atom(unit, UnitRelationAtom::PULL_IN_START).iter() {
        trans_expand_hard(ctx, stage, other, JobKind::Start, key)?;
    }

    for other in db.dep_gets_atom(unit, UnitRelationAtom::PULL_IN_START_IGNORED).iter() {
        trans_expand_soft(ctx, stage, other, JobKind::Start, key);
    }

    for other in db.dep_gets_atom(unit, UnitRelationAtom::PULL_IN_VERIFY).iter() {
        trans_expand_hard(ctx, stage, other, JobKind::Verify, key)?;
    }

    for other in db.dep_gets_atom(unit, UnitRelationAtom::PULL_IN_STOP).iter() {
        if trans_is_running_or_queued(ctx, other) {
            trans_expand_hard(ctx, stage, other, JobKind::Stop, key)?;
        }
    }

    for other in db.dep_gets_atom(unit, UnitRelationAtom::PULL_IN_STOP_IGNORED).iter() {
        if trans_is_running_or_queued(ctx, other) {
            trans_expand_soft(ctx, stage, other, JobKind::Stop, key);
        }
    }

    Ok(())
}

fn trans_expand_stop(ctx: &TransCtx, stage: &mut Stage, key: &StageKey) -> Result<()> {
    let (expand_atom, expand_kind) = match key.1 {
        JobKind::Restart => (UnitRelationAtom::PROPAGATE_RESTART, JobKind::TryRestart),
        _ => (UnitRelationAtom::PROPAGATE_STOP, JobKind::Stop),
    };

    for other in ctx.db.dep_gets_atom(&key.0, expand_atom).iter() {
        trans_expand_hard(ctx, stage, other, expand_kind, key)?;
    }

    Ok(())
}

fn trans_expand_reload(ctx: &TransCtx, stage: &mut Stage, key: &StageKey) {
    let atom = UnitRelationAtom::PROPAGATES_RELOAD_TO;
    for other in ctx.db.dep_gets_atom(&key.0, atom).iter() {
        trans_expand_soft(ctx, stage, other, JobKind::TryReload, key);
    }
}

fn trans_is_expand(kind: JobKind, new: bool, mode: JobMode) -> bool {
    // the job is a 'nop', nothing needs to be expanded.
    if kind == JobKind::Nop {
        return false;
    }

    // the job is not a new one, it has been expanded already.
    if !new {
        return false;
    }

    // the configuration tells us that expanding is ignored.
    mode != JobMode::IgnoreDependencies
}

fn trans_affect_isolate(ctx: &TransCtx, stage: &mut Stage) {
    for other in ctx.db.units_get_all(None).iter() {
        // it is allowed not to be affected by isolation
        if other.ignore_on_isolate() {
            continue;
        }

        // there is something assigned, not affected
        if stage.has_unit(other.id()) {
            continue;
        }

        if !trans_is_running_or_queued(ctx, other.id()) {
            continue;
        }

        // isolate(stop)
        if let Err(e) = trans_expand(ctx, stage, other.id(), JobKind::Stop, None) {
            log::debug!("Isolation does not stop {}: {}", other.id(), e);
        }
    }
}

fn trans_affect_trigger(ctx: &TransCtx, stage: &mut Stage, unit: &str) {
    for other in ctx
        .db
        .dep_gets_atom(unit, UnitRelationAtom::TRIGGERED_BY)
        .iter()
    {
        // there is something assigned, not affected
        if stage.has_unit(other) {
            continue;
        }

        // trigger(stop)
        if let Err(e) = trans_expand(ctx, stage, other, JobKind::Stop, None) {
            log::debug!("Trigger mode does not stop {}: {}", other, e);
        }
    }
}

/// Settle conflicts between the jobs of one unit, drop what is no longer pulled in, and
/// merge what is left into one job per unit.
fn trans_merge_stage(ctx: &TransCtx, stage: &Stage, anchor: &str) -> Result<Transaction> {
    let anchor_key = match stage.roots.first() {
        Some(k) => k.clone(),
        None => {
            return Err(Error::TransactionAborted {
                reason: format!("nothing to do for {}", anchor),
            })
        }
    };
    let matters = stage.reach(&[anchor_key], true, &BTreeSet::new());

    let mut by_unit: BTreeMap<&str, Vec<&StageKey>> = BTreeMap::new();
    for key in stage.keys.iter() {
        by_unit.entry(key.0.as_str()).or_default().push(key);
    }

    // conflicts
    let mut dropped = BTreeSet::new();
    for (unit, keys) in by_unit.iter() {
        let (stops, others): (Vec<&StageKey>, Vec<&StageKey>) = keys
            .iter()
            .filter(|k| k.1 != JobKind::Nop)
            .partition(|k| k.1 == JobKind::Stop);
        if stops.is_empty() || others.is_empty() {
            continue;
        }

        let stop_matters = stops.iter().any(|k| matters.contains(*k));
        let other_matters = others.iter().any(|k| matters.contains(*k));
        let losers = match (stop_matters, other_matters) {
            (true, true) => {
                return Err(Error::Conflict {
                    name: unit.to_string(),
                })
            }
            (true, false) => others,
            (false, _) => stops,
        };
        for key in losers {
            log::debug!("Dropping conflicting job {}/{}", key.0, key.1);
            dropped.insert(key.clone());
        }
    }

    // what is still pulled in
    let alive = stage.reach(&stage.roots, false, &dropped);

    // merge
    let attr = JobAttr::new(
        ctx.mode == JobMode::IgnoreDependencies,
        ctx.mode == JobMode::ReplaceIrreversible,
    );
    let mut jobs = BTreeMap::new();
    for (unit, keys) in by_unit.iter() {
        let mut merged: Option<JobKind> = None;
        let mut unit_matters = false;
        for key in keys.iter().filter(|k| alive.contains(**k)) {
            unit_matters |= matters.contains(*key);
            merged = match merged {
                None => Some(key.1),
                Some(kind) => job_merge(kind, key.1),
            };
            if merged.is_none() {
                return Err(Error::Conflict {
                    name: unit.to_string(),
                });
            }
        }

        let kind = match (merged, ctx.db.units_get(unit)) {
            (Some(kind), Some(u)) => job_collapse(kind, u.active_state(), u.can_reload()),
            _ => continue,
        };
        jobs.insert(
            unit.to_string(),
            TrJob {
                kind,
                attr,
                matters: unit_matters,
                order_exempt: BTreeSet::new(),
                merge_into: None,
            },
        );
    }

    Ok(Transaction {
        anchor: anchor.to_string(),
        mode: ctx.mode,
        jobs,
        replaces: Vec::new(),
        cancels: Vec::new(),
    })
}

type OrderEdges = BTreeMap<(String, String), bool>;

/// waiter -> awaited, with whether an explicit dependency backs the edge
fn trans_order_edges(ctx: &TransCtx, tr: &Transaction) -> OrderEdges {
    let mut edges = OrderEdges::new();
    for (a, ja) in tr.jobs.iter() {
        if ja.kind == JobKind::Nop {
            continue;
        }

        for (relation, atom) in [
            (UnitRelations::UnitAfter, UnitRelationAtom::AFTER),
            (UnitRelations::UnitBefore, UnitRelationAtom::BEFORE),
        ] {
            for b in ctx.db.dep_gets(a, relation) {
                let jb = match tr.jobs.get(&b) {
                    Some(j) => j,
                    None => continue,
                };
                let edge = match job_order_compare(job_rkind_new(ja.kind), job_rkind_new(jb.kind), atom)
                {
                    o if o > 0 => (a.clone(), b.clone()),
                    o if o < 0 => (b.clone(), a.clone()),
                    _ => continue,
                };
                let explicit = ctx
                    .db
                    .dep_mask(a, relation, &b)
                    .map_or(false, |m| m.is_explicit());
                *edges.entry(edge).or_insert(false) |= explicit;
            }
        }
    }
    edges
}

fn trans_find_cycle(edges: &OrderEdges) -> Option<Vec<String>> {
    let mut adj: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (w, a) in edges.keys() {
        adj.entry(w.as_str()).or_default().push(a.as_str());
    }

    fn visit<'a>(
        node: &'a str,
        adj: &BTreeMap<&'a str, Vec<&'a str>>,
        color: &mut HashMap<&'a str, u8>,
        path: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        color.insert(node, 1);
        path.push(node);
        for next in adj.get(node).into_iter().flatten() {
            match color.get(next).copied().unwrap_or(0) {
                0 => {
                    if let Some(c) = visit(next, adj, color, path) {
                        return Some(c);
                    }
                }
                1 => {
                    let pos = path.iter().position(|n| n == next).unwrap_or(0);
                    return Some(path[pos..].iter().map(|n| n.to_string()).collect());
                }
                _ => {}
            }
        }
        path.pop();
        color.insert(node, 2);
        None
    }

    let mut color = HashMap::new();
    for node in adj.keys() {
        if color.contains_key(node) {
            continue;
        }
        let mut path = Vec::new();
        if let Some(c) = visit(node, &adj, &mut color, &mut path) {
            return Some(c);
        }
    }
    None
}

/// Make the ordering of the transaction acyclic, dropping as little as possible.
fn trans_order(ctx: &TransCtx, tr: &mut Transaction) -> Result<()> {
    let mut edges = trans_order_edges(ctx, tr);

    while let Some(cycle) = trans_find_cycle(&edges) {
        let n = cycle.len();
        let protected = |w: &String, a: &String| {
            let matters = |u: &String| tr.jobs.get(u).map_or(false, |j| j.matters);
            ctx.db
                .dep_is_dep_atom_with(w, UnitRelationAtom::HARD_REQUIREMENT, a)
                && matters(w)
                && matters(a)
        };

        let weakest = (0..n)
            .map(|i| (cycle[i].clone(), cycle[(i + 1) % n].clone()))
            .filter(|(w, a)| !protected(w, a))
            .min_by_key(|(w, a)| {
                let explicit = edges.get(&(w.clone(), a.clone())).copied().unwrap_or(false);
                (explicit, w.clone(), a.clone())
            });

        if let Some((w, a)) = weakest {
            log::warn!(
                "Found ordering cycle on {}, dropping the order of {} after {}",
                cycle.join(" "),
                w,
                a
            );
            edges.remove(&(w.clone(), a.clone()));
            if let Some(job) = tr.jobs.get_mut(&w) {
                job.order_exempt.insert(a);
            }
            continue;
        }

        let victim = cycle
            .iter()
            .filter(|u| tr.jobs.get(*u).map_or(false, |j| !j.matters))
            .min()
            .cloned();
        match victim {
            Some(v) => {
                log::warn!(
                    "Found ordering cycle on {}, dropping the job of {}",
                    cycle.join(" "),
                    v
                );
                tr.jobs.remove(&v);
                edges.retain(|(w, a), _| *w != v && *a != v);
            }
            None => {
                return Err(Error::OrderCycle {
                    units: cycle.join(" "),
                })
            }
        }
    }

    Ok(())
}

fn trans_merge_installed(ctx: &TransCtx, tr: &mut Transaction) -> Result<()> {
    let units: Vec<String> = tr.jobs.keys().cloned().collect();
    for unit in units.iter() {
        let installed = match ctx.jobs.get_by_unit(unit) {
            Some(j) => j,
            None => continue,
        };
        let (kind, matters) = match tr.jobs.get(unit) {
            Some(j) => (j.kind, j.matters),
            None => continue,
        };

        if let Some(merged) = job_merge(installed.kind, kind) {
            let merged = match ctx.db.units_get(unit) {
                Some(u) => job_collapse(merged, u.active_state(), u.can_reload()),
                None => merged,
            };
            if let Some(j) = tr.jobs.get_mut(unit) {
                j.merge_into = Some((installed.id, merged));
            }
            continue;
        }

        // conflicting
        if !matters {
            log::debug!("Keeping installed job {} on {}", installed.id, unit);
            tr.jobs.remove(unit);
            continue;
        }
        if installed.attr.irreversible || tr.mode == JobMode::Fail {
            return Err(Error::Conflict { name: unit.clone() });
        }
        tr.replaces.push(installed.id);
    }

    Ok(())
}

fn trans_flush(ctx: &TransCtx, tr: &mut Transaction) {
    if !matches!(tr.mode, JobMode::Isolate | JobMode::Flush) {
        return;
    }

    for job in ctx.jobs.jobs() {
        if tr.jobs.contains_key(&job.unit) || tr.replaces.contains(&job.id) {
            continue;
        }
        let ignored = ctx
            .db
            .units_get(&job.unit)
            .map_or(false, |u| u.ignore_on_isolate());
        if ignored || job.attr.irreversible {
            continue;
        }
        tr.cancels.push(job.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::entry::Job;
    use crate::test_utils::FakeExecutor;
    use crate::unit::{TimerKey, UnitConfig, UnitCtx, UnitDefaults, UnitDependencyMask};
    use event::TimerQueue;
    use std::cell::RefCell;

    fn prepare_db(units: &[&str]) -> UnitDb {
        let defaults = UnitDefaults::default();
        let db = UnitDb::new();
        for name in units {
            let unit = db.get_or_create(name, &defaults).unwrap();
            unit.load(&UnitConfig::new(name), &defaults).unwrap();
        }
        db
    }

    fn dep(db: &UnitDb, from: &str, relation: UnitRelations, to: &str) {
        db.dep_insert(from, relation, to, UnitDependencyMask::FILE)
            .unwrap();
    }

    fn activate(db: &UnitDb, name: &str) {
        let exec = FakeExecutor::new();
        let timers = RefCell::new(TimerQueue::<TimerKey>::new());
        let mut ctx = UnitCtx::new(name, 0, &exec, &timers);
        db.units_get(name).unwrap().start(&mut ctx).unwrap();
    }

    fn kinds(tr: &Transaction) -> Vec<(String, JobKind)> {
        tr.jobs.iter().map(|(u, j)| (u.clone(), j.kind)).collect()
    }

    fn build(db: &UnitDb, jobs: &JobTable, unit: &str, kind: JobKind, mode: JobMode) -> Result<Transaction> {
        job_trans_build(db, jobs, unit, kind, mode, true)
    }

    #[test]
    fn test_expand_requires() {
        let db = prepare_db(&["a.target", "b.target", "c.target"]);
        dep(&db, "a.target", UnitRelations::UnitRequires, "b.target");
        dep(&db, "a.target", UnitRelations::UnitWants, "c.target");
        let jobs = JobTable::new();

        let tr = build(&db, &jobs, "a.target", JobKind::Start, JobMode::Replace).unwrap();
        assert_eq!(
            kinds(&tr),
            vec![
                ("a.target".to_string(), JobKind::Start),
                ("b.target".to_string(), JobKind::Start),
                ("c.target".to_string(), JobKind::Start),
            ]
        );
        assert!(tr.jobs["b.target"].matters);
        assert!(!tr.jobs["c.target"].matters);

        let tr = build(&db, &jobs, "a.target", JobKind::Start, JobMode::IgnoreRequirements).unwrap();
        assert_eq!(tr.jobs.len(), 1);
    }

    #[test]
    fn test_expand_stop_propagation() {
        let db = prepare_db(&["a.target", "b.target"]);
        dep(&db, "a.target", UnitRelations::UnitRequires, "b.target");
        let jobs = JobTable::new();

        /* stopping b stops a, restarting an inactive b leaves a alone */
        let tr = build(&db, &jobs, "b.target", JobKind::Stop, JobMode::Replace).unwrap();
        assert_eq!(tr.jobs["a.target"].kind, JobKind::Stop);

        let tr = build(&db, &jobs, "b.target", JobKind::Restart, JobMode::Replace).unwrap();
        assert!(!tr.jobs.contains_key("a.target"));

        activate(&db, "a.target");
        activate(&db, "b.target");
        let tr = build(&db, &jobs, "b.target", JobKind::Restart, JobMode::Replace).unwrap();
        assert_eq!(tr.jobs["a.target"].kind, JobKind::Restart);
    }

    #[test]
    fn test_anchor_checks() {
        let defaults = UnitDefaults::default();
        let db = prepare_db(&["a.target"]);
        db.get_or_create("stub.target", &defaults).unwrap();
        let jobs = JobTable::new();

        assert!(matches!(
            build(&db, &jobs, "none.target", JobKind::Start, JobMode::Replace),
            Err(Error::NoSuchUnit { .. })
        ));
        assert!(matches!(
            build(&db, &jobs, "stub.target", JobKind::Start, JobMode::Replace),
            Err(Error::NoSuchUnit { .. })
        ));
        assert!(build(&db, &jobs, "stub.target", JobKind::Stop, JobMode::Replace).is_ok());
        assert!(matches!(
            build(&db, &jobs, "a.target", JobKind::Reload, JobMode::Replace),
            Err(Error::InvalidJobType { .. })
        ));
        assert!(matches!(
            build(&db, &jobs, "a.target", JobKind::Start, JobMode::Isolate),
            Err(Error::NoIsolation { .. })
        ));

        let unit = db.units_get("a.target").unwrap();
        let mut config = UnitConfig::new("a.target");
        config.RefuseManualStart = true;
        unit.load(&config, &defaults).unwrap();
        assert!(matches!(
            build(&db, &jobs, "a.target", JobKind::Start, JobMode::Replace),
            Err(Error::RefuseManual { .. })
        ));
        assert!(job_trans_build(&db, &jobs, "a.target", JobKind::Start, JobMode::Replace, false).is_ok());
    }

    #[test]
    fn test_missing_hard_dependency() {
        let defaults = UnitDefaults::default();
        let db = prepare_db(&["a.target", "b.target"]);
        db.get_or_create("missing.target", &defaults).unwrap();
        dep(&db, "a.target", UnitRelations::UnitWants, "missing.target");
        let jobs = JobTable::new();
        let tr = build(&db, &jobs, "a.target", JobKind::Start, JobMode::Replace).unwrap();
        assert_eq!(tr.jobs.len(), 1);

        dep(&db, "b.target", UnitRelations::UnitRequires, "missing.target");
        assert!(matches!(
            build(&db, &jobs, "b.target", JobKind::Start, JobMode::Replace),
            Err(Error::NoSuchUnit { .. })
        ));
    }

    #[test]
    fn test_conflicts() {
        let db = prepare_db(&["a.target", "b.target", "c.target"]);
        dep(&db, "a.target", UnitRelations::UnitRequires, "b.target");
        dep(&db, "a.target", UnitRelations::UnitConflicts, "b.target");
        dep(&db, "c.target", UnitRelations::UnitWants, "b.target");
        dep(&db, "c.target", UnitRelations::UnitConflicts, "b.target");
        let jobs = JobTable::new();
        activate(&db, "b.target");

        /* both sides matter */
        assert!(matches!(
            build(&db, &jobs, "a.target", JobKind::Start, JobMode::Replace),
            Err(Error::Conflict { .. })
        ));

        /* the wanted start does not matter, the stop wins */
        let tr = build(&db, &jobs, "c.target", JobKind::Start, JobMode::Replace).unwrap();
        assert_eq!(tr.jobs["b.target"].kind, JobKind::Stop);
    }

    #[test]
    fn test_merge_kinds() {
        let db = prepare_db(&["a.target", "b.target"]);
        dep(&db, "a.target", UnitRelations::UnitRequires, "b.target");
        dep(&db, "a.target", UnitRelations::UnitRequisite, "b.target");
        let jobs = JobTable::new();

        let tr = build(&db, &jobs, "a.target", JobKind::Start, JobMode::Replace).unwrap();
        assert_eq!(tr.jobs["b.target"].kind, JobKind::Start);
    }

    #[test]
    fn test_order_requires_after() {
        let db = prepare_db(&["a.target", "b.target"]);
        dep(&db, "a.target", UnitRelations::UnitRequires, "b.target");
        dep(&db, "a.target", UnitRelations::UnitAfter, "b.target");
        let jobs = JobTable::new();

        let tr = build(&db, &jobs, "a.target", JobKind::Start, JobMode::Replace).unwrap();
        let edges = trans_order_edges(
            &TransCtx {
                db: &db,
                jobs: &jobs,
                mode: JobMode::Replace,
            },
            &tr,
        );
        assert_eq!(
            edges.into_iter().collect::<Vec<_>>(),
            vec![(("a.target".to_string(), "b.target".to_string()), true)]
        );
    }

    #[test]
    fn test_cycle_drops_lowest_waiter() {
        let mut config = UnitConfig::new("x");
        config.DefaultDependencies = false;
        let defaults = UnitDefaults::default();
        let db = UnitDb::new();
        for name in ["a.target", "b.target", "c.target"] {
            config.Name = name.to_string();
            db.get_or_create(name, &defaults)
                .unwrap()
                .load(&config, &defaults)
                .unwrap();
        }
        dep(&db, "a.target", UnitRelations::UnitWants, "b.target");
        dep(&db, "a.target", UnitRelations::UnitWants, "c.target");
        dep(&db, "a.target", UnitRelations::UnitAfter, "b.target");
        dep(&db, "b.target", UnitRelations::UnitAfter, "c.target");
        dep(&db, "c.target", UnitRelations::UnitAfter, "a.target");
        let jobs = JobTable::new();

        let tr = build(&db, &jobs, "a.target", JobKind::Start, JobMode::Replace).unwrap();
        assert_eq!(tr.jobs.len(), 3);
        assert!(tr.jobs["a.target"].order_exempt.contains("b.target"));
        assert!(tr.jobs["b.target"].order_exempt.is_empty());
    }

    #[test]
    fn test_cycle_implied_edge_first() {
        let db = prepare_db(&["a.target", "b.target"]);
        /* a Wants b implies a After b, the explicit b After a stays */
        dep(&db, "a.target", UnitRelations::UnitWants, "b.target");
        dep(&db, "b.target", UnitRelations::UnitAfter, "a.target");
        db.dep_insert(
            "a.target",
            UnitRelations::UnitAfter,
            "b.target",
            UnitDependencyMask::DEFAULT,
        )
        .unwrap();
        let jobs = JobTable::new();

        let tr = build(&db, &jobs, "a.target", JobKind::Start, JobMode::Replace).unwrap();
        assert!(tr.jobs["a.target"].order_exempt.contains("b.target"));
    }

    #[test]
    fn test_overlapping_cycles_leave_acyclic_order() {
        let mut config = UnitConfig::new("x");
        config.DefaultDependencies = false;
        let defaults = UnitDefaults::default();
        let db = UnitDb::new();
        let names = ["a.target", "b.target", "c.target", "d.target", "e.target", "x.target"];
        for name in names {
            config.Name = name.to_string();
            db.get_or_create(name, &defaults)
                .unwrap()
                .load(&config, &defaults)
                .unwrap();
        }
        for name in &names[..5] {
            dep(&db, "x.target", UnitRelations::UnitWants, name);
        }
        /* a b c, b d e, b c e and a b d all close a loop */
        dep(&db, "a.target", UnitRelations::UnitAfter, "b.target");
        dep(&db, "b.target", UnitRelations::UnitAfter, "c.target");
        dep(&db, "c.target", UnitRelations::UnitAfter, "a.target");
        dep(&db, "b.target", UnitRelations::UnitAfter, "d.target");
        dep(&db, "d.target", UnitRelations::UnitAfter, "e.target");
        dep(&db, "e.target", UnitRelations::UnitAfter, "b.target");
        dep(&db, "c.target", UnitRelations::UnitAfter, "e.target");
        dep(&db, "a.target", UnitRelations::UnitBefore, "d.target");
        let jobs = JobTable::new();

        let tr = build(&db, &jobs, "x.target", JobKind::Start, JobMode::Replace).unwrap();
        assert_eq!(tr.jobs.len(), 6);

        let ctx = TransCtx {
            db: &db,
            jobs: &jobs,
            mode: JobMode::Replace,
        };
        let all = trans_order_edges(&ctx, &tr);
        let mut left: Vec<(String, String)> = all
            .into_keys()
            .filter(|(w, a)| !tr.jobs[w].order_exempt.contains(a))
            .collect();
        let dropped: usize = tr.jobs.values().map(|j| j.order_exempt.len()).sum();
        assert!(dropped > 0);
        assert!(!left.is_empty());

        /* peel off edges onto units that wait for nothing; a cycle never peels */
        loop {
            let waiting: BTreeSet<String> = left.iter().map(|(w, _)| w.clone()).collect();
            let before = left.len();
            left.retain(|(_, a)| waiting.contains(a));
            if left.len() == before {
                break;
            }
        }
        assert!(left.is_empty(), "order still cyclic: {:?}", left);
    }

    #[test]
    fn test_protected_cycle() {
        let db = prepare_db(&["a.target", "b.target", "x.target"]);
        dep(&db, "a.target", UnitRelations::UnitRequires, "b.target");
        dep(&db, "a.target", UnitRelations::UnitAfter, "b.target");
        dep(&db, "b.target", UnitRelations::UnitAfter, "a.target");
        let jobs = JobTable::new();
        match build(&db, &jobs, "a.target", JobKind::Start, JobMode::Replace) {
            Err(Error::OrderCycle { units }) => assert_eq!(units, "a.target b.target"),
            _ => panic!("the cycle is protected"),
        }

        /* pulled in softly the same cycle is not protected */
        dep(&db, "x.target", UnitRelations::UnitWants, "a.target");
        let tr = build(&db, &jobs, "x.target", JobKind::Start, JobMode::Replace).unwrap();
        assert!(tr.jobs["a.target"].order_exempt.contains("b.target"));
    }

    #[test]
    fn test_merge_installed() {
        let db = prepare_db(&["a.target", "b.target"]);
        dep(&db, "a.target", UnitRelations::UnitWants, "b.target");
        let jobs = JobTable::new();
        jobs.insert(Job::new(7, "a.target", JobKind::Start, JobAttr::default()));
        jobs.insert(Job::new(8, "b.target", JobKind::Stop, JobAttr::default()));

        /* the wanted start of b does not matter and gives way to the installed stop */
        let tr = build(&db, &jobs, "a.target", JobKind::Start, JobMode::Replace).unwrap();
        assert_eq!(tr.jobs["a.target"].merge_into, Some((7, JobKind::Start)));
        assert!(!tr.jobs.contains_key("b.target"));
        assert!(tr.replaces.is_empty());

        /* a stop that matters replaces, or fails in fail mode */
        let tr = build(&db, &jobs, "a.target", JobKind::Stop, JobMode::Replace).unwrap();
        assert_eq!(tr.replaces, vec![7]);
        assert!(matches!(
            build(&db, &jobs, "a.target", JobKind::Stop, JobMode::Fail),
            Err(Error::Conflict { .. })
        ));

        jobs.remove(7);
        jobs.insert(Job::new(9, "a.target", JobKind::Start, JobAttr::new(false, true)));
        assert!(matches!(
            build(&db, &jobs, "a.target", JobKind::Stop, JobMode::Replace),
            Err(Error::Conflict { .. })
        ));
    }

    #[test]
    fn test_isolate() {
        let db = prepare_db(&["a.target", "b.target", "c.target", "d.target"]);
        let unit = db.units_get("a.target").unwrap();
        let mut config = UnitConfig::new("a.target");
        config.AllowIsolate = true;
        unit.load(&config, &UnitDefaults::default()).unwrap();

        let unit = db.units_get("d.target").unwrap();
        let mut config = UnitConfig::new("d.target");
        config.IgnoreOnIsolate = true;
        unit.load(&config, &UnitDefaults::default()).unwrap();

        for u in ["a.target", "b.target", "c.target", "d.target"] {
            activate(&db, u);
        }
        let jobs = JobTable::new();
        let tr = build(&db, &jobs, "a.target", JobKind::Start, JobMode::Isolate).unwrap();
        assert_eq!(
            kinds(&tr),
            vec![
                ("a.target".to_string(), JobKind::Start),
                ("b.target".to_string(), JobKind::Stop),
                ("c.target".to_string(), JobKind::Stop),
            ]
        );
    }

    #[test]
    fn test_flush_and_trigger() {
        let db = prepare_db(&["a.target", "b.target"]);
        let jobs = JobTable::new();
        jobs.insert(Job::new(3, "b.target", JobKind::Start, JobAttr::default()));

        let tr = build(&db, &jobs, "a.target", JobKind::Start, JobMode::Flush).unwrap();
        assert_eq!(tr.cancels, vec![3]);

        assert!(matches!(
            build(&db, &jobs, "a.target", JobKind::Start, JobMode::Trigger),
            Err(Error::InvalidJobType { .. })
        ));
    }
}
