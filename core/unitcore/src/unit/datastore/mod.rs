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

//! The unit graph: units keyed by name, their typed edges and the pid index.
use super::deps::{
    relation_atoms, relation_is_valid, unit_name_to_type, UnitDependencyMask, UnitRelationAtom,
    UnitRelations, UnitType,
};
use super::entry::{Unit, UnitDefaults};
use crate::error::*;
use child::UnitChild;
use deps::UnitDep;
use nix::unistd::Pid;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

/// Which end of a relation [`DepCursor`] walks from.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DepDirection {
    /// units `name kind X` points at
    Forward,
    /// units with `X kind name`
    Reverse,
}

pub(crate) struct UnitDb {
    units: RefCell<BTreeMap<String, Rc<Unit>>>,
    dep: UnitDep,
    child: UnitChild,
}

impl Drop for UnitDb {
    fn drop(&mut self) {
        log::debug!("UnitDb drop, clear.");
        // repeating protection
        self.clear();
    }
}

impl UnitDb {
    pub(crate) fn new() -> UnitDb {
        UnitDb {
            units: RefCell::new(BTreeMap::new()),
            dep: UnitDep::new(),
            child: UnitChild::new(),
        }
    }

    pub(crate) fn units_get(&self, name: &str) -> Option<Rc<Unit>> {
        self.units.borrow().get(name).cloned()
    }

    /// All units in name order, optionally of one type.
    pub(crate) fn units_get_all(&self, unit_type: Option<UnitType>) -> Vec<Rc<Unit>> {
        let mut units: Vec<Rc<Unit>> = self.units.borrow().values().cloned().collect();
        units.retain(|ur| {
            if let Some(ut) = unit_type {
                ur.unit_type() == ut
            } else {
                true
            }
        });
        units
    }

    /// The unit called `name`, created as a stub when it is not known yet.
    pub(crate) fn get_or_create(&self, name: &str, defaults: &UnitDefaults) -> Result<Rc<Unit>> {
        if let Some(unit) = self.units_get(name) {
            return Ok(unit);
        }

        let unit_type = match (name.rsplit_once('.'), unit_name_to_type(name)) {
            (Some((prefix, _)), Some(t)) if !prefix.is_empty() && !prefix.contains('/') => t,
            _ => {
                return Err(Error::InvalidName {
                    name: name.to_string(),
                })
            }
        };

        log::debug!("Creating unit {} as stub", name);
        let unit = Rc::new(Unit::new(name, unit_type, defaults));
        self.units
            .borrow_mut()
            .insert(name.to_string(), Rc::clone(&unit));
        Ok(unit)
    }

    pub(crate) fn unit_remove(&self, name: &str) {
        self.child.unwatch_all_pids(name);
        self.dep.remove_unit(name);
        self.units.borrow_mut().remove(name);
    }

    /// Insert `source relation dest` with its inverse and a reference pair, plus the ordering
    /// implied by a requirement.
    pub(crate) fn dep_insert(
        &self,
        source: &str,
        relation: UnitRelations,
        dest: &str,
        mask: UnitDependencyMask,
    ) -> Result<()> {
        let invalid = |reason: &'static str| Error::InvalidDependency {
            from: source.to_string(),
            relation: relation.to_string(),
            to: dest.to_string(),
            reason,
        };

        let su = self.units_get(source).ok_or_else(|| Error::NoSuchUnit {
            name: source.to_string(),
        })?;
        let du = self.units_get(dest).ok_or_else(|| Error::NoSuchUnit {
            name: dest.to_string(),
        })?;
        if source == dest {
            return Err(invalid("a unit can not depend on itself"));
        }
        relation_is_valid(su.unit_type(), relation, du.unit_type()).map_err(invalid)?;

        self.dep.insert(source, relation, dest, true, mask);

        // look at the edge in its forward orientation
        let (origin, forward, target) = if relation.is_reverse() {
            (&du, relation.inverse(), &su)
        } else {
            (&su, relation, &du)
        };

        if forward.is_ordering() && mask.is_explicit() {
            // an explicit order replaces an implied one the other way round
            self.dep.remove_mask(
                origin.id(),
                forward.inverse(),
                target.id(),
                UnitDependencyMask::DEFAULT,
            );
        }

        if relation_atoms(forward).contains(UnitRelationAtom::IMPLIED_ORDER)
            && origin.default_dependencies()
            && !self.ordered(origin.id(), target.id())
        {
            log::debug!("Implying {} After {}", origin.id(), target.id());
            self.dep.insert(
                origin.id(),
                UnitRelations::UnitAfter,
                target.id(),
                true,
                UnitDependencyMask::DEFAULT,
            );
        }
        Ok(())
    }

    fn ordered(&self, a: &str, b: &str) -> bool {
        self.dep.is_dep_with(a, UnitRelations::UnitAfter, b)
            || self.dep.is_dep_with(a, UnitRelations::UnitBefore, b)
    }

    pub(crate) fn dep_remove(&self, source: &str, relation: UnitRelations, dest: &str) {
        self.dep.remove(source, relation, dest)
    }

    /// Forget the orderings implied for `name`, after it turned out to have none.
    pub(crate) fn dep_remove_implied(&self, name: &str) {
        for dest in self.dep.gets(name, UnitRelations::UnitAfter) {
            self.dep.remove_mask(
                name,
                UnitRelations::UnitAfter,
                &dest,
                UnitDependencyMask::DEFAULT,
            );
        }
    }

    pub(crate) fn dep_gets(&self, name: &str, relation: UnitRelations) -> Vec<String> {
        self.dep.gets(name, relation)
    }

    pub(crate) fn dep_gets_atom(&self, name: &str, atom: UnitRelationAtom) -> Vec<String> {
        self.dep.gets_atom(name, atom)
    }

    pub(crate) fn dep_mask(
        &self,
        source: &str,
        relation: UnitRelations,
        dest: &str,
    ) -> Option<UnitDependencyMask> {
        self.dep.mask(source, relation, dest)
    }

    pub(crate) fn dep_is_dep_atom_with(
        &self,
        source: &str,
        atom: UnitRelationAtom,
        dest: &str,
    ) -> bool {
        self.dep.is_dep_atom_with(source, atom, dest)
    }

    /// Walk the neighbors of `name` over `relation` in name order.
    pub(crate) fn neighbors(
        &self,
        name: &str,
        relation: UnitRelations,
        direction: DepDirection,
    ) -> DepCursor<'_> {
        let relation = match direction {
            DepDirection::Forward => relation,
            DepDirection::Reverse => relation.inverse(),
        };
        DepCursor {
            db: self,
            source: name.to_string(),
            relation,
            last: None,
        }
    }

    pub(crate) fn child_add_watch_pid(&self, id: &str, pid: Pid) {
        self.child.add_watch_pid(id, pid)
    }

    pub(crate) fn child_unwatch_pid(&self, id: &str, pid: Pid) {
        self.child.unwatch_pid(id, pid)
    }

    pub(crate) fn child_unwatch_all_pids(&self, id: &str) {
        self.child.unwatch_all_pids(id);
    }

    pub(crate) fn child_get_pids(&self, id: &str) -> Vec<Pid> {
        self.child.get_pids(id)
    }

    pub(crate) fn get_unit_by_pid(&self, pid: Pid) -> Option<Rc<Unit>> {
        let id = self.child.get_unit_by_pid(pid)?;
        self.units_get(&id)
    }

    /// Drop placeholder units nothing refers to. `pinned` tells about jobs and external
    /// references the graph does not see.
    pub(crate) fn gc_unreferenced(&self, pinned: &dyn Fn(&str) -> bool) -> Vec<String> {
        let mut removes = Vec::new();
        for unit in self.units_get_all(None) {
            let id = unit.id();
            if unit.load_state().is_placeholder()
                && unit.active_state().is_inactive_or_failed()
                && !self.dep.has_edges(id)
                && !self.child.has_pids(id)
                && !pinned(id)
            {
                removes.push(id.to_string());
            }
        }

        for id in removes.iter() {
            log::debug!("Collecting unreferenced unit {}", id);
            self.unit_remove(id);
        }
        removes
    }

    // repeating protection
    pub(crate) fn clear(&self) {
        self.child.entry_clear();
        self.dep.entry_clear();
        self.units.borrow_mut().clear();
    }
}

/// A restartable walk over the neighbors of one unit. It re-reads the graph on every step
/// and continues after the last returned name, so edges may change in between.
pub struct DepCursor<'a> {
    db: &'a UnitDb,
    source: String,
    relation: UnitRelations,
    last: Option<String>,
}

impl DepCursor<'_> {
    /// Start over from the first neighbor.
    pub fn restart(&mut self) {
        self.last = None;
    }
}

impl Iterator for DepCursor<'_> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        let next = self
            .db
            .dep
            .next_after(&self.source, self.relation, self.last.as_deref())?;
        self.last = Some(next.clone());
        Some(next)
    }
}

// dependency: {unit_dep | unit_child}
mod child;
mod deps;
