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

use crate::unit::deps::{atom_relations, UnitDependencyMask, UnitRelationAtom, UnitRelations};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;

/// Typed edges between units, every edge stored at both ends.
pub(super) struct UnitDep {
    data: RefCell<UnitDepData>,
}

impl UnitDep {
    pub(super) fn new() -> UnitDep {
        UnitDep {
            data: RefCell::new(UnitDepData::new()),
        }
    }

    pub(super) fn insert(
        &self,
        source: &str,
        relation: UnitRelations,
        dest: &str,
        reference: bool,
        mask: UnitDependencyMask,
    ) {
        self.data
            .borrow_mut()
            .insert(source, relation, dest, reference, mask);
    }

    pub(super) fn remove(&self, source: &str, relation: UnitRelations, dest: &str) {
        self.data.borrow_mut().remove(source, relation, dest)
    }

    /// Drop `mask` from an edge, the edge goes when no origin is left.
    pub(super) fn remove_mask(
        &self,
        source: &str,
        relation: UnitRelations,
        dest: &str,
        mask: UnitDependencyMask,
    ) {
        self.data
            .borrow_mut()
            .remove_mask(source, relation, dest, mask)
    }

    pub(super) fn remove_unit(&self, source: &str) {
        self.data.borrow_mut().remove_unit(source)
    }

    pub(super) fn gets(&self, source: &str, relation: UnitRelations) -> Vec<String> {
        self.data.borrow().gets(source, relation)
    }

    pub(super) fn gets_atom(&self, source: &str, atom: UnitRelationAtom) -> Vec<String> {
        let mut dests = BTreeSet::new();
        for relation in atom_relations(atom).iter() {
            dests.extend(self.gets(source, *relation));
        }
        dests.into_iter().collect()
    }

    pub(super) fn mask(
        &self,
        source: &str,
        relation: UnitRelations,
        dest: &str,
    ) -> Option<UnitDependencyMask> {
        self.data.borrow().mask(source, relation, dest)
    }

    pub(super) fn is_dep_with(&self, source: &str, relation: UnitRelations, dest: &str) -> bool {
        self.mask(source, relation, dest).is_some()
    }

    pub(super) fn is_dep_atom_with(
        &self,
        source: &str,
        atom: UnitRelationAtom,
        dest: &str,
    ) -> bool {
        for relation in atom_relations(atom).iter() {
            if self.is_dep_with(source, *relation, dest) {
                // something hits
                return true;
            }
        }
        false
    }

    /// The first destination of `relation` named strictly after `after`.
    pub(super) fn next_after(
        &self,
        source: &str,
        relation: UnitRelations,
        after: Option<&str>,
    ) -> Option<String> {
        self.data.borrow().next_after(source, relation, after)
    }

    pub(super) fn has_edges(&self, source: &str) -> bool {
        self.data.borrow().t.contains_key(source)
    }

    pub(super) fn entry_clear(&self) {
        self.data.borrow_mut().clear();
    }
}

#[allow(clippy::type_complexity)]
struct UnitDepData {
    // key: unit-source + UnitRelations, value: (unit-destination : mask)-list
    t: HashMap<String, HashMap<UnitRelations, BTreeMap<String, UnitDependencyMask>>>,
}

// the declaration "pub(self)" is for identification only.
impl UnitDepData {
    pub(self) fn new() -> UnitDepData {
        UnitDepData { t: HashMap::new() }
    }

    pub(self) fn clear(&mut self) {
        self.t.clear();
    }

    pub(self) fn insert(
        &mut self,
        source: &str,
        relation: UnitRelations,
        dest: &str,
        reference: bool,
        mask: UnitDependencyMask,
    ) {
        // insert in two-directions way
        self.insert_one_way(source, relation, dest, mask);
        self.insert_one_way(dest, relation.inverse(), source, mask);

        // process reference in two-directions way
        if reference {
            let ref_relation = UnitRelations::UnitReferences;
            self.insert_one_way(source, ref_relation, dest, mask);
            self.insert_one_way(dest, ref_relation.inverse(), source, mask);
        }
    }

    pub(self) fn remove(&mut self, source: &str, relation: UnitRelations, dest: &str) {
        // remove in two-directions way
        self.remove_one_way(source, relation, dest);
        self.remove_one_way(dest, relation.inverse(), source);

        if relation == UnitRelations::UnitReferences || relation == UnitRelations::UnitReferencedBy
        {
            return;
        }

        // the reference pair lives as long as any other edge between the two
        if !self.linked(source, dest) && !self.linked(dest, source) {
            self.remove_one_way(source, UnitRelations::UnitReferences, dest);
            self.remove_one_way(dest, UnitRelations::UnitReferencedBy, source);
            self.remove_one_way(dest, UnitRelations::UnitReferences, source);
            self.remove_one_way(source, UnitRelations::UnitReferencedBy, dest);
        }
    }

    pub(self) fn remove_mask(
        &mut self,
        source: &str,
        relation: UnitRelations,
        dest: &str,
        mask: UnitDependencyMask,
    ) {
        let left = match self.mask(source, relation, dest) {
            None => return,
            Some(m) => m - mask,
        };
        if left.is_empty() {
            self.remove(source, relation, dest);
            return;
        }
        self.set_mask(source, relation, dest, left);
        self.set_mask(dest, relation.inverse(), source, left);
    }

    pub(self) fn remove_unit(&mut self, source: &str) {
        if let Some(sv) = self.t.get(source) {
            let mut removes = Vec::new();
            for (relation, dv) in sv.iter() {
                for dest in dv.keys() {
                    removes.push((*relation, dest.clone()));
                }
            }

            for (relation, dest) in removes.iter() {
                self.remove_one_way(source, *relation, dest);
                self.remove_one_way(dest, relation.inverse(), source);
            }
        }
    }

    pub(self) fn gets(&self, source: &str, relation: UnitRelations) -> Vec<String> {
        self.t
            .get(source)
            .and_then(|sv| sv.get(&relation))
            .map_or_else(Vec::new, |dv| dv.keys().cloned().collect())
    }

    pub(self) fn mask(
        &self,
        source: &str,
        relation: UnitRelations,
        dest: &str,
    ) -> Option<UnitDependencyMask> {
        self.t
            .get(source)
            .and_then(|sv| sv.get(&relation))
            .and_then(|dv| dv.get(dest))
            .copied()
    }

    pub(self) fn next_after(
        &self,
        source: &str,
        relation: UnitRelations,
        after: Option<&str>,
    ) -> Option<String> {
        let dv = self.t.get(source)?.get(&relation)?;
        let lower = match after {
            None => Bound::Unbounded,
            Some(name) => Bound::Excluded(name.to_string()),
        };
        dv.range((lower, Bound::Unbounded))
            .next()
            .map(|(dest, _)| dest.clone())
    }

    fn linked(&self, source: &str, dest: &str) -> bool {
        match self.t.get(source) {
            None => false,
            Some(sv) => sv.iter().any(|(relation, dv)| {
                *relation != UnitRelations::UnitReferences
                    && *relation != UnitRelations::UnitReferencedBy
                    && dv.contains_key(dest)
            }),
        }
    }

    fn insert_one_way(
        &mut self,
        source: &str,
        relation: UnitRelations,
        dest: &str,
        mask: UnitDependencyMask,
    ) {
        let m = self
            .t
            .entry(source.to_string())
            .or_insert_with(HashMap::new)
            .entry(relation)
            .or_insert_with(BTreeMap::new)
            .entry(dest.to_string())
            .or_insert_with(UnitDependencyMask::empty);
        *m |= mask;
    }

    fn set_mask(
        &mut self,
        source: &str,
        relation: UnitRelations,
        dest: &str,
        mask: UnitDependencyMask,
    ) {
        if let Some(m) = self
            .t
            .get_mut(source)
            .and_then(|sv| sv.get_mut(&relation))
            .and_then(|dv| dv.get_mut(dest))
        {
            *m = mask;
        }
    }

    fn remove_one_way(&mut self, source: &str, relation: UnitRelations, dest: &str) {
        let sv = match self.t.get_mut(source) {
            None => return,
            Some(v) => v,
        };
        let map = match sv.get_mut(&relation) {
            None => return,
            Some(v) => v,
        };
        /* remove the 3-level map from bottom to top. */
        map.remove(dest);
        if map.is_empty() {
            sv.remove(&relation);
        }
        if sv.is_empty() {
            self.t.remove(source);
        }
    }
}
