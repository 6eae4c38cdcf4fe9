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

//! Unit types, dependency kinds and the semantic atoms each kind carries.
//!
//! Nothing outside this file matches on a raw [`UnitRelations`] to decide behavior; callers
//! ask which relations carry an atom through [`relation_atoms`] / [`atom_relations`].
use bitflags::bitflags;
use std::str::FromStr;

#[allow(missing_docs)]
#[derive(PartialEq, Eq, Hash, Copy, Clone, Debug, PartialOrd, Ord)]
pub enum UnitType {
    UnitService,
    UnitTarget,
    UnitSocket,
    UnitMount,
    UnitScope,
    UnitDevice,
    UnitTimer,
}

impl UnitType {
    /// the name suffix of this type
    pub fn suffix(&self) -> &'static str {
        match self {
            UnitType::UnitService => "service",
            UnitType::UnitTarget => "target",
            UnitType::UnitSocket => "socket",
            UnitType::UnitMount => "mount",
            UnitType::UnitScope => "scope",
            UnitType::UnitDevice => "device",
            UnitType::UnitTimer => "timer",
        }
    }
}

impl FromStr for UnitType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ret = match s {
            "service" => UnitType::UnitService,
            "target" => UnitType::UnitTarget,
            "socket" => UnitType::UnitSocket,
            "mount" => UnitType::UnitMount,
            "scope" => UnitType::UnitScope,
            "device" => UnitType::UnitDevice,
            "timer" => UnitType::UnitTimer,
            _ => return Err(format!("unknown unit type '{}'", s)),
        };
        Ok(ret)
    }
}

impl std::fmt::Display for UnitType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.suffix())
    }
}

/// parse UnitType by unit_name
pub fn unit_name_to_type(unit_name: &str) -> Option<UnitType> {
    let (prefix, suffix) = unit_name.rsplit_once('.')?;
    if prefix.is_empty() {
        return None;
    }
    UnitType::from_str(suffix).ok()
}

#[allow(missing_docs)]
#[derive(Hash, PartialEq, Eq, Copy, Clone, Debug, PartialOrd, Ord)]
pub enum UnitRelations {
    UnitRequires,
    UnitRequisite,
    UnitWants,
    UnitBindsTo,
    UnitPartOf,

    UnitRequiresBy,
    UnitRequisiteOf,
    UnitWantsBy,
    UnitBoundBy,
    UnitConsistsOf,

    UnitConflicts,
    UnitConflictedBy,

    UnitBefore,
    UnitAfter,

    UnitOnSuccess,
    UnitOnSuccessOf,
    UnitOnFailure,
    UnitOnFailureOf,

    UnitTriggers,
    UnitTriggeredBy,

    UnitPropagatesReloadTo,
    UnitReloadPropagatedFrom,

    UnitPropagatesStopTo,
    UnitStopPropagatedFrom,

    UnitReferences,
    UnitReferencedBy,
}

const RELATION_NAMES: [(UnitRelations, &str); 26] = [
    (UnitRelations::UnitRequires, "Requires"),
    (UnitRelations::UnitRequisite, "Requisite"),
    (UnitRelations::UnitWants, "Wants"),
    (UnitRelations::UnitBindsTo, "BindsTo"),
    (UnitRelations::UnitPartOf, "PartOf"),
    (UnitRelations::UnitRequiresBy, "RequiredBy"),
    (UnitRelations::UnitRequisiteOf, "RequisiteOf"),
    (UnitRelations::UnitWantsBy, "WantedBy"),
    (UnitRelations::UnitBoundBy, "BoundBy"),
    (UnitRelations::UnitConsistsOf, "ConsistsOf"),
    (UnitRelations::UnitConflicts, "Conflicts"),
    (UnitRelations::UnitConflictedBy, "ConflictedBy"),
    (UnitRelations::UnitBefore, "Before"),
    (UnitRelations::UnitAfter, "After"),
    (UnitRelations::UnitOnSuccess, "OnSuccess"),
    (UnitRelations::UnitOnSuccessOf, "OnSuccessOf"),
    (UnitRelations::UnitOnFailure, "OnFailure"),
    (UnitRelations::UnitOnFailureOf, "OnFailureOf"),
    (UnitRelations::UnitTriggers, "Triggers"),
    (UnitRelations::UnitTriggeredBy, "TriggeredBy"),
    (UnitRelations::UnitPropagatesReloadTo, "PropagatesReloadTo"),
    (UnitRelations::UnitReloadPropagatedFrom, "ReloadPropagatedFrom"),
    (UnitRelations::UnitPropagatesStopTo, "PropagatesStopTo"),
    (UnitRelations::UnitStopPropagatedFrom, "StopPropagatedFrom"),
    (UnitRelations::UnitReferences, "References"),
    (UnitRelations::UnitReferencedBy, "ReferencedBy"),
];

impl UnitRelations {
    /// all relations
    pub fn iterator() -> impl Iterator<Item = UnitRelations> {
        RELATION_NAMES.iter().map(|(r, _)| *r)
    }

    /// The kind the graph inserts on the other end of an edge.
    pub fn inverse(&self) -> UnitRelations {
        match self {
            UnitRelations::UnitRequires => UnitRelations::UnitRequiresBy,
            UnitRelations::UnitRequisite => UnitRelations::UnitRequisiteOf,
            UnitRelations::UnitWants => UnitRelations::UnitWantsBy,
            UnitRelations::UnitBindsTo => UnitRelations::UnitBoundBy,
            UnitRelations::UnitPartOf => UnitRelations::UnitConsistsOf,
            UnitRelations::UnitRequiresBy => UnitRelations::UnitRequires,
            UnitRelations::UnitRequisiteOf => UnitRelations::UnitRequisite,
            UnitRelations::UnitWantsBy => UnitRelations::UnitWants,
            UnitRelations::UnitBoundBy => UnitRelations::UnitBindsTo,
            UnitRelations::UnitConsistsOf => UnitRelations::UnitPartOf,
            UnitRelations::UnitConflicts => UnitRelations::UnitConflictedBy,
            UnitRelations::UnitConflictedBy => UnitRelations::UnitConflicts,
            UnitRelations::UnitBefore => UnitRelations::UnitAfter,
            UnitRelations::UnitAfter => UnitRelations::UnitBefore,
            UnitRelations::UnitOnSuccess => UnitRelations::UnitOnSuccessOf,
            UnitRelations::UnitOnSuccessOf => UnitRelations::UnitOnSuccess,
            UnitRelations::UnitOnFailure => UnitRelations::UnitOnFailureOf,
            UnitRelations::UnitOnFailureOf => UnitRelations::UnitOnFailure,
            UnitRelations::UnitTriggers => UnitRelations::UnitTriggeredBy,
            UnitRelations::UnitTriggeredBy => UnitRelations::UnitTriggers,
            UnitRelations::UnitPropagatesReloadTo => UnitRelations::UnitReloadPropagatedFrom,
            UnitRelations::UnitReloadPropagatedFrom => UnitRelations::UnitPropagatesReloadTo,
            UnitRelations::UnitPropagatesStopTo => UnitRelations::UnitStopPropagatedFrom,
            UnitRelations::UnitStopPropagatedFrom => UnitRelations::UnitPropagatesStopTo,
            UnitRelations::UnitReferences => UnitRelations::UnitReferencedBy,
            UnitRelations::UnitReferencedBy => UnitRelations::UnitReferences,
        }
    }

    /// Kinds that only exist as the computed end of another kind.
    pub fn is_reverse(&self) -> bool {
        matches!(
            self,
            UnitRelations::UnitRequiresBy
                | UnitRelations::UnitRequisiteOf
                | UnitRelations::UnitWantsBy
                | UnitRelations::UnitBoundBy
                | UnitRelations::UnitConsistsOf
                | UnitRelations::UnitConflictedBy
                | UnitRelations::UnitOnSuccessOf
                | UnitRelations::UnitOnFailureOf
                | UnitRelations::UnitTriggeredBy
                | UnitRelations::UnitReloadPropagatedFrom
                | UnitRelations::UnitStopPropagatedFrom
                | UnitRelations::UnitReferencedBy
        )
    }

    ///
    pub fn is_ordering(&self) -> bool {
        matches!(self, UnitRelations::UnitBefore | UnitRelations::UnitAfter)
    }
}

impl std::fmt::Display for UnitRelations {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = RELATION_NAMES
            .iter()
            .find(|(r, _)| r == self)
            .map_or("Unknown", |(_, n)| *n);
        write!(f, "{}", name)
    }
}

impl FromStr for UnitRelations {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RELATION_NAMES
            .iter()
            .find(|(_, n)| *n == s)
            .map(|(r, _)| *r)
            .ok_or_else(|| format!("unknown dependency kind '{}'", s))
    }
}

bitflags! {
    /// What an edge means to the transaction builder and the dispatcher.
    pub struct UnitRelationAtom: u64 {
        /// start jobs pull in a start of the other end, failing with it
        const PULL_IN_START = 1 << 0;
        /// start jobs pull in a start of the other end, ignoring its failure
        const PULL_IN_START_IGNORED = 1 << 1;
        /// start jobs require the other end to be active already
        const PULL_IN_VERIFY = 1 << 2;
        /// start jobs pull in a stop of the other end
        const PULL_IN_STOP = 1 << 3;
        /// start jobs pull in a stop of the other end, ignoring its failure
        const PULL_IN_STOP_IGNORED = 1 << 4;
        /// unexpected activation starts the other end in replace mode
        const RETRO_ACTIVE_START_REPLACE = 1 << 5;
        /// unexpected activation starts the other end in fail mode
        const RETRO_ACTIVE_START_FAIL = 1 << 6;
        /// unexpected activation stops the other end
        const RETRO_ACTIVE_STOP_ON_START = 1 << 7;
        /// unexpected deactivation stops the other end
        const RETRO_ACTIVE_STOP_ON_STOP = 1 << 8;
        /// a failed start fails waiting start jobs of the other end
        const PROPAGATE_START_FAILURE = 1 << 9;
        /// a failed stop fails waiting start jobs of the other end
        const PROPAGATE_STOP_FAILURE = 1 << 10;
        /// stop jobs propagate to the other end
        const PROPAGATE_STOP = 1 << 11;
        /// restart jobs propagate to the other end as try-restart
        const PROPAGATE_RESTART = 1 << 12;
        /// reload jobs propagate to the other end as try-reload
        const PROPAGATES_RELOAD_TO = 1 << 13;
        ///
        const BEFORE = 1 << 14;
        ///
        const AFTER = 1 << 15;
        ///
        const ON_SUCCESS = 1 << 16;
        ///
        const ON_FAILURE = 1 << 17;
        ///
        const TRIGGERS = 1 << 18;
        ///
        const TRIGGERED_BY = 1 << 19;
        /// the edge orders its origin after its target unless told otherwise
        const IMPLIED_ORDER = 1 << 20;
        /// the edge is a hard requirement in either direction
        const HARD_REQUIREMENT = 1 << 21;
        ///
        const REFERENCES = 1 << 22;
        ///
        const REFERENCED_BY = 1 << 23;
    }
}

/// The atoms carried by `relation`.
pub fn relation_atoms(relation: UnitRelations) -> UnitRelationAtom {
    match relation {
        UnitRelations::UnitRequires | UnitRelations::UnitBindsTo => {
            UnitRelationAtom::PULL_IN_START
                | UnitRelationAtom::RETRO_ACTIVE_START_REPLACE
                | UnitRelationAtom::IMPLIED_ORDER
                | UnitRelationAtom::HARD_REQUIREMENT
        }
        UnitRelations::UnitRequisite => {
            UnitRelationAtom::PULL_IN_VERIFY
                | UnitRelationAtom::IMPLIED_ORDER
                | UnitRelationAtom::HARD_REQUIREMENT
        }
        UnitRelations::UnitWants => {
            UnitRelationAtom::PULL_IN_START_IGNORED
                | UnitRelationAtom::RETRO_ACTIVE_START_FAIL
                | UnitRelationAtom::IMPLIED_ORDER
        }
        UnitRelations::UnitRequiresBy => {
            UnitRelationAtom::PROPAGATE_STOP
                | UnitRelationAtom::PROPAGATE_RESTART
                | UnitRelationAtom::PROPAGATE_START_FAILURE
                | UnitRelationAtom::HARD_REQUIREMENT
        }
        UnitRelations::UnitRequisiteOf => {
            UnitRelationAtom::PROPAGATE_START_FAILURE | UnitRelationAtom::HARD_REQUIREMENT
        }
        UnitRelations::UnitBoundBy => {
            UnitRelationAtom::RETRO_ACTIVE_STOP_ON_STOP
                | UnitRelationAtom::PROPAGATE_STOP
                | UnitRelationAtom::PROPAGATE_RESTART
                | UnitRelationAtom::PROPAGATE_START_FAILURE
                | UnitRelationAtom::HARD_REQUIREMENT
        }
        UnitRelations::UnitConsistsOf => {
            UnitRelationAtom::PROPAGATE_STOP | UnitRelationAtom::PROPAGATE_RESTART
        }
        UnitRelations::UnitConflicts => {
            UnitRelationAtom::PULL_IN_STOP | UnitRelationAtom::RETRO_ACTIVE_STOP_ON_START
        }
        UnitRelations::UnitConflictedBy => {
            UnitRelationAtom::PULL_IN_STOP_IGNORED
                | UnitRelationAtom::RETRO_ACTIVE_STOP_ON_START
                | UnitRelationAtom::PROPAGATE_STOP_FAILURE
        }
        UnitRelations::UnitBefore => UnitRelationAtom::BEFORE,
        UnitRelations::UnitAfter => UnitRelationAtom::AFTER,
        UnitRelations::UnitOnSuccess => UnitRelationAtom::ON_SUCCESS,
        UnitRelations::UnitOnFailure => UnitRelationAtom::ON_FAILURE,
        UnitRelations::UnitTriggers => UnitRelationAtom::TRIGGERS,
        UnitRelations::UnitTriggeredBy => UnitRelationAtom::TRIGGERED_BY,
        UnitRelations::UnitPropagatesReloadTo => UnitRelationAtom::PROPAGATES_RELOAD_TO,
        UnitRelations::UnitPropagatesStopTo => {
            UnitRelationAtom::RETRO_ACTIVE_STOP_ON_STOP | UnitRelationAtom::PROPAGATE_STOP
        }
        UnitRelations::UnitReferences => UnitRelationAtom::REFERENCES,
        UnitRelations::UnitReferencedBy => UnitRelationAtom::REFERENCED_BY,
        UnitRelations::UnitPartOf
        | UnitRelations::UnitWantsBy
        | UnitRelations::UnitOnSuccessOf
        | UnitRelations::UnitOnFailureOf
        | UnitRelations::UnitReloadPropagatedFrom
        | UnitRelations::UnitStopPropagatedFrom => UnitRelationAtom::empty(),
    }
}

/// Every relation that carries any atom of `atom`.
pub fn atom_relations(atom: UnitRelationAtom) -> Vec<UnitRelations> {
    UnitRelations::iterator()
        .filter(|r| relation_atoms(*r).intersects(atom))
        .collect()
}

bitflags! {
    /// Where an edge came from; one edge may have several origins.
    pub struct UnitDependencyMask: u8 {
        /// written in the unit definition or added through the api
        const FILE = 1 << 0;
        /// implied by the unit type
        const IMPLICIT = 1 << 1;
        /// the default ordering implied by a requirement
        const DEFAULT = 1 << 2;
    }
}

impl UnitDependencyMask {
    /// An edge with any explicit origin is strong, a purely implied one is weak.
    pub fn is_explicit(&self) -> bool {
        self.contains(UnitDependencyMask::FILE)
    }
}

/// Check `from relation to` for the unit types involved. Reverse kinds are checked in their
/// forward orientation.
pub fn relation_is_valid(
    from: UnitType,
    relation: UnitRelations,
    to: UnitType,
) -> Result<(), &'static str> {
    let (origin, forward) = if relation.is_reverse() {
        (to, relation.inverse())
    } else {
        (from, relation)
    };

    if forward == UnitRelations::UnitTriggers
        && !matches!(origin, UnitType::UnitSocket | UnitType::UnitTimer)
    {
        return Err("only socket and timer units may trigger other units");
    }

    if origin == UnitType::UnitDevice
        && !matches!(
            forward,
            UnitRelations::UnitWants
                | UnitRelations::UnitBefore
                | UnitRelations::UnitAfter
                | UnitRelations::UnitPartOf
                | UnitRelations::UnitReferences
        )
    {
        return Err("device units only accept Wants, Before, After and PartOf");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inverse_is_involution() {
        for r in UnitRelations::iterator() {
            assert_eq!(r.inverse().inverse(), r);
            assert_ne!(r.inverse(), r);
            if r.is_reverse() {
                assert!(!r.inverse().is_reverse());
            }
        }
    }

    #[test]
    fn test_relation_names() {
        for r in UnitRelations::iterator() {
            assert_eq!(UnitRelations::from_str(&r.to_string()).unwrap(), r);
        }
        assert_eq!(
            UnitRelations::from_str("WantedBy").unwrap(),
            UnitRelations::UnitWantsBy
        );
        assert!(UnitRelations::from_str("Upholds").is_err());
    }

    #[test]
    fn test_atom_relations() {
        let rels = atom_relations(UnitRelationAtom::PULL_IN_START);
        assert_eq!(
            rels,
            vec![UnitRelations::UnitRequires, UnitRelations::UnitBindsTo]
        );
        let rels = atom_relations(UnitRelationAtom::PROPAGATE_START_FAILURE);
        assert_eq!(
            rels,
            vec![
                UnitRelations::UnitRequiresBy,
                UnitRelations::UnitRequisiteOf,
                UnitRelations::UnitBoundBy
            ]
        );
        assert!(!relation_atoms(UnitRelations::UnitWants)
            .contains(UnitRelationAtom::HARD_REQUIREMENT));
    }

    #[test]
    fn test_unit_name_to_type() {
        assert_eq!(unit_name_to_type("a.service"), Some(UnitType::UnitService));
        assert_eq!(unit_name_to_type("dev-sda.device"), Some(UnitType::UnitDevice));
        assert_eq!(unit_name_to_type("a.path"), None);
        assert_eq!(unit_name_to_type(".target"), None);
        assert_eq!(unit_name_to_type("plain"), None);
    }

    #[test]
    fn test_relation_validity() {
        use UnitRelations::*;
        use UnitType::*;
        assert!(relation_is_valid(UnitSocket, UnitTriggers, UnitService).is_ok());
        assert!(relation_is_valid(UnitService, UnitTriggers, UnitService).is_err());
        /* TriggeredBy is checked as the Triggers of its target */
        assert!(relation_is_valid(UnitService, UnitTriggeredBy, UnitTimer).is_ok());
        assert!(relation_is_valid(UnitService, UnitTriggeredBy, UnitTarget).is_err());

        assert!(relation_is_valid(UnitDevice, UnitWants, UnitService).is_ok());
        assert!(relation_is_valid(UnitDevice, UnitRequires, UnitService).is_err());
        /* a device may be required by others */
        assert!(relation_is_valid(UnitService, UnitBindsTo, UnitDevice).is_ok());
        assert!(relation_is_valid(UnitDevice, UnitRequiresBy, UnitService).is_ok());
        assert!(relation_is_valid(UnitService, UnitRequiresBy, UnitDevice).is_err());
    }
}
