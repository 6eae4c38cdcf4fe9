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

//! The unit graph and everything a unit is made of.
//!
//! * `state`: the common active state, load state and notify flags;
//! * `deps`: unit types, relation kinds and their atoms;
//! * `entry`: the [`Unit`] itself and its definition;
//! * `datastore`: the graph holding the units, their edges and the pid index;
//! * `ctx`: the side-effect channel handed to the variants.
pub use datastore::{DepCursor, DepDirection};
pub use deps::{
    atom_relations, relation_atoms, relation_is_valid, unit_name_to_type, UnitDependencyMask,
    UnitRelationAtom, UnitRelations, UnitType,
};
pub use entry::{delay_usec, timeout_usec, Unit, UnitConfig, UnitDefaults, UnitSet};
pub use state::{UnitActiveState, UnitLoadState, UnitNotifyFlags, UnitState};

pub use ctx::TimerKey;
pub(crate) use ctx::{UnitCtx, UnitEffect};
pub(crate) use datastore::UnitDb;

// dependency:
// state -> deps -> ctx -> entry -> datastore
pub(crate) mod ctx;
mod datastore;
pub(crate) mod deps;
mod entry;
pub(crate) mod state;
