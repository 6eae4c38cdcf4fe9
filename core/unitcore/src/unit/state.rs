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

use bitflags::bitflags;
use std::str::FromStr;

/**Unit stats：
 ```graph LR
C[UnitInActive] -> E[UnitActivating]
E->A[UnitActive]
A->B[UnitReloading]
A->F[UnitDeActivating]
F->C
E->D[UnitFailed]
D->C
```
*/
#[derive(Eq, PartialEq, Clone, Copy, Debug)]
pub enum UnitActiveState {
    /// unit is activated
    Active,
    /// unit is in reloading
    Reloading,
    /// unit is not active
    InActive,
    /// unit action is failed
    Failed,
    /// unit is in starting
    Activating,
    /// unit is in stopping
    DeActivating,
    /// unit is in maintenance
    Maintenance,
}

impl UnitActiveState {
    ///
    pub fn is_active_or_reloading(&self) -> bool {
        matches!(self, UnitActiveState::Active | UnitActiveState::Reloading)
    }

    ///
    pub fn is_inactive_or_failed(&self) -> bool {
        matches!(self, UnitActiveState::InActive | UnitActiveState::Failed)
    }

    ///
    pub fn is_active_or_activating(&self) -> bool {
        matches!(
            self,
            UnitActiveState::Active | UnitActiveState::Activating | UnitActiveState::Reloading
        )
    }

    ///
    pub fn is_inactive_or_deactivating(&self) -> bool {
        matches!(
            self,
            UnitActiveState::InActive | UnitActiveState::Failed | UnitActiveState::DeActivating
        )
    }
}

impl std::fmt::Display for UnitActiveState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnitActiveState::Active => write!(f, "active"),
            UnitActiveState::Reloading => write!(f, "reloading"),
            UnitActiveState::InActive => write!(f, "inactive"),
            UnitActiveState::Failed => write!(f, "failed"),
            UnitActiveState::Activating => write!(f, "activating"),
            UnitActiveState::DeActivating => write!(f, "deactivating"),
            UnitActiveState::Maintenance => write!(f, "maintenance"),
        }
    }
}

/// How far the definition of a unit got.
#[derive(Eq, PartialEq, Clone, Copy, Debug)]
pub enum UnitLoadState {
    /// only referenced by name so far
    Stub,
    /// definition applied
    Loaded,
    /// no definition exists
    NotFound,
    /// the definition could not be applied
    Error,
    /// administratively disabled
    Masked,
}

impl UnitLoadState {
    /// whether the unit is a placeholder that gc may collect
    pub fn is_placeholder(&self) -> bool {
        matches!(self, UnitLoadState::Stub | UnitLoadState::NotFound)
    }
}

impl std::fmt::Display for UnitLoadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            UnitLoadState::Stub => "stub",
            UnitLoadState::Loaded => "loaded",
            UnitLoadState::NotFound => "not-found",
            UnitLoadState::Error => "error",
            UnitLoadState::Masked => "masked",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for UnitLoadState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stub" => Ok(UnitLoadState::Stub),
            "loaded" => Ok(UnitLoadState::Loaded),
            "not-found" => Ok(UnitLoadState::NotFound),
            "error" => Ok(UnitLoadState::Error),
            "masked" => Ok(UnitLoadState::Masked),
            _ => Err(format!("unknown load state '{}'", s)),
        }
    }
}

bitflags! {
    /// notify unit state to manager
    pub struct UnitNotifyFlags: u8 {
        /// the default flags propagate to jobs, it means nothing.
        const EMPTY = 0;
        /// notify that the unit running reload failure
        const RELOAD_FAILURE = 1 << 0;
        /// notify that the unit is in auto restart state
        const WILL_AUTO_RESTART = 1 << 1;
    }
}

/// The externally visible state of one unit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnitState {
    ///
    pub load_state: UnitLoadState,
    ///
    pub active_state: UnitActiveState,
    /// the variant's own state name
    pub sub_state: String,
    /// the accumulated result of the variant
    pub result: String,
    /// the job installed on the unit
    pub job_id: Option<u128>,
}
