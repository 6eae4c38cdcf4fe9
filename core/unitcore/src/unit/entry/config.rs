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

//! Unit definitions as read from a TOML unit set:
//!
//! ```toml
//! [[Unit]]
//! Name = "sshd.service"
//! Requires = ["network.target"]
//! After = ["network.target"]
//!
//! [Unit.Service]
//! ExecStart = ["/usr/sbin/sshd -D"]
//! Restart = "on-failure"
//! ```
#![allow(non_snake_case)]
use crate::coms::{SectionMount, SectionScope, SectionService, SectionSocket, SectionTimer};
use crate::error::*;
use crate::exec::EmergencyAction;
use crate::unit::deps::UnitRelations;
use event::time::{sec_to_usec, USEC_INFINITY, USEC_PER_SEC};
use serde::Deserialize;
use std::path::Path;

/// Manager-wide defaults a unit falls back to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UnitDefaults {
    ///
    pub timeout_start_usec: u64,
    ///
    pub timeout_stop_usec: u64,
    ///
    pub restart_usec: u64,
    ///
    pub start_limit_interval_usec: u64,
    ///
    pub start_limit_burst: u32,
    ///
    pub job_timeout_usec: u64,
}

impl Default for UnitDefaults {
    fn default() -> Self {
        UnitDefaults {
            timeout_start_usec: 90 * USEC_PER_SEC,
            timeout_stop_usec: 90 * USEC_PER_SEC,
            restart_usec: USEC_PER_SEC,
            start_limit_interval_usec: 10 * USEC_PER_SEC,
            start_limit_burst: 5,
            job_timeout_usec: USEC_INFINITY,
        }
    }
}

/// A timeout in seconds, 0 disables it.
pub fn timeout_usec(sec: Option<u64>, default: u64) -> u64 {
    sec.map_or(default, sec_to_usec)
}

/// A delay in seconds, 0 means right away.
pub fn delay_usec(sec: Option<u64>, default: u64) -> u64 {
    sec.map_or(default, |s| s.saturating_mul(USEC_PER_SEC))
}

/// A whole unit set file.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct UnitSet {
    ///
    pub Unit: Vec<UnitConfig>,
}

impl UnitSet {
    /// Parse a unit set.
    pub fn from_toml(s: &str) -> Result<UnitSet> {
        toml::from_str(s).context(TomlSnafu)
    }

    /// Read and parse a unit set file.
    pub fn from_file(path: &Path) -> Result<UnitSet> {
        let s = std::fs::read_to_string(path).context(IoSnafu)?;
        UnitSet::from_toml(&s)
    }
}

/// The definition of one unit.
#[allow(missing_docs)]
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct UnitConfig {
    pub Name: String,
    pub Description: String,

    pub Requires: Vec<String>,
    pub Requisite: Vec<String>,
    pub Wants: Vec<String>,
    pub BindsTo: Vec<String>,
    pub PartOf: Vec<String>,
    pub Conflicts: Vec<String>,
    pub Before: Vec<String>,
    pub After: Vec<String>,
    pub OnSuccess: Vec<String>,
    pub OnFailure: Vec<String>,
    pub PropagatesReloadTo: Vec<String>,
    pub PropagatesStopTo: Vec<String>,
    pub RequiredBy: Vec<String>,
    pub WantedBy: Vec<String>,

    pub DefaultDependencies: bool,
    pub RefuseManualStart: bool,
    pub RefuseManualStop: bool,
    pub AllowIsolate: bool,
    pub IgnoreOnIsolate: bool,
    pub Masked: bool,

    pub StartLimitIntervalSec: Option<u64>,
    pub StartLimitBurst: Option<u32>,
    pub StartLimitAction: EmergencyAction,
    pub FailureAction: EmergencyAction,
    pub SuccessAction: EmergencyAction,
    pub JobTimeoutSec: Option<u64>,
    pub JobTimeoutAction: EmergencyAction,

    pub Service: Option<SectionService>,
    pub Mount: Option<SectionMount>,
    pub Socket: Option<SectionSocket>,
    pub Timer: Option<SectionTimer>,
    pub Scope: Option<SectionScope>,
}

impl Default for UnitConfig {
    fn default() -> Self {
        UnitConfig {
            Name: String::new(),
            Description: String::new(),
            Requires: Vec::new(),
            Requisite: Vec::new(),
            Wants: Vec::new(),
            BindsTo: Vec::new(),
            PartOf: Vec::new(),
            Conflicts: Vec::new(),
            Before: Vec::new(),
            After: Vec::new(),
            OnSuccess: Vec::new(),
            OnFailure: Vec::new(),
            PropagatesReloadTo: Vec::new(),
            PropagatesStopTo: Vec::new(),
            RequiredBy: Vec::new(),
            WantedBy: Vec::new(),
            DefaultDependencies: true,
            RefuseManualStart: false,
            RefuseManualStop: false,
            AllowIsolate: false,
            IgnoreOnIsolate: false,
            Masked: false,
            StartLimitIntervalSec: None,
            StartLimitBurst: None,
            StartLimitAction: EmergencyAction::None,
            FailureAction: EmergencyAction::None,
            SuccessAction: EmergencyAction::None,
            JobTimeoutSec: None,
            JobTimeoutAction: EmergencyAction::None,
            Service: None,
            Mount: None,
            Socket: None,
            Timer: None,
            Scope: None,
        }
    }
}

impl UnitConfig {
    /// An empty definition of `name`.
    pub fn new(name: &str) -> UnitConfig {
        UnitConfig {
            Name: name.to_string(),
            ..Default::default()
        }
    }

    /// Every dependency written in the definition, in a fixed order.
    pub fn dependencies(&self) -> Vec<(UnitRelations, &str)> {
        let lists: [(UnitRelations, &Vec<String>); 14] = [
            (UnitRelations::UnitRequires, &self.Requires),
            (UnitRelations::UnitRequisite, &self.Requisite),
            (UnitRelations::UnitWants, &self.Wants),
            (UnitRelations::UnitBindsTo, &self.BindsTo),
            (UnitRelations::UnitPartOf, &self.PartOf),
            (UnitRelations::UnitConflicts, &self.Conflicts),
            (UnitRelations::UnitBefore, &self.Before),
            (UnitRelations::UnitAfter, &self.After),
            (UnitRelations::UnitOnSuccess, &self.OnSuccess),
            (UnitRelations::UnitOnFailure, &self.OnFailure),
            (UnitRelations::UnitPropagatesReloadTo, &self.PropagatesReloadTo),
            (UnitRelations::UnitPropagatesStopTo, &self.PropagatesStopTo),
            (UnitRelations::UnitRequiresBy, &self.RequiredBy),
            (UnitRelations::UnitWantsBy, &self.WantedBy),
        ];

        let mut deps = Vec::new();
        for (relation, names) in lists {
            for name in names {
                deps.push((relation, name.as_str()));
            }
        }
        deps
    }
}

/// The unit-type independent part of a loaded definition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct UnitConf {
    pub(crate) description: String,
    pub(crate) default_dependencies: bool,
    pub(crate) refuse_manual_start: bool,
    pub(crate) refuse_manual_stop: bool,
    pub(crate) allow_isolate: bool,
    pub(crate) ignore_on_isolate: bool,
    pub(crate) job_timeout_usec: u64,
    pub(crate) start_limit_action: EmergencyAction,
    pub(crate) failure_action: EmergencyAction,
    pub(crate) success_action: EmergencyAction,
    pub(crate) job_timeout_action: EmergencyAction,
}

impl UnitConf {
    pub(crate) fn new(defaults: &UnitDefaults) -> UnitConf {
        UnitConf {
            description: String::new(),
            default_dependencies: true,
            refuse_manual_start: false,
            refuse_manual_stop: false,
            allow_isolate: false,
            ignore_on_isolate: false,
            job_timeout_usec: defaults.job_timeout_usec,
            start_limit_action: EmergencyAction::None,
            failure_action: EmergencyAction::None,
            success_action: EmergencyAction::None,
            job_timeout_action: EmergencyAction::None,
        }
    }

    pub(crate) fn from_config(config: &UnitConfig, defaults: &UnitDefaults) -> UnitConf {
        UnitConf {
            description: config.Description.clone(),
            default_dependencies: config.DefaultDependencies,
            refuse_manual_start: config.RefuseManualStart,
            refuse_manual_stop: config.RefuseManualStop,
            allow_isolate: config.AllowIsolate,
            ignore_on_isolate: config.IgnoreOnIsolate,
            job_timeout_usec: timeout_usec(config.JobTimeoutSec, defaults.job_timeout_usec),
            start_limit_action: config.StartLimitAction,
            failure_action: config.FailureAction,
            success_action: config.SuccessAction,
            job_timeout_action: config.JobTimeoutAction,
        }
    }
}
