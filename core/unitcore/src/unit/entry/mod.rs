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

//! The common part of every unit: name, type, load state, the type independent definition,
//! the start limit and the variant doing the actual work.
//!
//! A unit goes through two stages:
//! 1. Load stage: a definition from the unit set is applied; until then the unit is a stub
//!    created because something referenced its name.
//! 2. Execution stage: the job dispatcher calls start/stop/reload, the manager routes process
//!    exits, timeouts and external events to it.
//!
//! ``` toml
//! [[Unit]]        # settings shared by all unit types, see config::UnitConfig
//! [Unit.Service]  # the table of the unit type
//! ```
pub use config::{delay_usec, timeout_usec, UnitConfig, UnitDefaults, UnitSet};
pub use uentry::Unit;

// dependency:
// config -> ratelimit -> uentry
mod config;
mod ratelimit;
mod uentry;
