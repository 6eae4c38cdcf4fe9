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

//! unitcore: the core of a service manager. Units, the dependency graph between them, the
//! jobs that move them between states and the loop feeding them events.
//!
//! dependency:
//!         [manager]
//!        ↙    ↓    ↘
//!    [job] → [unit] ← [coms]
//!               ↓
//!            [exec]

#[macro_use]
mod macros;

pub mod coms;
pub mod error;
pub mod exec;
pub mod job;
pub mod manager;
pub mod unit;

#[cfg(test)]
mod test_utils;

pub use error::*;
