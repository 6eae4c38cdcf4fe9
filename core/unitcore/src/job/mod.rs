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

//! Jobs: the requests to change the state of a unit.
//!
//! A request goes through the transaction builder, which pulls in the jobs of the related
//! units, merges them with what is already installed and orders them. The job manager then
//! installs the result and dispatches the jobs whose ordering constraints are satisfied.
pub use entry::{JobInfo, JobKind, JobMode, JobNotification, JobResult, JobStage, JobSubscriber};

pub(crate) use entry::{Job, JobAttr};
pub(crate) use manager::{JobManager, JobRunner};

// dependency:
// entry -> {alloc | table | notify} -> transaction -> manager
mod alloc;
mod entry;
mod manager;
mod notify;
mod table;
mod transaction;
