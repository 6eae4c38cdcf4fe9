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

//! Service units run a main process, optionally with pre/post and stop commands.
//!
//! The sub-state machine:
//!
//! dead -> start-pre -> start -> start-post -> running/exited -> stop -> stop-sigterm ->
//! stop-sigkill -> stop-post -> final-sigterm -> final-sigkill -> dead/failed
//!
//! With `Restart=` a dead or failed service moves to auto-restart and queues a restart job
//! once `RestartSec` elapsed.

mod mng;
mod rentry;

pub(super) use mng::ServiceUnit;
pub use rentry::SectionService;
