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

use super::entry::{Job, JobInfo, JobStage};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};

/// The installed jobs, at most one per unit.
pub(super) struct JobTable {
    // key: job-id | unit, value: job
    t_id: RefCell<BTreeMap<u128, Job>>, // id order is dispatch order
    t_unit: RefCell<HashMap<String, u128>>,
}

impl JobTable {
    pub(super) fn new() -> JobTable {
        JobTable {
            t_id: RefCell::new(BTreeMap::new()),
            t_unit: RefCell::new(HashMap::new()),
        }
    }

    pub(super) fn clear(&self) {
        self.t_id.borrow_mut().clear();
        self.t_unit.borrow_mut().clear();
    }

    /// Install `job`, false if its unit already has one.
    pub(super) fn insert(&self, job: Job) -> bool {
        if self.t_unit.borrow().contains_key(&job.unit) {
            log::error!("{} already has a job installed, not adding {}", job.unit, job.id);
            return false;
        }
        self.t_unit.borrow_mut().insert(job.unit.clone(), job.id);
        self.t_id.borrow_mut().insert(job.id, job);
        true
    }

    /// Write back a modified copy of an installed job.
    pub(super) fn update(&self, job: &Job) {
        if let Some(j) = self.t_id.borrow_mut().get_mut(&job.id) {
            *j = job.clone();
        }
    }

    pub(super) fn remove(&self, id: u128) -> Option<Job> {
        let job = self.t_id.borrow_mut().remove(&id)?;
        self.t_unit.borrow_mut().remove(&job.unit);
        Some(job)
    }

    pub(super) fn get(&self, id: u128) -> Option<Job> {
        self.t_id.borrow().get(&id).cloned()
    }

    pub(super) fn get_by_unit(&self, unit: &str) -> Option<Job> {
        let id = *self.t_unit.borrow().get(unit)?;
        self.get(id)
    }

    pub(super) fn has_job(&self, unit: &str) -> bool {
        self.t_unit.borrow().contains_key(unit)
    }

    pub(super) fn set_stage(&self, id: u128, stage: JobStage) {
        if let Some(j) = self.t_id.borrow_mut().get_mut(&id) {
            j.stage = stage;
        }
    }

    /// the waiting jobs in id order
    pub(super) fn waiting_ids(&self) -> Vec<u128> {
        self.t_id
            .borrow()
            .values()
            .filter(|j| j.stage == JobStage::Wait)
            .map(|j| j.id)
            .collect()
    }

    pub(super) fn jobs(&self) -> Vec<Job> {
        self.t_id.borrow().values().cloned().collect()
    }

    pub(super) fn infos(&self) -> Vec<JobInfo> {
        self.t_id.borrow().values().map(JobInfo::map).collect()
    }

    pub(super) fn len(&self) -> usize {
        self.t_id.borrow().len()
    }

    #[allow(dead_code)]
    pub(super) fn is_empty(&self) -> bool {
        self.t_id.borrow().is_empty()
    }
}
