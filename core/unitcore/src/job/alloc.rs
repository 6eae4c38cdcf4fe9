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

use super::entry::{Job, JobAttr, JobKind};
use std::cell::RefCell;

pub(super) struct JobAlloc {
    // owned objects
    data: RefCell<JobAllocData>,
}

impl JobAlloc {
    pub(super) fn new() -> JobAlloc {
        JobAlloc {
            data: RefCell::new(JobAllocData::new()),
        }
    }

    pub(super) fn clear(&self) {
        self.data.borrow_mut().clear();
    }

    pub(super) fn alloc(&self, unit: &str, kind: JobKind, attr: JobAttr) -> Job {
        let id = self.data.borrow_mut().alloc_id();
        Job::new(id, unit, kind, attr)
    }

    /// the id the next job will get
    pub(super) fn next_id(&self) -> u128 {
        self.data.borrow().next_id
    }

    /// Restore the counter, it never goes backwards.
    pub(super) fn set_next_id(&self, next_id: u128) {
        let mut data = self.data.borrow_mut();
        data.next_id = data.next_id.max(next_id);
    }
}

#[derive(Debug)]
struct JobAllocData {
    // status
    next_id: u128,
}

// the declaration "pub(self)" is for identification only.
impl JobAllocData {
    pub(self) fn new() -> JobAllocData {
        JobAllocData { next_id: 1 }
    }

    pub(self) fn clear(&mut self) {
        self.next_id = 1;
    }

    fn alloc_id(&mut self) -> u128 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_ids() {
        let alloc = JobAlloc::new();
        let a = alloc.alloc("a.target", JobKind::Start, JobAttr::default());
        let b = alloc.alloc("b.target", JobKind::Stop, JobAttr::default());
        assert_eq!((a.id, b.id), (1, 2));
        assert_eq!(alloc.next_id(), 3);

        alloc.set_next_id(10);
        alloc.set_next_id(5);
        assert_eq!(alloc.alloc("c.target", JobKind::Nop, JobAttr::default()).id, 10);

        alloc.clear();
        assert_eq!(alloc.next_id(), 1);
    }
}
