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

use nix::unistd::Pid;
use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};

/// The pid index: which unit watches which process.
pub(super) struct UnitChild {
    data: RefCell<UnitChildData>,
}

impl UnitChild {
    pub(super) fn new() -> UnitChild {
        UnitChild {
            data: RefCell::new(UnitChildData::new()),
        }
    }

    pub(super) fn add_watch_pid(&self, id: &str, pid: Pid) {
        log::debug!("Adding watch_pids {} to {}", pid, id);
        self.data.borrow_mut().add_watch_pid(id, pid);
    }

    pub(super) fn unwatch_pid(&self, id: &str, pid: Pid) {
        log::debug!("Removing watch_pids {} from {}", pid, id);
        self.data.borrow_mut().unwatch_pid(id, pid);
    }

    pub(super) fn unwatch_all_pids(&self, id: &str) {
        log::debug!("Unwatching all watch_pids of {}", id);
        self.data.borrow_mut().remove_unit(id);
    }

    pub(super) fn get_unit_by_pid(&self, pid: Pid) -> Option<String> {
        self.data.borrow().watch_pids.get(&pid).cloned()
    }

    pub(super) fn get_pids(&self, id: &str) -> Vec<Pid> {
        self.data
            .borrow()
            .unit_pids
            .get(id)
            .map_or_else(Vec::new, |pids| pids.iter().copied().collect())
    }

    pub(super) fn has_pids(&self, id: &str) -> bool {
        self.data.borrow().unit_pids.contains_key(id)
    }

    pub(super) fn entry_clear(&self) {
        self.data.borrow_mut().clear();
    }
}

struct UnitChildData {
    watch_pids: HashMap<Pid, String>,            // key: pid, value: unit
    unit_pids: HashMap<String, BTreeSet<Pid>>, // key: unit, value: pids
}

// the declaration "pub(self)" is for identification only.
impl UnitChildData {
    pub(self) fn new() -> UnitChildData {
        UnitChildData {
            watch_pids: HashMap::new(),
            unit_pids: HashMap::new(),
        }
    }

    pub(self) fn clear(&mut self) {
        self.watch_pids.clear();
        self.unit_pids.clear();
    }

    pub(self) fn add_watch_pid(&mut self, id: &str, pid: Pid) {
        // a pid belongs to one unit, the latest watcher wins
        if let Some(old) = self.watch_pids.insert(pid, id.to_string()) {
            if old != id {
                self.remove_from_unit(&old, pid);
            }
        }
        self.unit_pids
            .entry(id.to_string())
            .or_insert_with(BTreeSet::new)
            .insert(pid);
    }

    pub(self) fn unwatch_pid(&mut self, id: &str, pid: Pid) {
        if matches!(self.watch_pids.get(&pid), Some(owner) if owner == id) {
            self.watch_pids.remove(&pid);
        }
        self.remove_from_unit(id, pid);
    }

    pub(self) fn remove_unit(&mut self, id: &str) {
        if let Some(pids) = self.unit_pids.remove(id) {
            for pid in pids {
                self.watch_pids.remove(&pid);
            }
        }
    }

    fn remove_from_unit(&mut self, id: &str, pid: Pid) {
        let empty = match self.unit_pids.get_mut(id) {
            None => return,
            Some(pids) => {
                pids.remove(&pid);
                pids.is_empty()
            }
        };
        if empty {
            self.unit_pids.remove(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watch_and_unwatch() {
        let child = UnitChild::new();
        let p1 = Pid::from_raw(10);
        let p2 = Pid::from_raw(11);
        child.add_watch_pid("a.service", p1);
        child.add_watch_pid("a.service", p2);
        assert_eq!(child.get_unit_by_pid(p1), Some("a.service".to_string()));
        assert_eq!(child.get_pids("a.service"), vec![p1, p2]);

        child.unwatch_pid("a.service", p1);
        assert_eq!(child.get_unit_by_pid(p1), None);
        assert!(child.has_pids("a.service"));

        child.unwatch_all_pids("a.service");
        assert!(!child.has_pids("a.service"));
        assert_eq!(child.get_unit_by_pid(p2), None);
    }

    #[test]
    fn test_pid_moves_to_latest_watcher() {
        let child = UnitChild::new();
        let pid = Pid::from_raw(20);
        child.add_watch_pid("a.service", pid);
        child.add_watch_pid("b.scope", pid);
        assert_eq!(child.get_unit_by_pid(pid), Some("b.scope".to_string()));
        assert!(!child.has_pids("a.service"));

        /* a stale unwatch of the old owner leaves the new one alone */
        child.unwatch_pid("a.service", pid);
        assert_eq!(child.get_unit_by_pid(pid), Some("b.scope".to_string()));
    }
}
