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

//! Min-heap of armed deadlines.
//!
//! Every key owns at most one deadline. Re-arming a key leaves the old heap entry in place and
//! bumps the key's sequence number; stale entries are skipped when they surface.
use crate::error::*;
use snafu::ResultExt;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::fmt::Debug;
use std::hash::Hash;

#[derive(Debug)]
struct ClockData<K> {
    deadline: u64,
    seq: u64,
    key: K,
}

// reversed: BinaryHeap is a max-heap
impl<K> Ord for ClockData<K> {
    fn cmp(&self, other: &Self) -> Ordering {
        (other.deadline, other.seq).cmp(&(self.deadline, self.seq))
    }
}

impl<K> PartialOrd for ClockData<K> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<K> PartialEq for ClockData<K> {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl<K> Eq for ClockData<K> {}

/// Deadlines keyed by `K`, popped in (deadline, arming order).
#[derive(Debug)]
pub struct TimerQueue<K> {
    heap: BinaryHeap<ClockData<K>>,
    armed: HashMap<K, (u64, u64)>,
    seq: u64,
}

impl<K> Default for TimerQueue<K>
where
    K: Clone + Eq + Hash + Debug,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> TimerQueue<K>
where
    K: Clone + Eq + Hash + Debug,
{
    /// create an empty queue
    pub fn new() -> TimerQueue<K> {
        TimerQueue {
            heap: BinaryHeap::new(),
            armed: HashMap::new(),
            seq: 0,
        }
    }

    /// Arm (or re-arm) `key` at the absolute monotonic `deadline`.
    pub fn arm(&mut self, key: K, deadline: u64) -> Result<()> {
        self.heap.try_reserve(1).context(AllocSnafu)?;
        self.armed.try_reserve(1).context(AllocSnafu)?;

        self.seq += 1;
        self.armed.insert(key.clone(), (deadline, self.seq));
        self.heap.push(ClockData {
            deadline,
            seq: self.seq,
            key,
        });
        self.compact();
        Ok(())
    }

    /// Disarm `key`, returns whether it was armed.
    pub fn disarm(&mut self, key: &K) -> bool {
        self.armed.remove(key).is_some()
    }

    /// whether `key` currently has a deadline
    pub fn is_armed(&self, key: &K) -> bool {
        self.armed.contains_key(key)
    }

    /// the deadline of `key`
    pub fn deadline(&self, key: &K) -> Option<u64> {
        self.armed.get(key).map(|(deadline, _)| *deadline)
    }

    /// The earliest live deadline.
    pub fn next_deadline(&mut self) -> Option<u64> {
        self.skip_stale();
        self.heap.peek().map(|cd| cd.deadline)
    }

    /// Remove and return every key whose deadline is at or before `now`.
    pub fn pop_expired(&mut self, now: u64) -> Vec<K> {
        let generation = self.generation();
        let mut expired = Vec::new();
        while let Some(key) = self.pop_next_expired(now, generation) {
            expired.push(key);
        }
        expired
    }

    /// The arming count so far. Keys armed later belong to a newer generation.
    pub fn generation(&self) -> u64 {
        self.seq
    }

    /// Remove and return the earliest live key due at `now` that was armed within
    /// `generation`.
    ///
    /// Popping one key per call lets the caller act on each before looking at the next, so a
    /// key disarmed or re-armed meanwhile is not returned for its old deadline.
    pub fn pop_next_expired(&mut self, now: u64, generation: u64) -> Option<K> {
        self.skip_stale();
        match self.heap.peek() {
            Some(cd) if cd.deadline <= now && cd.seq <= generation => {}
            _ => return None,
        }
        let cd = self.heap.pop()?;
        self.armed.remove(&cd.key);
        Some(cd.key)
    }

    /// number of armed keys
    pub fn len(&self) -> usize {
        self.armed.len()
    }

    /// no key is armed
    pub fn is_empty(&self) -> bool {
        self.armed.is_empty()
    }

    /// every armed key with its deadline, earliest first
    pub fn armed(&self) -> Vec<(K, u64)> {
        let mut all: Vec<(K, u64, u64)> = self
            .armed
            .iter()
            .map(|(k, (deadline, seq))| (k.clone(), *deadline, *seq))
            .collect();
        all.sort_by_key(|(_, deadline, seq)| (*deadline, *seq));
        all.into_iter().map(|(k, deadline, _)| (k, deadline)).collect()
    }

    fn is_live(&self, cd: &ClockData<K>) -> bool {
        matches!(self.armed.get(&cd.key), Some((_, seq)) if *seq == cd.seq)
    }

    fn skip_stale(&mut self) {
        while let Some(top) = self.heap.peek() {
            if self.is_live(top) {
                break;
            }
            self.heap.pop();
        }
    }

    fn compact(&mut self) {
        if self.heap.len() <= 2 * self.armed.len() + 16 {
            return;
        }
        let entries: Vec<ClockData<K>> = std::mem::take(&mut self.heap).into_vec();
        let live: Vec<ClockData<K>> = entries.into_iter().filter(|cd| self.is_live(cd)).collect();
        self.heap = BinaryHeap::from(live);
    }
}
