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

use std::collections::VecDeque;

/// Sliding window of start timestamps (usec, monotonic).
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StartLimit {
    interval: u64,
    burst: u32,
    stamps: VecDeque<u64>,
}

impl StartLimit {
    pub(crate) fn new(interval: u64, burst: u32) -> Self {
        StartLimit {
            interval,
            burst,
            stamps: VecDeque::new(),
        }
    }

    pub(crate) fn init_from_config(&mut self, interval: u64, burst: u32) {
        self.interval = interval;
        self.burst = burst;
        while self.stamps.len() > burst as usize {
            self.stamps.pop_front();
        }
    }

    fn ratelimit_enabled(&self) -> bool {
        self.interval > 0 && self.burst > 0
    }

    /// Record a start at `now`; false when it would exceed the burst within the interval.
    pub(crate) fn ratelimit_below(&mut self, now: u64) -> bool {
        if !self.ratelimit_enabled() {
            return true;
        }

        while let Some(first) = self.stamps.front() {
            if now.saturating_sub(*first) < self.interval {
                break;
            }
            self.stamps.pop_front();
        }

        if self.stamps.len() >= self.burst as usize {
            return false;
        }

        self.stamps.push_back(now);
        true
    }

    pub(crate) fn reset_limit(&mut self) {
        self.stamps.clear();
    }

    pub(crate) fn stamps(&self) -> Vec<u64> {
        self.stamps.iter().copied().collect()
    }

    pub(crate) fn restore(&mut self, stamps: &[u64]) {
        self.stamps = stamps.iter().copied().collect();
    }
}

#[cfg(test)]
mod tests {
    use super::StartLimit;

    #[test]
    fn test_ratelimit() {
        let mut tmp = StartLimit::new(0, 0);
        assert!(tmp.ratelimit_below(1));

        let mut tmp2 = StartLimit::new(10, 3);
        assert!(tmp2.ratelimit_below(1));
        assert!(tmp2.ratelimit_below(2));
        assert!(tmp2.ratelimit_below(3));
        assert!(!tmp2.ratelimit_below(4));
        /* the refused start is not recorded */
        assert_eq!(tmp2.stamps(), vec![1, 2, 3]);
        /* the first stamp slides out of the window */
        assert!(tmp2.ratelimit_below(11));
        assert!(!tmp2.ratelimit_below(12));
    }

    #[test]
    fn test_reset_and_restore() {
        let mut limit = StartLimit::new(100, 1);
        assert!(limit.ratelimit_below(5));
        assert!(!limit.ratelimit_below(6));
        limit.reset_limit();
        assert!(limit.ratelimit_below(7));

        let mut other = StartLimit::new(100, 1);
        other.restore(&limit.stamps());
        assert_eq!(other, limit);
    }
}
