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

//
#![allow(non_snake_case)]

use crate::unit::UnitDefaults;
use confique::{Config, FileFormat, Partial};
use event::time::{sec_to_usec, USEC_PER_SEC};

pub const SYSTEM_CONFIG: &str = "/etc/unitcore/system.conf";

/// The manager's own configuration.
#[derive(Config, Debug)]
pub struct ManagerConfig {
    #[config(default = 90)]
    pub DefaultTimeoutStartSec: u64,
    #[config(default = 90)]
    pub DefaultTimeoutStopSec: u64,
    #[config(default = 1)]
    pub DefaultRestartSec: u64,
    #[config(default = 10)]
    pub DefaultStartLimitIntervalSec: u64,
    #[config(default = 5)]
    pub DefaultStartLimitBurst: u32,
    /// 0 means jobs never time out
    #[config(default = 0)]
    pub DefaultJobTimeoutSec: u64,
    #[config(default = "default.target")]
    pub DefaultTarget: String,

    #[config(default = "info")]
    pub LogLevel: String,
    #[config(default = "syslog")]
    pub LogTarget: String,
    #[config(default = "/var/log/unitcore/unitcore.log")]
    pub LogFile: String,
    #[config(default = 10240)]
    pub LogFileSize: u32,
    #[config(default = 10)]
    pub LogFileNumber: u32,

    #[config(default = "/run/unitcore/state")]
    pub StateFile: String,
    #[config(default = "/etc/unitcore/units.toml")]
    pub UnitsFile: String,
}

impl ManagerConfig {
    pub fn new(file: Option<&str>) -> ManagerConfig {
        type ConfigPartial = <ManagerConfig as Config>::Partial;
        let mut partial: ConfigPartial = match Partial::from_env() {
            Err(_) => return ManagerConfig::default(),
            Ok(v) => v,
        };
        partial = match confique::File::with_format(file.unwrap_or(SYSTEM_CONFIG), FileFormat::Toml)
            .load()
        {
            Err(_) => return ManagerConfig::default(),
            Ok(v) => partial.with_fallback(v),
        };
        partial = partial.with_fallback(ConfigPartial::default_values());
        match ManagerConfig::from_partial(partial) {
            Ok(v) => v,
            Err(_) => ManagerConfig::default(),
        }
    }

    /// The defaults handed to every unit.
    pub fn unit_defaults(&self) -> UnitDefaults {
        UnitDefaults {
            timeout_start_usec: sec_to_usec(self.DefaultTimeoutStartSec),
            timeout_stop_usec: sec_to_usec(self.DefaultTimeoutStopSec),
            restart_usec: self.DefaultRestartSec.saturating_mul(USEC_PER_SEC),
            start_limit_interval_usec: sec_to_usec(self.DefaultStartLimitIntervalSec),
            start_limit_burst: self.DefaultStartLimitBurst,
            job_timeout_usec: sec_to_usec(self.DefaultJobTimeoutSec),
        }
    }

    /// the log targets, comma separated in the file
    pub fn log_targets(&self) -> Vec<&str> {
        self.LogTarget
            .split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            DefaultTimeoutStartSec: 90,
            DefaultTimeoutStopSec: 90,
            DefaultRestartSec: 1,
            DefaultStartLimitIntervalSec: 10,
            DefaultStartLimitBurst: 5,
            DefaultJobTimeoutSec: 0,
            DefaultTarget: "default.target".to_string(),
            LogLevel: "info".to_string(),
            LogTarget: "syslog".to_string(),
            LogFile: "/var/log/unitcore/unitcore.log".to_string(),
            LogFileSize: 10240,
            LogFileNumber: 10,
            StateFile: "/run/unitcore/state".to_string(),
            UnitsFile: "/etc/unitcore/units.toml".to_string(),
        }
    }
}

#[cfg(test)]
mod test {
    use std::path::PathBuf;

    use super::*;
    use event::time::USEC_INFINITY;

    #[test]
    fn load() {
        let mut file: PathBuf = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
        file.push("config/system.conf");
        let config = ManagerConfig::new(file.to_str());
        assert_eq!(config.LogLevel, "debug");
        assert_eq!(config.log_targets(), vec!["console"]);
        assert_eq!(config.DefaultTarget, "default.target");
    }

    #[test]
    fn missing_file_falls_back() {
        let config = ManagerConfig::new(Some("/nonexistent/unitcore.conf"));
        assert_eq!(config.LogTarget, "syslog");
    }

    #[test]
    fn unit_defaults() {
        let defaults = ManagerConfig::default().unit_defaults();
        assert_eq!(defaults, UnitDefaults::default());
        assert_eq!(defaults.job_timeout_usec, USEC_INFINITY);
    }
}
