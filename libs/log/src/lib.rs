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

//! Process-wide logger with console, syslog and rotating file targets.
//!
//! The global logger can be replaced at any time (e.g. after the configuration has been
//! loaded), and `reinit` reopens every target, which is needed after re-execution.
pub mod inner;
pub mod logger;

/// reexport log::Log
pub use log::max_level;
pub use log::Log;
pub use log::{Level, LevelFilter};
pub use log::{Metadata, Record};

pub use logger::{init_log, ReInit};

/// Reinit the logger based on the previous configuration
pub fn reinit() {
    inner::reinit();
}

/// Change the max level without replacing the targets.
pub fn set_max_level(level: Level) {
    log::set_max_level(level.to_level_filter());
}

/// Initialize the console logger.
pub fn init_log_to_console(name: &str, level: Level) {
    init_log(name, level, vec!["console"], "", 0, 0);
}

/// Initialize console and syslog logger.
pub fn init_log_to_console_syslog(name: &str, level: Level) {
    init_log(name, level, vec!["console", "syslog"], "", 0, 0);
}

/// Parse a level name as written in configuration files.
pub fn parse_level(s: &str) -> Option<Level> {
    match s.to_ascii_lowercase().as_str() {
        "error" | "err" | "0" | "1" => Some(Level::Error),
        "warn" | "warning" | "2" => Some(Level::Warn),
        "info" | "3" => Some(Level::Info),
        "debug" | "4" => Some(Level::Debug),
        "trace" | "5" => Some(Level::Trace),
        _ => None,
    }
}
