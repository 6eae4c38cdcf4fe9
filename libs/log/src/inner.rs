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

//! The replaceable global logger slot and the logging macros.
use std::{fmt, sync::RwLock};

use crate::logger::ReInit;
use log::Record;

static LOGGER: RwLock<Option<Box<dyn ReInit>>> = RwLock::new(None);

/// Install `logger`, replacing any previous one.
pub(crate) fn set_boxed_logger(logger: Box<dyn ReInit>) {
    match LOGGER.write() {
        Ok(mut slot) => *slot = Some(logger),
        Err(poisoned) => *poisoned.into_inner() = Some(logger),
    }
}

/// Reopen every target of the installed logger.
pub(crate) fn reinit() {
    if let Ok(slot) = LOGGER.read() {
        if let Some(logger) = slot.as_ref() {
            logger.reinit();
        }
    }
}

///
#[macro_export]
macro_rules! log {
    (target: $target:expr, $lvl:expr, $($arg:tt)+) => ({
        let lvl = $lvl;
        if lvl <= $crate::max_level() {
            $crate::inner::__private_api_log(
                format_args!($($arg)+),
                lvl,
                &($target, module_path!(), file!(), line!()),
            );
        }
    });
    ($lvl:expr, $($arg:tt)+) => ($crate::log!(target: module_path!(), $lvl, $($arg)+))
}

///
#[macro_export]
macro_rules! error {
    ($($arg:tt)+) => ($crate::log!($crate::Level::Error, $($arg)+))
}

///
#[macro_export]
macro_rules! warn {
    ($($arg:tt)+) => ($crate::log!($crate::Level::Warn, $($arg)+))
}

///
#[macro_export]
macro_rules! info {
    ($($arg:tt)+) => ($crate::log!($crate::Level::Info, $($arg)+))
}

///
#[macro_export]
macro_rules! debug {
    ($($arg:tt)+) => ($crate::log!($crate::Level::Debug, $($arg)+))
}

///
#[macro_export]
macro_rules! trace {
    ($($arg:tt)+) => ($crate::log!($crate::Level::Trace, $($arg)+))
}

/* Private, shouldn't be used out of this crate's macros. */
#[doc(hidden)]
pub fn __private_api_log(
    args: fmt::Arguments,
    level: crate::Level,
    &(target, module_path, file, line): &(&str, &'static str, &'static str, u32),
) {
    let slot = match LOGGER.read() {
        Ok(v) => v,
        Err(_) => return,
    };
    if let Some(logger) = slot.as_ref() {
        logger.log(
            &Record::builder()
                .args(args)
                .level(level)
                .target(target)
                .module_path_static(Some(module_path))
                .file_static(Some(file))
                .line(Some(line))
                .build(),
        );
    }
}

/// Flush every target.
pub fn flush() {
    if let Ok(slot) = LOGGER.read() {
        if let Some(logger) = slot.as_ref() {
            logger.flush();
        }
    }
}
