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

//! Error define. The graph, the transaction builder, the jobs and the unit variants share one
//! Error so a unit action failure can flow into a job result without conversions.
//!
//! The `UnitAction*` family is what a unit operation reports to the dispatcher, each of them
//! maps onto exactly one job result.

pub use nix::errno::Errno;
use snafu::prelude::*;
#[allow(unused_imports)]
pub use snafu::ResultExt;

/// unitcore Error
#[allow(missing_docs)]
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
#[non_exhaustive]
pub enum Error {
    /// graph errors
    #[snafu(display("unit '{}' does not exist or is not loaded", name))]
    NoSuchUnit { name: String },

    #[snafu(display("invalid dependency {} {} {}: {}", from, relation, to, reason))]
    InvalidDependency {
        from: String,
        relation: String,
        to: String,
        reason: &'static str,
    },

    #[snafu(display("invalid unit name '{}'", name))]
    InvalidName { name: String },

    #[snafu(display("ordering cycle between: {}", units))]
    OrderCycle { units: String },

    /// transaction errors
    #[snafu(display("job {} is not applicable to unit '{}'", kind, name))]
    InvalidJobType { name: String, kind: String },

    #[snafu(display("transaction for '{}' conflicts with a queued job", name))]
    Conflict { name: String },

    #[snafu(display("transaction aborted: {}", reason))]
    TransactionAborted { reason: String },

    #[snafu(display("unit '{}' may not be isolated", name))]
    NoIsolation { name: String },

    #[snafu(display("operation refused, unit '{}' may be requested by dependency only", name))]
    RefuseManual { name: String },

    /// job api errors
    #[snafu(display("job {} does not exist", id))]
    NoSuchJob { id: u128 },

    #[snafu(display("job {} is running and can not be canceled", id))]
    JobRunning { id: u128 },

    #[snafu(display("out of resources: {}", what))]
    Resources { what: String },

    /// wrapped sources
    #[snafu(display("NixError(unitcore): {}", source))]
    Nix { source: nix::Error },

    #[snafu(display("IoError(unitcore): {}", source))]
    Io { source: std::io::Error },

    #[snafu(display("EventError(unitcore): {}", source))]
    Event { source: event::Error },

    #[snafu(display("Confique error: {}", source))]
    Confique { source: confique::Error },

    #[snafu(display("unit set error: {}", source))]
    Toml { source: toml::de::Error },

    #[snafu(display("state file error at line {}: {}", line, what))]
    Parse { line: usize, what: String },

    #[snafu(display("unit configuration error: '{}'.", msg))]
    ConfigureError { msg: String },

    /// UnitAction Error
    #[snafu(display("EAgain(UnitActionError)"))]
    UnitActionEAgain,
    #[snafu(display("EAlready(UnitActionError)"))]
    UnitActionEAlready,
    #[snafu(display("EBadR(UnitActionError)"))]
    UnitActionEBadR,
    #[snafu(display("ENoExec(UnitActionError)"))]
    UnitActionENoExec,
    #[snafu(display("EOpNotSupp(UnitActionError)"))]
    UnitActionEOpNotSupp,
    #[snafu(display("EFailed(UnitActionError)"))]
    UnitActionEFailed,
    #[snafu(display("ECanceled(UnitActionError)"))]
    UnitActionECanceled,
}

/// Convert to the standard linux error code
impl From<Error> for nix::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::NoSuchUnit { .. } => nix::Error::ENOENT,
            Error::InvalidDependency { .. } => nix::Error::EINVAL,
            Error::InvalidName { .. } => nix::Error::EINVAL,
            Error::OrderCycle { .. } => nix::Error::ELOOP,
            Error::InvalidJobType { .. } => nix::Error::ENOEXEC,
            Error::Conflict { .. } => nix::Error::EEXIST,
            Error::TransactionAborted { .. } => nix::Error::ECANCELED,
            Error::NoIsolation { .. } => nix::Error::EPERM,
            Error::RefuseManual { .. } => nix::Error::EPERM,
            Error::NoSuchJob { .. } => nix::Error::ENOENT,
            Error::JobRunning { .. } => nix::Error::EBUSY,
            Error::Resources { .. } => nix::Error::ENOMEM,
            Error::Nix { source } => source,
            Error::Io { source } => source
                .raw_os_error()
                .map_or(nix::Error::EIO, nix::Error::from_i32),
            Error::Event { .. } => nix::Error::EIO,
            Error::Confique { .. } => nix::Error::EINVAL,
            Error::Toml { .. } => nix::Error::EINVAL,
            Error::Parse { .. } => nix::Error::EINVAL,
            Error::ConfigureError { .. } => nix::Error::EINVAL,
            Error::UnitActionEAgain => nix::Error::EAGAIN,
            Error::UnitActionEAlready => nix::Error::EALREADY,
            Error::UnitActionEBadR => nix::Error::EBADR,
            Error::UnitActionENoExec => nix::Error::ENOEXEC,
            Error::UnitActionEOpNotSupp => nix::Error::EOPNOTSUPP,
            Error::UnitActionEFailed => nix::Error::EIO,
            Error::UnitActionECanceled => nix::Error::ECANCELED,
        }
    }
}

impl From<nix::Error> for Error {
    fn from(source: nix::Error) -> Self {
        Error::Nix { source }
    }
}

impl From<std::io::Error> for Error {
    fn from(source: std::io::Error) -> Self {
        Error::Io { source }
    }
}

impl From<event::Error> for Error {
    fn from(source: event::Error) -> Self {
        Error::Event { source }
    }
}

/// new Result
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_mapping() {
        let e: nix::Error = Error::NoSuchUnit {
            name: "a.service".to_string(),
        }
        .into();
        assert_eq!(e, nix::Error::ENOENT);

        let e: nix::Error = Error::UnitActionEAgain.into();
        assert_eq!(e, nix::Error::EAGAIN);

        let e: nix::Error = Error::Io {
            source: std::io::Error::from_raw_os_error(libc::EACCES),
        }
        .into();
        assert_eq!(e, nix::Error::EACCES);
    }

    #[test]
    fn test_display() {
        let e = Error::OrderCycle {
            units: "a.target b.target".to_string(),
        };
        assert_eq!(e.to_string(), "ordering cycle between: a.target b.target");
    }
}
