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

//! The unit variants. Every variant implements [`SubUnit`]; the unit owns one of them in a
//! [`UnitVariant`] and dispatches by `match`.
//!
//! A variant only sees its own data and the [`UnitCtx`] handed in by the manager.

mod device;
mod mount;
mod scope;
mod service;
mod socket;
mod target;
mod timer;

pub use device::DeviceFound;
pub use mount::SectionMount;
pub use scope::SectionScope;
pub use service::SectionService;
pub use socket::SectionSocket;
pub use timer::SectionTimer;

use crate::error::*;
use crate::unit::{UnitActiveState, UnitConfig, UnitCtx, UnitDefaults, UnitType};
use device::DeviceUnit;
use mount::MountUnit;
use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;
use nix::unistd::Pid;
use scope::ScopeUnit;
use service::ServiceUnit;
use socket::SocketUnit;
use target::TargetUnit;
use timer::TimerUnit;

/// The accumulated result of a unit variant.
#[derive(PartialEq, Eq, Debug, Copy, Clone)]
pub enum UnitResult {
    ///
    Success,
    ///
    FailureResources,
    ///
    FailureTimeout,
    ///
    FailureExitCode,
    ///
    FailureSignal,
    ///
    FailureCoreDump,
    ///
    FailureStartLimitHit,
}

enum_names!(UnitResult {
    Success => "success",
    FailureResources => "resources",
    FailureTimeout => "timeout",
    FailureExitCode => "exit-code",
    FailureSignal => "signal",
    FailureCoreDump => "core-dump",
    FailureStartLimitHit => "start-limit-hit",
});

impl Default for UnitResult {
    fn default() -> Self {
        Self::Success
    }
}

/// Map an exit onto a result. `clean_signals` makes SIGHUP, SIGINT, SIGTERM and SIGPIPE a
/// clean exit, as for the main process of a daemon.
pub(crate) fn sigchld_result(wait_status: &WaitStatus, clean_signals: bool) -> UnitResult {
    match wait_status {
        WaitStatus::Exited(_, status) => {
            if *status == 0 {
                UnitResult::Success
            } else {
                UnitResult::FailureExitCode
            }
        }
        WaitStatus::Signaled(_, sig, core_dump) => {
            if *core_dump {
                UnitResult::FailureCoreDump
            } else if clean_signals
                && matches!(
                    sig,
                    Signal::SIGHUP | Signal::SIGINT | Signal::SIGTERM | Signal::SIGPIPE
                )
            {
                UnitResult::Success
            } else {
                UnitResult::FailureSignal
            }
        }
        _ => UnitResult::Success,
    }
}

/// Asynchronous input a variant may react to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UnitEvent {
    /// the readiness source bound to a socket fired
    Ready,
    /// device appeared, vanished, or was seen only tentatively
    Device(DeviceFound),
    /// the mount table shows the mount point as mounted or not
    Mount(bool),
    /// processes adopted by a scope
    AttachPids(Vec<Pid>),
    /// the scope's manager gave up on it
    Abandon,
}

/// The operations every unit variant implements.
pub(crate) trait SubUnit {
    /// the common state the sub-state maps onto
    fn active_state(&self) -> UnitActiveState;

    ///
    fn sub_state(&self) -> String;

    /// EAgain while the variant is busy, true when a start is already running
    fn start_check(&self) -> Result<bool> {
        Ok(false)
    }

    ///
    fn result(&self) -> String;

    ///
    fn can_reload(&self) -> bool {
        false
    }

    /// Begin activation. The common checks already passed.
    fn enter_start(&mut self, ctx: &mut UnitCtx) -> Result<()>;

    /// Begin deactivation.
    fn enter_stop(&mut self, ctx: &mut UnitCtx) -> Result<()>;

    ///
    fn reload(&mut self, _ctx: &mut UnitCtx) -> Result<()> {
        Err(Error::UnitActionEOpNotSupp)
    }

    /// A watched pid exited.
    fn process_exit(&mut self, ctx: &mut UnitCtx, pid: Pid, status: &WaitStatus);

    /// The phase timer expired, the current sub-state tells which phase.
    fn process_timeout(&mut self, ctx: &mut UnitCtx);

    /// A unit triggered by this one changed its active state.
    fn trigger_notify(&mut self, _ctx: &mut UnitCtx, _other: &str, _state: UnitActiveState) {}

    ///
    fn unit_event(&mut self, _ctx: &mut UnitCtx, _event: UnitEvent) -> Result<()> {
        Err(Error::UnitActionEOpNotSupp)
    }

    /// Leave the failed state.
    fn reset_failed(&mut self, ctx: &mut UnitCtx);

    /// The start was refused by the start limit.
    fn start_limit_hit(&mut self, ctx: &mut UnitCtx);

    /// `key=value` pairs describing the runtime state.
    fn serialize(&self) -> Vec<(String, String)>;

    /// Restore one pair, false if the key is not known.
    fn deserialize_item(&mut self, key: &str, value: &str) -> Result<bool>;

    /// Re-attach to what survived a re-execution, without spawning anything or notifying.
    fn coldplug(&mut self, _ctx: &mut UnitCtx) {}

    /// the pids the variant watches
    fn pids(&self) -> Vec<Pid> {
        Vec::new()
    }
}

pub(crate) enum UnitVariant {
    Service(ServiceUnit),
    Mount(MountUnit),
    Scope(ScopeUnit),
    Socket(SocketUnit),
    Target(TargetUnit),
    Device(DeviceUnit),
    Timer(TimerUnit),
}

macro_rules! variant_dispatch {
    ($variant:expr, $sub:ident => $body:expr) => {
        match $variant {
            UnitVariant::Service($sub) => $body,
            UnitVariant::Mount($sub) => $body,
            UnitVariant::Scope($sub) => $body,
            UnitVariant::Socket($sub) => $body,
            UnitVariant::Target($sub) => $body,
            UnitVariant::Device($sub) => $body,
            UnitVariant::Timer($sub) => $body,
        }
    };
}

impl UnitVariant {
    /// The variant of a freshly referenced unit.
    pub(crate) fn new(name: &str, unit_type: UnitType, defaults: &UnitDefaults) -> UnitVariant {
        match unit_type {
            UnitType::UnitService => UnitVariant::Service(ServiceUnit::new(defaults)),
            UnitType::UnitMount => UnitVariant::Mount(MountUnit::new(name, defaults)),
            UnitType::UnitScope => UnitVariant::Scope(ScopeUnit::new(defaults)),
            UnitType::UnitSocket => UnitVariant::Socket(SocketUnit::new(defaults)),
            UnitType::UnitTarget => UnitVariant::Target(TargetUnit::new()),
            UnitType::UnitDevice => UnitVariant::Device(DeviceUnit::new()),
            UnitType::UnitTimer => UnitVariant::Timer(TimerUnit::new()),
        }
    }

    /// Apply the type specific table of `config`, keeping the runtime state.
    pub(crate) fn load(&mut self, config: &UnitConfig, defaults: &UnitDefaults) -> Result<()> {
        match self {
            UnitVariant::Service(s) => match &config.Service {
                Some(section) => s.load(section, defaults),
                None => Err(Error::ConfigureError {
                    msg: format!("{} has no Service table", config.Name),
                }),
            },
            UnitVariant::Mount(m) => m.load(config.Mount.as_ref(), defaults),
            UnitVariant::Scope(s) => s.load(config.Scope.as_ref(), defaults),
            UnitVariant::Socket(s) => s.load(config.Socket.as_ref(), defaults),
            UnitVariant::Timer(t) => {
                t.load(config.Timer.as_ref());
                Ok(())
            }
            UnitVariant::Target(_) | UnitVariant::Device(_) => Ok(()),
        }
    }

    /// The unit a socket or timer triggers unless told otherwise by a dependency.
    pub(crate) fn default_trigger(name: &str, config: &UnitConfig) -> Option<String> {
        let explicit = match name.rsplit_once('.') {
            Some((_, "socket")) => config.Socket.as_ref().and_then(|s| s.Service.clone()),
            Some((_, "timer")) => config.Timer.as_ref().and_then(|t| t.Unit.clone()),
            _ => return None,
        };
        explicit.or_else(|| {
            name.rsplit_once('.')
                .map(|(prefix, _)| format!("{}.service", prefix))
        })
    }
}

impl SubUnit for UnitVariant {
    fn active_state(&self) -> UnitActiveState {
        variant_dispatch!(self, s => s.active_state())
    }

    fn sub_state(&self) -> String {
        variant_dispatch!(self, s => s.sub_state())
    }

    fn start_check(&self) -> Result<bool> {
        variant_dispatch!(self, s => s.start_check())
    }

    fn result(&self) -> String {
        variant_dispatch!(self, s => s.result())
    }

    fn can_reload(&self) -> bool {
        variant_dispatch!(self, s => s.can_reload())
    }

    fn enter_start(&mut self, ctx: &mut UnitCtx) -> Result<()> {
        variant_dispatch!(self, s => s.enter_start(ctx))
    }

    fn enter_stop(&mut self, ctx: &mut UnitCtx) -> Result<()> {
        variant_dispatch!(self, s => s.enter_stop(ctx))
    }

    fn reload(&mut self, ctx: &mut UnitCtx) -> Result<()> {
        variant_dispatch!(self, s => s.reload(ctx))
    }

    fn process_exit(&mut self, ctx: &mut UnitCtx, pid: Pid, status: &WaitStatus) {
        variant_dispatch!(self, s => s.process_exit(ctx, pid, status))
    }

    fn process_timeout(&mut self, ctx: &mut UnitCtx) {
        variant_dispatch!(self, s => s.process_timeout(ctx))
    }

    fn trigger_notify(&mut self, ctx: &mut UnitCtx, other: &str, state: UnitActiveState) {
        variant_dispatch!(self, s => s.trigger_notify(ctx, other, state))
    }

    fn unit_event(&mut self, ctx: &mut UnitCtx, event: UnitEvent) -> Result<()> {
        variant_dispatch!(self, s => s.unit_event(ctx, event))
    }

    fn reset_failed(&mut self, ctx: &mut UnitCtx) {
        variant_dispatch!(self, s => s.reset_failed(ctx))
    }

    fn start_limit_hit(&mut self, ctx: &mut UnitCtx) {
        variant_dispatch!(self, s => s.start_limit_hit(ctx))
    }

    fn serialize(&self) -> Vec<(String, String)> {
        variant_dispatch!(self, s => s.serialize())
    }

    fn deserialize_item(&mut self, key: &str, value: &str) -> Result<bool> {
        variant_dispatch!(self, s => s.deserialize_item(key, value))
    }

    fn coldplug(&mut self, ctx: &mut UnitCtx) {
        variant_dispatch!(self, s => s.coldplug(ctx))
    }

    fn pids(&self) -> Vec<Pid> {
        variant_dispatch!(self, s => s.pids())
    }
}

/// Parse a serialized pid, `-` for none.
pub(crate) fn parse_pid(value: &str) -> Result<Option<Pid>> {
    if value == "-" {
        return Ok(None);
    }
    value
        .parse::<i32>()
        .map(|v| Some(Pid::from_raw(v)))
        .map_err(|_| Error::ConfigureError {
            msg: format!("invalid pid '{}'", value),
        })
}

/// The serialized form of an optional pid.
pub(crate) fn format_pid(pid: Option<Pid>) -> String {
    pid.map_or_else(|| "-".to_string(), |p| p.to_string())
}

pub(crate) fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.parse::<T>().map_err(|_| Error::ConfigureError {
        msg: format!("invalid value '{}' for {}", value, key),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_sigchld_result() {
        let pid = Pid::from_raw(10);
        assert_eq!(
            sigchld_result(&WaitStatus::Exited(pid, 0), false),
            UnitResult::Success
        );
        assert_eq!(
            sigchld_result(&WaitStatus::Exited(pid, 1), false),
            UnitResult::FailureExitCode
        );
        assert_eq!(
            sigchld_result(&WaitStatus::Signaled(pid, Signal::SIGTERM, false), true),
            UnitResult::Success
        );
        assert_eq!(
            sigchld_result(&WaitStatus::Signaled(pid, Signal::SIGTERM, false), false),
            UnitResult::FailureSignal
        );
        assert_eq!(
            sigchld_result(&WaitStatus::Signaled(pid, Signal::SIGSEGV, true), true),
            UnitResult::FailureCoreDump
        );
    }

    #[test]
    fn test_default_trigger() {
        let config = UnitConfig::new("web.socket");
        assert_eq!(
            UnitVariant::default_trigger("web.socket", &config),
            Some("web.service".to_string())
        );

        let mut config = UnitConfig::new("backup.timer");
        config.Timer = Some(SectionTimer {
            Unit: Some("backup-now.service".to_string()),
            ..Default::default()
        });
        assert_eq!(
            UnitVariant::default_trigger("backup.timer", &config),
            Some("backup-now.service".to_string())
        );
        assert_eq!(UnitVariant::default_trigger("a.service", &config), None);
    }

    #[test]
    fn test_pid_helpers() {
        assert_eq!(parse_pid("-").unwrap(), None);
        assert_eq!(parse_pid("42").unwrap(), Some(Pid::from_raw(42)));
        assert!(parse_pid("x").is_err());
        assert_eq!(format_pid(None), "-");
        assert_eq!(UnitResult::from_str("start-limit-hit").unwrap(), UnitResult::FailureStartLimitHit);
    }
}
