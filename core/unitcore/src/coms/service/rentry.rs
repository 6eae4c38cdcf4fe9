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

#![allow(non_snake_case)]
use crate::error::*;
use crate::exec::{ExecCommand, ExecContext};
use crate::unit::{delay_usec, timeout_usec, UnitDefaults};
use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;
use serde::{Deserialize, Deserializer};
use std::path::PathBuf;
use std::str::FromStr;

#[derive(PartialEq, Eq, Deserialize, Debug, Clone, Copy)]
pub enum ServiceType {
    #[serde(alias = "simple")]
    Simple,
    #[serde(alias = "oneshot")]
    Oneshot,
}

impl Default for ServiceType {
    fn default() -> Self {
        Self::Simple
    }
}

#[derive(PartialEq, Eq, Deserialize, Debug, Clone, Copy)]
pub enum ServiceRestart {
    #[serde(alias = "no")]
    No,
    #[serde(alias = "on-success")]
    OnSuccess,
    #[serde(alias = "on-failure")]
    OnFailure,
    #[serde(alias = "on-abnormal")]
    OnAbnormal,
    #[serde(alias = "on-abort")]
    OnAbort,
    #[serde(alias = "always")]
    Always,
}

impl Default for ServiceRestart {
    fn default() -> Self {
        Self::No
    }
}

/// Exit codes and signals given a special meaning by the configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExitStatusSet {
    status: Vec<i32>,
    signal: Vec<Signal>,
}

impl ExitStatusSet {
    fn add_status(&mut self, status: i32) {
        self.status.push(status);
    }

    fn add_signal(&mut self, sig: Signal) {
        self.signal.push(sig);
    }

    pub(super) fn exit_status_enabled(&self, exit: ExitStatus) -> bool {
        match exit {
            ExitStatus::Exited(status) => self.status.contains(&status),
            ExitStatus::Signaled(sig) => self.signal.iter().any(|s| *s as i32 == sig),
        }
    }

    /// Parse `"1 2 SIGKILL"`, invalid words are skipped.
    pub(super) fn parse(s: &str) -> ExitStatusSet {
        let mut status_set = ExitStatusSet::default();
        for word in s.split_whitespace() {
            if let Ok(v) = word.parse::<u8>() {
                status_set.add_status(i32::from(v));
                continue;
            }
            if let Ok(sig) = Signal::from_str(word) {
                status_set.add_signal(sig);
                continue;
            }
            log::warn!("ExitStatus: invalid config value {}", word);
        }
        status_set
    }
}

fn deserialize_exit_status_set<'de, D>(de: D) -> std::result::Result<ExitStatusSet, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(de)?;
    Ok(ExitStatusSet::parse(&s))
}

/// The `[Unit.Service]` table of a unit definition.
#[derive(Deserialize, Clone, Debug, Default)]
#[serde(default)]
pub struct SectionService {
    pub Type: ServiceType,
    pub ExecStartPre: Vec<String>,
    pub ExecStart: Vec<String>,
    pub ExecStartPost: Vec<String>,
    pub ExecReload: Vec<String>,
    pub ExecStop: Vec<String>,
    pub ExecStopPost: Vec<String>,
    pub RemainAfterExit: bool,
    pub Restart: ServiceRestart,
    pub RestartSec: Option<u64>,
    pub TimeoutStartSec: Option<u64>,
    pub TimeoutStopSec: Option<u64>,
    #[serde(deserialize_with = "deserialize_exit_status_set")]
    pub SuccessExitStatus: ExitStatusSet,
    #[serde(deserialize_with = "deserialize_exit_status_set")]
    pub RestartPreventExitStatus: ExitStatusSet,
    pub WorkingDirectory: Option<PathBuf>,
    pub Environment: Vec<String>,
}

/// The resolved configuration the state machine runs with.
#[derive(Debug, Clone, Default)]
pub(super) struct ServiceConfig {
    pub(super) service_type: ServiceType,
    pub(super) start_pre: Vec<ExecCommand>,
    pub(super) start: Vec<ExecCommand>,
    pub(super) start_post: Vec<ExecCommand>,
    pub(super) reload: Vec<ExecCommand>,
    pub(super) stop: Vec<ExecCommand>,
    pub(super) stop_post: Vec<ExecCommand>,
    pub(super) remain_after_exit: bool,
    pub(super) restart: ServiceRestart,
    pub(super) restart_usec: u64,
    pub(super) timeout_start_usec: u64,
    pub(super) timeout_stop_usec: u64,
    pub(super) success_status: ExitStatusSet,
    pub(super) restart_prevent: ExitStatusSet,
    pub(super) exec_ctx: ExecContext,
}

impl ServiceConfig {
    pub(super) fn new(defaults: &UnitDefaults) -> ServiceConfig {
        ServiceConfig {
            restart_usec: defaults.restart_usec,
            timeout_start_usec: defaults.timeout_start_usec,
            timeout_stop_usec: defaults.timeout_stop_usec,
            ..Default::default()
        }
    }

    pub(super) fn from_section(
        section: &SectionService,
        defaults: &UnitDefaults,
    ) -> Result<ServiceConfig> {
        let mut exec_ctx = ExecContext::new();
        exec_ctx.insert_envs(&section.Environment)?;
        exec_ctx.set_working_directory(section.WorkingDirectory.clone());

        let config = ServiceConfig {
            service_type: section.Type,
            start_pre: ExecCommand::parse_many(&section.ExecStartPre)?,
            start: ExecCommand::parse_many(&section.ExecStart)?,
            start_post: ExecCommand::parse_many(&section.ExecStartPost)?,
            reload: ExecCommand::parse_many(&section.ExecReload)?,
            stop: ExecCommand::parse_many(&section.ExecStop)?,
            stop_post: ExecCommand::parse_many(&section.ExecStopPost)?,
            remain_after_exit: section.RemainAfterExit,
            restart: section.Restart,
            restart_usec: delay_usec(section.RestartSec, defaults.restart_usec),
            timeout_start_usec: timeout_usec(section.TimeoutStartSec, defaults.timeout_start_usec),
            timeout_stop_usec: timeout_usec(section.TimeoutStopSec, defaults.timeout_stop_usec),
            success_status: section.SuccessExitStatus.clone(),
            restart_prevent: section.RestartPreventExitStatus.clone(),
            exec_ctx,
        };

        if config.service_type == ServiceType::Simple && config.start.len() > 1 {
            return Err(Error::ConfigureError {
                msg: "simple services take exactly one ExecStart".to_string(),
            });
        }
        if config.service_type == ServiceType::Simple && config.start.is_empty() {
            return Err(Error::ConfigureError {
                msg: "simple services need an ExecStart".to_string(),
            });
        }
        Ok(config)
    }

    pub(super) fn get_exec_cmds(&self, cmd_type: ServiceCommand) -> &[ExecCommand] {
        match cmd_type {
            ServiceCommand::StartPre => &self.start_pre,
            ServiceCommand::Start => &self.start,
            ServiceCommand::StartPost => &self.start_post,
            ServiceCommand::Reload => &self.reload,
            ServiceCommand::Stop => &self.stop,
            ServiceCommand::StopPost => &self.stop_post,
        }
    }
}

#[derive(PartialEq, Eq, Debug, Copy, Clone)]
pub(super) enum ServiceState {
    Dead,
    StartPre,
    Start,
    StartPost,
    Running,
    Exited,
    Reload,
    Stop,
    StopSigterm,
    StopSigkill,
    StopPost,
    FinalSigterm,
    FinalSigkill,
    AutoRestart,
    Failed,
}

enum_names!(ServiceState {
    Dead => "dead",
    StartPre => "start-pre",
    Start => "start",
    StartPost => "start-post",
    Running => "running",
    Exited => "exited",
    Reload => "reload",
    Stop => "stop",
    StopSigterm => "stop-sigterm",
    StopSigkill => "stop-sigkill",
    StopPost => "stop-post",
    FinalSigterm => "final-sigterm",
    FinalSigkill => "final-sigkill",
    AutoRestart => "auto-restart",
    Failed => "failed",
});

impl Default for ServiceState {
    fn default() -> Self {
        Self::Dead
    }
}

#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Copy, Clone)]
pub(super) enum ServiceCommand {
    StartPre,
    Start,
    StartPost,
    Reload,
    Stop,
    StopPost,
}

enum_names!(ServiceCommand {
    StartPre => "start-pre",
    Start => "start",
    StartPost => "start-post",
    Reload => "reload",
    Stop => "stop",
    StopPost => "stop-post",
});

/// How the main process last ended.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub(super) enum ExitStatus {
    Exited(i32),
    Signaled(i32),
}

impl ExitStatus {
    pub(super) fn from_wait_status(wait_status: &WaitStatus) -> Option<ExitStatus> {
        match wait_status {
            WaitStatus::Exited(_, status) => Some(ExitStatus::Exited(*status)),
            WaitStatus::Signaled(_, sig, _) => Some(ExitStatus::Signaled(*sig as i32)),
            _ => None,
        }
    }
}

impl std::fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitStatus::Exited(v) => write!(f, "exited:{}", v),
            ExitStatus::Signaled(v) => write!(f, "signaled:{}", v),
        }
    }
}

impl FromStr for ExitStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let bad = || Error::ConfigureError {
            msg: format!("invalid exit status '{}'", s),
        };
        let (kind, value) = s.split_once(':').ok_or_else(bad)?;
        let value = value.parse::<i32>().map_err(|_| bad())?;
        match kind {
            "exited" => Ok(ExitStatus::Exited(value)),
            "signaled" => Ok(ExitStatus::Signaled(value)),
            _ => Err(bad()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_status_set() {
        let set = ExitStatusSet::parse("1 SIGKILL bogus 300");
        assert!(set.exit_status_enabled(ExitStatus::Exited(1)));
        assert!(!set.exit_status_enabled(ExitStatus::Exited(2)));
        assert!(set.exit_status_enabled(ExitStatus::Signaled(libc::SIGKILL)));
        assert!(!set.exit_status_enabled(ExitStatus::Signaled(libc::SIGTERM)));
    }

    #[test]
    fn test_section_service_toml() {
        let section: SectionService = toml::from_str(
            r#"
            Type = "oneshot"
            ExecStart = ["/bin/true", "-/bin/false"]
            Restart = "on-failure"
            RestartSec = 3
            SuccessExitStatus = "2 SIGUSR1"
            "#,
        )
        .unwrap();
        assert_eq!(section.Type, ServiceType::Oneshot);
        assert_eq!(section.Restart, ServiceRestart::OnFailure);

        let config = ServiceConfig::from_section(&section, &UnitDefaults::default()).unwrap();
        assert_eq!(config.start.len(), 2);
        assert!(config.start[1].ignore_failure());
        assert_eq!(config.restart_usec, 3_000_000);
        assert!(config.success_status.exit_status_enabled(ExitStatus::Exited(2)));
    }

    #[test]
    fn test_simple_needs_one_exec_start() {
        let section = SectionService::default();
        assert!(ServiceConfig::from_section(&section, &UnitDefaults::default()).is_err());
    }

    #[test]
    fn test_exit_status_str() {
        for s in ["exited:3", "signaled:9"] {
            assert_eq!(ExitStatus::from_str(s).unwrap().to_string(), s);
        }
        assert!(ExitStatus::from_str("exited").is_err());
    }
}
