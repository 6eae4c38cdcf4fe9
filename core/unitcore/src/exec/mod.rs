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

//! The process collaborator: what to run, how to run it, and who runs it.
//!
//! The engine never forks by itself. Every spawn, kill and emergency action goes through
//! the [`Executor`] installed into the manager, [`ProcessExecutor`] being the real one.
use crate::error::*;
use bitflags::bitflags;
use nix::sys::signal::Signal;
use nix::unistd::Pid;
use serde::Deserialize;
use std::path::PathBuf;

mod spawn;

pub use spawn::ProcessExecutor;

bitflags! {
    /// ExecCommand Flags
    pub struct ExecFlag: u8 {
        /// empty flag
        const EXEC_COMMAND_EMPTY = 0;
        /// a failure of the command is not a failure of the unit
        const EXEC_COMMAND_IGNORE_FAILURE = 1 << 0;
    }
}

/// the exec command that was parsed from the unit definition
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct ExecCommand {
    path: String,
    argv: Vec<String>,
    flags: ExecFlag,
}

impl ExecCommand {
    /// create a new instance of the command
    pub fn new(path: String, argv: Vec<String>) -> ExecCommand {
        ExecCommand {
            path,
            argv,
            flags: ExecFlag::EXEC_COMMAND_EMPTY,
        }
    }

    /// Parse one command line. A leading `-` ignores the failure of the command; words are
    /// split with shell quoting rules and the first one is the path.
    pub fn parse(line: &str) -> Result<ExecCommand> {
        let line = line.trim();
        let (flags, line) = match line.strip_prefix('-') {
            Some(rest) => (ExecFlag::EXEC_COMMAND_IGNORE_FAILURE, rest),
            None => (ExecFlag::EXEC_COMMAND_EMPTY, line),
        };

        let words = shlex::split(line).ok_or_else(|| Error::ConfigureError {
            msg: format!("unbalanced quoting in command '{}'", line),
        })?;
        let path = match words.first() {
            Some(v) => v.clone(),
            None => {
                return Err(Error::ConfigureError {
                    msg: "empty command line".to_string(),
                })
            }
        };
        if !path.starts_with('/') {
            return Err(Error::ConfigureError {
                msg: format!("command path '{}' is not absolute", path),
            });
        }

        Ok(ExecCommand {
            path,
            argv: words,
            flags,
        })
    }

    /// parse a list of lines
    pub fn parse_many(lines: &[String]) -> Result<Vec<ExecCommand>> {
        lines.iter().map(|l| ExecCommand::parse(l)).collect()
    }

    /// absolute path of the binary
    pub fn path(&self) -> &str {
        &self.path
    }

    /// argv, starting with argv\[0\]
    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    ///
    pub fn get_exec_flag(&self) -> ExecFlag {
        self.flags
    }

    /// whether a failure of this command is ignored
    pub fn ignore_failure(&self) -> bool {
        self.flags.contains(ExecFlag::EXEC_COMMAND_IGNORE_FAILURE)
    }
}

impl std::fmt::Display for ExecCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.ignore_failure() {
            write!(f, "-")?;
        }
        write!(f, "{}", self.argv.join(" "))
    }
}

/// The process environment shared by every command of one unit.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct ExecContext {
    envs: Vec<(String, String)>,
    working_directory: Option<PathBuf>,
}

impl ExecContext {
    ///
    pub fn new() -> ExecContext {
        ExecContext::default()
    }

    /// add `key=value` pairs, later assignments of a key win
    pub fn insert_envs(&mut self, assignments: &[String]) -> Result<()> {
        for assignment in assignments {
            let (key, value) = match assignment.split_once('=') {
                Some((k, v)) if !k.is_empty() => (k, v),
                _ => {
                    return Err(Error::ConfigureError {
                        msg: format!("invalid environment assignment '{}'", assignment),
                    })
                }
            };
            self.envs.retain(|(k, _)| k != key);
            self.envs.push((key.to_string(), value.to_string()));
        }
        Ok(())
    }

    ///
    pub fn envs(&self) -> &[(String, String)] {
        &self.envs
    }

    ///
    pub fn set_working_directory(&mut self, dir: Option<PathBuf>) {
        self.working_directory = dir;
    }

    ///
    pub fn working_directory(&self) -> Option<&PathBuf> {
        self.working_directory.as_ref()
    }
}

/// What to do to the whole system when a unit says so.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EmergencyAction {
    ///
    None,
    ///
    Reboot,
    ///
    RebootForce,
    ///
    RebootImmediate,
    ///
    Poweroff,
    ///
    PoweroffForce,
    ///
    PoweroffImmediate,
    ///
    Exit,
    ///
    ExitForce,
}

impl Default for EmergencyAction {
    fn default() -> Self {
        EmergencyAction::None
    }
}

impl std::fmt::Display for EmergencyAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EmergencyAction::None => "none",
            EmergencyAction::Reboot => "reboot",
            EmergencyAction::RebootForce => "reboot-force",
            EmergencyAction::RebootImmediate => "reboot-immediate",
            EmergencyAction::Poweroff => "poweroff",
            EmergencyAction::PoweroffForce => "poweroff-force",
            EmergencyAction::PoweroffImmediate => "poweroff-immediate",
            EmergencyAction::Exit => "exit",
            EmergencyAction::ExitForce => "exit-force",
        };
        write!(f, "{}", s)
    }
}

/// The spawn collaborator.
pub trait Executor {
    /// Start `cmd` for `unit` without waiting for it; the exit comes back as a child event.
    fn spawn(&self, unit: &str, cmd: &ExecCommand, ctx: &ExecContext) -> Result<Pid>;

    /// Send `signal` to `pid`. `ESRCH` means the process is already gone.
    fn kill(&self, pid: Pid, signal: Signal) -> Result<()>;

    /// Carry out `action`, `reason` is for the log.
    fn emergency_action(&self, action: EmergencyAction, reason: &str);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exec_command_parse() {
        let cmd = ExecCommand::parse("-/bin/sh -c 'exit 1'").unwrap();
        assert!(cmd.ignore_failure());
        assert_eq!(cmd.path(), "/bin/sh");
        assert_eq!(cmd.argv(), &["/bin/sh", "-c", "exit 1"]);
        assert_eq!(cmd.to_string(), "-/bin/sh -c exit 1");

        let cmd = ExecCommand::parse("/bin/true").unwrap();
        assert!(!cmd.ignore_failure());
        assert_eq!(cmd.argv().len(), 1);

        assert!(ExecCommand::parse("").is_err());
        assert!(ExecCommand::parse("true").is_err());
        assert!(ExecCommand::parse("/bin/echo 'open").is_err());
    }

    #[test]
    fn test_exec_context_envs() {
        let mut ctx = ExecContext::new();
        ctx.insert_envs(&["A=1".to_string(), "B=x=y".to_string(), "A=2".to_string()])
            .unwrap();
        assert_eq!(
            ctx.envs(),
            &[
                ("B".to_string(), "x=y".to_string()),
                ("A".to_string(), "2".to_string())
            ]
        );
        assert!(ctx.insert_envs(&["=1".to_string()]).is_err());
        assert!(ctx.insert_envs(&["NOVALUE".to_string()]).is_err());
    }
}
