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

use super::{EmergencyAction, ExecCommand, ExecContext, Executor};
use crate::error::*;
use nix::sys::reboot::{self, RebootMode};
use nix::sys::signal::{self, pthread_sigmask, SigmaskHow, Signal};
use nix::sys::signalfd::SigSet;
use nix::unistd::{self, ForkResult, Pid};
use std::ffi::CString;
use std::path::Path;

/* exit codes of a child that never reached exec */
const EXIT_CHDIR: i32 = 200;
const EXIT_EXEC: i32 = 203;

/// fork/exec on the local system
#[derive(Debug, Default)]
pub struct ProcessExecutor;

impl ProcessExecutor {
    ///
    pub fn new() -> ProcessExecutor {
        ProcessExecutor
    }
}

fn to_cstring(s: &str) -> Result<CString> {
    CString::new(s).map_err(|_| Error::ConfigureError {
        msg: format!("'{}' contains a NUL byte", s),
    })
}

fn build_environment(unit: &str, ctx: &ExecContext) -> Result<Vec<CString>> {
    let mut envs: Vec<(String, String)> = std::env::vars()
        .filter(|(k, _)| ctx.envs().iter().all(|(key, _)| key != k))
        .collect();
    envs.extend(ctx.envs().iter().cloned());
    envs.push(("UNIT".to_string(), unit.to_string()));
    envs.iter()
        .map(|(k, v)| to_cstring(&format!("{}={}", k, v)))
        .collect()
}

fn apply_working_directory(dir: Option<&Path>) -> std::io::Result<()> {
    match dir {
        None => Ok(()),
        Some(d) => std::env::set_current_dir(d),
    }
}

fn exec_child(path: &CString, argv: &[CString], envs: &[CString], dir: Option<&Path>) -> i32 {
    let set = SigSet::empty();
    if pthread_sigmask(SigmaskHow::SIG_SETMASK, Some(&set), None).is_err() {
        log::info!("Failed to reset the sigmask of child process, ignoring.");
    }

    let _ = unistd::setsid();

    if let Err(e) = apply_working_directory(dir) {
        log::error!("Failed to apply working directory: {}", e);
        return EXIT_CHDIR;
    }

    if let Err(e) = unistd::execve(path, argv, envs) {
        log::error!("Failed to execute {:?}: {}", path, e);
    }
    EXIT_EXEC
}

impl Executor for ProcessExecutor {
    fn spawn(&self, unit: &str, cmd: &ExecCommand, ctx: &ExecContext) -> Result<Pid> {
        /* everything allocated before fork, the child only calls into the kernel */
        let path = to_cstring(cmd.path())?;
        let argv = cmd
            .argv()
            .iter()
            .map(|a| to_cstring(a))
            .collect::<Result<Vec<_>>>()?;
        let envs = build_environment(unit, ctx)?;
        let dir = ctx.working_directory().map(|d| d.as_path());

        match unsafe { unistd::fork() } {
            Ok(ForkResult::Parent { child }) => {
                log::debug!("{} spawned '{}' as pid {}", unit, cmd, child);
                Ok(child)
            }
            Ok(ForkResult::Child) => {
                let code = exec_child(&path, &argv, &envs, dir);
                unsafe { libc::_exit(code) }
            }
            Err(e) => {
                log::error!("{} failed to fork for '{}': {}", unit, cmd, e);
                Err(Error::Nix { source: e })
            }
        }
    }

    fn kill(&self, pid: Pid, signal: Signal) -> Result<()> {
        signal::kill(pid, signal).context(NixSnafu)
    }

    fn emergency_action(&self, action: EmergencyAction, reason: &str) {
        let mode = match action {
            EmergencyAction::RebootForce | EmergencyAction::RebootImmediate => {
                RebootMode::RB_AUTOBOOT
            }
            EmergencyAction::PoweroffForce | EmergencyAction::PoweroffImmediate => {
                RebootMode::RB_POWER_OFF
            }
            _ => {
                log::info!("Emergency action {} requested: {}", action, reason);
                return;
            }
        };

        log::warn!("Executing emergency action {}: {}", action, reason);
        if matches!(
            action,
            EmergencyAction::RebootForce | EmergencyAction::PoweroffForce
        ) {
            unistd::sync();
        }
        if let Err(e) = reboot::reboot(mode) {
            log::error!("Failed to execute emergency action {}: {}", action, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::wait::{waitpid, WaitStatus};
    use std::path::PathBuf;

    fn run(cmd: &ExecCommand, ctx: &ExecContext) -> WaitStatus {
        let pid = ProcessExecutor::new()
            .spawn("test.service", cmd, ctx)
            .unwrap();
        waitpid(pid, None).unwrap()
    }

    fn sh(script: &str) -> ExecCommand {
        ExecCommand::new(
            "/bin/sh".to_string(),
            vec!["/bin/sh".to_string(), "-c".to_string(), script.to_string()],
        )
    }

    #[test]
    fn test_spawn_exit_code() {
        let status = run(&sh("exit 3"), &ExecContext::new());
        assert!(matches!(status, WaitStatus::Exited(_, 3)));
    }

    #[test]
    fn test_spawn_env_and_directory() {
        let mut ctx = ExecContext::new();
        ctx.insert_envs(&["FOO=bar".to_string()]).unwrap();
        ctx.set_working_directory(Some(PathBuf::from("/")));
        let status = run(
            &sh("test \"$FOO\" = bar && test \"$UNIT\" = test.service && test \"$(pwd)\" = /"),
            &ctx,
        );
        assert!(matches!(status, WaitStatus::Exited(_, 0)));
    }

    #[test]
    fn test_spawn_bad_directory() {
        let mut ctx = ExecContext::new();
        ctx.set_working_directory(Some(PathBuf::from("/nonexistent/unitcore")));
        let status = run(&sh("exit 0"), &ctx);
        assert!(matches!(status, WaitStatus::Exited(_, EXIT_CHDIR)));
    }

    #[test]
    fn test_kill_gone_process() {
        let pid = ProcessExecutor::new()
            .spawn("test.service", &sh("exit 0"), &ExecContext::new())
            .unwrap();
        waitpid(pid, None).unwrap();
        let e = ProcessExecutor::new().kill(pid, Signal::SIGTERM).unwrap_err();
        assert_eq!(nix::Error::from(e), nix::Error::ESRCH);
    }
}
