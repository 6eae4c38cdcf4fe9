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

//! unitcore bin

use clap::Parser;
use libc::{prctl, PR_SET_CHILD_SUBREAPER};
use nix::sys::signal::Signal;
use std::env;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{exit, Command};
use std::rc::Rc;
use unitcore::error::*;
use unitcore::exec::ProcessExecutor;
use unitcore::job::{JobKind, JobMode};
use unitcore::manager::{Manager, ManagerConfig, ManagerExit};
use unitcore::unit::UnitSet;

/// parse program arguments
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(long)]
    /// Restore the state saved before re-executing.
    deserialize: bool,

    #[clap(long)]
    /// The manager configuration file.
    config: Option<String>,

    #[clap(long)]
    /// The unit set to load, instead of UnitsFile.
    units: Option<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = ManagerConfig::new(args.config.as_deref());
    let level = match log::parse_level(&config.LogLevel) {
        Some(level) => level,
        None => {
            println!("unsupported log level {}, using info", config.LogLevel);
            log::Level::Info
        }
    };
    log::init_log(
        "unitcore",
        level,
        config.log_targets(),
        &config.LogFile,
        config.LogFileSize,
        config.LogFileNumber,
    );
    log::info!("unitcore running, deserialize: {}", args.deserialize);

    set_child_reaper();

    let manager = Manager::new(&config, Rc::new(ProcessExecutor::new()));
    let units_file = args.units.unwrap_or_else(|| config.UnitsFile.clone());
    match UnitSet::from_file(Path::new(&units_file)) {
        Ok(set) => manager.load_units(&set),
        Err(e) => log::error!("Failed to read the unit set {}: {}", units_file, e),
    }

    let state_file = Path::new(&config.StateFile);
    if args.deserialize {
        if let Err(e) = manager.deserialize_from(state_file) {
            log::error!("Failed to restore the state from {:?}: {}", state_file, e);
        }
    } else if let Err(e) =
        manager.submit_job(&config.DefaultTarget, JobKind::Start, JobMode::Replace)
    {
        log::error!("Failed to start {}: {}", config.DefaultTarget, e);
    }

    let events = event::Events::new(&[Signal::SIGTERM, Signal::SIGINT, Signal::SIGHUP])
        .context(EventSnafu)?;
    let ret = manager.run(&events)?;
    log::info!("unitcore end its main loop with result: {:?}", ret);

    if ret == ManagerExit::Reexec {
        manager.serialize_to(state_file)?;
        drop(manager);
        do_reexecute();
    }
    Ok(())
}

fn set_child_reaper() {
    let ret = unsafe { prctl(PR_SET_CHILD_SUBREAPER, 1, 0, 0, 0) };

    if ret < 0 {
        log::warn!("failed to set child reaper, errno: {}", ret);
    }
}

fn do_reexecute() {
    let mut args: Vec<String> = env::args().collect();
    if args.is_empty() {
        log::error!("Failed to re-execute: no program path");
        exit(1);
    }
    let path = args.remove(0);

    // the previous run may itself have been a re-execution
    args.retain(|a| a != "--deserialize");
    args.push("--deserialize".to_string());

    log::info!("Re-executing {} {:?}", path, args);
    let err = Command::new(&path).args(&args).exec();
    log::error!("Failed to re-execute {}: {}", path, err);
    exit(err.raw_os_error().unwrap_or(1));
}
