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

//! Log targets.
use log::{Level, Log};
use std::{
    fs::{self, File, OpenOptions},
    io::{self, Write},
    os::unix::{net::UnixDatagram, prelude::OpenOptionsExt},
    path::{Path, PathBuf},
    sync::Mutex,
};

/// Logger instance should implement `ReInit` too.
pub trait ReInit: Log {
    /// Define how logger instance reinitializes.
    fn reinit(&self) {}
}

fn timestamp() -> String {
    let time: libc::time_t = unsafe { libc::time(std::ptr::null_mut()) };
    let mut tm: libc::tm = unsafe { std::mem::zeroed() };
    if unsafe { libc::localtime_r(&time, &mut tm) }.is_null() {
        return String::from("0000-00-00 00:00:00");
    }
    format!(
        "{:0>4}-{:0>2}-{:0>2} {:0>2}:{:0>2}:{:0>2}",
        tm.tm_year + 1900,
        tm.tm_mon + 1,
        tm.tm_mday,
        tm.tm_hour,
        tm.tm_min,
        tm.tm_sec
    )
}

fn format_record(record: &log::Record) -> String {
    format!(
        "{} {:<5} {} {}\n",
        timestamp(),
        record.level(),
        record.module_path().unwrap_or("unknown"),
        record.args()
    )
}

struct ConsoleLogger;

impl ReInit for ConsoleLogger {}

impl Log for ConsoleLogger {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        let _ = io::stderr().write_all(format_record(record).as_bytes());
    }

    fn flush(&self) {
        let _ = io::stderr().flush();
    }
}

struct SysLogger {
    ident: String,
    dgram: Mutex<Option<UnixDatagram>>,
}

impl SysLogger {
    fn new(ident: &str) -> io::Result<Self> {
        Ok(SysLogger {
            ident: ident.to_string(),
            dgram: Mutex::new(Some(Self::connect()?)),
        })
    }

    fn connect() -> io::Result<UnixDatagram> {
        let sock = UnixDatagram::unbound()?;
        sock.connect("/dev/log")?;
        Ok(sock)
    }

    fn priority(level: Level) -> u8 {
        /* facility daemon (3) << 3 | severity */
        let severity = match level {
            Level::Error => 3,
            Level::Warn => 4,
            Level::Info => 6,
            Level::Debug | Level::Trace => 7,
        };
        (3 << 3) | severity
    }
}

impl ReInit for SysLogger {
    fn reinit(&self) {
        let sock = match Self::connect() {
            Ok(v) => v,
            Err(e) => {
                eprintln!("Failed to connect /dev/log: {}", e);
                return;
            }
        };
        if let Ok(mut dgram) = self.dgram.lock() {
            *dgram = Some(sock);
        }
    }
}

impl Log for SysLogger {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        let msg = format!(
            "<{}>{}[{}]: {}",
            Self::priority(record.level()),
            self.ident,
            std::process::id(),
            record.args()
        );
        if let Ok(dgram) = self.dgram.lock() {
            if let Some(sock) = dgram.as_ref() {
                let _ = sock.send(msg.as_bytes());
            }
        }
    }

    fn flush(&self) {}
}

/// Appends to one file, rotating it to `<name>.1 .. <name>.<number-1>` once it grows
/// past `max_size` bytes.
struct FileLogger {
    file_path: PathBuf,
    file_number: u32,
    max_size: u64,
    file: Mutex<Option<File>>,
}

impl FileLogger {
    fn file_open(file_path: &Path) -> io::Result<File> {
        if let Some(dir) = file_path.parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                fs::create_dir_all(dir)?;
            }
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .mode(0o600)
            .open(file_path)
    }

    fn new(file_path: PathBuf, max_size_kb: u32, file_number: u32) -> io::Result<Self> {
        let file = Self::file_open(&file_path)?;
        Ok(FileLogger {
            file_path,
            file_number,
            max_size: u64::from(max_size_kb) * 1024,
            file: Mutex::new(Some(file)),
        })
    }

    fn rotated(&self, num: u32) -> PathBuf {
        let mut name = self.file_path.clone().into_os_string();
        name.push(format!(".{}", num));
        PathBuf::from(name)
    }

    fn rotate(&self) -> io::Result<File> {
        if self.file_number <= 1 {
            let _ = fs::remove_file(&self.file_path);
        } else {
            let _ = fs::remove_file(self.rotated(self.file_number - 1));
            for num in (1..self.file_number - 1).rev() {
                let src = self.rotated(num);
                if src.exists() {
                    fs::rename(&src, self.rotated(num + 1))?;
                }
            }
            fs::rename(&self.file_path, self.rotated(1))?;
        }
        Self::file_open(&self.file_path)
    }
}

impl ReInit for FileLogger {
    fn reinit(&self) {
        match Self::file_open(&self.file_path) {
            Ok(file) => {
                if let Ok(mut v) = self.file.lock() {
                    *v = Some(file);
                }
            }
            Err(e) => eprintln!(
                "Failed to open log file '{}': {}",
                self.file_path.display(),
                e
            ),
        }
    }
}

impl Log for FileLogger {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        let mut guard = match self.file.lock() {
            Ok(v) => v,
            Err(_) => return,
        };
        let file = match guard.as_mut() {
            Some(v) => v,
            None => return,
        };
        if let Err(e) = file.write_all(format_record(record).as_bytes()) {
            eprintln!("Failed to write log file: {}", e);
            return;
        }

        let size = file.metadata().map(|m| m.len()).unwrap_or(0);
        if self.max_size > 0 && size > self.max_size {
            match self.rotate() {
                Ok(new) => *guard = Some(new),
                Err(e) => eprintln!("Failed to rotate log file: {}", e),
            }
        }
    }

    fn flush(&self) {
        if let Ok(mut guard) = self.file.lock() {
            if let Some(file) = guard.as_mut() {
                let _ = file.flush();
            }
        }
    }
}

/// Collect different kinds of loggers together.
struct CombinedLogger {
    loggers: Vec<Box<dyn ReInit>>,
}

impl ReInit for CombinedLogger {
    fn reinit(&self) {
        for logger in self.loggers.iter() {
            logger.reinit();
        }
    }
}

impl Log for CombinedLogger {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        for logger in &self.loggers {
            logger.log(record);
        }
    }

    fn flush(&self) {
        for logger in &self.loggers {
            logger.flush();
        }
    }
}

/// Initialize the global logger instance, replacing the previous one.
///
/// Available log `targets` are `console`, `syslog` and `file`; unknown targets are ignored.
/// `file_size` (in KiB) and `file_number` only apply to the `file` target; a size of 0
/// disables rotation.
pub fn init_log(
    name: &str,
    level: Level,
    targets: Vec<&str>,
    file_path: &str,
    file_size: u32,
    file_number: u32,
) {
    log::set_max_level(level.to_level_filter());

    let mut loggers: Vec<Box<dyn ReInit>> = Vec::new();
    for target in targets {
        let logger: Box<dyn ReInit> = match target {
            "console" => Box::new(ConsoleLogger),
            "syslog" => match SysLogger::new(name) {
                Ok(v) => Box::new(v),
                Err(e) => {
                    eprintln!("{} failed to create syslogger: {}", name, e);
                    continue;
                }
            },
            "file" => match FileLogger::new(PathBuf::from(file_path), file_size, file_number) {
                Ok(v) => Box::new(v),
                Err(e) => {
                    eprintln!(
                        "{} failed to create '{}' file logger: {}",
                        name, file_path, e
                    );
                    continue;
                }
            },
            _ => {
                eprintln!("{}: log target '{}' is strange, ignoring.", name, target);
                continue;
            }
        };
        loggers.push(logger);
    }

    if loggers.is_empty() {
        eprintln!("{}: no available log targets.", name);
    }

    crate::inner::set_boxed_logger(Box::new(CombinedLogger { loggers }));
}
