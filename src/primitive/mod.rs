// SPDX-License-Identifier: PMPL-1.0-or-later

//! Fault primitives.
//!
//! Each primitive is its own binary (`chaos_*`) with `--start`, `--stop` and
//! `--nohup` modes. `--start` orchestrates and verifies, `--nohup` is the
//! detached worker, `--stop` finds the worker again by name and arguments
//! and undoes everything it left behind. Success prints to stdout and exits
//! 0; failure prints `Error: ...` to stderr and exits 1.

pub mod cpu;
pub mod disk;
pub mod dns;
pub mod drop;
pub mod mem;
pub mod network;
pub mod process;

use crate::channel::{Channel, LocalChannel};
use crate::config::HOME_ENV;
use crate::logging;
use crate::types::ExecRequest;
use crate::util::process::{find_pids, signal_pids, ProcessQuery};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{error, info};

/// Prefix the start path greps worker logs for.
pub const ERROR_MARKER: &str = "Error:";

/// How long `--start` waits before checking on a detached worker.
pub const SETTLE: Duration = Duration::from_secs(1);

/// One OS-level fault, and the binary that implements it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    BurnCpu,
    BurnMem,
    BurnIo,
    FillDisk,
    DelayNetwork,
    LossNetwork,
    DropNetwork,
    KillProcess,
    StopProcess,
    ChangeDns,
}

impl Primitive {
    pub const ALL: [Primitive; 10] = [
        Primitive::BurnCpu,
        Primitive::BurnMem,
        Primitive::BurnIo,
        Primitive::FillDisk,
        Primitive::DelayNetwork,
        Primitive::LossNetwork,
        Primitive::DropNetwork,
        Primitive::KillProcess,
        Primitive::StopProcess,
        Primitive::ChangeDns,
    ];

    pub fn binary(self) -> &'static str {
        match self {
            Primitive::BurnCpu => "chaos_burncpu",
            Primitive::BurnMem => "chaos_burnmem",
            Primitive::BurnIo => "chaos_burnio",
            Primitive::FillDisk => "chaos_filldisk",
            Primitive::DelayNetwork => "chaos_delaynetwork",
            Primitive::LossNetwork => "chaos_lossnetwork",
            Primitive::DropNetwork => "chaos_dropnetwork",
            Primitive::KillProcess => "chaos_killprocess",
            Primitive::StopProcess => "chaos_stopprocess",
            Primitive::ChangeDns => "chaos_changedns",
        }
    }

    /// A killed process cannot be brought back.
    pub fn reversible(self) -> bool {
        !matches!(self, Primitive::KillProcess)
    }
}

/// What a primitive binary needs from its surroundings.
pub struct PrimitiveEnv {
    pub channel: Arc<dyn Channel>,
    pub request: ExecRequest,
    /// This binary, re-invoked for `--nohup` workers.
    pub self_path: PathBuf,
    /// Scratch space (tmpfs mounts and the like).
    pub work_dir: PathBuf,
    pub log_dir: PathBuf,
}

impl PrimitiveEnv {
    /// Environment for a primitive running as `binary` on this host.
    pub fn current(binary: &str) -> Self {
        let self_path = std::env::current_exe().unwrap_or_else(|_| PathBuf::from(binary));
        let bin_dir = self_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let work_dir = std::env::var_os(HOME_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| match bin_dir.file_name() {
                Some(name) if name == "bin" => bin_dir.parent().map(Path::to_path_buf).unwrap_or(bin_dir.clone()),
                _ => bin_dir.clone(),
            });
        let log_dir = work_dir.join("logs");
        Self {
            channel: Arc::new(LocalChannel::new(bin_dir, Duration::from_secs(60))),
            request: ExecRequest::create(),
            self_path,
            work_dir,
            log_dir,
        }
    }

    /// Runs a helper command, turning failure into its message.
    pub fn exec(&self, program: &str, args: &str) -> Result<String, String> {
        let resp = self.channel.run(&self.request, program, args);
        if resp.success {
            Ok(resp.result_text())
        } else {
            Err(resp.message())
        }
    }

    pub fn worker_log(&self, primitive: Primitive) -> PathBuf {
        self.log_dir.join(format!("{}.log", primitive.binary()))
    }

    /// `nohup <self> --nohup <args> > <log> 2>&1 &`, truncating the old log.
    pub fn spawn_worker(&self, primitive: Primitive, args: &str) -> Result<(), String> {
        fs::create_dir_all(&self.log_dir)
            .map_err(|err| format!("create log dir {}: {}", self.log_dir.display(), err))?;
        let line = format!(
            "{} --nohup {} > {} 2>&1 &",
            self.self_path.display(),
            args,
            self.worker_log(primitive).display()
        );
        self.exec("nohup", &line).map(|_| ())
    }

    pub fn worker_pids(&self, primitive: Primitive) -> Result<Vec<String>, String> {
        find_pids(
            self.channel.as_ref(),
            &self.request,
            &ProcessQuery::command_line(primitive.binary()).containing("--nohup"),
        )
    }

    pub fn kill_workers(&self, primitive: Primitive) -> Result<(), String> {
        let pids = self.worker_pids(primitive)?;
        signal_pids(self.channel.as_ref(), &self.request, "9", &pids)
    }

    /// First `Error:` line a worker wrote to its log, if any.
    pub fn logged_error(&self, primitive: Primitive) -> Option<String> {
        let content = fs::read_to_string(self.worker_log(primitive)).ok()?;
        content
            .lines()
            .find(|line| line.contains(ERROR_MARKER))
            .map(|line| line.trim().to_string())
    }

    pub fn settle(&self) {
        thread::sleep(SETTLE);
    }
}

/// Shared `--start`/`--stop`/`--nohup` selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Start,
    Stop,
    Nohup,
}

impl Mode {
    pub fn from_flags(start: bool, stop: bool, nohup: bool) -> Result<Self, String> {
        match (start, stop, nohup) {
            (true, false, false) => Ok(Mode::Start),
            (false, true, false) => Ok(Mode::Stop),
            (false, false, true) => Ok(Mode::Nohup),
            (false, false, false) => Err("less --start or --stop flag".to_string()),
            _ => Err("only one of --start, --stop and --nohup may be given".to_string()),
        }
    }
}

/// Entry point shared by the `chaos_*` binaries.
pub fn main_with<F>(primitive: Primitive, run: F) -> ExitCode
where
    F: FnOnce(&PrimitiveEnv) -> Result<String, String>,
{
    let env = PrimitiveEnv::current(primitive.binary());
    logging::init(&env.log_dir, false);
    let result = run(&env);
    match &result {
        Ok(_) => info!(primitive = primitive.binary(), "done"),
        Err(err) => error!(primitive = primitive.binary(), error = %err, "failed"),
    }
    finish(result)
}

/// Prints the outcome the way callers expect and picks the exit code.
pub fn finish(result: Result<String, String>) -> ExitCode {
    match result {
        Ok(output) => {
            if !output.is_empty() {
                println!("{}", output);
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            if err.starts_with(ERROR_MARKER) {
                eprintln!("{}", err);
            } else {
                eprintln!("{} {}", ERROR_MARKER, err);
            }
            ExitCode::FAILURE
        }
    }
}
