// SPDX-License-Identifier: PMPL-1.0-or-later

//! Kill or suspend processes selected by name or command line.

use super::{Mode, Primitive, PrimitiveEnv};
use crate::util::process::{find_pids, signal_pids, ProcessQuery};
use clap::Parser;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "chaos_killprocess", about = "Send a signal to matching processes")]
pub struct KillArgs {
    #[arg(long)]
    pub start: bool,
    #[arg(long)]
    pub stop: bool,
    #[arg(long)]
    pub nohup: bool,
    /// Substring of the command line
    #[arg(long)]
    pub process: Option<String>,
    /// Exact command name
    #[arg(long = "process-cmd")]
    pub process_cmd: Option<String>,
    #[arg(long, default_value = "9")]
    pub signal: String,
}

#[derive(Debug, Parser)]
#[command(name = "chaos_stopprocess", about = "Suspend matching processes until stopped")]
pub struct StopArgs {
    #[arg(long)]
    pub start: bool,
    #[arg(long)]
    pub stop: bool,
    #[arg(long)]
    pub nohup: bool,
    #[arg(long)]
    pub process: Option<String>,
    #[arg(long = "process-cmd")]
    pub process_cmd: Option<String>,
}

/// The lookup and the name used in "not found" messages.
pub fn select<'a>(
    process: Option<&'a str>,
    process_cmd: Option<&'a str>,
) -> Result<(ProcessQuery<'a>, &'a str), String> {
    match (
        process.filter(|p| !p.is_empty()),
        process_cmd.filter(|c| !c.is_empty()),
    ) {
        (Some(process), _) => Ok((ProcessQuery::command_line(process), process)),
        (None, Some(cmd)) => Ok((ProcessQuery::name(cmd), cmd)),
        (None, None) => Err("less --process or --process-cmd flag".to_string()),
    }
}

pub fn run_kill(env: &PrimitiveEnv, args: &KillArgs) -> Result<String, String> {
    match Mode::from_flags(args.start, args.stop, args.nohup)? {
        Mode::Start => {
            let (query, name) = select(args.process.as_deref(), args.process_cmd.as_deref())?;
            let signal = args.signal.trim_start_matches('-');
            if signal.is_empty() {
                return Err("less --signal flag".to_string());
            }
            let pids = find_pids(env.channel.as_ref(), &env.request, &query)?;
            if pids.is_empty() {
                return Err(format!("{} process not found", name));
            }
            signal_pids(env.channel.as_ref(), &env.request, signal, &pids)?;
            info!(process = name, signal, count = pids.len(), "processes signalled");
            Ok(pids.join(" "))
        }
        Mode::Stop => Ok("success".to_string()),
        Mode::Nohup => Err(format!("{} has no worker mode", Primitive::KillProcess.binary())),
    }
}

pub fn run_stop(env: &PrimitiveEnv, args: &StopArgs) -> Result<String, String> {
    let mode = Mode::from_flags(args.start, args.stop, args.nohup)?;
    let (query, name) = select(args.process.as_deref(), args.process_cmd.as_deref())?;
    match mode {
        Mode::Start => {
            let pids = find_pids(env.channel.as_ref(), &env.request, &query)?;
            if pids.is_empty() {
                return Err(format!("{} process not found", name));
            }
            signal_pids(env.channel.as_ref(), &env.request, "STOP", &pids)?;
            info!(process = name, count = pids.len(), "processes suspended");
            Ok(pids.join(" "))
        }
        Mode::Stop => {
            let pids = find_pids(env.channel.as_ref(), &env.request, &query)?;
            signal_pids(env.channel.as_ref(), &env.request, "CONT", &pids)?;
            Ok("success".to_string())
        }
        Mode::Nohup => Err(format!("{} has no worker mode", Primitive::StopProcess.binary())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MockChannel;
    use crate::transport::Response;
    use crate::types::ExecRequest;
    use std::path::PathBuf;
    use std::sync::Arc;

    const PS: &str = "  4242     1 java   java -jar app.jar\n  4343     1 nginx  nginx: master\n";

    fn env(channel: Arc<MockChannel>) -> PrimitiveEnv {
        PrimitiveEnv {
            channel,
            request: ExecRequest::create(),
            self_path: PathBuf::from("/opt/faultline/bin/chaos_killprocess"),
            work_dir: PathBuf::from("/opt/faultline"),
            log_dir: PathBuf::from("/opt/faultline/logs"),
        }
    }

    #[test]
    fn kill_signals_matches_only() {
        let channel = Arc::new(MockChannel::new().respond("ps -eo", Response::success(PS)));
        let args = KillArgs::parse_from(["chaos_killprocess", "--start", "--process", "app.jar", "--signal", "15"]);
        let out = run_kill(&env(channel.clone()), &args).expect("kill should succeed");
        assert_eq!(out, "4242");
        assert_eq!(channel.commands().last().map(String::as_str), Some("kill -15 4242"));
    }

    #[test]
    fn kill_reports_missing_process() {
        let channel = Arc::new(MockChannel::new().respond("ps -eo", Response::success(PS)));
        let args = KillArgs::parse_from(["chaos_killprocess", "--start", "--process-cmd", "redis"]);
        let err = run_kill(&env(channel), &args).expect_err("nothing to kill");
        assert_eq!(err, "redis process not found");
    }

    #[test]
    fn stop_process_resumes_on_stop() {
        let channel = Arc::new(MockChannel::new().respond("ps -eo", Response::success(PS)));
        let args = StopArgs::parse_from(["chaos_stopprocess", "--stop", "--process-cmd", "nginx"]);
        run_stop(&env(channel.clone()), &args).expect("resume should succeed");
        assert_eq!(channel.commands().last().map(String::as_str), Some("kill -CONT 4343"));
    }
}
