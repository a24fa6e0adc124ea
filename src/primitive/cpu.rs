// SPDX-License-Identifier: PMPL-1.0-or-later

//! CPU saturation.
//!
//! The worker spins one busy-loop thread per requested core. Below 100% the
//! load is capped by a cgroup quota where one is available, otherwise by the
//! worker's own duty cycle.

use super::{Mode, Primitive, PrimitiveEnv};
use crate::util::parse_cpu_list;
use crate::util::process::{find_pids, ProcessQuery};
use anyhow::{Context, Result};
use clap::Parser;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};

pub const CGROUP_NAME: &str = "faultline_burncpu";
pub const CFS_PERIOD_US: u64 = 200_000;
const DUTY_PERIOD: Duration = Duration::from_millis(100);

#[derive(Debug, Parser)]
#[command(name = "chaos_burncpu", about = "Burn CPU on some or all cores")]
pub struct CpuArgs {
    #[arg(long)]
    pub start: bool,
    #[arg(long)]
    pub stop: bool,
    #[arg(long)]
    pub nohup: bool,
    /// Number of cores to burn, defaults to all
    #[arg(long = "cpu-count")]
    pub cpu_count: Option<usize>,
    /// Cores to burn, e.g. 0-1,3
    #[arg(long = "cpu-list")]
    pub cpu_list: Option<String>,
    /// Load per core, 1-100
    #[arg(long = "cpu-percent")]
    pub cpu_percent: Option<u32>,
    /// Core a pinned worker was started for
    #[arg(long = "cpu-processor", hide = true)]
    pub cpu_processor: Option<String>,
    #[arg(long = "cgroup-root", default_value = "/sys/fs/cgroup", hide = true)]
    pub cgroup_root: PathBuf,
}

/// Anything outside 1..=100 burns flat out.
pub fn normalize_percent(percent: Option<u32>) -> u32 {
    match percent {
        Some(percent) if (1..=100).contains(&percent) => percent,
        _ => 100,
    }
}

pub fn cpu_quota(cores: usize, percent: u32) -> u64 {
    2000 * cores as u64 * percent as u64
}

fn available_cores() -> usize {
    thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CgroupVersion {
    V1,
    V2,
}

/// The `faultline_burncpu` cpu cgroup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpuCgroup {
    pub version: CgroupVersion,
    pub dir: PathBuf,
}

impl CpuCgroup {
    /// v2 exposes `cgroup.controllers` at the root, v1 mounts a `cpu` hierarchy.
    pub fn locate(root: &Path) -> Self {
        if root.join("cgroup.controllers").exists() {
            Self {
                version: CgroupVersion::V2,
                dir: root.join(CGROUP_NAME),
            }
        } else {
            Self {
                version: CgroupVersion::V1,
                dir: root.join("cpu").join(CGROUP_NAME),
            }
        }
    }

    pub fn create(&self, cores: usize, percent: u32) -> Result<()> {
        let quota = cpu_quota(cores, percent);
        if self.version == CgroupVersion::V2 {
            if let Some(parent) = self.dir.parent() {
                if let Err(err) = fs::write(parent.join("cgroup.subtree_control"), "+cpu") {
                    warn!(error = %err, "could not enable the cpu controller");
                }
            }
        }
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating cgroup {}", self.dir.display()))?;
        match self.version {
            CgroupVersion::V2 => self.write("cpu.max", &format!("{} {}", quota, CFS_PERIOD_US)),
            CgroupVersion::V1 => {
                self.write("cpu.cfs_period_us", &CFS_PERIOD_US.to_string())?;
                self.write("cpu.cfs_quota_us", &quota.to_string())
            }
        }
    }

    pub fn add(&self, pid: &str) -> Result<()> {
        self.write("cgroup.procs", pid)
    }

    pub fn remove(&self) -> Result<()> {
        if !self.dir.exists() {
            return Ok(());
        }
        fs::remove_dir(&self.dir).with_context(|| format!("removing cgroup {}", self.dir.display()))
    }

    fn write(&self, file: &str, value: &str) -> Result<()> {
        let path = self.dir.join(file);
        fs::write(&path, value).with_context(|| format!("writing {}", path.display()))
    }
}

pub fn run(env: &PrimitiveEnv, args: &CpuArgs) -> Result<String, String> {
    match Mode::from_flags(args.start, args.stop, args.nohup)? {
        Mode::Start => start(env, args),
        Mode::Stop => Ok(stop(env, args)),
        Mode::Nohup => {
            let threads = args.cpu_count.unwrap_or_else(available_cores).max(1);
            burn(threads, normalize_percent(args.cpu_percent));
            Ok(String::new())
        }
    }
}

fn start(env: &PrimitiveEnv, args: &CpuArgs) -> Result<String, String> {
    let percent = normalize_percent(args.cpu_percent);
    let cores = match args.cpu_list.as_deref().filter(|list| !list.is_empty()) {
        Some(list) => parse_cpu_list(list, available_cores())
            .map_err(|err| format!("--cpu-list: {:#}", err))?,
        None => Vec::new(),
    };
    let count = if cores.is_empty() {
        args.cpu_count
            .filter(|count| *count > 0)
            .unwrap_or_else(available_cores)
            .min(available_cores())
    } else {
        cores.len()
    };

    let cgroup = if cfg!(target_os = "linux") && percent < 100 {
        let cgroup = CpuCgroup::locate(&args.cgroup_root);
        match cgroup.create(count, percent) {
            Ok(()) => Some(cgroup),
            Err(err) => {
                warn!(error = %format!("{:#}", err), "cgroup unavailable, falling back to duty cycle");
                None
            }
        }
    } else {
        None
    };
    // Under a cgroup quota the worker itself runs flat out.
    let worker_percent = if cgroup.is_some() { 100 } else { percent };

    let launched = if cores.is_empty() {
        env.spawn_worker(
            Primitive::BurnCpu,
            &format!("--cpu-count {} --cpu-percent {}", count, worker_percent),
        )
    } else {
        start_pinned(env, &cores, worker_percent)
    };
    if let Err(err) = launched {
        stop(env, args);
        return Err(err);
    }

    env.settle();
    let pids = env.worker_pids(Primitive::BurnCpu)?;
    if pids.is_empty() {
        stop(env, args);
        return Err(env
            .logged_error(Primitive::BurnCpu)
            .unwrap_or_else(|| format!("{} worker did not start", Primitive::BurnCpu.binary())));
    }
    if let Some(cgroup) = &cgroup {
        for pid in &pids {
            if let Err(err) = cgroup.add(pid) {
                stop(env, args);
                return Err(format!("{:#}", err));
            }
        }
    }
    info!(cores = count, percent, "cpu burn started");
    Ok("success".to_string())
}

fn start_pinned(env: &PrimitiveEnv, cores: &[String], percent: u32) -> Result<(), String> {
    for core in cores {
        env.spawn_worker(
            Primitive::BurnCpu,
            &format!("--cpu-count 1 --cpu-percent {} --cpu-processor {}", percent, core),
        )?;
        let marker = format!("--cpu-processor {}", core);
        let query = ProcessQuery::command_line(Primitive::BurnCpu.binary()).containing(&marker);
        for pid in find_pids(env.channel.as_ref(), &env.request, &query)? {
            env.exec("taskset", &format!("-a -cp {} {}", core, pid))?;
        }
    }
    Ok(())
}

fn stop(env: &PrimitiveEnv, args: &CpuArgs) -> String {
    if let Err(err) = env.kill_workers(Primitive::BurnCpu) {
        warn!(error = %err, "killing cpu workers");
    }
    if cfg!(target_os = "linux") {
        let cgroup = CpuCgroup::locate(&args.cgroup_root);
        // Killed tasks take a moment to leave the group.
        let deadline = Instant::now() + Duration::from_secs(2);
        while let Err(err) = cgroup.remove() {
            if Instant::now() >= deadline {
                warn!(error = %format!("{:#}", err), "cgroup left behind");
                break;
            }
            thread::sleep(Duration::from_millis(100));
        }
    }
    "success".to_string()
}

/// Busy for `percent` of every period on each of `threads` threads. Never returns.
pub fn burn(threads: usize, percent: u32) {
    let busy = DUTY_PERIOD * percent / 100;
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            thread::spawn(move || {
                let mut acc: u64 = 0x9e37_79b9;
                loop {
                    let started = Instant::now();
                    while started.elapsed() < busy {
                        acc = acc.wrapping_mul(6364136223846793005).wrapping_add(1);
                        std::hint::black_box(acc);
                    }
                    if busy < DUTY_PERIOD {
                        thread::sleep(DUTY_PERIOD - busy);
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        let _ = handle.join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn percent_outside_range_is_full() {
        assert_eq!(normalize_percent(None), 100);
        assert_eq!(normalize_percent(Some(0)), 100);
        assert_eq!(normalize_percent(Some(150)), 100);
        assert_eq!(normalize_percent(Some(40)), 40);
    }

    #[test]
    fn quota_scales_with_cores_and_percent() {
        assert_eq!(cpu_quota(1, 100), CFS_PERIOD_US);
        assert_eq!(cpu_quota(2, 50), 200_000);
        assert_eq!(cpu_quota(4, 25), 200_000);
    }

    #[test]
    fn v1_cgroup_files() {
        let root = TempDir::new().expect("tempdir should be created");
        let cgroup = CpuCgroup::locate(root.path());
        assert_eq!(cgroup.version, CgroupVersion::V1);
        cgroup.create(2, 30).expect("cgroup should be created");
        let read = |name: &str| fs::read_to_string(cgroup.dir.join(name)).expect("file readable");
        assert_eq!(read("cpu.cfs_period_us"), "200000");
        assert_eq!(read("cpu.cfs_quota_us"), "120000");
    }

    #[test]
    fn v2_cgroup_writes_cpu_max() {
        let root = TempDir::new().expect("tempdir should be created");
        fs::write(root.path().join("cgroup.controllers"), "cpu io memory").expect("write");
        let cgroup = CpuCgroup::locate(root.path());
        assert_eq!(cgroup.version, CgroupVersion::V2);
        cgroup.create(1, 50).expect("cgroup should be created");
        let max = fs::read_to_string(cgroup.dir.join("cpu.max")).expect("cpu.max readable");
        assert_eq!(max, "100000 200000");
        assert_eq!(
            fs::read_to_string(root.path().join("cgroup.subtree_control")).expect("readable"),
            "+cpu"
        );
    }
}
