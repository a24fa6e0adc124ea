// SPDX-License-Identifier: PMPL-1.0-or-later

//! Memory pressure by filling a tmpfs mount.

use super::{Mode, Primitive, PrimitiveEnv};
use clap::Parser;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const TMPFS_DIR: &str = "burnmem_tmpfs";
pub const CHUNK_MB: u64 = 128;
const TICK: Duration = Duration::from_secs(3);

#[derive(Debug, Parser)]
#[command(name = "chaos_burnmem", about = "Hold memory usage at a target percentage")]
pub struct MemArgs {
    #[arg(long)]
    pub start: bool,
    #[arg(long)]
    pub stop: bool,
    #[arg(long)]
    pub nohup: bool,
    /// Target memory usage, 1-100
    #[arg(long = "mem-percent", default_value_t = 100)]
    pub mem_percent: u32,
}

/// The two `/proc/meminfo` figures the worker steers by, in kB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemInfo {
    pub total_kb: u64,
    pub available_kb: u64,
}

pub fn parse_meminfo(content: &str) -> Option<MemInfo> {
    let line = Regex::new(r"(?m)^(\w+):\s+(\d+)\s*kB").ok()?;
    let mut total = None;
    let mut available = None;
    let mut free = 0u64;
    let mut buffers = 0u64;
    let mut cached = 0u64;
    for caps in line.captures_iter(content) {
        let value: u64 = caps[2].parse().ok()?;
        match &caps[1] {
            "MemTotal" => total = Some(value),
            "MemAvailable" => available = Some(value),
            "MemFree" => free = value,
            "Buffers" => buffers = value,
            "Cached" => cached = value,
            _ => {}
        }
    }
    // Older kernels have no MemAvailable.
    let available = available.unwrap_or(free + buffers + cached);
    Some(MemInfo {
        total_kb: total?,
        available_kb: available,
    })
}

/// Megabytes to add (positive) or release (negative) to reach `percent` usage.
pub fn need_mb(info: &MemInfo, percent: u32) -> i64 {
    let used = info.total_kb.saturating_sub(info.available_kb) as i64;
    let target = (info.total_kb as i64) * percent as i64 / 100;
    (target - used) / 1024
}

/// Splits a growth into files of at most [`CHUNK_MB`].
pub fn plan_files(need_mb: u64) -> Vec<u64> {
    let mut chunks = vec![CHUNK_MB; (need_mb / CHUNK_MB) as usize];
    if need_mb % CHUNK_MB > 0 {
        chunks.push(need_mb % CHUNK_MB);
    }
    chunks
}

/// Newest-first files whose removal does not undershoot `excess_mb`.
pub fn plan_release(files: &[(String, u64)], excess_mb: u64) -> Vec<String> {
    let mut left = excess_mb;
    let mut release = Vec::new();
    for (name, size) in files.iter().rev() {
        if *size <= left {
            left -= size;
            release.push(name.clone());
        }
    }
    release
}

pub fn is_mounted(mounts: &str, dir: &Path) -> bool {
    let dir = dir.to_string_lossy();
    mounts
        .lines()
        .any(|line| line.split_whitespace().nth(1) == Some(dir.as_ref()))
}

fn tmpfs_dir(env: &PrimitiveEnv) -> PathBuf {
    env.work_dir.join(TMPFS_DIR)
}

pub fn run(env: &PrimitiveEnv, args: &MemArgs) -> Result<String, String> {
    match Mode::from_flags(args.start, args.stop, args.nohup)? {
        Mode::Start => start(env, args),
        Mode::Stop => Ok(stop(env)),
        Mode::Nohup => worker(env, args.mem_percent),
    }
}

fn start(env: &PrimitiveEnv, args: &MemArgs) -> Result<String, String> {
    if !(1..=100).contains(&args.mem_percent) {
        return Err("--mem-percent must be an integer between 1 and 100".to_string());
    }
    let dir = tmpfs_dir(env);
    fs::create_dir_all(&dir).map_err(|err| format!("create {}: {}", dir.display(), err))?;
    let mounts = fs::read_to_string("/proc/mounts").unwrap_or_default();
    if !is_mounted(&mounts, &dir) {
        env.exec("mount", &format!("-t tmpfs tmpfs {} -o size=100%", dir.display()))?;
    }
    if let Err(err) = env.spawn_worker(Primitive::BurnMem, &format!("--mem-percent {}", args.mem_percent)) {
        stop(env);
        return Err(err);
    }
    env.settle();
    if let Some(err) = env.logged_error(Primitive::BurnMem) {
        stop(env);
        return Err(err);
    }
    if env.worker_pids(Primitive::BurnMem)?.is_empty() {
        stop(env);
        return Err(format!("{} worker did not start", Primitive::BurnMem.binary()));
    }
    info!(percent = args.mem_percent, "memory burn started");
    Ok("success".to_string())
}

fn stop(env: &PrimitiveEnv) -> String {
    if let Err(err) = env.kill_workers(Primitive::BurnMem) {
        warn!(error = %err, "killing memory workers");
    }
    let dir = tmpfs_dir(env);
    if dir.exists() {
        if let Err(err) = env.exec("umount", &dir.display().to_string()) {
            debug!(error = %err, "tmpfs not mounted");
        }
        if let Err(err) = fs::remove_dir_all(&dir) {
            warn!(dir = %dir.display(), error = %err, "removing tmpfs dir");
        }
    }
    "success".to_string()
}

fn existing_files(dir: &Path) -> Vec<(String, u64)> {
    let mut files: Vec<(String, u64)> = fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|entry| entry.ok())
                .filter_map(|entry| {
                    let size = entry.metadata().ok()?.len() / (1024 * 1024);
                    Some((entry.file_name().to_string_lossy().into_owned(), size))
                })
                .collect()
        })
        .unwrap_or_default();
    files.sort();
    files
}

fn worker(env: &PrimitiveEnv, percent: u32) -> Result<String, String> {
    let dir = tmpfs_dir(env);
    let mut sequence = existing_files(&dir).len();
    loop {
        let content = fs::read_to_string("/proc/meminfo")
            .map_err(|err| format!("read /proc/meminfo: {}", err))?;
        let info = parse_meminfo(&content).ok_or("unrecognised /proc/meminfo")?;
        let need = need_mb(&info, percent);
        debug!(need_mb = need, "memory tick");
        if need > 0 {
            for size in plan_files(need as u64) {
                sequence += 1;
                let file = dir.join(format!("burnmem_{:06}.dat", sequence));
                env.exec(
                    "dd",
                    &format!("if=/dev/zero of={} bs=1M count={}", file.display(), size),
                )?;
            }
        } else if need < 0 {
            for name in plan_release(&existing_files(&dir), need.unsigned_abs()) {
                if let Err(err) = fs::remove_file(dir.join(&name)) {
                    warn!(file = %name, error = %err, "releasing memory file");
                }
            }
        }
        thread::sleep(TICK);
    }
}
