// SPDX-License-Identifier: PMPL-1.0-or-later

//! Disk IO saturation and disk fill.

use super::{Mode, Primitive, PrimitiveEnv};
use crate::util::process::{find_pids, signal_pids, ProcessQuery};
use clap::Parser;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use tracing::{info, warn};

pub const READ_FILE_MB: u64 = 600;
const BURN_BLOCKS: u64 = 100;

#[derive(Debug, Parser)]
#[command(name = "chaos_burnio", about = "Saturate disk reads and/or writes with dd")]
pub struct BurnIoArgs {
    #[arg(long)]
    pub start: bool,
    #[arg(long)]
    pub stop: bool,
    #[arg(long)]
    pub nohup: bool,
    #[arg(long, default_value = "/")]
    pub directory: PathBuf,
    /// Block size in MB
    #[arg(long, default_value_t = 10)]
    pub size: u64,
    #[arg(long)]
    pub read: bool,
    #[arg(long)]
    pub write: bool,
}

#[derive(Debug, Parser)]
#[command(name = "chaos_filldisk", about = "Fill a filesystem by size or percentage")]
pub struct FillArgs {
    #[arg(long)]
    pub start: bool,
    #[arg(long)]
    pub stop: bool,
    #[arg(long)]
    pub nohup: bool,
    #[arg(long, default_value = "/")]
    pub directory: PathBuf,
    /// Megabytes to allocate
    #[arg(long)]
    pub size: Option<u64>,
    /// Target usage of the filesystem, 1-100
    #[arg(long)]
    pub percent: Option<u32>,
}

/// `df -P` figures for one filesystem, in 1K blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskUsage {
    pub total_kb: u64,
    pub used_kb: u64,
    pub available_kb: u64,
}

impl DiskUsage {
    /// MB to allocate so usage reaches `percent`; `None` when already past it.
    pub fn fill_mb(&self, percent: u32) -> Option<u64> {
        let target = self.total_kb * percent as u64 / 100;
        let need = target.checked_sub(self.used_kb)? / 1024;
        (need > 0).then_some(need)
    }

    pub fn used_percent(&self) -> u64 {
        if self.total_kb == 0 {
            return 0;
        }
        self.used_kb * 100 / self.total_kb
    }
}

/// Reads the data line of `df -P <dir>` output.
pub fn parse_df(output: &str) -> Option<DiskUsage> {
    let line = output.lines().skip(1).find(|line| !line.trim().is_empty())?;
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 4 {
        return None;
    }
    Some(DiskUsage {
        total_kb: fields[1].parse().ok()?,
        used_kb: fields[2].parse().ok()?,
        available_kb: fields[3].parse().ok()?,
    })
}

fn require_dir(directory: &Path) -> Result<(), String> {
    if directory.is_dir() {
        Ok(())
    } else {
        Err(format!("{} is not a directory", directory.display()))
    }
}

/// Kills the workers and any `dd` still writing one of our scratch files.
fn kill_all(env: &PrimitiveEnv, primitive: Primitive) {
    if let Err(err) = env.kill_workers(primitive) {
        warn!(error = %err, "killing workers");
    }
    let marker = format!("{}.", primitive.binary());
    let query = ProcessQuery::name("dd").containing(&marker);
    match find_pids(env.channel.as_ref(), &env.request, &query) {
        Ok(pids) => {
            if let Err(err) = signal_pids(env.channel.as_ref(), &env.request, "9", &pids) {
                warn!(error = %err, "killing dd");
            }
        }
        Err(err) => warn!(error = %err, "listing dd processes"),
    }
}

fn remove_scratch(path: &Path) {
    if path.exists() {
        if let Err(err) = fs::remove_file(path) {
            warn!(file = %path.display(), error = %err, "removing scratch file");
        }
    }
}

/// Settles, then fails if the worker logged an error or is gone.
fn verify_worker(env: &PrimitiveEnv, primitive: Primitive, expect_alive: bool) -> Result<(), String> {
    env.settle();
    if let Some(err) = env.logged_error(primitive) {
        return Err(err);
    }
    if expect_alive && env.worker_pids(primitive)?.is_empty() {
        return Err(format!("{} worker did not start", primitive.binary()));
    }
    Ok(())
}

pub fn burn_files(directory: &Path) -> (PathBuf, PathBuf) {
    let binary = Primitive::BurnIo.binary();
    (
        directory.join(format!("{}.read", binary)),
        directory.join(format!("{}.write", binary)),
    )
}

pub fn run_burn(env: &PrimitiveEnv, args: &BurnIoArgs) -> Result<String, String> {
    let mode = Mode::from_flags(args.start, args.stop, args.nohup)?;
    if mode == Mode::Stop {
        kill_all(env, Primitive::BurnIo);
        let (read, write) = burn_files(&args.directory);
        remove_scratch(&read);
        remove_scratch(&write);
        return Ok("success".to_string());
    }
    if !args.read && !args.write {
        return Err("less --read or --write flag".to_string());
    }
    require_dir(&args.directory)?;
    if args.size == 0 {
        return Err("--size must be positive".to_string());
    }

    if mode == Mode::Nohup {
        return burn_worker(env, args);
    }

    let mut worker_args = format!("--directory {} --size {}", args.directory.display(), args.size);
    if args.read {
        worker_args.push_str(" --read");
    }
    if args.write {
        worker_args.push_str(" --write");
    }
    let started = env
        .spawn_worker(Primitive::BurnIo, &worker_args)
        .and_then(|()| verify_worker(env, Primitive::BurnIo, true));
    if let Err(err) = started {
        kill_all(env, Primitive::BurnIo);
        let (read, write) = burn_files(&args.directory);
        remove_scratch(&read);
        remove_scratch(&write);
        return Err(err);
    }
    info!(directory = %args.directory.display(), "io burn started");
    Ok("success".to_string())
}

fn burn_worker(env: &PrimitiveEnv, args: &BurnIoArgs) -> Result<String, String> {
    let (read_file, write_file) = burn_files(&args.directory);
    if args.read {
        env.exec(
            "dd",
            &format!(
                "if=/dev/zero of={} bs=1M count={} oflag=dsync",
                read_file.display(),
                READ_FILE_MB
            ),
        )?;
    }
    thread::scope(|scope| {
        let reader = args.read.then(|| {
            scope.spawn(|| -> Result<String, String> {
                loop {
                    env.exec(
                        "dd",
                        &format!(
                            "if={} of=/dev/null bs={}M count={} iflag=dsync,direct,fullblock",
                            read_file.display(),
                            args.size,
                            READ_FILE_MB / args.size.max(1)
                        ),
                    )?;
                }
            })
        });
        let writer = args.write.then(|| {
            scope.spawn(|| -> Result<String, String> {
                loop {
                    env.exec(
                        "dd",
                        &format!(
                            "if=/dev/zero of={} bs={}M count={} oflag=dsync",
                            write_file.display(),
                            args.size,
                            BURN_BLOCKS
                        ),
                    )?;
                }
            })
        });
        for handle in [reader, writer].into_iter().flatten() {
            match handle.join() {
                Ok(result) => result?,
                Err(_) => return Err("io worker thread panicked".to_string()),
            };
        }
        Ok(String::new())
    })
}

pub fn fill_file(directory: &Path) -> PathBuf {
    directory.join(format!("{}.log.dat", Primitive::FillDisk.binary()))
}

pub fn run_fill(env: &PrimitiveEnv, args: &FillArgs) -> Result<String, String> {
    let mode = Mode::from_flags(args.start, args.stop, args.nohup)?;
    let file = fill_file(&args.directory);
    if mode == Mode::Stop {
        kill_all(env, Primitive::FillDisk);
        remove_scratch(&file);
        return Ok("success".to_string());
    }
    require_dir(&args.directory)?;

    let size_mb = match (args.size.filter(|size| *size > 0), args.percent) {
        (Some(size), _) => size,
        (None, Some(percent)) => {
            if !(1..=100).contains(&percent) {
                return Err("--percent must be an integer between 1 and 100".to_string());
            }
            let output = env.exec("df", &format!("-P {}", args.directory.display()))?;
            let usage = parse_df(&output).ok_or_else(|| format!("unrecognised df output: {}", output))?;
            usage.fill_mb(percent).ok_or_else(|| {
                format!(
                    "the disk has been used {}%, larger than expected",
                    usage.used_percent()
                )
            })?
        }
        (None, None) => return Err("less --size or --percent flag".to_string()),
    };

    if mode == Mode::Nohup {
        let path = file.display();
        if let Err(err) = env.exec("fallocate", &format!("-l {}M {}", size_mb, path)) {
            warn!(error = %err, "fallocate failed, falling back to dd");
            env.exec("dd", &format!("if=/dev/zero of={} bs=1M count={} iflag=fullblock", path, size_mb))?;
        }
        return Ok("success".to_string());
    }

    let started = env
        .spawn_worker(
            Primitive::FillDisk,
            &format!("--directory {} --size {}", args.directory.display(), size_mb),
        )
        .and_then(|()| verify_worker(env, Primitive::FillDisk, false));
    if let Err(err) = started {
        kill_all(env, Primitive::FillDisk);
        remove_scratch(&file);
        return Err(err);
    }
    info!(directory = %args.directory.display(), size_mb, "disk fill started");
    Ok("success".to_string())
}
