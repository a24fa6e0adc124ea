// SPDX-License-Identifier: PMPL-1.0-or-later

use crate::config::Config;
use crate::primitive::Primitive;
use crate::store::Store;
use anyhow::{anyhow, Result};
use colored::Colorize;
use std::env;
use std::path::{Path, PathBuf};

/// Tools the host primitives shell out to; a missing one disables some faults.
const HOST_TOOLS: [(&str, &str); 6] = [
    ("ps", "process lookup"),
    ("tc", "network delay/loss"),
    ("iptables", "network drop"),
    ("nohup", "detached workers"),
    ("dd", "disk and memory burn"),
    ("taskset", "cpu pinning"),
];

const REMOTE_TOOLS: [(&str, &str); 2] = [("docker", "docker target"), ("kubectl", "k8s target")];

pub fn run_check(config: &Config) -> Result<()> {
    println!("faultline environment check");

    let checks = collect(config);
    println!();
    for entry in &checks {
        entry.print();
    }

    if checks.iter().any(|entry| entry.level == Level::Error) {
        Err(anyhow!("environment check reported issues"))
    } else {
        Ok(())
    }
}

fn collect(config: &Config) -> Vec<Diagnostic> {
    let mut checks = vec![Diagnostic::ok(
        "version",
        format!("faultline {}", env!("CARGO_PKG_VERSION")),
    )];
    checks.push(check_store(&config.db_path));
    checks.push(check_directory("log directory", &config.log_dir));

    let missing: Vec<&str> = Primitive::ALL
        .iter()
        .map(|primitive| primitive.binary())
        .filter(|binary| !config.bin_dir.join(binary).is_file())
        .collect();
    checks.push(if missing.is_empty() {
        Diagnostic::ok(
            "primitive binaries",
            format!("{} in {}", Primitive::ALL.len(), config.bin_dir.display()),
        )
    } else {
        Diagnostic::error(
            "primitive binaries",
            format!("missing in {}: {}", config.bin_dir.display(), missing.join(", ")),
        )
    });

    for (tool, purpose) in HOST_TOOLS {
        checks.push(check_tool(tool, purpose, Level::Warn));
    }
    for (tool, purpose) in REMOTE_TOOLS {
        checks.push(check_tool(tool, purpose, Level::Warn));
    }
    checks
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Level {
    Ok,
    Warn,
    Error,
}

impl Level {
    fn tag(self) -> String {
        match self {
            Level::Ok => "OK".green().to_string(),
            Level::Warn => "WARN".yellow().to_string(),
            Level::Error => "ERR".red().bold().to_string(),
        }
    }
}

struct Diagnostic {
    label: &'static str,
    level: Level,
    detail: String,
}

impl Diagnostic {
    fn new(label: &'static str, level: Level, detail: String) -> Self {
        Self {
            label,
            level,
            detail,
        }
    }

    fn ok(label: &'static str, detail: String) -> Self {
        Self::new(label, Level::Ok, detail)
    }

    fn error(label: &'static str, detail: String) -> Self {
        Self::new(label, Level::Error, detail)
    }

    fn print(&self) {
        println!("  [{}] {:22} {}", self.level.tag(), self.label, self.detail);
    }
}

fn check_store(path: &Path) -> Diagnostic {
    match Store::open(path).and_then(|store| store.schema_version()) {
        Ok(version) => Diagnostic::ok(
            "store",
            format!("{} (schema {})", path.display(), version),
        ),
        Err(err) => Diagnostic::error("store", format!("{}: {:#}", path.display(), err)),
    }
}

fn check_directory(label: &'static str, path: &Path) -> Diagnostic {
    if path.is_dir() {
        Diagnostic::ok(label, format!("{} exists", path.display()))
    } else if path.exists() {
        Diagnostic::error(label, format!("{} exists but is not a directory", path.display()))
    } else {
        Diagnostic::new(
            label,
            Level::Warn,
            format!("{} missing (created on first run)", path.display()),
        )
    }
}

fn check_tool(tool: &'static str, purpose: &str, missing: Level) -> Diagnostic {
    match which(tool) {
        Some(path) => Diagnostic::ok(tool, path.display().to_string()),
        None => Diagnostic::new(tool, missing, format!("not on PATH ({} unavailable)", purpose)),
    }
}

fn which(tool: &str) -> Option<PathBuf> {
    let path = env::var_os("PATH")?;
    env::split_paths(&path)
        .map(|dir| dir.join(tool))
        .find(|candidate| candidate.is_file())
}
