// SPDX-License-Identifier: PMPL-1.0-or-later

//! DNS poisoning through a tagged `/etc/hosts` entry.

use super::{Mode, Primitive};
use clap::Parser;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Every injected line ends with this tag so stop only removes our own.
pub const TAG: &str = "#faultline";

#[derive(Debug, Parser)]
#[command(name = "chaos_changedns", about = "Resolve a domain to a chosen IP via the hosts file")]
pub struct DnsArgs {
    #[arg(long)]
    pub start: bool,
    #[arg(long)]
    pub stop: bool,
    #[arg(long)]
    pub nohup: bool,
    #[arg(long)]
    pub domain: Option<String>,
    #[arg(long)]
    pub ip: Option<String>,
    #[arg(long = "hosts-file", default_value = "/etc/hosts", hide = true)]
    pub hosts_file: PathBuf,
}

pub fn entry(ip: &str, domain: &str) -> String {
    format!("{} {} {}", ip, domain, TAG)
}

pub fn start(hosts: &Path, ip: &str, domain: &str) -> Result<String, String> {
    let line = entry(ip, domain);
    let content = fs::read_to_string(hosts)
        .map_err(|err| format!("read {}: {}", hosts.display(), err))?;
    if content.lines().any(|existing| existing.trim() == line) {
        return Err(format!("{} has been exist", line));
    }
    let mut file = OpenOptions::new()
        .append(true)
        .open(hosts)
        .map_err(|err| format!("open {}: {}", hosts.display(), err))?;
    let prefix = if content.is_empty() || content.ends_with('\n') {
        ""
    } else {
        "\n"
    };
    writeln!(file, "{}{}", prefix, line).map_err(|err| format!("write {}: {}", hosts.display(), err))?;
    Ok("success".to_string())
}

/// Rewrites the file without our entry; absent entries are not an error.
pub fn stop(hosts: &Path, ip: &str, domain: &str) -> Result<String, String> {
    let line = entry(ip, domain);
    let content = fs::read_to_string(hosts)
        .map_err(|err| format!("read {}: {}", hosts.display(), err))?;
    if !content.lines().any(|existing| existing.trim() == line) {
        return Ok("nothing to do".to_string());
    }
    let mut kept: String = content
        .lines()
        .filter(|existing| existing.trim() != line)
        .collect::<Vec<_>>()
        .join("\n");
    if !kept.is_empty() {
        kept.push('\n');
    }
    // Overwrite in place: /etc/hosts is often a bind mount that cannot be renamed over.
    fs::write(hosts, kept).map_err(|err| format!("write {}: {}", hosts.display(), err))?;
    Ok("success".to_string())
}

pub fn run(args: &DnsArgs) -> Result<String, String> {
    let mode = Mode::from_flags(args.start, args.stop, args.nohup)?;
    let domain = args
        .domain
        .as_deref()
        .filter(|d| !d.is_empty())
        .ok_or("less --domain flag")?;
    let ip = args.ip.as_deref().filter(|i| !i.is_empty()).ok_or("less --ip flag")?;
    match mode {
        Mode::Start => start(&args.hosts_file, ip, domain),
        Mode::Stop => stop(&args.hosts_file, ip, domain),
        Mode::Nohup => Err(format!("{} has no worker mode", Primitive::ChangeDns.binary())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn start_then_stop_restores_file() {
        let dir = TempDir::new().expect("tempdir should be created");
        let hosts = dir.path().join("hosts");
        let original = "127.0.0.1 localhost\n::1 localhost";
        fs::write(&hosts, original).expect("hosts written");

        start(&hosts, "10.0.0.9", "api.example.com").expect("start should succeed");
        let poisoned = fs::read_to_string(&hosts).expect("hosts readable");
        assert!(poisoned.ends_with("10.0.0.9 api.example.com #faultline\n"));

        let err = start(&hosts, "10.0.0.9", "api.example.com").expect_err("second start fails");
        assert!(err.contains("has been exist"));

        stop(&hosts, "10.0.0.9", "api.example.com").expect("stop should succeed");
        let restored = fs::read_to_string(&hosts).expect("hosts readable");
        assert_eq!(restored, "127.0.0.1 localhost\n::1 localhost\n");
        assert_eq!(
            stop(&hosts, "10.0.0.9", "api.example.com").as_deref(),
            Ok("nothing to do")
        );
    }
}
