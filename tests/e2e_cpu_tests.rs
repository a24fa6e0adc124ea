// SPDX-License-Identifier: PMPL-1.0-or-later

//! Starts and stops a real CPU burn through the primitive binary.

use std::process::Command;
use tempfile::TempDir;

const BIN: &str = env!("CARGO_BIN_EXE_chaos_burncpu");

fn have_ps() -> bool {
    Command::new("ps").arg("-eo").arg("pid").output().map(|out| out.status.success()).unwrap_or(false)
}

fn workers() -> usize {
    let out = Command::new("ps")
        .args(["-eo", "args"])
        .output()
        .expect("ps should run");
    String::from_utf8_lossy(&out.stdout)
        .lines()
        .filter(|line| line.contains(BIN) && line.contains("--nohup"))
        .count()
}

fn burncpu(home: &TempDir, mode: &str) -> std::process::Output {
    Command::new(BIN)
        .env("FAULTLINE_HOME", home.path())
        .args([mode, "--cpu-percent", "10", "--cpu-count", "1"])
        .args(["--cgroup-root", "/proc/faultline-absent"])
        .output()
        .expect("chaos_burncpu should run")
}

#[test]
fn burn_starts_a_worker_and_stop_reaps_it() {
    if !have_ps() {
        eprintln!("skipping: ps not available");
        return;
    }
    let home = TempDir::new().expect("tempdir should be created");

    let start = burncpu(&home, "--start");
    assert!(
        start.status.success(),
        "start failed: {}",
        String::from_utf8_lossy(&start.stderr)
    );
    assert_eq!(String::from_utf8_lossy(&start.stdout).trim(), "success");
    assert!(workers() >= 1, "no worker running after --start");
    assert!(home.path().join("logs").join("chaos_burncpu.log").exists());

    let stop = burncpu(&home, "--stop");
    assert!(stop.status.success());
    std::thread::sleep(std::time::Duration::from_millis(200));
    assert_eq!(workers(), 0, "worker survived --stop");
}

#[test]
fn missing_mode_is_an_error() {
    let out = Command::new(BIN).output().expect("chaos_burncpu should run");
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("Error: less --start or --stop flag"));
}
