// SPDX-License-Identifier: PMPL-1.0-or-later

//! Create and destroy a CPU burn through the engine, on the real host.

use faultline::config::Config;
use faultline::lifecycle::Engine;
use faultline::types::{ExperimentStatus, Flags};
use std::path::Path;
use std::process::Command;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

const BIN: &str = env!("CARGO_BIN_EXE_chaos_burncpu");

fn have_ps() -> bool {
    Command::new("ps")
        .arg("-eo")
        .arg("pid")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
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

#[test]
fn cpu_burn_lives_from_create_to_destroy() {
    if !have_ps() {
        eprintln!("skipping: ps not available");
        return;
    }
    let home = TempDir::new().expect("tempdir should be created");
    let mut config = Config::for_home(home.path());
    config.bin_dir = Path::new(BIN)
        .parent()
        .expect("binary should live in a directory")
        .to_path_buf();
    let engine = Engine::open(config).expect("engine should open");

    let flags: Flags = [("cpu-count", "1"), ("cpu-percent", "100")]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let created = engine.create("faultline create cpu fullload", &flags);
    assert!(created.success, "{}", created);
    let uid = created.result_text();

    let record = engine.store().experiment(&uid).expect("query").expect("row");
    assert_eq!(record.status(), Some(ExperimentStatus::Success));
    assert_eq!(record.flag, "--cpu-count 1 --cpu-percent 100");
    assert!(workers() >= 1, "no worker running after create");

    let destroyed = engine.destroy(&uid);
    assert!(destroyed.success, "{}", destroyed);
    thread::sleep(Duration::from_millis(200));
    assert_eq!(workers(), 0, "worker survived destroy");

    let record = engine.store().experiment(&uid).expect("query").expect("row");
    assert_eq!(record.status(), Some(ExperimentStatus::Destroyed));
}
