// SPDX-License-Identifier: PMPL-1.0-or-later

//! tracing subscriber setup shared by the CLI and the primitive binaries.

use std::fs::{self, OpenOptions};
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "FAULTLINE_LOG";
pub const LOG_FILE: &str = "faultline.log";

/// Installs a global subscriber writing to `<log_dir>/faultline.log`.
///
/// `FAULTLINE_LOG`, then `RUST_LOG`, pick the filter; `debug` raises the
/// default from `info`. Falls back to stderr when the file cannot be opened.
/// Calling it twice is harmless.
pub fn init(log_dir: &Path, debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter = std::env::var(LOG_ENV)
        .ok()
        .and_then(|spec| EnvFilter::try_new(spec).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(default_level));

    let file = fs::create_dir_all(log_dir).ok().and_then(|_| {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_dir.join(LOG_FILE))
            .ok()
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    let _ = match file {
        Some(file) => builder
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .try_init(),
        None => builder.with_writer(std::io::stderr).try_init(),
    };
}
