// SPDX-License-Identifier: PMPL-1.0-or-later

use clap::Parser;
use faultline::primitive::{process::{self, KillArgs}, main_with, Primitive};
use std::process::ExitCode;

fn main() -> ExitCode {
    let args = KillArgs::parse();
    main_with(Primitive::KillProcess, |env| process::run_kill(env, &args))
}
