// SPDX-License-Identifier: PMPL-1.0-or-later

use clap::Parser;
use faultline::primitive::{process::{self, StopArgs}, main_with, Primitive};
use std::process::ExitCode;

fn main() -> ExitCode {
    let args = StopArgs::parse();
    main_with(Primitive::StopProcess, |env| process::run_stop(env, &args))
}
