// SPDX-License-Identifier: PMPL-1.0-or-later

use clap::Parser;
use faultline::primitive::{disk::{self, FillArgs}, main_with, Primitive};
use std::process::ExitCode;

fn main() -> ExitCode {
    let args = FillArgs::parse();
    main_with(Primitive::FillDisk, |env| disk::run_fill(env, &args))
}
