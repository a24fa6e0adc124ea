// SPDX-License-Identifier: PMPL-1.0-or-later

use clap::Parser;
use faultline::primitive::{disk::{self, BurnIoArgs}, main_with, Primitive};
use std::process::ExitCode;

fn main() -> ExitCode {
    let args = BurnIoArgs::parse();
    main_with(Primitive::BurnIo, |env| disk::run_burn(env, &args))
}
