// SPDX-License-Identifier: PMPL-1.0-or-later

use clap::Parser;
use faultline::primitive::{mem::{self, MemArgs}, main_with, Primitive};
use std::process::ExitCode;

fn main() -> ExitCode {
    let args = MemArgs::parse();
    main_with(Primitive::BurnMem, |env| mem::run(env, &args))
}
