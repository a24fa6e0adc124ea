// SPDX-License-Identifier: PMPL-1.0-or-later

use clap::Parser;
use faultline::primitive::{cpu::{self, CpuArgs}, main_with, Primitive};
use std::process::ExitCode;

fn main() -> ExitCode {
    let args = CpuArgs::parse();
    main_with(Primitive::BurnCpu, |env| cpu::run(env, &args))
}
