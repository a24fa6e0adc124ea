// SPDX-License-Identifier: PMPL-1.0-or-later

use clap::Parser;
use faultline::primitive::{network::{self, DelayArgs}, main_with, Primitive};
use std::process::ExitCode;

fn main() -> ExitCode {
    let args = DelayArgs::parse();
    main_with(Primitive::DelayNetwork, |env| network::run_delay(env, &args))
}
