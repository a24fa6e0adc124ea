// SPDX-License-Identifier: PMPL-1.0-or-later

use clap::Parser;
use faultline::primitive::{network::{self, LossArgs}, main_with, Primitive};
use std::process::ExitCode;

fn main() -> ExitCode {
    let args = LossArgs::parse();
    main_with(Primitive::LossNetwork, |env| network::run_loss(env, &args))
}
