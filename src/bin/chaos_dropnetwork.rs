// SPDX-License-Identifier: PMPL-1.0-or-later

use clap::Parser;
use faultline::primitive::{drop::{self, DropArgs}, main_with, Primitive};
use std::process::ExitCode;

fn main() -> ExitCode {
    let args = DropArgs::parse();
    main_with(Primitive::DropNetwork, |env| drop::run(env, &args))
}
