// SPDX-License-Identifier: PMPL-1.0-or-later

use clap::Parser;
use faultline::primitive::{dns::{self, DnsArgs}, main_with, Primitive};
use std::process::ExitCode;

fn main() -> ExitCode {
    let args = DnsArgs::parse();
    main_with(Primitive::ChangeDns, |_env| dns::run(&args))
}
