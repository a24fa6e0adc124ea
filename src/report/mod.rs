// SPDX-License-Identifier: PMPL-1.0-or-later

//! Terminal output of response envelopes.

pub mod formatter;

pub use formatter::{OutputFormat, ReportFormatter};

use crate::transport::Response;

/// Print a response in the requested format.
pub fn print_response(response: &Response, format: OutputFormat) {
    ReportFormatter::new(format).print(response);
}
