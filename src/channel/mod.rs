// SPDX-License-Identifier: PMPL-1.0-or-later

//! Execution surfaces.
//!
//! A channel runs one command somewhere (local shell, container, remote
//! host, pod) and always answers with a [`Response`]. Executors never know
//! which surface they are talking to.

pub mod docker;
pub mod kubernetes;
pub mod local;
pub mod mock;
pub mod sidecar;
pub mod ssh;

pub use docker::DockerChannel;
pub use kubernetes::KubernetesChannel;
pub use local::LocalChannel;
pub use mock::MockChannel;
pub use sidecar::SidecarChannel;
pub use ssh::SshChannel;

use crate::transport::Response;
use crate::types::ExecRequest;
use std::path::PathBuf;

pub trait Channel: Send + Sync {
    fn name(&self) -> &'static str;

    /// Runs `program args` and reports the outcome; never panics or errors out.
    fn run(&self, request: &ExecRequest, program: &str, args: &str) -> Response;

    /// Directory holding the chaos_* binaries on this surface.
    fn script_path(&self) -> PathBuf;
}

/// `program args`, without a trailing space when there are no args.
pub fn command_line(program: &str, args: &str) -> String {
    if args.trim().is_empty() {
        program.to_string()
    } else {
        format!("{} {}", program, args)
    }
}
