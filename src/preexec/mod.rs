// SPDX-License-Identifier: PMPL-1.0-or-later

//! Target-specific hooks that run before an executor.
//!
//! A hook may swap the channel (docker helper, node agent pod, ssh host,
//! sidecar) and attach routing to the request. Targets without a hook, or
//! hooks that decline an action, run on the local channel.

pub mod docker;
pub mod kubernetes;
pub mod ssh;

pub use docker::DockerPreExecutor;
pub use kubernetes::KubernetesPreExecutor;
pub use ssh::OsPreExecutor;

use crate::channel::Channel;
use crate::error::FaultResult;
use crate::types::{ExecRequest, Flags};
use std::sync::Arc;

/// Deferred channel resolution; runs once the request is known.
pub type PreHook =
    Box<dyn FnOnce(ExecRequest) -> FaultResult<(Option<Arc<dyn Channel>>, ExecRequest)>>;

pub trait PreExecutor: Send + Sync {
    fn name(&self) -> &'static str;

    /// `None` when the action needs no special channel.
    fn pre_exec(&self, action: &str, parent_action: &str, flags: &Flags) -> Option<PreHook>;
}
