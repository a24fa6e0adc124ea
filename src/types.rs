// SPDX-License-Identifier: PMPL-1.0-or-later

//! Core type definitions shared across the engine

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Flag bag handed to executors. Ordered so serialization is stable.
pub type Flags = BTreeMap<String, String>;

/// The unit an executor consumes. Built fresh for every create and destroy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpModel {
    pub target: String,
    pub scope: String,
    pub action_name: String,
    pub action_flags: Flags,
}

impl ExpModel {
    pub fn new(target: &str, scope: &str, action_name: &str, action_flags: Flags) -> Self {
        Self {
            target: target.to_string(),
            scope: scope.to_string(),
            action_name: action_name.to_string(),
            action_flags,
        }
    }

    pub fn flag(&self, name: &str) -> Option<&str> {
        self.action_flags
            .get(name)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }

    pub fn flag_or<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        self.flag(name).unwrap_or(default)
    }

    pub fn flag_enabled(&self, name: &str) -> bool {
        matches!(self.flag(name), Some("true"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExperimentStatus {
    Created,
    Success,
    Error,
    Destroyed,
}

impl ExperimentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ExperimentStatus::Created => "Created",
            ExperimentStatus::Success => "Success",
            ExperimentStatus::Error => "Error",
            ExperimentStatus::Destroyed => "Destroyed",
        }
    }

    /// Case-insensitive, so `success` and `SUCCESS` both match stored rows.
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "created" => Some(ExperimentStatus::Created),
            "success" => Some(ExperimentStatus::Success),
            "error" => Some(ExperimentStatus::Error),
            "destroyed" => Some(ExperimentStatus::Destroyed),
            _ => None,
        }
    }
}

impl fmt::Display for ExperimentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PreparationStatus {
    Created,
    Running,
    Error,
    Revoked,
}

impl PreparationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PreparationStatus::Created => "Created",
            PreparationStatus::Running => "Running",
            PreparationStatus::Error => "Error",
            PreparationStatus::Revoked => "Revoked",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "created" => Some(PreparationStatus::Created),
            "running" => Some(PreparationStatus::Running),
            "error" => Some(PreparationStatus::Error),
            "revoked" => Some(PreparationStatus::Revoked),
            _ => None,
        }
    }
}

impl fmt::Display for PreparationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Agent families that need a prepare/revoke half of the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgentKind {
    Jvm,
    Cplus,
}

impl AgentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AgentKind::Jvm => "jvm",
            AgentKind::Cplus => "cplus",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "jvm" => Some(AgentKind::Jvm),
            "cplus" => Some(AgentKind::Cplus),
            _ => None,
        }
    }
}

/// Shared flag a caller flips to abandon a wait loop.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Helper container the docker channel executes in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRouting {
    pub container_id: String,
    pub helper_name: String,
    pub run_flags: Vec<String>,
}

/// Chaos agent pod that sits on the same node as the target container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodRouting {
    pub namespace: String,
    pub pod: String,
    pub node: String,
    pub container_id: String,
}

/// Where a command should land when it is not the local shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routing {
    Container(ContainerRouting),
    Pod(PodRouting),
}

/// Everything threaded through one create or destroy call.
///
/// `destroy` is the only signal an executor uses to pick its reverse path.
#[derive(Debug, Clone, Default)]
pub struct ExecRequest {
    pub destroy: Option<String>,
    pub routing: Option<Routing>,
    pub deadline: Option<Instant>,
    pub cancel: CancelToken,
}

impl ExecRequest {
    pub fn create() -> Self {
        Self::default()
    }

    pub fn destroy(uid: &str) -> Self {
        Self {
            destroy: Some(uid.to_string()),
            ..Self::default()
        }
    }

    pub fn is_destroy(&self) -> bool {
        self.destroy.is_some()
    }

    pub fn with_routing(mut self, routing: Routing) -> Self {
        self.routing = Some(routing);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Time left before the caller's deadline, if one was set.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn container(&self) -> Option<&ContainerRouting> {
        match &self.routing {
            Some(Routing::Container(routing)) => Some(routing),
            _ => None,
        }
    }

    pub fn pod(&self) -> Option<&PodRouting> {
        match &self.routing {
            Some(Routing::Pod(routing)) => Some(routing),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parse_ignores_case() {
        assert_eq!(
            ExperimentStatus::parse("success"),
            Some(ExperimentStatus::Success)
        );
        assert_eq!(
            PreparationStatus::parse("RUNNING"),
            Some(PreparationStatus::Running)
        );
        assert_eq!(ExperimentStatus::parse("gone"), None);
    }

    #[test]
    fn empty_flags_read_as_absent() {
        let mut flags = Flags::new();
        flags.insert("interface".into(), String::new());
        flags.insert("time".into(), "3000".into());
        let model = ExpModel::new("network", "host", "delay", flags);
        assert_eq!(model.flag("interface"), None);
        assert_eq!(model.flag_or("offset", "10"), "10");
        assert_eq!(model.flag("time"), Some("3000"));
    }

    #[test]
    fn cancel_is_shared_between_clones() {
        let request = ExecRequest::create();
        let token = request.cancel.clone();
        token.cancel();
        assert!(request.cancel.is_cancelled());
    }
}
