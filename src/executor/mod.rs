// SPDX-License-Identifier: PMPL-1.0-or-later

//! Executors and the registry that dispatches to them.
//!
//! Every executor serves both create and destroy; the only signal it looks
//! at is `ExecRequest::destroy`.

pub mod agent;
pub mod docker;
pub mod kubernetes;
pub mod primitive;

use crate::catalog::{self, ActionKind, ActionSpec, PreExecKind, TargetSpec};
use crate::channel::{Channel, LocalChannel};
use crate::config::Config;
use crate::error::{FaultError, FaultResult};
use crate::flags::split_sub_command;
use crate::preexec::{DockerPreExecutor, KubernetesPreExecutor, OsPreExecutor, PreExecutor};
use crate::store::Store;
use crate::transport::Response;
use crate::types::{ExecRequest, ExpModel, Flags};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use self::agent::AgentExecutor;
use self::docker::DockerRemoveExecutor;
use self::kubernetes::{ComposeExecutor, PodDeleteExecutor, ResourceExecutor};
use self::primitive::PrimitiveExecutor;

pub trait Executor: Send + Sync {
    fn name(&self) -> &'static str;

    fn exec(&self, uid: &str, request: &ExecRequest, model: &ExpModel, channel: &dyn Channel) -> Response;
}

/// `(target, action target, action)`, e.g. `(docker, network, delay)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExecutorKey {
    pub target: String,
    pub action_target: String,
    pub action: String,
}

impl ExecutorKey {
    pub fn new(target: &str, action_target: &str, action: &str) -> Self {
        Self {
            target: target.to_string(),
            action_target: action_target.to_string(),
            action: action.to_string(),
        }
    }

    /// Key for a persisted `command` + `sub_command` pair.
    pub fn from_command(command: &str, sub_command: &str) -> FaultResult<Self> {
        let (action_target, action) = split_sub_command(command, sub_command)?;
        Ok(Self::new(command, &action_target, &action))
    }
}

impl fmt::Display for ExecutorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.target == self.action_target {
            write!(f, "{} {}", self.target, self.action)
        } else {
            write!(f, "{} {} {}", self.target, self.action_target, self.action)
        }
    }
}

/// A key resolved against the registry.
pub struct Resolved<'a> {
    pub target: &'a TargetSpec,
    pub action: &'a ActionSpec,
    pub executor: Arc<dyn Executor>,
}

pub struct Registry {
    catalog: Vec<TargetSpec>,
    executors: HashMap<ExecutorKey, Arc<dyn Executor>>,
    pre_executors: HashMap<PreExecKind, Arc<dyn PreExecutor>>,
    host: Arc<dyn Channel>,
}

impl Registry {
    pub fn new(catalog: Vec<TargetSpec>, host: Arc<dyn Channel>) -> Self {
        Self {
            catalog,
            executors: HashMap::new(),
            pre_executors: HashMap::new(),
            host,
        }
    }

    /// Every catalog action wired to its executor, running on the local shell.
    pub fn builtin(config: &Config, store: &Store) -> Self {
        let host: Arc<dyn Channel> =
            Arc::new(LocalChannel::new(config.bin_dir.clone(), config.exec_timeout));
        Self::with_host(config, store, host)
    }

    /// Like [`Registry::builtin`] with every command going through `host`.
    pub fn with_host(config: &Config, store: &Store, host: Arc<dyn Channel>) -> Self {
        let mut registry = Self::new(catalog::builtin(), host.clone());
        registry.register_pre(PreExecKind::Os, Arc::new(OsPreExecutor::new(host.clone())));
        registry.register_pre(
            PreExecKind::Docker,
            Arc::new(DockerPreExecutor::new(host.clone(), config.docker.clone())),
        );
        registry.register_pre(
            PreExecKind::Kubernetes,
            Arc::new(KubernetesPreExecutor::new(host, config.kubernetes.clone())),
        );

        let mut entries: Vec<(ExecutorKey, Arc<dyn Executor>)> = Vec::new();
        for target in &registry.catalog {
            for action in &target.actions {
                let key = ExecutorKey::new(target.name, action.target, action.name);
                let executor: Arc<dyn Executor> = match action.kind {
                    ActionKind::Primitive(which) => {
                        Arc::new(PrimitiveExecutor::new(which, action.flags.clone()))
                    }
                    ActionKind::DockerRemove => Arc::new(DockerRemoveExecutor),
                    ActionKind::PodDelete => {
                        Arc::new(PodDeleteExecutor::new(&config.kubernetes.kubectl))
                    }
                    ActionKind::Agent(kind) => {
                        Arc::new(AgentExecutor::new(kind, store.clone(), config.agent.clone()))
                    }
                    ActionKind::Kubernetes(which) => Arc::new(ComposeExecutor::new(
                        which.map(|which| PrimitiveExecutor::new(which, action.flags.clone())),
                        ResourceExecutor::new(config.kubernetes.clone()),
                    )),
                };
                entries.push((key, executor));
            }
        }
        for (key, executor) in entries {
            registry.register(key, executor);
        }
        registry
    }

    pub fn register(&mut self, key: ExecutorKey, executor: Arc<dyn Executor>) {
        self.executors.insert(key, executor);
    }

    pub fn register_pre(&mut self, kind: PreExecKind, pre: Arc<dyn PreExecutor>) {
        self.pre_executors.insert(kind, pre);
    }

    pub fn catalog(&self) -> &[TargetSpec] {
        &self.catalog
    }

    pub fn host(&self) -> Arc<dyn Channel> {
        self.host.clone()
    }

    pub fn resolve(&self, key: &ExecutorKey) -> FaultResult<Resolved<'_>> {
        let target = catalog::find(&self.catalog, &key.target)?;
        let action = target.action(&key.action_target, &key.action).ok_or_else(|| {
            FaultError::IllegalCommand(format!("unknown action {:?}", key.to_string()))
        })?;
        let executor = self.executors.get(key).cloned().ok_or_else(|| {
            FaultError::IllegalCommand(format!("no executor registered for {:?}", key.to_string()))
        })?;
        Ok(Resolved {
            target,
            action,
            executor,
        })
    }

    /// Runs the target's pre-executor, if any, and picks the channel.
    pub fn channel_for(
        &self,
        resolved: &Resolved<'_>,
        flags: &Flags,
        request: ExecRequest,
    ) -> FaultResult<(Arc<dyn Channel>, ExecRequest)> {
        let hook = resolved
            .target
            .pre_exec
            .and_then(|kind| self.pre_executors.get(&kind))
            .and_then(|pre| pre.pre_exec(resolved.action.name, resolved.action.target, flags));
        let Some(hook) = hook else {
            return Ok((self.host.clone(), request));
        };
        let (channel, request) = hook(request)?;
        let channel = channel.unwrap_or_else(|| self.host.clone());
        debug!(channel = channel.name(), "channel resolved");
        Ok((channel, request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MockChannel;
    use tempfile::TempDir;

    fn registry(dir: &TempDir) -> Registry {
        let config = Config::for_home(dir.path());
        let store = Store::open(&config.db_path).expect("store should open");
        Registry::with_host(&config, &store, Arc::new(MockChannel::new()))
    }

    #[test]
    fn every_catalog_action_is_registered() {
        let dir = TempDir::new().expect("tempdir should be created");
        let registry = registry(&dir);
        for target in registry.catalog() {
            for action in &target.actions {
                let key = ExecutorKey::new(target.name, action.target, action.name);
                assert!(registry.resolve(&key).is_ok(), "{} unresolved", key);
            }
        }
    }

    #[test]
    fn key_from_persisted_command() {
        assert_eq!(
            ExecutorKey::from_command("docker", "network delay").expect("key"),
            ExecutorKey::new("docker", "network", "delay")
        );
        assert_eq!(
            ExecutorKey::from_command("cpu", "fullload").expect("key"),
            ExecutorKey::new("cpu", "cpu", "fullload")
        );
    }

    #[test]
    fn unknown_action_is_illegal_command() {
        let dir = TempDir::new().expect("tempdir should be created");
        let err = registry(&dir)
            .resolve(&ExecutorKey::new("cpu", "cpu", "explode"))
            .err()
            .expect("should not resolve");
        assert!(matches!(err, FaultError::IllegalCommand(_)));
    }

    #[test]
    fn targets_without_hooks_use_host() {
        let dir = TempDir::new().expect("tempdir should be created");
        let registry = registry(&dir);
        let resolved = registry
            .resolve(&ExecutorKey::new("cpu", "cpu", "fullload"))
            .expect("resolves");
        let (channel, _) = registry
            .channel_for(&resolved, &Flags::new(), ExecRequest::create())
            .expect("channel");
        assert_eq!(channel.name(), "mock");
    }
}
