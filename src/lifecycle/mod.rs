// SPDX-License-Identifier: PMPL-1.0-or-later

//! Experiment lifecycle: create, destroy and status queries.
//!
//! Every operation answers with a [`Response`]; typed failures are folded
//! into the envelope at the public boundary. Agent preparation lives in
//! [`prepare`], host lookups in [`query`].

pub mod prepare;
pub mod query;

pub use prepare::PrepareArgs;
pub use query::QueryTopic;

use crate::catalog::TIMEOUT_FLAG;
use crate::config::Config;
use crate::error::{FaultError, FaultResult};
use crate::executor::{ExecutorKey, Registry, Resolved};
use crate::flags::{self, parse_command_path};
use crate::store::{ExperimentFilter, ExperimentRecord, Limit, PreparationFilter, Store};
use crate::transport::Response;
use crate::types::{CancelToken, ExecRequest, ExpModel, ExperimentStatus, Flags, PreparationStatus};
use crate::util::{generate_uid, shell_quote};
use anyhow::Result;
use serde_json::Value;
use tracing::{info, warn};

/// Attempts at drawing an unused uid before giving up.
const UID_ATTEMPTS: usize = 16;

type UidSource = Box<dyn Fn() -> Result<String> + Send + Sync>;

pub struct Engine {
    config: Config,
    store: Store,
    registry: Registry,
    uids: UidSource,
    cancel: CancelToken,
}

impl Engine {
    pub fn new(config: Config, store: Store, registry: Registry) -> Self {
        Self {
            config,
            store,
            registry,
            uids: Box::new(generate_uid),
            cancel: CancelToken::new(),
        }
    }

    /// Opens the store named by `config` and wires the builtin registry.
    pub fn open(config: Config) -> Result<Self> {
        let store = Store::open(&config.db_path)?;
        let registry = Registry::builtin(&config, &store);
        Ok(Self::new(config, store, registry))
    }

    /// Replaces the uid generator, e.g. to force collisions.
    pub fn with_uid_source<F>(mut self, source: F) -> Self
    where
        F: Fn() -> Result<String> + Send + Sync + 'static,
    {
        self.uids = Box::new(source);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Token handed to every request; cancelling it aborts pending waits.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// `command_path` is the full invocation, e.g. `faultline create cpu fullload`.
    pub fn create(&self, command_path: &str, flags: &Flags) -> Response {
        self.try_create(command_path, flags)
            .unwrap_or_else(FaultError::into_response)
    }

    fn try_create(&self, command_path: &str, flags: &Flags) -> FaultResult<Response> {
        let (command, sub_command) = parse_command_path(command_path)?;
        let key = ExecutorKey::from_command(&command, &sub_command)?;
        let resolved = self.registry.resolve(&key)?;
        resolved.target.validate(resolved.action, flags)?;
        let timeout = destroy_after(flags)?;

        let uid = self.next_uid()?;
        let record = ExperimentRecord::new(&uid, &command, &sub_command, &flags::encode(flags));
        self.store
            .insert_experiment(&record)
            .map_err(FaultError::Database)?;
        info!(uid = %uid, command = %key, "experiment created");

        let model = model_for(&resolved, flags);
        let response = self.dispatch(&uid, &resolved, &model, self.request(ExecRequest::create()));
        if !response.success {
            self.mark(&uid, ExperimentStatus::Error, &response.message());
            return Ok(response);
        }
        self.mark(&uid, ExperimentStatus::Success, "");
        if let Some(secs) = timeout {
            self.schedule_destroy(&uid, secs);
        }
        Ok(Response::success(uid))
    }

    pub fn destroy(&self, uid: &str) -> Response {
        self.try_destroy(uid)
            .unwrap_or_else(FaultError::into_response)
    }

    fn try_destroy(&self, uid: &str) -> FaultResult<Response> {
        let record = self
            .store
            .experiment(uid)
            .map_err(FaultError::Database)?
            .ok_or_else(|| FaultError::DataNotFound(format!("the {} experiment not found", uid)))?;
        if record.status() == Some(ExperimentStatus::Destroyed) {
            return Ok(Response::success(format!(
                "command: {}, destroy time: {}",
                record.command_line(),
                record.update_time
            )));
        }

        let key = ExecutorKey::from_command(&record.command, &record.sub_command)?;
        let resolved = self.registry.resolve(&key)?;
        let flags = flags::decode(&record.flag);
        let model = model_for(&resolved, &flags);
        let response = self.dispatch(uid, &resolved, &model, self.request(ExecRequest::destroy(uid)));
        if !response.success {
            return Ok(response);
        }
        self.mark(uid, ExperimentStatus::Destroyed, "");
        Ok(Response::success(format!("command: {}", record.command_line())))
    }

    /// Destroys every successful experiment of a command whose flags carry all of `flags`.
    pub fn destroy_by_command(&self, command_path: &str, flags: &Flags) -> Response {
        self.try_destroy_by_command(command_path, flags)
            .unwrap_or_else(FaultError::into_response)
    }

    fn try_destroy_by_command(&self, command_path: &str, flags: &Flags) -> FaultResult<Response> {
        let (command, sub_command) = parse_command_path(command_path)?;
        let records = self
            .store
            .experiments_by_command(&command, &sub_command, flags)
            .map_err(FaultError::Database)?;
        if records.is_empty() {
            return Err(FaultError::DataNotFound(format!(
                "no running experiment matches {} {}",
                command, sub_command
            )));
        }
        let mut destroyed = Vec::with_capacity(records.len());
        for record in records {
            let response = self.destroy(&record.uid);
            if !response.success {
                return Ok(response);
            }
            destroyed.push(Value::from(record.uid));
        }
        Ok(Response::success(Value::Array(destroyed)))
    }

    pub fn status(&self, query: &StatusQuery) -> Response {
        self.try_status(query)
            .unwrap_or_else(FaultError::into_response)
    }

    fn try_status(&self, query: &StatusQuery) -> FaultResult<Response> {
        let limit = match query.limit.as_deref().filter(|l| !l.is_empty()) {
            Some(value) => Some(
                Limit::parse(value).map_err(|err| FaultError::IllegalParameters(format!("{:#}", err)))?,
            ),
            None => None,
        };

        if let Some(uid) = query.uid.as_deref().filter(|u| !u.is_empty()) {
            if query.kind != Some(StatusKind::Preparation) {
                if let Some(record) = self.store.experiment(uid).map_err(FaultError::Database)? {
                    return Ok(Response::success(to_value(&record)?));
                }
            }
            if query.kind != Some(StatusKind::Experiment) {
                if let Some(record) = self.store.preparation(uid).map_err(FaultError::Database)? {
                    return Ok(Response::success(to_value(&record)?));
                }
            }
            return Err(FaultError::DataNotFound(format!("the {} uid not found", uid)));
        }

        match query.kind.unwrap_or(StatusKind::Experiment) {
            StatusKind::Experiment => {
                let status = parse_status(query.status.as_deref(), ExperimentStatus::parse)?;
                let filter = ExperimentFilter {
                    target: query.target.clone(),
                    action: query.action.clone(),
                    flag: query.flag.clone(),
                    status,
                    limit,
                    asc: query.asc,
                };
                let records = self.store.list_experiments(&filter).map_err(FaultError::Database)?;
                Ok(Response::success(to_value(&records)?))
            }
            StatusKind::Preparation => {
                let status = parse_status(query.status.as_deref(), PreparationStatus::parse)?;
                let filter = PreparationFilter {
                    program_type: query.target.clone(),
                    status,
                    limit,
                    asc: query.asc,
                };
                let records = self.store.list_preparations(&filter).map_err(FaultError::Database)?;
                Ok(Response::success(to_value(&records)?))
            }
        }
    }

    fn next_uid(&self) -> FaultResult<String> {
        for _ in 0..UID_ATTEMPTS {
            let uid = (self.uids)().map_err(|err| FaultError::Server(format!("{:#}", err)))?;
            if !self.store.has_experiment(&uid).map_err(FaultError::Database)? {
                return Ok(uid);
            }
            warn!(uid = %uid, "uid already taken, drawing again");
        }
        Err(FaultError::Server(format!(
            "no unused uid after {} attempts",
            UID_ATTEMPTS
        )))
    }

    fn request(&self, request: ExecRequest) -> ExecRequest {
        request.with_cancel(self.cancel.clone())
    }

    fn dispatch(
        &self,
        uid: &str,
        resolved: &Resolved<'_>,
        model: &ExpModel,
        request: ExecRequest,
    ) -> Response {
        let (channel, request) = match self.registry.channel_for(resolved, &model.action_flags, request) {
            Ok(routed) => routed,
            Err(err) => return err.into_response(),
        };
        resolved.executor.exec(uid, &request, model, channel.as_ref())
    }

    fn mark(&self, uid: &str, status: ExperimentStatus, error: &str) {
        match self.store.update_experiment_status(uid, status, error) {
            Ok(()) => info!(uid, status = status.as_str(), "experiment status updated"),
            Err(err) => warn!(uid, status = status.as_str(), error = %format!("{:#}", err), "updating experiment status failed"),
        }
    }

    /// `nohup /bin/sh -c 'sleep T; <program> destroy <uid>' &` on the local host.
    fn schedule_destroy(&self, uid: &str, secs: u64) {
        let script = format!(
            "sleep {}; {} destroy {}",
            secs,
            shell_quote(&self.config.program.display().to_string()),
            uid
        );
        let args = format!("/bin/sh -c {} >/dev/null 2>&1 &", shell_quote(&script));
        let response = self.registry.host().run(&ExecRequest::create(), "nohup", &args);
        if response.success {
            info!(uid, secs, "destroy scheduled");
        } else {
            warn!(uid, error = %response.message(), "scheduling destroy failed");
        }
    }
}

/// Positive `--timeout` seconds, if any.
fn destroy_after(flags: &Flags) -> FaultResult<Option<u64>> {
    let Some(value) = flags.get(TIMEOUT_FLAG).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };
    let secs: u64 = value.trim().parse().map_err(|_| {
        FaultError::IllegalParameters(format!("illegal timeout value {:?}, must be seconds", value))
    })?;
    Ok((secs > 0).then_some(secs))
}

fn model_for(resolved: &Resolved<'_>, flags: &Flags) -> ExpModel {
    let scope = if resolved.target.name == resolved.action.target {
        "host"
    } else {
        resolved.target.name
    };
    ExpModel::new(resolved.action.target, scope, resolved.action.name, flags.clone())
}

fn parse_status<T>(value: Option<&str>, parse: fn(&str) -> Option<T>) -> FaultResult<Option<T>> {
    match value.filter(|v| !v.is_empty()) {
        Some(value) => parse(value)
            .map(Some)
            .ok_or_else(|| FaultError::IllegalParameters(format!("illegal status {:?}", value))),
        None => Ok(None),
    }
}

fn to_value<T: serde::Serialize>(value: &T) -> FaultResult<Value> {
    serde_json::to_value(value).map_err(|err| FaultError::Server(err.to_string()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Experiment,
    Preparation,
}

impl StatusKind {
    /// `create`/`destroy` read experiments, `prepare`/`revoke` preparations.
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "create" | "destroy" | "experiment" => Some(StatusKind::Experiment),
            "prepare" | "revoke" | "preparation" => Some(StatusKind::Preparation),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StatusQuery {
    pub kind: Option<StatusKind>,
    pub uid: Option<String>,
    pub target: Option<String>,
    pub action: Option<String>,
    pub flag: Option<String>,
    pub status: Option<String>,
    pub limit: Option<String>,
    pub asc: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MockChannel;
    use crate::transport::Code;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn engine(dir: &TempDir, channel: Arc<MockChannel>) -> Engine {
        let config = Config::for_home(dir.path());
        let store = Store::open(&config.db_path).expect("store should open");
        let registry = Registry::with_host(&config, &store, channel);
        Engine::new(config, store, registry)
    }

    fn flags(pairs: &[(&str, &str)]) -> Flags {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn timeout_flag_parsing() {
        assert_eq!(destroy_after(&flags(&[])).expect("no timeout"), None);
        assert_eq!(destroy_after(&flags(&[("timeout", "0")])).expect("zero"), None);
        assert_eq!(destroy_after(&flags(&[("timeout", "30")])).expect("thirty"), Some(30));
        assert!(destroy_after(&flags(&[("timeout", "soon")])).is_err());
    }

    #[test]
    fn short_command_path_is_illegal() {
        let dir = TempDir::new().expect("tempdir should be created");
        let resp = engine(&dir, Arc::new(MockChannel::new())).create("faultline create cpu", &Flags::new());
        assert!(resp.is_code(Code::IllegalCommand));
    }

    #[test]
    fn create_persists_encoded_flags() {
        let dir = TempDir::new().expect("tempdir should be created");
        let channel = Arc::new(MockChannel::new());
        let engine = engine(&dir, channel.clone());
        let resp = engine.create(
            "faultline create cpu fullload",
            &flags(&[("cpu-percent", "60"), ("cpu-count", "2")]),
        );
        assert!(resp.success, "{}", resp.to_json());
        let uid = resp.result_text();

        let record = engine.store().experiment(&uid).expect("query").expect("row");
        assert_eq!(record.status(), Some(ExperimentStatus::Success));
        assert_eq!(record.flag, "--cpu-count 2 --cpu-percent 60");
        assert_eq!(
            channel.commands(),
            vec!["/opt/faultline/bin/chaos_burncpu --start --cpu-count 2 --cpu-percent 60"]
        );
    }

    #[test]
    fn failed_create_is_recorded_as_error() {
        let dir = TempDir::new().expect("tempdir should be created");
        let channel = Arc::new(
            MockChannel::new().respond("chaos_burncpu", Response::fail(Code::ExecCommandError, "Error: no ps")),
        );
        let engine = engine(&dir, channel);
        let resp = engine.create("faultline create cpu fullload", &Flags::new());
        assert!(!resp.success);

        let records = engine
            .store()
            .list_experiments(&ExperimentFilter::default())
            .expect("list");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status(), Some(ExperimentStatus::Error));
        assert_eq!(records[0].error, "Error: no ps");
    }

    #[test]
    fn unknown_flag_creates_nothing() {
        let dir = TempDir::new().expect("tempdir should be created");
        let channel = Arc::new(MockChannel::new());
        let engine = engine(&dir, channel.clone());
        let resp = engine.create("faultline create cpu fullload", &flags(&[("bogus", "1")]));
        assert!(resp.is_code(Code::IllegalParameters));
        assert!(channel.commands().is_empty());
        assert!(engine
            .store()
            .list_experiments(&ExperimentFilter::default())
            .expect("list")
            .is_empty());
    }

    #[test]
    fn timeout_schedules_a_detached_destroy() {
        let dir = TempDir::new().expect("tempdir should be created");
        let channel = Arc::new(MockChannel::new());
        let engine = engine(&dir, channel.clone());
        let resp = engine.create("faultline create cpu fullload", &flags(&[("timeout", "30")]));
        assert!(resp.success);
        let uid = resp.result_text();

        let commands = channel.commands();
        assert_eq!(commands.len(), 2);
        assert!(commands[1].starts_with("nohup /bin/sh -c 'sleep 30; "));
        assert!(commands[1].contains(&format!("destroy {}", uid)));
        assert!(commands[1].ends_with(">/dev/null 2>&1 &"));
    }

    #[test]
    fn status_filters_and_rejects_bad_status() {
        let dir = TempDir::new().expect("tempdir should be created");
        let engine = engine(&dir, Arc::new(MockChannel::new()));
        assert!(engine.create("faultline create cpu fullload", &Flags::new()).success);

        let listed = engine.status(&StatusQuery {
            target: Some("cpu".into()),
            status: Some("SUCCESS".into()),
            ..StatusQuery::default()
        });
        assert!(listed.success);
        assert_eq!(listed.result.as_ref().and_then(Value::as_array).map(Vec::len), Some(1));

        let bad = engine.status(&StatusQuery {
            status: Some("finished".into()),
            ..StatusQuery::default()
        });
        assert!(bad.is_code(Code::IllegalParameters));

        let missing = engine.status(&StatusQuery {
            uid: Some("feedfacefeedface".into()),
            ..StatusQuery::default()
        });
        assert!(missing.is_code(Code::DataNotFound));
    }

    #[test]
    fn status_kind_aliases() {
        assert_eq!(StatusKind::parse("create"), Some(StatusKind::Experiment));
        assert_eq!(StatusKind::parse("Revoke"), Some(StatusKind::Preparation));
        assert_eq!(StatusKind::parse("attack"), None);
    }
}
