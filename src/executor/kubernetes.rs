// SPDX-License-Identifier: PMPL-1.0-or-later

//! Kubernetes executors.
//!
//! Faults are expressed as `ChaosBlade` custom resources that an in-cluster
//! operator reconciles; this side only applies or deletes the resource and
//! polls its phase. Once a pre-executor has routed the request to a node
//! agent, the compose executor runs the primitive there instead.

use super::primitive::PrimitiveExecutor;
use super::Executor;
use crate::channel::kubernetes::is_kubectl_error;
use crate::channel::Channel;
use crate::config::KubernetesConfig;
use crate::transport::{Code, Response};
use crate::types::{ExecRequest, ExpModel};
use crate::util::{parse_duration, shell_quote};
use serde::Serialize;
use serde_json::{json, Value};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub const API_VERSION: &str = "chaosblade.io/v1alpha1";
pub const KIND: &str = "ChaosBlade";
pub const WAITING_TIME_FLAG: &str = "waiting-time";
pub const KUBECONFIG_FLAG: &str = "kubeconfig";

const PHASE_RUNNING: &str = "Running";
const PHASE_DESTROYED: &str = "Destroyed";
const PHASE_ERROR: &str = "Error";

/// Splits `pod-network` into scope `pod` and target `network`.
pub fn scope_and_target(model: &ExpModel) -> (String, String) {
    match model.target.split_once('-') {
        Some((scope, target)) => (scope.to_string(), target.to_string()),
        None if model.scope.is_empty() => ("node".to_string(), model.target.clone()),
        None => (model.scope.clone(), model.target.clone()),
    }
}

/// The resource handed to the operator; named after the experiment uid.
pub fn chaos_resource(uid: &str, model: &ExpModel) -> Value {
    let (scope, target) = scope_and_target(model);
    let matchers: Vec<Value> = model
        .action_flags
        .iter()
        .filter(|(key, value)| {
            !value.is_empty() && key.as_str() != KUBECONFIG_FLAG && key.as_str() != WAITING_TIME_FLAG
        })
        .map(|(key, value)| {
            let values: Vec<&str> = value.split(',').collect();
            json!({ "name": key, "value": values })
        })
        .collect();
    json!({
        "apiVersion": API_VERSION,
        "kind": KIND,
        "metadata": { "name": uid },
        "spec": {
            "experiments": [{
                "scope": scope,
                "target": target,
                "action": model.action_name,
                "desc": format!("created by faultline {}", env!("CARGO_PKG_VERSION")),
                "matchers": matchers,
            }]
        }
    })
}

/// What `kubectl get chaosblade` reported.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusResult {
    pub uid: String,
    pub phase: String,
    pub error: String,
}

impl StatusResult {
    pub fn from_resource(uid: &str, body: &str) -> Result<Self, String> {
        let value: Value =
            serde_json::from_str(body).map_err(|err| format!("unmarshal chaosblade {}: {}", uid, err))?;
        let status = &value["status"];
        let mut errors: Vec<String> = Vec::new();
        if let Some(experiments) = status["expStatuses"].as_array() {
            for experiment in experiments {
                if let Some(error) = experiment["error"].as_str().filter(|e| !e.is_empty()) {
                    errors.push(error.to_string());
                }
                for resource in experiment["resStatuses"].as_array().into_iter().flatten() {
                    if let Some(error) = resource["error"].as_str().filter(|e| !e.is_empty()) {
                        errors.push(error.to_string());
                    }
                }
            }
        }
        Ok(Self {
            uid: uid.to_string(),
            phase: status["phase"].as_str().unwrap_or_default().to_string(),
            error: errors.join("; "),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Poll {
    Status(StatusResult),
    NotFound,
    Failed(Response),
}

fn is_not_found(message: &str) -> bool {
    message.contains("NotFound") || message.contains("not found")
}

pub struct ResourceExecutor {
    config: KubernetesConfig,
}

impl ResourceExecutor {
    pub fn new(config: KubernetesConfig) -> Self {
        Self { config }
    }

    fn kubectl_args(&self, model: &ExpModel, args: &str) -> String {
        match model.flag(KUBECONFIG_FLAG) {
            Some(path) => format!("--kubeconfig {} {}", path, args),
            None => args.to_string(),
        }
    }

    fn kubectl(&self, channel: &dyn Channel, request: &ExecRequest, model: &ExpModel, args: &str) -> Response {
        let resp = channel.run(request, &self.config.kubectl, &self.kubectl_args(model, args));
        if resp.success || !is_kubectl_error(&resp.message()) {
            resp
        } else {
            Response::fail(Code::K8sInvokeError, resp.message())
        }
    }

    fn waiting_time(&self, model: &ExpModel) -> Result<Duration, Response> {
        match model.flag(WAITING_TIME_FLAG) {
            Some(value) => parse_duration(value).map_err(|err| {
                Response::fail(Code::IllegalParameters, format!("--waiting-time: {:#}", err))
            }),
            None => Ok(self.config.waiting_time),
        }
    }

    fn poll(&self, channel: &dyn Channel, request: &ExecRequest, uid: &str, model: &ExpModel) -> Poll {
        let resp = channel.run(
            request,
            &self.config.kubectl,
            &self.kubectl_args(model, &format!("get chaosblade {} -o json", uid)),
        );
        if !resp.success {
            return if is_not_found(&resp.message()) {
                Poll::NotFound
            } else {
                Poll::Failed(Response::fail(Code::K8sInvokeError, resp.message()))
            };
        }
        match StatusResult::from_resource(uid, &resp.result_text()) {
            Ok(status) => Poll::Status(status),
            Err(err) => Poll::Failed(Response::fail(Code::K8sInvokeError, err)),
        }
    }

    /// Polls until `done` says the resource settled, the deadline passes, or
    /// the request is cancelled.
    fn wait<F>(
        &self,
        channel: &dyn Channel,
        request: &ExecRequest,
        uid: &str,
        model: &ExpModel,
        waiting: Duration,
        done: F,
    ) -> Response
    where
        F: Fn(&Poll) -> Option<Response>,
    {
        let mut deadline = Instant::now() + waiting;
        if let Some(limit) = request.deadline {
            deadline = deadline.min(limit);
        }
        let last = loop {
            if request.cancel.is_cancelled() {
                return Response::fail(Code::Timeout, format!("waiting for chaosblade {} was cancelled", uid));
            }
            let poll = self.poll(channel, request, uid, model);
            debug!(uid, poll = ?poll, "chaosblade status");
            if let Some(resp) = done(&poll) {
                return resp;
            }
            let now = Instant::now();
            if now >= deadline {
                break poll;
            }
            thread::sleep(self.config.poll_interval.min(deadline - now));
        };
        let detail = match &last {
            Poll::Status(status) => serde_json::to_string(status).unwrap_or_default(),
            Poll::NotFound => "resource not found".to_string(),
            Poll::Failed(resp) => resp.message(),
        };
        warn!(uid, detail = %detail, "chaosblade did not settle in time");
        Response::fail(
            Code::K8sInvokeError,
            format!("wait for chaosblade {} timed out, last status: {}", uid, detail),
        )
    }

    fn create(&self, uid: &str, request: &ExecRequest, model: &ExpModel, channel: &dyn Channel) -> Response {
        let waiting = match self.waiting_time(model) {
            Ok(waiting) => waiting,
            Err(resp) => return resp,
        };
        let resource = chaos_resource(uid, model).to_string();
        let resp = channel.run(
            request,
            "echo",
            &format!(
                "{} | {} {}",
                shell_quote(&resource),
                self.config.kubectl,
                self.kubectl_args(model, "apply -f -")
            ),
        );
        if !resp.success {
            return Response::fail(Code::K8sInvokeError, resp.message());
        }
        info!(uid, "chaosblade applied");
        self.wait(channel, request, uid, model, waiting, |poll| match poll {
            Poll::Status(status) if status.phase == PHASE_RUNNING => {
                Some(Response::success(json!(status)))
            }
            Poll::Status(status) if status.phase == PHASE_ERROR => {
                Some(Response::fail(Code::K8sInvokeError, status.error.clone()))
            }
            _ => None,
        })
    }

    fn destroy(&self, uid: &str, request: &ExecRequest, model: &ExpModel, channel: &dyn Channel) -> Response {
        let waiting = match self.waiting_time(model) {
            Ok(waiting) => waiting,
            Err(resp) => return resp,
        };
        let resp = self.kubectl(channel, request, model, &format!("delete chaosblade {}", uid));
        if !resp.success && !is_not_found(&resp.message()) {
            return resp;
        }
        info!(uid, "chaosblade deleted");
        self.wait(channel, request, uid, model, waiting, |poll| match poll {
            Poll::NotFound => Some(Response::success(json!({ "uid": uid, "phase": PHASE_DESTROYED }))),
            Poll::Status(status) if status.phase == PHASE_DESTROYED => {
                Some(Response::success(json!(status)))
            }
            _ => None,
        })
    }
}

impl Executor for ResourceExecutor {
    fn name(&self) -> &'static str {
        "k8s"
    }

    fn exec(&self, uid: &str, request: &ExecRequest, model: &ExpModel, channel: &dyn Channel) -> Response {
        if request.is_destroy() {
            self.destroy(uid, request, model, channel)
        } else {
            self.create(uid, request, model, channel)
        }
    }
}

/// Runs the primitive when a node agent or sidecar was resolved, else the resource.
pub struct ComposeExecutor {
    primitive: Option<PrimitiveExecutor>,
    resource: ResourceExecutor,
}

impl ComposeExecutor {
    pub fn new(primitive: Option<PrimitiveExecutor>, resource: ResourceExecutor) -> Self {
        Self { primitive, resource }
    }
}

impl Executor for ComposeExecutor {
    fn name(&self) -> &'static str {
        "k8s-compose"
    }

    fn exec(&self, uid: &str, request: &ExecRequest, model: &ExpModel, channel: &dyn Channel) -> Response {
        let routed = request.pod().is_some() || channel.name() == "sidecar";
        match &self.primitive {
            Some(primitive) if routed => primitive.exec(uid, request, model, channel),
            _ => self.resource.exec(uid, request, model, channel),
        }
    }
}

/// `kubectl delete pod`; there is nothing to restore.
pub struct PodDeleteExecutor {
    kubectl: String,
}

impl PodDeleteExecutor {
    pub fn new(kubectl: &str) -> Self {
        Self {
            kubectl: kubectl.to_string(),
        }
    }
}

impl Executor for PodDeleteExecutor {
    fn name(&self) -> &'static str {
        "pod-delete"
    }

    fn exec(&self, uid: &str, request: &ExecRequest, model: &ExpModel, channel: &dyn Channel) -> Response {
        if request.is_destroy() {
            return Response::success_empty();
        }
        let Some(names) = model.flag("names") else {
            return Response::fail(Code::IllegalParameters, "less names flag");
        };
        let mut args = format!("delete pod {}", names.split(',').collect::<Vec<_>>().join(" "));
        if let Some(namespace) = model.flag("namespace") {
            args.push_str(&format!(" -n {}", namespace));
        }
        if model.flag_enabled("force") {
            args.push_str(" --force --grace-period=0");
        }
        info!(uid, pods = names, "deleting pods");
        let resp = channel.run(request, &self.kubectl, &args);
        if resp.success {
            resp
        } else {
            Response::fail(Code::K8sInvokeError, resp.message())
        }
    }
}
