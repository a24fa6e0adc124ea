// SPDX-License-Identifier: PMPL-1.0-or-later

//! CPU burn for Kubernetes workloads via a patched-in sidecar container.
//!
//! Nothing is shipped into the pod: `--start` becomes a JSON patch adding a
//! busy-loop container to the Deployment's pod template, `--stop` removes it.

use super::kubernetes::is_kubectl_error;
use super::Channel;
use crate::transport::{Code, Response};
use crate::types::ExecRequest;
use crate::util::shell_quote;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

pub const SIDECAR_NAME: &str = "faultline-cpu-burn";

pub struct SidecarChannel {
    host: Arc<dyn Channel>,
    kubectl: String,
    namespace: String,
    deployment: String,
    image: String,
}

impl SidecarChannel {
    pub fn new(
        host: Arc<dyn Channel>,
        kubectl: &str,
        namespace: &str,
        deployment: &str,
        image: &str,
    ) -> Self {
        Self {
            host,
            kubectl: kubectl.to_string(),
            namespace: namespace.to_string(),
            deployment: deployment.to_string(),
            image: image.to_string(),
        }
    }

    fn kubectl(&self, request: &ExecRequest, args: &str) -> Response {
        let resp = self.host.run(request, &self.kubectl, args);
        if resp.success || !is_kubectl_error(&resp.message()) {
            resp
        } else {
            Response::fail(Code::K8sInvokeError, resp.message())
        }
    }

    fn patch(&self, request: &ExecRequest, ops: serde_json::Value) -> Response {
        self.kubectl(
            request,
            &format!(
                "patch deployment {} -n {} --type json -p {}",
                self.deployment,
                self.namespace,
                shell_quote(&ops.to_string())
            ),
        )
    }

    fn container_names(&self, request: &ExecRequest) -> Result<Vec<String>, Response> {
        let resp = self.kubectl(
            request,
            &format!(
                "get deployment {} -n {} -o jsonpath={}",
                self.deployment,
                self.namespace,
                shell_quote("{.spec.template.spec.containers[*].name}")
            ),
        );
        if !resp.success {
            return Err(resp);
        }
        Ok(resp
            .result_text()
            .split_whitespace()
            .map(str::to_string)
            .collect())
    }

    fn add(&self, request: &ExecRequest, args: &str) -> Response {
        match self.container_names(request) {
            Ok(names) if names.iter().any(|name| name == SIDECAR_NAME) => {
                return Response::fail(
                    Code::DuplicateError,
                    format!("{} already runs in deployment {}", SIDECAR_NAME, self.deployment),
                )
            }
            Ok(_) => {}
            Err(resp) => return resp,
        }
        let (count, percent) = burn_shape(args);
        let container = json!({
            "name": SIDECAR_NAME,
            "image": self.image,
            "command": [
                "/bin/sh",
                "-c",
                format!("for i in $(seq 1 {}); do (while :; do :; done) & done; wait", count),
            ],
            "resources": {
                "limits": { "cpu": format!("{}m", count * percent * 10) }
            }
        });
        info!(deployment = %self.deployment, count, percent, "patching cpu burn sidecar");
        self.patch(
            request,
            json!([{ "op": "add", "path": "/spec/template/spec/containers/-", "value": container }]),
        )
    }

    fn remove(&self, request: &ExecRequest) -> Response {
        let names = match self.container_names(request) {
            Ok(names) => names,
            Err(resp) => return resp,
        };
        let Some(index) = names.iter().position(|name| name == SIDECAR_NAME) else {
            return Response::success("nothing to do");
        };
        info!(deployment = %self.deployment, "removing cpu burn sidecar");
        self.patch(
            request,
            json!([{ "op": "remove", "path": format!("/spec/template/spec/containers/{}", index) }]),
        )
    }
}

/// Reads `--cpu-count` and `--cpu-percent` from a burn-cpu command line.
fn burn_shape(args: &str) -> (u32, u32) {
    let tokens: Vec<&str> = args.split_whitespace().collect();
    let value = |flag: &str| {
        tokens
            .iter()
            .position(|token| *token == flag)
            .and_then(|idx| tokens.get(idx + 1))
            .and_then(|value| value.parse::<u32>().ok())
    };
    let count = value("--cpu-count").filter(|count| *count > 0).unwrap_or(1);
    let percent = value("--cpu-percent")
        .filter(|percent| (1..=100).contains(percent))
        .unwrap_or(100);
    (count, percent)
}

impl Channel for SidecarChannel {
    fn name(&self) -> &'static str {
        "sidecar"
    }

    fn run(&self, request: &ExecRequest, _program: &str, args: &str) -> Response {
        let stopping = request.is_destroy() || args.split_whitespace().any(|arg| arg == "--stop");
        if stopping {
            self.remove(request)
        } else {
            self.add(request, args)
        }
    }

    fn script_path(&self) -> PathBuf {
        PathBuf::new()
    }
}
