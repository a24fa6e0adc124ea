// SPDX-License-Identifier: PMPL-1.0-or-later

//! Exec into the chaos agent pod that shares a node with the target.

use super::{command_line, Channel};
use crate::transport::{Code, Response};
use crate::types::ExecRequest;
use crate::util::shell_quote;
use std::path::PathBuf;
use std::sync::Arc;

pub struct KubernetesChannel {
    host: Arc<dyn Channel>,
    kubectl: String,
    script_path: PathBuf,
}

impl KubernetesChannel {
    pub fn new(host: Arc<dyn Channel>, kubectl: &str, script_path: PathBuf) -> Self {
        Self {
            host,
            kubectl: kubectl.to_string(),
            script_path,
        }
    }
}

/// kubectl reports its own failures with these prefixes.
pub(crate) fn is_kubectl_error(message: &str) -> bool {
    message.starts_with("Error from server") || message.starts_with("error:")
}

impl Channel for KubernetesChannel {
    fn name(&self) -> &'static str {
        "kubernetes"
    }

    fn run(&self, request: &ExecRequest, program: &str, args: &str) -> Response {
        let Some(pod) = request.pod() else {
            return Response::fail(
                Code::ServerError,
                "kubernetes channel needs a pod routing, none was resolved",
            );
        };
        let script = command_line(program, args);
        let resp = self.host.run(
            request,
            &self.kubectl,
            &format!(
                "exec -n {} {} -- /bin/sh -c {}",
                pod.namespace,
                pod.pod,
                shell_quote(&script)
            ),
        );
        if !resp.success && is_kubectl_error(&resp.message()) {
            return Response::fail(Code::K8sInvokeError, resp.message());
        }
        resp
    }

    fn script_path(&self) -> PathBuf {
        self.script_path.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MockChannel;
    use crate::types::{PodRouting, Routing};

    fn request() -> ExecRequest {
        ExecRequest::create().with_routing(Routing::Pod(PodRouting {
            namespace: "faultline".into(),
            pod: "faultline-agent-x7k2p".into(),
            node: "node-3".into(),
            container_id: "abc123".into(),
        }))
    }

    #[test]
    fn execs_into_agent_pod() {
        let host = Arc::new(MockChannel::new());
        let channel = KubernetesChannel::new(host.clone(), "kubectl", PathBuf::from("/opt/bin"));
        assert!(channel.run(&request(), "/opt/bin/chaos_burnmem", "--stop").success);
        assert_eq!(
            host.commands(),
            vec!["kubectl exec -n faultline faultline-agent-x7k2p -- /bin/sh -c '/opt/bin/chaos_burnmem --stop'"]
        );
    }

    #[test]
    fn kubectl_failures_map_to_k8s_code() {
        let host = Arc::new(MockChannel::new().respond(
            "kubectl exec",
            Response::fail(Code::ExecCommandError, "Error from server (NotFound): pods not found"),
        ));
        let channel = KubernetesChannel::new(host, "kubectl", PathBuf::new());
        let resp = channel.run(&request(), "true", "");
        assert!(resp.is_code(Code::K8sInvokeError));
    }
}
