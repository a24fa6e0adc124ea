// SPDX-License-Identifier: PMPL-1.0-or-later

//! Routes Kubernetes faults to the node agent next to a container, or to a
//! CPU-burn sidecar in a Deployment.

use super::{PreExecutor, PreHook};
use crate::channel::{Channel, KubernetesChannel, SidecarChannel};
use crate::config::KubernetesConfig;
use crate::error::{FaultError, FaultResult};
use crate::types::{ExecRequest, Flags, PodRouting, Routing};
use crate::util::shell_quote;
use std::sync::Arc;
use tracing::debug;

const POD_CONTAINERS: &str = r#"{range .items[*]}{.metadata.namespace} {.metadata.name} {.spec.nodeName} {range .status.containerStatuses[*]}{.containerID} {end}{"\n"}{end}"#;

/// Where a container lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerLocation {
    pub namespace: String,
    pub pod: String,
    pub node: String,
}

/// Finds the pod whose container ids (`docker://<id>`, `containerd://<id>`)
/// start with `container_id`.
pub fn locate_container(listing: &str, container_id: &str) -> Option<ContainerLocation> {
    listing.lines().find_map(|line| {
        let mut fields = line.split_whitespace();
        let namespace = fields.next()?;
        let pod = fields.next()?;
        let node = fields.next()?;
        let found = fields.any(|id| {
            let bare = id.split_once("://").map_or(id, |(_, rest)| rest);
            bare.starts_with(container_id)
        });
        found.then(|| ContainerLocation {
            namespace: namespace.to_string(),
            pod: pod.to_string(),
            node: node.to_string(),
        })
    })
}

pub struct KubernetesPreExecutor {
    host: Arc<dyn Channel>,
    config: KubernetesConfig,
}

impl KubernetesPreExecutor {
    pub fn new(host: Arc<dyn Channel>, config: KubernetesConfig) -> Self {
        Self { host, config }
    }
}

fn kubectl(host: &dyn Channel, request: &ExecRequest, kubectl: &str, args: &str) -> FaultResult<String> {
    let resp = host.run(request, kubectl, args);
    if resp.success {
        Ok(resp.result_text())
    } else {
        Err(FaultError::Kubernetes(resp.message()))
    }
}

fn resolve_agent(
    host: &dyn Channel,
    config: &KubernetesConfig,
    request: &ExecRequest,
    container_id: &str,
    namespace: Option<&str>,
) -> FaultResult<PodRouting> {
    let scope = match namespace {
        Some(namespace) => format!("-n {}", namespace),
        None => "--all-namespaces".to_string(),
    };
    let listing = kubectl(
        host,
        request,
        &config.kubectl,
        &format!("get pods {} -o jsonpath={}", scope, shell_quote(POD_CONTAINERS)),
    )?;
    let location = locate_container(&listing, container_id).ok_or_else(|| {
        FaultError::PreHandle(format!("container {} not found in any pod", container_id))
    })?;
    let agent = kubectl(
        host,
        request,
        &config.kubectl,
        &format!(
            "get pods -n {} -l {} --field-selector spec.nodeName={} -o jsonpath={}",
            config.agent_namespace,
            config.agent_label,
            location.node,
            shell_quote("{.items[0].metadata.name}")
        ),
    )?;
    let agent = agent.trim();
    if agent.is_empty() {
        return Err(FaultError::PreHandle(format!(
            "no faultline agent running on node {}",
            location.node
        )));
    }
    debug!(pod = %location.pod, node = %location.node, agent, "container located");
    Ok(PodRouting {
        namespace: config.agent_namespace.clone(),
        pod: agent.to_string(),
        node: location.node,
        container_id: container_id.to_string(),
    })
}

impl PreExecutor for KubernetesPreExecutor {
    fn name(&self) -> &'static str {
        "k8s"
    }

    fn pre_exec(&self, action: &str, parent_action: &str, flags: &Flags) -> Option<PreHook> {
        let get = |name: &str| flags.get(name).filter(|v| !v.is_empty()).cloned();
        let namespace = get("namespace");
        let host = self.host.clone();
        let config = self.config.clone();

        if let Some(deployment) = get("deployment") {
            if parent_action.ends_with("cpu") && action == "fullload" {
                return Some(Box::new(move |request| {
                    let channel: Arc<dyn Channel> = Arc::new(SidecarChannel::new(
                        host,
                        &config.kubectl,
                        namespace.as_deref().unwrap_or("default"),
                        &deployment,
                        &config.sidecar_image,
                    ));
                    Ok((Some(channel), request))
                }));
            }
        }

        let container_id = get("container-id")?;
        if parent_action == "pod" && action == "delete" {
            return None;
        }
        Some(Box::new(move |request: ExecRequest| {
            let routing = resolve_agent(
                host.as_ref(),
                &config,
                &request,
                &container_id,
                namespace.as_deref(),
            )?;
            let channel: Arc<dyn Channel> = Arc::new(KubernetesChannel::new(
                host,
                &config.kubectl,
                config.script_path.clone(),
            ));
            Ok((Some(channel), request.with_routing(Routing::Pod(routing))))
        }))
    }
}
