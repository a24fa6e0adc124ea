// SPDX-License-Identifier: PMPL-1.0-or-later

//! Routes docker faults into a helper container sharing the target's namespaces.

use super::{PreExecutor, PreHook};
use crate::channel::docker::{helper_name, HELPER_LABEL};
use crate::channel::{Channel, DockerChannel};
use crate::config::DockerConfig;
use crate::error::{FaultError, FaultResult};
use crate::types::{ContainerRouting, ExecRequest, Flags, Routing};
use std::sync::Arc;
use tracing::debug;

pub const CONTAINER_ID_FLAG: &str = "container-id";

pub struct DockerPreExecutor {
    host: Arc<dyn Channel>,
    config: DockerConfig,
}

impl DockerPreExecutor {
    pub fn new(host: Arc<dyn Channel>, config: DockerConfig) -> Self {
        Self { host, config }
    }
}

/// `docker run` flags for a helper serving `kind` against `container`.
pub fn run_flags(kind: &str, container: &str, cpuset: Option<&str>) -> Vec<String> {
    let share = |ns: &str| format!("--{} container:{}", ns, container);
    let mut flags = vec![format!("--label {}={}", HELPER_LABEL, kind)];
    match kind {
        "cpu" => {
            if let Some(cpuset) = cpuset.filter(|c| !c.is_empty()) {
                flags.push(format!("--cpuset-cpus {}", cpuset));
            }
            flags.push(share("pid"));
            flags.push(share("ipc"));
            flags.push(share("net"));
        }
        "network" => {
            flags.push("--cap-add NET_ADMIN".to_string());
            flags.push(share("net"));
        }
        "process" => {
            flags.push(share("pid"));
            flags.push("--cap-add SYS_PTRACE".to_string());
        }
        _ => {}
    }
    flags
}

fn cpuset_of(host: &dyn Channel, request: &ExecRequest, container: &str) -> FaultResult<String> {
    let resp = host.run(
        request,
        "docker",
        &format!("inspect -f '{{{{.HostConfig.CpusetCpus}}}}' {}", container),
    );
    if resp.success {
        Ok(resp.result_text().trim().to_string())
    } else {
        Err(FaultError::Docker(resp.message()))
    }
}

impl PreExecutor for DockerPreExecutor {
    fn name(&self) -> &'static str {
        "docker"
    }

    fn pre_exec(&self, _action: &str, parent_action: &str, flags: &Flags) -> Option<PreHook> {
        // `docker remove` talks to the daemon directly.
        if parent_action == "docker" {
            return None;
        }
        let container = flags
            .get(CONTAINER_ID_FLAG)
            .filter(|id| !id.is_empty())
            .cloned();
        let kind = parent_action.to_string();
        let host = self.host.clone();
        let config = self.config.clone();
        Some(Box::new(move |request: ExecRequest| {
            let container =
                container.ok_or_else(|| FaultError::MissingFlag(CONTAINER_ID_FLAG.to_string()))?;
            let cpuset = if kind == "cpu" && !request.is_destroy() {
                Some(cpuset_of(host.as_ref(), &request, &container)?)
            } else {
                None
            };
            let routing = ContainerRouting {
                helper_name: helper_name(&container, &kind),
                run_flags: run_flags(&kind, &container, cpuset.as_deref()),
                container_id: container,
            };
            debug!(helper = %routing.helper_name, "docker routing resolved");
            let channel: Arc<dyn Channel> =
                Arc::new(DockerChannel::new(host, &config.image, config.script_path.clone()));
            Ok((Some(channel), request.with_routing(Routing::Container(routing))))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MockChannel;
    use crate::config::Config;
    use crate::transport::Response;
    use std::path::Path;

    fn pre(host: Arc<MockChannel>) -> DockerPreExecutor {
        DockerPreExecutor::new(host, Config::for_home(Path::new("/opt/faultline")).docker)
    }

    #[test]
    fn cpu_helper_is_pinned_to_target_cpuset() {
        let host = Arc::new(MockChannel::new().respond("docker inspect", Response::success("0-1\n")));
        let mut flags = Flags::new();
        flags.insert(CONTAINER_ID_FLAG.into(), "9c1e0d7a3b2f11aa".into());
        let hook = pre(host.clone()).pre_exec("fullload", "cpu", &flags).expect("hook");
        let (channel, request) = hook(ExecRequest::create()).expect("hook should resolve");
        assert_eq!(channel.map(|c| c.name()), Some("docker"));
        let routing = request.container().expect("container routing");
        assert_eq!(routing.helper_name, "faultline-9c1e0d7a3b2f-cpu");
        assert_eq!(
            routing.run_flags,
            vec![
                "--label faultline.target=cpu",
                "--cpuset-cpus 0-1",
                "--pid container:9c1e0d7a3b2f11aa",
                "--ipc container:9c1e0d7a3b2f11aa",
                "--net container:9c1e0d7a3b2f11aa",
            ]
        );
        assert_eq!(
            host.commands(),
            vec!["docker inspect -f '{{.HostConfig.CpusetCpus}}' 9c1e0d7a3b2f11aa"]
        );
    }

    #[test]
    fn network_helper_gets_net_admin() {
        let flags = run_flags("network", "abc", None);
        assert_eq!(
            flags,
            vec!["--label faultline.target=network", "--cap-add NET_ADMIN", "--net container:abc"]
        );
    }

    #[test]
    fn missing_container_id_fails_in_hook() {
        let hook = pre(Arc::new(MockChannel::new()))
            .pre_exec("delay", "network", &Flags::new())
            .expect("hook");
        assert!(matches!(hook(ExecRequest::create()), Err(FaultError::MissingFlag(_))));
    }

    #[test]
    fn remove_runs_locally() {
        let pre = pre(Arc::new(MockChannel::new()));
        assert!(pre.pre_exec("remove", "docker", &Flags::new()).is_none());
    }
}
