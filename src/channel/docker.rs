// SPDX-License-Identifier: PMPL-1.0-or-later

//! Runs commands inside a helper container that shares the target's namespaces.

use super::{command_line, Channel};
use crate::transport::{Code, Response};
use crate::types::{ContainerRouting, ExecRequest};
use crate::util::shell_quote;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

/// Label put on every helper so leftovers can be found with `docker ps -f`.
pub const HELPER_LABEL: &str = "faultline.target";

/// Helper name derived from the target container and the fault kind.
pub fn helper_name(container_id: &str, kind: &str) -> String {
    let short: String = container_id.chars().take(12).collect();
    format!("faultline-{}-{}", short, kind)
}

pub struct DockerChannel {
    host: Arc<dyn Channel>,
    image: String,
    script_path: PathBuf,
}

impl DockerChannel {
    pub fn new(host: Arc<dyn Channel>, image: &str, script_path: PathBuf) -> Self {
        Self {
            host,
            image: image.to_string(),
            script_path,
        }
    }

    fn helper_running(&self, request: &ExecRequest, name: &str) -> Result<bool, Response> {
        let resp = self.host.run(
            request,
            "docker",
            &format!("ps -q --filter name=^{}$", name),
        );
        if !resp.success {
            return Err(Response::fail(Code::DockerInvokeError, resp.message()));
        }
        Ok(!resp.result_text().trim().is_empty())
    }

    fn ensure_helper(&self, request: &ExecRequest, routing: &ContainerRouting) -> Result<(), Response> {
        if self.helper_running(request, &routing.helper_name)? {
            return Ok(());
        }
        let args = format!(
            "run -d --name {} {} {} sleep infinity",
            routing.helper_name,
            routing.run_flags.join(" "),
            self.image
        );
        debug!(helper = %routing.helper_name, "starting helper container");
        let resp = self.host.run(request, "docker", &args);
        if resp.success {
            Ok(())
        } else {
            Err(Response::fail(
                Code::DockerInvokeError,
                format!("start helper container {}: {}", routing.helper_name, resp.message()),
            ))
        }
    }

    fn remove_helper(&self, request: &ExecRequest, name: &str) {
        let resp = self.host.run(request, "docker", &format!("rm -f {}", name));
        if !resp.success {
            warn!(helper = %name, error = %resp.message(), "remove helper container failed");
        }
    }
}

impl Channel for DockerChannel {
    fn name(&self) -> &'static str {
        "docker"
    }

    fn run(&self, request: &ExecRequest, program: &str, args: &str) -> Response {
        let Some(routing) = request.container() else {
            return Response::fail(
                Code::ServerError,
                "docker channel needs a container routing, none was resolved",
            );
        };
        if let Err(resp) = self.ensure_helper(request, routing) {
            return resp;
        }
        let script = command_line(program, args);
        let resp = self.host.run(
            request,
            "docker",
            &format!("exec {} /bin/sh -c {}", routing.helper_name, shell_quote(&script)),
        );
        if request.is_destroy() {
            self.remove_helper(request, &routing.helper_name);
        }
        resp
    }

    fn script_path(&self) -> PathBuf {
        self.script_path.clone()
    }
}
