// SPDX-License-Identifier: PMPL-1.0-or-later

use super::Executor;
use crate::channel::Channel;
use crate::transport::{Code, Response};
use crate::types::{ExecRequest, ExpModel};
use tracing::info;

/// `docker rm [-f] <container>`; a removed container is not brought back.
pub struct DockerRemoveExecutor;

impl Executor for DockerRemoveExecutor {
    fn name(&self) -> &'static str {
        "docker-remove"
    }

    fn exec(&self, uid: &str, request: &ExecRequest, model: &ExpModel, channel: &dyn Channel) -> Response {
        if request.is_destroy() {
            return Response::success_empty();
        }
        let Some(container) = model.flag("container-id") else {
            return Response::fail(Code::IllegalParameters, "less container-id flag");
        };
        let args = if model.flag_enabled("force") {
            format!("rm -f {}", container)
        } else {
            format!("rm {}", container)
        };
        info!(uid, container, "removing container");
        let resp = channel.run(request, "docker", &args);
        if resp.success {
            resp
        } else {
            Response::fail(Code::DockerInvokeError, resp.message())
        }
    }
}
