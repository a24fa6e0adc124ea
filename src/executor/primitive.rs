// SPDX-License-Identifier: PMPL-1.0-or-later

//! Runs a `chaos_*` binary with `--start` or `--stop`.

use super::Executor;
use crate::catalog::FlagSpec;
use crate::channel::Channel;
use crate::error::FaultError;
use crate::primitive::Primitive;
use crate::transport::Response;
use crate::types::{ExecRequest, ExpModel};
use crate::util::shell_quote;
use tracing::{debug, info};

pub struct PrimitiveExecutor {
    primitive: Primitive,
    flags: Vec<FlagSpec>,
}

impl PrimitiveExecutor {
    pub fn new(primitive: Primitive, flags: Vec<FlagSpec>) -> Self {
        Self { primitive, flags }
    }

    pub fn primitive(&self) -> Primitive {
        self.primitive
    }

    /// `--start|--stop` followed by the flags the action declares.
    pub fn command_args(&self, model: &ExpModel, destroy: bool) -> Result<String, FaultError> {
        let mut args = vec![if destroy { "--stop" } else { "--start" }.to_string()];
        for spec in &self.flags {
            match model.flag(spec.name) {
                Some(value) if spec.boolean => {
                    if value == "true" {
                        args.push(format!("--{}", spec.name));
                    }
                }
                Some(value) => args.push(format!("--{} {}", spec.name, quote_arg(value))),
                None if spec.required => return Err(FaultError::MissingFlag(spec.name.to_string())),
                None => {}
            }
        }
        Ok(args.join(" "))
    }
}

fn quote_arg(value: &str) -> String {
    let plain = value
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || "._,:/@%+=-".contains(ch));
    if plain {
        value.to_string()
    } else {
        shell_quote(value)
    }
}

impl Executor for PrimitiveExecutor {
    fn name(&self) -> &'static str {
        self.primitive.binary()
    }

    fn exec(&self, uid: &str, request: &ExecRequest, model: &ExpModel, channel: &dyn Channel) -> Response {
        let destroy = request.is_destroy();
        if destroy && !self.primitive.reversible() {
            debug!(uid, primitive = self.primitive.binary(), "nothing to reverse");
            return Response::success_empty();
        }
        let args = match self.command_args(model, destroy) {
            Ok(args) => args,
            Err(err) => return err.into_response(),
        };
        let program = channel.script_path().join(self.primitive.binary());
        info!(
            uid,
            channel = channel.name(),
            primitive = self.primitive.binary(),
            destroy,
            "running primitive"
        );
        channel.run(request, &program.display().to_string(), &args)
    }
}
