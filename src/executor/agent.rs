// SPDX-License-Identifier: PMPL-1.0-or-later

//! HTTP executors for in-process agents (jvm sandbox, cplus proxy).
//!
//! The agent must have been prepared first; its port comes from the
//! `Running` preparation record.

use super::Executor;
use crate::catalog::TIMEOUT_FLAG;
use crate::channel::Channel;
use crate::config::AgentConfig;
use crate::error::FaultError;
use crate::store::{PreparationRecord, Store};
use crate::transport::{Code, Response};
use crate::types::{AgentKind, ExecRequest, ExpModel};
use std::time::Duration;
use tracing::{debug, error};

/// Module path the chaos module registers under in the jvm sandbox.
pub fn jvm_uri(sandbox_namespace: &str) -> String {
    format!("sandbox/{}/module/http/chaosblade", sandbox_namespace)
}

/// Minimal query-component escaping: unreserved characters pass through.
pub fn query_escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                escaped.push(byte as char)
            }
            b' ' => escaped.push('+'),
            other => escaped.push_str(&format!("%{:02X}", other)),
        }
    }
    escaped
}

/// Blocking GET that hands back the body, or the transport error chain.
pub fn http_get(url: &str, timeout: Duration) -> Result<String, String> {
    let chain = |err: reqwest::Error| format!("{:#}", anyhow::Error::new(err));
    let client = reqwest::blocking::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(chain)?;
    let response = client.get(url).send().map_err(chain)?;
    response.text().map_err(chain)
}

pub struct AgentExecutor {
    kind: AgentKind,
    store: Store,
    config: AgentConfig,
}

impl AgentExecutor {
    pub fn new(kind: AgentKind, store: Store, config: AgentConfig) -> Self {
        Self {
            kind,
            store,
            config,
        }
    }

    fn base_url(&self, port: &str) -> String {
        match self.kind {
            AgentKind::Jvm => format!(
                "http://{}:{}/{}",
                self.config.host,
                port,
                jvm_uri(&self.config.sandbox_namespace)
            ),
            AgentKind::Cplus => format!("http://{}:{}", self.config.host, port),
        }
    }

    pub fn create_url(&self, port: &str, uid: &str, model: &ExpModel) -> String {
        let mut url = format!(
            "{}/create?target={}&suid={}&action={}",
            self.base_url(port),
            query_escape(&model.target),
            query_escape(uid),
            query_escape(&model.action_name)
        );
        for (key, value) in &model.action_flags {
            if value.is_empty() || value == "false" || key == TIMEOUT_FLAG {
                continue;
            }
            url.push_str(&format!("&{}={}", query_escape(key), query_escape(value)));
        }
        url
    }

    pub fn destroy_url(&self, port: &str, uid: &str) -> String {
        format!("{}/destroy?suid={}", self.base_url(port), query_escape(uid))
    }

    fn prepared(&self, model: &ExpModel) -> Result<PreparationRecord, FaultError> {
        let (process, pid) = match self.kind {
            AgentKind::Jvm => (model.flag_or("process", ""), model.flag_or("pid", "")),
            // cplus records are keyed by the proxy port.
            AgentKind::Cplus => (model.flag_or("port", ""), ""),
        };
        let record = self
            .store
            .running_preparation(self.kind.as_str(), process, pid)
            .map_err(FaultError::Database)?;
        record.ok_or_else(|| {
            FaultError::AgentNotPrepared(format!(
                "the {} agent is not prepared, run `faultline prepare {}` first",
                self.kind.as_str(),
                self.kind.as_str()
            ))
        })
    }
}

impl Executor for AgentExecutor {
    fn name(&self) -> &'static str {
        self.kind.as_str()
    }

    fn exec(&self, uid: &str, request: &ExecRequest, model: &ExpModel, _channel: &dyn Channel) -> Response {
        let record = match self.prepared(model) {
            Ok(record) => record,
            Err(err) => return err.into_response(),
        };
        let url = if request.is_destroy() {
            self.destroy_url(&record.port, uid)
        } else {
            self.create_url(&record.port, uid, model)
        };
        let timeout = request
            .remaining()
            .map_or(self.config.http_timeout, |left| left.min(self.config.http_timeout));
        debug!(uid, url = %url, "calling agent");
        match http_get(&url, timeout) {
            Ok(body) => Response::from_json(&body),
            Err(err) => {
                error!(uid, url = %url, error = %err, "agent request failed");
                Response::fail(
                    Code::SandboxInvokeError,
                    format!("invoke {} failed: {}", url, err),
                )
            }
        }
    }
}
