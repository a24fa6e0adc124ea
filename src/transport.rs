// SPDX-License-Identifier: PMPL-1.0-or-later

//! Response envelope shared by channels, executors, agents and the CLI.
//!
//! Every operation reports `{code, success, error?, result?}` rather than
//! propagating an error, so callers can inspect `success` uniformly no
//! matter which surface produced the result.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Code {
    Ok,
    DataNotFound,
    DestroyNotSupported,
    ServerError,
    PreHandleError,
    Timeout,
    FileNotFound,
    DatabaseError,
    ParameterEmpty,
    IllegalParameters,
    IllegalCommand,
    ExecCommandError,
    DuplicateError,
    CommandNotFound,
    AgentNotPrepared,
    K8sInvokeError,
    DockerInvokeError,
    SandboxInvokeError,
}

impl Code {
    pub const ALL: [Code; 18] = [
        Code::Ok,
        Code::DataNotFound,
        Code::DestroyNotSupported,
        Code::ServerError,
        Code::PreHandleError,
        Code::Timeout,
        Code::FileNotFound,
        Code::DatabaseError,
        Code::ParameterEmpty,
        Code::IllegalParameters,
        Code::IllegalCommand,
        Code::ExecCommandError,
        Code::DuplicateError,
        Code::CommandNotFound,
        Code::AgentNotPrepared,
        Code::K8sInvokeError,
        Code::DockerInvokeError,
        Code::SandboxInvokeError,
    ];

    pub fn value(self) -> u32 {
        match self {
            Code::Ok => 200,
            Code::DataNotFound => 406,
            Code::DestroyNotSupported => 407,
            Code::ServerError => 500,
            Code::PreHandleError => 502,
            Code::Timeout => 510,
            Code::FileNotFound => 514,
            Code::DatabaseError => 520,
            Code::ParameterEmpty => 600,
            Code::IllegalParameters => 602,
            Code::IllegalCommand => 603,
            Code::ExecCommandError => 604,
            Code::DuplicateError => 605,
            Code::CommandNotFound => 606,
            Code::AgentNotPrepared => 607,
            Code::K8sInvokeError => 800,
            Code::DockerInvokeError => 801,
            Code::SandboxInvokeError => 802,
        }
    }

    pub fn from_value(value: u32) -> Option<Self> {
        Code::ALL.iter().copied().find(|code| code.value() == value)
    }

    pub fn message(self) -> &'static str {
        match self {
            Code::Ok => "success",
            Code::DataNotFound => "data not found",
            Code::DestroyNotSupported => "destroy not supported",
            Code::ServerError => "server error",
            Code::PreHandleError => "pre handle error",
            Code::Timeout => "timeout",
            Code::FileNotFound => "file not found",
            Code::DatabaseError => "database error",
            Code::ParameterEmpty => "parameter is empty",
            Code::IllegalParameters => "illegal parameters",
            Code::IllegalCommand => "illegal command",
            Code::ExecCommandError => "exec command error",
            Code::DuplicateError => "duplicate error",
            Code::CommandNotFound => "command not found",
            Code::AgentNotPrepared => "agent not prepared",
            Code::K8sInvokeError => "invoke k8s server api error",
            Code::DockerInvokeError => "invoke docker command error",
            Code::SandboxInvokeError => "invoke sandbox error",
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub code: u32,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl Response {
    pub fn success(result: impl Into<Value>) -> Self {
        Self {
            code: Code::Ok.value(),
            success: true,
            error: None,
            result: Some(result.into()),
        }
    }

    pub fn success_empty() -> Self {
        Self {
            code: Code::Ok.value(),
            success: true,
            error: None,
            result: None,
        }
    }

    pub fn fail(code: Code, error: impl Into<String>) -> Self {
        Self {
            code: code.value(),
            success: false,
            error: Some(error.into()),
            result: None,
        }
    }

    /// Failure whose message is the code's default text.
    pub fn fail_code(code: Code) -> Self {
        Self::fail(code, code.message())
    }

    pub fn code(&self) -> Option<Code> {
        Code::from_value(self.code)
    }

    pub fn is_code(&self, code: Code) -> bool {
        self.code == code.value()
    }

    /// Result payload rendered as plain text; strings are returned unquoted.
    pub fn result_text(&self) -> String {
        match &self.result {
            Some(Value::String(text)) => text.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        }
    }

    /// The error on failure, the result text on success.
    pub fn message(&self) -> String {
        if self.success {
            self.result_text()
        } else {
            self.error.clone().unwrap_or_else(|| {
                self.code()
                    .map(|code| code.message().to_string())
                    .unwrap_or_default()
            })
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|err| {
            format!(
                r#"{{"code":{},"success":false,"error":"encode response: {}"}}"#,
                Code::ServerError.value(),
                err
            )
        })
    }

    /// Parses an agent reply; bodies that are not an envelope become a failure.
    pub fn from_json(body: &str) -> Self {
        serde_json::from_str(body).unwrap_or_else(|err| {
            Response::fail(
                Code::ServerError,
                format!("unmarshal agent result failed: {}, body: {}", err, body),
            )
        })
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_json())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for code in Code::ALL {
            assert!(seen.insert(code.value()), "duplicate code {}", code.value());
            assert_eq!(Code::from_value(code.value()), Some(code));
        }
    }

    #[test]
    fn failure_omits_result_on_the_wire() {
        let json = Response::fail(Code::DataNotFound, "uid abc not found").to_json();
        assert_eq!(
            json,
            r#"{"code":406,"success":false,"error":"uid abc not found"}"#
        );
    }

    #[test]
    fn agent_envelope_parses() {
        let resp = Response::from_json(r#"{"code":200,"success":true,"result":"ok"}"#);
        assert!(resp.success);
        assert_eq!(resp.message(), "ok");

        let garbage = Response::from_json("<html>");
        assert!(!garbage.success);
        assert!(garbage.is_code(Code::ServerError));
    }
}
