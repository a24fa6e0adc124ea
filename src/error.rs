// SPDX-License-Identifier: PMPL-1.0-or-later

//! Typed failures that map onto a response [`Code`].

use crate::transport::{Code, Response};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FaultError {
    #[error("{0}")]
    IllegalParameters(String),
    #[error("less {0} flag")]
    MissingFlag(String),
    #[error("{0}")]
    IllegalCommand(String),
    #[error("{0}")]
    DataNotFound(String),
    #[error("{0}")]
    Duplicate(String),
    #[error("{0}")]
    FileNotFound(String),
    #[error("{0}")]
    PreHandle(String),
    #[error("{0}")]
    AgentNotPrepared(String),
    #[error("{0}")]
    Docker(String),
    #[error("{0}")]
    Kubernetes(String),
    #[error("{0}")]
    Sandbox(String),
    #[error("{0}")]
    Exec(String),
    #[error("{0}")]
    Timeout(String),
    #[error("database error: {0:#}")]
    Database(anyhow::Error),
    #[error("{0}")]
    Server(String),
}

impl FaultError {
    pub fn code(&self) -> Code {
        match self {
            FaultError::IllegalParameters(_) => Code::IllegalParameters,
            FaultError::MissingFlag(_) => Code::IllegalParameters,
            FaultError::IllegalCommand(_) => Code::IllegalCommand,
            FaultError::DataNotFound(_) => Code::DataNotFound,
            FaultError::Duplicate(_) => Code::DuplicateError,
            FaultError::FileNotFound(_) => Code::FileNotFound,
            FaultError::PreHandle(_) => Code::PreHandleError,
            FaultError::AgentNotPrepared(_) => Code::AgentNotPrepared,
            FaultError::Docker(_) => Code::DockerInvokeError,
            FaultError::Kubernetes(_) => Code::K8sInvokeError,
            FaultError::Sandbox(_) => Code::SandboxInvokeError,
            FaultError::Exec(_) => Code::ExecCommandError,
            FaultError::Timeout(_) => Code::Timeout,
            FaultError::Database(_) => Code::DatabaseError,
            FaultError::Server(_) => Code::ServerError,
        }
    }

    pub fn into_response(self) -> Response {
        let code = self.code();
        Response::fail(code, self.to_string())
    }
}

impl From<FaultError> for Response {
    fn from(err: FaultError) -> Self {
        err.into_response()
    }
}

pub type FaultResult<T> = std::result::Result<T, FaultError>;
