// SPDX-License-Identifier: PMPL-1.0-or-later

//! Agent preparation: attach the jvm sandbox or start the cplus proxy,
//! and revoke either again.
//!
//! Lookup-then-insert is not atomic. Two concurrent prepares for the same
//! process can both insert a record; the later `Running` row wins lookups.

use super::Engine;
use crate::config::AgentConfig;
use crate::error::{FaultError, FaultResult};
use crate::executor::agent::{http_get, jvm_uri};
use crate::store::PreparationRecord;
use crate::transport::{Code, Response};
use crate::types::{AgentKind, ExecRequest, PreparationStatus};
use crate::util::process::{find_pids, ProcessQuery};
use crate::util::{port_in_use, shell_quote, unused_port};
use std::thread;
use tracing::{info, warn};

const CPLUS_PROCESS: &str = "faultline-exec-cplus.jar";
const CONNECTION_REFUSED: &str = "connection refused";

#[derive(Debug, Clone, Default)]
pub struct PrepareArgs {
    /// jvm: substring of the java command line.
    pub process: Option<String>,
    pub pid: Option<String>,
    pub port: Option<u16>,
    /// cplus: address the proxy binds.
    pub ip: Option<String>,
}

impl Engine {
    pub fn prepare(&self, kind: AgentKind, args: &PrepareArgs) -> Response {
        let result = match kind {
            AgentKind::Jvm => self.prepare_jvm(args),
            AgentKind::Cplus => self.prepare_cplus(args),
        };
        result.unwrap_or_else(FaultError::into_response)
    }

    fn prepare_jvm(&self, args: &PrepareArgs) -> FaultResult<Response> {
        let process = args.process.clone().unwrap_or_default();
        let pid = match args.pid.as_deref().filter(|pid| !pid.is_empty()) {
            Some(pid) => pid.to_string(),
            None if process.is_empty() => return Err(FaultError::MissingFlag("process|pid".into())),
            None => self.java_pid(&process)?,
        };

        let record = self.reuse_or_insert(AgentKind::Jvm, &process, &pid, args.port)?;
        let agent = &self.config.agent;
        let attach = self.registry.host().run(
            &ExecRequest::create(),
            &agent.sandbox_script.display().to_string(),
            &format!("-p {} -P {}", pid, record.port),
        );
        let response = if attach.success {
            thread::sleep(agent.attach_wait);
            activate_jvm(agent, &record.port)
        } else {
            attach
        };
        Ok(self.finish_prepare(&record, &pid, response))
    }

    fn prepare_cplus(&self, args: &PrepareArgs) -> FaultResult<Response> {
        let port = args.port.ok_or_else(|| FaultError::MissingFlag("port".into()))?;
        let port_text = port.to_string();
        let record = self.reuse_or_insert(AgentKind::Cplus, &port_text, "", Some(port))?;

        let agent = &self.config.agent;
        let host = self.registry.host();
        let request = ExecRequest::create();
        let query = ProcessQuery::command_line(CPLUS_PROCESS).containing(&port_text);
        let running = find_pids(host.as_ref(), &request, &query).map_err(FaultError::Exec)?;
        let response = if !running.is_empty() {
            Response::fail(Code::DuplicateError, "the server proxy has been started")
        } else if !agent.cplus_jar.is_file() {
            Response::fail(
                Code::FileNotFound,
                format!("the proxy jar {} not found", agent.cplus_jar.display()),
            )
        } else if !agent.cplus_script_dir.is_dir() {
            Response::fail(
                Code::FileNotFound,
                format!("the script dir {} not found", agent.cplus_script_dir.display()),
            )
        } else if port_in_use(port) {
            Response::fail(Code::IllegalParameters, format!("the {} port is in use", port))
        } else {
            let mut command = format!(
                "java -jar {} --server.port={} --script.location={}/",
                shell_quote(&agent.cplus_jar.display().to_string()),
                port,
                shell_quote(&agent.cplus_script_dir.display().to_string())
            );
            if let Some(ip) = args.ip.as_deref().filter(|ip| !ip.is_empty()) {
                command.push_str(&format!(" --server.address={}", ip));
            }
            let log = self.config.log_dir.join("faultline.log");
            let started = host.run(
                &request,
                "nohup",
                &format!("{} >> {} 2>&1 &", command, shell_quote(&log.display().to_string())),
            );
            if started.success {
                thread::sleep(agent.cplus_wait);
                agent_status(&format!("http://{}:{}/status", agent.host, port), agent)
            } else {
                started
            }
        };
        Ok(self.finish_prepare(&record, "", response))
    }

    /// Running record for the process, or a fresh `Created` one with a port.
    fn reuse_or_insert(
        &self,
        kind: AgentKind,
        process: &str,
        pid: &str,
        port: Option<u16>,
    ) -> FaultResult<PreparationRecord> {
        let existing = self
            .store
            .running_preparation(kind.as_str(), process, pid)
            .map_err(FaultError::Database)?;
        if let Some(record) = existing {
            if let Some(port) = port {
                if port.to_string() != record.port {
                    return Err(FaultError::IllegalParameters(format!(
                        "the process has been prepared on port {}, pass --port {} to retry",
                        record.port, record.port
                    )));
                }
            }
            return Ok(record);
        }

        let port = match port {
            Some(port) => port,
            None => unused_port().map_err(|err| FaultError::Server(format!("{:#}", err)))?,
        };
        let uid = self.next_uid()?;
        let record = PreparationRecord::new(&uid, kind.as_str(), process, &port.to_string(), pid);
        self.store
            .insert_preparation(&record)
            .map_err(FaultError::Database)?;
        info!(uid = %uid, kind = kind.as_str(), port, "preparation created");
        Ok(record)
    }

    fn finish_prepare(&self, record: &PreparationRecord, pid: &str, response: Response) -> Response {
        let uid = record.uid.as_str();
        if !response.success {
            if let Err(err) =
                self.store
                    .update_preparation_status(uid, PreparationStatus::Error, &response.message())
            {
                warn!(uid, error = %format!("{:#}", err), "updating preparation failed");
            }
            return response;
        }
        let stored = self
            .store
            .update_preparation_status(uid, PreparationStatus::Running, "")
            .and_then(|()| self.store.update_preparation_agent(uid, &record.port, pid));
        if let Err(err) = stored {
            warn!(uid, error = %format!("{:#}", err), "updating preparation failed");
        }
        info!(uid, port = %record.port, "agent running");
        Response::success(uid.to_string())
    }

    fn java_pid(&self, process: &str) -> FaultResult<String> {
        let host = self.registry.host();
        let query = ProcessQuery::command_line(process).containing("java");
        let pids = find_pids(host.as_ref(), &ExecRequest::create(), &query).map_err(FaultError::Exec)?;
        match pids.as_slice() {
            [] => Err(FaultError::IllegalParameters(format!("{} process not found", process))),
            [pid] => Ok(pid.clone()),
            _ => Err(FaultError::IllegalParameters(format!(
                "too many {} processes: {}, pass --pid",
                process,
                pids.join(",")
            ))),
        }
    }

    pub fn revoke(&self, uid: &str) -> Response {
        self.try_revoke(uid).unwrap_or_else(FaultError::into_response)
    }

    fn try_revoke(&self, uid: &str) -> FaultResult<Response> {
        let record = self
            .store
            .preparation(uid)
            .map_err(FaultError::Database)?
            .ok_or_else(|| FaultError::DataNotFound(format!("the {} preparation not found", uid)))?;
        let status = record.status();
        if status == Some(PreparationStatus::Revoked) {
            return Ok(Response::success("success"));
        }

        let agent = &self.config.agent;
        let response = match AgentKind::parse(&record.program_type) {
            Some(AgentKind::Jvm) => {
                let url = format!(
                    "http://{}:{}/sandbox/{}/module/http/sandbox-control/shutdown",
                    agent.host, record.port, agent.sandbox_namespace
                );
                agent_get(&url, agent)
            }
            Some(AgentKind::Cplus) => revoke_cplus(agent, &record.port),
            None => {
                return Err(FaultError::IllegalParameters(format!(
                    "unsupported preparation type {:?}",
                    record.program_type
                )))
            }
        };

        let refused = response.message().to_ascii_lowercase().contains(CONNECTION_REFUSED);
        if response.success || refused {
            if let Err(err) = self.store.update_preparation_status(uid, PreparationStatus::Revoked, "") {
                warn!(uid, error = %format!("{:#}", err), "updating preparation failed");
            }
            info!(uid, "agent revoked");
            return Ok(Response::success("success"));
        }
        let kept = status.unwrap_or(PreparationStatus::Error);
        let error = format!("revoke failed. {}", response.message());
        if let Err(err) = self.store.update_preparation_status(uid, kept, &error) {
            warn!(uid, error = %format!("{:#}", err), "updating preparation failed");
        }
        Ok(response)
    }
}

/// Activates the chaos module inside a freshly attached sandbox, then checks it.
fn activate_jvm(agent: &AgentConfig, port: &str) -> Response {
    let base = format!("http://{}:{}/sandbox/{}/module/http", agent.host, port, agent.sandbox_namespace);
    let active = agent_get(&format!("{}/sandbox-module-mgr/active?1=1&ids=chaosblade", base), agent);
    if !active.success {
        return active;
    }
    agent_get(
        &format!("http://{}:{}/{}/status", agent.host, port, jvm_uri(&agent.sandbox_namespace)),
        agent,
    )
}

/// `/remove` may drop the connection; the follow-up status decides.
fn revoke_cplus(agent: &AgentConfig, port: &str) -> Response {
    let base = format!("http://{}:{}", agent.host, port);
    if let Err(err) = http_get(&format!("{}/remove", base), agent.http_timeout) {
        warn!(port, error = %err, "cplus remove request failed");
    }
    thread::sleep(agent.cplus_wait.min(std::time::Duration::from_secs(2)));
    let status = agent_status(&format!("{}/status", base), agent);
    if status.success {
        Response::fail(Code::SandboxInvokeError, "the cplus proxy is still running")
    } else {
        Response::success("success")
    }
}

fn agent_get(url: &str, agent: &AgentConfig) -> Response {
    match http_get(url, agent.http_timeout) {
        Ok(body) => Response::success(body),
        Err(err) => Response::fail(Code::SandboxInvokeError, format!("invoke {} failed: {}", url, err)),
    }
}

/// Status endpoints answer with the response envelope.
fn agent_status(url: &str, agent: &AgentConfig) -> Response {
    match http_get(url, agent.http_timeout) {
        Ok(body) => Response::from_json(&body),
        Err(err) => Response::fail(Code::SandboxInvokeError, format!("invoke {} failed: {}", url, err)),
    }
}
