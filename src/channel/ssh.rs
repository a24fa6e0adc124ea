// SPDX-License-Identifier: PMPL-1.0-or-later

//! Remote execution over the system `ssh` client.

use super::{command_line, Channel};
use crate::transport::Response;
use crate::types::ExecRequest;
use crate::util::shell_quote;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub key: Option<PathBuf>,
    /// Where the chaos_* binaries live on the remote host.
    pub install_path: PathBuf,
}

pub struct SshChannel {
    host: Arc<dyn Channel>,
    target: SshTarget,
}

impl SshChannel {
    pub fn new(host: Arc<dyn Channel>, target: SshTarget) -> Self {
        Self { host, target }
    }

    fn ssh_args(&self, script: &str) -> String {
        let mut args = format!(
            "-o StrictHostKeyChecking=no -o BatchMode=yes -p {}",
            self.target.port
        );
        if let Some(key) = &self.target.key {
            args.push_str(&format!(" -i {}", key.display()));
        }
        args.push_str(&format!(
            " {}@{} {}",
            self.target.user,
            self.target.host,
            shell_quote(script)
        ));
        args
    }
}

impl Channel for SshChannel {
    fn name(&self) -> &'static str {
        "ssh"
    }

    fn run(&self, request: &ExecRequest, program: &str, args: &str) -> Response {
        let script = command_line(program, args);
        self.host.run(request, "ssh", &self.ssh_args(&script))
    }

    fn script_path(&self) -> PathBuf {
        self.target.install_path.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MockChannel;

    #[test]
    fn wraps_command_for_remote_shell() {
        let host = Arc::new(MockChannel::new());
        let channel = SshChannel::new(
            host.clone(),
            SshTarget {
                host: "10.0.0.7".into(),
                port: 2222,
                user: "ops".into(),
                key: Some(PathBuf::from("/home/ops/.ssh/id_ed25519")),
                install_path: PathBuf::from("/opt/faultline/bin"),
            },
        );
        let resp = channel.run(&ExecRequest::create(), "/opt/faultline/bin/chaos_burncpu", "--stop");
        assert!(resp.success);
        assert_eq!(
            host.commands(),
            vec![
                "ssh -o StrictHostKeyChecking=no -o BatchMode=yes -p 2222 -i /home/ops/.ssh/id_ed25519 ops@10.0.0.7 '/opt/faultline/bin/chaos_burncpu --stop'"
            ]
        );
        assert_eq!(channel.script_path(), PathBuf::from("/opt/faultline/bin"));
    }
}
