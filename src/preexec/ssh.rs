// SPDX-License-Identifier: PMPL-1.0-or-later

use super::{PreExecutor, PreHook};
use crate::channel::ssh::SshTarget;
use crate::channel::{Channel, SshChannel};
use crate::error::FaultError;
use crate::types::Flags;
use std::path::PathBuf;
use std::sync::Arc;

pub const DEFAULT_INSTALL_PATH: &str = "/opt/faultline/bin";

/// Host targets: local unless `--channel ssh` points at a remote machine.
pub struct OsPreExecutor {
    host: Arc<dyn Channel>,
}

impl OsPreExecutor {
    pub fn new(host: Arc<dyn Channel>) -> Self {
        Self { host }
    }
}

pub fn ssh_target(flags: &Flags) -> Result<SshTarget, FaultError> {
    let get = |name: &str| flags.get(name).map(String::as_str).filter(|v| !v.is_empty());
    let host = get("ssh-host").ok_or_else(|| FaultError::MissingFlag("ssh-host".to_string()))?;
    let port = match get("ssh-port") {
        Some(port) => port
            .parse::<u16>()
            .map_err(|_| FaultError::IllegalParameters(format!("illegal ssh-port {:?}", port)))?,
        None => 22,
    };
    Ok(SshTarget {
        host: host.to_string(),
        port,
        user: get("ssh-user").unwrap_or("root").to_string(),
        key: get("ssh-key").map(PathBuf::from),
        install_path: PathBuf::from(get("install-path").unwrap_or(DEFAULT_INSTALL_PATH)),
    })
}

impl PreExecutor for OsPreExecutor {
    fn name(&self) -> &'static str {
        "os"
    }

    fn pre_exec(&self, _action: &str, _parent_action: &str, flags: &Flags) -> Option<PreHook> {
        if flags.get("channel").map(String::as_str) != Some("ssh") {
            return None;
        }
        let host = self.host.clone();
        let target = ssh_target(flags);
        Some(Box::new(move |request| {
            let channel: Arc<dyn Channel> = Arc::new(SshChannel::new(host, target?));
            Ok((Some(channel), request))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MockChannel;
    use crate::types::ExecRequest;

    fn flags(pairs: &[(&str, &str)]) -> Flags {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn local_without_channel_flag() {
        let pre = OsPreExecutor::new(Arc::new(MockChannel::new()));
        assert!(pre.pre_exec("fullload", "cpu", &Flags::new()).is_none());
    }

    #[test]
    fn ssh_channel_with_defaults() {
        let pre = OsPreExecutor::new(Arc::new(MockChannel::new()));
        let hook = pre
            .pre_exec("fullload", "cpu", &flags(&[("channel", "ssh"), ("ssh-host", "10.0.0.5")]))
            .expect("ssh hook");
        let (channel, _) = hook(ExecRequest::create()).expect("hook should resolve");
        let channel = channel.expect("ssh channel");
        assert_eq!(channel.name(), "ssh");
        assert_eq!(channel.script_path(), PathBuf::from(DEFAULT_INSTALL_PATH));
    }

    #[test]
    fn ssh_needs_host_and_numeric_port() {
        assert!(matches!(
            ssh_target(&flags(&[("channel", "ssh")])),
            Err(FaultError::MissingFlag(_))
        ));
        assert!(matches!(
            ssh_target(&flags(&[("ssh-host", "h"), ("ssh-port", "x")])),
            Err(FaultError::IllegalParameters(_))
        ));
    }
}
