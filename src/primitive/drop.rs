// SPDX-License-Identifier: PMPL-1.0-or-later

//! Packet drop via iptables rules.

use super::{Mode, Primitive, PrimitiveEnv};
use crate::channel::Channel;
use crate::types::ExecRequest;
use crate::util::parse_port_list;
use clap::Parser;
use tracing::{debug, warn};

const PROTOCOLS: [&str; 2] = ["tcp", "udp"];

#[derive(Debug, Parser)]
#[command(name = "chaos_dropnetwork", about = "Drop packets on selected ports with iptables")]
pub struct DropArgs {
    #[arg(long)]
    pub start: bool,
    #[arg(long)]
    pub stop: bool,
    #[arg(long)]
    pub nohup: bool,
    /// Local ports, e.g. 80,8000-8080
    #[arg(long = "local-port")]
    pub local_port: Option<String>,
    /// Remote ports, e.g. 3306
    #[arg(long = "remote-port")]
    pub remote_port: Option<String>,
}

/// `INPUT ... --dport L` for local ports, `OUTPUT ... --dport R` for remote ones.
pub fn drop_rules(local: &[String], remote: &[String]) -> Vec<String> {
    let mut rules = Vec::new();
    for port in local {
        for protocol in PROTOCOLS {
            rules.push(format!("INPUT -p {} --dport {} -j DROP", protocol, port));
        }
    }
    for port in remote {
        for protocol in PROTOCOLS {
            rules.push(format!("OUTPUT -p {} --dport {} -j DROP", protocol, port));
        }
    }
    rules
}

fn iptables(channel: &dyn Channel, request: &ExecRequest, args: &str) -> Result<(), String> {
    debug!(args, "iptables");
    let resp = channel.run(request, "iptables", args);
    if resp.success {
        Ok(())
    } else {
        Err(resp.message())
    }
}

/// Appends every rule; on failure deletes the ones already added.
pub fn start_drop(channel: &dyn Channel, request: &ExecRequest, rules: &[String]) -> Result<String, String> {
    for (idx, rule) in rules.iter().enumerate() {
        if let Err(err) = iptables(channel, request, &format!("-A {}", rule)) {
            for added in rules[..idx].iter().rev() {
                if let Err(rollback) = iptables(channel, request, &format!("-D {}", added)) {
                    warn!(rule = %added, error = %rollback, "rollback left a rule behind");
                }
            }
            return Err(err);
        }
    }
    Ok("success".to_string())
}

/// Deletes every rule, ignoring the ones that are already gone.
pub fn stop_drop(channel: &dyn Channel, request: &ExecRequest, rules: &[String]) -> String {
    for rule in rules {
        if let Err(err) = iptables(channel, request, &format!("-D {}", rule)) {
            debug!(rule = %rule, error = %err, "rule already absent");
        }
    }
    "success".to_string()
}

pub fn run(env: &PrimitiveEnv, args: &DropArgs) -> Result<String, String> {
    let mode = Mode::from_flags(args.start, args.stop, args.nohup)?;
    let expand = |value: &Option<String>| -> Result<Vec<String>, String> {
        match value.as_deref().filter(|v| !v.trim().is_empty()) {
            Some(value) => parse_port_list(value).map_err(|err| format!("{:#}", err)),
            None => Ok(Vec::new()),
        }
    };
    let local = expand(&args.local_port)?;
    let remote = expand(&args.remote_port)?;
    if local.is_empty() && remote.is_empty() {
        return Err("less --local-port or --remote-port flag".to_string());
    }
    let rules = drop_rules(&local, &remote);
    match mode {
        Mode::Start => start_drop(env.channel.as_ref(), &env.request, &rules),
        Mode::Stop => Ok(stop_drop(env.channel.as_ref(), &env.request, &rules)),
        Mode::Nohup => Err(format!("{} has no worker mode", Primitive::DropNetwork.binary())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MockChannel;
    use crate::transport::{Code, Response};

    #[test]
    fn rules_cover_both_protocols() {
        let rules = drop_rules(&["80".into()], &["3306".into()]);
        assert_eq!(
            rules,
            vec![
                "INPUT -p tcp --dport 80 -j DROP",
                "INPUT -p udp --dport 80 -j DROP",
                "OUTPUT -p tcp --dport 3306 -j DROP",
                "OUTPUT -p udp --dport 3306 -j DROP",
            ]
        );
    }

    #[test]
    fn failed_append_rolls_back_added_rules() {
        let channel = MockChannel::new().respond(
            "-A OUTPUT -p tcp",
            Response::fail(Code::ExecCommandError, "iptables: No chain/target/match by that name."),
        );
        let rules = drop_rules(&["80".into()], &["3306".into()]);
        let err = start_drop(&channel, &ExecRequest::create(), &rules).expect_err("should fail");
        assert!(err.contains("No chain"));
        assert_eq!(
            channel.commands(),
            vec![
                "iptables -A INPUT -p tcp --dport 80 -j DROP",
                "iptables -A INPUT -p udp --dport 80 -j DROP",
                "iptables -A OUTPUT -p tcp --dport 3306 -j DROP",
                "iptables -D INPUT -p udp --dport 80 -j DROP",
                "iptables -D INPUT -p tcp --dport 80 -j DROP",
            ]
        );
    }

    #[test]
    fn rollback_carries_on_past_a_failed_delete() {
        let channel = MockChannel::new()
            .respond(
                "-A OUTPUT -p udp",
                Response::fail(Code::ExecCommandError, "iptables: Resource temporarily unavailable."),
            )
            .respond(
                "-D OUTPUT -p tcp",
                Response::fail(Code::ExecCommandError, "iptables: Bad rule"),
            );
        let rules = drop_rules(&["80".into()], &["3306".into()]);
        let err = start_drop(&channel, &ExecRequest::create(), &rules).expect_err("should fail");
        assert!(err.contains("temporarily unavailable"), "first error is reported: {}", err);
        let commands = channel.commands();
        assert_eq!(
            &commands[4..],
            &[
                "iptables -D OUTPUT -p tcp --dport 3306 -j DROP",
                "iptables -D INPUT -p udp --dport 80 -j DROP",
                "iptables -D INPUT -p tcp --dport 80 -j DROP",
            ]
        );
    }
}
