// SPDX-License-Identifier: PMPL-1.0-or-later

//! Host facts that experiments take as flag values.

use super::Engine;
use crate::error::FaultError;
use crate::transport::Response;
use crate::types::ExecRequest;
use serde_json::json;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryTopic {
    /// Interfaces that are up, for `--interface`.
    NetworkInterface,
    /// Mount points of block-backed filesystems, for `--directory`.
    DiskMountPoint,
}

impl QueryTopic {
    pub fn parse(target: &str, arg: &str) -> Option<Self> {
        match (target, arg) {
            ("network" | "net", "interface") => Some(Self::NetworkInterface),
            ("disk", "mount-point") => Some(Self::DiskMountPoint),
            _ => None,
        }
    }
}

/// Names from `ip -o link show up`, without the `@peer` suffix.
pub fn up_interfaces(listing: &str) -> Vec<String> {
    listing
        .lines()
        .filter_map(|line| line.split(':').nth(1))
        .map(|name| name.trim().split('@').next().unwrap_or_default().to_string())
        .filter(|name| !name.is_empty())
        .collect()
}

/// Last column of `df -P` rows whose filesystem is a device path.
pub fn mount_points(df: &str) -> Vec<String> {
    df.lines()
        .skip(1)
        .filter(|line| line.starts_with('/'))
        .filter_map(|line| line.split_whitespace().last())
        .map(str::to_string)
        .collect()
}

impl Engine {
    pub fn query(&self, target: &str, arg: &str) -> Response {
        let Some(topic) = QueryTopic::parse(target, arg) else {
            return FaultError::IllegalCommand(format!("the {} {} argument not found", target, arg))
                .into_response();
        };
        let (program, args, extract): (&str, &str, fn(&str) -> Vec<String>) = match topic {
            QueryTopic::NetworkInterface => ("ip", "-o link show up", up_interfaces),
            QueryTopic::DiskMountPoint => ("df", "-P", mount_points),
        };
        let resp = self.registry.host().run(&ExecRequest::create(), program, args);
        if !resp.success {
            return resp;
        }
        Response::success(json!(extract(&resp.result_text())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MockChannel;
    use crate::config::Config;
    use crate::executor::Registry;
    use crate::store::Store;
    use crate::transport::Code;
    use std::sync::Arc;
    use tempfile::TempDir;

    const LINKS: &str = "\
1: lo: <LOOPBACK,UP,LOWER_UP> mtu 65536 qdisc noqueue state UNKNOWN mode DEFAULT
2: eth0@if7: <BROADCAST,MULTICAST,UP,LOWER_UP> mtu 1500 qdisc noqueue state UP mode DEFAULT
";

    const DF: &str = "\
Filesystem     1024-blocks     Used Available Capacity Mounted on
overlay           61202244 30124572  27935688      52% /
tmpfs                65536        0     65536       0% /dev
/dev/vda1         61202244 30124572  27935688      52% /etc/hosts
/dev/vdb1        102687672  4096000  93332408       5% /data
";

    fn engine(dir: &TempDir, channel: Arc<MockChannel>) -> Engine {
        let config = Config::for_home(dir.path());
        let store = Store::open(&config.db_path).expect("store should open");
        let registry = Registry::with_host(&config, &store, channel);
        Engine::new(config, store, registry)
    }

    #[test]
    fn interfaces_drop_peer_suffix() {
        assert_eq!(up_interfaces(LINKS), vec!["lo", "eth0"]);
    }

    #[test]
    fn mount_points_skip_virtual_filesystems() {
        assert_eq!(mount_points(DF), vec!["/etc/hosts", "/data"]);
    }

    #[test]
    fn query_runs_on_the_host() {
        let dir = TempDir::new().expect("tempdir should be created");
        let channel = Arc::new(MockChannel::new().respond("ip -o link", Response::success(LINKS)));
        let resp = engine(&dir, channel.clone()).query("net", "interface");
        assert!(resp.success, "{}", resp);
        assert_eq!(resp.result, Some(json!(["lo", "eth0"])));
        assert_eq!(channel.commands(), vec!["ip -o link show up"]);
    }

    #[test]
    fn unknown_topic_is_an_illegal_command() {
        let dir = TempDir::new().expect("tempdir should be created");
        let resp = engine(&dir, Arc::new(MockChannel::new())).query("disk", "inode");
        assert!(resp.is_code(Code::IllegalCommand));
    }
}
