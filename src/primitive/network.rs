// SPDX-License-Identifier: PMPL-1.0-or-later

//! Network delay and loss through `tc` queuing disciplines.
//!
//! Without a filter the netem qdisc sits at the root. With one, a four-band
//! prio qdisc goes at the root, netem hangs off band 4, and `basic` filters
//! steer the selected traffic into band 4. Local and remote ports win over
//! exclude ports; a destination address narrows whichever port selection is
//! in effect. Any failure while building this tears the whole tree down again
//! before reporting.

use super::{Mode, Primitive, PrimitiveEnv};
use crate::channel::Channel;
use crate::types::ExecRequest;
use crate::util::parse_port_list;
use clap::Parser;
use std::net::Ipv4Addr;
use tracing::{debug, warn};

const DEFAULT_OFFSET_MS: u32 = 10;
const MAX_PORT: u32 = 65535;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetemRule {
    Delay { time_ms: u32, offset_ms: u32 },
    Loss { percent: u32 },
}

impl NetemRule {
    pub fn spec(&self) -> String {
        match self {
            NetemRule::Delay { time_ms, offset_ms } => {
                format!("netem delay {}ms {}ms", time_ms, offset_ms)
            }
            NetemRule::Loss { percent } => format!("netem loss {}%", percent),
        }
    }
}

/// IPv4 address or CIDR block, e.g. `10.0.0.8` or `10.0.0.0/24`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Destination {
    pub network: u32,
    pub mask: u32,
}

impl Destination {
    pub fn parse(value: &str) -> Result<Self, String> {
        let value = value.trim();
        let (addr, prefix) = match value.split_once('/') {
            Some((addr, prefix)) => {
                let prefix: u32 = prefix
                    .parse()
                    .ok()
                    .filter(|prefix| *prefix <= 32)
                    .ok_or_else(|| format!("--destination-ip: illegal prefix in {:?}", value))?;
                (addr, prefix)
            }
            None => (value, 32),
        };
        let addr: Ipv4Addr = addr
            .parse()
            .map_err(|_| format!("--destination-ip: illegal address {:?}", value))?;
        let mask = u32::MAX.checked_shl(32 - prefix).unwrap_or(0);
        Ok(Self {
            network: u32::from(addr) & mask,
            mask,
        })
    }

    /// ematch on the IPv4 destination field, 16 bytes into the header.
    pub fn ematch(&self) -> String {
        format!("u32(u32 0x{:08x} 0x{:08x} at 16)", self.network, self.mask)
    }
}

/// Which traffic the fault applies to. Empty means everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortFilter {
    pub local_ports: Vec<String>,
    pub remote_ports: Vec<String>,
    pub exclude_ports: Vec<String>,
    pub destination: Option<Destination>,
}

impl PortFilter {
    pub fn parse(
        local: Option<&str>,
        remote: Option<&str>,
        exclude: Option<&str>,
    ) -> Result<Self, String> {
        let expand = |value: Option<&str>, name: &str| -> Result<Vec<String>, String> {
            match value.filter(|v| !v.trim().is_empty()) {
                Some(value) => parse_port_list(value).map_err(|err| format!("--{}: {:#}", name, err)),
                None => Ok(Vec::new()),
            }
        };
        Ok(Self {
            local_ports: expand(local, "local-port")?,
            remote_ports: expand(remote, "remote-port")?,
            exclude_ports: expand(exclude, "exclude-port")?,
            destination: None,
        })
    }

    /// Restricts the filter to traffic towards `value`; blank means any.
    pub fn with_destination(mut self, value: Option<&str>) -> Result<Self, String> {
        self.destination = match value.filter(|v| !v.trim().is_empty()) {
            Some(value) => Some(Destination::parse(value)?),
            None => None,
        };
        Ok(self)
    }

    pub fn is_empty(&self) -> bool {
        self.local_ports.is_empty()
            && self.remote_ports.is_empty()
            && self.exclude_ports.is_empty()
            && self.destination.is_none()
    }

    fn has_ports(&self) -> bool {
        !self.local_ports.is_empty() || !self.remote_ports.is_empty()
    }
}

/// Open `(low, high)` port ranges covering everything except `excluded`.
pub fn complement_ranges(excluded: &[String]) -> Result<Vec<(u32, u32)>, String> {
    let mut ports = Vec::with_capacity(excluded.len());
    for port in excluded {
        let port: u32 = port
            .parse()
            .map_err(|_| format!("illegal exclude port {:?}", port))?;
        if port > MAX_PORT {
            return Err(format!("exclude port {} is out of range", port));
        }
        ports.push(port);
    }
    ports.sort_unstable();
    ports.dedup();

    let mut ranges = Vec::new();
    let mut low = 0;
    for port in ports.into_iter().chain(std::iter::once(MAX_PORT)) {
        if port > low + 1 {
            ranges.push((low, port));
        }
        low = port;
    }
    Ok(ranges)
}

/// Builds and tears down the qdisc tree on one interface.
pub struct TrafficShaper<'a> {
    channel: &'a dyn Channel,
    request: &'a ExecRequest,
    interface: &'a str,
}

impl<'a> TrafficShaper<'a> {
    pub fn new(channel: &'a dyn Channel, request: &'a ExecRequest, interface: &'a str) -> Self {
        Self {
            channel,
            request,
            interface,
        }
    }

    fn tc(&self, args: &str) -> Result<String, String> {
        debug!(interface = self.interface, args, "tc");
        let resp = self.channel.run(self.request, "tc", args);
        if resp.success {
            Ok(resp.result_text())
        } else {
            Err(resp.message())
        }
    }

    /// Installs the rule; on failure nothing is left behind.
    pub fn start(&self, rule: &NetemRule, filter: &PortFilter) -> Result<String, String> {
        match self.apply(rule, filter) {
            Ok(()) => Ok("success".to_string()),
            Err(err) => {
                self.stop();
                Err(err)
            }
        }
    }

    fn apply(&self, rule: &NetemRule, filter: &PortFilter) -> Result<(), String> {
        let dev = self.interface;
        if filter.is_empty() {
            self.tc(&format!("qdisc add dev {} root {}", dev, rule.spec()))?;
            return Ok(());
        }

        self.tc(&format!("qdisc add dev {} root handle 1: prio bands 4", dev))?;
        let destination = filter.destination.map(|destination| destination.ematch());
        if !filter.has_ports() && !filter.exclude_ports.is_empty() {
            for band in 1..=3 {
                self.tc(&format!(
                    "qdisc add dev {} parent 1:{} handle {}0: pfifo",
                    dev, band, band
                ))?;
            }
            self.tc(&format!("qdisc add dev {} parent 1:4 handle 40: {}", dev, rule.spec()))?;
            for (low, high) in complement_ranges(&filter.exclude_ports)? {
                self.add_filter(
                    &format!(
                        "cmp(u16 at 0 layer transport gt {}) and cmp(u16 at 0 layer transport lt {})",
                        low, high
                    ),
                    destination.as_deref(),
                )?;
            }
            return Ok(());
        }
        if filter.has_ports() && !filter.exclude_ports.is_empty() {
            warn!("local or remote ports given, ignoring exclude ports");
        }

        self.tc(&format!("qdisc add dev {} parent 1:4 handle 40: {}", dev, rule.spec()))?;
        for port in &filter.local_ports {
            self.add_filter(
                &format!("cmp(u16 at 0 layer transport eq {})", port),
                destination.as_deref(),
            )?;
        }
        for port in &filter.remote_ports {
            self.add_filter(
                &format!("cmp(u16 at 2 layer transport eq {})", port),
                destination.as_deref(),
            )?;
        }
        if !filter.has_ports() {
            if let Some(destination) = destination.as_deref() {
                self.add_filter(destination, None)?;
            }
        }
        Ok(())
    }

    /// Steers packets matching `ematch` (and `destination`, if any) into band 4.
    fn add_filter(&self, ematch: &str, destination: Option<&str>) -> Result<(), String> {
        let ematch = match destination {
            Some(destination) => format!("{} and {}", ematch, destination),
            None => ematch.to_string(),
        };
        self.tc(&format!(
            "filter add dev {} parent 1: prio 4 protocol ip basic match \"{}\" flowid 1:4",
            self.interface, ematch
        ))
        .map(|_| ())
    }

    /// Best-effort removal of the filter and the root qdisc.
    pub fn stop(&self) -> String {
        let dev = self.interface;
        if let Err(err) = self.tc(&format!("filter del dev {} parent 1: prio 4 basic", dev)) {
            debug!(interface = dev, error = %err, "no filter to delete");
        }
        if let Err(err) = self.tc(&format!("qdisc del dev {} root", dev)) {
            debug!(interface = dev, error = %err, "no root qdisc to delete");
        }
        "success".to_string()
    }
}

#[derive(Debug, Parser)]
#[command(name = "chaos_delaynetwork", about = "Delay network traffic with tc netem")]
pub struct DelayArgs {
    #[arg(long)]
    pub start: bool,
    #[arg(long)]
    pub stop: bool,
    #[arg(long)]
    pub nohup: bool,
    /// Network interface, e.g. eth0
    #[arg(long)]
    pub interface: Option<String>,
    /// Delay in milliseconds
    #[arg(long)]
    pub time: Option<u32>,
    /// Delay jitter in milliseconds
    #[arg(long)]
    pub offset: Option<u32>,
    #[arg(long = "local-port")]
    pub local_port: Option<String>,
    #[arg(long = "remote-port")]
    pub remote_port: Option<String>,
    #[arg(long = "exclude-port")]
    pub exclude_port: Option<String>,
    /// Only traffic towards this address or CIDR block
    #[arg(long = "destination-ip")]
    pub destination_ip: Option<String>,
}

#[derive(Debug, Parser)]
#[command(name = "chaos_lossnetwork", about = "Drop a percentage of packets with tc netem")]
pub struct LossArgs {
    #[arg(long)]
    pub start: bool,
    #[arg(long)]
    pub stop: bool,
    #[arg(long)]
    pub nohup: bool,
    #[arg(long)]
    pub interface: Option<String>,
    /// Loss percentage, 1-100
    #[arg(long)]
    pub percent: Option<u32>,
    #[arg(long = "local-port")]
    pub local_port: Option<String>,
    #[arg(long = "remote-port")]
    pub remote_port: Option<String>,
    #[arg(long = "exclude-port")]
    pub exclude_port: Option<String>,
    /// Only traffic towards this address or CIDR block
    #[arg(long = "destination-ip")]
    pub destination_ip: Option<String>,
}

fn required_interface(interface: &Option<String>) -> Result<&str, String> {
    interface
        .as_deref()
        .filter(|value| !value.is_empty())
        .ok_or_else(|| "less interface parameter".to_string())
}

pub fn run_delay(env: &PrimitiveEnv, args: &DelayArgs) -> Result<String, String> {
    let mode = Mode::from_flags(args.start, args.stop, args.nohup)?;
    let interface = required_interface(&args.interface)?;
    let shaper = TrafficShaper::new(env.channel.as_ref(), &env.request, interface);
    match mode {
        Mode::Start => {
            let time_ms = args.time.ok_or("less time parameter")?;
            let rule = NetemRule::Delay {
                time_ms,
                offset_ms: args.offset.unwrap_or(DEFAULT_OFFSET_MS),
            };
            let filter = PortFilter::parse(
                args.local_port.as_deref(),
                args.remote_port.as_deref(),
                args.exclude_port.as_deref(),
            )?
            .with_destination(args.destination_ip.as_deref())?;
            shaper.start(&rule, &filter)
        }
        Mode::Stop => Ok(shaper.stop()),
        Mode::Nohup => Err(format!("{} has no worker mode", Primitive::DelayNetwork.binary())),
    }
}

pub fn run_loss(env: &PrimitiveEnv, args: &LossArgs) -> Result<String, String> {
    let mode = Mode::from_flags(args.start, args.stop, args.nohup)?;
    let interface = required_interface(&args.interface)?;
    let shaper = TrafficShaper::new(env.channel.as_ref(), &env.request, interface);
    match mode {
        Mode::Start => {
            let percent = args
                .percent
                .filter(|percent| (1..=100).contains(percent))
                .ok_or("--percent must be an integer between 1 and 100")?;
            let filter = PortFilter::parse(
                args.local_port.as_deref(),
                args.remote_port.as_deref(),
                args.exclude_port.as_deref(),
            )?
            .with_destination(args.destination_ip.as_deref())?;
            // Clear leftovers from an earlier run before layering a new tree.
            shaper.stop();
            shaper.start(&NetemRule::Loss { percent }, &filter)
        }
        Mode::Stop => Ok(shaper.stop()),
        Mode::Nohup => Err(format!("{} has no worker mode", Primitive::LossNetwork.binary())),
    }
}
