// SPDX-License-Identifier: PMPL-1.0-or-later

//! Traffic shaping and packet drop against stateful fakes of `tc` and
//! `iptables`, checking that failed starts leave nothing behind.

use faultline::channel::{command_line, Channel};
use faultline::primitive::drop::{drop_rules, start_drop, stop_drop};
use faultline::primitive::network::{NetemRule, PortFilter, TrafficShaper};
use faultline::transport::{Code, Response};
use faultline::types::ExecRequest;
use std::path::PathBuf;
use std::sync::Mutex;

/// Tracks qdiscs and filters per command; fails the n-th filter add.
#[derive(Default)]
struct FakeTc {
    qdiscs: Mutex<Vec<String>>,
    filters: Mutex<usize>,
    fail_filter_at: Option<usize>,
    log: Mutex<Vec<String>>,
}

impl FakeTc {
    fn failing_filter(at: usize) -> Self {
        Self {
            fail_filter_at: Some(at),
            ..Self::default()
        }
    }

    fn qdiscs(&self) -> Vec<String> {
        self.qdiscs.lock().expect("qdisc lock").clone()
    }

    fn filters(&self) -> usize {
        *self.filters.lock().expect("filter lock")
    }

    fn log(&self) -> Vec<String> {
        self.log.lock().expect("log lock").clone()
    }
}

impl Channel for FakeTc {
    fn name(&self) -> &'static str {
        "fake-tc"
    }

    fn run(&self, _request: &ExecRequest, program: &str, args: &str) -> Response {
        self.log.lock().expect("log lock").push(command_line(program, args));
        if program != "tc" {
            return Response::fail(Code::ExecCommandError, format!("{} not faked", program));
        }
        let mut qdiscs = self.qdiscs.lock().expect("qdisc lock");
        let mut filters = self.filters.lock().expect("filter lock");
        if args.starts_with("qdisc add") {
            qdiscs.push(args.to_string());
        } else if args.starts_with("qdisc del") {
            if qdiscs.is_empty() {
                return Response::fail(Code::ExecCommandError, "RTNETLINK answers: No such file or directory");
            }
            qdiscs.clear();
            *filters = 0;
        } else if args.starts_with("filter add") {
            if Some(*filters) == self.fail_filter_at {
                return Response::fail(Code::ExecCommandError, "RTNETLINK answers: Invalid argument");
            }
            *filters += 1;
        } else if args.starts_with("filter del") {
            if *filters == 0 {
                return Response::fail(Code::ExecCommandError, "Cannot find specified filter chain");
            }
            *filters = 0;
        }
        Response::success("")
    }

    fn script_path(&self) -> PathBuf {
        PathBuf::from("/opt/faultline/bin")
    }
}

fn delay() -> NetemRule {
    NetemRule::Delay {
        time_ms: 3000,
        offset_ms: 10,
    }
}

#[test]
fn whole_interface_delay_is_one_root_qdisc() {
    let tc = FakeTc::default();
    let request = ExecRequest::create();
    let shaper = TrafficShaper::new(&tc, &request, "eth0");
    shaper
        .start(&delay(), &PortFilter::default())
        .expect("start should succeed");
    assert_eq!(tc.qdiscs(), vec!["qdisc add dev eth0 root netem delay 3000ms 10ms"]);

    shaper.stop();
    assert!(tc.qdiscs().is_empty());
}

#[test]
fn port_filters_hang_netem_off_band_four() {
    let tc = FakeTc::default();
    let request = ExecRequest::create();
    let filter = PortFilter::parse(Some("80,8080-8081"), Some("3306"), None).expect("filter");
    TrafficShaper::new(&tc, &request, "eth0")
        .start(&NetemRule::Loss { percent: 30 }, &filter)
        .expect("start should succeed");

    assert_eq!(
        tc.qdiscs(),
        vec![
            "qdisc add dev eth0 root handle 1: prio bands 4",
            "qdisc add dev eth0 parent 1:4 handle 40: netem loss 30%",
        ]
    );
    assert_eq!(tc.filters(), 4);
    let log = tc.log();
    assert!(log.iter().any(|c| c.contains("cmp(u16 at 0 layer transport eq 8081)")));
    assert!(log.iter().any(|c| c.contains("cmp(u16 at 2 layer transport eq 3306)")));
}

#[test]
fn exclude_ports_cover_every_gap() {
    let tc = FakeTc::default();
    let request = ExecRequest::create();
    let filter = PortFilter::parse(None, None, Some("22,80")).expect("filter");
    TrafficShaper::new(&tc, &request, "eth0")
        .start(&delay(), &filter)
        .expect("start should succeed");

    assert_eq!(tc.qdiscs().len(), 5, "prio root, three pfifo bands, netem");
    assert_eq!(tc.filters(), 3);
    let log = tc.log();
    assert!(log.iter().any(|c| c.contains("gt 0) and cmp(u16 at 0 layer transport lt 22)")));
    assert!(log.iter().any(|c| c.contains("gt 22) and cmp(u16 at 0 layer transport lt 80)")));
    assert!(log.iter().any(|c| c.contains("gt 80) and cmp(u16 at 0 layer transport lt 65535)")));
}

#[test]
fn local_ports_win_over_exclude_ports() {
    let tc = FakeTc::default();
    let request = ExecRequest::create();
    let filter = PortFilter::parse(Some("8080"), None, Some("22")).expect("filter");
    TrafficShaper::new(&tc, &request, "eth0")
        .start(&NetemRule::Loss { percent: 30 }, &filter)
        .expect("start should succeed");

    assert_eq!(tc.qdiscs().len(), 2, "no pfifo bands without an exclude tree");
    assert_eq!(tc.filters(), 1);
    let log = tc.log();
    assert!(log.iter().any(|c| c.contains("cmp(u16 at 0 layer transport eq 8080)")));
    assert!(!log.iter().any(|c| c.contains("lt 22")));
}

#[test]
fn destination_only_steers_one_address() {
    let tc = FakeTc::default();
    let request = ExecRequest::create();
    let filter = PortFilter::default()
        .with_destination(Some("10.0.0.8"))
        .expect("filter");
    TrafficShaper::new(&tc, &request, "eth0")
        .start(&delay(), &filter)
        .expect("start should succeed");

    assert_eq!(
        tc.qdiscs(),
        vec![
            "qdisc add dev eth0 root handle 1: prio bands 4",
            "qdisc add dev eth0 parent 1:4 handle 40: netem delay 3000ms 10ms",
        ]
    );
    assert_eq!(tc.filters(), 1);
    assert_eq!(
        tc.log().last().map(String::as_str),
        Some(
            "tc filter add dev eth0 parent 1: prio 4 protocol ip basic match \
             \"u32(u32 0x0a000008 0xffffffff at 16)\" flowid 1:4"
        )
    );
}

#[test]
fn destination_narrows_port_and_exclude_filters() {
    let tc = FakeTc::default();
    let request = ExecRequest::create();
    let filter = PortFilter::parse(None, Some("3306"), None)
        .and_then(|filter| filter.with_destination(Some("10.1.0.0/16")))
        .expect("filter");
    TrafficShaper::new(&tc, &request, "eth0")
        .start(&delay(), &filter)
        .expect("start should succeed");
    assert_eq!(tc.filters(), 1);
    assert!(tc.log().iter().any(|c| c.contains(
        "\"cmp(u16 at 2 layer transport eq 3306) and u32(u32 0x0a010000 0xffff0000 at 16)\""
    )));

    let tc = FakeTc::default();
    let filter = PortFilter::parse(None, None, Some("22"))
        .and_then(|filter| filter.with_destination(Some("10.1.0.0/16")))
        .expect("filter");
    TrafficShaper::new(&tc, &request, "eth0")
        .start(&delay(), &filter)
        .expect("start should succeed");
    assert_eq!(tc.filters(), 2);
    let narrowed = tc
        .log()
        .iter()
        .filter(|c| c.contains("filter add") && c.contains("and u32(u32 0x0a010000 0xffff0000 at 16)"))
        .count();
    assert_eq!(narrowed, 2);
}

#[test]
fn bad_destination_is_rejected() {
    let err = PortFilter::default()
        .with_destination(Some("10.0.0.0/40"))
        .expect_err("prefix out of range");
    assert!(err.contains("--destination-ip"));
}

#[test]
fn failed_filter_rolls_everything_back() {
    let tc = FakeTc::failing_filter(1);
    let request = ExecRequest::create();
    let filter = PortFilter::parse(Some("80,81,82"), None, None).expect("filter");
    let err = TrafficShaper::new(&tc, &request, "eth0")
        .start(&delay(), &filter)
        .expect_err("second filter add should fail");

    assert_eq!(err, "RTNETLINK answers: Invalid argument");
    assert!(tc.qdiscs().is_empty(), "qdisc tree left behind: {:?}", tc.qdiscs());
    assert_eq!(tc.filters(), 0);
    let log = tc.log();
    assert_eq!(log[log.len() - 2], "tc filter del dev eth0 parent 1: prio 4 basic");
    assert_eq!(log[log.len() - 1], "tc qdisc del dev eth0 root");
}

#[test]
fn stop_on_clean_interface_is_quiet() {
    let tc = FakeTc::default();
    let request = ExecRequest::destroy("u1");
    assert_eq!(TrafficShaper::new(&tc, &request, "eth0").stop(), "success");
}

/// Keeps the rule set; rejects the n-th append.
struct FakeIptables {
    rules: Mutex<Vec<String>>,
    fail_at: usize,
}

impl Channel for FakeIptables {
    fn name(&self) -> &'static str {
        "fake-iptables"
    }

    fn run(&self, _request: &ExecRequest, _program: &str, args: &str) -> Response {
        let mut rules = self.rules.lock().expect("rules lock");
        if let Some(rule) = args.strip_prefix("-A ") {
            if rules.len() == self.fail_at {
                return Response::fail(Code::ExecCommandError, "iptables: Resource temporarily unavailable.");
            }
            rules.push(rule.to_string());
        } else if let Some(rule) = args.strip_prefix("-D ") {
            match rules.iter().position(|existing| existing == rule) {
                Some(idx) => {
                    rules.remove(idx);
                }
                None => return Response::fail(Code::ExecCommandError, "iptables: Bad rule"),
            }
        }
        Response::success("")
    }

    fn script_path(&self) -> PathBuf {
        PathBuf::from("/opt/faultline/bin")
    }
}

#[test]
fn drop_rolls_back_added_rules() {
    let iptables = FakeIptables {
        rules: Mutex::new(Vec::new()),
        fail_at: 3,
    };
    let request = ExecRequest::create();
    let rules = drop_rules(&["80".to_string()], &["3306".to_string()]);
    assert_eq!(rules.len(), 4);

    let err = start_drop(&iptables, &request, &rules).expect_err("fourth rule should fail");
    assert!(err.contains("temporarily unavailable"));
    assert!(iptables.rules.lock().expect("rules lock").is_empty());
}

#[test]
fn drop_stop_ignores_missing_rules() {
    let iptables = FakeIptables {
        rules: Mutex::new(Vec::new()),
        fail_at: usize::MAX,
    };
    let request = ExecRequest::create();
    let rules = drop_rules(&["80".to_string()], &[]);
    start_drop(&iptables, &request, &rules).expect("start should succeed");
    assert_eq!(iptables.rules.lock().expect("rules lock").len(), 2);

    assert_eq!(stop_drop(&iptables, &request, &rules), "success");
    assert_eq!(stop_drop(&iptables, &request, &rules), "success");
    assert!(iptables.rules.lock().expect("rules lock").is_empty());
}
