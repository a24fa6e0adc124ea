// SPDX-License-Identifier: PMPL-1.0-or-later

//! Kubernetes resource polling through the lifecycle engine.

use faultline::channel::MockChannel;
use faultline::config::Config;
use faultline::executor::Registry;
use faultline::lifecycle::Engine;
use faultline::store::Store;
use faultline::transport::{Code, Response};
use faultline::types::{ExperimentStatus, Flags};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn config(dir: &TempDir) -> Config {
    let mut config = Config::for_home(dir.path());
    config.kubernetes.poll_interval = Duration::from_millis(10);
    config.kubernetes.waiting_time = Duration::from_millis(300);
    config
}

fn engine(config: &Config, channel: Arc<MockChannel>) -> Engine {
    let store = Store::open(&config.db_path).expect("store should open");
    let registry = Registry::with_host(config, &store, channel);
    Engine::new(config.clone(), store, registry)
}

fn phase(phase: &str) -> Response {
    Response::success(format!(r#"{{"status":{{"phase":"{}","expStatuses":[]}}}}"#, phase))
}

fn pod_delay() -> Flags {
    [("namespace", "shop"), ("labels", "app=web"), ("interface", "eth0"), ("time", "3000")]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[test]
fn create_waits_for_running_then_destroy_waits_for_removal() {
    let dir = TempDir::new().expect("tempdir should be created");
    let config = config(&dir);

    let create_channel = Arc::new(
        MockChannel::new()
            .respond_times("get chaosblade", phase("Initialized"), 2)
            .respond("get chaosblade", phase("Running")),
    );
    let resp = engine(&config, create_channel.clone()).create("faultline create k8s pod-network delay", &pod_delay());
    assert!(resp.success, "{}", resp);
    let uid = resp.result_text();

    let commands = create_channel.commands();
    assert!(commands[0].starts_with("echo '"));
    assert!(commands[0].contains("| kubectl apply -f -"));
    assert!(commands[0].contains(&format!(r#""name":"{}""#, uid)));
    let polls = commands.iter().filter(|c| c.contains("get chaosblade")).count();
    assert_eq!(polls, 3);

    let destroy_channel = Arc::new(
        MockChannel::new()
            .respond_times("get chaosblade", phase("Destroying"), 1)
            .respond(
                "get chaosblade",
                Response::fail(Code::ExecCommandError, format!(r#"Error from server (NotFound): chaosblades.chaosblade.io "{}" not found"#, uid)),
            ),
    );
    let engine = engine(&config, destroy_channel.clone());
    let resp = engine.destroy(&uid);
    assert!(resp.success, "{}", resp);
    assert_eq!(destroy_channel.commands()[0], format!("kubectl delete chaosblade {}", uid));

    let record = engine.store().experiment(&uid).expect("query").expect("row");
    assert_eq!(record.status(), Some(ExperimentStatus::Destroyed));
}

#[test]
fn create_times_out_with_last_status() {
    let dir = TempDir::new().expect("tempdir should be created");
    let config = config(&dir);
    let channel = Arc::new(MockChannel::new().respond("get chaosblade", phase("Initialized")));
    let engine = engine(&config, channel);

    let started = Instant::now();
    let resp = engine.create("faultline create k8s pod-network delay", &pod_delay());
    assert!(started.elapsed() >= Duration::from_millis(300));
    assert!(resp.is_code(Code::K8sInvokeError));
    assert!(resp.message().contains("timed out"));
    assert!(resp.message().contains("Initialized"));

    let rows = engine
        .store()
        .list_experiments(&Default::default())
        .expect("list");
    assert_eq!(rows[0].status(), Some(ExperimentStatus::Error));
}

#[test]
fn error_phase_fails_fast() {
    let dir = TempDir::new().expect("tempdir should be created");
    let config = config(&dir);
    let body = r#"{"status":{"phase":"Error","expStatuses":[{"error":"no pods matched"}]}}"#;
    let channel = Arc::new(MockChannel::new().respond("get chaosblade", Response::success(body)));
    let resp = engine(&config, channel).create("faultline create k8s pod-network delay", &pod_delay());
    assert!(resp.is_code(Code::K8sInvokeError));
    assert_eq!(resp.error.as_deref(), Some("no pods matched"));
}

#[test]
fn cancelled_wait_stops_polling() {
    let dir = TempDir::new().expect("tempdir should be created");
    let config = config(&dir);
    let channel = Arc::new(MockChannel::new().respond("get chaosblade", phase("Initialized")));
    let engine = engine(&config, channel.clone());
    engine.cancel_token().cancel();

    let resp = engine.create("faultline create k8s pod-network delay", &pod_delay());
    assert!(resp.is_code(Code::Timeout));
    assert_eq!(
        channel.commands().iter().filter(|c| c.contains("get chaosblade")).count(),
        0
    );
}
