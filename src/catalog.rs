// SPDX-License-Identifier: PMPL-1.0-or-later

//! Built-in catalog of targets, actions and their flags.
//!
//! A command path `<target> [<action target>] <action>` resolves against this
//! table. Flag specs drive both CLI validation and the command line handed to
//! primitive binaries.

use crate::error::{FaultError, FaultResult};
use crate::primitive::Primitive;
use crate::types::{AgentKind, Flags};

/// Accepted on every action.
pub const TIMEOUT_FLAG: &str = "timeout";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlagSpec {
    pub name: &'static str,
    pub desc: &'static str,
    pub required: bool,
    /// Emitted as a bare `--name` when true, omitted otherwise.
    pub boolean: bool,
}

impl FlagSpec {
    pub const fn value(name: &'static str, desc: &'static str) -> Self {
        Self {
            name,
            desc,
            required: false,
            boolean: false,
        }
    }

    pub const fn switch(name: &'static str, desc: &'static str) -> Self {
        Self {
            name,
            desc,
            required: false,
            boolean: true,
        }
    }

    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// How an action is carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Primitive(Primitive),
    DockerRemove,
    PodDelete,
    Agent(AgentKind),
    /// A ChaosBlade resource, or the primitive itself once routed to a pod.
    Kubernetes(Option<Primitive>),
}

/// Which hook prepares the channel for a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PreExecKind {
    Os,
    Docker,
    Kubernetes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionSpec {
    /// Second-to-last command token; equals the target for one-level commands.
    pub target: &'static str,
    pub name: &'static str,
    pub desc: &'static str,
    pub flags: Vec<FlagSpec>,
    pub kind: ActionKind,
}

impl ActionSpec {
    pub fn flag(&self, name: &str) -> Option<&FlagSpec> {
        self.flags.iter().find(|flag| flag.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetSpec {
    pub name: &'static str,
    pub desc: &'static str,
    /// Flags every action of this target accepts (routing, credentials).
    pub flags: Vec<FlagSpec>,
    pub pre_exec: Option<PreExecKind>,
    pub actions: Vec<ActionSpec>,
}

impl TargetSpec {
    pub fn action(&self, action_target: &str, action: &str) -> Option<&ActionSpec> {
        self.actions
            .iter()
            .find(|spec| spec.target == action_target && spec.name == action)
    }

    /// Rejects flags neither the target nor the action declares.
    pub fn validate(&self, action: &ActionSpec, flags: &Flags) -> FaultResult<()> {
        for name in flags.keys() {
            let known = name == TIMEOUT_FLAG
                || action.flag(name).is_some()
                || self.flags.iter().any(|flag| flag.name == name);
            if !known {
                return Err(FaultError::IllegalParameters(format!(
                    "unknown flag --{} for {} {}",
                    name, self.name, action.name
                )));
            }
        }
        Ok(())
    }
}

fn primitive(target: &'static str, name: &'static str, desc: &'static str, which: Primitive, flags: Vec<FlagSpec>) -> ActionSpec {
    ActionSpec {
        target,
        name,
        desc,
        flags,
        kind: ActionKind::Primitive(which),
    }
}

fn cpu_flags() -> Vec<FlagSpec> {
    vec![
        FlagSpec::value("cpu-count", "Number of cores to burn, defaults to all"),
        FlagSpec::value("cpu-list", "Cores to burn, e.g. 0-3 or 1,3"),
        FlagSpec::value("cpu-percent", "Load percentage per core, 1-100"),
    ]
}

fn mem_flags() -> Vec<FlagSpec> {
    vec![FlagSpec::value("mem-percent", "Target memory usage, 1-100")]
}

fn burn_io_flags() -> Vec<FlagSpec> {
    vec![
        FlagSpec::value("directory", "Directory to read and write in"),
        FlagSpec::value("size", "Block size in MB, default 10"),
        FlagSpec::switch("read", "Burn io by reading"),
        FlagSpec::switch("write", "Burn io by writing"),
    ]
}

fn fill_flags() -> Vec<FlagSpec> {
    vec![
        FlagSpec::value("directory", "Directory to fill"),
        FlagSpec::value("size", "Megabytes to allocate"),
        FlagSpec::value("percent", "Target filesystem usage, 1-100"),
    ]
}

fn port_flags() -> Vec<FlagSpec> {
    vec![
        FlagSpec::value("local-port", "Local ports, e.g. 80,8000-8080"),
        FlagSpec::value("remote-port", "Remote ports, e.g. 3306"),
        FlagSpec::value(
            "exclude-port",
            "Ports left untouched; ignored when local or remote ports are given",
        ),
        FlagSpec::value("destination-ip", "Only traffic towards this IPv4 address or CIDR block"),
    ]
}

fn delay_flags() -> Vec<FlagSpec> {
    let mut flags = vec![
        FlagSpec::value("interface", "Network interface, e.g. eth0").required(),
        FlagSpec::value("time", "Delay in milliseconds").required(),
        FlagSpec::value("offset", "Delay jitter in milliseconds, default 10"),
    ];
    flags.extend(port_flags());
    flags
}

fn loss_flags() -> Vec<FlagSpec> {
    let mut flags = vec![
        FlagSpec::value("interface", "Network interface, e.g. eth0").required(),
        FlagSpec::value("percent", "Loss percentage, 1-100").required(),
    ];
    flags.extend(port_flags());
    flags
}

fn drop_flags() -> Vec<FlagSpec> {
    vec![
        FlagSpec::value("local-port", "Local ports to drop"),
        FlagSpec::value("remote-port", "Remote ports to drop"),
    ]
}

fn dns_flags() -> Vec<FlagSpec> {
    vec![
        FlagSpec::value("domain", "Domain to poison").required(),
        FlagSpec::value("ip", "Address the domain should resolve to").required(),
    ]
}

fn process_flags() -> Vec<FlagSpec> {
    vec![
        FlagSpec::value("process", "Substring of the process command line"),
        FlagSpec::value("process-cmd", "Exact process command name"),
    ]
}

fn kill_flags() -> Vec<FlagSpec> {
    let mut flags = process_flags();
    flags.push(FlagSpec::value("signal", "Signal to send, default 9"));
    flags
}

/// The OS actions, grouped under `target` (`cpu`, `network`, ...).
fn os_actions() -> Vec<ActionSpec> {
    vec![
        primitive("cpu", "fullload", "Burn CPU", Primitive::BurnCpu, cpu_flags()),
        primitive("mem", "load", "Hold memory usage at a percentage", Primitive::BurnMem, mem_flags()),
        primitive("disk", "burn", "Saturate disk IO", Primitive::BurnIo, burn_io_flags()),
        primitive("disk", "fill", "Fill a filesystem", Primitive::FillDisk, fill_flags()),
        primitive("network", "delay", "Delay network traffic", Primitive::DelayNetwork, delay_flags()),
        primitive("network", "loss", "Drop a share of packets", Primitive::LossNetwork, loss_flags()),
        primitive("network", "drop", "Drop all packets on ports", Primitive::DropNetwork, drop_flags()),
        primitive("network", "dns", "Resolve a domain to a chosen IP", Primitive::ChangeDns, dns_flags()),
        primitive("process", "kill", "Kill matching processes", Primitive::KillProcess, kill_flags()),
        primitive("process", "stop", "Suspend matching processes", Primitive::StopProcess, process_flags()),
    ]
}

fn ssh_flags() -> Vec<FlagSpec> {
    vec![
        FlagSpec::value("channel", "Execution channel, `ssh` for a remote host"),
        FlagSpec::value("ssh-host", "Remote host"),
        FlagSpec::value("ssh-user", "Remote user, default root"),
        FlagSpec::value("ssh-port", "Remote port, default 22"),
        FlagSpec::value("ssh-key", "Private key file"),
        FlagSpec::value("install-path", "Directory of the chaos_* binaries on the remote host"),
    ]
}

fn os_targets() -> Vec<TargetSpec> {
    let actions = os_actions();
    ["cpu", "mem", "disk", "network", "process"]
        .into_iter()
        .map(|name| TargetSpec {
            name,
            desc: "Fault on the local or an ssh-reachable host",
            flags: ssh_flags(),
            pre_exec: Some(PreExecKind::Os),
            actions: actions.iter().filter(|a| a.target == name).cloned().collect(),
        })
        .collect()
}

fn docker_target() -> TargetSpec {
    // The helper container shares the network namespace only, so a hosts
    // entry written there never reaches the target.
    let mut actions: Vec<ActionSpec> = os_actions()
        .into_iter()
        .filter(|a| matches!(a.target, "cpu" | "network" | "process"))
        .filter(|a| a.kind != ActionKind::Primitive(Primitive::ChangeDns))
        .collect();
    actions.push(ActionSpec {
        target: "docker",
        name: "remove",
        desc: "Remove the container",
        flags: vec![FlagSpec::switch("force", "Remove a running container")],
        kind: ActionKind::DockerRemove,
    });
    TargetSpec {
        name: "docker",
        desc: "Fault inside a docker container",
        flags: vec![FlagSpec::value("container-id", "Target container id").required()],
        pre_exec: Some(PreExecKind::Docker),
        actions,
    }
}

fn k8s_target() -> TargetSpec {
    let mut actions = Vec::new();
    for scope in ["node", "pod", "container"] {
        for action in os_actions() {
            let target = match (scope, action.target) {
                ("node", "cpu") => "node-cpu",
                ("node", "mem") => "node-mem",
                ("node", "disk") => "node-disk",
                ("node", "network") => "node-network",
                ("node", "process") => "node-process",
                ("pod", "cpu") => "pod-cpu",
                ("pod", "mem") => "pod-mem",
                ("pod", "disk") => "pod-disk",
                ("pod", "network") => "pod-network",
                ("pod", "process") => "pod-process",
                ("container", "cpu") => "container-cpu",
                ("container", "mem") => "container-mem",
                ("container", "disk") => "container-disk",
                ("container", "network") => "container-network",
                ("container", "process") => "container-process",
                _ => continue,
            };
            // Node agents cannot reach a pod's hosts file; DNS goes through the resource.
            let which = match action.kind {
                ActionKind::Primitive(Primitive::ChangeDns) => None,
                ActionKind::Primitive(which) => Some(which),
                _ => None,
            };
            actions.push(ActionSpec {
                target,
                kind: ActionKind::Kubernetes(which),
                ..action
            });
        }
    }
    actions.push(ActionSpec {
        target: "pod",
        name: "delete",
        desc: "Delete a pod",
        flags: vec![
            FlagSpec::value("names", "Pod name").required(),
            FlagSpec::switch("force", "Delete without grace period"),
        ],
        kind: ActionKind::PodDelete,
    });
    TargetSpec {
        name: "k8s",
        desc: "Fault on kubernetes nodes, pods or containers",
        flags: vec![
            FlagSpec::value("namespace", "Namespace of the target"),
            FlagSpec::value("container-id", "Run directly in the node agent next to this container"),
            FlagSpec::value("deployment", "Burn CPU through a sidecar in this deployment"),
            FlagSpec::value("labels", "Label selector of the target"),
            FlagSpec::value("kubeconfig", "kubeconfig file"),
            FlagSpec::value("waiting-time", "How long to wait for the resource, default 20s"),
        ],
        pre_exec: Some(PreExecKind::Kubernetes),
        actions,
    }
}

fn jvm_common() -> Vec<FlagSpec> {
    vec![
        FlagSpec::value("process", "Java process name"),
        FlagSpec::value("pid", "Java process id"),
        FlagSpec::value("classname", "Fully qualified class name").required(),
        FlagSpec::value("methodname", "Method name").required(),
    ]
}

fn jvm_target() -> TargetSpec {
    let agent = ActionKind::Agent(AgentKind::Jvm);
    let with = |extra: Vec<FlagSpec>| {
        let mut flags = jvm_common();
        flags.extend(extra);
        flags
    };
    TargetSpec {
        name: "jvm",
        desc: "Fault inside a prepared java process",
        flags: Vec::new(),
        pre_exec: None,
        actions: vec![
            ActionSpec {
                target: "jvm",
                name: "delay",
                desc: "Delay method invocations",
                flags: with(vec![
                    FlagSpec::value("time", "Delay in milliseconds").required(),
                    FlagSpec::value("offset", "Delay jitter in milliseconds"),
                ]),
                kind: agent,
            },
            ActionSpec {
                target: "jvm",
                name: "throwCustomException",
                desc: "Throw an exception from a method",
                flags: with(vec![
                    FlagSpec::value("exception", "Exception class").required(),
                    FlagSpec::value("exception-message", "Exception message"),
                ]),
                kind: agent,
            },
            ActionSpec {
                target: "jvm",
                name: "return",
                desc: "Return a fixed value from a method",
                flags: with(vec![FlagSpec::value("value", "Value to return").required()]),
                kind: agent,
            },
            ActionSpec {
                target: "jvm",
                name: "script",
                desc: "Run a script in place of a method",
                flags: with(vec![
                    FlagSpec::value("script-content", "Base64 encoded script").required(),
                    FlagSpec::value("script-type", "java or groovy"),
                    FlagSpec::value("script-name", "Script name for logging"),
                ]),
                kind: agent,
            },
        ],
    }
}

fn cplus_common() -> Vec<FlagSpec> {
    vec![
        FlagSpec::value("port", "Port of the prepared cplus agent"),
        FlagSpec::value("processName", "Process to attach to").required(),
        FlagSpec::value("breakLine", "Source line to break on").required(),
        FlagSpec::value("fileLocationAndName", "Startup script of the process").required(),
        FlagSpec::value("forkMode", "parent, child or all"),
        FlagSpec::value("libLoad", "Library path to load"),
        FlagSpec::value("initParams", "Startup parameters"),
    ]
}

fn cplus_target() -> TargetSpec {
    let agent = ActionKind::Agent(AgentKind::Cplus);
    let with = |extra: Vec<FlagSpec>| {
        let mut flags = cplus_common();
        flags.extend(extra);
        flags
    };
    TargetSpec {
        name: "cplus",
        desc: "Fault inside a C++ process through the gdb agent",
        flags: Vec::new(),
        pre_exec: None,
        actions: vec![
            ActionSpec {
                target: "cplus",
                name: "delay",
                desc: "Delay at a breakpoint",
                flags: with(vec![FlagSpec::value("delayDuration", "Delay in seconds").required()]),
                kind: agent,
            },
            ActionSpec {
                target: "cplus",
                name: "modify",
                desc: "Modify a variable at a breakpoint",
                flags: with(vec![
                    FlagSpec::value("variableName", "Variable to modify").required(),
                    FlagSpec::value("variableValue", "New value").required(),
                ]),
                kind: agent,
            },
            ActionSpec {
                target: "cplus",
                name: "return",
                desc: "Return early with a value",
                flags: with(vec![FlagSpec::value("returnValue", "Value to return").required()]),
                kind: agent,
            },
        ],
    }
}

/// Every target this build knows, in display order.
pub fn builtin() -> Vec<TargetSpec> {
    let mut targets = os_targets();
    targets.push(docker_target());
    targets.push(k8s_target());
    targets.push(jvm_target());
    targets.push(cplus_target());
    targets
}

pub fn find<'a>(catalog: &'a [TargetSpec], target: &str) -> FaultResult<&'a TargetSpec> {
    catalog
        .iter()
        .find(|spec| spec.name == target)
        .ok_or_else(|| FaultError::IllegalCommand(format!("unknown target {:?}", target)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn keys_are_unique() {
        let mut seen = HashSet::new();
        for target in builtin() {
            for action in &target.actions {
                assert!(
                    seen.insert((target.name, action.target, action.name)),
                    "duplicate {} {} {}",
                    target.name,
                    action.target,
                    action.name
                );
            }
        }
    }

    #[test]
    fn docker_reuses_primitives() {
        let catalog = builtin();
        let docker = find(&catalog, "docker").expect("docker target");
        let delay = docker.action("network", "delay").expect("network delay");
        assert_eq!(delay.kind, ActionKind::Primitive(Primitive::DelayNetwork));
        assert!(delay.flag("interface").is_some_and(|flag| flag.required));
        assert_eq!(
            docker.action("docker", "remove").map(|a| a.kind),
            Some(ActionKind::DockerRemove)
        );
        assert!(docker.action("mem", "load").is_none());
    }

    #[test]
    fn validate_accepts_target_flags_and_timeout() {
        let catalog = builtin();
        let k8s = find(&catalog, "k8s").expect("k8s target");
        let action = k8s.action("pod-cpu", "fullload").expect("pod cpu");
        assert_eq!(action.kind, ActionKind::Kubernetes(Some(Primitive::BurnCpu)));
        let mut flags = Flags::new();
        flags.insert("cpu-percent".into(), "50".into());
        flags.insert("namespace".into(), "default".into());
        flags.insert("timeout".into(), "30".into());
        k8s.validate(action, &flags).expect("known flags");
        flags.insert("bogus".into(), "1".into());
        assert!(k8s.validate(action, &flags).is_err());
    }

    #[test]
    fn dns_lives_under_network_and_never_in_a_helper() {
        let catalog = builtin();
        assert!(find(&catalog, "dns").is_err());
        let network = find(&catalog, "network").expect("network target");
        assert_eq!(
            network.action("network", "dns").map(|a| a.kind),
            Some(ActionKind::Primitive(Primitive::ChangeDns))
        );
        let docker = find(&catalog, "docker").expect("docker target");
        assert!(docker.action("network", "dns").is_none());
        let k8s = find(&catalog, "k8s").expect("k8s target");
        assert_eq!(
            k8s.action("container-network", "dns").map(|a| a.kind),
            Some(ActionKind::Kubernetes(None))
        );
    }

    #[test]
    fn shaping_actions_take_a_destination() {
        let catalog = builtin();
        let network = find(&catalog, "network").expect("network target");
        for action in ["delay", "loss"] {
            let spec = network.action("network", action).expect("shaping action");
            assert!(spec.flag("destination-ip").is_some(), "{} lacks --destination-ip", action);
        }
    }

    #[test]
    fn unknown_target() {
        assert!(find(&builtin(), "windows").is_err());
    }
}
