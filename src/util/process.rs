// SPDX-License-Identifier: PMPL-1.0-or-later

//! Process discovery through a channel.
//!
//! Detached workers have no retained handle, so stop paths find them again
//! from `ps` output by name and arguments.

use crate::channel::Channel;
use crate::types::ExecRequest;
use std::collections::{HashMap, HashSet};

/// Tools that must never match their own lookup.
const SELF_TOOLS: [&str; 2] = ["chaos_killprocess", "chaos_stopprocess"];
/// Executable name of the front end.
const CLI_NAME: &str = "faultline";
/// Prefix every primitive binary shares.
const TOOL_PREFIX: &str = "chaos_";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessMatcher<'a> {
    /// Substring of the full command line.
    CommandLine(&'a str),
    /// Exact executable name as reported by `comm`.
    Name(&'a str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessQuery<'a> {
    pub matcher: ProcessMatcher<'a>,
    /// Extra substring the command line must also carry, e.g. `--nohup`.
    pub must_contain: Option<&'a str>,
    pub exclude: Option<&'a str>,
}

impl<'a> ProcessQuery<'a> {
    pub fn command_line(pattern: &'a str) -> Self {
        Self {
            matcher: ProcessMatcher::CommandLine(pattern),
            must_contain: None,
            exclude: None,
        }
    }

    pub fn name(name: &'a str) -> Self {
        Self {
            matcher: ProcessMatcher::Name(name),
            must_contain: None,
            exclude: None,
        }
    }

    pub fn containing(mut self, needle: &'a str) -> Self {
        self.must_contain = Some(needle);
        self
    }

    pub fn excluding(mut self, needle: &'a str) -> Self {
        self.exclude = Some(needle);
        self
    }
}

/// Pids of this process and its parent shell.
pub fn own_pids() -> Vec<u32> {
    vec![std::process::id(), std::os::unix::process::parent_id()]
}

/// Runs `ps` through the channel and filters its output.
pub fn find_pids(
    channel: &dyn Channel,
    request: &ExecRequest,
    query: &ProcessQuery<'_>,
) -> Result<Vec<String>, String> {
    let response = channel.run(request, "ps", "-eo pid=,ppid=,comm=,args=");
    if !response.success {
        return Err(response.message());
    }
    Ok(select_pids(&response.result_text(), query, &own_pids()))
}

struct PsLine<'a> {
    pid: u32,
    ppid: u32,
    comm: &'a str,
    args: String,
}

fn parse_ps(ps_output: &str) -> Vec<PsLine<'_>> {
    ps_output
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let pid = fields.next()?.parse().ok()?;
            let ppid = fields.next()?.parse().ok()?;
            let comm = fields.next()?;
            Some(PsLine {
                pid,
                ppid,
                comm,
                args: fields.collect::<Vec<_>>().join(" "),
            })
        })
        .collect()
}

/// `own` plus every ancestor of it that appears in the listing.
fn lineage(lines: &[PsLine<'_>], own: &[u32]) -> HashSet<u32> {
    let parents: HashMap<u32, u32> = lines.iter().map(|line| (line.pid, line.ppid)).collect();
    let mut seen: HashSet<u32> = HashSet::new();
    for &pid in own {
        let mut current = pid;
        while seen.insert(current) && current > 1 {
            match parents.get(&current) {
                Some(&parent) => current = parent,
                None => break,
            }
        }
    }
    seen
}

/// Filters `pid ppid comm args...` lines.
///
/// The processes in `own`, their whole ancestor chain, the `faultline` front
/// end and every `chaos_*` tool are skipped. Tools are only returned when the
/// query names a tool itself, which is how stop paths find their workers.
pub fn select_pids(ps_output: &str, query: &ProcessQuery<'_>, own: &[u32]) -> Vec<String> {
    let lines = parse_ps(ps_output);
    let skip = lineage(&lines, own);
    let wants_tool = match query.matcher {
        ProcessMatcher::CommandLine(pattern) | ProcessMatcher::Name(pattern) => {
            pattern.contains(TOOL_PREFIX)
        }
    };
    let mut pids = Vec::new();
    for line in &lines {
        if skip.contains(&line.pid) {
            continue;
        }
        let matched = match query.matcher {
            ProcessMatcher::CommandLine(pattern) => line.args.contains(pattern),
            ProcessMatcher::Name(name) => line.comm == name,
        };
        if !matched {
            continue;
        }
        if SELF_TOOLS.iter().any(|tool| line.args.contains(tool)) {
            continue;
        }
        if line.comm == CLI_NAME || (!wants_tool && line.comm.starts_with(TOOL_PREFIX)) {
            continue;
        }
        if line.comm == "grep" || line.comm == "ps" {
            continue;
        }
        if let Some(needle) = query.must_contain {
            if !line.args.contains(needle) {
                continue;
            }
        }
        if let Some(needle) = query.exclude {
            if line.args.contains(needle) {
                continue;
            }
        }
        pids.push(line.pid.to_string());
    }
    pids
}

/// `kill -<signal> <pids>`; an empty set is a no-op.
pub fn signal_pids(
    channel: &dyn Channel,
    request: &ExecRequest,
    signal: &str,
    pids: &[String],
) -> Result<(), String> {
    if pids.is_empty() {
        return Ok(());
    }
    let response = channel.run(request, "kill", &format!("-{} {}", signal, pids.join(" ")));
    if response.success {
        Ok(())
    } else {
        Err(response.message())
    }
}
