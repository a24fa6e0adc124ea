// SPDX-License-Identifier: PMPL-1.0-or-later

//! Recording channel for tests and dry runs.

use super::{command_line, Channel};
use crate::transport::Response;
use crate::types::ExecRequest;
use std::path::PathBuf;
use std::sync::Mutex;

struct Rule {
    needle: String,
    response: Response,
    remaining: Option<usize>,
}

/// Records every command and answers from a list of substring rules.
///
/// The first rule whose needle occurs in the command line wins; commands no
/// rule matches succeed with empty output.
pub struct MockChannel {
    script_path: PathBuf,
    rules: Mutex<Vec<Rule>>,
    commands: Mutex<Vec<String>>,
}

impl MockChannel {
    pub fn new() -> Self {
        Self::with_script_path(PathBuf::from("/opt/faultline/bin"))
    }

    pub fn with_script_path(script_path: PathBuf) -> Self {
        Self {
            script_path,
            rules: Mutex::new(Vec::new()),
            commands: Mutex::new(Vec::new()),
        }
    }

    pub fn respond(self, needle: &str, response: Response) -> Self {
        self.push_rule(needle, response, None);
        self
    }

    /// Like [`MockChannel::respond`], but only for the next `times` matches.
    pub fn respond_times(self, needle: &str, response: Response, times: usize) -> Self {
        self.push_rule(needle, response, Some(times));
        self
    }

    fn push_rule(&self, needle: &str, response: Response, remaining: Option<usize>) {
        if let Ok(mut rules) = self.rules.lock() {
            rules.push(Rule {
                needle: needle.to_string(),
                response,
                remaining,
            });
        }
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands
            .lock()
            .map(|commands| commands.clone())
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut commands) = self.commands.lock() {
            commands.clear();
        }
    }
}

impl Default for MockChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl Channel for MockChannel {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn run(&self, _request: &ExecRequest, program: &str, args: &str) -> Response {
        let line = command_line(program, args);
        if let Ok(mut commands) = self.commands.lock() {
            commands.push(line.clone());
        }
        let Ok(mut rules) = self.rules.lock() else {
            return Response::success("");
        };
        for rule in rules.iter_mut() {
            if rule.remaining == Some(0) || !line.contains(&rule.needle) {
                continue;
            }
            if let Some(remaining) = rule.remaining.as_mut() {
                *remaining -= 1;
            }
            return rule.response.clone();
        }
        Response::success("")
    }

    fn script_path(&self) -> PathBuf {
        self.script_path.clone()
    }
}
