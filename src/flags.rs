// SPDX-License-Identifier: PMPL-1.0-or-later

//! Flat `--key value` encoding of flag maps and command-path parsing.
//!
//! Destroy rebuilds an experiment purely from persisted strings, so both
//! directions must agree. Values containing whitespace do not survive the
//! round trip; they are split like any other token.

use crate::error::{FaultError, FaultResult};
use crate::types::Flags;

/// `--k v` pairs joined by spaces, skipping empty values.
pub fn encode(flags: &Flags) -> String {
    flags
        .iter()
        .filter(|(_, value)| !value.is_empty())
        .map(|(key, value)| format!("--{} {}", key, value))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Inverse of [`encode`]. A trailing key with no value reads as `true`.
pub fn decode(encoded: &str) -> Flags {
    let mut flags = Flags::new();
    let mut tokens = encoded.split_whitespace().peekable();
    while let Some(token) = tokens.next() {
        let Some(key) = token.strip_prefix("--").or_else(|| token.strip_prefix('-')) else {
            continue;
        };
        if key.is_empty() {
            continue;
        }
        let value = match tokens.peek() {
            Some(next) if !next.starts_with("--") => tokens.next().unwrap_or_default(),
            _ => "true",
        };
        flags.insert(key.to_string(), value.to_string());
    }
    flags
}

/// Separates leading command words from `--key value` / `--key=value` flags.
///
/// Unlike [`decode`] a value keeps its spaces, since the shell already split
/// the arguments.
pub fn from_args(args: &[String]) -> (Vec<String>, Flags) {
    let mut words = Vec::new();
    let mut flags = Flags::new();
    let mut iter = args.iter().peekable();
    while let Some(arg) = iter.next() {
        let Some(key) = arg.strip_prefix("--").or_else(|| arg.strip_prefix('-')) else {
            if flags.is_empty() {
                words.push(arg.clone());
            }
            continue;
        };
        if let Some((key, value)) = key.split_once('=') {
            flags.insert(key.to_string(), value.to_string());
            continue;
        }
        let value = match iter.peek() {
            Some(next) if !next.starts_with('-') || next.parse::<f64>().is_ok() => {
                iter.next().cloned().unwrap_or_default()
            }
            _ => "true".to_string(),
        };
        flags.insert(key.to_string(), value);
    }
    (words, flags)
}

/// Splits `"<prog> create <target> <sub...>"` into `(target, sub)`.
///
/// `"blade create docker network delay"` gives `("docker", "network delay")`.
pub fn parse_command_path(path: &str) -> FaultResult<(String, String)> {
    let tokens: Vec<&str> = path.split_whitespace().collect();
    if tokens.len() < 4 {
        return Err(FaultError::IllegalCommand(format!(
            "illegal command path {:?}: expected <program> <verb> <target> <action>",
            path
        )));
    }
    Ok((tokens[2].to_string(), tokens[3..].join(" ")))
}

/// Recovers `(action_target, action)` from a command and its sub-command.
///
/// With more than one token the second-to-last is the action target and the
/// last the action; a single token is the action and the command itself is
/// the target. Create and destroy both go through here so they agree.
pub fn split_sub_command(command: &str, sub_command: &str) -> FaultResult<(String, String)> {
    let tokens: Vec<&str> = sub_command.split_whitespace().collect();
    match tokens.as_slice() {
        [] => Err(FaultError::IllegalCommand(format!(
            "no action found for command {:?}",
            command
        ))),
        [action] => Ok((command.to_string(), action.to_string())),
        [.., target, action] => Ok((target.to_string(), action.to_string())),
    }
}
