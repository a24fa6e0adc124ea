// SPDX-License-Identifier: PMPL-1.0-or-later

//! Response rendering for the terminal.

use crate::transport::Response;
use colored::*;
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Single-line JSON envelope.
    #[default]
    Json,
    PrettyJson,
    /// Colored summary for humans.
    Text,
}

pub struct ReportFormatter {
    format: OutputFormat,
}

impl ReportFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn print(&self, response: &Response) {
        println!("{}", self.render(response));
    }

    pub fn render(&self, response: &Response) -> String {
        match self.format {
            OutputFormat::Json => response.to_json(),
            OutputFormat::PrettyJson => {
                serde_json::to_string_pretty(response).unwrap_or_else(|_| response.to_json())
            }
            OutputFormat::Text => self.render_text(response),
        }
    }

    fn render_text(&self, response: &Response) -> String {
        if !response.success {
            return format!(
                "{} [{}] {}",
                "FAILED".red().bold(),
                response.code,
                response.message()
            );
        }
        match &response.result {
            None => "OK".green().to_string(),
            Some(Value::String(text)) => format!("{} {}", "OK".green(), text),
            Some(Value::Array(rows)) if rows.is_empty() => "no records".dimmed().to_string(),
            Some(Value::Array(rows)) => rows
                .iter()
                .map(|row| match row {
                    Value::Object(fields) => record_line(fields),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join("\n"),
            Some(Value::Object(fields)) => record_block(fields),
            Some(other) => other.to_string(),
        }
    }
}

fn text<'a>(fields: &'a Map<String, Value>, key: &str) -> &'a str {
    fields.get(key).and_then(Value::as_str).unwrap_or("")
}

fn status_colored(status: &str) -> ColoredString {
    match status {
        "Success" | "Running" => status.green(),
        "Error" => status.red(),
        "Destroyed" | "Revoked" => status.dimmed(),
        _ => status.yellow(),
    }
}

/// `uid  status  what  created`; experiments and preparations share the layout.
fn record_line(fields: &Map<String, Value>) -> String {
    let what = if fields.contains_key("program_type") {
        format!(
            "{} {} port {}",
            text(fields, "program_type"),
            text(fields, "process"),
            text(fields, "port")
        )
    } else {
        format!(
            "{} {} {}",
            text(fields, "command"),
            text(fields, "sub_command"),
            text(fields, "flag")
        )
    };
    format!(
        "{:16}  {:9}  {}  {}",
        text(fields, "uid").bold(),
        status_colored(text(fields, "status")),
        what.trim_end(),
        text(fields, "create_time").dimmed()
    )
}

fn record_block(fields: &Map<String, Value>) -> String {
    fields
        .iter()
        .map(|(key, value)| {
            let rendered = match value {
                Value::String(text) if key == "status" => status_colored(text).to_string(),
                Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            format!("  {:12} {}", key.bold(), rendered)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

impl Default for ReportFormatter {
    fn default() -> Self {
        Self::new(OutputFormat::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Code;
    use serde_json::json;

    fn plain() {
        colored::control::set_override(false);
    }

    #[test]
    fn json_is_the_envelope() {
        let resp = Response::success("3f2a9c1d00aa11bb");
        assert_eq!(
            ReportFormatter::default().render(&resp),
            r#"{"code":200,"success":true,"result":"3f2a9c1d00aa11bb"}"#
        );
    }

    #[test]
    fn text_failure_shows_code() {
        plain();
        let resp = Response::fail(Code::DataNotFound, "the ab experiment not found");
        assert_eq!(
            ReportFormatter::new(OutputFormat::Text).render(&resp),
            "FAILED [406] the ab experiment not found"
        );
    }

    #[test]
    fn text_lists_experiment_rows() {
        plain();
        let resp = Response::success(json!([{
            "uid": "a1", "command": "cpu", "sub_command": "fullload",
            "flag": "--cpu-percent 60", "status": "Success", "create_time": "t0"
        }]));
        let rendered = ReportFormatter::new(OutputFormat::Text).render(&resp);
        assert!(rendered.starts_with("a1"));
        assert!(rendered.contains("cpu fullload --cpu-percent 60"));
        assert!(rendered.contains("Success"));
    }
}
