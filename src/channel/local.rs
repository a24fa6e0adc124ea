// SPDX-License-Identifier: PMPL-1.0-or-later

//! Local shell channel.

use super::{command_line, Channel};
use crate::transport::{Code, Response};
use crate::types::ExecRequest;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

/// How long to wait for output pipes after the shell itself is gone.
const DRAIN_GRACE: Duration = Duration::from_secs(1);
const EXIT_NOT_FOUND: i32 = 127;

/// Runs commands with `/bin/sh -c`, bounded by a timeout.
#[derive(Debug, Clone)]
pub struct LocalChannel {
    script_path: PathBuf,
    timeout: Duration,
}

impl LocalChannel {
    pub fn new(script_path: PathBuf, timeout: Duration) -> Self {
        Self {
            script_path,
            timeout,
        }
    }

    fn effective_timeout(&self, request: &ExecRequest) -> Duration {
        match request.remaining() {
            Some(remaining) => remaining.min(self.timeout),
            None => self.timeout,
        }
    }
}

impl Channel for LocalChannel {
    fn name(&self) -> &'static str {
        "local"
    }

    fn run(&self, request: &ExecRequest, program: &str, args: &str) -> Response {
        let script = command_line(program, args);
        let timeout = self.effective_timeout(request);
        debug!(command = %script, timeout_secs = timeout.as_secs(), "local exec");

        let mut child = match Command::new("/bin/sh")
            .arg("-c")
            .arg(&script)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(err) => {
                return Response::fail(
                    Code::ExecCommandError,
                    format!("spawn `{}` failed: {}", script, err),
                )
            }
        };

        let (tx, rx) = mpsc::channel();
        let mut readers = 0;
        if let Some(mut stdout) = child.stdout.take() {
            let tx = tx.clone();
            readers += 1;
            thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = stdout.read_to_end(&mut buf);
                let _ = tx.send((0u8, buf));
            });
        }
        if let Some(mut stderr) = child.stderr.take() {
            let tx = tx.clone();
            readers += 1;
            thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = stderr.read_to_end(&mut buf);
                let _ = tx.send((1u8, buf));
            });
        }
        drop(tx);

        let start = Instant::now();
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break Some(status),
                Ok(None) if start.elapsed() >= timeout => {
                    let _ = child.kill();
                    let _ = child.wait();
                    break None;
                }
                Ok(None) => thread::sleep(Duration::from_millis(10)),
                Err(err) => {
                    return Response::fail(
                        Code::ExecCommandError,
                        format!("wait `{}` failed: {}", script, err),
                    )
                }
            }
        };

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        for _ in 0..readers {
            match rx.recv_timeout(DRAIN_GRACE) {
                Ok((0, buf)) => stdout = buf,
                Ok((_, buf)) => stderr = buf,
                Err(_) => break,
            }
        }
        let mut output = String::from_utf8_lossy(&stdout).into_owned();
        output.push_str(&String::from_utf8_lossy(&stderr));

        let Some(status) = status else {
            return Response::fail(
                Code::Timeout,
                format!("`{}` timed out after {}s", script, timeout.as_secs()),
            );
        };

        if status.success() {
            return Response::success(output);
        }
        let output = output.trim();
        let detail = match status.code() {
            Some(code) if output.is_empty() => format!("exit status {}", code),
            Some(_) => output.to_string(),
            None => format!("{} (terminated by signal)", output),
        };
        debug!(command = %script, error = %detail, "local exec failed");
        if status.code() == Some(EXIT_NOT_FOUND) {
            Response::fail(Code::CommandNotFound, detail)
        } else {
            Response::fail(Code::ExecCommandError, detail)
        }
    }

    fn script_path(&self) -> PathBuf {
        self.script_path.clone()
    }
}
