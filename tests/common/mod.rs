//! Shared integration-test harness for running `packetwalk` as a child
//! process and talking to its live loop over stdio NDJSON.

#![allow(dead_code)]

use std::path::PathBuf;
use std::process::Output;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

/// Default timeout for reading a single message from the live loop.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Path to the built binary.
pub const BIN: &str = env!("CARGO_BIN_EXE_packetwalk");

/// A running `packetwalk run` process with helpers for NDJSON I/O.
///
/// The child process is killed on drop via `kill_on_drop(true)`.
#[allow(clippy::missing_panics_doc)]
pub struct LiveProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    reader: BufReader<ChildStdout>,
}

impl LiveProcess {
    /// Spawns `packetwalk run` with the given room arguments.
    #[allow(clippy::missing_panics_doc)]
    pub fn spawn(room_args: &[&str]) -> Self {
        let mut child = Command::new(BIN)
            .arg("--quiet")
            .arg("run")
            .args(room_args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .expect("failed to spawn packetwalk");

        let stdin = child.stdin.take().expect("stdin not captured");
        let stdout = child.stdout.take().expect("stdout not captured");

        Self {
            child,
            stdin: Some(stdin),
            reader: BufReader::new(stdout),
        }
    }

    /// Writes one NDJSON line.
    #[allow(clippy::missing_panics_doc)]
    pub async fn send(&mut self, message: &Value) {
        let mut buf = serde_json::to_string(message).expect("failed to serialize message");
        buf.push('\n');
        let stdin = self.stdin.as_mut().expect("stdin already closed");
        stdin
            .write_all(buf.as_bytes())
            .await
            .expect("failed to write to stdin");
        stdin.flush().await.expect("failed to flush stdin");
    }

    /// Sends a control-surface command such as `{"op": "start"}`.
    pub async fn command(&mut self, command: Value) {
        self.send(&json!({ "command": command })).await;
    }

    /// Sends a renderer lifecycle event such as `{"event": "arrival", ...}`.
    pub async fn renderer(&mut self, event: Value) {
        self.send(&json!({ "renderer": event })).await;
    }

    /// Reads one NDJSON message from stdout.
    ///
    /// Panics on EOF, I/O error, or if no message arrives within `timeout`.
    #[allow(clippy::missing_panics_doc)]
    pub async fn read_message(&mut self, timeout: Duration) -> Value {
        let mut line = String::new();
        let result = tokio::time::timeout(timeout, async {
            loop {
                line.clear();
                let n = self
                    .reader
                    .read_line(&mut line)
                    .await
                    .expect("read_line I/O error");
                assert!(n > 0, "unexpected EOF from packetwalk");
                let trimmed = line.trim();
                if !trimmed.is_empty() {
                    return serde_json::from_str::<Value>(trimmed)
                        .unwrap_or_else(|e| panic!("invalid JSON from packetwalk: {e}\nline: {line}"));
                }
            }
        })
        .await;
        result.expect("timed out waiting for message from packetwalk")
    }

    /// Reads messages until one satisfies `pred`.
    pub async fn read_until(&mut self, pred: impl Fn(&Value) -> bool) -> Value {
        loop {
            let msg = self.read_message(DEFAULT_TIMEOUT).await;
            if pred(&msg) {
                return msg;
            }
        }
    }

    /// Closes stdin and waits for the process to exit.
    #[allow(clippy::missing_panics_doc)]
    pub async fn shutdown(mut self) -> std::process::ExitStatus {
        drop(self.stdin.take());
        match tokio::time::timeout(Duration::from_secs(10), self.child.wait()).await {
            Ok(status) => status.expect("failed to wait for packetwalk"),
            Err(_) => {
                self.child.kill().await.expect("failed to kill child");
                panic!("packetwalk did not exit after stdin closed");
            }
        }
    }
}

/// Runs `packetwalk` to completion with the given arguments.
#[allow(clippy::missing_panics_doc)]
pub fn run_command(args: &[&str]) -> Output {
    std::process::Command::new(BIN)
        .args(args)
        .env_remove("PACKETWALK_ROOM")
        .env_remove("PACKETWALK_LOG_LEVEL")
        .output()
        .expect("failed to run packetwalk")
}

/// Returns the path to a test fixture.
#[must_use]
pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

/// Parses every non-empty stdout line as JSON.
#[allow(clippy::missing_panics_doc)]
pub fn json_lines(output: &Output) -> Vec<Value> {
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).unwrap_or_else(|e| panic!("invalid JSON line {l}: {e}")))
        .collect()
}
