//! Runs decrypted command bodies as child processes.

use std::collections::BTreeMap;
use std::io::Write;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::error::AgentError;

/// Settings passed to the child, as a JSON object.
pub const SETTINGS_ENV: &str = "REMOTES_SETTINGS";
/// Host variables passed to the child, as a JSON object.
pub const VARIABLES_ENV: &str = "REMOTES_VARIABLES";

pub const DEFAULT_INTERPRETER: &str = "python3";

/// Outcome of one command run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Execution {
    /// The child exited; `stdout` is the output and `stderr` the result.
    Completed {
        status: i32,
        stdout: String,
        stderr: String,
    },
    /// The child outlived its timeout and was killed.
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct CommandRunner {
    interpreter: String,
}

impl Default for CommandRunner {
    fn default() -> Self {
        Self::new(DEFAULT_INTERPRETER)
    }
}

async fn collect(child: &mut Child) -> std::io::Result<(i32, Vec<u8>, Vec<u8>)> {
    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| std::io::Error::other("stdout not captured"))?;
    let mut stderr = child
        .stderr
        .take()
        .ok_or_else(|| std::io::Error::other("stderr not captured"))?;
    let mut out = Vec::new();
    let mut err = Vec::new();
    let (read_out, read_err, status) = tokio::join!(
        stdout.read_to_end(&mut out),
        stderr.read_to_end(&mut err),
        child.wait()
    );
    read_out?;
    read_err?;
    Ok((status?.code().unwrap_or(-1), out, err))
}

impl CommandRunner {
    pub fn new(interpreter: impl Into<String>) -> Self {
        Self {
            interpreter: interpreter.into(),
        }
    }

    /// Write `body` to a private temporary file and run it with the
    /// interpreter. A run past `timeout` is killed and reaped.
    pub async fn run(
        &self,
        body: &str,
        settings: &BTreeMap<String, Option<String>>,
        variables: &BTreeMap<String, Option<String>>,
        timeout: Duration,
    ) -> Result<Execution, AgentError> {
        let mut script = tempfile::Builder::new().prefix("remotes-").tempfile()?;
        script.write_all(body.as_bytes())?;
        script.flush()?;

        let mut child = Command::new(&self.interpreter)
            .arg(script.path())
            .env(SETTINGS_ENV, serde_json::to_string(settings)?)
            .env(VARIABLES_ENV, serde_json::to_string(variables)?)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;
        debug!(interpreter = %self.interpreter, pid = ?child.id(), "Command started");

        let waited = tokio::time::timeout(timeout, collect(&mut child)).await;
        match waited {
            Ok(collected) => {
                let (status, out, err) = collected?;
                debug!(status, "Command finished");
                Ok(Execution::Completed {
                    status,
                    stdout: String::from_utf8_lossy(&out).into_owned(),
                    stderr: String::from_utf8_lossy(&err).into_owned(),
                })
            }
            Err(_) => {
                warn!(timeout_secs = timeout.as_secs(), "Command timed out, killing");
                if let Err(e) = child.start_kill() {
                    warn!(error = %e, "Failed to kill timed out command");
                }
                let _ = child.wait().await;
                Ok(Execution::TimedOut)
            }
        }
    }
}

#[cfg(all(test, unix))]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    fn shell() -> CommandRunner {
        CommandRunner::new("sh")
    }

    #[tokio::test]
    async fn captures_stdout_stderr_and_status() {
        let none = BTreeMap::new();
        let execution = shell()
            .run("echo out; echo '[\"a\"]' >&2; exit 3", &none, &none, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(
            execution,
            Execution::Completed {
                status: 3,
                stdout: "out\n".into(),
                stderr: "[\"a\"]\n".into(),
            }
        );
    }

    #[tokio::test]
    async fn passes_settings_and_variables_as_json() {
        let settings = BTreeMap::from([("target".to_string(), Some("nas".to_string()))]);
        let variables = BTreeMap::from([("count".to_string(), None)]);
        let execution = shell()
            .run(
                "printf '%s|%s' \"$REMOTES_SETTINGS\" \"$REMOTES_VARIABLES\"",
                &settings,
                &variables,
                Duration::from_secs(5),
            )
            .await
            .unwrap();
        let Execution::Completed { stdout, .. } = execution else {
            panic!("command should complete");
        };
        assert_eq!(stdout, r#"{"target":"nas"}|{"count":null}"#);
    }

    #[tokio::test]
    async fn timeout_kills_the_child() {
        let none = BTreeMap::new();
        let started = std::time::Instant::now();
        let execution = shell()
            .run("sleep 30", &none, &none, Duration::from_millis(200))
            .await
            .unwrap();
        assert_eq!(execution, Execution::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn missing_interpreter_is_an_error() {
        let none = BTreeMap::new();
        let runner = CommandRunner::new("/nonexistent/interpreter");
        assert!(runner.run("", &none, &none, Duration::from_secs(1)).await.is_err());
    }
}
