//! Subprocess gateway
//!
//! Every external tool invocation (`iscsiadm`, `multipath`, `multipathd`,
//! `udevadm`, `blockdev`, ...) goes through [`CommandRunner`]. It drains
//! stdout and stderr concurrently — a single-pipe reader deadlocks once a
//! chatty tool fills the other pipe — enforces a timeout with child kill
//! on expiry, and lets callers declare non-zero exit codes that are not
//! errors (iscsiadm exits 15 for "already logged in").

use crate::error::{Error, Result};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// Default per-invocation deadline
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Characters allowed in device names and other caller-supplied argv
/// pieces. Anything else never reaches a command line.
const ARG_ALLOWED: &str = "/_:.-";

/// Captured output of a finished command
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Non-empty trimmed stdout lines
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
    }
}

/// Shared runner for all external commands
#[derive(Debug, Clone)]
pub struct CommandRunner {
    timeout: Duration,
}

impl Default for CommandRunner {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }
}

impl CommandRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Run a command; any non-zero exit is an error.
    pub async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        self.run_with(program, args, &[]).await
    }

    /// Run a command treating the listed non-zero exit codes as success.
    pub async fn run_with(
        &self,
        program: &str,
        args: &[&str],
        ok_codes: &[i32],
    ) -> Result<CommandOutput> {
        let cmd_desc = display_command(program, args);
        debug!("Running: {cmd_desc}");

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let mut stdout_pipe = child.stdout.take().ok_or_else(|| {
            Error::Io(std::io::Error::other("child stdout not captured"))
        })?;
        let mut stderr_pipe = child.stderr.take().ok_or_else(|| {
            Error::Io(std::io::Error::other("child stderr not captured"))
        })?;

        let drain = async {
            let mut stdout = Vec::new();
            let mut stderr = Vec::new();
            // Both pipes must make progress together or the child can
            // block writing whichever one we are not reading.
            let (out_res, err_res) = tokio::join!(
                stdout_pipe.read_to_end(&mut stdout),
                stderr_pipe.read_to_end(&mut stderr),
            );
            out_res?;
            err_res?;
            let status = child.wait().await?;
            Ok::<_, std::io::Error>((status, stdout, stderr))
        };

        let (status, stdout, stderr) = match tokio::time::timeout(self.timeout, drain).await {
            Ok(done) => done?,
            Err(_) => {
                warn!("Command timed out, killing: {cmd_desc}");
                return Err(Error::CommandTimeout {
                    command: cmd_desc,
                    seconds: self.timeout.as_secs(),
                });
            }
        };

        let code = status.code().unwrap_or(-1);
        let output = CommandOutput {
            code,
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        };

        if code == 0 || ok_codes.contains(&code) {
            Ok(output)
        } else {
            Err(Error::CommandFailed {
                command: cmd_desc,
                code,
                stderr: output.stderr.trim().to_string(),
            })
        }
    }
}

fn display_command(program: &str, args: &[&str]) -> String {
    let mut s = program.to_string();
    for arg in args {
        s.push(' ');
        s.push_str(arg);
    }
    s
}

/// Validate a caller-supplied string before it appears on an argv or in a
/// sysfs path. Returns the input on success so call sites stay terse.
pub fn validate_arg(value: &str) -> Result<&str> {
    let ok = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || ARG_ALLOWED.contains(c));
    if ok {
        Ok(value)
    } else {
        Err(Error::UnsafeArgument(value.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_captures_both_streams() {
        let runner = CommandRunner::default();
        let out = runner
            .run("sh", &["-c", "echo visible; echo noisy >&2"])
            .await
            .unwrap();
        assert_eq!(out.code, 0);
        assert_eq!(out.stdout.trim(), "visible");
        assert_eq!(out.stderr.trim(), "noisy");
    }

    #[tokio::test]
    async fn test_chatty_stderr_does_not_deadlock() {
        // Fill well past a pipe buffer on stderr while stdout also streams.
        let runner = CommandRunner::default();
        let script = "i=0; while [ $i -lt 5000 ]; do echo line-$i; echo err-$i >&2; i=$((i+1)); done";
        let out = runner.run("sh", &["-c", script]).await.unwrap();
        assert_eq!(out.lines().count(), 5000);
        assert_eq!(out.stderr.lines().count(), 5000);
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_error() {
        let runner = CommandRunner::default();
        let err = runner
            .run("sh", &["-c", "echo bad >&2; exit 3"])
            .await
            .unwrap_err();
        match err {
            Error::CommandFailed { code, stderr, .. } => {
                assert_eq!(code, 3);
                assert_eq!(stderr, "bad");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_ok_codes_swallow_exit() {
        let runner = CommandRunner::default();
        let out = runner
            .run_with("sh", &["-c", "exit 15"], &[15])
            .await
            .unwrap();
        assert_eq!(out.code, 15);
    }

    #[tokio::test]
    async fn test_timeout_kills_child() {
        let runner = CommandRunner::new(Duration::from_millis(200));
        let err = runner.run("sleep", &["30"]).await.unwrap_err();
        assert!(matches!(err, Error::CommandTimeout { .. }));
    }

    #[test]
    fn test_validate_arg() {
        assert!(validate_arg("/dev/mapper/3624a9370abc").is_ok());
        assert!(validate_arg("sda").is_ok());
        assert!(validate_arg("iqn.2010-06.com.purestorage:flasharray").is_ok());
        assert!(validate_arg("bad name").is_err());
        assert!(validate_arg("x;rm -rf").is_err());
        assert!(validate_arg("").is_err());
        assert!(validate_arg("$(evil)").is_err());
    }
}
