//! Subprocess execution for the external pinger.
//!
//! The engine never talks to the pinger binary directly; it goes through the
//! [`ProcessRunner`] trait so that capability detection and output parsing
//! can be exercised against scripted outputs in tests. The production
//! implementation is [`SystemRunner`].

use std::collections::VecDeque;
use std::path::Path;
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::timeout;

/// Upper bound on captured pinger output.
///
/// A sweep of a few hundred hosts with per-packet lines stays far below
/// this; anything larger is runaway output and gets truncated.
pub const MAX_CAPTURE_BYTES: usize = 256 * 1024;

/// Result of one subprocess execution.
///
/// Exit codes are deliberately absent: fping exits nonzero whenever any
/// target is unreachable, which is a valid observation, not a failure.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// Process ran to completion.
    Completed {
        /// Combined stdout + stderr, truncated at [`MAX_CAPTURE_BYTES`].
        output: String,
        /// True when the child was terminated by a signal.
        signaled: bool,
    },
    /// The execution timeout elapsed; the child was killed.
    TimedOut,
    /// The process could not be spawned at all.
    Failed {
        /// Short description of the spawn failure.
        error: String,
    },
}

/// Executes a command line and captures its combined output.
#[async_trait::async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run `program` with `args`, optionally redirecting `stdin` from a
    /// file, enforcing `limit` as a hard execution timeout.
    async fn execute(
        &self,
        program: &Path,
        args: &[String],
        stdin: Option<&Path>,
        limit: Duration,
    ) -> RunOutcome;
}

/// Production runner backed by `tokio::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl SystemRunner {
    /// Create a new system runner.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl ProcessRunner for SystemRunner {
    async fn execute(
        &self,
        program: &Path,
        args: &[String],
        stdin: Option<&Path>,
        limit: Duration,
    ) -> RunOutcome {
        let stdin = match stdin {
            Some(path) => match std::fs::File::open(path) {
                Ok(file) => Stdio::from(file),
                Err(e) => {
                    return RunOutcome::Failed {
                        error: format!("{}: {}", path.display(), e),
                    };
                }
            },
            None => Stdio::null(),
        };

        let child = tokio::process::Command::new(program)
            .args(args)
            .stdin(stdin)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(e) => {
                return RunOutcome::Failed {
                    error: format!("{}: {}", program.display(), e),
                };
            }
        };

        match timeout(limit, child.wait_with_output()).await {
            Ok(Ok(out)) => {
                let mut output = String::from_utf8_lossy(&out.stdout).into_owned();
                output.push_str(&String::from_utf8_lossy(&out.stderr));
                truncate_capture(&mut output);

                RunOutcome::Completed {
                    output,
                    signaled: termination_signal(&out.status).is_some(),
                }
            }
            Ok(Err(e)) => RunOutcome::Failed {
                error: format!("{}: {}", program.display(), e),
            },
            // kill_on_drop reaps the child once the future is dropped.
            Err(_) => RunOutcome::TimedOut,
        }
    }
}

/// Truncate to the capture bound on a char boundary.
fn truncate_capture(output: &mut String) {
    if output.len() <= MAX_CAPTURE_BYTES {
        return;
    }
    let mut end = MAX_CAPTURE_BYTES;
    while !output.is_char_boundary(end) {
        end -= 1;
    }
    output.truncate(end);
}

#[cfg(unix)]
fn termination_signal(status: &std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn termination_signal(_status: &std::process::ExitStatus) -> Option<i32> {
    None
}

/// Scripted runner for tests.
///
/// Returns queued outcomes in order and records every command line it was
/// asked to run, so tests can assert on both the fed output and the
/// constructed invocations.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    outcomes: Mutex<VecDeque<RunOutcome>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    /// Create an empty scripted runner.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the next outcome to return.
    pub fn push(&self, outcome: RunOutcome) {
        self.outcomes.lock().unwrap().push_back(outcome);
    }

    /// Queue a completed run with the given output.
    pub fn push_output(&self, output: impl Into<String>) {
        self.push(RunOutcome::Completed {
            output: output.into(),
            signaled: false,
        });
    }

    /// Command lines recorded so far, formatted as `program arg1 arg2 ...`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ProcessRunner for ScriptedRunner {
    async fn execute(
        &self,
        program: &Path,
        args: &[String],
        _stdin: Option<&Path>,
        _limit: Duration,
    ) -> RunOutcome {
        let mut line = program.display().to_string();
        for arg in args {
            line.push(' ');
            line.push_str(arg);
        }
        self.calls.lock().unwrap().push(line);

        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(RunOutcome::Failed {
                error: "scripted runner exhausted".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[tokio::test]
    async fn test_scripted_runner_returns_in_order() {
        let runner = ScriptedRunner::new();
        runner.push_output("first");
        runner.push(RunOutcome::TimedOut);

        let program = PathBuf::from("/usr/sbin/fping");
        let out = runner
            .execute(&program, &[], None, Duration::from_secs(1))
            .await;
        assert!(matches!(out, RunOutcome::Completed { ref output, .. } if output == "first"));

        let out = runner
            .execute(&program, &[], None, Duration::from_secs(1))
            .await;
        assert!(matches!(out, RunOutcome::TimedOut));

        // Exhausted scripts surface as spawn failures.
        let out = runner
            .execute(&program, &[], None, Duration::from_secs(1))
            .await;
        assert!(matches!(out, RunOutcome::Failed { .. }));
    }

    #[tokio::test]
    async fn test_scripted_runner_records_calls() {
        let runner = ScriptedRunner::new();
        runner.push_output("");

        let program = PathBuf::from("/usr/sbin/fping");
        let args = vec!["-C3".to_string(), "-i0".to_string()];
        runner
            .execute(&program, &args, None, Duration::from_secs(1))
            .await;

        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0], "/usr/sbin/fping -C3 -i0");
    }

    #[tokio::test]
    async fn test_system_runner_missing_binary_fails() {
        let runner = SystemRunner::new();
        let program = PathBuf::from("/nonexistent/fsweep-test-binary");
        let out = runner
            .execute(&program, &[], None, Duration::from_secs(1))
            .await;
        assert!(matches!(out, RunOutcome::Failed { .. }));
    }

    #[test]
    fn test_truncate_capture_respects_char_boundary() {
        let mut s = "é".repeat(MAX_CAPTURE_BYTES);
        truncate_capture(&mut s);
        assert!(s.len() <= MAX_CAPTURE_BYTES);
        assert!(s.is_char_boundary(s.len()));
    }
}
