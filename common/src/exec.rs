//! Synchronous execution of external administrative commands.
//!
//! Every administrative call in this system bottoms out here: one external
//! process per attempt, captured output, and a bounded sleep-and-retry loop
//! driven by an explicit verdict from a per-operation classifier.

use std::process::Command;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, warn};
use thiserror::Error;

/// Captured result of one command attempt.
#[derive(Debug, Clone, Default)]
pub struct CmdOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("empty command line")]
    EmptyCommand,
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("command failed: {cmdline}, rc={status}, err={stderr}")]
    Failed {
        cmdline: String,
        status: i32,
        stderr: String,
    },
    #[error("gave up after {attempts} attempts: {cmdline}, rc={status}, err={stderr}")]
    Exhausted {
        attempts: u32,
        cmdline: String,
        status: i32,
        stderr: String,
    },
}

/// Seam over process spawning so the command surface can be exercised
/// without a live cell.
pub trait CommandRunner {
    fn run(&self, argv: &[String]) -> Result<CmdOutput, ExecError>;
}

#[derive(Debug, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, argv: &[String]) -> Result<CmdOutput, ExecError> {
        let (program, args) = argv.split_first().ok_or(ExecError::EmptyCommand)?;
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|e| ExecError::Spawn {
                program: program.clone(),
                source: e,
            })?;
        Ok(CmdOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Outcome of classifying one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The command reached the desired state, including "already there".
    Done,
    /// Transient condition; try again after the retry interval.
    Retry,
    /// Unrecognized failure; stop immediately.
    Fatal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl Default for RetryPolicy {
    /// Database elections and server restarts can take several minutes, so
    /// the ceiling works out to roughly ten minutes.
    fn default() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 120,
            interval: Duration::from_secs(5),
        }
    }
}

/// Transient failure vocabulary shared by the database operations. This is
/// an operational list mined from field failures, not an exhaustive
/// contract; per-operation classifiers extend it.
pub const TRANSIENT_ERRORS: &[&str] = &[
    "server or network not responding",
    "no quorum elected",
    "invalid RPC (RX) operation",
    "Couldn't read/write the database",
];

pub fn is_transient(stderr: &str) -> bool {
    TRANSIENT_ERRORS.iter().any(|s| stderr.contains(s))
}

#[derive(Clone)]
pub struct Executor {
    runner: Arc<dyn CommandRunner>,
    policy: RetryPolicy,
}

impl Executor {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Executor {
        Executor::with_policy(runner, RetryPolicy::default())
    }

    pub fn with_policy(runner: Arc<dyn CommandRunner>, policy: RetryPolicy) -> Executor {
        Executor { runner, policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Run a single attempt; any non-zero exit is fatal.
    pub fn run_once(&self, argv: &[String]) -> Result<CmdOutput, ExecError> {
        let cmdline = argv.join(" ");
        let out = self.runner.run(argv)?;
        debug!(
            "command={}, rc={}, out={}, err={}",
            cmdline, out.status, out.stdout, out.stderr
        );
        if out.status != 0 {
            return Err(ExecError::Failed {
                cmdline,
                status: out.status,
                stderr: out.stderr,
            });
        }
        Ok(out)
    }

    /// Run until the classifier reports `Done`, sleeping between attempts.
    /// Exhausting the attempt budget or a `Fatal` verdict aborts with the
    /// command line, exit code and captured stderr.
    pub fn run_with_retry(
        &self,
        argv: &[String],
        classify: impl Fn(&CmdOutput) -> Verdict,
    ) -> Result<CmdOutput, ExecError> {
        let cmdline = argv.join(" ");
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let out = self.runner.run(argv)?;
            debug!(
                "command={}, rc={}, out={}, err={}",
                cmdline, out.status, out.stdout, out.stderr
            );
            match classify(&out) {
                Verdict::Done => return Ok(out),
                Verdict::Fatal => {
                    return Err(ExecError::Failed {
                        cmdline,
                        status: out.status,
                        stderr: out.stderr,
                    });
                }
                Verdict::Retry => {
                    if attempt >= self.policy.max_attempts {
                        return Err(ExecError::Exhausted {
                            attempts: attempt,
                            cmdline,
                            status: out.status,
                            stderr: out.stderr,
                        });
                    }
                    warn!(
                        "failed: {}, rc={}, err={}; attempt {} of {}",
                        cmdline, out.status, out.stderr, attempt, self.policy.max_attempts
                    );
                    thread::sleep(self.policy.interval);
                }
            }
        }
    }
}
