//! Child-process boundary for the external collaborators (downloader,
//! rasterizer, uploader, ingester). Each attempt has a timeout; failed
//! attempts are retried with exponential backoff.

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{IngestError, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub attempts: u32,
    pub initial_backoff: Duration,
    /// Per-attempt limit; `None` waits indefinitely.
    pub timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_backoff: Duration::from_secs(5),
            timeout: Some(Duration::from_secs(3600)),
        }
    }
}

impl RetryPolicy {
    pub fn once() -> Self {
        Self {
            attempts: 1,
            initial_backoff: Duration::ZERO,
            timeout: None,
        }
    }

    fn backoff(&self, failed_attempts: u32) -> Duration {
        self.initial_backoff
            .saturating_mul(2u32.saturating_pow(failed_attempts.saturating_sub(1)))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolCommand {
    program: String,
    args: Vec<OsString>,
    current_dir: Option<PathBuf>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn current_dir(mut self, dir: &Path) -> Self {
        self.current_dir = Some(dir.to_path_buf());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn arg_strings(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    /// Runs the command until it succeeds or the policy gives up.
    /// A program that cannot be spawned is not retried.
    pub fn run(&self, policy: &RetryPolicy) -> Result<()> {
        let attempts = policy.attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.run_once(policy.timeout) {
                Ok(()) => return Ok(()),
                Err(e) if attempt < attempts && !is_spawn_failure(&e) => {
                    let delay = policy.backoff(attempt);
                    warn!(
                        "{} (attempt {}/{}), retrying in {:?}",
                        e, attempt, attempts, delay
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub fn run_once(&self, timeout: Option<Duration>) -> Result<()> {
        debug!("Running: {}", self);
        let mut command = Command::new(&self.program);
        command.args(&self.args).stdin(Stdio::null());
        if let Some(dir) = &self.current_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|e| self.failure(spawn_detail(&e)))?;
        let started = Instant::now();
        loop {
            if let Some(status) = child
                .try_wait()
                .map_err(|e| self.failure(format!("wait failed: {}", e)))?
            {
                return self.check(status);
            }
            if let Some(limit) = timeout {
                if started.elapsed() >= limit {
                    if let Err(e) = child.kill() {
                        debug!("Could not kill {}: {}", self.program, e);
                    }
                    if let Err(e) = child.wait() {
                        debug!("Could not reap {}: {}", self.program, e);
                    }
                    return Err(self.failure(format!("timed out after {:?}", limit)));
                }
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    fn check(&self, status: ExitStatus) -> Result<()> {
        if status.success() {
            Ok(())
        } else {
            Err(self.failure(status.to_string()))
        }
    }

    fn failure(&self, detail: String) -> IngestError {
        IngestError::ExternalTool {
            tool: self.program.clone(),
            detail,
        }
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

const SPAWN_PREFIX: &str = "could not start: ";

fn spawn_detail(e: &std::io::Error) -> String {
    match e.kind() {
        ErrorKind::NotFound => format!("{}program not found", SPAWN_PREFIX),
        _ => format!("{}{}", SPAWN_PREFIX, e),
    }
}

fn is_spawn_failure(e: &IngestError) -> bool {
    matches!(e, IngestError::ExternalTool { detail, .. } if detail.starts_with(SPAWN_PREFIX))
}
