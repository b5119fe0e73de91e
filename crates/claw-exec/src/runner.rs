//! Process supervision.
//!
//! [`ProcessRunner`] spawns programs described by a [`CommandSpec`] in one of
//! two modes:
//!
//! - **run to completion**: spawn, wait (optionally bounded), return an [`Outcome`]
//! - **detached**: spawn and hand back a [`ProcessHandle`] that the caller
//!   stops later with [`ProcessHandle::stop`]
//!
//! Standard output and standard error are drained line by line into a single
//! buffer on two background tasks, so the combined output reads in roughly the
//! order it was produced. Every child is spawned with `kill_on_drop`, so a
//! handle that is dropped on an early-return path never leaks its process.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::command::CommandSpec;
use crate::error::{ExecError, Result};
use crate::outcome::Outcome;

/// How long to wait for the output drains after the child has exited.
///
/// A grandchild holding the pipes open must not stall the caller.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Anything that can execute a [`CommandSpec`].
///
/// Every component that touches the outside world goes through this trait,
/// which lets the harness state machine run against a simulated cluster in
/// tests.
pub trait CommandRunner: Send + Sync {
    /// Run the command to completion and return its outcome.
    ///
    /// A non-zero exit is reported in [`Outcome::exit_error`], not as `Err`.
    ///
    /// # Errors
    ///
    /// Returns an error if the command is invalid, cannot be launched, or
    /// exceeds its timeout.
    fn run(&self, spec: &CommandSpec) -> impl std::future::Future<Output = Result<Outcome>> + Send;

    /// Start the command and return immediately.
    ///
    /// # Errors
    ///
    /// Returns an error if the command is invalid or cannot be launched.
    fn start(&self, spec: &CommandSpec) -> Result<ProcessHandle>;
}

impl<R: CommandRunner> CommandRunner for Arc<R> {
    fn run(&self, spec: &CommandSpec) -> impl std::future::Future<Output = Result<Outcome>> + Send {
        (**self).run(spec)
    }

    fn start(&self, spec: &CommandSpec) -> Result<ProcessHandle> {
        (**self).start(spec)
    }
}

/// The real runner, backed by `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    /// Create a new runner.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl CommandRunner for ProcessRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<Outcome> {
        let handle = self.start(spec)?;
        handle.wait(spec.get_timeout()).await
    }

    fn start(&self, spec: &CommandSpec) -> Result<ProcessHandle> {
        spec.validate()?;

        let description = spec.description();
        let mut cmd = spec.to_tokio();
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| ExecError::launch(description.clone(), e))?;

        debug!(command = %description, pid = ?child.id(), "spawned process");

        let output = Arc::new(Mutex::new(String::new()));
        let mut drains = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            drains.push(tokio::spawn(drain(stdout, Arc::clone(&output))));
        }
        if let Some(stderr) = child.stderr.take() {
            drains.push(tokio::spawn(drain(stderr, Arc::clone(&output))));
        }

        Ok(ProcessHandle {
            description,
            child,
            output,
            drains,
        })
    }
}

async fn drain<R: AsyncRead + Unpin>(reader: R, sink: Arc<Mutex<String>>) {
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {
                let mut buf = sink.lock();
                buf.push_str(&String::from_utf8_lossy(&line));
                if !line.ends_with(b"\n") {
                    buf.push('\n');
                }
            }
            Err(e) => {
                debug!(error = %e, "output stream closed with error");
                break;
            }
        }
    }
}

/// Result of stopping a detached process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stopped {
    /// Exit status and combined output.
    pub outcome: Outcome,
    /// `true` when the process had already exited before `stop` was called.
    pub exited_on_its_own: bool,
}

/// An owned, running child process.
///
/// Consumed by [`ProcessHandle::wait`] or [`ProcessHandle::stop`], so each
/// handle is finished exactly once. Dropping it kills the child.
#[derive(Debug)]
pub struct ProcessHandle {
    description: String,
    child: Child,
    output: Arc<Mutex<String>>,
    drains: Vec<JoinHandle<()>>,
}

impl ProcessHandle {
    /// The command line this handle was started with.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// OS process id, while the process has not been reaped.
    #[must_use]
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Output captured so far.
    #[must_use]
    pub fn output_snapshot(&self) -> String {
        self.output.lock().clone()
    }

    /// Whether the process has already exited.
    ///
    /// # Errors
    ///
    /// Returns an error if the status cannot be queried.
    pub fn has_exited(&mut self) -> Result<bool> {
        Ok(self.child.try_wait()?.is_some())
    }

    /// Wait for the process to exit on its own.
    ///
    /// With a `timeout`, a process still running at the deadline is killed and
    /// `Timeout` is returned carrying the output captured so far.
    ///
    /// # Errors
    ///
    /// Returns an error on timeout or if waiting fails.
    pub async fn wait(mut self, timeout: Option<Duration>) -> Result<Outcome> {
        let status = match timeout {
            Some(limit) => {
                if let Ok(status) = tokio::time::timeout(limit, self.child.wait()).await {
                    status?
                } else {
                    warn!(command = %self.description, timeout_secs = limit.as_secs(), "process timed out, killing");
                    self.kill().await?;
                    let output = self.collect().await;
                    return Err(ExecError::timeout(self.description, limit, output));
                }
            }
            None => self.child.wait().await?,
        };

        let output = self.collect().await;
        let outcome = Outcome::from_status(status, output);
        debug!(
            command = %self.description,
            exit = ?outcome.exit_error,
            output = %outcome.output,
            "process finished"
        );
        Ok(outcome)
    }

    /// Kill the process and collect its output.
    ///
    /// On Unix this sends `SIGKILL`, so the process gets no chance to shut
    /// down cleanly and a `SIGTERM` handler never runs.
    ///
    /// Safe to call when the process has already exited: nothing is signalled
    /// and the recorded status is returned.
    ///
    /// # Errors
    ///
    /// Returns an error only if the OS refuses the signal or the wait.
    pub async fn stop(mut self) -> Result<Stopped> {
        let exited_on_its_own = self.child.try_wait()?.is_some();
        if exited_on_its_own {
            debug!(command = %self.description, "process already exited");
        } else {
            self.kill().await?;
        }

        let status = self.child.wait().await?;
        let output = self.collect().await;
        let outcome = Outcome::from_status(status, output);
        debug!(
            command = %self.description,
            exit = ?outcome.exit_error,
            exited_on_its_own,
            "process stopped"
        );
        Ok(Stopped {
            outcome,
            exited_on_its_own,
        })
    }

    async fn kill(&mut self) -> Result<()> {
        match self.child.start_kill() {
            Ok(()) => {}
            // Raced with a natural exit.
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => {}
            Err(e) => return Err(e.into()),
        }
        self.child.wait().await?;
        Ok(())
    }

    async fn collect(&mut self) -> String {
        for drain in self.drains.drain(..) {
            if tokio::time::timeout(DRAIN_GRACE, drain).await.is_err() {
                debug!(command = %self.description, "output drain did not finish");
            }
        }
        std::mem::take(&mut *self.output.lock())
    }
}
