//! Handle to one spawned process.

use chrono::{DateTime, Utc};
use std::future::{poll_fn, Future};
use std::io;
use std::pin::pin;
use std::process::ExitStatus;
use std::sync::{Arc, MutexGuard, PoisonError};
use std::task::Poll;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin};
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::signal::{self, Termination};
use super::stream::{start_pump, OutputChannel, OutputStream};
use crate::error::{PoolError, Result, WriteError};
use crate::models::{ProcessSpec, ProcessStatus};

#[derive(Debug, Clone, Copy)]
struct Lifecycle {
    status: ProcessStatus,
    signaled: bool,
    exit_code: Option<i32>,
}

/// A process owned by a [`ProcessPool`](crate::ProcessPool).
///
/// Identity and spec never change; status moves forward through
/// `starting -> running -> stopping -> stopped | error`.
#[derive(Debug)]
pub struct ManagedProcess {
    id: String,
    spec: ProcessSpec,
    serial: u64,
    pid: Option<u32>,
    started_at: DateTime<Utc>,
    state: watch::Sender<Lifecycle>,
    /// Reaping and signaling both happen under this lock, so a signal can
    /// never reach a pid the OS has already recycled.
    child: std::sync::Mutex<Child>,
    stdin: Mutex<Option<ChildStdin>>,
    stdout: Arc<OutputChannel>,
    stderr: Arc<OutputChannel>,
}

impl ManagedProcess {
    /// Take ownership of `child` and start draining its output.
    pub(crate) fn new(
        id: String,
        spec: ProcessSpec,
        serial: u64,
        mut child: Child,
        backlog_capacity: usize,
        cancel: &CancellationToken,
    ) -> Self {
        let pid = child.id();
        let status = if pid.is_some() {
            ProcessStatus::Running
        } else {
            ProcessStatus::Starting
        };
        let (state, _) = watch::channel(Lifecycle {
            status,
            signaled: false,
            exit_code: None,
        });

        let stdout = OutputChannel::new("stdout", backlog_capacity);
        let stderr = OutputChannel::new("stderr", backlog_capacity);
        start_pump(stdout.clone(), child.stdout.take(), cancel.clone());
        start_pump(stderr.clone(), child.stderr.take(), cancel.clone());
        let stdin = Mutex::new(child.stdin.take());

        Self {
            id,
            spec,
            serial,
            pid,
            started_at: Utc::now(),
            state,
            child: std::sync::Mutex::new(child),
            stdin,
            stdout,
            stderr,
        }
    }

    /// Pool id of this process.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// What was launched.
    pub const fn spec(&self) -> &ProcessSpec {
        &self.spec
    }

    /// OS process id, if one was assigned.
    pub const fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// When the process was spawned.
    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Current lifecycle status.
    pub fn status(&self) -> ProcessStatus {
        self.state.borrow().status
    }

    /// Exit code, once the process has exited normally.
    pub fn exit_code(&self) -> Option<i32> {
        self.state.borrow().exit_code
    }

    /// Distinguishes processes that reused the same id.
    pub(crate) const fn serial(&self) -> u64 {
        self.serial
    }

    fn lock_child(&self) -> MutexGuard<'_, Child> {
        self.child.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Ask the process to stop gracefully (SIGINT).
    ///
    /// Does nothing if the process has exited or was already signaled.
    pub fn interrupt(&self) -> Result<()> {
        self.terminate(Termination::Interrupt)
    }

    /// Terminate the process (SIGTERM).
    ///
    /// Does nothing if the process has exited or was already signaled.
    pub fn kill(&self) -> Result<()> {
        self.terminate(Termination::Kill)
    }

    fn terminate(&self, sig: Termination) -> Result<()> {
        let Some(pid) = self.pid else {
            return Ok(());
        };
        // Held until the signal is sent: the exit cannot be reaped meanwhile.
        let _child = self.lock_child();

        let claimed = self.state.send_if_modified(|state| {
            if state.status.is_alive() && !state.signaled {
                state.signaled = true;
                state.status = ProcessStatus::Stopping;
                true
            } else {
                false
            }
        });
        if !claimed {
            return Ok(());
        }

        match signal::send(pid, sig) {
            Ok(delivered) => {
                debug!(id = %self.id, pid, signal = sig.as_str(), delivered, "Signaled process");
                Ok(())
            }
            Err(source) => {
                // Undo the claim so a later request can retry.
                self.state.send_if_modified(|state| {
                    if state.status == ProcessStatus::Stopping {
                        state.signaled = false;
                        state.status = ProcessStatus::Running;
                        true
                    } else {
                        false
                    }
                });
                Err(PoolError::Signal {
                    id: self.id.clone(),
                    source,
                })
            }
        }
    }

    /// Write `data` to the process's stdin and flush it.
    pub async fn write(&self, data: impl AsRef<[u8]>) -> Result<()> {
        if self.status().is_terminal() {
            return Err(PoolError::write(&self.id, WriteError::Exited));
        }

        let mut guard = self.stdin.lock().await;
        let stdin = guard
            .as_mut()
            .ok_or_else(|| PoolError::write(&self.id, WriteError::NoStdin))?;

        stdin
            .write_all(data.as_ref())
            .await
            .map_err(|e| PoolError::write(&self.id, e))?;
        stdin
            .flush()
            .await
            .map_err(|e| PoolError::write(&self.id, e))
    }

    /// Close stdin so the process reads end-of-file.
    pub async fn close_stdin(&self) {
        if self.stdin.lock().await.take().is_some() {
            debug!(id = %self.id, "Closed stdin");
        }
    }

    /// Attach a new consumer to stdout.
    pub fn stdout(&self) -> OutputStream {
        self.stdout.subscribe()
    }

    /// Attach a new consumer to stderr.
    pub fn stderr(&self) -> OutputStream {
        self.stderr.subscribe()
    }

    /// Wait until the process reaches a terminal status.
    pub async fn wait(&self) -> ProcessStatus {
        let mut rx = self.state.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        rx.wait_for(|state| state.status.is_terminal())
            .await
            .map_or_else(|_| self.status(), |state| state.status)
    }

    /// Wait for the OS process to exit, reap it and record the outcome.
    ///
    /// The reap and the status update happen under the child lock, so
    /// [`kill`](Self::kill) sees either a live process or a terminal status.
    pub(crate) async fn reap(&self) -> io::Result<ExitStatus> {
        poll_fn(|cx| {
            let mut child = self.lock_child();
            let polled = {
                // `Child::wait` is cancel safe.
                let wait = pin!(child.wait());
                wait.poll(cx)
            };
            if let Poll::Ready(ref outcome) = polled {
                self.record_exit(outcome);
            }
            polled
        })
        .await
    }

    /// Record how the process ended. A terminal status is never overwritten.
    fn record_exit(&self, outcome: &io::Result<ExitStatus>) {
        self.state.send_if_modified(|state| {
            if state.status.is_terminal() {
                return false;
            }
            state.status = match outcome {
                Ok(exit) => {
                    state.exit_code = exit.code();
                    if state.signaled || exit.success() || killed_by_signal(exit) {
                        ProcessStatus::Stopped
                    } else {
                        ProcessStatus::Error
                    }
                }
                Err(_) => ProcessStatus::Error,
            };
            true
        });
    }
}

#[cfg(unix)]
fn killed_by_signal(exit: &ExitStatus) -> bool {
    use std::os::unix::process::ExitStatusExt;
    exit.signal().is_some()
}

#[cfg(not(unix))]
const fn killed_by_signal(_exit: &ExitStatus) -> bool {
    false
}
