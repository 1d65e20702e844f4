//! Process pool for managing multiple concurrent processes.
//!
//! The pool admits processes up to a fixed cap, keeps them in a registry
//! keyed by caller-chosen id, and unregisters them when they exit, when
//! they are killed or interrupted through the pool, when the health-check
//! sweeper finds them dead, or when the pool itself shuts down.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::handle::ManagedProcess;
use super::registry::Registry;
use super::signal::Termination;
use super::spawn::launch;
use super::sweeper;
use crate::config::PoolConfig;
use crate::error::{PoolError, Result};
use crate::models::ProcessSpec;

/// A pool of OS processes with a concurrency cap.
///
/// Dropping the pool terminates every process still registered.
///
/// # Example
///
/// ```rust,no_run
/// use procpool::{PoolConfig, ProcessPool, ProcessSpec};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     // Create a pool with max 4 concurrent processes
///     let pool = ProcessPool::new(PoolConfig::new(4))?;
///
///     let echo = pool.spawn("echo", ProcessSpec::new("cat"))?;
///     let output = echo.stdout();
///     echo.write("hello\n").await?;
///     echo.close_stdin().await;
///
///     println!("{}", output.read_to_string().await?);
///     println!("exited with {}", echo.wait().await);
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct ProcessPool {
    config: PoolConfig,

    /// Registered processes; the only authority on slot occupancy.
    registry: Arc<Registry>,

    /// Counter for telling apart processes that reuse an id.
    next_serial: AtomicU64,

    /// Cancels the sweeper and every output pump.
    cancel: CancellationToken,

    finalized: AtomicBool,

    sweeper: Option<JoinHandle<()>>,
}

impl ProcessPool {
    /// Create a pool. Must be called from within a Tokio runtime.
    pub fn new(config: PoolConfig) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(Registry::default());
        let cancel = CancellationToken::new();
        let sweeper = config.health_check_interval.map(|period| {
            sweeper::start(Arc::downgrade(&registry), period, cancel.child_token())
        });

        info!(
            max_concurrent = config.max_concurrent,
            health_check_interval = ?config.health_check_interval,
            "Process pool created"
        );

        Ok(Self {
            config,
            registry,
            next_serial: AtomicU64::new(0),
            cancel,
            finalized: AtomicBool::new(false),
            sweeper,
        })
    }

    /// The configuration this pool was created with.
    pub const fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Launch `spec` under `id`.
    ///
    /// Fails without side effects if the pool is full or `id` is taken.
    /// Returns once the OS has either assigned a pid or refused the launch.
    pub fn spawn(&self, id: impl Into<String>, spec: ProcessSpec) -> Result<Arc<ManagedProcess>> {
        let id = id.into();
        let serial = self.next_serial.fetch_add(1, Ordering::SeqCst);
        let backlog = self.config.backlog_capacity;

        let process = self
            .registry
            .admit(&id, self.config.max_concurrent, || {
                launch(&id, spec, serial, backlog, &self.cancel)
            })
            .inspect_err(|e| debug!(id = %id, error = %e, "Spawn rejected"))?;

        info!(
            id = %id,
            pid = ?process.pid(),
            command = %process.spec().command,
            "Process spawned"
        );

        observe_exit(Arc::downgrade(&self.registry), process.clone());
        Ok(process)
    }

    /// Look up a registered process.
    pub fn get(&self, id: &str) -> Result<Arc<ManagedProcess>> {
        self.registry.get(id).ok_or_else(|| PoolError::not_found(id))
    }

    /// Whether `id` currently occupies a slot.
    pub fn has(&self, id: &str) -> bool {
        self.registry.contains(id)
    }

    /// Number of occupied slots.
    pub fn size(&self) -> usize {
        self.registry.len()
    }

    /// Ids currently registered, sorted.
    pub fn ids(&self) -> Vec<String> {
        self.registry.ids()
    }

    /// Unregister `id` and send it SIGTERM.
    ///
    /// The slot is freed before this returns, without waiting for the exit.
    pub fn kill(&self, id: &str) -> Result<()> {
        self.terminate(id, Termination::Kill)
    }

    /// Unregister `id` and send it SIGINT.
    pub fn interrupt(&self, id: &str) -> Result<()> {
        self.terminate(id, Termination::Interrupt)
    }

    fn terminate(&self, id: &str, sig: Termination) -> Result<()> {
        let process = self.registry.remove(id).ok_or_else(|| PoolError::not_found(id))?;
        debug!(id, signal = sig.as_str(), "Unregistered process for termination");

        match sig {
            Termination::Interrupt => process.interrupt(),
            Termination::Kill => process.kill(),
        }
    }

    /// Kill and unregister every process. Never fails.
    pub fn kill_all(&self) {
        let processes = self.registry.drain();
        debug!(count = processes.len(), "Killing all processes");
        kill_each(processes);
    }

    /// Stop the sweeper, refuse new spawns, and kill every process.
    ///
    /// Runs at most once; later calls and the drop of the pool are no-ops.
    pub fn shutdown(&self) {
        if self.finalized.swap(true, Ordering::SeqCst) {
            return;
        }

        self.cancel.cancel();
        if let Some(ref sweeper) = self.sweeper {
            sweeper.abort();
        }

        let remaining = self.registry.close();
        info!(remaining = remaining.len(), "Shutting down process pool");
        kill_each(remaining);
    }
}

impl Drop for ProcessPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn kill_each(processes: Vec<Arc<ManagedProcess>>) {
    for process in processes {
        if let Err(e) = process.kill() {
            warn!(id = process.id(), error = %e, "Failed to kill process during cleanup");
        }
    }
}

/// Wait for `process` to exit, record the outcome and unregister it.
fn observe_exit(registry: Weak<Registry>, process: Arc<ManagedProcess>) {
    tokio::spawn(async move {
        let outcome = process.reap().await;
        let status = process.status();

        match outcome {
            Ok(exit) => info!(id = process.id(), %status, code = ?exit.code(), "Process exited"),
            Err(e) => warn!(id = process.id(), %status, error = %e, "Failed to wait for process"),
        }

        if let Some(registry) = registry.upgrade() {
            if registry.remove_if_current(process.id(), process.serial()) {
                debug!(id = process.id(), "Exit observer unregistered process");
            }
        }
    });
}
