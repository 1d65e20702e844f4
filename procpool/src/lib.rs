//! procpool - a bounded pool of OS processes.
//!
//! Architecture:
//! - `ProcessPool` admits processes up to `max_concurrent` and owns the registry
//! - Each `ManagedProcess` tracks its lifecycle and exposes stdin and fan-out stdout/stderr
//! - Exit observers, an optional health-check sweeper and the pool's drop
//!   all reclaim slots of processes that are gone

pub mod config;
pub mod error;
pub mod models;
pub mod process;

pub use config::{Manifest, PoolConfig};
pub use error::{PoolError, Result, WriteError};
pub use models::{ProcessSpec, ProcessStatus, UnknownStatus};
pub use process::{ManagedProcess, OutputStream, ProcessPool};
