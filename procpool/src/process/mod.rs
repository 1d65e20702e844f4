//! Spawning, tracking and terminating pooled processes.
//!
//! This module provides an async-first pool of child processes with
//! fan-out output streaming and acknowledged stdin writes.

mod handle;
mod pool;
mod registry;
mod signal;
mod spawn;
mod stream;
mod sweeper;

pub use handle::ManagedProcess;
pub use pool::ProcessPool;
pub use stream::OutputStream;
