//! Termination signals.

use std::io;

/// Signal used to ask a process to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Graceful stop (SIGINT).
    Interrupt,
    /// Forceful stop (SIGTERM).
    Kill,
}

impl Termination {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Interrupt => "SIGINT",
            Self::Kill => "SIGTERM",
        }
    }
}

/// Deliver `signal` to `pid`.
///
/// Returns `Ok(false)` when the process no longer exists.
#[cfg(unix)]
pub fn send(pid: u32, signal: Termination) -> io::Result<bool> {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let raw = i32::try_from(pid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
    let sig = match signal {
        Termination::Interrupt => Signal::SIGINT,
        Termination::Kill => Signal::SIGTERM,
    };

    match kill(Pid::from_raw(raw), sig) {
        Ok(()) => Ok(true),
        Err(Errno::ESRCH) => Ok(false),
        Err(errno) => Err(io::Error::from(errno)),
    }
}

#[cfg(not(unix))]
pub fn send(_pid: u32, signal: Termination) -> io::Result<bool> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        format!("{} is not supported on this platform", signal.as_str()),
    ))
}
