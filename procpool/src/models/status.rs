//! Lifecycle status of a managed process.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// A status name that is not one of the known lowercase names.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown process status: {0}")]
pub struct UnknownStatus(pub String);

/// Status of a managed process.
///
/// `Stopped` and `Error` are terminal; once reached, the status never changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    /// Spawn issued, no pid observed yet.
    Starting,
    /// The OS assigned a pid and the process has not been signaled.
    Running,
    /// Reserved; no transition currently enters this state.
    Idle,
    /// A termination signal was delivered and exit is pending.
    Stopping,
    /// Exited cleanly or because it was signaled.
    Stopped,
    /// Exited non-zero without being signaled, or the OS reported an error.
    Error,
}

impl ProcessStatus {
    /// Convert status to its lowercase name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Idle => "idle",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Error => "error",
        }
    }

    /// Whether the process has fully terminated.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Error)
    }

    /// Whether the process may still be signaled.
    pub const fn is_alive(self) -> bool {
        matches!(self, Self::Starting | Self::Running | Self::Idle)
    }
}

impl FromStr for ProcessStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "starting" => Ok(Self::Starting),
            "running" => Ok(Self::Running),
            "idle" => Ok(Self::Idle),
            "stopping" => Ok(Self::Stopping),
            "stopped" => Ok(Self::Stopped),
            "error" => Ok(Self::Error),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

impl std::fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
