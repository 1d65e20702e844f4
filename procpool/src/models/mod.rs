//! Data models shared by the pool and its processes.

mod spec;
mod status;

pub use spec::ProcessSpec;
pub use status::{ProcessStatus, UnknownStatus};
