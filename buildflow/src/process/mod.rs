//! Running external tools.
//!
//! Every stage ultimately dispatches a [`CommandSpec`] through a
//! [`ProcessRunner`]. The system runner gives each child an explicit working
//! directory and environment, captures its output, enforces timeouts and
//! kills the whole process group when a stage is aborted.

mod command;
mod env;
mod runner;
mod which;

pub use command::{CommandSpec, ProcessOutput};
pub use env::{BaseEnvironment, DEFAULT_PASSTHROUGH};
pub use runner::{ProcessRunner, SystemProcessRunner};
pub use which::find_executable;
