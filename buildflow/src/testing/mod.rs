//! Testing utilities for buildflow pipelines.
//!
//! [`ScriptedRunner`] stands in for [`SystemProcessRunner`](crate::process::SystemProcessRunner)
//! so executor behavior can be tested without spawning processes: each
//! program gets a scripted outcome, and the runner records launches and
//! peak concurrency.

mod scripted;

pub use scripted::{Script, ScriptedRunner};
