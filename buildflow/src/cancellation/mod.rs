//! Cooperative cancellation.
//!
//! A [`CancellationToken`] is shared by the executor and every in-flight
//! process runner. Stages that have not started observe it before launch;
//! running processes are killed when it fires.

mod token;

pub use token::{CancelCallback, CancellationToken};
