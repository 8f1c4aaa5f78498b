//! Ready-made pipelines.
//!
//! [`cmake`] turns the usual configure/build/test/install cycle of a CMake
//! project into a stage graph.

pub mod cmake;

pub use cmake::{BuildOptions, BuildType, CmakeCommand, CmakeProject};
