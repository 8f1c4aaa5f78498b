//! Incremental execution.
//!
//! The [`IncrementalTracker`] fingerprints each cacheable stage's declared
//! inputs and compares the result with the fingerprint persisted after the
//! stage last succeeded. Matching fingerprints let the executor skip the
//! stage as unchanged.

mod fingerprint;
mod glob;
mod store;
mod tracker;

pub use fingerprint::{compute as compute_fingerprint, hash_file, Fingerprint};
pub use glob::{to_slash, GlobSet};
pub use store::{FingerprintStore, StoreEntry, STORE_VERSION};
pub use tracker::{IncrementalTracker, RunDecision, RunReason};

use serde::{Deserialize, Serialize};

/// A declared input of a stage's fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InputSource {
    /// Files under the project root matching `include` but not `exclude`.
    Files {
        /// Include globs.
        include: Vec<String>,
        /// Exclude globs.
        #[serde(default)]
        exclude: Vec<String>,
    },
    /// A configuration value, looked up by key in the tracker's config.
    Config {
        /// The config key.
        key: String,
    },
}

impl InputSource {
    /// Files matching any of `include`.
    #[must_use]
    pub fn files<I, S>(include: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Files {
            include: include.into_iter().map(Into::into).collect(),
            exclude: Vec::new(),
        }
    }

    /// Adds exclude globs to a `Files` source; other sources are returned unchanged.
    #[must_use]
    pub fn excluding<I, S>(self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        match self {
            Self::Files { include, mut exclude } => {
                exclude.extend(patterns.into_iter().map(Into::into));
                Self::Files { include, exclude }
            }
            other @ Self::Config { .. } => other,
        }
    }

    /// A configuration value.
    #[must_use]
    pub fn config(key: impl Into<String>) -> Self {
        Self::Config { key: key.into() }
    }
}
