//! Stage fingerprints.
//!
//! A fingerprint is the SHA-256 of everything that determines a stage's
//! output: the command descriptor, the content of every matched input file,
//! the value of every declared config key and the fingerprints of its
//! dependencies.

use super::glob::{to_slash, GlobSet};
use super::InputSource;
use crate::errors::FingerprintError;
use crate::pipeline::StageSpec;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::path::Path;

/// Bumped whenever the hashed layout changes, invalidating old stores.
const FINGERPRINT_VERSION: &str = "buildflow-fingerprint-v2";

/// Value hashed for a config key or dependency that has no value.
const UNSET: &str = "\u{0}unset";

/// A lowercase hex SHA-256 digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Wraps an existing hex digest.
    #[must_use]
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    /// Returns the hex digest.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the first 12 characters, for log lines.
    #[must_use]
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hashes a file's content.
///
/// # Errors
///
/// Returns [`FingerprintError::Io`] if the file cannot be read.
pub fn hash_file(path: &Path) -> Result<String, FingerprintError> {
    let io_err = |source| FingerprintError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut file = File::open(path).map_err(io_err)?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher).map_err(io_err)?;
    Ok(hex::encode(hasher.finalize()))
}

/// Computes the fingerprint of `stage` with files resolved against `root`.
///
/// `upstream` pairs each dependency name with its fingerprint; a dependency
/// without one (not cacheable, or never recorded) still contributes its name.
///
/// # Errors
///
/// Returns a [`FingerprintError`] if an input cannot be read or a pattern
/// does not compile.
pub fn compute(
    stage: &StageSpec,
    root: &Path,
    config: &BTreeMap<String, String>,
    upstream: &[(&str, Option<&Fingerprint>)],
) -> Result<Fingerprint, FingerprintError> {
    let mut hasher = Sha256::new();
    field(&mut hasher, "version", FINGERPRINT_VERSION);
    field(&mut hasher, "command", &serde_json::to_string(&stage.command)?);

    for input in &stage.inputs {
        match input {
            InputSource::Files { include, exclude } => {
                let globs = GlobSet::new(include.as_slice(), exclude.as_slice())?;
                for relative in globs.matched_files(root)? {
                    let digest = hash_file(&root.join(&relative))?;
                    field(&mut hasher, "file", &to_slash(&relative));
                    field(&mut hasher, "content", &digest);
                }
            }
            InputSource::Config { key } => {
                field(&mut hasher, "config", key);
                field(
                    &mut hasher,
                    "value",
                    config.get(key).map_or(UNSET, String::as_str),
                );
            }
        }
    }

    for &(name, fingerprint) in upstream {
        field(&mut hasher, "upstream", name);
        field(
            &mut hasher,
            "fingerprint",
            fingerprint.map_or(UNSET, Fingerprint::as_str),
        );
    }

    Ok(Fingerprint(hex::encode(hasher.finalize())))
}

/// Feeds a length-prefixed labelled field so adjacent fields cannot blur.
fn field(hasher: &mut Sha256, label: &str, value: &str) {
    hasher.update(label.as_bytes());
    hasher.update((value.len() as u64).to_le_bytes());
    hasher.update(value.as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::CommandSpec;
    use tempfile::TempDir;

    fn project() -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/main.cpp"), "int main() {}").unwrap();
        std::fs::write(dir.path().join("CMakeLists.txt"), "project(x)").unwrap();
        dir
    }

    fn stage() -> StageSpec {
        StageSpec::new("build", CommandSpec::new("cmake").args(["--build", "build"]))
            .with_input(InputSource::files(["src/**/*.cpp", "CMakeLists.txt"]))
            .with_input(InputSource::config("build_type"))
    }

    fn config(build_type: &str) -> BTreeMap<String, String> {
        BTreeMap::from([("build_type".to_string(), build_type.to_string())])
    }

    #[test]
    fn test_stable_across_calls() {
        let dir = project();
        let a = compute(&stage(), dir.path(), &config("Debug"), &[]).unwrap();
        let b = compute(&stage(), dir.path(), &config("Debug"), &[]).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
        assert_eq!(a.short().len(), 12);
    }

    #[test]
    fn test_file_content_changes_fingerprint() {
        let dir = project();
        let before = compute(&stage(), dir.path(), &config("Debug"), &[]).unwrap();
        std::fs::write(dir.path().join("src/main.cpp"), "int main() { return 1; }").unwrap();
        let after = compute(&stage(), dir.path(), &config("Debug"), &[]).unwrap();
        assert_ne!(before, after);
    }

    #[test]
    fn test_new_file_changes_fingerprint() {
        let dir = project();
        let before = compute(&stage(), dir.path(), &config("Debug"), &[]).unwrap();
        std::fs::write(dir.path().join("src/extra.cpp"), "").unwrap();
        let after = compute(&stage(), dir.path(), &config("Debug"), &[]).unwrap();
        assert_ne!(before, after);
    }

    #[test]
    fn test_config_and_command_change_fingerprint() {
        let dir = project();
        let base = compute(&stage(), dir.path(), &config("Debug"), &[]).unwrap();
        let release = compute(&stage(), dir.path(), &config("Release"), &[]).unwrap();
        let unset = compute(&stage(), dir.path(), &BTreeMap::new(), &[]).unwrap();
        assert_ne!(base, release);
        assert_ne!(base, unset);

        let mut other = stage();
        other.command = other.command.arg("--verbose");
        assert_ne!(base, compute(&other, dir.path(), &config("Debug"), &[]).unwrap());
    }

    #[test]
    fn test_unrelated_file_does_not_change_fingerprint() {
        let dir = project();
        let before = compute(&stage(), dir.path(), &config("Debug"), &[]).unwrap();
        std::fs::write(dir.path().join("README.md"), "docs").unwrap();
        let after = compute(&stage(), dir.path(), &config("Debug"), &[]).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_dependency_fingerprint_changes_fingerprint() {
        let dir = project();
        let old = Fingerprint::from_hex("a".repeat(64));
        let new = Fingerprint::from_hex("b".repeat(64));
        let debug = config("Debug");

        let before = compute(&stage(), dir.path(), &debug, &[("configure", Some(&old))]).unwrap();
        let same = compute(&stage(), dir.path(), &debug, &[("configure", Some(&old))]).unwrap();
        let after = compute(&stage(), dir.path(), &debug, &[("configure", Some(&new))]).unwrap();
        let unknown = compute(&stage(), dir.path(), &debug, &[("configure", None)]).unwrap();

        assert_eq!(before, same);
        assert_ne!(before, after);
        assert_ne!(before, unknown);
        assert_ne!(unknown, compute(&stage(), dir.path(), &debug, &[]).unwrap());
    }
}
