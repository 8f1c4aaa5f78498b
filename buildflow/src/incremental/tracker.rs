//! Skip decisions for cacheable stages.

use super::fingerprint::compute;
use super::store::{FingerprintStore, StoreEntry};
use super::Fingerprint;
use crate::errors::{BuildflowError, FingerprintError};
use crate::pipeline::StageSpec;
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Why a stage has to run, or why it may be skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunReason {
    /// The stage is not cacheable.
    NotCacheable,
    /// The tracker was created with `force`.
    Forced,
    /// No fingerprint was recorded for the stage.
    NoPreviousRun,
    /// The inputs changed since the recorded run.
    InputsChanged,
    /// A declared output does not exist.
    OutputMissing {
        /// The missing path.
        path: PathBuf,
    },
    /// The fingerprint could not be computed.
    FingerprintUnavailable {
        /// Why.
        error: String,
    },
    /// Nothing changed; the stage may be skipped.
    Unchanged,
}

impl fmt::Display for RunReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotCacheable => write!(f, "not cacheable"),
            Self::Forced => write!(f, "forced"),
            Self::NoPreviousRun => write!(f, "no previous run"),
            Self::InputsChanged => write!(f, "inputs changed"),
            Self::OutputMissing { path } => write!(f, "output '{}' missing", path.display()),
            Self::FingerprintUnavailable { error } => write!(f, "fingerprint unavailable: {error}"),
            Self::Unchanged => write!(f, "unchanged"),
        }
    }
}

/// The tracker's verdict for one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunDecision {
    /// Whether the stage has to run.
    pub run: bool,
    /// The fresh fingerprint, when it could be computed.
    pub fingerprint: Option<Fingerprint>,
    /// Why.
    pub reason: RunReason,
}

impl RunDecision {
    fn run(reason: RunReason, fingerprint: Option<Fingerprint>) -> Self {
        Self {
            run: true,
            fingerprint,
            reason,
        }
    }
}

/// Decides which cacheable stages may be skipped, and owns the store.
#[derive(Debug)]
pub struct IncrementalTracker {
    root: PathBuf,
    config: BTreeMap<String, String>,
    store: Mutex<FingerprintStore>,
    /// Fingerprints computed in this invocation, by stage name.
    current: Mutex<BTreeMap<String, Fingerprint>>,
    force: bool,
}

impl IncrementalTracker {
    /// Opens the tracker for the project at `root` with the store at `store_path`.
    ///
    /// A relative `store_path` is resolved against `root`.
    #[must_use]
    pub fn open(root: impl Into<PathBuf>, store_path: impl AsRef<Path>) -> Self {
        let root = root.into();
        let store_path = root.join(store_path);
        Self {
            store: Mutex::new(FingerprintStore::open(store_path)),
            root,
            config: BTreeMap::new(),
            current: Mutex::new(BTreeMap::new()),
            force: false,
        }
    }

    /// Sets the config values that `InputSource::Config` keys resolve to.
    #[must_use]
    pub fn with_config(mut self, config: BTreeMap<String, String>) -> Self {
        self.config = config;
        self
    }

    /// Adds one config value.
    #[must_use]
    pub fn with_config_value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    /// Forces every stage to run.
    #[must_use]
    pub const fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Returns the project root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the store file path.
    #[must_use]
    pub fn store_path(&self) -> PathBuf {
        self.store.lock().path().to_path_buf()
    }

    /// Computes a stage's current fingerprint.
    ///
    /// Each dependency contributes the fingerprint computed for it in this
    /// invocation, or else the recorded one, so a dependency whose inputs
    /// changed changes its dependents' fingerprints too.
    ///
    /// # Errors
    ///
    /// Returns a [`FingerprintError`] if an input cannot be read.
    pub fn fingerprint(&self, stage: &StageSpec) -> Result<Fingerprint, FingerprintError> {
        let upstream = self.upstream(stage);
        let pairs: Vec<(&str, Option<&Fingerprint>)> = upstream
            .iter()
            .map(|(name, fp)| (name.as_str(), fp.as_ref()))
            .collect();
        compute(stage, &self.root, &self.config, &pairs)
    }

    fn upstream(&self, stage: &StageSpec) -> Vec<(String, Option<Fingerprint>)> {
        let current = self.current.lock();
        let store = self.store.lock();
        stage
            .dependencies
            .iter()
            .map(|dep| {
                let fp = current
                    .get(dep)
                    .or_else(|| store.get(dep).map(|e| &e.fingerprint))
                    .cloned();
                (dep.clone(), fp)
            })
            .collect()
    }

    /// Decides whether `stage` has to run.
    ///
    /// Dependencies must be decided first; see [`fingerprint`](Self::fingerprint).
    #[must_use]
    pub fn decide(&self, stage: &StageSpec) -> RunDecision {
        if !stage.cacheable {
            return RunDecision::run(RunReason::NotCacheable, None);
        }

        let fingerprint = match self.fingerprint(stage) {
            Ok(fp) => {
                self.current.lock().insert(stage.name.clone(), fp.clone());
                fp
            }
            Err(e) => {
                warn!(stage = %stage.name, error = %e, "cannot fingerprint stage inputs");
                return RunDecision::run(
                    RunReason::FingerprintUnavailable {
                        error: e.to_string(),
                    },
                    None,
                );
            }
        };

        if self.force {
            return RunDecision::run(RunReason::Forced, Some(fingerprint));
        }
        if let Some(missing) = stage.outputs.iter().find(|p| !self.root.join(p).exists()) {
            return RunDecision::run(
                RunReason::OutputMissing {
                    path: missing.clone(),
                },
                Some(fingerprint),
            );
        }

        let previous = self
            .store
            .lock()
            .get(&stage.name)
            .map(|e| e.fingerprint.clone());
        match previous {
            None => RunDecision::run(RunReason::NoPreviousRun, Some(fingerprint)),
            Some(prev) if prev != fingerprint => {
                debug!(
                    stage = %stage.name,
                    previous = prev.short(),
                    current = fingerprint.short(),
                    "fingerprint changed"
                );
                RunDecision::run(RunReason::InputsChanged, Some(fingerprint))
            }
            Some(_) => RunDecision {
                run: false,
                fingerprint: Some(fingerprint),
                reason: RunReason::Unchanged,
            },
        }
    }

    /// Returns true if `stage` has to run.
    #[must_use]
    pub fn should_run(&self, stage: &StageSpec) -> bool {
        self.decide(stage).run
    }

    /// Returns the recorded entry for a stage.
    #[must_use]
    pub fn previous(&self, stage: &str) -> Option<StoreEntry> {
        self.store.lock().get(stage).cloned()
    }

    /// Records a successful run and persists the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    pub fn record_success(
        &self,
        stage: &str,
        fingerprint: &Fingerprint,
        duration_ms: Option<i64>,
    ) -> Result<(), BuildflowError> {
        let mut store = self.store.lock();
        store.insert(
            stage,
            StoreEntry {
                fingerprint: fingerprint.clone(),
                recorded_at: Utc::now(),
                duration_ms,
            },
        );
        store.persist()
    }

    /// Removes a stage's entry before it runs, so a failed or interrupted
    /// run cannot leave an "unchanged" entry behind.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    pub fn invalidate(&self, stage: &str) -> Result<(), BuildflowError> {
        let mut store = self.store.lock();
        if store.remove(stage).is_some() {
            store.persist()?;
        }
        Ok(())
    }

    /// Rewrites the store if it was unusable when opened.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    pub fn flush(&self) -> Result<(), BuildflowError> {
        let mut store = self.store.lock();
        if store.was_recovered() {
            store.persist()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::incremental::InputSource;
    use crate::process::CommandSpec;
    use tempfile::TempDir;

    const STORE: &str = ".buildflow/fingerprints.json";

    fn project() -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/lib.cpp"), "int f();").unwrap();
        dir
    }

    fn compile() -> StageSpec {
        StageSpec::new("compile", CommandSpec::new("cc"))
            .with_input(InputSource::files(["src/*.cpp"]))
            .cacheable()
    }

    fn run_and_record(tracker: &IncrementalTracker, stage: &StageSpec) {
        let decision = tracker.decide(stage);
        tracker.invalidate(&stage.name).unwrap();
        if let Some(fp) = decision.fingerprint {
            tracker.record_success(&stage.name, &fp, Some(1)).unwrap();
        }
    }

    #[test]
    fn test_first_run_then_unchanged() {
        let dir = project();
        let tracker = IncrementalTracker::open(dir.path(), STORE);
        let stage = compile();

        let first = tracker.decide(&stage);
        assert!(first.run);
        assert_eq!(first.reason, RunReason::NoPreviousRun);
        run_and_record(&tracker, &stage);

        // A fresh tracker reads the persisted store.
        let tracker = IncrementalTracker::open(dir.path(), STORE);
        let second = tracker.decide(&stage);
        assert!(!second.run);
        assert_eq!(second.reason, RunReason::Unchanged);
        assert!(!tracker.should_run(&stage));
    }

    #[test]
    fn test_not_cacheable_always_runs() {
        let dir = project();
        let tracker = IncrementalTracker::open(dir.path(), STORE);
        let mut stage = compile();
        stage.cacheable = false;

        run_and_record(&tracker, &stage);
        assert_eq!(tracker.decide(&stage).reason, RunReason::NotCacheable);
        assert!(tracker.previous("compile").is_none());
    }

    #[test]
    fn test_changed_input_runs() {
        let dir = project();
        let tracker = IncrementalTracker::open(dir.path(), STORE);
        let stage = compile();
        run_and_record(&tracker, &stage);

        std::fs::write(dir.path().join("src/lib.cpp"), "int f() { return 0; }").unwrap();
        assert_eq!(tracker.decide(&stage).reason, RunReason::InputsChanged);
    }

    #[test]
    fn test_changed_dependency_runs_dependent() {
        let dir = project();
        std::fs::write(dir.path().join("CMakeLists.txt"), "project(x)").unwrap();
        let configure = StageSpec::new("configure", CommandSpec::new("cmake"))
            .with_input(InputSource::files(["CMakeLists.txt"]))
            .cacheable();
        let stage = compile().with_dependency("configure");

        let tracker = IncrementalTracker::open(dir.path(), STORE);
        run_and_record(&tracker, &configure);
        run_and_record(&tracker, &stage);

        let tracker = IncrementalTracker::open(dir.path(), STORE);
        assert_eq!(tracker.decide(&configure).reason, RunReason::Unchanged);
        assert_eq!(tracker.decide(&stage).reason, RunReason::Unchanged);

        std::fs::write(dir.path().join("CMakeLists.txt"), "project(y)").unwrap();
        let tracker = IncrementalTracker::open(dir.path(), STORE);
        assert_eq!(tracker.decide(&configure).reason, RunReason::InputsChanged);
        assert_eq!(tracker.decide(&stage).reason, RunReason::InputsChanged);
    }

    #[test]
    fn test_non_cacheable_dependency_does_not_block_skip() {
        let dir = project();
        let generate = StageSpec::new("generate", CommandSpec::new("gen"));
        let stage = compile().with_dependency("generate");

        let tracker = IncrementalTracker::open(dir.path(), STORE);
        run_and_record(&tracker, &generate);
        run_and_record(&tracker, &stage);

        let tracker = IncrementalTracker::open(dir.path(), STORE);
        assert_eq!(tracker.decide(&generate).reason, RunReason::NotCacheable);
        assert_eq!(tracker.decide(&stage).reason, RunReason::Unchanged);
    }

    #[test]
    fn test_missing_output_forces_run() {
        let dir = project();
        let tracker = IncrementalTracker::open(dir.path(), STORE);
        let stage = compile().with_output("build/lib.o");
        run_and_record(&tracker, &stage);
        assert!(matches!(
            tracker.decide(&stage).reason,
            RunReason::OutputMissing { .. }
        ));

        std::fs::create_dir_all(dir.path().join("build")).unwrap();
        std::fs::write(dir.path().join("build/lib.o"), "obj").unwrap();
        assert_eq!(tracker.decide(&stage).reason, RunReason::Unchanged);
    }

    #[test]
    fn test_force() {
        let dir = project();
        let stage = compile();
        run_and_record(&IncrementalTracker::open(dir.path(), STORE), &stage);

        let forced = IncrementalTracker::open(dir.path(), STORE).with_force(true);
        let decision = forced.decide(&stage);
        assert_eq!(decision.reason, RunReason::Forced);
        assert!(decision.fingerprint.is_some());
    }

    #[test]
    fn test_config_value_is_an_input() {
        let dir = project();
        let stage = compile().with_input(InputSource::config("build_type"));
        let debug = IncrementalTracker::open(dir.path(), STORE).with_config_value("build_type", "Debug");
        run_and_record(&debug, &stage);

        let release =
            IncrementalTracker::open(dir.path(), STORE).with_config_value("build_type", "Release");
        assert_eq!(release.decide(&stage).reason, RunReason::InputsChanged);
    }

    #[test]
    fn test_invalidate_removes_entry() {
        let dir = project();
        let tracker = IncrementalTracker::open(dir.path(), STORE);
        let stage = compile();
        run_and_record(&tracker, &stage);
        assert!(tracker.previous("compile").is_some());

        tracker.invalidate("compile").unwrap();
        let reopened = IncrementalTracker::open(dir.path(), STORE);
        assert!(reopened.previous("compile").is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_input_forces_run() {
        let dir = project();
        let tracker = IncrementalTracker::open(dir.path(), STORE);
        // A dangling symlink matches the glob but cannot be opened.
        std::os::unix::fs::symlink(dir.path().join("nowhere"), dir.path().join("src/ghost.cpp"))
            .unwrap();
        let stage = compile();

        let decision = tracker.decide(&stage);
        assert!(decision.run);
        assert!(decision.fingerprint.is_none());
        assert!(matches!(
            decision.reason,
            RunReason::FingerprintUnavailable { .. }
        ));
    }

    #[test]
    fn test_flush_repairs_truncated_store() {
        let dir = project();
        let path = dir.path().join(STORE);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "").unwrap();

        let tracker = IncrementalTracker::open(dir.path(), STORE);
        assert!(tracker.should_run(&compile()));
        tracker.flush().unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["version"], 1);
    }
}
