//! The persisted fingerprint store.
//!
//! One JSON document per project. Reads are forgiving: anything that is not
//! a valid document of the current version is treated as an empty store.
//! Writes go to a sibling temporary file that is renamed over the old one.

use super::Fingerprint;
use crate::errors::BuildflowError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Current store layout version.
pub const STORE_VERSION: u32 = 1;

/// The last successful run of one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreEntry {
    /// Fingerprint of the inputs the stage ran with.
    pub fingerprint: Fingerprint,
    /// When the entry was recorded.
    pub recorded_at: DateTime<Utc>,
    /// Duration of the recorded run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreDocument {
    version: u32,
    #[serde(default)]
    entries: BTreeMap<String, StoreEntry>,
}

/// Fingerprints of the last successful run of each stage.
#[derive(Debug)]
pub struct FingerprintStore {
    path: PathBuf,
    entries: BTreeMap<String, StoreEntry>,
    recovered: bool,
}

impl FingerprintStore {
    /// Loads the store at `path`.
    ///
    /// A missing file yields an empty store. An empty, truncated, corrupted
    /// or wrong-version file also yields an empty store, logs a warning and
    /// marks the store as recovered.
    #[must_use]
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let (entries, recovered) = match fs::read_to_string(&path) {
            Ok(text) => match Self::parse(&text) {
                Ok(entries) => (entries, false),
                Err(problem) => {
                    warn!(
                        path = %path.display(),
                        problem = %problem,
                        "fingerprint store unusable, every cacheable stage will run"
                    );
                    (BTreeMap::new(), true)
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no fingerprint store yet");
                (BTreeMap::new(), false)
            }
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "cannot read fingerprint store, every cacheable stage will run"
                );
                (BTreeMap::new(), true)
            }
        };

        Self {
            path,
            entries,
            recovered,
        }
    }

    fn parse(text: &str) -> Result<BTreeMap<String, StoreEntry>, String> {
        if text.trim().is_empty() {
            return Err("file is empty".to_string());
        }
        let document: StoreDocument = serde_json::from_str(text).map_err(|e| e.to_string())?;
        if document.version != STORE_VERSION {
            return Err(format!(
                "unsupported version {} (expected {STORE_VERSION})",
                document.version
            ));
        }
        Ok(document.entries)
    }

    /// Returns the store path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns true if the file on disk was unusable when the store was opened.
    #[must_use]
    pub fn was_recovered(&self) -> bool {
        self.recovered
    }

    /// Returns the entry for a stage.
    #[must_use]
    pub fn get(&self, stage: &str) -> Option<&StoreEntry> {
        self.entries.get(stage)
    }

    /// Inserts or replaces the entry for a stage.
    pub fn insert(&mut self, stage: impl Into<String>, entry: StoreEntry) {
        self.entries.insert(stage.into(), entry);
    }

    /// Removes the entry for a stage.
    pub fn remove(&mut self, stage: &str) -> Option<StoreEntry> {
        self.entries.remove(stage)
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the store has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Writes the store atomically.
    ///
    /// # Errors
    ///
    /// Returns an IO or serialization error; the previous file is left intact.
    pub fn persist(&mut self) -> Result<(), BuildflowError> {
        let document = StoreDocument {
            version: STORE_VERSION,
            entries: self.entries.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&document)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.temp_path();
        let written = File::create(&tmp).and_then(|mut file| {
            file.write_all(&bytes)?;
            file.sync_all()
        });
        if let Err(e) = written.and_then(|()| fs::rename(&tmp, &self.path)) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }

        self.recovered = false;
        debug!(path = %self.path.display(), entries = self.entries.len(), "fingerprint store written");
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map_or_else(|| "fingerprints".into(), |n| n.to_string_lossy());
        self.path
            .with_file_name(format!(".{name}.{}.tmp", std::process::id()))
    }

    /// Deletes the store file at `path`.
    ///
    /// Returns false if there was nothing to delete.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the file exists but cannot be removed.
    pub fn clear(path: &Path) -> Result<bool, BuildflowError> {
        match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(fp: &str) -> StoreEntry {
        StoreEntry {
            fingerprint: Fingerprint::from_hex(fp),
            recorded_at: Utc::now(),
            duration_ms: Some(10),
        }
    }

    #[test]
    fn test_missing_file_is_empty_not_recovered() {
        let dir = TempDir::new().unwrap();
        let store = FingerprintStore::open(dir.path().join("fingerprints.json"));
        assert!(store.is_empty());
        assert!(!store.was_recovered());
    }

    #[test]
    fn test_persist_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state/fingerprints.json");

        let mut store = FingerprintStore::open(&path);
        store.insert("configure", entry("aaa"));
        store.insert("build", entry("bbb"));
        store.persist().unwrap();

        let reloaded = FingerprintStore::open(&path);
        assert_eq!(reloaded.len(), 2);
        assert_eq!(
            reloaded.get("build").unwrap().fingerprint,
            Fingerprint::from_hex("bbb")
        );
        // No temporary files are left next to the store.
        let names: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("fingerprints.json")]);
    }

    #[test]
    fn test_corrupt_files_recover_as_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fingerprints.json");

        for content in [
            "",
            "{\"version\": 1, \"entries\": {\"build\": {\"fingerpr",
            "not json at all",
            "{\"version\": 99, \"entries\": {}}",
        ] {
            fs::write(&path, content).unwrap();
            let store = FingerprintStore::open(&path);
            assert!(store.is_empty(), "content {content:?}");
            assert!(store.was_recovered(), "content {content:?}");
        }
    }

    #[test]
    fn test_persist_repairs_corrupt_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fingerprints.json");
        fs::write(&path, "").unwrap();

        let mut store = FingerprintStore::open(&path);
        store.insert("build", entry("ccc"));
        store.persist().unwrap();
        assert!(!store.was_recovered());

        let reloaded = FingerprintStore::open(&path);
        assert!(!reloaded.was_recovered());
        assert_eq!(reloaded.len(), 1);
    }

    #[test]
    fn test_remove_keeps_other_entries() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fingerprints.json");

        let mut store = FingerprintStore::open(&path);
        store.insert("a", entry("1"));
        store.insert("b", entry("2"));
        store.persist().unwrap();

        store.remove("a");
        store.persist().unwrap();

        let reloaded = FingerprintStore::open(&path);
        assert!(reloaded.get("a").is_none());
        assert!(reloaded.get("b").is_some());
    }

    #[test]
    fn test_clear() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fingerprints.json");
        assert!(!FingerprintStore::clear(&path).unwrap());

        fs::write(&path, "{}").unwrap();
        assert!(FingerprintStore::clear(&path).unwrap());
        assert!(!path.exists());
    }
}
