use std::path::Path;

use anyhow::Result;
use buildflow::config::BuildflowConfig;
use buildflow::errors::exit_codes;
use buildflow::incremental::FingerprintStore;

use super::CacheCommand;
use crate::console;

pub fn cmd_cache(root: &Path, action: &CacheCommand) -> Result<i32> {
    match action {
        CacheCommand::Clear => {
            let config = BuildflowConfig::load(root)?;
            let path = root.join(config.store_path());
            if FingerprintStore::clear(&path)? {
                console::print_success(&format!("Removed {}", path.display()));
            } else {
                console::print_info(&format!("Nothing to clear at {}", path.display()));
            }
        }
    }
    Ok(exit_codes::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_clear_removes_store() {
        let dir = TempDir::new().unwrap();
        let store = dir.path().join(".buildflow/fingerprints.json");
        fs::create_dir_all(store.parent().unwrap()).unwrap();
        fs::write(&store, "{}").unwrap();

        assert_eq!(cmd_cache(dir.path(), &CacheCommand::Clear).unwrap(), 0);
        assert!(!store.exists());
    }

    #[test]
    fn test_clear_without_store_is_ok() {
        let dir = TempDir::new().unwrap();
        assert_eq!(cmd_cache(dir.path(), &CacheCommand::Clear).unwrap(), 0);
    }

    #[test]
    fn test_clear_uses_configured_location() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("buildflow.json"),
            r#"{ "state_dir": "state", "fingerprint_file": "fp.json" }"#,
        )
        .unwrap();
        let store = dir.path().join("state/fp.json");
        fs::create_dir_all(store.parent().unwrap()).unwrap();
        fs::write(&store, "{}").unwrap();

        cmd_cache(dir.path(), &CacheCommand::Clear).unwrap();
        assert!(!store.exists());
    }
}
