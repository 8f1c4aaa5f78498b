//! Executable lookup against an explicit search path.

use std::path::{Path, PathBuf};

/// Finds `program` on `path_var`.
///
/// A program containing a path separator is checked directly instead of
/// being searched for. Returns the resolved path of the first match.
#[must_use]
pub fn find_executable(program: &str, path_var: Option<&str>) -> Option<PathBuf> {
    if program.is_empty() {
        return None;
    }

    let direct = Path::new(program);
    if program.contains('/') || program.contains(std::path::MAIN_SEPARATOR) {
        return candidates(direct).into_iter().find(|p| is_executable(p));
    }

    let path_var = path_var?;
    std::env::split_paths(path_var)
        .filter(|dir| !dir.as_os_str().is_empty())
        .flat_map(|dir| candidates(&dir.join(program)))
        .find(|p| is_executable(p))
}

#[cfg(not(windows))]
fn candidates(path: &Path) -> Vec<PathBuf> {
    vec![path.to_path_buf()]
}

#[cfg(windows)]
fn candidates(path: &Path) -> Vec<PathBuf> {
    if path.extension().is_some() {
        return vec![path.to_path_buf()];
    }
    let exts = std::env::var("PATHEXT").unwrap_or_else(|_| ".COM;.EXE;.BAT;.CMD".to_string());
    std::iter::once(path.to_path_buf())
        .chain(
            exts.split(';')
                .filter(|e| !e.is_empty())
                .map(|ext| path.with_extension(ext.trim_start_matches('.'))),
        )
        .collect()
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .is_ok_and(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
