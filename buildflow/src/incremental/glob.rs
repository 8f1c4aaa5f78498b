//! File globs for fingerprint inputs.
//!
//! Supported syntax, matched against `/`-separated paths relative to the
//! project root:
//! - `*` any run of characters except `/`
//! - `?` one character except `/`
//! - `**` any run of characters including `/`; `**/` also matches nothing
//! - `{a,b}` alternation (no nesting)

use crate::errors::FingerprintError;
use regex::Regex;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Translates a glob into an anchored regular expression.
fn glob_to_regex(pattern: &str) -> String {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::with_capacity(pattern.len() * 2 + 2);
    out.push('^');

    let mut i = 0;
    let mut in_group = false;
    while i < chars.len() {
        let c = chars[i];
        match c {
            '*' if chars.get(i + 1) == Some(&'*') => {
                if chars.get(i + 2) == Some(&'/') {
                    out.push_str("(?:.*/)?");
                    i += 3;
                } else {
                    out.push_str(".*");
                    i += 2;
                }
                continue;
            }
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            '{' if !in_group && chars[i + 1..].contains(&'}') => {
                in_group = true;
                out.push_str("(?:");
            }
            ',' if in_group => out.push('|'),
            '}' if in_group => {
                in_group = false;
                out.push(')');
            }
            other => out.push_str(&regex::escape(&other.to_string())),
        }
        i += 1;
    }

    out.push('$');
    out
}

/// A compiled set of include and exclude globs.
#[derive(Debug, Clone)]
pub struct GlobSet {
    include: Vec<Regex>,
    exclude: Vec<Regex>,
}

impl GlobSet {
    /// Compiles the include and exclude patterns.
    ///
    /// # Errors
    ///
    /// Returns [`FingerprintError::Pattern`] if a pattern does not compile.
    pub fn new<S: AsRef<str>>(include: &[S], exclude: &[S]) -> Result<Self, FingerprintError> {
        Ok(Self {
            include: compile(include)?,
            exclude: compile(exclude)?,
        })
    }

    /// Returns true if a relative `/`-separated path is included and not excluded.
    #[must_use]
    pub fn is_match(&self, relative: &str) -> bool {
        self.include.iter().any(|re| re.is_match(relative))
            && !self.exclude.iter().any(|re| re.is_match(relative))
    }

    /// Walks `root` and returns the matching files as sorted relative paths.
    ///
    /// # Errors
    ///
    /// Returns [`FingerprintError::Io`] if a directory cannot be read.
    pub fn matched_files(&self, root: &Path) -> Result<Vec<PathBuf>, FingerprintError> {
        let mut matched = Vec::new();
        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = entry.map_err(|e| FingerprintError::Io {
                path: e.path().map_or_else(|| root.to_path_buf(), Path::to_path_buf),
                source: e.into(),
            })?;
            let file_type = entry.file_type();
            // Symlinks are hashed through; a dangling one surfaces as a read error.
            let is_file = file_type.is_file() || (file_type.is_symlink() && !entry.path().is_dir());
            if !is_file {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(root) else {
                continue;
            };
            if self.is_match(&to_slash(relative)) {
                matched.push(relative.to_path_buf());
            }
        }
        Ok(matched)
    }
}

fn compile<S: AsRef<str>>(patterns: &[S]) -> Result<Vec<Regex>, FingerprintError> {
    patterns
        .iter()
        .map(|p| {
            let p = p.as_ref();
            Regex::new(&glob_to_regex(p)).map_err(|source| FingerprintError::Pattern {
                pattern: p.to_string(),
                source,
            })
        })
        .collect()
}

/// Renders a relative path with `/` separators on every platform.
#[must_use]
pub fn to_slash(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
