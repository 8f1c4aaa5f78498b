//! Explicit base environment for child processes.

use std::collections::BTreeMap;

/// Variables passed through from the orchestrator's own environment by default.
#[cfg(not(windows))]
pub const DEFAULT_PASSTHROUGH: &[&str] = &["PATH", "HOME", "LANG", "TMPDIR"];

/// Variables passed through from the orchestrator's own environment by default.
#[cfg(windows)]
pub const DEFAULT_PASSTHROUGH: &[&str] = &[
    "PATH",
    "HOME",
    "LANG",
    "TMPDIR",
    "SYSTEMROOT",
    "TEMP",
    "TMP",
    "USERPROFILE",
    "PATHEXT",
];

/// A snapshot of environment variables every child process starts from.
///
/// Child processes never inherit the orchestrator's environment implicitly;
/// they get this snapshot plus their stage's own additions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BaseEnvironment {
    vars: BTreeMap<String, String>,
}

impl BaseEnvironment {
    /// Creates an empty environment.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Captures the listed variables from the current process environment.
    ///
    /// Variables that are unset or not valid Unicode are left out.
    #[must_use]
    pub fn capture<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let vars = keys
            .into_iter()
            .filter_map(|key| {
                let key = key.as_ref();
                std::env::var(key).ok().map(|value| (key.to_string(), value))
            })
            .collect();
        Self { vars }
    }

    /// Captures [`DEFAULT_PASSTHROUGH`].
    #[must_use]
    pub fn capture_default() -> Self {
        Self::capture(DEFAULT_PASSTHROUGH)
    }

    /// Adds or replaces a variable.
    #[must_use]
    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    /// Adds several variables.
    #[must_use]
    pub fn with_vars<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.vars
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Returns a variable's value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Iterates over all variables in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Returns the snapshot's `PATH`, if any.
    #[must_use]
    pub fn path(&self) -> Option<&str> {
        self.get("PATH")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_skips_unset_variables() {
        let env = BaseEnvironment::capture(["BUILDFLOW_SURELY_UNSET_VARIABLE"]);
        assert_eq!(env.iter().count(), 0);
    }

    #[test]
    fn test_capture_reads_path() {
        // PATH is set in every test environment we run in.
        let env = BaseEnvironment::capture(["PATH"]);
        assert_eq!(env.path().map(str::to_string), std::env::var("PATH").ok());
    }

    #[test]
    fn test_with_vars_overrides() {
        let env = BaseEnvironment::empty()
            .with_var("LANG", "C")
            .with_vars([("LANG", "C.UTF-8"), ("CC", "gcc")]);

        assert_eq!(env.get("LANG"), Some("C.UTF-8"));
        assert_eq!(
            env.iter().collect::<Vec<_>>(),
            vec![("CC", "gcc"), ("LANG", "C.UTF-8")]
        );
    }
}
