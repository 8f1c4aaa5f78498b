//! Stage specifications.

use crate::errors::CycleError;
use crate::incremental::InputSource;
use crate::process::CommandSpec;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

fn default_true() -> bool {
    true
}

/// Specification for a single stage in a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSpec {
    /// The unique name of the stage.
    pub name: String,
    /// Names of stages this stage depends on, in declaration order.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// The command the stage runs.
    pub command: CommandSpec,
    /// Inputs that make up the stage's fingerprint.
    #[serde(default)]
    pub inputs: Vec<InputSource>,
    /// Paths the stage produces. A missing output forces a re-run.
    #[serde(default)]
    pub outputs: Vec<PathBuf>,
    /// Whether an unchanged fingerprint may skip the stage.
    #[serde(default)]
    pub cacheable: bool,
    /// Whether a failure of this stage fails the pipeline.
    #[serde(default = "default_true")]
    pub required: bool,
    /// Tools that must be available before the stage launches.
    #[serde(default)]
    pub requires_tools: Vec<String>,
    /// Optional human readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// When set, the stage is skipped without launching, for this reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nothing_to_do: Option<String>,
}

impl StageSpec {
    /// Creates a required, non-cacheable stage.
    #[must_use]
    pub fn new(name: impl Into<String>, command: CommandSpec) -> Self {
        Self {
            name: name.into(),
            dependencies: Vec::new(),
            command,
            inputs: Vec::new(),
            outputs: Vec::new(),
            cacheable: false,
            required: true,
            requires_tools: Vec::new(),
            description: None,
            nothing_to_do: None,
        }
    }

    /// Sets the dependencies.
    #[must_use]
    pub fn with_dependencies(mut self, deps: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    /// Adds a dependency.
    #[must_use]
    pub fn with_dependency(mut self, dep: impl Into<String>) -> Self {
        let dep = dep.into();
        if !self.dependencies.contains(&dep) {
            self.dependencies.push(dep);
        }
        self
    }

    /// Adds a fingerprint input.
    #[must_use]
    pub fn with_input(mut self, input: InputSource) -> Self {
        self.inputs.push(input);
        self
    }

    /// Adds a declared output path.
    #[must_use]
    pub fn with_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.outputs.push(path.into());
        self
    }

    /// Marks the stage as cacheable.
    #[must_use]
    pub const fn cacheable(mut self) -> Self {
        self.cacheable = true;
        self
    }

    /// Marks the stage as optional.
    #[must_use]
    pub const fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// Adds a tool precondition.
    #[must_use]
    pub fn requires_tool(mut self, tool: impl Into<String>) -> Self {
        self.requires_tools.push(tool.into());
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Marks the stage as having no work; it is skipped without launching.
    #[must_use]
    pub fn with_nothing_to_do(mut self, reason: impl Into<String>) -> Self {
        self.nothing_to_do = Some(reason.into());
        self
    }

    /// Returns the tools checked before launch: the command's program first,
    /// then the declared tools, without duplicates.
    #[must_use]
    pub fn launch_tools(&self) -> Vec<&str> {
        let mut tools = vec![self.command.program.as_str()];
        for tool in &self.requires_tools {
            if !tools.contains(&tool.as_str()) {
                tools.push(tool);
            }
        }
        tools
    }

    /// Validates the stage specification.
    ///
    /// # Errors
    ///
    /// Returns a [`CycleError`] if the stage depends on itself.
    pub fn validate(&self) -> Result<(), CycleError> {
        if self.dependencies.contains(&self.name) {
            return Err(CycleError::new(vec![self.name.clone(), self.name.clone()]));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str) -> StageSpec {
        StageSpec::new(name, CommandSpec::new("true"))
    }

    #[test]
    fn test_defaults() {
        let stage = spec("build");
        assert!(stage.required);
        assert!(!stage.cacheable);
        assert!(stage.dependencies.is_empty());
        assert!(stage.validate().is_ok());
    }

    #[test]
    fn test_self_dependency_is_cycle() {
        let err = spec("build").with_dependency("build").validate().unwrap_err();
        assert_eq!(err.cycle_path, vec!["build".to_string(), "build".to_string()]);
    }

    #[test]
    fn test_with_dependency_keeps_order_and_dedups() {
        let stage = spec("package")
            .with_dependency("build")
            .with_dependency("test")
            .with_dependency("build");
        assert_eq!(stage.dependencies, vec!["build", "test"]);
    }

    #[test]
    fn test_launch_tools() {
        let stage = StageSpec::new("coverage", CommandSpec::new("lcov"))
            .requires_tool("gcov")
            .requires_tool("lcov");
        assert_eq!(stage.launch_tools(), vec!["lcov", "gcov"]);
    }

    #[test]
    fn test_deserialize_defaults_required() {
        let stage: StageSpec = serde_json::from_str(
            r#"{"name": "lint", "command": {"program": "clang-tidy"}}"#,
        )
        .unwrap();
        assert!(stage.required);
        assert!(!stage.cacheable);
    }
}
