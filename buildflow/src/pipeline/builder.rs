//! Pipeline builder with validation.

use super::{StageGraph, StageSpec};
use crate::errors::{CycleError, DuplicateStageError, GraphError, UnknownDependencyError};
use std::collections::HashMap;

/// Builder for creating validated stage graphs.
///
/// Stages may reference dependencies that are added later; dependency and
/// cycle validation happens in [`build`](Self::build).
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    /// The pipeline name.
    name: String,
    /// Stage specifications in insertion order.
    stages: Vec<StageSpec>,
    /// Stage name to position in `stages`.
    index: HashMap<String, usize>,
}

impl PipelineBuilder {
    /// Creates a new pipeline builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Adds a stage to the pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::DuplicateStage`] if the name is taken, or
    /// [`GraphError::Cycle`] if the stage depends on itself.
    pub fn add_stage(&mut self, mut spec: StageSpec) -> Result<(), GraphError> {
        spec.validate()?;
        if self.index.contains_key(&spec.name) {
            return Err(DuplicateStageError::new(&spec.name).into());
        }

        let mut seen = Vec::with_capacity(spec.dependencies.len());
        spec.dependencies.retain(|dep| {
            if seen.contains(dep) {
                false
            } else {
                seen.push(dep.clone());
                true
            }
        });

        self.index.insert(spec.name.clone(), self.stages.len());
        self.stages.push(spec);
        Ok(())
    }

    /// Adds a stage, consuming and returning the builder for chaining.
    ///
    /// # Errors
    ///
    /// See [`add_stage`](Self::add_stage).
    pub fn stage(mut self, spec: StageSpec) -> Result<Self, GraphError> {
        self.add_stage(spec)?;
        Ok(self)
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Returns true if a stage with this name has been added.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Builds the graph.
    ///
    /// # Errors
    ///
    /// - [`GraphError::EmptyPipeline`] when no stage was added
    /// - [`GraphError::UnknownDependency`] naming the first stage (in
    ///   declaration order) with an undeclared dependency
    /// - [`GraphError::Cycle`] naming the members of a cycle
    pub fn build(self) -> Result<StageGraph, GraphError> {
        if self.stages.is_empty() {
            return Err(GraphError::EmptyPipeline {
                pipeline: self.name,
                reason: "no stages were added".to_string(),
            });
        }

        for spec in &self.stages {
            if let Some(dep) = spec
                .dependencies
                .iter()
                .find(|dep| !self.index.contains_key(*dep))
            {
                return Err(UnknownDependencyError::new(&spec.name, dep).into());
            }
        }

        StageGraph::from_validated(self.name, self.stages).map_err(GraphError::from)
    }
}

/// Extracts one cycle from stages that Kahn's algorithm could not place.
///
/// Every unplaced stage has at least one unplaced dependency, so following
/// first unplaced dependencies from any of them must revisit a stage.
pub(crate) fn find_cycle(stages: &[StageSpec], index: &HashMap<String, usize>, placed: &[bool]) -> CycleError {
    let Some(start) = placed.iter().position(|p| !p) else {
        return CycleError::new(Vec::new());
    };

    let mut path: Vec<usize> = Vec::new();
    let mut current = start;
    loop {
        if let Some(pos) = path.iter().position(|&i| i == current) {
            let mut cycle: Vec<String> = path[pos..]
                .iter()
                .map(|&i| stages[i].name.clone())
                .collect();
            cycle.push(stages[current].name.clone());
            return CycleError::new(cycle);
        }
        path.push(current);

        let next = stages[current]
            .dependencies
            .iter()
            .filter_map(|dep| index.get(dep).copied())
            .find(|&i| !placed[i]);
        match next {
            Some(next) => current = next,
            None => return CycleError::new(vec![stages[current].name.clone()]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::CommandSpec;

    fn stage(name: &str, deps: &[&str]) -> StageSpec {
        StageSpec::new(name, CommandSpec::new("true")).with_dependencies(deps.iter().copied())
    }

    #[test]
    fn test_builder_creation() {
        let builder = PipelineBuilder::new("test");
        assert_eq!(builder.name(), "test");
        assert_eq!(builder.stage_count(), 0);
    }

    #[test]
    fn test_dependency_declared_later() {
        let graph = PipelineBuilder::new("test")
            .stage(stage("build", &["configure"]))
            .unwrap()
            .stage(stage("configure", &[]))
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(graph.execution_order(), vec!["configure", "build"]);
    }

    #[test]
    fn test_duplicate_stage() {
        let err = PipelineBuilder::new("test")
            .stage(stage("build", &[]))
            .unwrap()
            .stage(stage("build", &[]))
            .unwrap_err();

        assert!(matches!(err, GraphError::DuplicateStage(ref e) if e.stage == "build"));
        assert_eq!(err.diagnostic().code, "GRAPH-001-DUPLICATE");
    }

    #[test]
    fn test_self_dependency_rejected_on_add() {
        let err = PipelineBuilder::new("test")
            .stage(stage("loop", &["loop"]))
            .unwrap_err();
        assert!(matches!(err, GraphError::Cycle(ref e) if e.contains("loop")));
    }

    #[test]
    fn test_unknown_dependency() {
        let err = PipelineBuilder::new("test")
            .stage(stage("test", &["compyle"]))
            .unwrap()
            .build()
            .unwrap_err();

        match err {
            GraphError::UnknownDependency(e) => {
                assert_eq!(e.stage, "test");
                assert_eq!(e.dependency, "compyle");
            }
            other => panic!("expected unknown dependency, got {other:?}"),
        }
    }

    #[test]
    fn test_cycle_detection() {
        let err = PipelineBuilder::new("test")
            .stage(stage("root", &[]))
            .unwrap()
            .stage(stage("a", &["root", "c"]))
            .unwrap()
            .stage(stage("b", &["a"]))
            .unwrap()
            .stage(stage("c", &["b"]))
            .unwrap()
            .build()
            .unwrap_err();

        match err {
            GraphError::Cycle(e) => {
                assert_eq!(e.cycle_path, vec!["a", "c", "b", "a"]);
                assert!(!e.contains("root"));
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_cycle_found_behind_acyclic_prefix() {
        // "entry" is not part of the cycle but cannot be placed either.
        let err = PipelineBuilder::new("test")
            .stage(stage("entry", &["x"]))
            .unwrap()
            .stage(stage("x", &["y"]))
            .unwrap()
            .stage(stage("y", &["x"]))
            .unwrap()
            .build()
            .unwrap_err();

        match err {
            GraphError::Cycle(e) => {
                assert_eq!(e.cycle_path, vec!["x", "y", "x"]);
                assert!(!e.contains("entry"));
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_build() {
        let err = PipelineBuilder::new("test").build().unwrap_err();
        assert!(matches!(err, GraphError::EmptyPipeline { .. }));
        assert_eq!(err.diagnostic().code, "GRAPH-005-EMPTY");
    }

    #[test]
    fn test_duplicate_dependencies_collapse() {
        let graph = PipelineBuilder::new("test")
            .stage(stage("a", &[]))
            .unwrap()
            .stage(stage("b", &["a", "a"]))
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(graph.dependencies_of("b"), Some(&["a".to_string()][..]));
    }
}
