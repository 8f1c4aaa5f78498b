//! The validated stage graph.
//!
//! Stages keep their declaration order. Kahn's algorithm groups them into
//! batches: every stage of a batch depends only on stages of earlier batches.

use super::builder::find_cycle;
use super::StageSpec;
use crate::errors::{CycleError, GraphError};
use std::collections::{BTreeSet, HashMap};

/// A directed acyclic graph of stages.
#[derive(Debug, Clone)]
pub struct StageGraph {
    /// The pipeline name.
    name: String,
    /// Stage specifications in declaration order.
    stages: Vec<StageSpec>,
    /// Stage name to declaration index.
    index: HashMap<String, usize>,
    /// Dependency indices per stage.
    dependencies: Vec<Vec<usize>>,
    /// Dependent indices per stage, in declaration order.
    dependents: Vec<Vec<usize>>,
    /// Kahn batches of declaration indices.
    batches: Vec<Vec<usize>>,
    /// Batch number per stage.
    batch_of: Vec<usize>,
}

impl StageGraph {
    /// Builds the graph from stages whose names are unique and whose
    /// dependencies all exist.
    pub(crate) fn from_validated(name: String, stages: Vec<StageSpec>) -> Result<Self, CycleError> {
        let index: HashMap<String, usize> = stages
            .iter()
            .enumerate()
            .map(|(i, s)| (s.name.clone(), i))
            .collect();

        let dependencies: Vec<Vec<usize>> = stages
            .iter()
            .map(|s| {
                s.dependencies
                    .iter()
                    .filter_map(|d| index.get(d).copied())
                    .collect()
            })
            .collect();

        let mut dependents = vec![Vec::new(); stages.len()];
        for (i, deps) in dependencies.iter().enumerate() {
            for &d in deps {
                dependents[d].push(i);
            }
        }

        let mut in_degree: Vec<usize> = dependencies.iter().map(Vec::len).collect();
        let mut placed = vec![false; stages.len()];
        let mut batch_of = vec![0; stages.len()];
        let mut batches = Vec::new();

        let mut current: Vec<usize> = (0..stages.len()).filter(|&i| in_degree[i] == 0).collect();
        while !current.is_empty() {
            let mut next = BTreeSet::new();
            for &i in &current {
                placed[i] = true;
                batch_of[i] = batches.len();
                for &dependent in &dependents[i] {
                    in_degree[dependent] -= 1;
                    if in_degree[dependent] == 0 {
                        next.insert(dependent);
                    }
                }
            }
            batches.push(current);
            current = next.into_iter().collect();
        }

        if placed.iter().any(|p| !p) {
            return Err(find_cycle(&stages, &index, &placed));
        }

        Ok(Self {
            name,
            stages,
            index,
            dependencies,
            dependents,
            batches,
            batch_of,
        })
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Returns true if the graph has no stages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Returns the stages in declaration order.
    #[must_use]
    pub fn stages(&self) -> &[StageSpec] {
        &self.stages
    }

    /// Returns a stage by name.
    #[must_use]
    pub fn stage(&self, name: &str) -> Option<&StageSpec> {
        self.index.get(name).map(|&i| &self.stages[i])
    }

    /// Returns true if the graph contains the stage.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Returns the batches of stage names.
    ///
    /// Within a batch, stages are in declaration order.
    #[must_use]
    pub fn batches(&self) -> Vec<Vec<&str>> {
        self.batches
            .iter()
            .map(|batch| batch.iter().map(|&i| self.stages[i].name.as_str()).collect())
            .collect()
    }

    /// Returns a topological order: the concatenation of the batches.
    #[must_use]
    pub fn execution_order(&self) -> Vec<&str> {
        self.batches
            .iter()
            .flatten()
            .map(|&i| self.stages[i].name.as_str())
            .collect()
    }

    /// Returns the declared dependencies of a stage.
    #[must_use]
    pub fn dependencies_of(&self, name: &str) -> Option<&[String]> {
        self.stage(name).map(|s| s.dependencies.as_slice())
    }

    /// Returns the direct dependents of a stage in declaration order.
    #[must_use]
    pub fn dependents_of(&self, name: &str) -> Vec<&str> {
        self.index
            .get(name)
            .map(|&i| {
                self.dependents[i]
                    .iter()
                    .map(|&d| self.stages[d].name.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Returns the changed stages plus all of their transitive dependents,
    /// in declaration order.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::UnknownStage`] if a changed stage is not in the graph.
    pub fn affected_by<S: AsRef<str>>(&self, changed: &[S]) -> Result<Vec<&str>, GraphError> {
        let roots = self.resolve(changed)?;
        let affected = Self::closure(roots, &self.dependents);
        Ok(affected
            .into_iter()
            .map(|i| self.stages[i].name.as_str())
            .collect())
    }

    /// Returns the sub-graph of `targets` and all of their transitive dependencies.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::UnknownStage`] if a target is not in the graph,
    /// or [`GraphError::EmptyPipeline`] if `targets` is empty.
    pub fn select<S: AsRef<str>>(&self, targets: &[S]) -> Result<Self, GraphError> {
        let roots = self.resolve(targets)?;
        let keep = Self::closure(roots, &self.dependencies);
        self.subgraph(&keep)
    }

    /// Returns the sub-graph of exactly `targets`.
    ///
    /// Dependencies on stages outside the selection are dropped, so the
    /// selected stages run without their upstream.
    ///
    /// # Errors
    ///
    /// Same as [`select`](Self::select).
    pub fn only<S: AsRef<str>>(&self, targets: &[S]) -> Result<Self, GraphError> {
        let keep: BTreeSet<usize> = self.resolve(targets)?.into_iter().collect();
        self.subgraph(&keep)
    }

    fn resolve<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<usize>, GraphError> {
        names
            .iter()
            .map(|n| {
                let n = n.as_ref();
                self.index
                    .get(n)
                    .copied()
                    .ok_or_else(|| GraphError::UnknownStage { name: n.to_string() })
            })
            .collect()
    }

    fn closure(roots: Vec<usize>, edges: &[Vec<usize>]) -> BTreeSet<usize> {
        let mut seen = BTreeSet::new();
        let mut stack = roots;
        while let Some(i) = stack.pop() {
            if seen.insert(i) {
                stack.extend(edges[i].iter().copied());
            }
        }
        seen
    }

    fn subgraph(&self, keep: &BTreeSet<usize>) -> Result<Self, GraphError> {
        if keep.is_empty() {
            return Err(GraphError::EmptyPipeline {
                pipeline: self.name.clone(),
                reason: "no stages were selected".to_string(),
            });
        }

        let stages: Vec<StageSpec> = keep
            .iter()
            .map(|&i| {
                let mut spec = self.stages[i].clone();
                spec.dependencies
                    .retain(|d| self.index.get(d).is_some_and(|j| keep.contains(j)));
                spec
            })
            .collect();
        Self::from_validated(self.name.clone(), stages).map_err(GraphError::from)
    }

    pub(crate) fn stage_at(&self, idx: usize) -> &StageSpec {
        &self.stages[idx]
    }

    pub(crate) fn dependency_indices(&self, idx: usize) -> &[usize] {
        &self.dependencies[idx]
    }

    pub(crate) fn dependent_indices(&self, idx: usize) -> &[usize] {
        &self.dependents[idx]
    }

    pub(crate) fn batch_index(&self, idx: usize) -> usize {
        self.batch_of[idx]
    }
}

#[cfg(test)]
mod tests {
    use super::super::PipelineBuilder;
    use super::*;
    use crate::process::CommandSpec;
    use pretty_assertions::assert_eq;

    fn stage(name: &str, deps: &[&str]) -> StageSpec {
        StageSpec::new(name, CommandSpec::new("true")).with_dependencies(deps.iter().copied())
    }

    /// configure -> build -> {test, lint}, package after test; format standalone.
    fn cmake_like() -> StageGraph {
        PipelineBuilder::new("cmake")
            .stage(stage("configure", &[]))
            .unwrap()
            .stage(stage("build", &["configure"]))
            .unwrap()
            .stage(stage("test", &["build"]))
            .unwrap()
            .stage(stage("lint", &["configure"]))
            .unwrap()
            .stage(stage("package", &["test"]))
            .unwrap()
            .stage(stage("format", &[]))
            .unwrap()
            .build()
            .unwrap()
    }

    fn assert_topological(graph: &StageGraph) {
        let order = graph.execution_order();
        assert_eq!(order.len(), graph.len());
        for (pos, name) in order.iter().enumerate() {
            for dep in graph.dependencies_of(name).unwrap() {
                let dep_pos = order.iter().position(|n| *n == dep.as_str()).unwrap();
                assert!(dep_pos < pos, "{dep} must come before {name}");
            }
        }
    }

    #[test]
    fn test_batches() {
        let graph = cmake_like();
        assert_eq!(
            graph.batches(),
            vec![
                vec!["configure", "format"],
                vec!["build", "lint"],
                vec!["test"],
                vec!["package"],
            ]
        );
        assert_topological(&graph);
    }

    #[test]
    fn test_random_acyclic_graphs_are_topological() {
        use rand::{Rng, SeedableRng};
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);

        for _ in 0..50 {
            let n = rng.gen_range(1..20);
            let mut builder = PipelineBuilder::new("random");
            // Declare in reverse so dependencies are often declared later.
            for i in (0..n).rev() {
                let deps: Vec<String> = (0..i)
                    .filter(|_| rng.gen_bool(0.3))
                    .map(|d| format!("s{d}"))
                    .collect();
                builder
                    .add_stage(stage(&format!("s{i}"), &[]).with_dependencies(deps))
                    .unwrap();
            }
            let graph = builder.build().unwrap();
            assert_topological(&graph);
        }
    }

    #[test]
    fn test_dependents_of() {
        let graph = cmake_like();
        assert_eq!(graph.dependents_of("configure"), vec!["build", "lint"]);
        assert!(graph.dependents_of("package").is_empty());
        assert!(graph.dependents_of("missing").is_empty());
    }

    #[test]
    fn test_affected_by() {
        let graph = cmake_like();
        assert_eq!(
            graph.affected_by(&["build"]).unwrap(),
            vec!["build", "test", "package"]
        );
        assert_eq!(graph.affected_by(&["format"]).unwrap(), vec!["format"]);
        assert!(matches!(
            graph.affected_by(&["nope"]),
            Err(GraphError::UnknownStage { .. })
        ));
    }

    #[test]
    fn test_select_includes_transitive_dependencies() {
        let graph = cmake_like();
        let sub = graph.select(&["package"]).unwrap();
        assert_eq!(
            sub.execution_order(),
            vec!["configure", "build", "test", "package"]
        );
        assert!(!sub.contains("lint"));
    }

    #[test]
    fn test_select_unknown_target() {
        let err = cmake_like().select(&["install"]).unwrap_err();
        assert!(matches!(err, GraphError::UnknownStage { ref name } if name == "install"));
    }

    #[test]
    fn test_only_drops_outside_dependencies() {
        let graph = cmake_like();
        let sub = graph.only(&["test", "package"]).unwrap();
        assert_eq!(sub.batches(), vec![vec!["test"], vec!["package"]]);
        assert!(sub.dependencies_of("test").unwrap().is_empty());
    }

    #[test]
    fn test_empty_selection() {
        let empty: [&str; 0] = [];
        assert!(matches!(
            cmake_like().select(&empty),
            Err(GraphError::EmptyPipeline { .. })
        ));
    }
}
