use std::fmt::Write as _;
use std::path::Path;

use anyhow::Result;
use buildflow::errors::exit_codes;
use buildflow::pipeline::StageGraph;
use serde_json::json;

use super::{load, BuildArgs};
use crate::console::OutputFormat;

/// Prints the batches `build.command` would run.
pub fn cmd_plan(root: &Path, build: &BuildArgs, format: OutputFormat) -> Result<i32> {
    let loaded = load(root, build)?;
    print_plan(&loaded.graph, format)?;
    Ok(exit_codes::SUCCESS)
}

pub(super) fn print_plan(graph: &StageGraph, format: OutputFormat) -> Result<()> {
    if format.is_json() {
        println!("{}", serde_json::to_string_pretty(&plan_json(graph))?);
    } else {
        print!("{}", render_plan(graph));
    }
    Ok(())
}

fn plan_json(graph: &StageGraph) -> serde_json::Value {
    json!({
        "pipeline": graph.name(),
        "batches": graph.batches(),
    })
}

/// One line per batch; stages within a batch may run concurrently.
pub(super) fn render_plan(graph: &StageGraph) -> String {
    let batches = graph.batches();
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Pipeline '{}': {} stage(s) in {} batch(es)",
        graph.name(),
        graph.len(),
        batches.len()
    );
    for (i, batch) in batches.iter().enumerate() {
        let names: Vec<String> = batch
            .iter()
            .map(|name| match graph.stage(name) {
                Some(stage) if !stage.required => format!("{name} (optional)"),
                _ => (*name).to_string(),
            })
            .collect();
        let _ = writeln!(out, "  {}. {}", i + 1, names.join(", "));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use buildflow::pipeline::{PipelineBuilder, StageSpec};
    use buildflow::process::CommandSpec;
    use pretty_assertions::assert_eq;

    fn graph() -> StageGraph {
        PipelineBuilder::new("demo")
            .stage(StageSpec::new("configure", CommandSpec::new("cmake")))
            .unwrap()
            .stage(StageSpec::new("build", CommandSpec::new("cmake")).with_dependency("configure"))
            .unwrap()
            .stage(StageSpec::new("test", CommandSpec::new("ctest")).with_dependency("build"))
            .unwrap()
            .stage(
                StageSpec::new("lint", CommandSpec::new("clang-tidy"))
                    .with_dependency("configure")
                    .optional(),
            )
            .unwrap()
            .build()
            .unwrap()
    }

    #[test]
    fn test_render_plan() {
        assert_eq!(
            render_plan(&graph()),
            "Pipeline 'demo': 4 stage(s) in 3 batch(es)\n  \
             1. configure\n  \
             2. build, lint (optional)\n  \
             3. test\n"
        );
    }

    #[test]
    fn test_plan_json() {
        let value = plan_json(&graph());
        assert_eq!(value["pipeline"], "demo");
        assert_eq!(
            value["batches"],
            json!([["configure"], ["build", "lint"], ["test"]])
        );
    }
}
