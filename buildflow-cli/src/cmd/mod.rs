mod args;
mod cache;
mod plan;
mod run;

pub use args::{BuildArgs, CacheCommand, ExecArgs};
pub use cache::cmd_cache;
pub use plan::cmd_plan;
pub use run::cmd_run;

use std::path::Path;

use buildflow::config::BuildflowConfig;
use buildflow::errors::BuildflowError;
use buildflow::pipeline::StageGraph;
use buildflow::presets::CmakeProject;

/// Everything a command needs before it can schedule.
pub struct Loaded {
    pub config: BuildflowConfig,
    pub project: CmakeProject,
    pub graph: StageGraph,
}

/// Loads the config, builds the CMake graph for `build.command`, and narrows
/// it to `--only` when given.
pub fn load(root: &Path, build: &BuildArgs) -> Result<Loaded, BuildflowError> {
    let config = BuildflowConfig::load(root)?;
    let project = CmakeProject::from_config(root, &config, build.options(&config));
    let mut graph = project.graph(build.command)?;
    if !build.only.is_empty() {
        graph = graph.only(&build.only)?;
    }
    Ok(Loaded {
        config,
        project,
        graph,
    })
}
