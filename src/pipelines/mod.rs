pub mod contamination;
pub mod mapping;
pub mod runner;
pub mod workflow;

use crate::config::run::RunConfiguration;
use workflow::Workflow;

/// Builds the full run: the contamination gate first, so nothing is mapped
/// for a library that fails it, then the mapping stage.
pub fn build_workflow(config: &RunConfiguration, with_contamination: bool) -> Workflow {
    let mut workflow = Workflow::from_config(config);
    if with_contamination {
        contamination::lib_contamination(&mut workflow, config);
    }
    mapping::reads_mapping(&mut workflow, config);
    workflow
}
