//! Test plans as seen by the orchestrator: thread counts, artifacts to sync,
//! and the command lines that start and stop the load generator.
mod template;
mod test_plan;
mod tree;

#[cfg(test)]
mod tests;

use std::path::PathBuf;

pub use template::{TemplateVars, render_command};
pub use test_plan::TestPlan;
pub use tree::DirectoryTree;

/// A local file and where it lands, relative to the remote user's home.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub local: PathBuf,
    pub remote: String,
}

/// Everything an agent needs to know about the plan it is bound to.
///
/// Command templates may reference `{{user_home}}` and `{{tool_home}}`; the
/// agent substitutes them with values resolved from its cluster.
pub trait TestPlanDescriptor: Send + Sync {
    /// Stable identifier agents use to refer to this plan.
    fn id(&self) -> &str;

    /// Total load threads the plan asks for across all agents.
    fn num_threads(&self) -> u32;

    fn content_hash(&self) -> &str;

    /// Whether the plan content differs from the hash recorded at the last
    /// sync. A missing hash always counts as changed.
    fn content_changed(&self, since: Option<&str>) -> bool {
        since != Some(self.content_hash())
    }

    fn remote_directory_layout(&self) -> DirectoryTree;

    fn artifacts(&self) -> &[Artifact];

    /// Name used to find the running load generator in the process table.
    fn binary_name(&self) -> &str;

    /// Command for the coordinating agent. `slave_addresses` is empty in flat
    /// topology. `agent_count` is the number of agents sharing the plan in one
    /// cluster.
    fn master_command_template(
        &self,
        master_address: &str,
        slave_addresses: &[String],
        agent_count: u32,
    ) -> String;

    fn slave_command_template(&self, slave_address: &str, agent_count: u32) -> String;

    fn stop_command_template(&self) -> String;

    /// True when the plan never ends on its own.
    fn loops_forever(&self) -> bool;

    /// Results file written by the coordinating agent, relative to the
    /// remote user's home.
    fn remote_result_file(&self) -> String;
}
