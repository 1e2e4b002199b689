use crate::plan::{TemplateVars, TestPlanDescriptor};
use crate::remote::{RemoteAccess, RemoteConnector};
use crate::settings::OrchestratorSettings;

/// Collaborators an agent borrows from its cluster for one operation.
#[derive(Clone, Copy)]
pub struct AgentContext<'ctx> {
    pub connector: &'ctx dyn RemoteConnector,
    pub access: &'ctx RemoteAccess,
    pub tool_home: &'ctx str,
    pub plan: &'ctx dyn TestPlanDescriptor,
    pub settings: &'ctx OrchestratorSettings,
    /// Agents sharing the plan in this cluster.
    pub agent_count: u32,
}

impl AgentContext<'_> {
    pub(crate) fn template_vars(&self) -> TemplateVars {
        let mut vars = TemplateVars::new();
        vars.insert("user_home".to_owned(), self.access.user_home());
        vars.insert("tool_home".to_owned(), self.tool_home.to_owned());
        vars
    }
}
