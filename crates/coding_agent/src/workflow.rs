//! Named phases run one after another against the same agent.

use agent_protocol::ResponseItem;
use async_trait::async_trait;

use crate::agent_loop::AgentLoop;
use crate::error::AgentError;

#[async_trait]
pub trait WorkflowPhase: Send + Sync {
    fn name(&self) -> &str;

    async fn run(
        &self,
        agent: &AgentLoop,
        input: Vec<ResponseItem>,
        previous_response_id: &str,
    ) -> Result<(), AgentError>;
}

/// Phase that hands the input straight to [`AgentLoop::run`].
#[derive(Debug, Clone, Copy, Default)]
pub struct AgentPhase;

#[async_trait]
impl WorkflowPhase for AgentPhase {
    fn name(&self) -> &str {
        "agent"
    }

    async fn run(
        &self,
        agent: &AgentLoop,
        input: Vec<ResponseItem>,
        previous_response_id: &str,
    ) -> Result<(), AgentError> {
        agent.run(input, previous_response_id).await
    }
}

#[derive(Default)]
pub struct Workflow {
    phases: Vec<Box<dyn WorkflowPhase>>,
}

impl Workflow {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_phase(mut self, phase: impl WorkflowPhase + 'static) -> Self {
        self.phases.push(Box::new(phase));
        self
    }

    pub fn names(&self) -> Vec<&str> {
        self.phases.iter().map(|phase| phase.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }
}

pub fn default_workflow() -> Workflow {
    Workflow::new().with_phase(AgentPhase)
}

/// Runs every phase in order with the same input and starting response id.
/// The first failing phase stops the workflow.
pub async fn run_workflow(
    workflow: &Workflow,
    agent: &AgentLoop,
    input: &[ResponseItem],
    previous_response_id: &str,
) -> Result<(), AgentError> {
    for phase in &workflow.phases {
        tracing::info!(phase = phase.name(), "running workflow phase");
        phase.run(agent, input.to_vec(), previous_response_id).await?;
    }
    Ok(())
}
