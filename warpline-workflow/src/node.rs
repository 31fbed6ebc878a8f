//! WorkflowNode - pure configuration for one workflow step.

use std::sync::Arc;

use serde_json::Value;

use warpline_core::{Runnable, RunnableRegistry, WarplineError};

use crate::condition::Condition;
use crate::template::InputTemplate;

#[derive(Clone)]
pub enum NodeRunnable {
    Instance(Arc<dyn Runnable>),
    Reference(String),
}

impl std::fmt::Debug for NodeRunnable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeRunnable::Instance(r) => f.debug_tuple("Instance").field(&r.id()).finish(),
            NodeRunnable::Reference(s) => f.debug_tuple("Reference").field(s).finish(),
        }
    }
}

/// Static description of a node: what to run, how to build its input, and
/// when to run it. No runtime state lives here; execution state is Steps.
#[derive(Clone, Debug)]
pub struct WorkflowNode {
    pub id: String,
    runnable: NodeRunnable,
    pub input_template: InputTemplate,
    pub condition: Option<Condition>,
}

impl WorkflowNode {
    pub fn new(
        id: impl Into<String>,
        runnable: Arc<dyn Runnable>,
        input_template: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            runnable: NodeRunnable::Instance(runnable),
            input_template: InputTemplate::new(input_template),
            condition: None,
        }
    }

    /// Node referring to a registry entry instead of a held instance.
    pub fn reference(
        id: impl Into<String>,
        runnable_id: impl Into<String>,
        input_template: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            runnable: NodeRunnable::Reference(runnable_id.into()),
            input_template: InputTemplate::new(input_template),
            condition: None,
        }
    }

    /// Attach a condition; invalid expressions fail here, at load time.
    pub fn with_condition(mut self, expression: &str) -> Result<Self, WarplineError> {
        self.condition = Some(Condition::parse(expression)?);
        Ok(self)
    }

    pub fn dependencies(&self) -> Vec<String> {
        self.input_template.node_dependencies()
    }

    pub fn should_execute(&self, scope: &Value) -> bool {
        self.condition
            .as_ref()
            .map(|condition| condition.evaluate(scope))
            .unwrap_or(true)
    }

    pub fn resolve(
        &self,
        registry: Option<&RunnableRegistry>,
    ) -> Result<Arc<dyn Runnable>, WarplineError> {
        match &self.runnable {
            NodeRunnable::Instance(runnable) => Ok(Arc::clone(runnable)),
            NodeRunnable::Reference(id) => registry
                .ok_or_else(|| {
                    WarplineError::InvalidConfig(format!(
                        "node '{}' references runnable '{id}' but no registry is configured",
                        self.id
                    ))
                })?
                .require(id),
        }
    }
}

/// Reject duplicate node ids at workflow construction.
pub(crate) fn validate_nodes(workflow_id: &str, nodes: &[WorkflowNode]) -> Result<(), WarplineError> {
    let mut seen = std::collections::HashSet::new();
    for node in nodes {
        if !seen.insert(node.id.as_str()) {
            return Err(WarplineError::InvalidConfig(format!(
                "workflow '{workflow_id}' has duplicate node id '{}'",
                node.id
            )));
        }
    }
    Ok(())
}
