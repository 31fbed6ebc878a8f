//! RunnableTool - expose any Runnable as a callable tool.
//!
//! This is the nesting point: an agent's tool list may contain other agents
//! or whole workflows, and the nested execution streams its own Run
//! lifecycle into the same Wire.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use warpline_core::{
    AbortSignal, ExecutionContext, NestingType, Runnable, Tool, ToolError,
};

use crate::runnable_executor::RunnableExecutor;

pub const DEFAULT_MAX_DEPTH: u32 = 8;

pub struct RunnableTool {
    runnable: Arc<dyn Runnable>,
    executor: RunnableExecutor,
    description: String,
    max_depth: u32,
}

impl RunnableTool {
    pub fn new(runnable: Arc<dyn Runnable>, executor: RunnableExecutor) -> Self {
        let description = format!(
            "Delegate a task to '{}'. Pass the full request as `query`.",
            runnable.id()
        );
        Self {
            runnable,
            executor,
            description,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_max_depth(mut self, max_depth: u32) -> Self {
        self.max_depth = max_depth;
        self
    }
}

#[async_trait]
impl Tool for RunnableTool {
    fn name(&self) -> &str {
        self.runnable.id()
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The task or question to hand to the nested runnable."
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(
        &self,
        args: Value,
        ctx: &ExecutionContext,
        _abort: &AbortSignal,
    ) -> Result<Value, ToolError> {
        let query = args
            .get("query")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidInput("missing 'query' argument".to_string()))?;

        // Cycle guard: the lineage is every runnable id on the call stack.
        let target = self.runnable.id();
        let mut lineage = ctx.runnable_path();
        if let Some(current) = &ctx.runnable_id {
            lineage.push(current.clone());
        }
        if lineage.iter().any(|id| id.as_str() == target) {
            return Err(ToolError::ExecutionFailed(format!(
                "circular runnable reference: '{target}' already on the call path {lineage:?}"
            )));
        }
        if ctx.depth >= self.max_depth {
            return Err(ToolError::ExecutionFailed(format!(
                "max nesting depth ({}) exceeded",
                self.max_depth
            )));
        }

        let mut base = ctx.clone();
        if let Some(current) = &ctx.runnable_id {
            base = base.push_runnable_path(current);
        }
        let child_ctx = base.child(target, self.runnable.runnable_type(), NestingType::ToolCall);

        debug!(target, depth = child_ctx.depth, "invoking nested runnable");
        let output = self
            .executor
            .execute(self.runnable.as_ref(), query, &child_ctx)
            .await
            .map_err(|err| ToolError::ExecutionFailed(err.to_string()))?;

        Ok(Value::String(output.response.unwrap_or_default()))
    }
}
