//! StepEvent - everything that travels on the Wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{NestingType, RunnableType, Step, ToolCallFragment};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepEventType {
    StepDelta,
    StepCompleted,
    RunStarted,
    RunCompleted,
    RunFailed,
    StageStarted,
    StageCompleted,
    StageSkipped,
    IterationStarted,
    BranchStarted,
    BranchCompleted,
    Error,
}

/// Incremental update to an in-flight Step.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StepDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallFragment>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepEvent {
    #[serde(rename = "type")]
    pub event_type: StepEventType,
    pub run_id: String,
    pub timestamp: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta: Option<StepDelta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<Step>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iteration: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,
    #[serde(default)]
    pub depth: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_run_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runnable_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runnable_type: Option<RunnableType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nesting_type: Option<NestingType>,
}

impl StepEvent {
    pub fn new(event_type: StepEventType, run_id: impl Into<String>) -> Self {
        Self {
            event_type,
            run_id: run_id.into(),
            timestamp: Utc::now(),
            step_id: None,
            delta: None,
            snapshot: None,
            data: None,
            node_id: None,
            branch_id: None,
            iteration: None,
            trace_id: None,
            span_id: None,
            parent_span_id: None,
            depth: 0,
            parent_run_id: None,
            runnable_id: None,
            runnable_type: None,
            nesting_type: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.event_type,
            StepEventType::RunCompleted | StepEventType::RunFailed
        )
    }

    /// One SSE frame per event: `data: <json>\n\n`.
    pub fn to_sse(&self) -> String {
        let payload = serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string());
        format!("data: {payload}\n\n")
    }
}
