//! Trace and Span: the reconstructed execution tree of one top-level run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

pub const PREVIEW_LENGTH: usize = 500;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SpanKind {
    Agent,
    Workflow,
    Stage,
    LlmCall,
    ToolCall,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SpanStatus {
    Running,
    Ok,
    Error,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Span {
    pub span_id: String,
    pub trace_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,
    pub kind: SpanKind,
    pub name: String,
    pub depth: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub status: SpanStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_preview: Option<String>,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl Span {
    pub fn new(trace_id: &str, kind: SpanKind, name: impl Into<String>) -> Self {
        Self {
            span_id: Uuid::new_v4().to_string(),
            trace_id: trace_id.to_string(),
            parent_span_id: None,
            kind,
            name: name.into(),
            depth: 0,
            run_id: None,
            started_at: Utc::now(),
            finished_at: None,
            status: SpanStatus::Running,
            error_message: None,
            output_preview: None,
            attributes: Map::new(),
        }
    }

    pub fn complete(&mut self, status: SpanStatus) {
        if self.finished_at.is_none() {
            self.finished_at = Some(Utc::now());
        }
        self.status = status;
    }

    pub fn duration_ms(&self) -> Option<f64> {
        self.finished_at
            .map(|end| (end - self.started_at).num_milliseconds() as f64)
    }
}

pub fn preview(text: &str) -> String {
    if text.len() <= PREVIEW_LENGTH {
        text.to_string()
    } else {
        let mut cut = PREVIEW_LENGTH;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}…", &text[..cut])
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Trace {
    pub trace_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runnable_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_query: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub status: SpanStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_span_id: Option<String>,
    pub spans: Vec<Span>,

    pub total_tokens: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub llm_call_count: u64,
    pub tool_call_count: u64,
    pub max_depth: u32,
}

impl Trace {
    pub fn new(trace_id: impl Into<String>) -> Self {
        Self {
            trace_id: trace_id.into(),
            session_id: None,
            user_id: None,
            runnable_id: None,
            input_query: None,
            started_at: Utc::now(),
            finished_at: None,
            status: SpanStatus::Running,
            root_span_id: None,
            spans: Vec::new(),
            total_tokens: 0,
            input_tokens: 0,
            output_tokens: 0,
            llm_call_count: 0,
            tool_call_count: 0,
            max_depth: 0,
        }
    }

    pub fn add_span(&mut self, span: Span) -> String {
        if self.root_span_id.is_none() && span.parent_span_id.is_none() {
            self.root_span_id = Some(span.span_id.clone());
        }
        self.max_depth = self.max_depth.max(span.depth);
        let id = span.span_id.clone();
        self.spans.push(span);
        id
    }

    pub fn span_mut(&mut self, span_id: &str) -> Option<&mut Span> {
        self.spans.iter_mut().find(|span| span.span_id == span_id)
    }

    pub fn span(&self, span_id: &str) -> Option<&Span> {
        self.spans.iter().find(|span| span.span_id == span_id)
    }

    pub fn complete(&mut self, status: SpanStatus) {
        if self.finished_at.is_none() {
            self.finished_at = Some(Utc::now());
        }
        self.status = status;
        for span in &mut self.spans {
            if span.status == SpanStatus::Running {
                span.complete(status);
            }
        }
    }
}
