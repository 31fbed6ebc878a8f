//! Batched tool invocation with caching, deadlines and abort handling.
//!
//! Tool failures never propagate: every requested call produces exactly one
//! ToolResult, so the conversation always gets one tool message per call and
//! the model can react to errors itself.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use futures::future::join_all;
use serde_json::{json, Value};
use tracing::{debug, warn};

use warpline_core::{
    effective_timeout, ExecutionContext, Tool, ToolCallData, ToolResult,
};

/// Per-session memo for cacheable tools, keyed by canonicalised arguments.
/// Shared across parallel tool calls, hence the concurrent map.
#[derive(Default)]
pub struct ToolResultCache {
    entries: DashMap<(String, String, String), ToolResult>,
}

impl ToolResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(session_id: &str, tool_name: &str, args: &Value) -> (String, String, String) {
        // serde_json maps are sorted, so serialisation is canonical.
        (
            session_id.to_string(),
            tool_name.to_string(),
            args.to_string(),
        )
    }

    pub fn get(&self, session_id: &str, tool_name: &str, args: &Value) -> Option<ToolResult> {
        self.entries
            .get(&Self::key(session_id, tool_name, args))
            .map(|entry| entry.clone())
    }

    pub fn put(&self, session_id: &str, tool_name: &str, args: &Value, result: ToolResult) {
        self.entries
            .insert(Self::key(session_id, tool_name, args), result);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Parse a tool-call argument string: strict JSON first, then a lenient pass
/// for Python-literal style output some models emit.
pub fn parse_arguments(raw: &str) -> Result<Value, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(json!({}));
    }
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Ok(value);
    }
    let relaxed = trimmed
        .replace('\'', "\"")
        .replace(": True", ": true")
        .replace(": False", ": false")
        .replace(": None", ": null");
    serde_json::from_str::<Value>(&relaxed)
        .map_err(|err| format!("invalid tool arguments: {err}"))
}

fn content_for(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

pub struct ToolExecutor {
    tools: HashMap<String, Arc<dyn Tool>>,
    cache: Arc<ToolResultCache>,
    default_timeout: Option<Duration>,
}

impl ToolExecutor {
    pub fn new(tools: &[Arc<dyn Tool>], cache: Arc<ToolResultCache>) -> Self {
        Self {
            tools: tools
                .iter()
                .map(|tool| (tool.name().to_string(), Arc::clone(tool)))
                .collect(),
            cache,
            default_timeout: None,
        }
    }

    pub fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Execute one tool call. Always returns a result, never an error.
    pub async fn execute(&self, call: &ToolCallData, ctx: &ExecutionContext) -> ToolResult {
        let started_at = Utc::now();
        let name = call.function.name.as_str();

        let Some(tool) = self.tools.get(name) else {
            return ToolResult::failure(name, &call.id, format!("tool '{name}' not found"), started_at);
        };

        let parsed = match parse_arguments(&call.function.arguments) {
            Ok(args) => args,
            Err(reason) => {
                return ToolResult::failure(name, &call.id, reason, started_at);
            }
        };
        // The cache key is the pristine argument set; the call id injected
        // below differs per call and must not defeat the memo.
        let mut args = parsed.clone();
        if let Value::Object(map) = &mut args {
            map.insert("tool_call_id".to_string(), Value::String(call.id.clone()));
        }

        if tool.cacheable() {
            if let Some(hit) = self.cache.get(&ctx.session_id, name, &parsed) {
                debug!(tool = name, "tool cache hit");
                let now = Utc::now();
                return ToolResult {
                    tool_call_id: call.id.clone(),
                    started_at: now,
                    finished_at: now,
                    duration_ms: 0.0,
                    ..hit
                };
            }
        }

        let limit = effective_timeout(tool.timeout().or(self.default_timeout), ctx.timeout_at);
        let execution = tool.execute(args.clone(), ctx, &ctx.abort);

        let outcome = tokio::select! {
            result = execution => Some(result),
            _ = ctx.abort.cancelled() => None,
            _ = sleep_until_limit(limit) => {
                warn!(tool = name, ?limit, "tool call timed out");
                let mut failure = ToolResult::failure(
                    name,
                    &call.id,
                    format!("timeout after {limit:?}"),
                    started_at,
                );
                failure.input_args = args;
                return failure;
            }
        };

        let finished_at = Utc::now();
        let duration_ms = (finished_at - started_at).num_milliseconds() as f64;

        match outcome {
            None => {
                let mut failure = ToolResult::failure(name, &call.id, "Aborted", started_at);
                failure.input_args = args;
                failure
            }
            Some(Ok(output)) => {
                let result = ToolResult {
                    tool_name: name.to_string(),
                    tool_call_id: call.id.clone(),
                    input_args: args.clone(),
                    content: content_for(&output),
                    output: Some(output),
                    error: None,
                    started_at,
                    finished_at,
                    duration_ms,
                    is_success: true,
                };
                if tool.cacheable() {
                    self.cache
                        .put(&ctx.session_id, name, &parsed, result.clone());
                }
                result
            }
            Some(Err(error)) => {
                let mut failure =
                    ToolResult::failure(name, &call.id, error.to_string(), started_at);
                failure.input_args = args;
                failure
            }
        }
    }

    /// Concurrent fan-out; the result order matches the input order. A
    /// batch touching any tool that is not concurrency-safe degrades to
    /// sequential execution.
    pub async fn execute_batch(
        &self,
        calls: &[ToolCallData],
        ctx: &ExecutionContext,
    ) -> Vec<ToolResult> {
        let all_safe = calls.iter().all(|call| {
            self.tools
                .get(call.function.name.as_str())
                .map(|tool| tool.concurrency_safe())
                .unwrap_or(true)
        });
        if all_safe {
            join_all(calls.iter().map(|call| self.execute(call, ctx))).await
        } else {
            let mut results = Vec::with_capacity(calls.len());
            for call in calls {
                results.push(self.execute(call, ctx).await);
            }
            results
        }
    }
}

async fn sleep_until_limit(limit: Option<Duration>) {
    match limit {
        Some(duration) => tokio::time::sleep(duration).await,
        // No limit: park forever so the select never takes this branch.
        None => std::future::pending().await,
    }
}
