//! OTLP/HTTP trace export.
//!
//! Exports are fire-and-forget: failures are logged and never surface into
//! the event stream.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use serde_json::{json, Value};
use tracing::{debug, warn};

use warpline_core::WarplineError;

use crate::model::{SpanKind, SpanStatus, Trace};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OtlpProtocol {
    Grpc,
    Http,
}

#[derive(Clone, Debug)]
pub struct OtlpConfig {
    pub protocol: OtlpProtocol,
    pub endpoint: String,
    pub headers: HashMap<String, String>,
    /// Fraction of traces exported, in [0, 1].
    pub sample_rate: f64,
}

impl OtlpConfig {
    pub fn http(endpoint: impl Into<String>) -> Self {
        Self {
            protocol: OtlpProtocol::Http,
            endpoint: endpoint.into(),
            headers: HashMap::new(),
            sample_rate: 1.0,
        }
    }
}

pub struct OtlpExporter {
    config: OtlpConfig,
    http: reqwest::Client,
}

impl OtlpExporter {
    pub fn new(config: OtlpConfig) -> Result<Self, WarplineError> {
        if config.protocol == OtlpProtocol::Grpc {
            return Err(WarplineError::InvalidConfig(
                "grpc transport is not compiled into this build; use the http endpoint".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&config.sample_rate) {
            return Err(WarplineError::InvalidConfig(format!(
                "sample_rate {} outside [0, 1]",
                config.sample_rate
            )));
        }
        Ok(Self {
            config,
            http: reqwest::Client::new(),
        })
    }

    /// Deterministic per-trace sampling so retries of the same trace id make
    /// the same decision.
    pub fn should_sample(&self, trace_id: &str) -> bool {
        if self.config.sample_rate >= 1.0 {
            return true;
        }
        if self.config.sample_rate <= 0.0 {
            return false;
        }
        let mut hasher = DefaultHasher::new();
        trace_id.hash(&mut hasher);
        let bucket = (hasher.finish() % 10_000) as f64 / 10_000.0;
        bucket < self.config.sample_rate
    }

    pub async fn export(&self, trace: &Trace) {
        if !self.should_sample(&trace.trace_id) {
            debug!(trace_id = %trace.trace_id, "trace not sampled");
            return;
        }
        let payload = otlp_payload(trace);
        let mut request = self.http.post(&self.config.endpoint).json(&payload);
        for (key, value) in &self.config.headers {
            request = request.header(key, value);
        }
        match request.send().await {
            Ok(response) if response.status().is_success() => {
                debug!(trace_id = %trace.trace_id, "trace exported");
            }
            Ok(response) => {
                warn!(
                    trace_id = %trace.trace_id,
                    status = %response.status(),
                    "otlp export rejected"
                );
            }
            Err(err) => {
                warn!(trace_id = %trace.trace_id, %err, "otlp export failed");
            }
        }
    }
}

fn hex_id(id: &str, len: usize) -> String {
    let hex: String = id
        .chars()
        .filter(char::is_ascii_hexdigit)
        .take(len)
        .collect();
    format!("{hex:0<len$}")
}

fn span_kind_label(kind: SpanKind) -> &'static str {
    match kind {
        SpanKind::Agent => "agent",
        SpanKind::Workflow => "workflow",
        SpanKind::Stage => "stage",
        SpanKind::LlmCall => "llm_call",
        SpanKind::ToolCall => "tool_call",
    }
}

fn otlp_payload(trace: &Trace) -> Value {
    let spans: Vec<Value> = trace
        .spans
        .iter()
        .map(|span| {
            let start_ns = span.started_at.timestamp_nanos_opt().unwrap_or(0);
            let end_ns = span
                .finished_at
                .unwrap_or(span.started_at)
                .timestamp_nanos_opt()
                .unwrap_or(start_ns);
            let mut attributes = vec![json!({
                "key": "warpline.span_kind",
                "value": { "stringValue": span_kind_label(span.kind) }
            })];
            for (key, value) in &span.attributes {
                attributes.push(json!({
                    "key": key,
                    "value": { "stringValue": value.as_str().map(str::to_string).unwrap_or_else(|| value.to_string()) }
                }));
            }
            json!({
                "traceId": hex_id(&span.trace_id, 32),
                "spanId": hex_id(&span.span_id, 16),
                "parentSpanId": span.parent_span_id.as_deref().map(|id| hex_id(id, 16)),
                "name": span.name,
                "kind": 1,
                "startTimeUnixNano": start_ns.to_string(),
                "endTimeUnixNano": end_ns.to_string(),
                "attributes": attributes,
                "status": { "code": if span.status == SpanStatus::Error { 2 } else { 1 } },
            })
        })
        .collect();

    json!({
        "resourceSpans": [{
            "resource": {
                "attributes": [{
                    "key": "service.name",
                    "value": { "stringValue": "warpline" }
                }]
            },
            "scopeSpans": [{
                "scope": { "name": "warpline-trace" },
                "spans": spans,
            }]
        }]
    })
}
