//! Server-Sent Events framing for the Wire protocol: one `data: <json>`
//! frame per StepEvent.

use serde_json::json;
use warpline_core::StepEvent;

pub fn event_frame(event: &StepEvent) -> String {
    event.to_sse()
}

pub fn ping_frame() -> String {
    format!("data: {}\n\n", json!({ "type": "ping" }))
}

/// Sent after the Wire closes so clients can distinguish a finished stream
/// from a dropped connection.
pub fn done_frame() -> String {
    format!("data: {}\n\n", json!({ "type": "done" }))
}
