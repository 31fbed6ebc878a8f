//! The output scope workflows render templates and conditions against.

use serde_json::{json, Value};

/// Accumulated node outputs for one workflow run.
///
/// Scope layout, all addressable from templates:
/// - `input` (and its alias `query`): the workflow input
/// - `<node_id>`: that node's output text (top-level shorthand)
/// - `nodes.<node_id>.output`: the same, fully qualified
/// - `loop.iteration`, `loop.last.<node_id>`, `loop.history[]`
#[derive(Clone, Debug)]
pub struct OutputMap {
    scope: Value,
}

impl OutputMap {
    pub fn new(input: &str) -> Self {
        Self {
            scope: json!({
                "input": input,
                "query": input,
                "nodes": {},
            }),
        }
    }

    pub fn scope(&self) -> &Value {
        &self.scope
    }

    pub fn set_node_output(&mut self, node_id: &str, output: &str) {
        self.scope[node_id] = Value::String(output.to_string());
        self.scope["nodes"][node_id] = json!({ "output": output });
    }

    pub fn node_output(&self, node_id: &str) -> Option<&str> {
        self.scope["nodes"][node_id]["output"].as_str()
    }

    /// Begin an iteration: snapshot the previous iteration's node outputs
    /// into `loop.last`, append them to `loop.history`, bump the counter.
    pub fn start_iteration(&mut self, iteration: u32) {
        let previous = self.scope["nodes"]
            .as_object()
            .map(|nodes| {
                nodes
                    .iter()
                    .filter_map(|(id, entry)| {
                        entry["output"]
                            .as_str()
                            .map(|output| (id.clone(), Value::String(output.to_string())))
                    })
                    .collect::<serde_json::Map<_, _>>()
            })
            .unwrap_or_default();

        if iteration > 1 {
            let history = self.scope["loop"]["history"]
                .as_array()
                .cloned()
                .unwrap_or_default();
            let mut history = history;
            history.push(Value::Object(previous.clone()));
            self.scope["loop"] = json!({
                "iteration": iteration,
                "last": Value::Object(previous),
                "history": history,
            });
        } else {
            self.scope["loop"] = json!({
                "iteration": iteration,
                "last": {},
                "history": [],
            });
        }
    }

    pub fn iteration(&self) -> Option<u32> {
        self.scope["loop"]["iteration"].as_u64().map(|n| n as u32)
    }
}
