//! Input templates with static dependency extraction.
//!
//! Templates use `{path}` placeholders resolved against the workflow's
//! output scope, e.g. `{input}`, `{nodes.classify.output}`,
//! `{loop.last.draft}`. Unresolvable paths render empty.

use regex::Regex;
use serde_json::Value;

fn placeholder_pattern() -> Regex {
    Regex::new(r"\{([A-Za-z0-9_][A-Za-z0-9_.-]*)\}").expect("valid placeholder regex")
}

/// Walk a dot path into a JSON scope.
pub fn resolve_path<'a>(scope: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = scope;
    for part in path.split('.') {
        current = current.get(part)?;
    }
    Some(current)
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[derive(Clone, Debug)]
pub struct InputTemplate {
    raw: String,
}

impl InputTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            raw: template.into(),
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn render(&self, scope: &Value) -> String {
        placeholder_pattern()
            .replace_all(&self.raw, |caps: &regex::Captures| {
                resolve_path(scope, &caps[1])
                    .map(value_to_text)
                    .unwrap_or_default()
            })
            .into_owned()
    }

    pub fn placeholders(&self) -> Vec<String> {
        placeholder_pattern()
            .captures_iter(&self.raw)
            .map(|caps| caps[1].to_string())
            .collect()
    }

    /// Node ids this template depends on, extracted statically from
    /// `nodes.X.output` and `loop.last.X` references.
    pub fn node_dependencies(&self) -> Vec<String> {
        let mut deps = Vec::new();
        for placeholder in self.placeholders() {
            let parts: Vec<&str> = placeholder.split('.').collect();
            let dep = match parts.as_slice() {
                ["nodes", node, "output"] => Some(node.to_string()),
                ["loop", "last", node] => Some(node.to_string()),
                _ => None,
            };
            if let Some(dep) = dep {
                if !deps.contains(&dep) {
                    deps.push(dep);
                }
            }
        }
        deps
    }
}
