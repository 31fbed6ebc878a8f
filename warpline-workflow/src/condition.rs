//! Condition expressions over the workflow output scope.
//!
//! Grammar, loosest binding first: `or`, then `and`, then a simple clause.
//! A simple clause is `not <clause>`, `<lhs> contains <rhs>`, a comparison
//! (`> < >= <= == !=`, numeric when both sides parse), or bare truthiness
//! of the resolved text. Variables are `{path}` placeholders; an empty
//! resolution is falsy. Expressions are validated when parsed, so a bad
//! condition fails at configuration time, not mid-run.

use regex::Regex;
use serde_json::Value;

use warpline_core::WarplineError;

use crate::template::resolve_path;

const OPERATORS: [&str; 6] = [">=", "<=", "!=", "==", ">", "<"];

#[derive(Clone, Debug)]
pub struct Condition {
    raw: String,
}

impl Condition {
    pub fn parse(expression: &str) -> Result<Self, WarplineError> {
        let trimmed = expression.trim();
        if trimmed.is_empty() {
            return Err(WarplineError::InvalidConfig(
                "empty condition expression".to_string(),
            ));
        }
        let opens = trimmed.matches('{').count();
        let closes = trimmed.matches('}').count();
        if opens != closes {
            return Err(WarplineError::InvalidConfig(format!(
                "unbalanced braces in condition '{trimmed}'"
            )));
        }
        let lower = trimmed.to_lowercase();
        let has_operator = OPERATORS.iter().any(|op| lower.contains(op))
            || [" contains ", " and ", " or ", "not "]
                .iter()
                .any(|op| lower.contains(op));
        let has_variable = trimmed.contains('{');
        if !has_operator && !has_variable && lower != "true" && lower != "false" {
            return Err(WarplineError::InvalidConfig(format!(
                "condition '{trimmed}' has no operator, variable or boolean constant"
            )));
        }
        Ok(Self {
            raw: trimmed.to_string(),
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn evaluate(&self, scope: &Value) -> bool {
        let lower = self.raw.to_lowercase();
        if lower == "true" {
            return true;
        }
        if lower == "false" {
            return false;
        }
        let resolved = substitute(&self.raw, scope);
        evaluate_logical(&resolved)
    }
}

fn substitute(expression: &str, scope: &Value) -> String {
    let pattern = Regex::new(r"\{([A-Za-z0-9_][A-Za-z0-9_.-]*)\}").expect("valid variable regex");
    pattern
        .replace_all(expression, |caps: &regex::Captures| {
            match resolve_path(scope, &caps[1]) {
                Some(Value::String(text)) => text.clone(),
                Some(Value::Null) | None => String::new(),
                Some(other) => other.to_string(),
            }
        })
        .into_owned()
}

fn split_keyword<'a>(expression: &'a str, keyword: &str) -> Option<Vec<&'a str>> {
    let pattern = Regex::new(&format!(r"(?i)\s+{keyword}\s+")).expect("valid keyword regex");
    let parts: Vec<&str> = pattern.split(expression).collect();
    (parts.len() > 1).then_some(parts)
}

fn evaluate_logical(expression: &str) -> bool {
    if let Some(parts) = split_keyword(expression, "or") {
        return parts.iter().any(|part| evaluate_and(part.trim()));
    }
    evaluate_and(expression)
}

fn evaluate_and(expression: &str) -> bool {
    if let Some(parts) = split_keyword(expression, "and") {
        return parts.iter().all(|part| evaluate_simple(part.trim()));
    }
    evaluate_simple(expression)
}

fn strip_quotes(text: &str) -> &str {
    text.trim().trim_matches(|ch| ch == '\'' || ch == '"')
}

fn evaluate_simple(expression: &str) -> bool {
    let expression = expression.trim();
    if expression.is_empty() {
        return false;
    }

    if let Some(inner) = expression
        .strip_prefix("not ")
        .or_else(|| expression.strip_prefix("NOT "))
    {
        return !evaluate_simple(inner.trim());
    }

    if let Some(parts) = split_keyword(expression, "contains") {
        if parts.len() == 2 {
            let haystack = strip_quotes(parts[0]);
            let needle = strip_quotes(parts[1]);
            return haystack.contains(needle);
        }
    }

    for op in OPERATORS {
        if let Some(index) = expression.find(op) {
            let left = strip_quotes(&expression[..index]);
            let right = strip_quotes(&expression[index + op.len()..]);
            return compare(left, right, op);
        }
    }

    // Bare value: non-empty, non-"false" text is truthy.
    !expression.eq_ignore_ascii_case("false")
}

fn compare(left: &str, right: &str, op: &str) -> bool {
    if let (Ok(left_num), Ok(right_num)) = (left.parse::<f64>(), right.parse::<f64>()) {
        return match op {
            ">=" => left_num >= right_num,
            "<=" => left_num <= right_num,
            "!=" => left_num != right_num,
            "==" => left_num == right_num,
            ">" => left_num > right_num,
            "<" => left_num < right_num,
            _ => false,
        };
    }
    match op {
        ">=" => left >= right,
        "<=" => left <= right,
        "!=" => left != right,
        "==" => left == right,
        ">" => left > right,
        "<" => left < right,
        _ => false,
    }
}
