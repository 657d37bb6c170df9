//! Deterministic JSON rendering.
//!
//! Keys are re-sorted explicitly instead of relying on `serde_json::Map`
//! ordering, which depends on whether `preserve_order` is enabled anywhere in
//! the dependency graph.

use peloton_client::WorkoutSummary;
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// Rebuild `value` with object keys in lexicographic order at every level.
/// Arrays keep their element order.
pub fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, canonicalize(v)))
                    .collect::<Map<String, Value>>(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

/// Render the final document: canonical keys, two-space indent, trailing newline.
pub fn render(value: Value) -> Result<String, serde_json::Error> {
    let mut out = serde_json::to_string_pretty(&canonicalize(value))?;
    out.push('\n');
    Ok(out)
}

/// Newest first by `created_at`. Entries without a numeric timestamp keep
/// their relative order after the dated ones.
pub fn order_workouts(mut workouts: Vec<WorkoutSummary>) -> Vec<WorkoutSummary> {
    workouts.sort_by(|a, b| match (created_at(a), created_at(b)) {
        (Some(x), Some(y)) => y.total_cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
    workouts
}

fn created_at(workout: &WorkoutSummary) -> Option<f64> {
    workout.get("created_at").and_then(Value::as_f64)
}
