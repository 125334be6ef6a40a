// Span trees for trace queries

use std::collections::HashMap;
use std::fmt::Write;

use anyhow::{Result, anyhow};
use chrono::DateTime;
use rmcp::model::JsonObject;
use serde_json::Value;

use super::{ResponseTransformer, array_field, num_field, str_field};

/// `get_traces`: one indented span tree per trace.
pub struct TracesTransformer;

struct Span<'a> {
    id: Option<&'a str>,
    parent: Option<&'a str>,
    name: &'a str,
    service: Option<&'a str>,
    start_nanos: Option<i64>,
    duration_ms: Option<f64>,
    is_error: bool,
}

impl<'a> Span<'a> {
    fn from_json(obj: &'a JsonObject) -> Self {
        let start_nanos = timestamp_nanos(obj, &["startTime", "startTimeUnixNano"]);
        let end_nanos = timestamp_nanos(obj, &["endTime", "endTimeUnixNano"]);

        let duration_ms = num_field(obj, &["durationNanoseconds", "durationNs"])
            .map(|ns| ns / 1_000_000.0)
            .or_else(|| num_field(obj, &["durationMs"]))
            .or_else(|| match (start_nanos, end_nanos) {
                (Some(start), Some(end)) if end >= start => Some((end - start) as f64 / 1_000_000.0),
                _ => None,
            });

        Self {
            id: str_field(obj, &["spanId"]).filter(|s| !s.is_empty()),
            parent: str_field(obj, &["parentSpanId"]).filter(|s| !s.is_empty()),
            name: str_field(obj, &["name", "spanName", "operationName"]).unwrap_or("(unnamed)"),
            service: str_field(obj, &["serviceName", "service"]),
            start_nanos,
            duration_ms,
            is_error: span_is_error(obj),
        }
    }
}

impl ResponseTransformer for TracesTransformer {
    fn operation(&self) -> &str {
        "get_traces"
    }

    fn transform(&self, content: &JsonObject) -> Result<String> {
        let mut out = String::new();

        if let Some(traces) = array_field(content, &["traces"]) {
            if traces.is_empty() {
                return Ok("No traces found.".to_string());
            }
            for trace in traces.iter().filter_map(Value::as_object) {
                let trace_id = str_field(trace, &["traceId"]).unwrap_or("unknown");
                let spans = parse_spans(array_field(trace, &["spans"]));
                render_trace(&mut out, trace_id, &spans);
            }
        } else if let Some(spans) = array_field(content, &["spans"]) {
            if spans.is_empty() {
                return Ok("No traces found.".to_string());
            }
            let spans = parse_spans(Some(spans));
            let trace_id = str_field(content, &["traceId"]).unwrap_or("unknown");
            render_trace(&mut out, trace_id, &spans);
        } else {
            return Err(anyhow!("no `traces` or `spans` array in result"));
        }

        Ok(out)
    }
}

fn parse_spans(items: Option<&Vec<Value>>) -> Vec<Span<'_>> {
    items
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_object)
                .map(Span::from_json)
                .collect()
        })
        .unwrap_or_default()
}

fn render_trace(out: &mut String, trace_id: &str, spans: &[Span<'_>]) {
    if !out.is_empty() {
        out.push('\n');
    }
    let errors = spans.iter().filter(|s| s.is_error).count();
    let _ = write!(out, "Trace {} ({} spans", trace_id, spans.len());
    if errors > 0 {
        let _ = write!(out, ", {} errors", errors);
    }
    out.push_str(")\n");

    let index: HashMap<&str, usize> = spans
        .iter()
        .enumerate()
        .filter_map(|(i, s)| s.id.map(|id| (id, i)))
        .collect();

    let mut children: HashMap<usize, Vec<usize>> = HashMap::new();
    let mut roots = Vec::new();
    for (i, span) in spans.iter().enumerate() {
        match span.parent.and_then(|p| index.get(p)) {
            Some(&parent) if parent != i => children.entry(parent).or_default().push(i),
            _ => roots.push(i),
        }
    }

    let by_start = |ids: &mut Vec<usize>| ids.sort_by_key(|&i| spans[i].start_nanos.unwrap_or(i64::MAX));
    by_start(&mut roots);
    for ids in children.values_mut() {
        by_start(ids);
    }

    let mut visited = vec![false; spans.len()];
    for root in roots {
        render_span(out, spans, &children, &mut visited, root);
    }
    // Spans caught in a parent cycle are never reached from a root.
    for i in 0..spans.len() {
        if !visited[i] {
            render_span(out, spans, &children, &mut visited, i);
        }
    }
}

/// Indentation stops growing past this depth.
const MAX_INDENT: usize = 32;

/// Depth-first render from `root` using an explicit stack, so arbitrarily
/// deep parent chains cannot exhaust the call stack.
fn render_span(
    out: &mut String,
    spans: &[Span<'_>],
    children: &HashMap<usize, Vec<usize>>,
    visited: &mut [bool],
    root: usize,
) {
    let mut stack = vec![(root, 0usize)];
    while let Some((i, depth)) = stack.pop() {
        if visited[i] {
            continue;
        }
        visited[i] = true;

        let span = &spans[i];
        let _ = write!(out, "{}- {}", "  ".repeat(depth.min(MAX_INDENT)), span.name);
        if let Some(service) = span.service {
            let _ = write!(out, " ({})", service);
        }
        if let Some(ms) = span.duration_ms {
            let _ = write!(out, " {:.1}ms", ms);
        }
        if span.is_error {
            out.push_str(" [ERROR]");
        }
        out.push('\n');

        if let Some(kids) = children.get(&i) {
            stack.extend(kids.iter().rev().map(|&child| (child, depth + 1)));
        }
    }
}

/// Nanoseconds since the epoch from an RFC 3339 string or a numeric field.
fn timestamp_nanos(obj: &JsonObject, keys: &[&str]) -> Option<i64> {
    keys.iter().find_map(|key| match obj.get(*key)? {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .and_then(|ts| ts.timestamp_nanos_opt())
            .or_else(|| s.parse().ok()),
        Value::Number(n) => n.as_i64(),
        _ => None,
    })
}

fn span_is_error(obj: &JsonObject) -> bool {
    let status = match obj.get("status") {
        Some(Value::String(s)) => Some(s.as_str()),
        Some(Value::Object(status)) => str_field(status, &["code", "statusCode"]),
        _ => str_field(obj, &["statusCode"]),
    };
    if let Some(status) = status {
        let status = status.to_ascii_lowercase();
        if status.contains("error") {
            return true;
        }
    }
    matches!(obj.get("error"), Some(Value::Bool(true)))
}
