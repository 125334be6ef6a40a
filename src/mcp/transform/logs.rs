// Log tables for component and project log queries

use std::collections::BTreeMap;
use std::fmt::Write;

use anyhow::{Result, anyhow};
use chrono::{DateTime, SecondsFormat, Utc};
use rmcp::model::JsonObject;
use serde_json::Value;

use super::{ResponseTransformer, array_field, num_field, str_field};

const MAX_MESSAGE_CHARS: usize = 300;

/// `get_component_logs`: one table of entries.
pub struct ComponentLogsTransformer;

impl ResponseTransformer for ComponentLogsTransformer {
    fn operation(&self) -> &str {
        "get_component_logs"
    }

    fn transform(&self, content: &JsonObject) -> Result<String> {
        let entries = log_entries(content)?;
        if entries.is_empty() {
            return Ok("No log entries found.".to_string());
        }

        let mut out = header(entries.len(), content);
        out.push('\n');
        render_table(&mut out, &entries);
        Ok(out)
    }
}

/// `get_project_logs`: entries grouped by component, one table per group.
pub struct ProjectLogsTransformer;

impl ResponseTransformer for ProjectLogsTransformer {
    fn operation(&self) -> &str {
        "get_project_logs"
    }

    fn transform(&self, content: &JsonObject) -> Result<String> {
        let entries = log_entries(content)?;
        if entries.is_empty() {
            return Ok("No log entries found.".to_string());
        }

        let mut groups: BTreeMap<&str, Vec<&JsonObject>> = BTreeMap::new();
        for entry in entries.iter().copied() {
            let component =
                str_field(entry, &["componentName", "componentId", "component"]).unwrap_or("unknown");
            groups.entry(component).or_default().push(entry);
        }

        let mut out = header(entries.len(), content);
        for (component, group) in groups {
            let _ = write!(out, "\n### {} ({} entries)\n\n", component, group.len());
            render_table(&mut out, &group);
        }
        Ok(out)
    }
}

fn log_entries(content: &JsonObject) -> Result<Vec<&JsonObject>> {
    let entries = array_field(content, &["logs", "entries"])
        .ok_or_else(|| anyhow!("no `logs` array in result"))?;
    Ok(entries.iter().filter_map(Value::as_object).collect())
}

fn header(shown: usize, content: &JsonObject) -> String {
    match num_field(content, &["totalCount", "total"]) {
        Some(total) => format!("{} log entries (of total {})\n", shown, total as u64),
        None => format!("{} log entries\n", shown),
    }
}

fn render_table(out: &mut String, entries: &[&JsonObject]) {
    out.push_str("| Time | Level | Message |\n");
    out.push_str("|------|-------|---------|\n");
    for entry in entries {
        let time = str_field(entry, &["timestamp", "time"])
            .map(normalize_timestamp)
            .unwrap_or_default();
        let level = str_field(entry, &["logLevel", "level"]).unwrap_or("-");
        let message = str_field(entry, &["log", "message"]).unwrap_or_default();
        let _ = writeln!(out, "| {} | {} | {} |", time, level, table_cell(message));
    }
}

/// RFC 3339 UTC with millisecond precision, or the input if unparseable.
pub(crate) fn normalize_timestamp(raw: &str) -> String {
    match DateTime::parse_from_rfc3339(raw) {
        Ok(ts) => ts
            .with_timezone(&Utc)
            .to_rfc3339_opts(SecondsFormat::Millis, true),
        Err(_) => raw.to_string(),
    }
}

fn table_cell(message: &str) -> String {
    let flat = message.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut cell: String = flat.chars().take(MAX_MESSAGE_CHARS).collect();
    if flat.chars().count() > MAX_MESSAGE_CHARS {
        cell.push('…');
    }
    cell.replace('|', "\\|")
}
