// Statistical summary of resource metric series

use std::fmt::Write;

use anyhow::{Result, bail};
use rmcp::model::JsonObject;
use serde_json::Value;

use super::logs::normalize_timestamp;
use super::{ResponseTransformer, num_field, str_field};

/// Points this many standard deviations from the mean are anomalies.
const ANOMALY_Z: f64 = 3.0;
const MIN_POINTS_FOR_ANOMALIES: usize = 5;
const LIMITS_SUFFIX: &str = "Limits";

/// `get_component_resource_metrics`: per-series statistics and anomalies.
pub struct ResourceMetricsTransformer;

struct Point {
    time: String,
    value: f64,
}

struct Series {
    name: String,
    points: Vec<Point>,
}

struct Stats {
    min: f64,
    max: f64,
    mean: f64,
    std_dev: f64,
    latest: f64,
}

impl Series {
    fn stats(&self) -> Option<Stats> {
        let latest = self.points.last()?.value;
        let n = self.points.len() as f64;
        let mean = self.points.iter().map(|p| p.value).sum::<f64>() / n;
        let variance = self.points.iter().map(|p| (p.value - mean).powi(2)).sum::<f64>() / n;

        Some(Stats {
            min: self.points.iter().map(|p| p.value).fold(f64::INFINITY, f64::min),
            max: self.points.iter().map(|p| p.value).fold(f64::NEG_INFINITY, f64::max),
            mean,
            std_dev: variance.sqrt(),
            latest,
        })
    }

    fn anomalies(&self, stats: &Stats) -> Vec<(&Point, f64)> {
        if self.points.len() < MIN_POINTS_FOR_ANOMALIES || stats.std_dev == 0.0 {
            return Vec::new();
        }
        self.points
            .iter()
            .map(|p| (p, (p.value - stats.mean) / stats.std_dev))
            .filter(|(_, z)| z.abs() >= ANOMALY_Z)
            .collect()
    }
}

impl ResponseTransformer for ResourceMetricsTransformer {
    fn operation(&self) -> &str {
        "get_component_resource_metrics"
    }

    fn transform(&self, content: &JsonObject) -> Result<String> {
        let series = collect_series(content);
        if series.is_empty() {
            bail!("no metric series in result");
        }

        let mut out = String::from("| Series | Points | Min | Max | Mean | Latest |\n");
        out.push_str("|--------|--------|-----|-----|------|--------|\n");

        let mut anomalies = Vec::new();
        for s in &series {
            match s.stats() {
                Some(stats) => {
                    let _ = writeln!(
                        out,
                        "| {} | {} | {} | {} | {} | {} |",
                        s.name,
                        s.points.len(),
                        number(stats.min),
                        number(stats.max),
                        number(stats.mean),
                        number(stats.latest)
                    );
                    for (point, z) in s.anomalies(&stats) {
                        anomalies.push(format!(
                            "- {} at {}: {} (z = {:.1})",
                            s.name,
                            point.time,
                            number(point.value),
                            z
                        ));
                    }
                }
                None => {
                    let _ = writeln!(out, "| {} | 0 | - | - | - | - |", s.name);
                }
            }
        }

        out.push_str("\nAnomalies:\n");
        if anomalies.is_empty() {
            out.push_str("None detected.\n");
        } else {
            for line in anomalies {
                out.push_str(&line);
                out.push('\n');
            }
        }

        let notes = limit_notes(&series);
        if !notes.is_empty() {
            out.push('\n');
            for note in notes {
                out.push_str(&note);
                out.push('\n');
            }
        }

        Ok(out)
    }
}

fn collect_series(content: &JsonObject) -> Vec<Series> {
    let mut series: Vec<Series> = content
        .iter()
        .filter_map(|(name, value)| {
            let items = value.as_array()?;
            if !items.iter().all(Value::is_object) {
                return None;
            }
            let points = items
                .iter()
                .filter_map(Value::as_object)
                .filter_map(|point| {
                    Some(Point {
                        time: str_field(point, &["time", "timestamp"])
                            .map(normalize_timestamp)
                            .unwrap_or_default(),
                        value: num_field(point, &["value"])?,
                    })
                })
                .collect();
            Some(Series {
                name: name.clone(),
                points,
            })
        })
        .collect();
    series.sort_by(|a, b| a.name.cmp(&b.name));
    series
}

/// Notes for usage series whose peak exceeds the matching limit.
///
/// `cpuLimits` is matched against `cpuUsage` and `cpu`.
fn limit_notes(series: &[Series]) -> Vec<String> {
    let mut notes = Vec::new();
    for limits in series.iter().filter(|s| s.name.ends_with(LIMITS_SUFFIX)) {
        let Some(limit) = limits.points.last().map(|p| p.value) else {
            continue;
        };
        let base = &limits.name[..limits.name.len() - LIMITS_SUFFIX.len()];

        for usage in series.iter().filter(|s| {
            s.name != limits.name && (s.name == format!("{}Usage", base) || s.name == base)
        }) {
            let Some(stats) = usage.stats() else { continue };
            if stats.max > limit {
                notes.push(format!(
                    "Note: {} limit exceeded (peak {} > limit {})",
                    usage.name,
                    number(stats.max),
                    number(limit)
                ));
            }
        }
    }
    notes
}

fn number(value: f64) -> String {
    let formatted = format!("{:.4}", value);
    let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
    if trimmed == "-0" { "0".to_string() } else { trimmed.to_string() }
}
