//! Chart Config Synthesizer
//!
//! Picks a visualization from the shape of the rows being returned. Pure and
//! deterministic: the same rows (and hint) always yield the same config.

use crate::dump_store::Row;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

const MAX_CATEGORIES: usize = 6;
const SHARE_TERMS: &[&str] = &["share", "percent", "pct", "ratio", "proportion", "mix"];
const TIME_TERMS: &[&str] = &["date", "day", "week", "month", "quarter", "year", "period", "time"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartType {
    Line,
    Bar,
    Pie,
    Doughnut,
    /// Table only
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartConfig {
    pub chart_type: ChartType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x_field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y_field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl ChartConfig {
    pub fn table() -> Self {
        Self {
            chart_type: ChartType::None,
            x_field: None,
            y_field: None,
            title: None,
        }
    }

    fn plot(chart_type: ChartType, x: &str, y: &str) -> Self {
        Self {
            chart_type,
            x_field: Some(x.to_string()),
            y_field: Some(y.to_string()),
            title: Some(sentence_case(&format!("{} by {}", spaced(y), spaced(x)))),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ChartSynthesizer;

impl ChartSynthesizer {
    /// `hint` is a dump record's `chart_hint`; it can only turn a bar-shaped
    /// result into a pie or doughnut, never force an incompatible shape.
    pub fn synthesize(&self, rows: &[Row], hint: Option<&str>) -> ChartConfig {
        let Some(fields) = consistent_fields(rows) else {
            return ChartConfig::table();
        };

        let numeric: Vec<&String> = fields.iter().filter(|f| is_numeric_column(rows, f)).collect();
        let labels: Vec<&String> = fields.iter().filter(|f| !numeric.contains(f)).collect();
        if numeric.len() != 1 {
            return ChartConfig::table();
        }
        let value_field = numeric[0];

        if let Some(time_field) = labels.iter().find(|f| is_time_field(f)) {
            if rows.len() >= 2 {
                return ChartConfig::plot(ChartType::Line, time_field, value_field);
            }
        }

        if !(2..=MAX_CATEGORIES).contains(&rows.len()) {
            return ChartConfig::table();
        }
        let Some(label_field) = labels.iter().find(|f| distinct_labels(rows, f)) else {
            return ChartConfig::table();
        };

        let chart_type = match hint.map(|h| h.trim().to_lowercase()).as_deref() {
            Some("doughnut") => ChartType::Doughnut,
            Some("pie") => ChartType::Pie,
            _ if is_share(value_field, rows) => ChartType::Pie,
            _ => ChartType::Bar,
        };
        ChartConfig::plot(chart_type, label_field, value_field)
    }
}

/// Field names shared by every row, in first-row order
fn consistent_fields(rows: &[Row]) -> Option<Vec<String>> {
    let first = rows.first()?;
    let keys: BTreeSet<&String> = first.keys().collect();
    if rows.iter().any(|r| r.keys().collect::<BTreeSet<_>>() != keys) {
        return None;
    }
    Some(first.keys().cloned().collect())
}

fn is_numeric_column(rows: &[Row], field: &str) -> bool {
    rows.iter().all(|r| r.get(field).map(Value::is_number).unwrap_or(false))
}

fn is_time_field(field: &str) -> bool {
    let lower = field.to_lowercase();
    lower
        .split(|c: char| c == '_' || c == '-' || c == ' ')
        .any(|part| TIME_TERMS.contains(&part))
}

fn distinct_labels(rows: &[Row], field: &str) -> bool {
    let labels: BTreeSet<String> = rows
        .iter()
        .filter_map(|r| r.get(field))
        .map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect();
    labels.len() == rows.len()
}

/// Parts of a whole: the field says so, or the values add up to 100% / 1.0
fn is_share(field: &str, rows: &[Row]) -> bool {
    let lower = field.to_lowercase();
    if SHARE_TERMS.iter().any(|t| lower.contains(t)) {
        return true;
    }
    let total: f64 = rows.iter().filter_map(|r| r.get(field)).filter_map(Value::as_f64).sum();
    (total - 100.0).abs() <= 1.0 || (total - 1.0).abs() <= 0.01
}

fn spaced(field: &str) -> String {
    field.replace(['_', '-'], " ")
}

fn sentence_case(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
