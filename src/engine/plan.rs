//! Query plans
//!
//! The model answers with a small JSON plan instead of free text. Plans are
//! executed locally so numbers always come from the data, not the model.

use std::collections::{HashMap, HashSet};

use serde::Deserialize;

use crate::dataset::{CellValue, Dataset};

pub const HISTOGRAM_BINS: usize = 10;
const MAX_LISTED_VALUES: usize = 20;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueryPlan {
    Answer {
        text: String,
    },
    Aggregate {
        op: AggregateOp,
        #[serde(default)]
        column: Option<String>,
        #[serde(default)]
        group_by: Option<String>,
    },
    FilterCount {
        column: String,
        equals: serde_json::Value,
    },
    Chart(ChartSpec),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateOp {
    Count,
    Sum,
    Mean,
    Min,
    Max,
    Median,
    Distinct,
}

impl std::fmt::Display for AggregateOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AggregateOp::Count => "count",
            AggregateOp::Sum => "sum",
            AggregateOp::Mean => "mean",
            AggregateOp::Min => "min",
            AggregateOp::Max => "max",
            AggregateOp::Median => "median",
            AggregateOp::Distinct => "distinct values",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChartSpec {
    pub kind: ChartKind,
    pub x: String,
    #[serde(default)]
    pub y: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartKind {
    Bar,
    Line,
    Scatter,
    Histogram,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PlanError {
    #[error("response did not contain a valid plan: {0}")]
    Malformed(String),

    #[error("unknown column '{0}'")]
    UnknownColumn(String),

    #[error("column '{0}' has no numeric values")]
    NotNumeric(String),

    #[error("values in column '{0}' are too large to compute with")]
    OutOfRange(String),

    #[error("plan is missing the '{0}' field")]
    MissingField(&'static str),

    #[error("chart could not be rendered: {0}")]
    Render(String),
}

/// Data ready to be drawn
#[derive(Debug, Clone, PartialEq)]
pub enum ChartData {
    Categories { labels: Vec<String>, values: Vec<f64> },
    Points { points: Vec<(f64, f64)>, connected: bool },
    Histogram { values: Vec<f64>, bins: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PreparedChart {
    pub title: String,
    pub x_label: String,
    pub y_label: String,
    pub data: ChartData,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlanOutcome {
    Text(String),
    Chart(PreparedChart),
}

/// Pull the first JSON object out of a model reply, tolerating code fences
/// and surrounding prose.
pub fn extract_json(reply: &str) -> Option<&str> {
    let start = reply.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in reply[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&reply[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

pub fn parse_plan(reply: &str) -> Result<QueryPlan, PlanError> {
    let json = extract_json(reply)
        .ok_or_else(|| PlanError::Malformed("no JSON object found".to_string()))?;
    serde_json::from_str(json).map_err(|e| PlanError::Malformed(e.to_string()))
}

pub fn execute(plan: &QueryPlan, dataset: &Dataset) -> Result<PlanOutcome, PlanError> {
    match plan {
        QueryPlan::Answer { text } => Ok(PlanOutcome::Text(text.clone())),
        QueryPlan::Aggregate { op, column, group_by } => {
            aggregate(dataset, *op, column.as_deref(), group_by.as_deref()).map(PlanOutcome::Text)
        }
        QueryPlan::FilterCount { column, equals } => {
            let idx = lookup(dataset, column)?;
            let count = dataset
                .column_values(idx)
                .filter(|cell| cell_equals(cell, equals))
                .count();
            Ok(PlanOutcome::Text(format!(
                "{} rows where {} = {}",
                count,
                dataset.columns()[idx],
                json_display(equals)
            )))
        }
        QueryPlan::Chart(spec) => prepare_chart(dataset, spec).map(PlanOutcome::Chart),
    }
}

fn lookup(dataset: &Dataset, column: &str) -> Result<usize, PlanError> {
    dataset
        .column_index(column)
        .ok_or_else(|| PlanError::UnknownColumn(column.to_string()))
}

fn numeric(dataset: &Dataset, idx: usize) -> Result<Vec<f64>, PlanError> {
    let name = &dataset.columns()[idx];
    match dataset.numeric_column(name) {
        Some(values) if !values.is_empty() => Ok(values),
        _ => Err(PlanError::NotNumeric(name.clone())),
    }
}

/// Plot axes need `max - min` to stay finite.
fn ensure_span(values: impl Iterator<Item = f64>, column: &str) -> Result<(), PlanError> {
    let (lo, hi) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    });
    if lo <= hi && !(hi - lo).is_finite() {
        return Err(PlanError::OutOfRange(column.to_string()));
    }
    Ok(())
}

fn aggregate(
    dataset: &Dataset,
    op: AggregateOp,
    column: Option<&str>,
    group_by: Option<&str>,
) -> Result<String, PlanError> {
    let column_idx = column.map(|c| lookup(dataset, c)).transpose()?;
    if column_idx.is_none() && op != AggregateOp::Count {
        return Err(PlanError::MissingField("column"));
    }

    let Some(group) = group_by else {
        let rows: Vec<&Vec<CellValue>> = dataset.rows().iter().collect();
        let value = reduce(dataset, op, column_idx, &rows)?;
        return Ok(match column_idx {
            Some(idx) => format!("{} of {}: {}", op, dataset.columns()[idx], value),
            None => format!("{} rows", value),
        });
    };

    let group_idx = lookup(dataset, group)?;
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<&Vec<CellValue>>> = HashMap::new();
    for row in dataset.rows() {
        let key = row[group_idx].to_string();
        if !groups.contains_key(&key) {
            order.push(key.clone());
        }
        groups.entry(key).or_default().push(row);
    }

    let mut lines = vec![match column_idx {
        Some(idx) => format!(
            "{} of {} by {}:",
            op,
            dataset.columns()[idx],
            dataset.columns()[group_idx]
        ),
        None => format!("rows by {}:", dataset.columns()[group_idx]),
    }];
    for key in order {
        let rows = &groups[&key];
        // Groups without numeric values are skipped instead of failing the whole answer
        match reduce(dataset, op, column_idx, rows) {
            Ok(value) => lines.push(format!("- {}: {}", display_key(&key), value)),
            Err(PlanError::NotNumeric(_)) => continue,
            Err(e) => return Err(e),
        }
    }
    if lines.len() == 1 {
        return Err(PlanError::NotNumeric(
            column_idx
                .map(|idx| dataset.columns()[idx].clone())
                .unwrap_or_default(),
        ));
    }
    Ok(lines.join("\n"))
}

fn reduce(
    dataset: &Dataset,
    op: AggregateOp,
    column_idx: Option<usize>,
    rows: &[&Vec<CellValue>],
) -> Result<String, PlanError> {
    let Some(idx) = column_idx else {
        return Ok(rows.len().to_string());
    };
    let cells = rows.iter().map(|row| &row[idx]);

    match op {
        AggregateOp::Count => Ok(cells.filter(|c| !c.is_null()).count().to_string()),
        AggregateOp::Distinct => {
            let mut seen = HashSet::new();
            let mut distinct = Vec::new();
            for cell in cells.filter(|c| !c.is_null()) {
                let text = cell.to_string();
                if seen.insert(text.clone()) {
                    distinct.push(text);
                }
            }
            let listed: Vec<&str> = distinct
                .iter()
                .take(MAX_LISTED_VALUES)
                .map(String::as_str)
                .collect();
            let more = if distinct.len() > MAX_LISTED_VALUES { ", ..." } else { "" };
            Ok(format!("{} ({}{})", distinct.len(), listed.join(", "), more))
        }
        _ => {
            let mut values: Vec<f64> = cells.filter_map(CellValue::as_f64).collect();
            if values.is_empty() {
                return Err(PlanError::NotNumeric(dataset.columns()[idx].clone()));
            }
            let result = match op {
                AggregateOp::Sum => values.iter().sum(),
                AggregateOp::Mean => values.iter().sum::<f64>() / values.len() as f64,
                AggregateOp::Min => values.iter().cloned().fold(f64::INFINITY, f64::min),
                AggregateOp::Max => values.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
                _ => median(&mut values),
            };
            if !result.is_finite() {
                return Err(PlanError::OutOfRange(dataset.columns()[idx].clone()));
            }
            Ok(format_number(result))
        }
    }
}

fn median(values: &mut [f64]) -> f64 {
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = values.len();
    if n % 2 == 0 {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    } else {
        values[n / 2]
    }
}

pub fn format_number(value: f64) -> String {
    if !value.is_finite() {
        return value.to_string();
    }
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        let rounded = format!("{:.4}", value);
        rounded.trim_end_matches('0').trim_end_matches('.').to_string()
    }
}

fn display_key(key: &str) -> &str {
    if key.is_empty() {
        "(blank)"
    } else {
        key
    }
}

fn json_display(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn cell_equals(cell: &CellValue, wanted: &serde_json::Value) -> bool {
    match (cell, wanted) {
        (CellValue::Null, serde_json::Value::Null) => true,
        (CellValue::Bool(a), serde_json::Value::Bool(b)) => a == b,
        (_, serde_json::Value::Number(n)) => match (cell.as_f64(), n.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        },
        (_, serde_json::Value::String(s)) => cell.to_string().trim().eq_ignore_ascii_case(s.trim()),
        _ => false,
    }
}

fn prepare_chart(dataset: &Dataset, spec: &ChartSpec) -> Result<PreparedChart, PlanError> {
    let x_idx = lookup(dataset, &spec.x)?;
    let y_idx = spec.y.as_deref().map(|y| lookup(dataset, y)).transpose()?;
    let x_label = dataset.columns()[x_idx].clone();
    let y_label = y_idx
        .map(|idx| dataset.columns()[idx].clone())
        .unwrap_or_else(|| match spec.kind {
            ChartKind::Histogram | ChartKind::Bar => "count".to_string(),
            _ => String::new(),
        });

    let data = match spec.kind {
        ChartKind::Bar => {
            let mut labels: Vec<String> = Vec::new();
            let mut totals: HashMap<String, f64> = HashMap::new();
            for row in dataset.rows() {
                let label = row[x_idx].to_string();
                let amount = match y_idx {
                    Some(idx) => match row[idx].as_f64() {
                        Some(v) => v,
                        None => continue,
                    },
                    None => 1.0,
                };
                if !totals.contains_key(&label) {
                    labels.push(label.clone());
                }
                *totals.entry(label).or_insert(0.0) += amount;
            }
            if labels.is_empty() {
                return Err(PlanError::NotNumeric(y_label));
            }
            let values: Vec<f64> = labels.iter().map(|l| totals[l]).collect();
            // Bars start at zero, so the baseline is part of the range
            ensure_span(values.iter().copied().chain([0.0]), &y_label)?;
            ChartData::Categories { labels, values }
        }
        ChartKind::Line | ChartKind::Scatter => {
            let y_idx = y_idx.ok_or(PlanError::MissingField("y"))?;
            let x_numeric = spec.kind == ChartKind::Scatter
                || dataset.column_values(x_idx).all(|c| c.is_null() || c.as_f64().is_some());
            let points: Vec<(f64, f64)> = dataset
                .rows()
                .iter()
                .enumerate()
                .filter_map(|(pos, row)| {
                    let y = row[y_idx].as_f64()?;
                    let x = if x_numeric { row[x_idx].as_f64()? } else { pos as f64 };
                    Some((x, y))
                })
                .collect();
            if points.is_empty() {
                return Err(PlanError::NotNumeric(dataset.columns()[y_idx].clone()));
            }
            ensure_span(points.iter().map(|p| p.0), &x_label)?;
            ensure_span(points.iter().map(|p| p.1), &dataset.columns()[y_idx])?;
            ChartData::Points {
                points,
                connected: spec.kind == ChartKind::Line,
            }
        }
        ChartKind::Histogram => {
            let values = numeric(dataset, x_idx)?;
            ensure_span(values.iter().copied(), &x_label)?;
            ChartData::Histogram {
                values,
                bins: HISTOGRAM_BINS,
            }
        }
    };

    let title = spec.title.clone().unwrap_or_else(|| match &y_idx {
        Some(_) => format!("{} by {}", y_label, x_label),
        None => format!("Distribution of {}", x_label),
    });

    Ok(PreparedChart {
        title,
        x_label,
        y_label,
        data,
    })
}
