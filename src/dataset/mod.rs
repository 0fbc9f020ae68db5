//! Tabular datasets
//!
//! In-memory rows x named columns parsed from an uploaded CSV or spreadsheet.
//! Column order always matches the source file.

pub mod loader;

pub use loader::*;

use serde::Serialize;

/// A single typed cell
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CellValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl CellValue {
    /// Infer a type from raw text the way spreadsheet tools do.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return CellValue::Null;
        }
        if let Ok(i) = trimmed.parse::<i64>() {
            return CellValue::Int(i);
        }
        // "inf" and "NaN" parse as floats but are not data
        if let Some(f) = trimmed.parse::<f64>().ok().filter(|f| f.is_finite()) {
            return CellValue::Float(f);
        }
        match trimmed.to_lowercase().as_str() {
            "true" => CellValue::Bool(true),
            "false" => CellValue::Bool(false),
            _ => CellValue::Text(raw.to_string()),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CellValue::Int(i) => Some(*i as f64),
            CellValue::Float(f) if f.is_finite() => Some(*f),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    fn kind(&self) -> ColumnKind {
        match self {
            CellValue::Null => ColumnKind::Empty,
            CellValue::Bool(_) => ColumnKind::Bool,
            CellValue::Int(_) => ColumnKind::Int,
            CellValue::Float(_) => ColumnKind::Float,
            CellValue::Text(_) => ColumnKind::Text,
        }
    }
}

impl std::fmt::Display for CellValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CellValue::Null => Ok(()),
            CellValue::Bool(b) => write!(f, "{}", b),
            CellValue::Int(i) => write!(f, "{}", i),
            CellValue::Float(v) => write!(f, "{}", v),
            CellValue::Text(s) => write!(f, "{}", s),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    Empty,
    Bool,
    Int,
    Float,
    Text,
}

impl ColumnKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnKind::Empty => "empty",
            ColumnKind::Bool => "bool",
            ColumnKind::Int => "int",
            ColumnKind::Float => "float",
            ColumnKind::Text => "text",
        }
    }

    fn merge(self, other: ColumnKind) -> ColumnKind {
        use ColumnKind::*;
        match (self, other) {
            (Empty, k) | (k, Empty) => k,
            (a, b) if a == b => a,
            (Int, Float) | (Float, Int) => Float,
            _ => Text,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    columns: Vec<String>,
    rows: Vec<Vec<CellValue>>,
}

impl Dataset {
    /// Rows shorter than the header are padded with nulls, longer ones truncated.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<CellValue>>) -> Self {
        let width = columns.len();
        let rows = rows
            .into_iter()
            .map(|mut row| {
                row.resize(width, CellValue::Null);
                row
            })
            .collect();
        Self { columns, rows }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<CellValue>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name).or_else(|| {
            let wanted = name.trim().to_lowercase();
            self.columns
                .iter()
                .position(|c| c.trim().to_lowercase() == wanted)
        })
    }

    /// Finite numbers of the named column; `None` for an unknown column.
    pub fn numeric_column(&self, name: &str) -> Option<Vec<f64>> {
        let idx = self.column_index(name)?;
        Some(self.column_values(idx).filter_map(CellValue::as_f64).collect())
    }

    pub fn head(&self, n: usize) -> &[Vec<CellValue>] {
        &self.rows[..n.min(self.rows.len())]
    }

    pub fn column_values(&self, index: usize) -> impl Iterator<Item = &CellValue> {
        self.rows.iter().filter_map(move |row| row.get(index))
    }

    pub fn column_kinds(&self) -> Vec<ColumnKind> {
        (0..self.columns.len())
            .map(|idx| {
                self.column_values(idx)
                    .fold(ColumnKind::Empty, |acc, cell| acc.merge(cell.kind()))
            })
            .collect()
    }

    pub fn preview(&self, n: usize) -> DatasetPreview {
        DatasetPreview {
            columns: self.columns.clone(),
            rows: self.head(n).to_vec(),
            total_rows: self.rows.len(),
        }
    }

    /// First `n` rows rendered as CSV text, header included.
    pub fn to_csv_snippet(&self, n: usize) -> String {
        self.write_csv(n).unwrap_or_default()
    }

    fn write_csv(&self, n: usize) -> anyhow::Result<String> {
        let mut wtr = csv::Writer::from_writer(Vec::new());
        wtr.write_record(&self.columns)?;
        for row in self.head(n) {
            wtr.write_record(row.iter().map(|c| c.to_string()))?;
        }
        let data = wtr.into_inner()?;
        Ok(String::from_utf8_lossy(&data).into_owned())
    }
}

/// The first rows of a dataset, as sent to the UI
#[derive(Debug, Clone, Serialize)]
pub struct DatasetPreview {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
    pub total_rows: usize,
}
