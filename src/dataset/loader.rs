use std::collections::HashMap;
use std::io::Cursor;

use calamine::{open_workbook_auto_from_rs, Data, Reader};
use csv::ReaderBuilder;
use tracing::{debug, info};

use super::{CellValue, Dataset};
use crate::types::{AppError, AppResult};

/// How an uploaded file is parsed, decided once from its name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetFormat {
    Csv,
    Spreadsheet,
}

impl DatasetFormat {
    /// `.csv` selects the CSV parser; every other name goes to the
    /// spreadsheet parser, which rejects content it cannot read.
    pub fn from_filename(filename: &str) -> Self {
        if filename.to_lowercase().ends_with(".csv") {
            DatasetFormat::Csv
        } else {
            DatasetFormat::Spreadsheet
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetFormat::Csv => "csv",
            DatasetFormat::Spreadsheet => "spreadsheet",
        }
    }

    pub fn parse(&self, content: &[u8]) -> AppResult<Dataset> {
        match self {
            DatasetFormat::Csv => parse_csv(content),
            DatasetFormat::Spreadsheet => parse_spreadsheet(content),
        }
    }
}

pub fn load_dataset(filename: &str, content: &[u8]) -> AppResult<Dataset> {
    let format = DatasetFormat::from_filename(filename);
    debug!(filename, ?format, bytes = content.len(), "Parsing upload");

    let dataset = format.parse(content)?;
    info!(
        filename,
        columns = dataset.columns().len(),
        rows = dataset.row_count(),
        "Dataset loaded"
    );
    Ok(dataset)
}

pub fn parse_csv(content: &[u8]) -> AppResult<Dataset> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(content);

    let headers: Vec<String> = rdr
        .headers()
        .map_err(|e| AppError::DatasetParse(e.to_string()))?
        .iter()
        .map(|h| h.to_string())
        .collect();

    if headers.is_empty() || headers.iter().all(|h| h.trim().is_empty()) {
        return Err(AppError::DatasetParse("No columns to parse from file".to_string()));
    }

    let mut rows = Vec::new();
    for record in rdr.records() {
        let record = record.map_err(|e| AppError::DatasetParse(e.to_string()))?;
        rows.push(record.iter().map(CellValue::parse).collect());
    }

    Ok(Dataset::new(normalize_headers(headers), rows))
}

pub fn parse_spreadsheet(content: &[u8]) -> AppResult<Dataset> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(content.to_vec()))
        .map_err(|e| AppError::DatasetParse(e.to_string()))?;

    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| AppError::DatasetParse("Workbook has no sheets".to_string()))?
        .map_err(|e| AppError::DatasetParse(e.to_string()))?;

    let mut rows_iter = range.rows();
    let headers: Vec<String> = match rows_iter.next() {
        Some(header_row) => header_row.iter().map(header_text).collect(),
        None => return Err(AppError::DatasetParse("No columns to parse from file".to_string())),
    };

    let rows = rows_iter
        .map(|row| row.iter().map(cell_value).collect())
        .collect();

    Ok(Dataset::new(normalize_headers(headers), rows))
}

fn header_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::Float(f) if f.fract() == 0.0 => format!("{}", *f as i64),
        other => other.to_string(),
    }
}

fn cell_value(cell: &Data) -> CellValue {
    match cell {
        Data::Empty => CellValue::Null,
        Data::String(s) if s.is_empty() => CellValue::Null,
        Data::String(s) => CellValue::Text(s.clone()),
        Data::Int(i) => CellValue::Int(*i),
        // Spreadsheets store every number as a float
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => CellValue::Int(*f as i64),
        Data::Float(f) => CellValue::Float(*f),
        Data::Bool(b) => CellValue::Bool(*b),
        other => CellValue::Text(other.to_string()),
    }
}

/// Blank headers become `Unnamed: {idx}`, repeats get a `.N` suffix.
fn normalize_headers(headers: Vec<String>) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    headers
        .into_iter()
        .enumerate()
        .map(|(idx, raw)| {
            let base = if raw.trim().is_empty() {
                format!("Unnamed: {}", idx)
            } else {
                raw
            };
            let count = seen.entry(base.clone()).or_insert(0);
            let name = if *count == 0 {
                base
            } else {
                format!("{}.{}", base, count)
            };
            *count += 1;
            name
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn xlsx_bytes(rows: &[&[&str]]) -> Vec<u8> {
        let mut workbook = rust_xlsxwriter::Workbook::new();
        let sheet = workbook.add_worksheet();
        for (r, row) in rows.iter().enumerate() {
            for (c, value) in row.iter().enumerate() {
                match value.parse::<f64>() {
                    Ok(n) => sheet.write_number(r as u32, c as u16, n).unwrap(),
                    Err(_) => sheet.write_string(r as u32, c as u16, *value).unwrap(),
                };
            }
        }
        workbook.save_to_buffer().unwrap()
    }

    #[test]
    fn test_format_dispatch() {
        assert_eq!(DatasetFormat::from_filename("data.csv"), DatasetFormat::Csv);
        assert_eq!(DatasetFormat::from_filename("DATA.CSV"), DatasetFormat::Csv);
        assert_eq!(DatasetFormat::from_filename("data.xlsx"), DatasetFormat::Spreadsheet);
        assert_eq!(DatasetFormat::from_filename("notes.txt"), DatasetFormat::Spreadsheet);
    }

    #[test]
    fn test_csv_upload_shape() {
        let ds = load_dataset("data.csv", b"a,b\n1,2\n3,4").unwrap();
        assert_eq!(ds.columns(), &["a".to_string(), "b".to_string()]);
        assert_eq!(ds.row_count(), 2);
        assert_eq!(ds.preview(5).rows.len(), 2);
        assert_eq!(ds.rows()[1], vec![CellValue::Int(3), CellValue::Int(4)]);
    }

    #[test]
    fn test_xlsx_upload_matches_csv_shape() {
        let bytes = xlsx_bytes(&[&["a", "b"], &["1", "2"], &["3", "4"]]);
        let from_xlsx = load_dataset("data.xlsx", &bytes).unwrap();
        let from_csv = load_dataset("data.csv", b"a,b\n1,2\n3,4").unwrap();
        assert_eq!(from_xlsx, from_csv);
    }

    #[test]
    fn test_column_order_preserved() {
        let ds = load_dataset("data.csv", b"zeta,alpha,mid\n1,2,3\n").unwrap();
        assert_eq!(ds.columns(), &["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_blank_and_duplicate_headers() {
        let ds = load_dataset("data.csv", b"x,,x\n1,2,3\n").unwrap();
        assert_eq!(ds.columns(), &["x", "Unnamed: 1", "x.1"]);
    }

    #[test]
    fn test_empty_csv_is_a_parse_error() {
        assert!(matches!(load_dataset("empty.csv", b""), Err(AppError::DatasetParse(_))));
    }

    #[test]
    fn test_garbage_spreadsheet_is_a_parse_error() {
        let err = load_dataset("data.xlsx", b"definitely not a workbook").unwrap_err();
        assert!(matches!(err, AppError::DatasetParse(_)));
    }

    #[test]
    fn test_unknown_extension_falls_through_to_spreadsheet() {
        let err = load_dataset("data.txt", b"a,b\n1,2").unwrap_err();
        assert!(matches!(err, AppError::DatasetParse(_)));

        let bytes = xlsx_bytes(&[&["k"], &["v"]]);
        let ds = load_dataset("export.data", &bytes).unwrap();
        assert_eq!(ds.columns(), &["k"]);
    }
}
