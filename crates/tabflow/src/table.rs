//! In-memory tabular dataset handed to processors.
//!
//! Columns are typed by inspection: a column is numeric when every non-missing
//! cell parses as a number, otherwise it is text. Empty cells and the usual NA
//! spellings are treated as missing. Integer typing is decided from the raw
//! token, so `1.0` is a float and out-of-range integers fall back to floats.

use std::collections::HashSet;
use std::io::Read;
use std::path::Path;

use serde_json::Value;

use crate::error::TableError;

/// Extensions that can be parsed into a [`Table`].
pub const READABLE_EXTENSIONS: &[&str] = &["csv", "txt"];

const MISSING_MARKERS: &[&str] = &["", "na", "n/a", "nan", "null", "none", "#n/a"];

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Integer(i64),
    Number(f64),
    Text(String),
    Missing,
}

impl Cell {
    /// Parses a raw field.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if MISSING_MARKERS.contains(&trimmed.to_ascii_lowercase().as_str()) {
            return Cell::Missing;
        }
        if looks_integral(trimmed) {
            if let Ok(i) = trimmed.parse::<i64>() {
                return Cell::Integer(i);
            }
        }
        match trimmed.parse::<f64>() {
            Ok(n) => Cell::Number(n),
            Err(_) => Cell::Text(trimmed.to_string()),
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Cell::Missing)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Integer(i) => Some(*i as f64),
            Cell::Number(n) => Some(*n),
            _ => None,
        }
    }

    fn to_json(&self, integral: bool) -> Value {
        match self {
            Cell::Integer(i) if integral => Value::from(*i),
            Cell::Integer(i) => float_to_json(*i as f64),
            Cell::Number(n) => float_to_json(*n),
            Cell::Text(s) => Value::String(s.clone()),
            Cell::Missing => Value::Null,
        }
    }
}

/// Digits with an optional sign; `inf`, `1e3` and `1.0` are not integers.
fn looks_integral(token: &str) -> bool {
    let digits = token.strip_prefix(&['-', '+'][..]).unwrap_or(token);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

/// Renames repeated headers to `name.1`, `name.2`, ... skipping names already taken.
fn dedupe_headers(names: Vec<String>) -> Vec<String> {
    let mut taken: HashSet<String> = names.iter().cloned().collect();
    let mut seen: HashSet<String> = HashSet::new();
    names
        .into_iter()
        .map(|name| {
            if seen.insert(name.clone()) {
                return name;
            }
            let mut n = 1;
            let mut candidate = format!("{}.{}", name, n);
            while taken.contains(&candidate) {
                n += 1;
                candidate = format!("{}.{}", name, n);
            }
            taken.insert(candidate.clone());
            seen.insert(candidate.clone());
            candidate
        })
        .collect()
}

/// Converts a float into JSON, mapping NaN and infinities to null.
pub fn float_to_json(n: f64) -> Value {
    serde_json::Number::from_f64(n)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    name: String,
    cells: Vec<Cell>,
}

impl Column {
    pub fn new(name: impl Into<String>, cells: Vec<Cell>) -> Self {
        Self {
            name: name.into(),
            cells,
        }
    }

    /// Integer column without missing values.
    pub fn integers(name: impl Into<String>, values: &[i64]) -> Self {
        Self::new(name, values.iter().map(|v| Cell::Integer(*v)).collect())
    }

    /// Float column without missing values.
    pub fn numeric(name: impl Into<String>, values: &[f64]) -> Self {
        Self::new(name, values.iter().map(|v| Cell::Number(*v)).collect())
    }

    /// Text column without missing values.
    pub fn text(name: impl Into<String>, values: &[&str]) -> Self {
        Self::new(
            name,
            values.iter().map(|v| Cell::Text((*v).to_string())).collect(),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// A column with no text cells. All-missing columns count as numeric.
    pub fn is_numeric(&self) -> bool {
        !self.cells.iter().any(|c| matches!(c, Cell::Text(_)))
    }

    fn is_integral(&self) -> bool {
        self.is_numeric()
            && !self.cells.is_empty()
            && self.cells.iter().all(|c| matches!(c, Cell::Integer(_)))
    }

    /// pandas-style dtype label.
    pub fn dtype(&self) -> &'static str {
        if self.is_integral() {
            "int64"
        } else if self.is_numeric() {
            "float64"
        } else {
            "object"
        }
    }

    /// Values as `Option<f64>`, or `None` when the column holds text.
    pub fn numeric_values(&self) -> Option<Vec<Option<f64>>> {
        if !self.is_numeric() {
            return None;
        }
        Some(self.cells.iter().map(Cell::as_f64).collect())
    }

    pub fn missing_count(&self) -> usize {
        self.cells.iter().filter(|c| c.is_missing()).count()
    }

    fn cell_json(&self, row: usize) -> Value {
        self.cells
            .get(row)
            .map(|c| c.to_json(self.is_integral()))
            .unwrap_or(Value::Null)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    columns: Vec<Column>,
}

impl Table {
    /// Builds a table from columns. Shorter columns are padded with missing cells.
    pub fn new(mut columns: Vec<Column>) -> Self {
        let rows = columns.iter().map(Column::len).max().unwrap_or(0);
        for column in &mut columns {
            column.cells.resize(rows, Cell::Missing);
        }
        Self { columns }
    }

    /// Reads a file, choosing the parser by extension.
    pub fn from_path(path: &Path) -> Result<Self, TableError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        if !READABLE_EXTENSIONS.contains(&ext.as_str()) {
            return Err(TableError::UnsupportedFormat(if ext.is_empty() {
                "(no extension)".to_string()
            } else {
                ext
            }));
        }

        let file = std::fs::File::open(path).map_err(|e| TableError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::read_csv(file)
    }

    /// Parses comma separated content with a header row.
    pub fn read_csv<R: Read>(reader: R) -> Result<Self, TableError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let raw_names: Vec<String> = reader
            .headers()?
            .iter()
            .enumerate()
            .map(|(i, h)| {
                if h.is_empty() {
                    format!("Unnamed: {}", i)
                } else {
                    h.to_string()
                }
            })
            .collect();
        let names = dedupe_headers(raw_names);

        let mut cells: Vec<Vec<Cell>> = vec![Vec::new(); names.len()];
        for (row, record) in reader.records().enumerate() {
            let record = record?;
            if record.len() > names.len() {
                return Err(TableError::RaggedRow {
                    row: row + 1,
                    found: record.len(),
                    expected: names.len(),
                });
            }
            for (i, column) in cells.iter_mut().enumerate() {
                column.push(record.get(i).map(Cell::parse).unwrap_or(Cell::Missing));
            }
        }

        Ok(Self::new(
            names
                .into_iter()
                .zip(cells)
                .map(|(name, cells)| Column::new(name, cells))
                .collect(),
        ))
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn numeric_column_names(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| c.is_numeric())
            .map(|c| c.name.clone())
            .collect()
    }

    pub fn row_count(&self) -> usize {
        self.columns.first().map(Column::len).unwrap_or(0)
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.row_count() == 0
    }

    /// First `limit` rows as JSON objects keyed by column name.
    pub fn head_records(&self, limit: usize) -> Vec<Value> {
        (0..self.row_count().min(limit))
            .map(|row| {
                let record: serde_json::Map<String, Value> = self
                    .columns
                    .iter()
                    .map(|c| (c.name.clone(), c.cell_json(row)))
                    .collect();
                Value::Object(record)
            })
            .collect()
    }
}
