use crate::error::{GranaryError, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A single cell as read from a spreadsheet or CSV extract.
///
/// Extracts are untyped at the edge; the coercion engine turns these into
/// canonical values according to the declared column type.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Number(f64),
    Bool(bool),
    Text(String),
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    /// CSV fields carry no type information; an empty field is a null.
    pub fn from_csv_field(field: &str) -> CellValue {
        if field.is_empty() {
            CellValue::Null
        } else {
            CellValue::Text(field.to_string())
        }
    }

    /// Canonical rendering for normalized artifacts and the warehouse.
    /// Whole numbers render without a trailing `.0` so integer columns
    /// round-trip cleanly through CSV.
    pub fn render(&self) -> Option<String> {
        match self {
            CellValue::Null => None,
            CellValue::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 9.0e15 {
                    Some(format!("{}", *n as i64))
                } else {
                    Some(n.to_string())
                }
            }
            CellValue::Bool(b) => Some(b.to_string()),
            CellValue::Text(s) => Some(s.clone()),
        }
    }
}

/// Declared type of a mapped column; drives coercion and rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SemanticType {
    Date,
    DateTime,
    Integer,
    Decimal,
    String,
}

impl SemanticType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SemanticType::Date => "date",
            SemanticType::DateTime => "datetime",
            SemanticType::Integer => "integer",
            SemanticType::Decimal => "decimal",
            SemanticType::String => "string",
        }
    }
}

/// An in-memory table: a header plus rows of cells.
///
/// Rows are kept rectangular; pushes pad short rows with nulls and drop
/// cells beyond the header width (trailing junk columns in hand-edited
/// spreadsheets).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Frame {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
}

impl Frame {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn push_row(&mut self, mut row: Vec<CellValue>) {
        let width = self.columns.len();
        if row.len() < width {
            row.resize(width, CellValue::Null);
        } else {
            row.truncate(width);
        }
        self.rows.push(row);
    }

    /// Appends a constant-valued column.
    pub fn add_column(&mut self, name: &str, value: CellValue) {
        self.columns.push(name.to_string());
        for row in &mut self.rows {
            row.push(value.clone());
        }
    }

    /// Appends another frame's rows, aligning its columns to this frame's
    /// header by name. Columns absent from the other frame fill with nulls.
    pub fn append_aligned(&mut self, other: &Frame) -> Result<()> {
        let mapping: Vec<Option<usize>> = self
            .columns
            .iter()
            .map(|c| other.column_index(c))
            .collect();
        if mapping.iter().all(|m| m.is_none()) && !other.columns.is_empty() {
            return Err(GranaryError::Storage(format!(
                "cannot align frames: no shared columns ({:?} vs {:?})",
                self.columns, other.columns
            )));
        }
        for row in &other.rows {
            let aligned: Vec<CellValue> = mapping
                .iter()
                .map(|m| match m {
                    Some(idx) => row.get(*idx).cloned().unwrap_or(CellValue::Null),
                    None => CellValue::Null,
                })
                .collect();
            self.rows.push(aligned);
        }
        Ok(())
    }
}

/// A six-digit accounting period (yyyymm).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Period(u32);

impl Period {
    pub fn parse(raw: &str) -> Result<Period> {
        if raw.len() != 6 || !raw.chars().all(|c| c.is_ascii_digit()) {
            return Err(GranaryError::InvalidPeriod(raw.to_string()));
        }
        let value: u32 = raw
            .parse()
            .map_err(|_| GranaryError::InvalidPeriod(raw.to_string()))?;
        let month = value % 100;
        if !(1..=12).contains(&month) {
            return Err(GranaryError::InvalidPeriod(raw.to_string()));
        }
        Ok(Period(value))
    }

    pub fn year(&self) -> i32 {
        (self.0 / 100) as i32
    }

    pub fn month(&self) -> u32 {
        self.0 % 100
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }

    pub fn first_day(&self) -> NaiveDate {
        // Validated at construction, so this cannot fail
        NaiveDate::from_ymd_opt(self.year(), self.month(), 1).unwrap()
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:06}", self.0)
    }
}

impl FromStr for Period {
    type Err = GranaryError;

    fn from_str(s: &str) -> Result<Period> {
        Period::parse(s)
    }
}

impl TryFrom<String> for Period {
    type Error = GranaryError;

    fn try_from(s: String) -> Result<Period> {
        Period::parse(&s)
    }
}

impl From<Period> for String {
    fn from(p: Period) -> String {
        p.to_string()
    }
}
