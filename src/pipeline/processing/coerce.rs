//! Heuristic type coercion for spreadsheet extracts.
//!
//! Upstream workbooks are hand-maintained: date columns arrive as day
//! serials, nanosecond timestamps, kanji year-months, slashed text in three
//! shapes, or garbage. The engine turns each cell into its canonical value
//! for the declared column type, and reports what it could not parse
//! without ever failing the table.

use crate::domain::{CellValue, Frame, SemanticType};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

// Day-serial epoch of the 1900 date system (accounts for its phantom leap day)
static SERIAL_EPOCH: Lazy<NaiveDate> =
    Lazy::new(|| NaiveDate::from_ymd_opt(1899, 12, 30).unwrap());

// Serial window: values outside it are not day counts
const SERIAL_UPPER: f64 = 100_000.0;
// Values above this are nanoseconds since the Unix epoch
const NANOS_LOWER: f64 = 1.0e15;

// Placeholder dates that mean "no value" regardless of the declared type
const UNIVERSAL_ZERO_DATES: [&str; 4] = ["0000/00/00", "0000-00-00", "0000/0/0", "0000-0-0"];
// Additional placeholders nulled only when a date is expected, so an
// integer column keeps its zeros
const DATE_SENTINELS: [&str; 3] = ["0", "00/00/0000", "NaT"];

static KANJI_YEAR_MONTH: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d{4})年(\d{1,2})月").unwrap());
static YEAR_MONTH_ONLY: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{4}/\d{1,2}$").unwrap());
static LEADING_ZERO_YEAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^0(\d{3})/(\d{2})/(\d{2})$").unwrap());

const DATE_FORMATS: [&str; 4] = ["%Y/%m/%d", "%Y-%m-%d", "%Y%m%d", "%Y年%m月%d日"];
const DATETIME_FORMATS: [&str; 5] = [
    "%Y/%m/%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y/%m/%d %H:%M",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
];

/// Individually disableable coercion rules.
#[derive(Debug, Clone, Copy)]
pub struct CoercionOptions {
    /// Correct years like `0223` (a dropped leading `2`) to `20` + the last
    /// two digits, so `0223/03/25` reads as 2023-03-25.
    pub zero_year_correction: bool,
}

impl Default for CoercionOptions {
    fn default() -> Self {
        Self {
            zero_year_correction: true,
        }
    }
}

/// Result of coercing one cell.
#[derive(Debug, Clone, PartialEq)]
pub struct Coerced {
    pub value: CellValue,
    /// True when a date/datetime column value could not be parsed and was
    /// passed through unchanged.
    pub parse_failed: bool,
}

impl Coerced {
    fn ok(value: CellValue) -> Self {
        Self {
            value,
            parse_failed: false,
        }
    }

    fn failed(value: CellValue) -> Self {
        Self {
            value,
            parse_failed: true,
        }
    }
}

/// Per-column aggregate of date values that failed to parse.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoercionWarning {
    pub column: String,
    pub failed_count: usize,
    pub sample_value: String,
}

pub struct TypeCoercionEngine {
    options: CoercionOptions,
}

impl TypeCoercionEngine {
    pub fn new(options: CoercionOptions) -> Self {
        Self { options }
    }

    /// Coerces one cell to the declared type's canonical value.
    pub fn coerce(&self, value: &CellValue, semantic_type: SemanticType) -> Coerced {
        // Nulls and universal zero-date placeholders short-circuit every type
        match value {
            CellValue::Null => return Coerced::ok(null_for(semantic_type)),
            CellValue::Text(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() || UNIVERSAL_ZERO_DATES.contains(&trimmed) {
                    return Coerced::ok(null_for(semantic_type));
                }
            }
            _ => {}
        }

        match semantic_type {
            SemanticType::Date => self.coerce_temporal(value, false),
            SemanticType::DateTime => self.coerce_temporal(value, true),
            SemanticType::Integer => coerce_integer(value),
            SemanticType::Decimal => coerce_decimal(value),
            SemanticType::String => coerce_string(value),
        }
    }

    /// Coerces a whole column in place, aggregating parse failures.
    pub fn coerce_column(
        &self,
        frame: &mut Frame,
        column_index: usize,
        semantic_type: SemanticType,
    ) -> Option<CoercionWarning> {
        let column = frame.columns[column_index].clone();
        let mut failed_count = 0usize;
        let mut sample_value: Option<String> = None;

        for row in &mut frame.rows {
            let coerced = self.coerce(&row[column_index], semantic_type);
            if coerced.parse_failed {
                failed_count += 1;
                if sample_value.is_none() {
                    sample_value = coerced.value.render();
                }
            }
            row[column_index] = coerced.value;
        }

        if failed_count > 0 {
            Some(CoercionWarning {
                column,
                failed_count,
                sample_value: sample_value.unwrap_or_default(),
            })
        } else {
            None
        }
    }

    fn coerce_temporal(&self, value: &CellValue, want_time: bool) -> Coerced {
        match value {
            CellValue::Number(n) => {
                if *n > NANOS_LOWER {
                    let dt = DateTime::from_timestamp_nanos(*n as i64).naive_utc();
                    Coerced::ok(render_temporal(dt, want_time))
                } else if *n > 0.0 && *n < SERIAL_UPPER {
                    // Whole days only; fractional day components are dropped
                    let date = *SERIAL_EPOCH + Duration::days(n.trunc() as i64);
                    Coerced::ok(render_temporal(
                        date.and_hms_opt(0, 0, 0).unwrap(),
                        want_time,
                    ))
                } else {
                    Coerced::failed(CellValue::Text(value.render().unwrap_or_default()))
                }
            }
            CellValue::Text(s) => {
                let trimmed = s.trim();
                if DATE_SENTINELS.contains(&trimmed) {
                    return Coerced::ok(CellValue::Null);
                }
                match self.parse_temporal_text(trimmed) {
                    Some(dt) => Coerced::ok(render_temporal(dt, want_time)),
                    None => Coerced::failed(CellValue::Text(trimmed.to_string())),
                }
            }
            CellValue::Bool(_) => {
                Coerced::failed(CellValue::Text(value.render().unwrap_or_default()))
            }
            CellValue::Null => unreachable!("nulls handled before dispatch"),
        }
    }

    fn parse_temporal_text(&self, text: &str) -> Option<NaiveDateTime> {
        // Kanji year-month anywhere in the cell ("2025年9月度計" included)
        if let Some(caps) = KANJI_YEAR_MONTH.captures(text) {
            let year: i32 = caps[1].parse().ok()?;
            let month: u32 = caps[2].parse().ok()?;
            return NaiveDate::from_ymd_opt(year, month, 1)
                .map(|d| d.and_hms_opt(0, 0, 0).unwrap());
        }

        // Year-month shorthand completes to the first of the month
        if YEAR_MONTH_ONLY.is_match(text) {
            let completed = format!("{}/01", text);
            if let Ok(date) = NaiveDate::parse_from_str(&completed, "%Y/%m/%d") {
                return Some(date.and_hms_opt(0, 0, 0).unwrap());
            }
        }

        // Malformed leading-zero year: the upstream export drops the
        // century's leading digit, so 0223/03/25 means 2023-03-25
        if self.options.zero_year_correction {
            if let Some(caps) = LEADING_ZERO_YEAR.captures(text) {
                let tail = &caps[1];
                let corrected = format!("20{}/{}/{}", &tail[1..], &caps[2], &caps[3]);
                if let Ok(date) = NaiveDate::parse_from_str(&corrected, "%Y/%m/%d") {
                    return Some(date.and_hms_opt(0, 0, 0).unwrap());
                }
            }
        }

        for format in DATE_FORMATS {
            if let Ok(date) = NaiveDate::parse_from_str(text, format) {
                return Some(date.and_hms_opt(0, 0, 0).unwrap());
            }
        }
        for format in DATETIME_FORMATS {
            if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
                return Some(dt);
            }
        }
        if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
            return Some(dt.naive_utc());
        }

        None
    }
}

fn null_for(semantic_type: SemanticType) -> CellValue {
    match semantic_type {
        SemanticType::String => CellValue::Text(String::new()),
        _ => CellValue::Null,
    }
}

fn render_temporal(dt: NaiveDateTime, want_time: bool) -> CellValue {
    if want_time {
        CellValue::Text(dt.format("%Y-%m-%d %H:%M:%S").to_string())
    } else {
        CellValue::Text(dt.date().format("%Y-%m-%d").to_string())
    }
}

fn coerce_integer(value: &CellValue) -> Coerced {
    let parsed = match value {
        CellValue::Number(n) => Some(*n),
        CellValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        CellValue::Text(s) => parse_number(s),
        CellValue::Null => None,
    };
    // Unparsable integers become null, never a silent zero
    Coerced::ok(match parsed {
        Some(n) => CellValue::Number(n.round()),
        None => CellValue::Null,
    })
}

fn coerce_decimal(value: &CellValue) -> Coerced {
    let parsed = match value {
        CellValue::Number(n) => Some(*n),
        CellValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        CellValue::Text(s) => parse_number(s),
        CellValue::Null => None,
    };
    Coerced::ok(match parsed {
        Some(n) => CellValue::Number(n),
        None => CellValue::Null,
    })
}

fn coerce_string(value: &CellValue) -> Coerced {
    let text = match value {
        CellValue::Text(s) => {
            let trimmed = s.trim();
            // "nan" is what a missing value looks like after a lossy text
            // export; it means empty
            if trimmed == "nan" {
                String::new()
            } else {
                trimmed.to_string()
            }
        }
        other => other.render().unwrap_or_default(),
    };
    Coerced::ok(CellValue::Text(text))
}

/// Lenient numeric parse: strips grouping commas, currency marks and spaces.
pub(crate) fn parse_number(text: &str) -> Option<f64> {
    let cleaned: String = text
        .trim()
        .chars()
        .filter(|c| !matches!(c, ',' | '¥' | '￥' | ' ' | '　'))
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok()
}

/// Nulls configured placeholder dates wherever they appear in the listed
/// columns, whatever the column type. Returns the number of cells scrubbed.
pub fn scrub_zero_dates(frame: &mut Frame, columns: &[String]) -> usize {
    let indexes: Vec<usize> = columns
        .iter()
        .filter_map(|c| frame.column_index(c))
        .collect();
    if indexes.is_empty() {
        return 0;
    }
    let mut scrubbed = 0;
    for row in &mut frame.rows {
        for &idx in &indexes {
            if let CellValue::Text(s) = &row[idx] {
                let trimmed = s.trim();
                if UNIVERSAL_ZERO_DATES.contains(&trimmed) || DATE_SENTINELS.contains(&trimmed) {
                    row[idx] = CellValue::Null;
                    scrubbed += 1;
                }
            }
        }
    }
    scrubbed
}
