//! Advisory validation reports.
//!
//! Validation never blocks the pipeline: findings are serialized into a
//! structured report and logged, and processing continues with whatever
//! data is there. Operators triage from the log stream.

use crate::constants;
use crate::registry::TableSpec;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use std::fmt;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationStatus {
    Ok,
    Error,
    Skipped,
}

/// Stable machine-readable issue codes carried in reports and log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueCode {
    MissingColumns,
    ExtraColumns,
    EmptyData,
    DuplicateRecords,
    DateParseFailure,
    MappingNotFound,
    LoadError,
    FileNotFound,
    QueryError,
}

impl IssueCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueCode::MissingColumns => "MISSING_COLUMNS",
            IssueCode::ExtraColumns => "EXTRA_COLUMNS",
            IssueCode::EmptyData => "EMPTY_DATA",
            IssueCode::DuplicateRecords => "DUPLICATE_RECORDS",
            IssueCode::DateParseFailure => "DATE_PARSE_FAILURE",
            IssueCode::MappingNotFound => "MAPPING_NOT_FOUND",
            IssueCode::LoadError => "LOAD_ERROR",
            IssueCode::FileNotFound => "FILE_NOT_FOUND",
            IssueCode::QueryError => "QUERY_ERROR",
        }
    }
}

impl fmt::Display for IssueCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationIssue {
    pub code: IssueCode,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(code: IssueCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub timestamp: String,
    pub service: String,
    pub validation_type: String,
    pub table_name: String,
    pub source_file: String,
    pub status: ValidationStatus,
    pub row_count: usize,
    pub column_count: usize,
    pub expected_column_count: usize,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn base(validation_type: &str, table_name: &str, source_file: &str) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            service: constants::SERVICE_NAME.to_string(),
            validation_type: validation_type.to_string(),
            table_name: table_name.to_string(),
            source_file: source_file.to_string(),
            status: ValidationStatus::Ok,
            row_count: 0,
            column_count: 0,
            expected_column_count: 0,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Writes the report to the log stream as one structured line.
    pub fn emit(&self) {
        match self.status {
            ValidationStatus::Error => crate::observability::metrics::validation::report_error(),
            _ => crate::observability::metrics::validation::report_ok(),
        }
        let payload = serde_json::to_string(self).unwrap_or_default();
        match self.status {
            ValidationStatus::Error => error!(
                validation_type = %self.validation_type,
                table = %self.table_name,
                report = %payload,
                "validation found errors"
            ),
            ValidationStatus::Skipped => info!(
                validation_type = %self.validation_type,
                table = %self.table_name,
                report = %payload,
                "validation skipped"
            ),
            ValidationStatus::Ok => info!(
                validation_type = %self.validation_type,
                table = %self.table_name,
                report = %payload,
                "validation passed"
            ),
        }
    }
}

pub struct ExtractValidator;

impl ExtractValidator {
    /// Checks an extract's shape against its declared columns. Structural
    /// problems land in `errors`, harmless extras in `warnings`.
    pub fn validate(
        spec: &TableSpec,
        source_file: &str,
        actual_columns: &[String],
        row_count: usize,
    ) -> ValidationReport {
        let mut report = ValidationReport::base(
            constants::EXTRACT_VALIDATION_TYPE,
            &spec.table_id,
            source_file,
        );
        let expected = spec.expected_source_columns();
        report.row_count = row_count;
        report.column_count = actual_columns.len();
        report.expected_column_count = expected.len();

        let missing: Vec<&str> = expected
            .iter()
            .filter(|name| !actual_columns.iter().any(|a| a == *name))
            .copied()
            .collect();
        if !missing.is_empty() {
            report.errors.push(ValidationIssue::new(
                IssueCode::MissingColumns,
                format!("missing expected columns: {}", missing.join(", ")),
            ));
        }

        let extra: Vec<&String> = actual_columns
            .iter()
            .filter(|name| !expected.contains(&name.as_str()))
            .collect();
        if !extra.is_empty() {
            let names: Vec<&str> = extra.iter().map(|s| s.as_str()).collect();
            report.warnings.push(ValidationIssue::new(
                IssueCode::ExtraColumns,
                format!("unexpected columns: {}", names.join(", ")),
            ));
        }

        if row_count == 0 {
            report.errors.push(ValidationIssue::new(
                IssueCode::EmptyData,
                "extract contains no data rows",
            ));
        }

        if report.has_errors() {
            report.status = ValidationStatus::Error;
        }
        report
    }
}
