/// Shared names and layout constants used across the pipeline
/// These keep object-store keys and report fields consistent between
/// the transform and load stages

pub const SERVICE_NAME: &str = "granary";

// Object-store layout: raw extracts arrive under raw/{period}/, normalized
// artifacts are written under normalized/{period}/{table_id}.csv
pub const RAW_PREFIX: &str = "raw";
pub const NORMALIZED_PREFIX: &str = "normalized";

// Origin column appended to cumulative batches before merging; holds the
// integer period (yyyymm) the batch was extracted for
pub const ORIGIN_COLUMN: &str = "source_folder";

// Fiscal window start used by range deletes and full reloads; overridable
// in config.toml
pub const DEFAULT_FISCAL_START_PERIOD: &str = "202409";
pub const DEFAULT_FISCAL_START_DATE: &str = "2024-09-01";

// validation_type fields on structured reports
pub const EXTRACT_VALIDATION_TYPE: &str = "column_and_row_check";
pub const LOAD_VALIDATION_TYPE: &str = "duplicate_key_check";

/// Object-store key for a raw extract file
pub fn raw_key(period: &str, file_name: &str) -> String {
    format!("{}/{}/{}", RAW_PREFIX, period, file_name)
}

/// Object-store key prefix for one period's raw extracts
pub fn raw_period_prefix(period: &str) -> String {
    format!("{}/{}/", RAW_PREFIX, period)
}

/// Object-store key for a table's normalized artifact
pub fn normalized_key(period: &str, table_id: &str) -> String {
    format!("{}/{}/{}.csv", NORMALIZED_PREFIX, period, table_id)
}
