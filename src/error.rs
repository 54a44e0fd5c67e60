use thiserror::Error;

#[derive(Error, Debug)]
pub enum GranaryError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Workbook error: {0}")]
    Workbook(#[from] calamine::XlsxError),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Registry error: {0}")]
    Registry(String),

    #[error("No usable column mapping for table '{0}'")]
    MappingNotFound(String),

    #[error("Invalid period '{0}': expected yyyymm")]
    InvalidPeriod(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Warehouse error: {0}")]
    Warehouse(String),

    #[error("Duplicate ratio {ratio:.2}% in table '{table}' exceeds limit {limit:.2}%")]
    DuplicateRatioExceeded {
        table: String,
        ratio: f64,
        limit: f64,
    },
}

pub type Result<T> = std::result::Result<T, GranaryError>;
