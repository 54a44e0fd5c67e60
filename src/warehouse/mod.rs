//! Warehouse port: idempotent partition replacement and duplicate probes.
//!
//! The SQLite implementation is the production target; the in-memory one
//! mirrors its delete/append semantics for tests.

mod memory;
mod sqlite;

pub use memory::InMemoryWarehouse;
pub use sqlite::SqliteWarehouse;

use crate::error::Result;
use async_trait::async_trait;

/// Which stored rows a replacement batch supersedes.
#[derive(Debug, Clone, PartialEq)]
pub enum DeletePredicate {
    /// Rows whose partition column equals one of the listed values.
    ValuesIn { column: String, values: Vec<String> },
    /// Rows whose partition column falls in one of the listed months
    /// (`YYYY-MM`, matched against the leading seven characters).
    MonthsIn { column: String, months: Vec<String> },
    /// Rows with partition value on or after the date (ISO, so string
    /// comparison is date comparison).
    OnOrAfter { column: String, date: String },
    /// Every row: the batch restates the table's full history.
    All,
}

#[derive(Debug, Clone, Default)]
pub struct ReplaceOutcome {
    pub deleted: usize,
    pub appended: usize,
    /// Set when the delete step failed and the append proceeded anyway.
    pub delete_warning: Option<String>,
}

/// One business-key group stored more than once.
#[derive(Debug, Clone, PartialEq)]
pub struct DuplicateKey {
    pub values: Vec<Option<String>>,
    pub count: usize,
}

#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Deletes rows matching the predicate and appends the batch, in one
    /// transaction. A delete failure is downgraded to a warning on the
    /// outcome; an append failure is an error.
    async fn replace_rows(
        &self,
        table: &str,
        predicate: &DeletePredicate,
        columns: &[String],
        rows: &[Vec<Option<String>>],
    ) -> Result<ReplaceOutcome>;

    /// Business-key groups appearing more than once, largest first, up to
    /// `limit` groups.
    async fn duplicate_keys(
        &self,
        table: &str,
        key_columns: &[String],
        limit: usize,
    ) -> Result<Vec<DuplicateKey>>;

    async fn row_count(&self, table: &str) -> Result<usize>;
}
