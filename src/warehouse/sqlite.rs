use super::{DeletePredicate, DuplicateKey, ReplaceOutcome, Warehouse};
use crate::error::Result;
use async_trait::async_trait;
use rusqlite::Connection;
use std::path::Path;
use std::sync::Mutex;
use tracing::warn;

/// SQLite-backed warehouse. Everything is stored as TEXT; partition dates
/// are ISO strings so range predicates are plain string comparison.
pub struct SqliteWarehouse {
    conn: Mutex<Connection>,
}

impl SqliteWarehouse {
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

#[async_trait]
impl Warehouse for SqliteWarehouse {
    async fn replace_rows(
        &self,
        table: &str,
        predicate: &DeletePredicate,
        columns: &[String],
        rows: &[Vec<Option<String>>],
    ) -> Result<ReplaceOutcome> {
        if columns.is_empty() {
            return Ok(ReplaceOutcome::default());
        }
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let mut outcome = ReplaceOutcome::default();

        let column_defs = columns
            .iter()
            .map(|c| format!("{} TEXT", quote_ident(c)))
            .collect::<Vec<_>>()
            .join(", ");
        tx.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote_ident(table),
            column_defs
        ))?;

        // Delete failures are non-fatal: a legacy table without the
        // partition column still accepts the append
        if let Some((sql, params)) = delete_sql(table, predicate) {
            match tx.execute(&sql, rusqlite::params_from_iter(params.iter())) {
                Ok(n) => outcome.deleted = n,
                Err(e) => {
                    warn!(table = %table, error = %e, "partition delete failed; appending anyway");
                    outcome.delete_warning = Some(e.to_string());
                }
            }
        }

        {
            let column_list = columns
                .iter()
                .map(|c| quote_ident(c))
                .collect::<Vec<_>>()
                .join(", ");
            let placeholders = vec!["?"; columns.len()].join(", ");
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO {} ({}) VALUES ({})",
                quote_ident(table),
                column_list,
                placeholders
            ))?;
            for row in rows {
                stmt.execute(rusqlite::params_from_iter(row.iter()))?;
                outcome.appended += 1;
            }
        }

        tx.commit()?;
        Ok(outcome)
    }

    async fn duplicate_keys(
        &self,
        table: &str,
        key_columns: &[String],
        limit: usize,
    ) -> Result<Vec<DuplicateKey>> {
        let conn = self.conn.lock().unwrap();
        let cols = key_columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT {}, COUNT(*) AS n FROM {} GROUP BY {} HAVING COUNT(*) > 1 ORDER BY n DESC LIMIT ?",
            cols,
            quote_ident(table),
            cols
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(rusqlite::params![limit as i64])?;

        let mut found = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(key_columns.len());
            for i in 0..key_columns.len() {
                values.push(row.get::<_, Option<String>>(i)?);
            }
            let count: i64 = row.get(key_columns.len())?;
            found.push(DuplicateKey {
                values,
                count: count as usize,
            });
        }
        Ok(found)
    }

    async fn row_count(&self, table: &str) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let n: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", quote_ident(table)),
            [],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }
}

fn delete_sql(table: &str, predicate: &DeletePredicate) -> Option<(String, Vec<String>)> {
    match predicate {
        DeletePredicate::ValuesIn { column, values } => {
            if values.is_empty() {
                return None;
            }
            let placeholders = vec!["?"; values.len()].join(", ");
            Some((
                format!(
                    "DELETE FROM {} WHERE {} IN ({})",
                    quote_ident(table),
                    quote_ident(column),
                    placeholders
                ),
                values.clone(),
            ))
        }
        DeletePredicate::MonthsIn { column, months } => {
            if months.is_empty() {
                return None;
            }
            let placeholders = vec!["?"; months.len()].join(", ");
            Some((
                format!(
                    "DELETE FROM {} WHERE substr({}, 1, 7) IN ({})",
                    quote_ident(table),
                    quote_ident(column),
                    placeholders
                ),
                months.clone(),
            ))
        }
        DeletePredicate::OnOrAfter { column, date } => Some((
            format!(
                "DELETE FROM {} WHERE {} >= ?",
                quote_ident(table),
                quote_ident(column)
            ),
            vec![date.clone()],
        )),
        DeletePredicate::All => Some((format!("DELETE FROM {}", quote_ident(table)), Vec::new())),
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
