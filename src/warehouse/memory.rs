use super::{DeletePredicate, DuplicateKey, ReplaceOutcome, Warehouse};
use crate::error::{GranaryError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::warn;

#[derive(Debug, Clone)]
struct StoredTable {
    columns: Vec<String>,
    rows: Vec<Vec<Option<String>>>,
}

/// In-memory warehouse for development/testing. Mirrors the SQLite
/// implementation's semantics: NULL partition values never match a delete
/// predicate, and a failed append leaves the table untouched.
pub struct InMemoryWarehouse {
    tables: Arc<Mutex<HashMap<String, StoredTable>>>,
}

impl InMemoryWarehouse {
    pub fn new() -> Self {
        Self {
            tables: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryWarehouse {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Warehouse for InMemoryWarehouse {
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
        let mut tables = self.tables.lock().unwrap();
        let mut outcome = ReplaceOutcome::default();

        // Work on a copy and swap it in only after every step succeeded
        let mut stored = tables.get(table).cloned().unwrap_or_else(|| StoredTable {
            columns: columns.to_vec(),
            rows: Vec::new(),
        });

        match delete_matching(&mut stored, predicate) {
            Ok(n) => outcome.deleted = n,
            Err(message) => {
                warn!(table = %table, error = %message, "partition delete failed; appending anyway");
                outcome.delete_warning = Some(message);
            }
        }

        let mut positions = Vec::with_capacity(columns.len());
        for name in columns {
            let idx = stored
                .columns
                .iter()
                .position(|c| c == name)
                .ok_or_else(|| {
                    GranaryError::Warehouse(format!(
                        "table '{}' has no column named '{}'",
                        table, name
                    ))
                })?;
            positions.push(idx);
        }
        for row in rows {
            let mut aligned = vec![None; stored.columns.len()];
            for (value, &idx) in row.iter().zip(&positions) {
                aligned[idx] = value.clone();
            }
            stored.rows.push(aligned);
            outcome.appended += 1;
        }

        tables.insert(table.to_string(), stored);
        Ok(outcome)
    }

    async fn duplicate_keys(
        &self,
        table: &str,
        key_columns: &[String],
        limit: usize,
    ) -> Result<Vec<DuplicateKey>> {
        let tables = self.tables.lock().unwrap();
        let stored = tables
            .get(table)
            .ok_or_else(|| GranaryError::Warehouse(format!("no such table: {}", table)))?;

        let mut indexes = Vec::with_capacity(key_columns.len());
        for name in key_columns {
            let idx = stored
                .columns
                .iter()
                .position(|c| c == name)
                .ok_or_else(|| {
                    GranaryError::Warehouse(format!(
                        "table '{}' has no column named '{}'",
                        table, name
                    ))
                })?;
            indexes.push(idx);
        }

        let mut counts: HashMap<Vec<Option<String>>, usize> = HashMap::new();
        for row in &stored.rows {
            let key: Vec<Option<String>> = indexes.iter().map(|&i| row[i].clone()).collect();
            *counts.entry(key).or_insert(0) += 1;
        }

        let mut found: Vec<DuplicateKey> = counts
            .into_iter()
            .filter(|(_, n)| *n > 1)
            .map(|(values, count)| DuplicateKey { values, count })
            .collect();
        found.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.values.cmp(&b.values)));
        found.truncate(limit);
        Ok(found)
    }

    async fn row_count(&self, table: &str) -> Result<usize> {
        let tables = self.tables.lock().unwrap();
        tables
            .get(table)
            .map(|t| t.rows.len())
            .ok_or_else(|| GranaryError::Warehouse(format!("no such table: {}", table)))
    }
}

fn delete_matching(
    stored: &mut StoredTable,
    predicate: &DeletePredicate,
) -> std::result::Result<usize, String> {
    let before = stored.rows.len();
    match predicate {
        DeletePredicate::All => stored.rows.clear(),
        DeletePredicate::ValuesIn { column, values } => {
            if values.is_empty() {
                return Ok(0);
            }
            let idx = column_index(stored, column)?;
            stored.rows.retain(|row| match &row[idx] {
                Some(v) => !values.contains(v),
                None => true,
            });
        }
        DeletePredicate::MonthsIn { column, months } => {
            if months.is_empty() {
                return Ok(0);
            }
            let idx = column_index(stored, column)?;
            stored.rows.retain(|row| match &row[idx] {
                Some(v) => match v.get(..7) {
                    Some(prefix) => !months.iter().any(|m| m == prefix),
                    None => true,
                },
                None => true,
            });
        }
        DeletePredicate::OnOrAfter { column, date } => {
            let idx = column_index(stored, column)?;
            stored.rows.retain(|row| match &row[idx] {
                Some(v) => v.as_str() < date.as_str(),
                None => true,
            });
        }
    }
    Ok(before - stored.rows.len())
}

fn column_index(stored: &StoredTable, column: &str) -> std::result::Result<usize, String> {
    stored
        .columns
        .iter()
        .position(|c| c == column)
        .ok_or_else(|| format!("no such column: {}", column))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[tokio::test]
    async fn null_partition_values_survive_a_precise_delete() {
        let wh = InMemoryWarehouse::new();
        let columns = cols(&["sales_month", "amount"]);
        wh.replace_rows(
            "t",
            &DeletePredicate::All,
            &columns,
            &[
                vec![Some("2025-01-01".to_string()), Some("1".to_string())],
                vec![None, Some("2".to_string())],
            ],
        )
        .await
        .unwrap();

        let outcome = wh
            .replace_rows(
                "t",
                &DeletePredicate::ValuesIn {
                    column: "sales_month".to_string(),
                    values: vec!["2025-01-01".to_string()],
                },
                &columns,
                &[vec![Some("2025-01-01".to_string()), Some("9".to_string())]],
            )
            .await
            .unwrap();

        assert_eq!(outcome.deleted, 1);
        assert_eq!(wh.row_count("t").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn append_failure_leaves_the_table_untouched() {
        let wh = InMemoryWarehouse::new();
        wh.replace_rows(
            "t",
            &DeletePredicate::All,
            &cols(&["a"]),
            &[vec![Some("1".to_string())]],
        )
        .await
        .unwrap();

        let err = wh
            .replace_rows(
                "t",
                &DeletePredicate::All,
                &cols(&["a", "missing"]),
                &[vec![Some("2".to_string()), Some("3".to_string())]],
            )
            .await;

        assert!(err.is_err());
        assert_eq!(wh.row_count("t").await.unwrap(), 1);
    }
}
