//! Duplicate reconciliation ahead of the warehouse load.
//!
//! Two strategies, matched to how each table accumulates: exact-duplicate
//! collapse for single-period tables (the same row emitted twice by the
//! upstream export) and latest-wins business-key merge for cumulative
//! tables re-extracted every period.

use crate::constants::ORIGIN_COLUMN;
use crate::domain::Frame;
use crate::error::{GranaryError, Result};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::info;

/// Recorded in stats and logs so downstream audits can see what happened.
pub const DEDUP_ACTION: &str = "removed_all_duplicates_using_distinct";

#[derive(Debug, Clone, Serialize)]
pub struct DuplicateStats {
    pub table: String,
    pub total_rows: usize,
    pub unique_rows: usize,
    pub duplicate_count: usize,
    /// Percentage of rows removed.
    pub duplicate_ratio: f64,
    pub period_range: String,
    pub action_taken: String,
}

pub struct DuplicateReconciler;

impl DuplicateReconciler {
    /// Removes rows that are exact duplicates across every column, keeping
    /// first occurrences. `max_ratio` (percent) fails the table when too
    /// much of it evaporates, which usually means a broken extract.
    pub fn collapse_exact(
        table: &str,
        frame: Frame,
        period_range: &str,
        max_ratio: Option<f64>,
    ) -> Result<(Frame, Option<DuplicateStats>)> {
        let total_rows = frame.row_count();
        let mut seen: HashSet<Vec<Option<String>>> = HashSet::with_capacity(total_rows);
        let mut deduped = Frame::new(frame.columns.clone());

        for row in &frame.rows {
            let key: Vec<Option<String>> = row.iter().map(|cell| cell.render()).collect();
            if seen.insert(key) {
                deduped.rows.push(row.clone());
            }
        }

        let unique_rows = deduped.row_count();
        if unique_rows == total_rows {
            return Ok((deduped, None));
        }

        let duplicate_count = total_rows - unique_rows;
        let duplicate_ratio = duplicate_count as f64 / total_rows as f64 * 100.0;

        if let Some(limit) = max_ratio {
            if duplicate_ratio > limit {
                return Err(GranaryError::DuplicateRatioExceeded {
                    table: table.to_string(),
                    ratio: duplicate_ratio,
                    limit,
                });
            }
        }

        info!(
            table = %table,
            total_rows,
            unique_rows,
            duplicate_count,
            duplicate_ratio = %format!("{:.2}%", duplicate_ratio),
            period_range = %period_range,
            action_taken = DEDUP_ACTION,
            "exact duplicates collapsed"
        );

        let stats = DuplicateStats {
            table: table.to_string(),
            total_rows,
            unique_rows,
            duplicate_count,
            duplicate_ratio,
            period_range: period_range.to_string(),
            action_taken: DEDUP_ACTION.to_string(),
        };
        Ok((deduped, Some(stats)))
    }

    /// Merges re-extracted cumulative batches: for each business key, only
    /// rows from the newest origin period survive. Ties within that origin
    /// keep the last occurrence.
    pub fn merge_latest_wins(table: &str, frame: Frame, unique_keys: &[String]) -> Result<Frame> {
        let origin_index = frame.column_index(ORIGIN_COLUMN).ok_or_else(|| {
            GranaryError::Warehouse(format!(
                "merged batch is missing the '{}' column",
                ORIGIN_COLUMN
            ))
        })?;

        let mut key_indexes = Vec::with_capacity(unique_keys.len());
        for key in unique_keys {
            let idx = frame.column_index(key).ok_or_else(|| {
                GranaryError::Warehouse(format!("business key column '{}' not in batch", key))
            })?;
            key_indexes.push(idx);
        }

        let origin_of = |row: &[crate::domain::CellValue]| -> Result<i64> {
            let rendered = row[origin_index].render().unwrap_or_default();
            rendered.parse::<i64>().map_err(|_| {
                GranaryError::Warehouse(format!("origin value '{}' is not numeric", rendered))
            })
        };
        let key_of = |row: &[crate::domain::CellValue]| -> Vec<Option<String>> {
            key_indexes.iter().map(|&idx| row[idx].render()).collect()
        };

        // Pass 1: newest origin per key
        let mut max_origin: HashMap<Vec<Option<String>>, i64> = HashMap::new();
        for row in &frame.rows {
            let origin = origin_of(row)?;
            max_origin
                .entry(key_of(row))
                .and_modify(|o| *o = (*o).max(origin))
                .or_insert(origin);
        }

        // Pass 2: last row index per key within that origin
        let mut last_occurrence: HashMap<Vec<Option<String>>, usize> = HashMap::new();
        for (idx, row) in frame.rows.iter().enumerate() {
            let key = key_of(row);
            let origin = origin_of(row)?;
            if max_origin[&key] == origin {
                last_occurrence.insert(key, idx);
            }
        }

        let keep: HashSet<usize> = last_occurrence.into_values().collect();
        let rows_in = frame.row_count();
        let mut merged = Frame::new(frame.columns.clone());
        for (idx, row) in frame.rows.into_iter().enumerate() {
            if keep.contains(&idx) {
                merged.rows.push(row);
            }
        }

        info!(
            table = %table,
            rows_in,
            rows_out = merged.row_count(),
            keys = %unique_keys.join(","),
            "cumulative batches merged latest-wins"
        );
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::CellValue;

    fn frame(rows: Vec<(&str, &str)>) -> Frame {
        let mut f = Frame::new(vec!["name".to_string(), "amount".to_string()]);
        for (name, amount) in rows {
            f.push_row(vec![
                CellValue::Text(name.to_string()),
                CellValue::Text(amount.to_string()),
            ]);
        }
        f
    }

    #[test]
    fn collapse_keeps_distinct_rows_and_counts() {
        let input = frame(vec![("a", "1"), ("a", "1"), ("b", "2")]);
        let (out, stats) =
            DuplicateReconciler::collapse_exact("t", input, "202501", None).unwrap();

        assert_eq!(out.row_count(), 2);
        let stats = stats.unwrap();
        assert_eq!(stats.total_rows, 3);
        assert_eq!(stats.unique_rows, 2);
        assert_eq!(stats.duplicate_count, 1);
        assert!((stats.duplicate_ratio - 33.333).abs() < 0.01);
        assert_eq!(stats.action_taken, DEDUP_ACTION);
    }

    #[test]
    fn collapse_without_duplicates_reports_nothing() {
        let input = frame(vec![("a", "1"), ("b", "2")]);
        let (out, stats) =
            DuplicateReconciler::collapse_exact("t", input, "202501", None).unwrap();

        assert_eq!(out.row_count(), 2);
        assert!(stats.is_none());
    }

    #[test]
    fn ratio_gate_fails_the_table_when_exceeded() {
        let input = frame(vec![("a", "1"), ("a", "1"), ("b", "2")]);
        let err =
            DuplicateReconciler::collapse_exact("t", input, "202501", Some(10.0)).unwrap_err();

        assert!(matches!(
            err,
            GranaryError::DuplicateRatioExceeded { ratio, limit, .. }
                if ratio > 33.0 && limit == 10.0
        ));
    }

    fn tagged_frame(rows: Vec<(&str, &str, &str)>) -> Frame {
        let mut f = Frame::new(vec![
            "branch".to_string(),
            "amount".to_string(),
            ORIGIN_COLUMN.to_string(),
        ]);
        for (branch, amount, origin) in rows {
            f.push_row(vec![
                CellValue::Text(branch.to_string()),
                CellValue::Text(amount.to_string()),
                CellValue::Text(origin.to_string()),
            ]);
        }
        f
    }

    #[test]
    fn latest_wins_keeps_newest_origin_per_key() {
        let input = tagged_frame(vec![
            ("札幌", "old", "202501"),
            ("札幌", "new", "202502"),
            ("仙台", "keep", "202501"),
        ]);
        let out =
            DuplicateReconciler::merge_latest_wins("t", input, &["branch".to_string()]).unwrap();

        assert_eq!(out.row_count(), 2);
        let amounts: Vec<String> = out
            .rows
            .iter()
            .map(|r| r[1].render().unwrap_or_default())
            .collect();
        assert!(amounts.contains(&"new".to_string()));
        assert!(amounts.contains(&"keep".to_string()));
        assert!(!amounts.contains(&"old".to_string()));
    }

    #[test]
    fn latest_wins_keeps_last_occurrence_within_same_origin() {
        let input = tagged_frame(vec![("a", "first", "202501"), ("a", "second", "202501")]);
        let out =
            DuplicateReconciler::merge_latest_wins("t", input, &["branch".to_string()]).unwrap();

        assert_eq!(out.row_count(), 1);
        assert_eq!(out.rows[0][1].render().unwrap(), "second");
    }

    #[test]
    fn latest_wins_requires_origin_column() {
        let input = frame(vec![("a", "1")]);
        let err = DuplicateReconciler::merge_latest_wins("t", input, &["name".to_string()])
            .unwrap_err();
        assert!(matches!(err, GranaryError::Warehouse(_)));
    }
}
