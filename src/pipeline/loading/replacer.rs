//! Idempotent partition replacement.
//!
//! Each batch supersedes a well-defined slice of the stored table: the
//! partition values it carries (precise mode), everything from the fiscal
//! epoch onward (range mode), or the entire table (cumulative tables, whose
//! merged batch restates full history). Replaying a batch therefore always
//! converges to the same stored rows.

use crate::domain::Frame;
use crate::error::Result;
use crate::registry::{PartitionGranularity, TableKind, TableSpec};
use crate::warehouse::{DeletePredicate, ReplaceOutcome, Warehouse};
use std::collections::BTreeSet;
use tracing::{info, warn};

pub struct PartitionReplacer;

impl PartitionReplacer {
    /// Which stored rows this batch supersedes.
    pub fn predicate(spec: &TableSpec, frame: &Frame, fiscal_start_date: &str) -> DeletePredicate {
        let (partition_column, granularity) = match &spec.kind {
            TableKind::Cumulative { .. } => return DeletePredicate::All,
            TableKind::SinglePeriod {
                partition_column,
                partition_granularity,
            } => (partition_column, *partition_granularity),
        };

        if spec.range_delete {
            // The upstream export restates the whole fiscal window every run
            return DeletePredicate::OnOrAfter {
                column: partition_column.clone(),
                date: fiscal_start_date.to_string(),
            };
        }

        let idx = match frame.column_index(partition_column) {
            Some(idx) => idx,
            None => {
                warn!(
                    table = %spec.table_id,
                    partition_column = %partition_column,
                    "partition column absent from batch; appending without delete"
                );
                return DeletePredicate::ValuesIn {
                    column: partition_column.clone(),
                    values: Vec::new(),
                };
            }
        };

        let mut distinct = BTreeSet::new();
        for row in &frame.rows {
            if let Some(value) = row[idx].render() {
                if value.is_empty() {
                    continue;
                }
                match granularity {
                    PartitionGranularity::Month => {
                        distinct.insert(value);
                    }
                    PartitionGranularity::Day => {
                        if let Some(month) = value.get(..7) {
                            distinct.insert(month.to_string());
                        }
                    }
                }
            }
        }

        let collected: Vec<String> = distinct.into_iter().collect();
        match granularity {
            PartitionGranularity::Month => DeletePredicate::ValuesIn {
                column: partition_column.clone(),
                values: collected,
            },
            PartitionGranularity::Day => DeletePredicate::MonthsIn {
                column: partition_column.clone(),
                months: collected,
            },
        }
    }

    pub async fn replace(
        warehouse: &dyn Warehouse,
        spec: &TableSpec,
        frame: &Frame,
        fiscal_start_date: &str,
    ) -> Result<ReplaceOutcome> {
        let predicate = Self::predicate(spec, frame, fiscal_start_date);
        let rows: Vec<Vec<Option<String>>> = frame
            .rows
            .iter()
            .map(|row| row.iter().map(|c| c.render()).collect())
            .collect();

        let outcome = warehouse
            .replace_rows(&spec.table_id, &predicate, &frame.columns, &rows)
            .await?;
        info!(
            table = %spec.table_id,
            deleted = outcome.deleted,
            appended = outcome.appended,
            "partition replaced"
        );
        Ok(outcome)
    }
}
