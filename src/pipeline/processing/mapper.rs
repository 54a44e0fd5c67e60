//! Source-to-target column mapping.
//!
//! Renames the workbook's header names to the registry's target names and
//! reorders columns into declared order. Columns the registry does not know
//! about are kept at the end or dropped depending on configuration.

use crate::config::UnmappedColumns;
use crate::domain::Frame;
use crate::error::{GranaryError, Result};
use crate::registry::{TableKind, TableSpec};

/// A frame in target-column shape plus what the mapping had to leave out.
#[derive(Debug)]
pub struct MappedFrame {
    pub frame: Frame,
    /// Declared source columns the extract did not contain.
    pub missing_source_columns: Vec<String>,
    /// Extract columns the registry has no mapping for.
    pub unmapped_columns: Vec<String>,
}

pub struct ColumnMapper;

impl ColumnMapper {
    /// Removes embedded line breaks from header cells. Hand-edited workbooks
    /// wrap long headers across two lines inside one cell.
    pub fn scrub_headers(frame: &mut Frame) {
        for name in &mut frame.columns {
            if name.contains('\n') || name.contains('\r') {
                *name = name.replace(['\n', '\r'], "");
            }
        }
    }

    pub fn apply(
        spec: &TableSpec,
        frame: Frame,
        unmapped_policy: UnmappedColumns,
    ) -> Result<MappedFrame> {
        if spec.columns.is_empty() {
            return Err(GranaryError::MappingNotFound(spec.table_id.clone()));
        }

        // Target name for each input column, None when unmapped
        let renamed: Vec<Option<&str>> = frame
            .columns
            .iter()
            .map(|name| {
                spec.columns
                    .iter()
                    .find(|c| c.source_name == *name)
                    .map(|c| c.target_name.as_str())
            })
            .collect();

        let missing_source_columns: Vec<String> = spec
            .columns
            .iter()
            .filter(|c| !frame.columns.contains(&c.source_name))
            .map(|c| c.source_name.clone())
            .collect();

        let unmapped_columns: Vec<String> = frame
            .columns
            .iter()
            .zip(&renamed)
            .filter(|(_, target)| target.is_none())
            .map(|(name, _)| name.clone())
            .collect();

        // Declared order first, then surviving unmapped columns
        let mut order: Vec<usize> = Vec::with_capacity(frame.columns.len());
        for column in &spec.columns {
            if let Some(idx) = frame.columns.iter().position(|n| *n == column.source_name) {
                order.push(idx);
            }
        }
        if unmapped_policy == UnmappedColumns::Keep {
            for (idx, target) in renamed.iter().enumerate() {
                if target.is_none() {
                    order.push(idx);
                }
            }
        }

        let mut columns: Vec<String> = order
            .iter()
            .map(|&idx| {
                renamed[idx]
                    .map(str::to_string)
                    .unwrap_or_else(|| frame.columns[idx].clone())
            })
            .collect();

        // Some downstream consumers key partition pruning off the first
        // column, so the lead column can be hoisted ahead of declared order
        if spec.partition_first {
            if let Some(lead) = lead_column(spec) {
                if let Some(pos) = columns.iter().position(|n| n == lead) {
                    let name = columns.remove(pos);
                    let idx = order.remove(pos);
                    columns.insert(0, name);
                    order.insert(0, idx);
                }
            }
        }

        let mut mapped = Frame::new(columns);
        for row in &frame.rows {
            mapped
                .rows
                .push(order.iter().map(|&idx| row[idx].clone()).collect());
        }

        Ok(MappedFrame {
            frame: mapped,
            missing_source_columns,
            unmapped_columns,
        })
    }
}

fn lead_column(spec: &TableSpec) -> Option<&str> {
    match &spec.kind {
        TableKind::SinglePeriod {
            partition_column, ..
        } => Some(partition_column.as_str()),
        TableKind::Cumulative { unique_keys } => unique_keys.first().map(String::as_str),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CellValue, SemanticType};
    use crate::registry::{ColumnSpec, PartitionGranularity};

    fn spec() -> TableSpec {
        TableSpec {
            table_id: "department_summary".to_string(),
            aliases: vec!["6".to_string()],
            sheet: None,
            description: None,
            columns: vec![
                ColumnSpec {
                    source_name: "売上月".to_string(),
                    target_name: "sales_month".to_string(),
                    semantic_type: SemanticType::Date,
                    description: None,
                },
                ColumnSpec {
                    source_name: "部門".to_string(),
                    target_name: "department".to_string(),
                    semantic_type: SemanticType::String,
                    description: None,
                },
            ],
            kind: TableKind::SinglePeriod {
                partition_column: "sales_month".to_string(),
                partition_granularity: PartitionGranularity::Month,
            },
            range_delete: false,
            partition_first: false,
        }
    }

    fn frame(columns: &[&str]) -> Frame {
        let mut f = Frame::new(columns.iter().map(|c| c.to_string()).collect());
        f.push_row(
            (0..columns.len())
                .map(|i| CellValue::Text(format!("v{}", i)))
                .collect(),
        );
        f
    }

    #[test]
    fn renames_and_orders_by_declaration() {
        // Input order is reversed relative to the declaration
        let input = frame(&["部門", "売上月"]);
        let mapped = ColumnMapper::apply(&spec(), input, UnmappedColumns::Keep).unwrap();

        assert_eq!(mapped.frame.columns, vec!["sales_month", "department"]);
        assert_eq!(
            mapped.frame.rows[0],
            vec![
                CellValue::Text("v1".to_string()),
                CellValue::Text("v0".to_string())
            ]
        );
        assert!(mapped.missing_source_columns.is_empty());
        assert!(mapped.unmapped_columns.is_empty());
    }

    #[test]
    fn reports_missing_and_unmapped_columns() {
        let input = frame(&["売上月", "備考"]);
        let mapped = ColumnMapper::apply(&spec(), input, UnmappedColumns::Keep).unwrap();

        assert_eq!(mapped.missing_source_columns, vec!["部門"]);
        assert_eq!(mapped.unmapped_columns, vec!["備考"]);
        // Kept unmapped column trails the declared ones under its source name
        assert_eq!(mapped.frame.columns, vec!["sales_month", "備考"]);
    }

    #[test]
    fn drop_policy_removes_unmapped_columns() {
        let input = frame(&["売上月", "部門", "備考"]);
        let mapped = ColumnMapper::apply(&spec(), input, UnmappedColumns::Drop).unwrap();

        assert_eq!(mapped.frame.columns, vec!["sales_month", "department"]);
        // Still reported even though dropped
        assert_eq!(mapped.unmapped_columns, vec!["備考"]);
        assert_eq!(mapped.frame.rows[0].len(), 2);
    }

    #[test]
    fn partition_first_hoists_lead_column() {
        let mut spec = spec();
        spec.partition_first = true;
        // Declare department before the partition column
        spec.columns.swap(0, 1);

        let input = frame(&["売上月", "部門"]);
        let mapped = ColumnMapper::apply(&spec, input, UnmappedColumns::Keep).unwrap();

        assert_eq!(mapped.frame.columns, vec!["sales_month", "department"]);
    }

    #[test]
    fn empty_mapping_is_a_mapping_not_found_error() {
        let mut spec = spec();
        spec.columns.clear();

        let err = ColumnMapper::apply(&spec, frame(&["売上月"]), UnmappedColumns::Keep)
            .unwrap_err();
        assert!(matches!(err, GranaryError::MappingNotFound(t) if t == "department_summary"));
    }

    #[test]
    fn scrub_headers_removes_embedded_line_breaks() {
        let mut f = frame(&["売上\n金額", "部門"]);
        ColumnMapper::scrub_headers(&mut f);
        assert_eq!(f.columns, vec!["売上金額", "部門"]);
    }
}
