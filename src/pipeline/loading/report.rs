//! Post-load reconciliation: probe the warehouse for business-key
//! duplicates and report them without failing the load.

use crate::constants;
use crate::pipeline::processing::validate::{
    IssueCode, ValidationIssue, ValidationReport, ValidationStatus,
};
use crate::registry::TableSpec;
use crate::warehouse::{DuplicateKey, Warehouse};

const DUPLICATE_SAMPLE_LIMIT: usize = 10;

pub struct LoadReconciler;

impl LoadReconciler {
    pub async fn report(
        warehouse: &dyn Warehouse,
        spec: &TableSpec,
        source_file: &str,
    ) -> ValidationReport {
        let mut report = ValidationReport::base(
            constants::LOAD_VALIDATION_TYPE,
            &spec.table_id,
            source_file,
        );

        let keys = match spec.unique_keys() {
            Some(keys) if !keys.is_empty() => keys,
            _ => {
                report.status = ValidationStatus::Skipped;
                return report;
            }
        };

        if let Ok(n) = warehouse.row_count(&spec.table_id).await {
            report.row_count = n;
        }

        match warehouse
            .duplicate_keys(&spec.table_id, keys, DUPLICATE_SAMPLE_LIMIT)
            .await
        {
            Ok(groups) if groups.is_empty() => {}
            Ok(groups) => {
                let samples: Vec<String> = groups.iter().map(format_group).collect();
                report.errors.push(ValidationIssue::new(
                    IssueCode::DuplicateRecords,
                    format!("duplicate business keys found: {}", samples.join("; ")),
                ));
                report.status = ValidationStatus::Error;
            }
            // The probe must not fail the load it reports on
            Err(e) => report.warnings.push(ValidationIssue::new(
                IssueCode::QueryError,
                format!("duplicate-key query failed: {}", e),
            )),
        }
        report
    }
}

fn format_group(group: &DuplicateKey) -> String {
    let key: Vec<String> = group
        .values
        .iter()
        .map(|v| v.clone().unwrap_or_else(|| "null".to_string()))
        .collect();
    format!("({})={}", key.join(","), group.count)
}
