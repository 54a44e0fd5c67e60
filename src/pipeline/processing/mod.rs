pub mod coerce;
pub mod mapper;
pub mod reconcile;
pub mod scale;
pub mod validate;

use crate::config::{PipelineConfig, UnmappedColumns};
use crate::domain::Frame;
use crate::error::Result;
use crate::registry::{TableRegistry, TableSpec};
use coerce::{scrub_zero_dates, CoercionOptions, CoercionWarning, TypeCoercionEngine};
use mapper::ColumnMapper;
use scale::{MonetaryScaleConverter, ScaleOutcome};
use tracing::warn;
use validate::{ExtractValidator, IssueCode, ValidationReport};

/// A fully normalized extract plus everything worth reporting about it.
pub struct NormalizedExtract {
    pub frame: Frame,
    /// Advisory validation report; None when validation is disabled.
    pub report: Option<ValidationReport>,
    pub coercion_warnings: Vec<CoercionWarning>,
    pub scale: ScaleOutcome,
    pub zero_dates_scrubbed: usize,
    pub unmapped_columns: Vec<String>,
}

/// Runs the per-table normalization sequence: header scrub, advisory
/// validation, type coercion on source columns, rename/reorder, monetary
/// rescaling, zero-date scrub.
pub struct ExtractNormalizer<'a> {
    registry: &'a TableRegistry,
    engine: TypeCoercionEngine,
    validation_enabled: bool,
    unmapped_policy: UnmappedColumns,
}

impl<'a> ExtractNormalizer<'a> {
    pub fn new(registry: &'a TableRegistry, pipeline: &PipelineConfig) -> Self {
        Self {
            registry,
            engine: TypeCoercionEngine::new(CoercionOptions {
                zero_year_correction: pipeline.zero_year_correction,
            }),
            validation_enabled: pipeline.validation_enabled,
            unmapped_policy: pipeline.unmapped_columns,
        }
    }

    pub fn normalize(
        &self,
        spec: &TableSpec,
        source_file: &str,
        mut frame: Frame,
    ) -> Result<NormalizedExtract> {
        ColumnMapper::scrub_headers(&mut frame);

        let report = self.validation_enabled.then(|| {
            ExtractValidator::validate(spec, source_file, &frame.columns, frame.row_count())
        });
        if let Some(r) = &report {
            r.emit();
        }

        // Coercion runs on source names; the mapping declares each column's type
        let mut coercion_warnings = Vec::new();
        for col in &spec.columns {
            if let Some(idx) = frame.column_index(&col.source_name) {
                if let Some(warning) = self.engine.coerce_column(&mut frame, idx, col.semantic_type)
                {
                    warn!(
                        code = IssueCode::DateParseFailure.as_str(),
                        table = %spec.table_id,
                        column = %warning.column,
                        failed_count = warning.failed_count,
                        sample_value = %warning.sample_value,
                        "date values passed through unparsed"
                    );
                    coercion_warnings.push(warning);
                }
            }
        }

        let mapped = ColumnMapper::apply(spec, frame, self.unmapped_policy)?;
        if !mapped.unmapped_columns.is_empty() {
            warn!(
                table = %spec.table_id,
                columns = %mapped.unmapped_columns.join(", "),
                policy = ?self.unmapped_policy,
                "extract carries columns with no mapping entry"
            );
        }
        let mut frame = mapped.frame;

        let rules = self.registry.monetary_rules_for(&spec.table_id);
        let scale = MonetaryScaleConverter::apply(&mut frame, &rules);

        let zero_dates_scrubbed =
            scrub_zero_dates(&mut frame, self.registry.zero_date_columns(&spec.table_id));

        Ok(NormalizedExtract {
            frame,
            report,
            coercion_warnings,
            scale,
            zero_dates_scrubbed,
            unmapped_columns: mapped.unmapped_columns,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CellValue, SemanticType};
    use crate::registry::{
        ColumnSpec, MonetaryScaleRule, PartitionGranularity, TableKind, ZeroDateRule,
    };

    fn text(s: &str) -> CellValue {
        CellValue::Text(s.to_string())
    }

    fn registry() -> TableRegistry {
        let spec = TableSpec {
            table_id: "sales_target_and_achievements".to_string(),
            aliases: vec!["1_1".to_string()],
            sheet: None,
            description: None,
            columns: vec![
                ColumnSpec {
                    source_name: "売上計上月".to_string(),
                    target_name: "sales_accounting_period".to_string(),
                    semantic_type: SemanticType::Date,
                    description: None,
                },
                ColumnSpec {
                    source_name: "支店コード".to_string(),
                    target_name: "branch_code".to_string(),
                    semantic_type: SemanticType::String,
                    description: None,
                },
                ColumnSpec {
                    source_name: "目標金額".to_string(),
                    target_name: "target_amount".to_string(),
                    semantic_type: SemanticType::Decimal,
                    description: None,
                },
                ColumnSpec {
                    source_name: "契約日".to_string(),
                    target_name: "contract_date".to_string(),
                    semantic_type: SemanticType::String,
                    description: None,
                },
            ],
            kind: TableKind::SinglePeriod {
                partition_column: "sales_accounting_period".to_string(),
                partition_granularity: PartitionGranularity::Month,
            },
            range_delete: false,
            partition_first: false,
        };
        TableRegistry::from_parts(
            vec![spec],
            vec![MonetaryScaleRule {
                table_id: "sales_target_and_achievements".to_string(),
                condition_column: "branch_code".to_string(),
                condition_values: vec!["001".to_string()],
                target_columns: vec!["target_amount".to_string()],
                multiplier: 1000.0,
            }],
            vec![ZeroDateRule {
                table_id: "sales_target_and_achievements".to_string(),
                columns: vec!["contract_date".to_string()],
            }],
        )
    }

    fn extract() -> Frame {
        // Headers arrive wrapped; one branch reports in thousands
        let mut frame = Frame::new(vec![
            "売上計上月".to_string(),
            "支店\nコード".to_string(),
            "目標金額".to_string(),
            "契約日".to_string(),
        ]);
        frame.push_row(vec![
            text("2025年9月"),
            text("001"),
            text("1,200"),
            text("0000/00/00"),
        ]);
        frame.push_row(vec![
            text("2025/09/01"),
            text("009"),
            text("800"),
            text("2025/08/15"),
        ]);
        frame
    }

    #[test]
    fn normalize_runs_the_full_sequence_in_order() {
        let registry = registry();
        let normalizer = ExtractNormalizer::new(&registry, &PipelineConfig::default());
        let spec = registry.get("sales_target_and_achievements").unwrap();

        let out = normalizer.normalize(spec, "1_1.xlsx", extract()).unwrap();
        assert_eq!(
            out.frame.columns,
            vec![
                "sales_accounting_period",
                "branch_code",
                "target_amount",
                "contract_date"
            ]
        );
        // Kanji year-month coerced, then renamed
        assert_eq!(out.frame.rows[0][0], text("2025-09-01"));
        // Monetary rule multiplied the masked row only
        assert_eq!(out.frame.rows[0][2], CellValue::Number(1_200_000.0));
        assert_eq!(out.frame.rows[1][2], CellValue::Number(800.0));
        // Configured zero-date scrub nulled the placeholder
        assert_eq!(out.frame.rows[0][3], CellValue::Null);
        assert_eq!(out.zero_dates_scrubbed, 1);
        assert_eq!(out.scale.rows_matched, 1);
        // Header scrub made the wrapped header validate clean
        let report = out.report.unwrap();
        assert!(report.errors.is_empty());
    }

    #[test]
    fn validation_can_be_disabled() {
        let registry = registry();
        let pipeline = PipelineConfig {
            validation_enabled: false,
            ..PipelineConfig::default()
        };
        let normalizer = ExtractNormalizer::new(&registry, &pipeline);
        let spec = registry.get("sales_target_and_achievements").unwrap();

        let out = normalizer.normalize(spec, "1_1.xlsx", extract()).unwrap();
        assert!(out.report.is_none());
    }

    #[test]
    fn unparsable_dates_surface_as_warnings_not_errors() {
        let registry = registry();
        let normalizer = ExtractNormalizer::new(&registry, &PipelineConfig::default());
        let spec = registry.get("sales_target_and_achievements").unwrap();

        let mut frame = extract();
        frame.rows[1][0] = text("集計対象外");
        let out = normalizer.normalize(spec, "1_1.xlsx", frame).unwrap();
        assert_eq!(out.coercion_warnings.len(), 1);
        assert_eq!(out.coercion_warnings[0].failed_count, 1);
        // The value passed through unchanged
        assert_eq!(out.frame.rows[1][0], text("集計対象外"));
    }
}
