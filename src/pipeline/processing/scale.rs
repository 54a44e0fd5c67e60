//! Conditional monetary rescaling.
//!
//! Some source systems report amounts in thousands of yen for particular
//! branches only. A scale rule names a condition column, the values that
//! select a row, the amount columns to rescale and the multiplier.

use crate::domain::{CellValue, Frame};
use crate::pipeline::processing::coerce::parse_number;
use crate::registry::MonetaryScaleRule;
use tracing::warn;

/// Counters describing what a set of scale rules did to a frame.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ScaleOutcome {
    pub rows_matched: usize,
    pub cells_scaled: usize,
    pub rules_skipped: usize,
}

pub struct MonetaryScaleConverter;

impl MonetaryScaleConverter {
    pub fn apply(frame: &mut Frame, rules: &[&MonetaryScaleRule]) -> ScaleOutcome {
        let mut outcome = ScaleOutcome::default();

        for rule in rules {
            let condition_index = match frame.column_index(&rule.condition_column) {
                Some(idx) => idx,
                None => {
                    warn!(
                        table_id = %rule.table_id,
                        condition_column = %rule.condition_column,
                        "monetary scale rule skipped: condition column absent"
                    );
                    outcome.rules_skipped += 1;
                    continue;
                }
            };

            let mut target_indexes = Vec::with_capacity(rule.target_columns.len());
            for target in &rule.target_columns {
                match frame.column_index(target) {
                    Some(idx) => target_indexes.push(idx),
                    None => warn!(
                        table_id = %rule.table_id,
                        target_column = %target,
                        "monetary scale rule target column absent"
                    ),
                }
            }
            if target_indexes.is_empty() {
                outcome.rules_skipped += 1;
                continue;
            }

            for row in &mut frame.rows {
                let cell_text = row[condition_index]
                    .render()
                    .map(|s| s.trim().to_string())
                    .unwrap_or_default();
                if !rule.condition_values.iter().any(|v| *v == cell_text) {
                    continue;
                }
                outcome.rows_matched += 1;

                for &idx in &target_indexes {
                    let numeric = match &row[idx] {
                        CellValue::Number(n) => Some(*n),
                        CellValue::Text(s) => parse_number(s),
                        _ => None,
                    };
                    match numeric {
                        Some(n) => {
                            outcome.cells_scaled += 1;
                            row[idx] = CellValue::Number(n * rule.multiplier);
                        }
                        // A masked cell is numerically coerced: unparsable
                        // amounts become null rather than staying unscaled
                        None => row[idx] = CellValue::Null,
                    }
                }
            }
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule() -> MonetaryScaleRule {
        MonetaryScaleRule {
            table_id: "sales_target_and_achievements".to_string(),
            condition_column: "branch_code".to_string(),
            condition_values: vec!["001".to_string(), "002".to_string()],
            target_columns: vec!["target_amount".to_string()],
            multiplier: 1000.0,
        }
    }

    fn frame(rows: Vec<(&str, CellValue)>) -> Frame {
        let mut f = Frame::new(vec!["branch_code".to_string(), "target_amount".to_string()]);
        for (code, amount) in rows {
            f.push_row(vec![CellValue::Text(code.to_string()), amount]);
        }
        f
    }

    #[test]
    fn multiplies_only_masked_rows() {
        let mut f = frame(vec![
            ("001", CellValue::Number(5.0)),
            ("900", CellValue::Number(7.0)),
        ]);
        let rule = rule();
        let outcome = MonetaryScaleConverter::apply(&mut f, &[&rule]);

        assert_eq!(f.rows[0][1], CellValue::Number(5000.0));
        assert_eq!(f.rows[1][1], CellValue::Number(7.0));
        assert_eq!(
            outcome,
            ScaleOutcome {
                rows_matched: 1,
                cells_scaled: 1,
                rules_skipped: 0,
            }
        );
    }

    #[test]
    fn masked_non_numeric_target_becomes_null() {
        let mut f = frame(vec![("001", CellValue::Text("未定".to_string()))]);
        let rule = rule();
        let outcome = MonetaryScaleConverter::apply(&mut f, &[&rule]);

        assert_eq!(f.rows[0][1], CellValue::Null);
        assert_eq!(outcome.rows_matched, 1);
        assert_eq!(outcome.cells_scaled, 0);
    }

    #[test]
    fn numeric_condition_cells_match_their_rendered_text() {
        // A condition column read from xlsx arrives as a number
        let mut f = Frame::new(vec!["branch_code".to_string(), "target_amount".to_string()]);
        f.push_row(vec![CellValue::Number(2.0), CellValue::Number(3.0)]);

        let mut rule = rule();
        rule.condition_values = vec!["2".to_string()];
        MonetaryScaleConverter::apply(&mut f, &[&rule]);

        assert_eq!(f.rows[0][1], CellValue::Number(3000.0));
    }

    #[test]
    fn missing_condition_column_skips_rule_without_failing() {
        let mut f = Frame::new(vec!["target_amount".to_string()]);
        f.push_row(vec![CellValue::Number(5.0)]);

        let rule = rule();
        let outcome = MonetaryScaleConverter::apply(&mut f, &[&rule]);

        assert_eq!(outcome.rules_skipped, 1);
        assert_eq!(f.rows[0][0], CellValue::Number(5.0));
    }
}
