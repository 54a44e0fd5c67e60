//! Table registry: the canonical description of every extract family the
//! pipeline handles.
//!
//! One JSON document per table under `tables/`, plus shared monetary-scale
//! and zero-date rule files. Documents are validated against embedded JSON
//! Schemas before deserialization, so a malformed registry fails loudly at
//! startup instead of mid-run. The loaded registry is immutable and passed
//! by reference through the pipeline.

use crate::domain::SemanticType;
use crate::error::{GranaryError, Result};
use jsonschema::JSONSchema;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

static TABLE_SPEC_SCHEMA: Lazy<JSONSchema> = Lazy::new(|| {
    compile_schema(include_str!("../../registry/schema/table_spec.schema.json"))
});

static MONETARY_SCALE_SCHEMA: Lazy<JSONSchema> = Lazy::new(|| {
    compile_schema(include_str!(
        "../../registry/schema/monetary_scale.schema.json"
    ))
});

static ZERO_DATE_SCHEMA: Lazy<JSONSchema> = Lazy::new(|| {
    compile_schema(include_str!("../../registry/schema/zero_date.schema.json"))
});

fn compile_schema(raw: &str) -> JSONSchema {
    // jsonschema 0.17 expects a schema with 'static lifetime; leak the
    // parsed schema since these live for the whole process anyway
    let schema: &'static Value =
        Box::leak(Box::new(serde_json::from_str(raw).expect("embedded schema is valid JSON")));
    JSONSchema::options()
        .compile(schema)
        .expect("embedded schema compiles")
}

/// One mapped column: raw header name, canonical name, declared type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub source_name: String,
    pub target_name: String,
    pub semantic_type: SemanticType,
    #[serde(default)]
    pub description: Option<String>,
}

/// How a table's history is keyed and replaced.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum TableKind {
    /// Each extract restates one accounting period; loads replace that
    /// period's partition.
    SinglePeriod {
        partition_column: String,
        #[serde(default)]
        partition_granularity: PartitionGranularity,
    },
    /// Extracts restate full history; batches are merged latest-wins per
    /// business key before the table is rewritten.
    Cumulative { unique_keys: Vec<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PartitionGranularity {
    /// Partition values are first-of-month dates; precise deletes match
    /// stored values exactly.
    #[default]
    Month,
    /// Partition values are full dates (slip dates etc.); precise deletes
    /// match by month truncation.
    Day,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSpec {
    /// Canonical snake_case name; doubles as the warehouse table name.
    pub table_id: String,
    /// Raw-file basename slugs the upstream export job uses ("1_1", "12_5").
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Worksheet to read; defaults to the first sheet in the workbook.
    #[serde(default)]
    pub sheet: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub columns: Vec<ColumnSpec>,
    pub kind: TableKind,
    /// Replace by fiscal-window range instead of per-partition values.
    #[serde(default)]
    pub range_delete: bool,
    /// Hoist the partition/lead column to the front of the output.
    #[serde(default)]
    pub partition_first: bool,
}

impl TableSpec {
    pub fn unique_keys(&self) -> Option<&[String]> {
        match &self.kind {
            TableKind::Cumulative { unique_keys } => Some(unique_keys),
            TableKind::SinglePeriod { .. } => None,
        }
    }

    pub fn partition_column(&self) -> Option<&str> {
        match &self.kind {
            TableKind::SinglePeriod {
                partition_column, ..
            } => Some(partition_column),
            TableKind::Cumulative { .. } => None,
        }
    }

    pub fn partition_granularity(&self) -> PartitionGranularity {
        match &self.kind {
            TableKind::SinglePeriod {
                partition_granularity,
                ..
            } => *partition_granularity,
            TableKind::Cumulative { .. } => PartitionGranularity::Month,
        }
    }

    pub fn is_cumulative(&self) -> bool {
        matches!(self.kind, TableKind::Cumulative { .. })
    }

    /// The raw header names the extract is expected to carry.
    pub fn expected_source_columns(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.source_name.as_str()).collect()
    }

    /// Canonical output column order as declared in the mapping.
    pub fn target_columns(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.target_name.as_str()).collect()
    }

    pub fn column_for_target(&self, target: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.target_name == target)
    }
}

/// Conditional monetary rescaling: rows whose condition column holds one of
/// the listed values get their target columns multiplied. Written against
/// canonical (post-rename) column names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonetaryScaleRule {
    pub table_id: String,
    pub condition_column: String,
    pub condition_values: Vec<String>,
    pub target_columns: Vec<String>,
    pub multiplier: f64,
}

/// Columns scrubbed of zero-date placeholder values after renaming.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZeroDateRule {
    pub table_id: String,
    pub columns: Vec<String>,
}

/// Immutable registry loaded once at startup.
#[derive(Debug)]
pub struct TableRegistry {
    tables: HashMap<String, TableSpec>,
    monetary_rules: Vec<MonetaryScaleRule>,
    zero_date_columns: HashMap<String, Vec<String>>,
}

impl TableRegistry {
    /// Loads every table document plus the shared rule files from a registry
    /// directory. Layout: `{dir}/tables/*.json`, `{dir}/monetary_scale.json`,
    /// `{dir}/zero_date.json` (the rule files are optional).
    pub fn load(dir: &Path) -> Result<Self> {
        let tables_dir = dir.join("tables");
        let mut entries: Vec<_> = fs::read_dir(&tables_dir)
            .map_err(|e| {
                GranaryError::Registry(format!(
                    "cannot read registry directory {}: {}",
                    tables_dir.display(),
                    e
                ))
            })?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().map(|ext| ext == "json").unwrap_or(false))
            .collect();
        entries.sort();

        let mut tables = HashMap::new();
        for path in entries {
            let spec = load_table_spec(&path)?;
            if tables.contains_key(&spec.table_id) {
                return Err(GranaryError::Registry(format!(
                    "duplicate table_id '{}' in {}",
                    spec.table_id,
                    path.display()
                )));
            }
            tables.insert(spec.table_id.clone(), spec);
        }
        if tables.is_empty() {
            return Err(GranaryError::Registry(format!(
                "no table documents found under {}",
                tables_dir.display()
            )));
        }

        let monetary_rules = match load_validated_json(
            &dir.join("monetary_scale.json"),
            &MONETARY_SCALE_SCHEMA,
        )? {
            Some(value) => serde_json::from_value(value)?,
            None => Vec::new(),
        };

        let zero_date_rules: Vec<ZeroDateRule> =
            match load_validated_json(&dir.join("zero_date.json"), &ZERO_DATE_SCHEMA)? {
                Some(value) => serde_json::from_value(value)?,
                None => Vec::new(),
            };
        let zero_date_columns = zero_date_rules
            .into_iter()
            .map(|r| (r.table_id, r.columns))
            .collect();

        Ok(Self {
            tables,
            monetary_rules,
            zero_date_columns,
        })
    }

    /// Builds a registry directly from parts; used by tests.
    pub fn from_parts(
        tables: Vec<TableSpec>,
        monetary_rules: Vec<MonetaryScaleRule>,
        zero_date_rules: Vec<ZeroDateRule>,
    ) -> Self {
        Self {
            tables: tables
                .into_iter()
                .map(|t| (t.table_id.clone(), t))
                .collect(),
            monetary_rules,
            zero_date_columns: zero_date_rules
                .into_iter()
                .map(|r| (r.table_id, r.columns))
                .collect(),
        }
    }

    pub fn get(&self, table_id: &str) -> Option<&TableSpec> {
        self.tables.get(table_id)
    }

    /// All registered table ids in stable (sorted) order.
    pub fn table_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.tables.keys().map(|k| k.as_str()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn monetary_rules_for(&self, table_id: &str) -> Vec<&MonetaryScaleRule> {
        self.monetary_rules
            .iter()
            .filter(|r| r.table_id == table_id)
            .collect()
    }

    pub fn zero_date_columns(&self, table_id: &str) -> &[String] {
        self.zero_date_columns
            .get(table_id)
            .map(|c| c.as_slice())
            .unwrap_or(&[])
    }
}

fn load_table_spec(path: &Path) -> Result<TableSpec> {
    let raw = fs::read_to_string(path)?;
    let value: Value = serde_json::from_str(&raw)?;
    validate_against(&TABLE_SPEC_SCHEMA, &value, path)?;
    let spec: TableSpec = serde_json::from_value(value)?;
    Ok(spec)
}

fn load_validated_json(path: &Path, schema: &JSONSchema) -> Result<Option<Value>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)?;
    let value: Value = serde_json::from_str(&raw)?;
    validate_against(schema, &value, path)?;
    Ok(Some(value))
}

fn validate_against(schema: &JSONSchema, instance: &Value, path: &Path) -> Result<()> {
    if let Err(errors) = schema.validate(instance) {
        let details: Vec<String> = errors
            .map(|e| format!("{} at {}", e, e.instance_path))
            .collect();
        return Err(GranaryError::Registry(format!(
            "{} failed schema validation: {}",
            path.display(),
            details.join("; ")
        )));
    }
    Ok(())
}
