//! Task entry points shared by the CLI and the HTTP trigger surface.
//!
//! Each task takes a params struct and returns a serializable run result.
//! Tables are isolated: one table's failure lands in the result's `errors`
//! list and the run carries on with the rest.

use crate::config::Config;
use crate::constants;
use crate::domain::{CellValue, Frame, Period};
use crate::error::GranaryError;
use crate::pipeline::extract::{self, CsvReader, CsvWriter, ExtractLocator};
use crate::pipeline::loading::{LoadReconciler, PartitionReplacer};
use crate::pipeline::processing::reconcile::DuplicateReconciler;
use crate::pipeline::processing::validate::IssueCode;
use crate::pipeline::processing::ExtractNormalizer;
use crate::registry::{TableRegistry, TableSpec};
use crate::storage::ObjectStore;
use crate::warehouse::Warehouse;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct TransformParams {
    pub period: String,
    pub tables: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct LoadParams {
    /// None reloads every normalized period from the fiscal epoch onward.
    pub period: Option<String>,
    pub tables: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct RunParams {
    pub period: String,
    pub tables: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
pub struct TableOutcome {
    pub table_id: String,
    pub source_file: String,
    pub rows_in: usize,
    pub rows_out: usize,
    pub warnings: usize,
    pub artifact: String,
    pub checksum: String,
}

#[derive(Debug, Serialize)]
pub struct TableFailure {
    pub table_id: String,
    pub code: IssueCode,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct TableSkip {
    pub table_id: String,
    pub code: IssueCode,
    pub reason: String,
}

#[derive(Debug, Serialize)]
pub struct TransformRunResult {
    pub run_id: String,
    pub period: String,
    pub success: Vec<TableOutcome>,
    pub errors: Vec<TableFailure>,
    pub skipped: Vec<TableSkip>,
}

impl TransformRunResult {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

#[derive(Debug, Serialize)]
pub struct LoadOutcome {
    pub table_id: String,
    pub period_range: String,
    pub rows_loaded: usize,
    pub rows_deleted: usize,
    pub duplicates_removed: usize,
    pub report_status: crate::pipeline::processing::validate::ValidationStatus,
}

#[derive(Debug, Serialize)]
pub struct LoadRunResult {
    pub run_id: String,
    pub periods: Vec<String>,
    pub success: Vec<LoadOutcome>,
    pub errors: Vec<TableFailure>,
    pub skipped: Vec<TableSkip>,
}

impl LoadRunResult {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

#[derive(Debug, Serialize)]
pub struct RunReport {
    pub transform: TransformRunResult,
    pub load: LoadRunResult,
}

impl RunReport {
    pub fn has_errors(&self) -> bool {
        self.transform.has_errors() || self.load.has_errors()
    }
}

/// Normalizes one period's raw extracts into CSV artifacts.
pub async fn transform_run(
    store: Arc<dyn ObjectStore>,
    registry: &TableRegistry,
    config: &Config,
    params: TransformParams,
) -> Result<TransformRunResult, Box<dyn std::error::Error>> {
    let period = Period::parse(&params.period)?;
    let specs = select_tables(registry, params.tables.as_deref())?;
    let run_id = Uuid::new_v4().to_string();
    info!(
        "transform: run {} for period {} over {} tables",
        run_id,
        period,
        specs.len()
    );

    let normalizer = ExtractNormalizer::new(registry, &config.pipeline);
    let mut result = TransformRunResult {
        run_id,
        period: period.to_string(),
        success: Vec::new(),
        errors: Vec::new(),
        skipped: Vec::new(),
    };

    for spec in specs {
        match transform_table(store.as_ref(), &normalizer, spec, period).await {
            Ok(Some(outcome)) => {
                crate::observability::metrics::transform::table_success();
                crate::observability::metrics::transform::rows_normalized(outcome.rows_out as u64);
                result.success.push(outcome);
            }
            Ok(None) => {
                crate::observability::metrics::transform::table_skipped();
                info!(
                    "transform: no raw extract for table {} in {}",
                    spec.table_id, period
                );
                result.skipped.push(TableSkip {
                    table_id: spec.table_id.clone(),
                    code: IssueCode::FileNotFound,
                    reason: "no raw extract delivered".to_string(),
                });
            }
            Err(e) => {
                crate::observability::metrics::transform::table_error();
                warn!("transform: table {} failed: {}", spec.table_id, e);
                result.errors.push(TableFailure {
                    table_id: spec.table_id.clone(),
                    code: failure_code(&e),
                    message: e.to_string(),
                });
            }
        }
    }

    info!(
        "transform: run complete: {} ok, {} failed, {} skipped",
        result.success.len(),
        result.errors.len(),
        result.skipped.len()
    );
    Ok(result)
}

async fn transform_table(
    store: &dyn ObjectStore,
    normalizer: &ExtractNormalizer<'_>,
    spec: &TableSpec,
    period: Period,
) -> crate::error::Result<Option<TableOutcome>> {
    let key = match ExtractLocator::locate(store, spec, period).await? {
        Some(key) => key,
        None => return Ok(None),
    };
    let source_file = key.rsplit('/').next().unwrap_or(&key).to_string();

    let frame = extract::read_frame(store, &key, spec.sheet.as_deref()).await?;
    let rows_in = frame.row_count();

    let normalized = normalizer.normalize(spec, &source_file, frame)?;
    let warnings = normalized.coercion_warnings.len()
        + normalized
            .report
            .as_ref()
            .map(|r| r.warnings.len())
            .unwrap_or(0);

    let artifact = constants::normalized_key(&period.to_string(), &spec.table_id);
    let bytes = CsvWriter::to_bytes(&normalized.frame)?;
    let checksum = {
        use sha2::{Digest, Sha256};
        let mut h = Sha256::new();
        h.update(&bytes);
        hex::encode(h.finalize())
    };
    store.put(&artifact, &bytes).await?;
    info!(
        "transform: wrote {} ({} rows, {} bytes, sha256 {})",
        artifact,
        normalized.frame.row_count(),
        bytes.len(),
        checksum
    );

    Ok(Some(TableOutcome {
        table_id: spec.table_id.clone(),
        source_file,
        rows_in,
        rows_out: normalized.frame.row_count(),
        warnings,
        artifact,
        checksum,
    }))
}

/// Loads normalized artifacts into the warehouse with partition replacement.
pub async fn load_run(
    store: Arc<dyn ObjectStore>,
    warehouse: Arc<dyn Warehouse>,
    registry: &TableRegistry,
    config: &Config,
    params: LoadParams,
) -> Result<LoadRunResult, Box<dyn std::error::Error>> {
    let periods = match &params.period {
        Some(raw) => vec![Period::parse(raw)?],
        None => {
            let fiscal_start = Period::parse(&config.pipeline.fiscal_start_period)?;
            discover_periods(store.as_ref(), fiscal_start).await?
        }
    };
    if periods.is_empty() {
        return Err("no normalized periods found to load".into());
    }

    let specs = select_tables(registry, params.tables.as_deref())?;
    let run_id = Uuid::new_v4().to_string();
    info!(
        "load: run {} over {} tables, periods {}",
        run_id,
        specs.len(),
        period_range_label(&periods)
    );

    let mut result = LoadRunResult {
        run_id,
        periods: periods.iter().map(|p| p.to_string()).collect(),
        success: Vec::new(),
        errors: Vec::new(),
        skipped: Vec::new(),
    };

    for spec in specs {
        let loaded = if spec.is_cumulative() {
            load_cumulative(store.as_ref(), warehouse.as_ref(), spec, &periods, config).await
        } else {
            load_single_period(store.as_ref(), warehouse.as_ref(), spec, &periods, config).await
        };
        match loaded {
            Ok(Some(outcome)) => {
                crate::observability::metrics::load::table_success();
                crate::observability::metrics::load::rows_loaded(outcome.rows_loaded as u64);
                crate::observability::metrics::load::rows_deleted(outcome.rows_deleted as u64);
                crate::observability::metrics::load::duplicates_removed(
                    outcome.duplicates_removed as u64,
                );
                result.success.push(outcome);
            }
            Ok(None) => {
                crate::observability::metrics::load::table_skipped();
                info!("load: no normalized artifact for table {}", spec.table_id);
                result.skipped.push(TableSkip {
                    table_id: spec.table_id.clone(),
                    code: IssueCode::FileNotFound,
                    reason: "no normalized artifact for the requested periods".to_string(),
                });
            }
            Err(e) => {
                crate::observability::metrics::load::table_error();
                warn!("load: table {} failed: {}", spec.table_id, e);
                result.errors.push(TableFailure {
                    table_id: spec.table_id.clone(),
                    code: failure_code(&e),
                    message: e.to_string(),
                });
            }
        }
    }

    info!(
        "load: run complete: {} ok, {} failed, {} skipped",
        result.success.len(),
        result.errors.len(),
        result.skipped.len()
    );
    Ok(result)
}

async fn load_single_period(
    store: &dyn ObjectStore,
    warehouse: &dyn Warehouse,
    spec: &TableSpec,
    periods: &[Period],
    config: &Config,
) -> crate::error::Result<Option<LoadOutcome>> {
    let mut loaded: Vec<Period> = Vec::new();
    let mut rows_loaded = 0usize;
    let mut rows_deleted = 0usize;
    let mut duplicates_removed = 0usize;

    for period in periods {
        let key = constants::normalized_key(&period.to_string(), &spec.table_id);
        if !store.exists(&key).await? {
            continue;
        }
        let frame = CsvReader::read(&store.get(&key).await?)?;
        let (deduped, stats) = DuplicateReconciler::collapse_exact(
            &spec.table_id,
            frame,
            &period.to_string(),
            config.pipeline.max_duplicate_ratio,
        )?;
        duplicates_removed += stats.as_ref().map(|s| s.duplicate_count).unwrap_or(0);

        let outcome = PartitionReplacer::replace(
            warehouse,
            spec,
            &deduped,
            &config.pipeline.fiscal_start_date,
        )
        .await?;
        rows_loaded += outcome.appended;
        rows_deleted += outcome.deleted;
        loaded.push(*period);
    }

    if loaded.is_empty() {
        return Ok(None);
    }
    let period_range = period_range_label(&loaded);
    let report = LoadReconciler::report(warehouse, spec, &period_range).await;
    report.emit();

    Ok(Some(LoadOutcome {
        table_id: spec.table_id.clone(),
        period_range,
        rows_loaded,
        rows_deleted,
        duplicates_removed,
        report_status: report.status,
    }))
}

async fn load_cumulative(
    store: &dyn ObjectStore,
    warehouse: &dyn Warehouse,
    spec: &TableSpec,
    periods: &[Period],
    config: &Config,
) -> crate::error::Result<Option<LoadOutcome>> {
    // Union all period batches, tagging each row with its origin period so
    // the merge can keep the newest restatement per business key
    let mut merged: Option<Frame> = None;
    let mut loaded: Vec<Period> = Vec::new();
    for period in periods {
        let key = constants::normalized_key(&period.to_string(), &spec.table_id);
        if !store.exists(&key).await? {
            continue;
        }
        let mut frame = CsvReader::read(&store.get(&key).await?)?;
        frame.add_column(
            constants::ORIGIN_COLUMN,
            CellValue::Number(period.as_u32() as f64),
        );
        match merged.as_mut() {
            None => merged = Some(frame),
            Some(m) => m.append_aligned(&frame)?,
        }
        loaded.push(*period);
    }
    let merged = match merged {
        Some(m) => m,
        None => return Ok(None),
    };

    let merged = match spec.unique_keys() {
        Some(keys) if !keys.is_empty() => {
            DuplicateReconciler::merge_latest_wins(&spec.table_id, merged, keys)?
        }
        _ => merged,
    };

    let period_range = period_range_label(&loaded);
    let (deduped, stats) = DuplicateReconciler::collapse_exact(
        &spec.table_id,
        merged,
        &period_range,
        config.pipeline.max_duplicate_ratio,
    )?;
    let duplicates_removed = stats.as_ref().map(|s| s.duplicate_count).unwrap_or(0);

    let outcome = PartitionReplacer::replace(
        warehouse,
        spec,
        &deduped,
        &config.pipeline.fiscal_start_date,
    )
    .await?;
    let report = LoadReconciler::report(warehouse, spec, &period_range).await;
    report.emit();

    Ok(Some(LoadOutcome {
        table_id: spec.table_id.clone(),
        period_range,
        rows_loaded: outcome.appended,
        rows_deleted: outcome.deleted,
        duplicates_removed,
        report_status: report.status,
    }))
}

/// Transform then load for one period.
pub async fn run_all(
    store: Arc<dyn ObjectStore>,
    warehouse: Arc<dyn Warehouse>,
    registry: &TableRegistry,
    config: &Config,
    params: RunParams,
) -> Result<RunReport, Box<dyn std::error::Error>> {
    let transform = transform_run(
        store.clone(),
        registry,
        config,
        TransformParams {
            period: params.period.clone(),
            tables: params.tables.clone(),
        },
    )
    .await?;
    let load = load_run(
        store,
        warehouse,
        registry,
        config,
        LoadParams {
            period: Some(params.period),
            tables: params.tables,
        },
    )
    .await?;
    Ok(RunReport { transform, load })
}

fn select_tables<'a>(
    registry: &'a TableRegistry,
    filter: Option<&[String]>,
) -> Result<Vec<&'a TableSpec>, Box<dyn std::error::Error>> {
    match filter {
        None => Ok(registry
            .table_ids()
            .into_iter()
            .filter_map(|id| registry.get(id))
            .collect()),
        Some(ids) => {
            let mut specs = Vec::with_capacity(ids.len());
            for id in ids {
                match registry.get(id) {
                    Some(spec) => specs.push(spec),
                    None => return Err(format!("unknown table '{}'", id).into()),
                }
            }
            Ok(specs)
        }
    }
}

async fn discover_periods(
    store: &dyn ObjectStore,
    fiscal_start: Period,
) -> crate::error::Result<Vec<Period>> {
    let keys = store
        .list(&format!("{}/", constants::NORMALIZED_PREFIX))
        .await?;
    let mut periods: BTreeSet<Period> = BTreeSet::new();
    for key in keys {
        let mut parts = key.split('/');
        parts.next();
        if let Some(segment) = parts.next() {
            if let Ok(period) = Period::parse(segment) {
                if period >= fiscal_start {
                    periods.insert(period);
                }
            }
        }
    }
    Ok(periods.into_iter().collect())
}

fn period_range_label(periods: &[Period]) -> String {
    match (periods.first(), periods.last()) {
        (Some(first), Some(last)) if first != last => format!("{}-{}", first, last),
        (Some(first), _) => first.to_string(),
        _ => String::new(),
    }
}

fn failure_code(err: &GranaryError) -> IssueCode {
    match err {
        GranaryError::MappingNotFound(_) => IssueCode::MappingNotFound,
        GranaryError::DuplicateRatioExceeded { .. } => IssueCode::DuplicateRecords,
        _ => IssueCode::LoadError,
    }
}
