//! Metrics for the normalize-and-load pipeline.
//!
//! Counter names follow Prometheus conventions and carry the `granary_`
//! prefix so they group cleanly next to other jobs on a shared scrape.

use std::fmt;

/// Every metric the pipeline records, to keep names out of call sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    // Heartbeat
    Heartbeat,

    // Transform metrics
    TransformTablesSuccess,
    TransformTablesError,
    TransformTablesSkipped,
    TransformRowsNormalized,

    // Load metrics
    LoadTablesSuccess,
    LoadTablesError,
    LoadTablesSkipped,
    LoadRowsLoaded,
    LoadRowsDeleted,
    LoadDuplicatesRemoved,

    // Validation metrics
    ValidationReportsOk,
    ValidationReportsError,
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            // Heartbeat
            MetricName::Heartbeat => "granary_heartbeat_total",

            // Transform metrics
            MetricName::TransformTablesSuccess => "granary_transform_tables_success_total",
            MetricName::TransformTablesError => "granary_transform_tables_error_total",
            MetricName::TransformTablesSkipped => "granary_transform_tables_skipped_total",
            MetricName::TransformRowsNormalized => "granary_transform_rows_normalized_total",

            // Load metrics
            MetricName::LoadTablesSuccess => "granary_load_tables_success_total",
            MetricName::LoadTablesError => "granary_load_tables_error_total",
            MetricName::LoadTablesSkipped => "granary_load_tables_skipped_total",
            MetricName::LoadRowsLoaded => "granary_load_rows_loaded_total",
            MetricName::LoadRowsDeleted => "granary_load_rows_deleted_total",
            MetricName::LoadDuplicatesRemoved => "granary_load_duplicates_removed_total",

            // Validation metrics
            MetricName::ValidationReportsOk => "granary_validation_reports_ok_total",
            MetricName::ValidationReportsError => "granary_validation_reports_error_total",
        }
    }

    /// All metric names, for registration at startup.
    pub fn all_metrics() -> impl Iterator<Item = MetricName> {
        use MetricName::*;
        [
            // Heartbeat
            Heartbeat,
            // Transform metrics
            TransformTablesSuccess,
            TransformTablesError,
            TransformTablesSkipped,
            TransformRowsNormalized,
            // Load metrics
            LoadTablesSuccess,
            LoadTablesError,
            LoadTablesSkipped,
            LoadRowsLoaded,
            LoadRowsDeleted,
            LoadDuplicatesRemoved,
            // Validation metrics
            ValidationReportsOk,
            ValidationReportsError,
        ]
        .into_iter()
    }

    /// Returns (phase, description) used for Prometheus HELP text.
    pub fn metadata(&self) -> (&'static str, &'static str) {
        match self {
            // Heartbeat
            MetricName::Heartbeat => ("system", "Heartbeat counter"),

            // Transform metrics
            MetricName::TransformTablesSuccess => ("transform", "Tables normalized successfully"),
            MetricName::TransformTablesError => ("transform", "Tables that failed to normalize"),
            MetricName::TransformTablesSkipped => ("transform", "Tables with no raw extract"),
            MetricName::TransformRowsNormalized => {
                ("transform", "Rows written to normalized artifacts")
            }

            // Load metrics
            MetricName::LoadTablesSuccess => ("load", "Tables loaded successfully"),
            MetricName::LoadTablesError => ("load", "Tables that failed to load"),
            MetricName::LoadTablesSkipped => ("load", "Tables with no normalized artifact"),
            MetricName::LoadRowsLoaded => ("load", "Rows appended to the warehouse"),
            MetricName::LoadRowsDeleted => ("load", "Rows deleted by partition replacement"),
            MetricName::LoadDuplicatesRemoved => {
                ("load", "Exact-duplicate rows dropped before load")
            }

            // Validation metrics
            MetricName::ValidationReportsOk => ("validation", "Validation reports with no errors"),
            MetricName::ValidationReportsError => {
                ("validation", "Validation reports carrying errors")
            }
        }
    }
}

use std::sync::OnceLock;
use tracing::info;

static METRICS_HANDLE: OnceLock<metrics_exporter_prometheus::PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder and register HELP text for every metric.
pub fn init() -> Result<(), Box<dyn std::error::Error>> {
    let handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {}", e))?;

    for metric in MetricName::all_metrics() {
        let (_, description) = metric.metadata();
        ::metrics::describe_counter!(metric.as_str(), description);
    }

    METRICS_HANDLE.set(handle).ok();
    info!("Metrics system initialized");
    Ok(())
}

/// Render the current scrape body, if the recorder is installed.
pub fn get_metrics_handle() -> Option<String> {
    METRICS_HANDLE.get().map(|handle| handle.render())
}

/// Record a heartbeat for liveness checks.
pub fn heartbeat() {
    ::metrics::counter!(MetricName::Heartbeat.as_str()).increment(1);
}

// ============================================================================
// Transform Metrics
// ============================================================================

pub mod transform {
    use super::MetricName;

    /// Record a table normalized end to end
    pub fn table_success() {
        ::metrics::counter!(MetricName::TransformTablesSuccess.as_str()).increment(1);
    }

    /// Record a table that failed during normalization
    pub fn table_error() {
        ::metrics::counter!(MetricName::TransformTablesError.as_str()).increment(1);
    }

    /// Record a table skipped because no raw extract was delivered
    pub fn table_skipped() {
        ::metrics::counter!(MetricName::TransformTablesSkipped.as_str()).increment(1);
    }

    /// Record rows written to a normalized artifact
    pub fn rows_normalized(rows: u64) {
        ::metrics::counter!(MetricName::TransformRowsNormalized.as_str()).increment(rows);
    }
}

// ============================================================================
// Load Metrics
// ============================================================================

pub mod load {
    use super::MetricName;

    /// Record a table loaded into the warehouse
    pub fn table_success() {
        ::metrics::counter!(MetricName::LoadTablesSuccess.as_str()).increment(1);
    }

    /// Record a table that failed during load
    pub fn table_error() {
        ::metrics::counter!(MetricName::LoadTablesError.as_str()).increment(1);
    }

    /// Record a table skipped because no artifact exists for the run's periods
    pub fn table_skipped() {
        ::metrics::counter!(MetricName::LoadTablesSkipped.as_str()).increment(1);
    }

    /// Record rows appended by partition replacement
    pub fn rows_loaded(rows: u64) {
        ::metrics::counter!(MetricName::LoadRowsLoaded.as_str()).increment(rows);
    }

    /// Record rows deleted by partition replacement
    pub fn rows_deleted(rows: u64) {
        ::metrics::counter!(MetricName::LoadRowsDeleted.as_str()).increment(rows);
    }

    /// Record exact duplicates dropped ahead of the append
    pub fn duplicates_removed(rows: u64) {
        ::metrics::counter!(MetricName::LoadDuplicatesRemoved.as_str()).increment(rows);
    }
}

// ============================================================================
// Validation Metrics
// ============================================================================

pub mod validation {
    use super::MetricName;

    /// Record a validation report that found no errors
    pub fn report_ok() {
        ::metrics::counter!(MetricName::ValidationReportsOk.as_str()).increment(1);
    }

    /// Record a validation report carrying at least one error
    pub fn report_error() {
        ::metrics::counter!(MetricName::ValidationReportsError.as_str()).increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_names_follow_prometheus_conventions() {
        for metric in MetricName::all_metrics() {
            let name = metric.as_str();
            assert!(name.starts_with("granary_"), "bad prefix: {}", name);
            assert!(name.ends_with("_total"), "counter without _total: {}", name);
            assert!(!name.contains('-'), "hyphen in metric name: {}", name);
        }
    }

    #[test]
    fn every_metric_carries_metadata() {
        for metric in MetricName::all_metrics() {
            let (phase, description) = metric.metadata();
            assert!(!phase.is_empty());
            assert!(!description.is_empty());
        }
    }
}
