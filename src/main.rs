use clap::{Parser, Subcommand};
use granary::config::Config;
use granary::pipeline::tasks::{
    self, LoadParams, LoadRunResult, RunParams, TransformParams, TransformRunResult,
};
use granary::registry::TableRegistry;
use granary::server::{self, ServerContext};
use granary::storage::{FsObjectStore, ObjectStore};
use granary::warehouse::{SqliteWarehouse, Warehouse};
use granary::{logging, observability};
use std::path::Path;
use std::sync::Arc;
use tracing::error;

#[derive(Parser)]
#[command(name = "granary")]
#[command(about = "Normalizes monthly spreadsheet extracts and loads them into the warehouse")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Normalize raw extracts for one period into CSV artifacts
    Transform {
        /// Accounting period as yyyymm
        #[arg(long)]
        period: String,
        /// Specific tables to process (comma-separated table ids)
        #[arg(long)]
        tables: Option<String>,
    },
    /// Load normalized artifacts into the warehouse
    Load {
        /// Accounting period as yyyymm; omit to reload every period on record
        #[arg(long)]
        period: Option<String>,
        /// Specific tables to load (comma-separated table ids)
        #[arg(long)]
        tables: Option<String>,
    },
    /// Run transform and load sequentially for one period
    Run {
        /// Accounting period as yyyymm
        #[arg(long)]
        period: String,
        /// Specific tables to process (comma-separated table ids)
        #[arg(long)]
        tables: Option<String>,
    },
    /// Start the HTTP trigger server
    Serve {
        /// Port to listen on; defaults to the configured port
        #[arg(long)]
        port: Option<u16>,
    },
}

fn parse_tables(arg: Option<String>) -> Option<Vec<String>> {
    arg.map(|list| list.split(',').map(|s| s.trim().to_string()).collect())
}

fn build_context(config: Config) -> Result<Arc<ServerContext>, Box<dyn std::error::Error>> {
    let store: Arc<dyn ObjectStore> = Arc::new(FsObjectStore::new(&config.storage.data_root));
    let warehouse: Arc<dyn Warehouse> = Arc::new(SqliteWarehouse::open(&config.warehouse.db_path)?);
    let registry = Arc::new(TableRegistry::load(Path::new(&config.storage.registry_dir))?);
    Ok(Arc::new(ServerContext {
        store,
        warehouse,
        registry,
        config,
    }))
}

fn print_transform_summary(result: &TransformRunResult) {
    println!("\n📊 Transform results for {}:", result.period);
    println!("   Tables ok: {}", result.success.len());
    println!("   Skipped:   {}", result.skipped.len());
    println!("   Errors:    {}", result.errors.len());
    for outcome in &result.success {
        println!(
            "   ✅ {} ({} rows in, {} rows out)",
            outcome.table_id, outcome.rows_in, outcome.rows_out
        );
    }
    for skip in &result.skipped {
        println!("   ⏭️  {} ({})", skip.table_id, skip.reason);
    }
    for failure in &result.errors {
        println!("   ❌ {}: {}", failure.table_id, failure.message);
    }
}

fn print_load_summary(result: &LoadRunResult) {
    println!("\n📦 Load results for {}:", result.periods.join(", "));
    println!("   Tables ok: {}", result.success.len());
    println!("   Skipped:   {}", result.skipped.len());
    println!("   Errors:    {}", result.errors.len());
    for outcome in &result.success {
        println!(
            "   ✅ {} ({} rows loaded, {} deleted, {} duplicates removed)",
            outcome.table_id, outcome.rows_loaded, outcome.rows_deleted, outcome.duplicates_removed
        );
    }
    for skip in &result.skipped {
        println!("   ⏭️  {} ({})", skip.table_id, skip.reason);
    }
    for failure in &result.errors {
        println!("   ❌ {}: {}", failure.table_id, failure.message);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    logging::init_logging();
    observability::init()?;

    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command {
        Commands::Transform { period, tables } => {
            println!("🔄 Normalizing extracts for period {}...", period);
            let ctx = build_context(config)?;
            let params = TransformParams {
                period,
                tables: parse_tables(tables),
            };
            match tasks::transform_run(ctx.store.clone(), &ctx.registry, &ctx.config, params).await
            {
                Ok(result) => {
                    print_transform_summary(&result);
                    if result.has_errors() {
                        std::process::exit(1);
                    }
                }
                Err(e) => {
                    error!("Transform run failed: {}", e);
                    println!("❌ Transform run failed: {}", e);
                    std::process::exit(1);
                }
            }
        }
        Commands::Load { period, tables } => {
            match &period {
                Some(p) => println!("📦 Loading period {} into the warehouse...", p),
                None => println!("📦 Reloading every period on record..."),
            }
            let ctx = build_context(config)?;
            let params = LoadParams {
                period,
                tables: parse_tables(tables),
            };
            match tasks::load_run(
                ctx.store.clone(),
                ctx.warehouse.clone(),
                &ctx.registry,
                &ctx.config,
                params,
            )
            .await
            {
                Ok(result) => {
                    print_load_summary(&result);
                    if result.has_errors() {
                        std::process::exit(1);
                    }
                }
                Err(e) => {
                    error!("Load run failed: {}", e);
                    println!("❌ Load run failed: {}", e);
                    std::process::exit(1);
                }
            }
        }
        Commands::Run { period, tables } => {
            println!("🚀 Running transform + load for period {}...", period);
            let ctx = build_context(config)?;
            let params = RunParams {
                period,
                tables: parse_tables(tables),
            };
            match tasks::run_all(
                ctx.store.clone(),
                ctx.warehouse.clone(),
                &ctx.registry,
                &ctx.config,
                params,
            )
            .await
            {
                Ok(report) => {
                    print_transform_summary(&report.transform);
                    print_load_summary(&report.load);
                    if report.has_errors() {
                        std::process::exit(1);
                    } else {
                        println!("\n✅ Full pipeline completed successfully!");
                    }
                }
                Err(e) => {
                    error!("Pipeline run failed: {}", e);
                    println!("❌ Pipeline run failed: {}", e);
                    std::process::exit(1);
                }
            }
        }
        Commands::Serve { port } => {
            let port = port.unwrap_or(config.server.port);
            let ctx = build_context(config)?;
            server::start_server(ctx, port).await?;
        }
    }
    Ok(())
}
