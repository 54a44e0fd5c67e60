use anyhow::Result;
use granary::config::{Config, PipelineConfig, ServerConfig, StorageConfig, WarehouseConfig};
use granary::pipeline::tasks::{self, LoadParams, TransformParams};
use granary::registry::TableRegistry;
use granary::storage::{FsObjectStore, ObjectStore};
use granary::warehouse::{SqliteWarehouse, Warehouse};
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;

fn test_config(data_root: &Path, db_path: &Path) -> Config {
    Config {
        storage: StorageConfig {
            data_root: data_root.to_str().unwrap().to_string(),
            registry_dir: "registry".to_string(),
        },
        warehouse: WarehouseConfig {
            db_path: db_path.to_str().unwrap().to_string(),
        },
        pipeline: PipelineConfig::default(),
        server: ServerConfig::default(),
    }
}

#[test]
fn shipped_registry_loads_and_validates() {
    let registry = TableRegistry::load(Path::new("registry")).unwrap();
    assert_eq!(registry.len(), 10);

    let profit_plan = registry.get("profit_plan_term").unwrap();
    assert_eq!(profit_plan.sheet.as_deref(), Some("東京支店目標103期"));
    assert!(profit_plan.range_delete);

    let construction = registry.get("construction_progress_days_amount").unwrap();
    assert_eq!(construction.unique_keys().unwrap().len(), 6);

    let stocks = registry.get("stocks").unwrap();
    assert!(stocks.partition_first);
    assert!(stocks.is_cumulative());

    assert_eq!(
        registry.monetary_rules_for("internal_interest").len(),
        1
    );
    assert_eq!(
        registry.zero_date_columns("construction_progress_days_amount"),
        &[
            "contract_date".to_string(),
            "scheduled_completion_date".to_string()
        ]
    );
}

#[tokio::test]
async fn transform_and_load_one_period_end_to_end() -> Result<()> {
    let dir = tempdir()?;
    let data_root = dir.path().join("data");
    let db_path = dir.path().join("warehouse.db");
    let config = test_config(&data_root, &db_path);

    let registry = TableRegistry::load(Path::new("registry"))?;
    let store: Arc<dyn ObjectStore> = Arc::new(FsObjectStore::new(&data_root));
    let warehouse: Arc<dyn Warehouse> = Arc::new(SqliteWarehouse::open(&db_path)?);

    // Kanji year-month dates plus a thousand-yen row the scale rule converts
    let raw = "年月,支店,区分,単位,金額\n\
               2025年2月,東京,営業部,千円,1500\n\
               2025年2月,大阪,営業部,円,2000\n";
    store.put("raw/202502/7.csv", raw.as_bytes()).await?;

    let transform = tasks::transform_run(
        store.clone(),
        &registry,
        &config,
        TransformParams {
            period: "202502".to_string(),
            tables: Some(vec!["internal_interest".to_string()]),
        },
    )
    .await
    .unwrap();
    assert_eq!(transform.success.len(), 1);
    assert_eq!(transform.errors.len(), 0);
    assert_eq!(transform.success[0].rows_out, 2);

    let artifact = store.get("normalized/202502/internal_interest.csv").await?;
    let text = String::from_utf8(artifact)?;
    assert!(text.starts_with("year_month,branch,category,unit,amount\n"));
    assert!(text.contains("2025-02-01,東京,営業部,千円,1500000"));
    assert!(text.contains("2025-02-01,大阪,営業部,円,2000"));

    let load = tasks::load_run(
        store.clone(),
        warehouse.clone(),
        &registry,
        &config,
        LoadParams {
            period: Some("202502".to_string()),
            tables: Some(vec!["internal_interest".to_string()]),
        },
    )
    .await
    .unwrap();
    assert_eq!(load.success.len(), 1);
    assert_eq!(load.success[0].rows_loaded, 2);
    assert_eq!(warehouse.row_count("internal_interest").await?, 2);

    // Replaying the load replaces the partition instead of doubling it
    tasks::load_run(
        store.clone(),
        warehouse.clone(),
        &registry,
        &config,
        LoadParams {
            period: Some("202502".to_string()),
            tables: Some(vec!["internal_interest".to_string()]),
        },
    )
    .await
    .unwrap();
    assert_eq!(warehouse.row_count("internal_interest").await?, 2);

    let conn = rusqlite::Connection::open(&db_path)?;
    let amount: String = conn.query_row(
        "SELECT \"amount\" FROM \"internal_interest\" WHERE \"branch\" = '東京'",
        [],
        |row| row.get(0),
    )?;
    assert_eq!(amount, "1500000");

    Ok(())
}

#[tokio::test]
async fn full_reload_merges_cumulative_history_latest_wins() -> Result<()> {
    let dir = tempdir()?;
    let data_root = dir.path().join("data");
    let db_path = dir.path().join("warehouse.db");
    let config = test_config(&data_root, &db_path);

    let registry = TableRegistry::load(Path::new("registry"))?;
    let store: Arc<dyn ObjectStore> = Arc::new(FsObjectStore::new(&data_root));
    let warehouse: Arc<dyn Warehouse> = Arc::new(SqliteWarehouse::open(&db_path)?);

    // The February delivery restates September's balance and adds November
    let january = "sales_month,branch_code,branch_name,billing_amount,deposit_amount,billing_balance\n\
                   2024-09-01,001,東京,200000,100000,100000\n\
                   2024-10-01,001,東京,150000,60000,90000\n";
    let february = "sales_month,branch_code,branch_name,billing_amount,deposit_amount,billing_balance\n\
                    2024-09-01,001,東京,200000,120000,80000\n\
                    2024-11-01,001,東京,90000,20000,70000\n";
    store
        .put("normalized/202501/billing_balance.csv", january.as_bytes())
        .await?;
    store
        .put("normalized/202502/billing_balance.csv", february.as_bytes())
        .await?;

    let load = tasks::load_run(
        store.clone(),
        warehouse.clone(),
        &registry,
        &config,
        LoadParams {
            period: None,
            tables: Some(vec!["billing_balance".to_string()]),
        },
    )
    .await
    .unwrap();

    assert_eq!(load.periods, vec!["202501", "202502"]);
    assert_eq!(load.success.len(), 1);
    assert_eq!(load.success[0].period_range, "202501-202502");
    assert_eq!(warehouse.row_count("billing_balance").await?, 3);

    // No business-key duplicates survive the merge
    let duplicates = warehouse
        .duplicate_keys(
            "billing_balance",
            &[
                "sales_month".to_string(),
                "branch_code".to_string(),
                "branch_name".to_string(),
            ],
            10,
        )
        .await?;
    assert!(duplicates.is_empty());

    // The restated September row wins, and its origin period says why
    let conn = rusqlite::Connection::open(&db_path)?;
    let (balance, origin): (String, String) = conn.query_row(
        "SELECT \"billing_balance\", \"source_folder\" FROM \"billing_balance\" \
         WHERE \"sales_month\" = '2024-09-01'",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    assert_eq!(balance, "80000");
    assert_eq!(origin, "202502");

    Ok(())
}

#[tokio::test]
async fn transform_with_no_deliveries_skips_every_table() -> Result<()> {
    let dir = tempdir()?;
    let data_root = dir.path().join("data");
    let db_path = dir.path().join("warehouse.db");
    let config = test_config(&data_root, &db_path);

    let registry = TableRegistry::load(Path::new("registry"))?;
    let store: Arc<dyn ObjectStore> = Arc::new(FsObjectStore::new(&data_root));

    let result = tasks::transform_run(
        store,
        &registry,
        &config,
        TransformParams {
            period: "202503".to_string(),
            tables: None,
        },
    )
    .await
    .unwrap();

    assert_eq!(result.success.len(), 0);
    assert_eq!(result.errors.len(), 0);
    assert_eq!(result.skipped.len(), registry.len());
    assert!(!result.has_errors());

    Ok(())
}
