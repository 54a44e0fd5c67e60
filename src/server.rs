use crate::config::Config;
use crate::constants;
use crate::domain::Period;
use crate::pipeline::tasks::{self, LoadParams, RunParams, TransformParams};
use crate::registry::TableRegistry;
use crate::storage::ObjectStore;
use crate::warehouse::Warehouse;
use axum::{
    http::{Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Json as AxumJson, Router,
};
use hyper::Server;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};

/// Shared handles the task endpoints run against.
pub struct ServerContext {
    pub store: Arc<dyn ObjectStore>,
    pub warehouse: Arc<dyn Warehouse>,
    pub registry: Arc<TableRegistry>,
    pub config: Config,
}

/// Request body shared by the task endpoints. Everything is optional so
/// period validation can answer with a clean 400 instead of a 422.
#[derive(Debug, Default, Deserialize)]
struct PeriodRequest {
    period: Option<String>,
    tables: Option<Vec<String>>,
}

/// Health check endpoint
async fn health() -> impl IntoResponse {
    crate::observability::heartbeat();
    Json(serde_json::json!({
        "status": "healthy",
        "service": constants::SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Prometheus scrape endpoint
async fn metrics() -> impl IntoResponse {
    match crate::observability::metrics::get_metrics_handle() {
        Some(body) => (StatusCode::OK, body).into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "metrics recorder not installed",
        )
            .into_response(),
    }
}

fn missing_period() -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({"error": "period is required (yyyymm)"})),
    )
        .into_response()
}

fn malformed_period() -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({"error": "period must be yyyymm"})),
    )
        .into_response()
}

/// 200 when every table landed, 207 when some tables errored.
fn run_status(has_errors: bool) -> StatusCode {
    if has_errors {
        StatusCode::MULTI_STATUS
    } else {
        StatusCode::OK
    }
}

fn require_period(raw: Option<String>) -> Option<String> {
    match raw {
        Some(p) if Period::parse(&p).is_ok() => Some(p),
        _ => None,
    }
}

/// Create the HTTP server with all routes
pub fn create_server(ctx: Arc<ServerContext>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route(
            "/transform",
            post({
                let ctx = ctx.clone();
                move |body: Option<AxumJson<PeriodRequest>>| {
                    let ctx = ctx.clone();
                    async move {
                        let req = body.map(|AxumJson(r)| r).unwrap_or_default();
                        let period = match require_period(req.period) {
                            Some(p) => p,
                            None => return missing_period(),
                        };
                        let params = TransformParams {
                            period,
                            tables: req.tables,
                        };
                        match tasks::transform_run(
                            ctx.store.clone(),
                            &ctx.registry,
                            &ctx.config,
                            params,
                        )
                        .await
                        {
                            Ok(res) => {
                                (run_status(res.has_errors()), AxumJson(res)).into_response()
                            }
                            Err(e) => {
                                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
                            }
                        }
                    }
                }
            }),
        )
        .route(
            "/load",
            post({
                let ctx = ctx.clone();
                move |body: Option<AxumJson<PeriodRequest>>| {
                    let ctx = ctx.clone();
                    async move {
                        let req = body.map(|AxumJson(r)| r).unwrap_or_default();
                        if let Some(p) = &req.period {
                            if Period::parse(p).is_err() {
                                return malformed_period();
                            }
                        }
                        let params = LoadParams {
                            period: req.period,
                            tables: req.tables,
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
                            Ok(res) => {
                                (run_status(res.has_errors()), AxumJson(res)).into_response()
                            }
                            Err(e) => {
                                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
                            }
                        }
                    }
                }
            }),
        )
        .route(
            "/run",
            post({
                let ctx = ctx.clone();
                move |body: Option<AxumJson<PeriodRequest>>| {
                    let ctx = ctx.clone();
                    async move {
                        let req = body.map(|AxumJson(r)| r).unwrap_or_default();
                        let period = match require_period(req.period) {
                            Some(p) => p,
                            None => return missing_period(),
                        };
                        let params = RunParams {
                            period,
                            tables: req.tables,
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
                            Ok(res) => {
                                (run_status(res.has_errors()), AxumJson(res)).into_response()
                            }
                            Err(e) => {
                                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
                            }
                        }
                    }
                }
            }),
        )
        .layer(ServiceBuilder::new().layer(cors))
}

/// Start the HTTP server on the specified port
pub async fn start_server(
    ctx: Arc<ServerContext>,
    port: u16,
) -> Result<(), Box<dyn std::error::Error>> {
    let app = create_server(ctx);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    println!("🚀 HTTP server running on http://localhost:{port}");
    println!("💚 Health check: http://localhost:{port}/health");
    println!("📊 Metrics:      http://localhost:{port}/metrics");

    Server::bind(&addr).serve(app.into_make_service()).await?;

    Ok(())
}
