//! Read-only query API over the table store, plus the admin ingest endpoint.

use crate::storage::QueryOptions;
use crate::tasks::{self, IngestParams, IngestResult, PipelineContext};
use axum::{
    extract::{Path, Query},
    http::{Method, StatusCode},
    response::{IntoResponse, Json},
    routing::{get, post},
    Extension, Router,
};
use chrono::Utc;
use hyper::Server;
use rust_decimal::prelude::ToPrimitive;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};

type ApiResult = Result<Json<Value>, (StatusCode, Json<Value>)>;

fn internal_error(detail: impl std::fmt::Display) -> (StatusCode, Json<Value>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": "internal_error", "detail": detail.to_string()})),
    )
}

fn bad_request(detail: &str) -> (StatusCode, Json<Value>) {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({"error": "bad_request", "detail": detail})),
    )
}

/// API welcome message with all endpoints
async fn root() -> Json<Value> {
    Json(json!({
        "message": "Renewable Energy Data API",
        "status": "running",
        "endpoints": {
            "GET /sites/:site_id": "Records for one site, optional date range and limit",
            "GET /sites/:site_id/anomalies": "Anomalies for one site",
            "GET /sites/:site_id/range": "Records for a required date range",
            "GET /anomalies": "Anomalies across all sites",
            "GET /summary": "Performance summary of all sites",
            "GET /health": "API health and store connectivity"
        }
    }))
}

/// Health check endpoint; unhealthy when either store probe fails
async fn health(Extension(ctx): Extension<Arc<PipelineContext>>) -> impl IntoResponse {
    let table_ok = ctx.table.live().await;
    let blob_ok = ctx.blob.live().await;

    match (&table_ok, &blob_ok) {
        (Ok(()), Ok(())) => (
            StatusCode::OK,
            Json(json!({
                "status": "healthy",
                "timestamp": Utc::now().to_rfc3339(),
                "services": {
                    "table_store": "connected",
                    "blob_store": "accessible",
                    "api": "running"
                },
                "version": env!("CARGO_PKG_VERSION")
            })),
        ),
        _ => {
            let detail = [table_ok.err(), blob_ok.err()]
                .into_iter()
                .flatten()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "timestamp": Utc::now().to_rfc3339(),
                    "error": detail,
                    "version": env!("CARGO_PKG_VERSION")
                })),
            )
        }
    }
}

#[derive(Debug, Deserialize)]
struct SiteQuery {
    limit: Option<usize>,
    start_date: Option<String>,
    end_date: Option<String>,
}

/// Get data for a specific site with optional time filtering
async fn get_site_data(
    Path(site_id): Path<String>,
    Query(params): Query<SiteQuery>,
    Extension(ctx): Extension<Arc<PipelineContext>>,
) -> ApiResult {
    let opts = QueryOptions {
        start_date: params.start_date.clone(),
        end_date: params.end_date.clone(),
        limit: Some(params.limit.unwrap_or(50)),
        newest_first: true,
        ..QueryOptions::default()
    };
    let records = ctx
        .table
        .query_site(&site_id, &opts)
        .await
        .map_err(internal_error)?;

    let total = records.len();
    let anomaly_count = records.iter().filter(|r| r.anomaly).count();
    let avg = |sum: f64| if total > 0 { (sum / total as f64 * 100.0).round() / 100.0 } else { 0.0 };
    let avg_generation = avg(records
        .iter()
        .map(|r| r.energy_generated_kwh.to_f64().unwrap_or(0.0))
        .sum());
    let avg_consumption = avg(records
        .iter()
        .map(|r| r.energy_consumed_kwh.to_f64().unwrap_or(0.0))
        .sum());

    Ok(Json(json!({
        "site_id": site_id,
        "query_params": {
            "limit": params.limit.unwrap_or(50),
            "start_date": params.start_date,
            "end_date": params.end_date
        },
        "statistics": {
            "total_records": total,
            "anomaly_count": anomaly_count,
            "avg_generation_kwh": avg_generation,
            "avg_consumption_kwh": avg_consumption
        },
        "records": records
    })))
}

#[derive(Debug, Deserialize)]
struct LimitQuery {
    limit: Option<usize>,
}

/// Get all anomalies for a specific site
async fn get_site_anomalies(
    Path(site_id): Path<String>,
    Query(params): Query<LimitQuery>,
    Extension(ctx): Extension<Arc<PipelineContext>>,
) -> ApiResult {
    let anomalies = ctx
        .table
        .query_site(&site_id, &QueryOptions::anomalies(params.limit.unwrap_or(50)))
        .await
        .map_err(internal_error)?;

    let negative_generation = anomalies
        .iter()
        .filter(|r| r.energy_generated_kwh.to_f64().unwrap_or(0.0) < 0.0)
        .count();
    let negative_consumption = anomalies
        .iter()
        .filter(|r| r.energy_consumed_kwh.to_f64().unwrap_or(0.0) < 0.0)
        .count();

    Ok(Json(json!({
        "site_id": site_id,
        "anomaly_summary": {
            "total_anomalies": anomalies.len(),
            "negative_generation_count": negative_generation,
            "negative_consumption_count": negative_consumption
        },
        "anomalies": anomalies
    })))
}

/// Get site data for a specific time range (both bounds required)
async fn get_site_range(
    Path(site_id): Path<String>,
    Query(params): Query<SiteQuery>,
    Extension(ctx): Extension<Arc<PipelineContext>>,
) -> ApiResult {
    let (Some(start_date), Some(end_date)) = (params.start_date.clone(), params.end_date.clone())
    else {
        return Err(bad_request("start_date and end_date are required"));
    };

    let opts = QueryOptions {
        start_date: Some(start_date.clone()),
        end_date: Some(end_date.clone()),
        limit: Some(params.limit.unwrap_or(100)),
        // chronological order for a range view
        newest_first: false,
        ..QueryOptions::default()
    };
    let records = ctx
        .table
        .query_site(&site_id, &opts)
        .await
        .map_err(internal_error)?;

    Ok(Json(json!({
        "site_id": site_id,
        "time_range": {"start_date": start_date, "end_date": end_date},
        "record_count": records.len(),
        "records": records
    })))
}

/// Get anomalies across all sites, newest first
async fn get_all_anomalies(
    Query(params): Query<LimitQuery>,
    Extension(ctx): Extension<Arc<PipelineContext>>,
) -> ApiResult {
    let limit = params.limit.unwrap_or(100);
    let site_ids = ctx.table.site_ids().await.map_err(internal_error)?;

    let mut all_anomalies = Vec::new();
    for site_id in &site_ids {
        let per_site = (limit / site_ids.len().max(1)).max(1);
        let mut site_anomalies = ctx
            .table
            .query_site(site_id, &QueryOptions::anomalies(per_site))
            .await
            .map_err(internal_error)?;
        all_anomalies.append(&mut site_anomalies);
    }

    all_anomalies.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    all_anomalies.truncate(limit);

    let mut anomalies_by_site: BTreeMap<String, usize> = BTreeMap::new();
    for anomaly in &all_anomalies {
        *anomalies_by_site.entry(anomaly.site_id.clone()).or_insert(0) += 1;
    }

    Ok(Json(json!({
        "total_anomalies": all_anomalies.len(),
        "anomalies_by_site": anomalies_by_site,
        "anomalies": all_anomalies
    })))
}

/// Get comprehensive performance summary for all sites
async fn get_summary(Extension(ctx): Extension<Arc<PipelineContext>>) -> ApiResult {
    let stats = tasks::site_summaries(&ctx.table)
        .await
        .map_err(internal_error)?;

    let overall_rate = (stats.anomaly_rate() * 10.0).round() / 10.0;
    Ok(Json(json!({
        "summary_timestamp": Utc::now().to_rfc3339(),
        "overall_statistics": {
            "total_sites": stats.site_summaries.len(),
            "total_records": stats.total_records,
            "total_anomalies": stats.total_anomalies,
            "overall_anomaly_rate_percent": overall_rate
        },
        "site_summaries": stats.site_summaries
    })))
}

/// Admin task endpoint: ingest one uploaded object
async fn admin_ingest(
    Extension(ctx): Extension<Arc<PipelineContext>>,
    Json(params): Json<IngestParams>,
) -> Result<Json<IngestResult>, (StatusCode, Json<Value>)> {
    match tasks::ingest_object(&ctx, params).await {
        Ok(result) => Ok(Json(result)),
        Err(e) => Err(internal_error(e)),
    }
}

/// Create the HTTP server with all routes
pub fn create_server(ctx: Arc<PipelineContext>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/sites/:site_id", get(get_site_data))
        .route("/sites/:site_id/anomalies", get(get_site_anomalies))
        .route("/sites/:site_id/range", get(get_site_range))
        .route("/anomalies", get(get_all_anomalies))
        .route("/summary", get(get_summary))
        .route("/admin/ingest", post(admin_ingest))
        .layer(Extension(ctx))
        .layer(ServiceBuilder::new().layer(cors))
}

/// Start the HTTP server on the specified port
pub async fn start_server(
    ctx: Arc<PipelineContext>,
    port: u16,
) -> Result<(), Box<dyn std::error::Error>> {
    let app = create_server(ctx);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    println!("🚀 Energy API running on http://localhost:{port}");
    println!("💚 Health check: http://localhost:{port}/health");
    println!("📊 Summary:      http://localhost:{port}/summary");

    Server::bind(&addr).serve(app.into_make_service()).await?;

    Ok(())
}
