//! Router tests driven through `tower::ServiceExt::oneshot`.

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use dataset_reader::{
    CacheSettings, DatasetOpener, DatasetService, FilesystemTable, MetadataCache, ReaderConfig, Resolver,
};
use multidim_api::state::AppState;
use storage::{FilesystemKind, MemoryCache};
use test_utils::fixtures::{self, CLIMATE_VARIABLES};
use test_utils::StoreFixture;

async fn router(fixture: &StoreFixture, prefix: &str) -> Router {
    let store = fixture.in_memory(prefix).await.unwrap();
    let table = Arc::new(FilesystemTable::new());
    table
        .register_default(FilesystemKind::ObjectStore, "bucket", store)
        .await
        .unwrap();

    let config = ReaderConfig::default();
    let cache = MetadataCache::new(Some(Arc::new(MemoryCache::new(16))), CacheSettings::from(&config));
    let service = DatasetService::with_parts(
        Resolver::new(table),
        Arc::new(DatasetOpener::new(config.consolidated)),
        cache,
        config,
    );
    multidim_api::app(Arc::new(AppState::new(service)))
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

#[tokio::test]
async fn test_health() {
    let app = router(&fixtures::constant(1.0), "flat.zarr").await;
    let (status, body) = get(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "ok"}));
}

#[tokio::test]
async fn test_variables_and_info() {
    let app = router(&fixtures::consolidated_v2(), "data.zarr").await;

    let (status, body) = get(&app, "/variables?url=store://bucket/data.zarr").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!(CLIMATE_VARIABLES));

    let (status, body) = get(&app, "/info?url=store://bucket/data.zarr").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["zarr_format"], 2);
    assert_eq!(body["engine"], "zarr");
    assert_eq!(body["consolidated"], true);
    assert_eq!(body["crs"], "EPSG:4326");
    assert_eq!(body["arrays"]["CDD0"]["shape"], json!([10, 36, 72]));

    let (_, ready) = get(&app, "/ready").await;
    assert_eq!(ready["stats"]["computes"], 1);
    assert_eq!(ready["stats"]["hits"], 1);
}

#[tokio::test]
async fn test_histogram_constant() {
    let app = router(&fixtures::constant(3.0), "flat.zarr").await;
    let (status, body) = get(&app, "/histogram?url=store://bucket/flat.zarr&variable=flat").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([{"bucket": [3.0, 3.0], "value": 36}]));
}

#[tokio::test]
async fn test_histogram_bins_and_selection() {
    let app = router(&fixtures::consolidated_v2(), "data.zarr").await;

    let (status, body) = get(
        &app,
        "/histogram?url=store://bucket/data.zarr&variable=GWETPROF&bins=4&sel=time%3D2",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([{"bucket": [0.5, 0.5], "value": 36 * 72}]));

    let (status, body) = get(
        &app,
        "/histogram?url=store://bucket/data.zarr&variable=DISPH&bins=5&sel=time%3D0",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let buckets = body.as_array().unwrap();
    assert_eq!(buckets.len(), 5);
    let total: u64 = buckets.iter().map(|b| b["value"].as_u64().unwrap()).sum();
    assert_eq!(total, 36 * 72);

    let (status, body) = get(
        &app,
        "/histogram?url=store://bucket/data.zarr&variable=DISPH&sel=time%3D99",
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].as_str().unwrap().contains("out of range"));
}

#[tokio::test]
async fn test_histogram_requires_variable() {
    let app = router(&fixtures::constant(1.0), "flat.zarr").await;
    let (status, body) = get(&app, "/histogram?url=store://bucket/flat.zarr").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].as_str().unwrap().contains("variable"));
}

#[tokio::test]
async fn test_error_statuses() {
    let app = router(&fixtures::consolidated_v2(), "data.zarr").await;

    let (status, body) = get(&app, "/variables").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].as_str().unwrap().contains("url"));

    let (status, _) = get(&app, "/variables?url=ftp://host/data.zarr").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = get(&app, "/histogram?url=store://bucket/data.zarr&variable=nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["detail"].as_str().unwrap().contains("nope"));

    let (status, _) = get(&app, "/info?url=store://bucket/data.zarr&group=missing").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = get(&app, "/info?url=store://bucket/data.zarr&bins=ten").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_ready_reports_cache() {
    let app = router(&fixtures::constant(1.0), "flat.zarr").await;
    let (status, body) = get(&app, "/ready").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ready"], true);
    assert_eq!(body["cache"], "ok");
    assert_eq!(body["backend"], "memory");
    assert_eq!(body["breaker"], "closed");
}

#[tokio::test]
async fn test_metrics_without_recorder() {
    let app = router(&fixtures::constant(1.0), "flat.zarr").await;
    let (status, body) = get(&app, "/metrics").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["detail"].is_string());
}
