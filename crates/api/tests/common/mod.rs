#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use quicksync_core::entity::{EntityState, StoredEntity};
use quicksync_core::profile::ProfileRegistry;
use quicksync_db::MemoryStore;
use quicksync_pipeline::{MigrationPipeline, PipelineConfig};
use serde_json::{json, Value};
use tower::ServiceExt;

use quicksync_api::config::ServerConfig;
use quicksync_api::router::build_app_router;
use quicksync_api::state::AppState;

pub const TENANT: &str = "venue-1";
pub const BOUNDARY: &str = "quicksync-test-boundary";

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 30,
        max_upload_bytes: 1024 * 1024,
        execute_lock_timeout_secs: 5,
        mapping_profiles_path: None,
        database_url: None,
    }
}

/// The full application router over the in-memory store, plus a handle on
/// the store for seeding and inspection.
pub struct TestApp {
    pub router: Router,
    pub store: Arc<MemoryStore>,
}

pub fn build_test_app() -> TestApp {
    let config = test_config();
    let store = Arc::new(MemoryStore::new());
    let pipeline = MigrationPipeline::new(
        ProfileRegistry::builtin(),
        store.clone(),
        PipelineConfig {
            lock_timeout: std::time::Duration::from_secs(config.execute_lock_timeout_secs),
        },
    );
    let state = AppState {
        pipeline: Arc::new(pipeline),
        config: Arc::new(config.clone()),
    };

    TestApp {
        router: build_app_router(state, &config),
        store,
    }
}

impl TestApp {
    /// Send a request through a clone of the router and return status and JSON body.
    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&bytes).into_owned())
            })
        };
        (status, json)
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .uri(uri)
            .header("x-tenant-id", TENANT)
            .body(Body::empty())
            .unwrap();
        self.send(request).await
    }

    pub async fn post_json(&self, uri: &str, body: &Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("x-tenant-id", TENANT)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(request).await
    }

    /// Upload `file` for preview as `source`.
    pub async fn preview(&self, source: &str, filename: &str, file: &[u8]) -> (StatusCode, Value) {
        let body = multipart_body(&[("source", None, source.as_bytes()), ("file", Some(filename), file)]);
        self.send(preview_request(TENANT, body)).await
    }

    /// Preview then execute with no decisions; returns the execute response.
    pub async fn import(&self, file: &[u8]) -> Value {
        let (status, preview) = self.preview("marketman", "items.csv", file).await;
        assert_eq!(status, StatusCode::OK, "preview failed: {preview}");
        let (status, executed) = self.post_json("/api/v1/migrations/execute", &execute_body(&preview, json!({}))).await;
        assert_eq!(status, StatusCode::OK, "execute failed: {executed}");
        executed
    }
}

pub fn preview_request(tenant: &str, body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/v1/migrations/preview")
        .header("x-tenant-id", tenant)
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

/// Encode `(name, filename, data)` parts as `multipart/form-data`.
pub fn multipart_body(parts: &[(&str, Option<&str>, &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, filename, data) in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match filename {
            Some(filename) => body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\n\
                     Content-Type: application/octet-stream\r\n\r\n"
                )
                .as_bytes(),
            ),
            None => body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
            ),
        }
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

/// Execute payload for a preview response, sending its entries back.
pub fn execute_body(preview: &Value, decisions: Value) -> Value {
    json!({
        "run_id": preview["run_id"],
        "source": preview["source"],
        "mode": "migrate",
        "data": preview["details"],
        "options": { "decisions": decisions },
        "filename": preview["filename"],
    })
}

/// MarketMan export with one row per `(index, price)`.
pub fn items_csv(rows: impl IntoIterator<Item = (usize, f64)>) -> Vec<u8> {
    let mut out = String::from("SKU,Item Name,Unit Price,Unit\n");
    for (i, price) in rows {
        out.push_str(&format!("SKU-{i},Item {i},{price:.2},kg\n"));
    }
    out.into_bytes()
}

pub fn stored_item(i: usize, price: f64, state: EntityState) -> StoredEntity {
    StoredEntity {
        id: uuid::Uuid::now_v7(),
        external_id: format!("SKU-{i}"),
        state,
        fields: json!({"sku": format!("SKU-{i}"), "name": format!("Item {i}"), "price": price, "unit": "kg"})
            .as_object()
            .cloned()
            .unwrap(),
        revision: 1,
        last_run_id: None,
        updated_at: chrono::Utc::now(),
    }
}
