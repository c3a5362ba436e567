//! End-to-end HTTP tests against a mock camera API.
mod common;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use camwatch_agent::cache::{CachePolicy, CredentialRefresh, RemoteCache};
use camwatch_agent::exposition::CONTENT_TYPE;
use camwatch_agent::http::router;
use camwatch_agent::state::{AppState, DeviceInfoCache, TemperatureCache};
use camwatch_agent::vapix::{DeviceInfoFetch, FileCredentials, TemperatureFetch, VapixClient};
use common::{state_with, FakeSource};
use serde_json::Value;
use tempfile::TempDir;

const DEVICE_JSON: &str = r#"{"apiVersion":"1.0","data":{"propertyList":{
    "SerialNumber":"ACCC8E000001","Version":"11.8.61","ProdNbr":"M3086-V",
    "Architecture":"aarch64","Soc":"Ambarella CV25"}}}"#;

#[derive(Clone, Default)]
struct Camera {
    temperature_calls: Arc<AtomicUsize>,
    // number of leading temperature requests answered with 401
    reject_first: usize,
}

async fn temperature(State(cam): State<Camera>, headers: HeaderMap) -> Response {
    let n = cam.temperature_calls.fetch_add(1, Ordering::SeqCst);
    if n < cam.reject_first || !headers.contains_key(header::AUTHORIZATION) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    "46.71\n".into_response()
}

async fn device_info() -> Response {
    ([(header::CONTENT_TYPE, "application/json")], DEVICE_JSON).into_response()
}

async fn serve(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn mock_camera(cam: Camera) -> String {
    let app = Router::new()
        .route("/axis-cgi/temperaturecontrol.cgi", get(temperature))
        .route("/axis-cgi/basicdeviceinfo.cgi", post(device_info))
        .with_state(cam);
    format!("http://{}", serve(app).await)
}

fn credentials_file() -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vapix.json");
    std::fs::write(&path, r#"{"username":"camwatch","password":"s3cret"}"#).unwrap();
    (dir, path)
}

fn caches(base_url: &str, creds: PathBuf) -> (TemperatureCache, DeviceInfoCache) {
    let client = Arc::new(
        VapixClient::new(
            base_url,
            "camwatch",
            Duration::from_secs(2),
            Arc::new(FileCredentials { path: creds }),
        )
        .unwrap(),
    );
    let refresher: Arc<dyn CredentialRefresh> = client.clone();
    let policy = |ttl| CachePolicy {
        ttl: Duration::from_secs(ttl),
        fetch_timeout: Duration::from_secs(2),
    };
    (
        RemoteCache::new(
            "temperature",
            policy(60),
            Arc::new(TemperatureFetch(client.clone())),
            Some(refresher.clone()),
        ),
        RemoteCache::new(
            "device_info",
            policy(300),
            Arc::new(DeviceInfoFetch(client)),
            Some(refresher),
        ),
    )
}

async fn agent(state: AppState) -> String {
    format!("http://{}", serve(router(state)).await)
}

async fn agent_with_camera(cam: Camera) -> (String, TempDir) {
    let base = mock_camera(cam).await;
    let (dir, creds) = credentials_file();
    let (t, d) = caches(&base, creds);
    let url = agent(state_with(FakeSource::new(200), Some(t), Some(d))).await;
    (url, dir)
}

#[tokio::test]
async fn metrics_include_camera_values() {
    let (url, _dir) = agent_with_camera(Camera::default()).await;

    let resp = reqwest::get(format!("{url}/metrics")).await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers()[reqwest::header::CONTENT_TYPE].to_str().unwrap(),
        CONTENT_TYPE
    );
    let body = resp.text().await.unwrap();
    assert!(body.contains("camwatch_temperature_celsius 46.71\n"), "{body}");
    assert!(body.contains("camwatch_temperature_stale 0\n"));
    assert!(body.contains("serial=\"ACCC8E000001\""));
    assert!(body.contains("model=\"M3086-V\""));
    assert!(body.contains("# TYPE camwatch_network_tx_bytes_total counter\n"));
    assert!(body.contains("camwatch_source_up{source=\"temperature\"} 1\n"));
}

#[tokio::test]
async fn health_and_device_documents() {
    let (url, _dir) = agent_with_camera(Camera::default()).await;

    let health: Value = reqwest::get(format!("{url}/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["service"], "camwatch");
    let temp = health["checks"]
        .as_array()
        .unwrap()
        .iter()
        .find(|c| c["name"] == "temperature_celsius")
        .unwrap();
    assert_eq!(temp["status"], "ok");
    assert_eq!(temp["value"], 46.71);
    assert_eq!(health["dependencies"][0]["service"], "vapix");
    assert_eq!(health["dependencies"][0]["reachable"], true);

    let device: Value = reqwest::get(format!("{url}/device"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(device["device"]["serial_number"], "ACCC8E000001");
    assert_eq!(device["device"]["firmware_version"], "11.8.61");
    assert_eq!(device["stale"], false);
}

#[tokio::test]
async fn rejected_credentials_are_refreshed_once() {
    let cam = Camera {
        reject_first: 1,
        ..Default::default()
    };
    let calls = cam.temperature_calls.clone();
    let (url, _dir) = agent_with_camera(cam).await;

    let body = reqwest::get(format!("{url}/metrics"))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(body.contains("camwatch_temperature_celsius 46.71\n"));
    assert!(body.contains("camwatch_remote_fetches_total{source=\"temperature\"} 2\n"));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn unreachable_camera_degrades_without_failing_the_scrape() {
    let (_dir, creds) = credentials_file();
    // nothing listens on port 1
    let (t, d) = caches("http://127.0.0.1:1", creds);
    let url = agent(state_with(FakeSource::new(200), Some(t), Some(d))).await;

    let resp = reqwest::get(format!("{url}/metrics")).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body = resp.text().await.unwrap();
    assert!(!body.contains("camwatch_temperature_celsius "));
    assert!(body.contains("camwatch_source_up{source=\"temperature\"} 0\n"));
    assert!(body.contains("camwatch_memory_available_bytes"));

    let device = reqwest::get(format!("{url}/device")).await.unwrap();
    assert_eq!(device.status(), 503);

    let health: Value = reqwest::get(format!("{url}/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["dependencies"][0]["reachable"], false);
    let temp = health["checks"]
        .as_array()
        .unwrap()
        .iter()
        .find(|c| c["name"] == "temperature_celsius")
        .unwrap();
    assert_eq!(temp["status"], "unknown");
    assert_eq!(temp["value"], Value::Null);
}

#[tokio::test]
async fn routing_errors_and_request_counter() {
    let url = agent(state_with(FakeSource::new(200), None, None)).await;
    let client = reqwest::Client::new();

    let post = client.post(format!("{url}/metrics")).send().await.unwrap();
    assert_eq!(post.status(), 405);
    let missing = client.get(format!("{url}/nope")).send().await.unwrap();
    assert_eq!(missing.status(), 404);
    let disabled = client.get(format!("{url}/device")).send().await.unwrap();
    assert_eq!(disabled.status(), 503);

    let body = client
        .get(format!("{url}/metrics"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    // three earlier requests plus this scrape
    assert!(body.contains("camwatch_http_requests_total 4\n"), "{body}");
    assert!(!body.contains("source=\"temperature\""));
}

#[tokio::test]
async fn logs_endpoint_honours_limit() {
    let state = state_with(FakeSource::new(200), None, None);
    for i in 0..5 {
        state.logs.push(camwatch_agent::logbuf::LogEntry {
            timestamp: camwatch_agent::logbuf::now_rfc3339(),
            severity: "info",
            target: "test".into(),
            message: format!("event {i}"),
        });
    }
    let url = agent(state).await;

    let logs: Value = reqwest::get(format!("{url}/logs?limit=2"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(logs["count"], 2);
    assert_eq!(logs["logs"][1]["message"], "event 4");

    let all: Value = reqwest::get(format!("{url}/logs")).await.unwrap().json().await.unwrap();
    assert_eq!(all["count"], 5);
}

async fn digest_only() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(
            header::WWW_AUTHENTICATE,
            r#"Digest realm="AXIS_ACCC8E000001", nonce="00a1", qop="auth""#,
        )],
    )
        .into_response()
}

#[tokio::test]
async fn digest_only_camera_reports_unsupported_scheme() {
    let app = Router::new().route("/axis-cgi/temperaturecontrol.cgi", get(digest_only));
    let base = format!("http://{}", serve(app).await);
    let (_dir, creds) = credentials_file();
    let client = VapixClient::new(
        base,
        "camwatch",
        Duration::from_secs(2),
        Arc::new(FileCredentials { path: creds }),
    )
    .unwrap();

    match client.temperature().await {
        Err(camwatch_agent::error::FetchError::Auth(msg)) => {
            assert!(msg.contains("Digest"), "{msg}")
        }
        other => panic!("expected an auth failure, got {other:?}"),
    }
}
