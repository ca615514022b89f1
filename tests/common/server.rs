//! Mock service lifecycle management
//!
//! Each test gets its own listener on a random port and its own strike file.

use super::constants::*;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use queue_cleaner::config::{AppConfig, CliConfig, FileConfig};
use queue_cleaner::runner::CycleRunner;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::net::TcpListener;

/// A DELETE call received by the mock, with its query parameters
#[derive(Debug, Clone)]
pub struct RecordedDelete {
    pub id: i64,
    pub params: HashMap<String, String>,
}

#[derive(Default)]
struct MockState {
    queue: Vec<Value>,
    deletes: Vec<RecordedDelete>,
    commands: Vec<Value>,
    webhooks: Vec<Value>,
    pages_served: usize,
}

type Shared = Arc<Mutex<MockState>>;

/// Handle on the mock service state
#[derive(Clone)]
pub struct MockArr {
    state: Shared,
}

impl MockArr {
    pub fn deletes(&self) -> Vec<RecordedDelete> {
        self.state.lock().unwrap().deletes.clone()
    }

    pub fn commands(&self) -> Vec<Value> {
        self.state.lock().unwrap().commands.clone()
    }

    pub fn webhooks(&self) -> Vec<Value> {
        self.state.lock().unwrap().webhooks.clone()
    }

    pub fn pages_served(&self) -> usize {
        self.state.lock().unwrap().pages_served
    }

    pub fn set_queue(&self, queue: Vec<Value>) {
        self.state.lock().unwrap().queue = queue;
    }
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("X-Api-Key")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == API_KEY)
        .unwrap_or(false)
}

async fn get_queue(
    State(state): State<Shared>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let page: usize = params.get("page").and_then(|p| p.parse().ok()).unwrap_or(1);
    let page_size: usize = params
        .get("pageSize")
        .and_then(|p| p.parse().ok())
        .unwrap_or(10);

    let mut state = state.lock().unwrap();
    state.pages_served += 1;
    let total = state.queue.len();
    let records: Vec<Value> = state
        .queue
        .iter()
        .skip((page.max(1) - 1) * page_size)
        .take(page_size)
        .cloned()
        .collect();
    Json(json!({
        "page": page,
        "pageSize": page_size,
        "totalRecords": total,
        "records": records,
    }))
    .into_response()
}

async fn delete_item(
    State(state): State<Shared>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Query(params): Query<HashMap<String, String>>,
) -> StatusCode {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED;
    }
    let mut state = state.lock().unwrap();
    state.queue.retain(|r| r["id"].as_i64() != Some(id));
    state.deletes.push(RecordedDelete { id, params });
    StatusCode::OK
}

async fn post_command(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    state.lock().unwrap().commands.push(body);
    (StatusCode::CREATED, Json(json!({ "id": 1, "status": "queued" }))).into_response()
}

async fn post_webhook(State(state): State<Shared>, Json(body): Json<Value>) -> StatusCode {
    state.lock().unwrap().webhooks.push(body);
    StatusCode::NO_CONTENT
}

/// A stalled-looking Sonarr queue record: usenet, so reannounce never applies.
pub fn queue_record(id: i64, size_left: u64) -> Value {
    json!({
        "id": id,
        "downloadId": format!("SABNZBD_{}", id),
        "title": format!("Show.S01E{:02}.1080p", id),
        "size": ITEM_SIZE,
        "sizeleft": size_left,
        "status": "downloading",
        "trackedDownloadState": "downloading",
        "protocol": "usenet",
        "episodeId": 100 + id,
        "seriesId": SERIES_ID,
    })
}

/// Mock service plus a temp directory for the strike file
///
/// When dropped, the listener task is aborted and the temp directory removed.
pub struct TestEnv {
    /// Base URL of the mock, e.g. "http://127.0.0.1:12345"
    pub base_url: String,

    pub mock: MockArr,

    temp_dir: TempDir,
    server_task: tokio::task::JoinHandle<()>,
}

impl TestEnv {
    /// Binds a random port and serves `queue` until dropped.
    pub async fn spawn(queue: Vec<Value>) -> Self {
        let state: Shared = Arc::new(Mutex::new(MockState {
            queue,
            ..MockState::default()
        }));

        let app = Router::new()
            .route("/api/v3/queue", get(get_queue))
            .route("/api/v3/queue/{id}", delete(delete_item))
            .route("/api/v3/command", post(post_command))
            .route("/hook", post(post_webhook))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();

        let server_task = tokio::spawn(async move {
            axum::serve(listener, app).await.expect("Mock server failed");
        });

        Self {
            base_url: format!("http://127.0.0.1:{}", port),
            mock: MockArr { state },
            temp_dir: TempDir::new().expect("Failed to create temp dir"),
            server_task,
        }
    }

    pub fn strike_file(&self) -> PathBuf {
        self.temp_dir.path().join("strikes.json")
    }

    /// Configuration for one Sonarr service and one generic webhook, with
    /// `extra` TOML appended.
    pub fn config_toml(&self, extra: &str) -> String {
        format!(
            r#"
[general]
strike_file_path = "{strike_file}"
retry_attempts = 0

[services.{service}]
url = "{base}/api/v3"
api_key = "{key}"
auto_search = true

[[notifications.destinations]]
name = "hook"
type = "generic"
url = "{base}/hook"

{extra}
"#,
            strike_file = self.strike_file().display(),
            service = SERVICE_NAME,
            base = self.base_url,
            key = API_KEY,
            extra = extra,
        )
    }

    pub fn app_config(&self, extra: &str) -> AppConfig {
        let file = FileConfig::parse(&self.config_toml(extra)).expect("Invalid test config");
        AppConfig::resolve_with_env(&CliConfig::default(), Some(file), |_| None)
            .expect("Failed to resolve test config")
    }

    /// A runner wired with real HTTP clients, store and webhook transport.
    pub fn runner(&self, extra: &str) -> CycleRunner {
        CycleRunner::from_config(self.app_config(extra)).expect("Failed to build runner")
    }

    /// The strike document as written to disk, or `null` if never written.
    pub fn strike_document(&self) -> Value {
        match std::fs::read_to_string(self.strike_file()) {
            Ok(content) => serde_json::from_str(&content).expect("Strike file is not JSON"),
            Err(_) => Value::Null,
        }
    }

    pub fn write_strike_document(&self, document: &Value) {
        std::fs::write(
            self.strike_file(),
            serde_json::to_vec_pretty(document).unwrap(),
        )
        .expect("Failed to seed strike file");
    }
}

impl Drop for TestEnv {
    fn drop(&mut self) {
        self.server_task.abort();
    }
}
