//! Common test utilities for API testing with mocks.
//!
//! [`TestFixture`] builds the full router around an in-memory tracker, a
//! scripted stage runner and a running trigger listener, so requests go
//! through the same intake path as in production without spawning
//! external programs.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::sync::{broadcast, mpsc};
use tower::ServiceExt;

use modis_runner_core::{
    create_audit_system, testing::MockStageRunner, AuditStore, Config, DatabaseConfig,
    LocatorConfig, OrchestratorConfig, PassOrchestrator, PassTracker, ServerConfig,
    SqliteAuditStore, TrackerConfig, TriggerListener,
};
use modis_runner_server::api::{create_router, WsBroadcaster};
use modis_runner_server::state::AppState;

/// Re-export fixtures for test convenience
pub use modis_runner_core::testing::fixtures;

/// In-process server with a mock stage runner.
pub struct TestFixture {
    pub router: Router,
    pub runner: Arc<MockStageRunner>,
    pub tracker: Arc<PassTracker>,
    pub orchestrator: PassOrchestrator,
    /// Keeps the listener running until the fixture is dropped.
    _shutdown_tx: broadcast::Sender<()>,
    /// Test database and working directories
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl TestFixture {
    /// Fixture whose orchestrator is not running; passes stay where intake left them.
    pub async fn new() -> Self {
        Self::build(false).await
    }

    /// Fixture whose orchestrator loop runs against the mock stage runner.
    pub async fn with_orchestrator() -> Self {
        Self::build(true).await
    }

    async fn build(start_orchestrator: bool) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");

        let config = Config {
            server: ServerConfig {
                host: std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST),
                port: 8080, // Not bound for in-process testing
            },
            database: DatabaseConfig {
                path: db_path.clone(),
            },
            orchestrator: OrchestratorConfig {
                tick_interval_ms: 20,
                ..OrchestratorConfig::default().with_work_root(temp_dir.path().join("work"))
            },
            pipelines: fixtures::pipelines(),
            ..Default::default()
        };

        let audit_store: Arc<dyn AuditStore> = Arc::new(
            SqliteAuditStore::new(&db_path).expect("Failed to create audit store"),
        );
        let (audit_handle, audit_writer) = create_audit_system(Arc::clone(&audit_store), 100);
        tokio::spawn(audit_writer.run());

        let tracker = Arc::new(PassTracker::new(
            TrackerConfig::default(),
            Arc::new(config.pipelines.clone()),
        ));
        let runner = Arc::new(MockStageRunner::new());
        let orchestrator = PassOrchestrator::new(
            config.orchestrator.clone(),
            LocatorConfig::default(),
            Arc::clone(&tracker),
            runner.clone(),
        )
        .with_audit(audit_handle.clone());
        if start_orchestrator {
            orchestrator.start().await;
        }

        let (shutdown_tx, _) = broadcast::channel(1);
        let (trigger_tx, trigger_rx) = mpsc::channel(16);
        let listener = TriggerListener::new(config.listener.clone(), Arc::clone(&tracker))
            .with_audit(audit_handle)
            .with_wake(orchestrator.wake_handle());
        tokio::spawn(listener.run(trigger_rx, shutdown_tx.subscribe()));

        let state = Arc::new(AppState::new(
            config,
            audit_store,
            Arc::clone(&tracker),
            orchestrator.clone(),
            trigger_tx,
            WsBroadcaster::default(),
        ));

        Self {
            router: create_router(state),
            runner,
            tracker,
            orchestrator,
            _shutdown_tx: shutdown_tx,
            temp_dir,
        }
    }

    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None).await
    }

    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.request("POST", path, Some(body)).await
    }

    /// POST without a body.
    pub async fn post_empty(&self, path: &str) -> TestResponse {
        self.request("POST", path, None).await
    }

    /// Raw text response, for non-JSON endpoints such as `/metrics`.
    pub async fn get_text(&self, path: &str) -> (StatusCode, String) {
        let request = Request::builder().uri(path).body(Body::empty()).unwrap();
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();
        (status, String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Posts a Terra trigger for `file_name` starting at `start_time`.
    pub async fn trigger_terra(&self, start_time: &str, file_name: &str) -> TestResponse {
        let dir = self.temp_dir.path().display().to_string();
        std::fs::write(self.temp_dir.path().join(file_name), b"packets")
            .expect("Failed to write raw file");
        self.post(
            "/api/v1/triggers",
            json!({
                "topic": "/XLBANDANTENNA/TERRA/ISP",
                "type": "file",
                "data": {
                    "platform_name": "EOS-Terra",
                    "start_time": start_time,
                    "sensor": "modis",
                    "uri": format!("file://{}/{}", dir, file_name),
                }
            }),
        )
        .await
    }

    /// Polls the pass list until it holds `expected` passes.
    pub async fn wait_for_passes(&self, expected: usize) -> Value {
        for _ in 0..200 {
            let response = self.get("/api/v1/passes").await;
            if response.body["total"] == expected {
                return response.body;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("pass list never reached {} entries", expected);
    }

    /// Polls the audit endpoint until `query` matches at least `expected` events.
    pub async fn wait_for_audit(&self, query: &str, expected: i64) -> Value {
        let path = format!("/api/v1/audit?{}", query);
        for _ in 0..200 {
            let response = self.get(&path).await;
            if response.body["total"].as_i64().unwrap_or(0) >= expected {
                return response.body;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("audit query '{}' never reached {} events", query, expected);
    }

    async fn request(&self, method: &str, path: &str, body: Option<Value>) -> TestResponse {
        let mut request_builder = Request::builder().method(method).uri(path);

        let body = if let Some(json_body) = body {
            request_builder = request_builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&json_body).unwrap())
        } else {
            Body::empty()
        };

        let response = self
            .router
            .clone()
            .oneshot(request_builder.body(body).unwrap())
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        let body: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };

        TestResponse { status, body }
    }
}

/// Helper to assert a response has expected status.
#[macro_export]
macro_rules! assert_status {
    ($response:expr, $status:expr) => {
        assert_eq!(
            $response.status, $status,
            "Expected status {:?}, got {:?}. Body: {}",
            $status,
            $response.status,
            serde_json::to_string_pretty(&$response.body).unwrap_or_default()
        );
    };
}
