//! API tests against the in-process router.

mod common;

use axum::http::StatusCode;
use common::{fixtures, TestFixture};
use serde_json::json;

const START: &str = "2024-12-21T01:01:00";
const PASS_ID: &str = "terra_202412210101";

#[tokio::test]
async fn test_health_at_root_and_api() {
    let fixture = TestFixture::new().await;

    let response = fixture.get("/health").await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["status"], "ok");

    let response = fixture.get("/api/v1/health").await;
    assert_status!(response, StatusCode::OK);
}

#[tokio::test]
async fn test_config_exposes_pipelines() {
    let fixture = TestFixture::new().await;

    let response = fixture.get("/api/v1/config").await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["pipelines"]["terra"]["stages"][0]["name"], "decode");
    assert_eq!(response.body["orchestrator"]["max_concurrent_stages"], 2);
}

#[tokio::test]
async fn test_trigger_creates_pass() {
    let fixture = TestFixture::new().await;

    let response = fixture.trigger_terra(START, fixtures::TERRA_FILE).await;
    assert_status!(response, StatusCode::ACCEPTED);
    assert_eq!(response.body["accepted"], true);

    let body = fixture.wait_for_passes(1).await;
    let pass = &body["passes"][0];
    assert_eq!(pass["id"], PASS_ID);
    assert_eq!(pass["platform"], "terra");
    assert_eq!(pass["ready"], true);
    assert_eq!(pass["current_stage"], "decode");

    let response = fixture.get(&format!("/api/v1/passes/{}", PASS_ID)).await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["status"]["status"], "active");
    assert_eq!(response.body["stages"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_repeated_trigger_merges() {
    let fixture = TestFixture::new().await;

    fixture.trigger_terra(START, fixtures::TERRA_FILE).await;
    fixture.trigger_terra(START, fixtures::TERRA_FILE).await;
    fixture.wait_for_audit("event_type=pass_merged", 1).await;

    let body = fixture.wait_for_passes(1).await;
    assert_eq!(body["passes"][0]["events_merged"], 2);
}

#[tokio::test]
async fn test_invalid_trigger_is_accepted_but_ignored() {
    let fixture = TestFixture::new().await;

    let response = fixture
        .post(
            "/api/v1/triggers",
            json!({
                "topic": "/XLBANDANTENNA/TERRA/ISP",
                "type": "file",
                "data": { "platform_name": "NOAA-20", "start_time": START, "uri": "/data/x" }
            }),
        )
        .await;
    assert_status!(response, StatusCode::ACCEPTED);

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let response = fixture.get("/api/v1/passes").await;
    assert_eq!(response.body["total"], 0);
}

#[tokio::test]
async fn test_malformed_trigger_rejected() {
    let fixture = TestFixture::new().await;

    let response = fixture
        .post("/api/v1/triggers", json!({ "topic": "/EOS" }))
        .await;
    assert!(response.status.is_client_error());
}

#[tokio::test]
async fn test_unknown_pass_is_404() {
    let fixture = TestFixture::new().await;

    let response = fixture.get("/api/v1/passes/terra_209901010000").await;
    assert_status!(response, StatusCode::NOT_FOUND);
    assert!(response.body["error"].as_str().unwrap().contains("not found"));

    let response = fixture
        .post_empty("/api/v1/passes/terra_209901010000/abort")
        .await;
    assert_status!(response, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_abort_pass() {
    let fixture = TestFixture::new().await;
    fixture.trigger_terra(START, fixtures::TERRA_FILE).await;
    fixture.wait_for_passes(1).await;

    let response = fixture
        .post(
            &format!("/api/v1/passes/{}/abort", PASS_ID),
            json!({ "reason": "antenna maintenance" }),
        )
        .await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["pass_id"], PASS_ID);
    assert_eq!(response.body["status"]["status"], "aborted");
    assert_eq!(response.body["status"]["reason"], "antenna maintenance");
    assert!(response.body["stages"]
        .as_array()
        .unwrap()
        .iter()
        .all(|s| s["state"]["state"] == "skipped"));

    // Finished passes leave the live set
    let response = fixture.get(&format!("/api/v1/passes/{}", PASS_ID)).await;
    assert_status!(response, StatusCode::NOT_FOUND);

    let body = fixture
        .wait_for_audit(&format!("event_type=pass_aborted&pass_id={}", PASS_ID), 1)
        .await;
    assert_eq!(body["events"][0]["data"]["reason"], "antenna maintenance");
}

#[tokio::test]
async fn test_abort_without_body_uses_default_reason() {
    let fixture = TestFixture::new().await;
    fixture.trigger_terra(START, fixtures::TERRA_FILE).await;
    fixture.wait_for_passes(1).await;

    let response = fixture
        .post_empty(&format!("/api/v1/passes/{}/abort", PASS_ID))
        .await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["status"]["reason"], "aborted by operator");
}

#[tokio::test]
async fn test_orchestrator_runs_triggered_pass() {
    let fixture = TestFixture::with_orchestrator().await;

    fixture.trigger_terra(START, fixtures::TERRA_FILE).await;
    let body = fixture
        .wait_for_audit(&format!("event_type=pass_completed&pass_id={}", PASS_ID), 1)
        .await;
    assert_eq!(body["events"][0]["data"]["stages_run"], 3);

    let body = fixture.wait_for_audit("event_type=stage_succeeded", 3).await;
    assert_eq!(body["total"], 3);
    assert_eq!(fixture.runner.run_count().await, 3);

    let response = fixture.get("/api/v1/orchestrator/status").await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["running"], true);
    assert_eq!(response.body["reports_sent"], 1);

    fixture.orchestrator.stop().await;
}

#[tokio::test]
async fn test_orchestrator_status_when_stopped() {
    let fixture = TestFixture::new().await;

    let response = fixture.get("/api/v1/orchestrator/status").await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["running"], false);
    assert_eq!(response.body["live_passes"], 0);
    assert_eq!(response.body["in_flight"], 0);
}

#[tokio::test]
async fn test_audit_pagination() {
    let fixture = TestFixture::new().await;
    fixture.trigger_terra(START, fixtures::TERRA_FILE).await;
    fixture
        .trigger_terra("2024-12-21T03:00:00", "P0420064AAAAAAAAAAAAAA24356030000001.PDS")
        .await;
    fixture.wait_for_audit("event_type=pass_created", 2).await;

    let response = fixture
        .get("/api/v1/audit?event_type=pass_created&limit=1&offset=1")
        .await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["total"], 2);
    assert_eq!(response.body["limit"], 1);
    assert_eq!(response.body["offset"], 1);
    assert_eq!(response.body["events"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let fixture = TestFixture::new().await;
    fixture.trigger_terra(START, fixtures::TERRA_FILE).await;
    fixture.wait_for_passes(1).await;

    let (status, text) = fixture.get_text("/metrics").await;
    assert_eq!(status, StatusCode::OK);
    assert!(text.contains("modis_runner_http_requests_total"));
    assert!(text.contains("modis_runner_passes_by_stage"));
    assert!(text.contains("modis_runner_orchestrator_running"));
}

#[tokio::test]
async fn test_pass_history_outlives_the_pass() {
    let fixture = TestFixture::new().await;
    fixture.trigger_terra(START, fixtures::TERRA_FILE).await;
    fixture.wait_for_passes(1).await;
    fixture
        .post_empty(&format!("/api/v1/passes/{}/abort", PASS_ID))
        .await;
    fixture
        .wait_for_audit("event_type=pass_created,pass_aborted", 2)
        .await;

    let response = fixture
        .get(&format!("/api/v1/passes/{}/history", PASS_ID))
        .await;
    assert_status!(response, StatusCode::OK);
    let types: Vec<&str> = response.body["events"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["event_type"].as_str().unwrap())
        .collect();
    assert_eq!(types, vec!["pass_created", "pass_aborted"]);

    let response = fixture.get("/api/v1/passes/aqua_209901010000/history").await;
    assert_status!(response, StatusCode::NOT_FOUND);
}
