//! Integration tests for songpoll-ui API endpoints
//!
//! Sheets come from in-memory sources and text generation is scripted, so
//! these run without network access.

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
};
use serde_json::{json, Value};
use songpoll_common::config::FeedbackConfig;
use songpoll_common::comparison::ComparisonOptions;
use songpoll_common::insights::{GenerationRequest, InsightSettings, ModelRole};
use songpoll_common::projection::{Capabilities, TasteProjector};
use songpoll_common::sheet::{SheetLayout, SheetTable};
use songpoll_ui::feedback::FeedbackSubmitter;
use songpoll_ui::llm::{DisabledGenerator, InsightService, LlmError, TextGenerator};
use songpoll_ui::service::DashboardService;
use songpoll_ui::source::{PartitionSource, SheetSource};
use songpoll_ui::{build_router, AppState};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::util::ServiceExt;

// =============================================================================
// Test Helpers
// =============================================================================

/// Sheet held in memory, counting how often it is fetched
struct MemorySheet {
    table: SheetTable,
    fetches: Arc<AtomicUsize>,
}

#[async_trait]
impl SheetSource for MemorySheet {
    async fn fetch(&self) -> songpoll_common::Result<SheetTable> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.table.clone())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

/// Answers by model role
struct ScriptedGenerator;

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, LlmError> {
        Ok(match request.role {
            ModelRole::Blurb => "Everyone loved B.".to_string(),
            ModelRole::Analysis => "You rate A higher than most.".to_string(),
            ModelRole::Json => {
                r#"[{"song": "Bicep", "artist": "", "reason": "Melodic electronics like your top picks."}]"#
                    .to_string()
            }
        })
    }
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

fn sheet_2024() -> SheetTable {
    SheetTable::new(
        strings(&["Timestamp", "Email address", "A", "B", "C"]),
        vec![
            strings(&["t1", "alice@x.com", "10", "9", ""]),
            strings(&["t2", "bob@x.com", "7", "", "6"]),
            strings(&["t3", "carol@x.com", "9", "9", "5"]),
        ],
    )
}

fn sheet_2019() -> SheetTable {
    SheetTable::new(
        strings(&["Song", "Artist", "dan", "erin"]),
        vec![strings(&["Hit", "Band", "9", "7"])],
    )
}

struct Harness {
    state: AppState,
    fetches: Arc<AtomicUsize>,
    _dir: TempDir,
    log_path: std::path::PathBuf,
}

fn harness(generator: Arc<dyn TextGenerator>) -> Harness {
    let fetches = Arc::new(AtomicUsize::new(0));
    let source = PartitionSource::new("Email address")
        .with_partition(
            2024,
            SheetLayout::Canonical,
            Arc::new(MemorySheet {
                table: sheet_2024(),
                fetches: fetches.clone(),
            }),
        )
        .with_partition(
            2019,
            SheetLayout::Legacy,
            Arc::new(MemorySheet {
                table: sheet_2019(),
                fetches: fetches.clone(),
            }),
        );

    let insights = InsightService::new(generator, InsightSettings::default());
    let insights_enabled = insights.is_enabled();
    let service = DashboardService::new(
        source,
        ComparisonOptions::default(),
        insights,
        Duration::from_secs(3600),
        10,
        2024,
    )
    .with_projector(TasteProjector::new(Capabilities::none(), "Email address"));

    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("feedback_log.txt");
    let feedback = FeedbackSubmitter::new(
        reqwest::Client::new(),
        &FeedbackConfig {
            webhook_url: None,
            log_path: log_path.clone(),
            timeout_seconds: 1,
        },
    );

    Harness {
        state: AppState::new(service, feedback, insights_enabled),
        fetches,
        _dir: dir,
        log_path,
    }
}

fn disabled() -> Harness {
    harness(Arc::new(DisabledGenerator))
}

/// Helper to create test request
fn test_request(method: Method, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn json_request(method: Method, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// Send a request through a fresh router over the shared state
async fn send(state: &AppState, request: Request<Body>) -> (StatusCode, Value) {
    let response = build_router(state.clone()).oneshot(request).await.unwrap();
    let status = response.status();
    (status, extract_json(response.into_body()).await)
}

/// Helper to extract JSON from response body
async fn extract_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

// =============================================================================
// Health Endpoint Tests
// =============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let h = disabled();
    let (status, body) = send(&h.state, test_request(Method::GET, "/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "songpoll-ui");
    assert!(body["version"].is_string());
}

// =============================================================================
// Dashboard Endpoint Tests
// =============================================================================

#[tokio::test]
async fn test_years_endpoint() {
    let h = disabled();
    let (status, body) = send(&h.state, test_request(Method::GET, "/api/years")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["years"], json!([2024, 2019]));
    assert_eq!(body["default_year"], 2024);
    assert_eq!(body["taste_map"], false);
    assert_eq!(body["insights"], false);
}

#[tokio::test]
async fn test_community_dashboard() {
    let h = disabled();
    let (status, body) = send(&h.state, test_request(Method::GET, "/api/dashboard")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["year"], 2024);
    assert!(body["identifier"].is_null());

    let rankings = body["rankings"].as_array().unwrap();
    assert_eq!(rankings.len(), 3);
    assert_eq!(rankings[0]["song"], "B");
    assert_eq!(rankings[0]["rank"], 1);
    assert!(body["overview"].as_str().unwrap().contains("### Winner"));

    // No narratives without a generator
    assert!(body["blurb"].is_null());
    assert!(body["insight"].is_null());
}

#[tokio::test]
async fn test_voter_dashboard() {
    let h = disabled();
    let (status, body) = send(
        &h.state,
        test_request(Method::GET, "/api/dashboard?user=%20Alice%20&view=user"),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["identifier"], "Alice");
    let rows = body["comparison"]["data"].as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert!(body["comparison"]["error"].is_null());

    // Lite projector: the section reports why it is empty, the rest renders
    assert_eq!(body["taste_map"]["data"], json!([]));
    assert!(body["taste_map"]["error"].is_string());
}

#[tokio::test]
async fn test_unknown_voter_is_section_error() {
    let h = disabled();
    let (status, body) = send(&h.state, test_request(Method::GET, "/api/dashboard?user=nobody")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["comparison"]["error"], "user not found for `nobody`");
    assert_eq!(body["rankings"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_legacy_year_dashboard() {
    let h = disabled();
    let (status, body) = send(&h.state, test_request(Method::GET, "/api/dashboard?year=2019")).await;

    assert_eq!(status, StatusCode::OK);
    let rankings = body["rankings"].as_array().unwrap();
    assert_eq!(rankings.len(), 1);
    assert_eq!(rankings[0]["song"], "Hit - Band");
    assert_eq!(rankings[0]["average_score"], 8.0);
}

#[tokio::test]
async fn test_unsupported_year_renders_error_bundle() {
    let h = disabled();
    let (status, body) = send(&h.state, test_request(Method::GET, "/api/dashboard?year=1999")).await;

    assert_eq!(status, StatusCode::OK);
    let overview = body["overview"].as_str().unwrap();
    assert!(overview.contains("Error Loading Data"));
    assert!(overview.contains("Year 1999 not supported. Choose from: 2024, 2019"));
    assert_eq!(body["rankings"], json!([]));
}

#[tokio::test]
async fn test_bad_view_is_bad_request() {
    let h = disabled();
    let (status, body) = send(&h.state, test_request(Method::GET, "/api/dashboard?view=sideways")).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
    assert!(body["error"]["message"].as_str().unwrap().contains("sideways"));
}

#[tokio::test]
async fn test_insights_included_on_request() {
    let h = harness(Arc::new(ScriptedGenerator));

    let (_, plain) = send(&h.state, test_request(Method::GET, "/api/dashboard?user=alice")).await;
    assert!(plain["insight"].is_null());

    let (status, body) = send(
        &h.state,
        test_request(Method::GET, "/api/dashboard?user=alice&insights=true"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["blurb"], "Everyone loved B.");
    assert_eq!(body["insight"], "You rate A higher than most.");
    assert_eq!(body["recommendations"][0]["song"], "Bicep");
}

// =============================================================================
// Cache Endpoint Tests
// =============================================================================

#[tokio::test]
async fn test_repeated_requests_hit_cache() {
    let h = disabled();

    send(&h.state, test_request(Method::GET, "/api/dashboard?user=alice")).await;
    send(&h.state, test_request(Method::GET, "/api/dashboard?user=ALICE")).await;
    assert_eq!(h.fetches.load(Ordering::SeqCst), 1);

    let (status, stats) = send(&h.state, test_request(Method::GET, "/api/cache/stats")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["hits"], 1);
    assert_eq!(stats["misses"], 1);
    assert_eq!(stats["size"], 1);
    assert_eq!(stats["max_size"], 10);
}

#[tokio::test]
async fn test_full_address_shares_cache_with_local_part() {
    let h = disabled();

    let (_, short) = send(&h.state, test_request(Method::GET, "/api/dashboard?user=alice")).await;
    let (_, full) = send(&h.state, test_request(Method::GET, "/api/dashboard?user=alice@x.com")).await;
    assert_eq!(h.fetches.load(Ordering::SeqCst), 1);
    assert_eq!(short["rankings"], full["rankings"]);

    let (_, stats) = send(&h.state, test_request(Method::GET, "/api/cache/stats")).await;
    assert_eq!(stats["hits"], 1);
    assert_eq!(stats["size"], 1);

    // Dropping by full address clears the shared entry
    let (_, body) = send(
        &h.state,
        json_request(Method::POST, "/api/cache/invalidate", json!({"user": "alice@x.com", "year": 2024})),
    )
    .await;
    assert_eq!(body["removed"], 1);
}

#[tokio::test]
async fn test_address_without_local_part_keeps_community_entry() {
    let h = disabled();

    send(&h.state, test_request(Method::GET, "/api/dashboard")).await;
    send(&h.state, test_request(Method::GET, "/api/dashboard?user=%40gmail.com")).await;
    assert_eq!(h.fetches.load(Ordering::SeqCst), 2);

    let (_, community) = send(&h.state, test_request(Method::GET, "/api/dashboard")).await;
    assert!(community["identifier"].is_null());
    assert_eq!(h.fetches.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_invalidate_single_entry() {
    let h = disabled();
    send(&h.state, test_request(Method::GET, "/api/dashboard?user=alice")).await;
    send(&h.state, test_request(Method::GET, "/api/dashboard")).await;

    let (status, body) = send(
        &h.state,
        json_request(Method::POST, "/api/cache/invalidate", json!({"user": "alice", "year": 2024})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["removed"], 1);

    send(&h.state, test_request(Method::GET, "/api/dashboard?user=alice")).await;
    assert_eq!(h.fetches.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_invalidate_all() {
    let h = disabled();
    send(&h.state, test_request(Method::GET, "/api/dashboard?user=alice")).await;
    send(&h.state, test_request(Method::GET, "/api/dashboard?user=bob")).await;

    let (status, body) = send(&h.state, test_request(Method::POST, "/api/cache/invalidate")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["removed"], 2);

    let (_, stats) = send(&h.state, test_request(Method::GET, "/api/cache/stats")).await;
    assert_eq!(stats["size"], 0);
}

// =============================================================================
// Feedback Endpoint Tests
// =============================================================================

#[tokio::test]
async fn test_feedback_saved_to_log() {
    let h = disabled();
    let (status, body) = send(
        &h.state,
        json_request(
            Method::POST,
            "/api/feedback",
            json!({"identifier": "alice", "songs": "Song one\nSong two", "ideas": ""}),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert!(body["method"].is_null());
    let log = std::fs::read_to_string(&h.log_path).unwrap();
    assert!(log.contains("Song one\nSong two"));
}

#[tokio::test]
async fn test_empty_feedback_rejected() {
    let h = disabled();
    let (status, body) = send(
        &h.state,
        json_request(Method::POST, "/api/feedback", json!({"songs": " ", "ideas": ""})),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "No feedback provided (both fields empty)");
    assert!(!h.log_path.exists());
}

// =============================================================================
// Wiring Tests
// =============================================================================

#[test]
#[serial_test::serial]
fn test_state_from_config_follows_api_key() {
    use songpoll_common::config::{load_config, LLM_API_KEY_ENV_VAR};
    let missing = std::path::Path::new("/nonexistent/songpoll/config.toml");

    std::env::remove_var(LLM_API_KEY_ENV_VAR);
    let config = load_config(Some(missing)).unwrap();
    assert!(!AppState::from_config(&config).unwrap().insights_enabled);

    std::env::set_var(LLM_API_KEY_ENV_VAR, "test-key");
    let config = load_config(Some(missing)).unwrap();
    std::env::remove_var(LLM_API_KEY_ENV_VAR);
    let state = AppState::from_config(&config).unwrap();
    assert!(state.insights_enabled);
    assert_eq!(state.service.years(), vec![2024, 2023, 2019]);
}
