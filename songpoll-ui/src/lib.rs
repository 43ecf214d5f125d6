//! songpoll-ui library - survey dashboard service
//!
//! Serves the dashboard bundle computed by `songpoll-common` over a JSON API
//! and as a one-shot report.

use axum::Router;
use songpoll_common::config::SongpollConfig;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod error;
pub mod feedback;
pub mod llm;
pub mod service;
pub mod source;

use feedback::FeedbackSubmitter;
use llm::{ChatCompletionsClient, InsightService};
use service::DashboardService;
use source::PartitionSource;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<DashboardService>,
    pub feedback: Arc<FeedbackSubmitter>,
    /// Narratives are generated (an API key is configured)
    pub insights_enabled: bool,
}

impl AppState {
    pub fn new(service: DashboardService, feedback: FeedbackSubmitter, insights_enabled: bool) -> Self {
        Self {
            service: Arc::new(service),
            feedback: Arc::new(feedback),
            insights_enabled,
        }
    }

    /// Wire sources, generator, cache and feedback from configuration
    pub fn from_config(config: &SongpollConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("songpoll-ui/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        let generator = ChatCompletionsClient::from_config(client.clone(), &config.llm);
        let insights = InsightService::new(generator, config.insights.clone());
        let insights_enabled = insights.is_enabled();

        let source = PartitionSource::from_config(config, client.clone());
        let service = DashboardService::from_config(config, source, insights);
        let feedback = FeedbackSubmitter::new(client, &config.feedback);

        Ok(Self::new(service, feedback, insights_enabled))
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::{get, post};

    let api = Router::new()
        .route("/api/years", get(api::list_years))
        .route("/api/dashboard", get(api::get_dashboard))
        .route("/api/cache/stats", get(api::cache_stats))
        .route("/api/cache/invalidate", post(api::invalidate_cache))
        .route("/api/feedback", post(api::submit_feedback));

    Router::new()
        .merge(api)
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
