//! Text generation for dashboard narratives
//!
//! `TextGenerator` is the seam between the dashboard and whatever produces
//! prose. `ChatCompletionsClient` talks to any OpenAI-compatible endpoint;
//! `DisabledGenerator` stands in when no API key is configured.
//! `InsightService` turns generator calls into dashboard text and never
//! lets a failure escape: errors become displayable strings.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use songpoll_common::comparison::ComparisonRow;
use songpoll_common::config::LlmConfig;
use songpoll_common::insights::{
    is_complete, join_continuation, parse_recommendations, top_and_bottom, GenerationRequest,
    InsightSettings, Recommendation, VotingSummary,
};
use songpoll_common::AggregateScore;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum LlmError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("rate limited")]
    RateLimited,

    #[error("API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generate text for one prompt; an empty string means "nothing to show"
    async fn generate(&self, request: &GenerationRequest) -> Result<String, LlmError>;

    fn is_enabled(&self) -> bool {
        true
    }
}

/// Generator used when text generation is switched off
pub struct DisabledGenerator;

#[async_trait]
impl TextGenerator for DisabledGenerator {
    async fn generate(&self, _request: &GenerationRequest) -> Result<String, LlmError> {
        Ok(String::new())
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

/// OpenAI-compatible `/chat/completions` client
pub struct ChatCompletionsClient {
    client: reqwest::Client,
    config: LlmConfig,
    timeout: Duration,
}

impl ChatCompletionsClient {
    pub fn new(client: reqwest::Client, config: LlmConfig) -> Self {
        let timeout = Duration::from_secs(config.timeout_seconds.max(1));
        Self {
            client,
            config,
            timeout,
        }
    }

    /// Real client when a key is configured, otherwise the disabled stand-in
    pub fn from_config(client: reqwest::Client, config: &LlmConfig) -> Arc<dyn TextGenerator> {
        if config.enabled() {
            Arc::new(Self::new(client, config.clone()))
        } else {
            debug!("No LLM API key configured, text generation disabled");
            Arc::new(DisabledGenerator)
        }
    }
}

#[async_trait]
impl TextGenerator for ChatCompletionsClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, LlmError> {
        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        let model = self.config.model_for(request.role);

        let body = ChatRequest {
            model,
            messages: vec![ChatMessage {
                role: "user",
                content: &request.prompt,
            }],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            top_p: 1.0,
        };

        debug!(model, max_tokens = request.max_tokens, "Sending chat completion request");

        let mut builder = self.client.post(&url).json(&body).timeout(self.timeout);
        if let Some(key) = self.config.api_key.as_deref() {
            builder = builder.header("Authorization", format!("Bearer {}", key));
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                LlmError::Timeout
            } else {
                LlmError::Connection(e.to_string())
            }
        })?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(LlmError::RateLimited);
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "Chat completion request failed");
            return Err(LlmError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(format!("Failed to parse response: {}", e)))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse("No choices in response".to_string()))?;

        let content = choice.message.content.unwrap_or_default();
        if content.trim().is_empty() {
            return Ok("No response generated".to_string());
        }
        Ok(content.trim().to_string())
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    top_p: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

/// Narrative sections of the dashboard
#[derive(Clone)]
pub struct InsightService {
    generator: Arc<dyn TextGenerator>,
    settings: InsightSettings,
}

impl InsightService {
    pub fn new(generator: Arc<dyn TextGenerator>, settings: InsightSettings) -> Self {
        Self { generator, settings }
    }

    pub fn is_enabled(&self) -> bool {
        self.generator.is_enabled()
    }

    /// Voting analysis for one voter
    ///
    /// A response that stops mid-sentence gets exactly one continuation call.
    /// Returns `None` when generation is disabled or there is nothing to analyze.
    pub async fn analysis(&self, rows: &[ComparisonRow]) -> Option<String> {
        if !self.is_enabled() {
            return None;
        }
        let summary = VotingSummary::from_comparison(rows, &self.settings)?;

        let first = match self
            .generator
            .generate(&GenerationRequest::analysis(&summary, &self.settings))
            .await
        {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "Voting analysis failed");
                return Some(format!("Could not generate insight: {}", e));
            }
        };

        if first.trim().is_empty() || is_complete(&first) {
            return Some(first);
        }

        debug!("Analysis cut off, requesting continuation");
        match self.generator.generate(&GenerationRequest::continuation(&first)).await {
            Ok(tail) => Some(join_continuation(&first, &tail)),
            Err(e) => {
                warn!(error = %e, "Analysis continuation failed");
                Some(first)
            }
        }
    }

    /// Artist and genre suggestions from the voter's extremes
    pub async fn recommendations(&self, rows: &[ComparisonRow]) -> Vec<Recommendation> {
        let n = self.settings.recommendation_count;
        if !self.is_enabled() || n == 0 {
            return Vec::new();
        }
        let (top, bottom) = top_and_bottom(rows, n);
        if top.is_empty() {
            return Vec::new();
        }

        match self
            .generator
            .generate(&GenerationRequest::recommendations(&top, &bottom, n))
            .await
        {
            Ok(response) => parse_recommendations(&response, n),
            Err(e) => {
                warn!(error = %e, "Recommendation request failed");
                vec![Recommendation {
                    song: "Error generating recommendations".to_string(),
                    artist: String::new(),
                    reason: format!("An error occurred: {}", e),
                }]
            }
        }
    }

    /// One-liner about the community favourite
    pub async fn blurb(&self, scores: &[AggregateScore]) -> Option<String> {
        if !self.is_enabled() {
            return None;
        }
        let top = scores.first()?;
        match self
            .generator
            .generate(&GenerationRequest::blurb(&top.song, top.average_score))
            .await
        {
            Ok(text) if text.trim().is_empty() => None,
            Ok(text) => Some(text),
            Err(e) => {
                warn!(error = %e, "Blurb generation failed");
                Some(format!("Error generating response: {}", e))
            }
        }
    }
}
