//! Feedback submission
//!
//! Every submission is appended to the local log first. When a webhook is
//! configured it is tried next, as JSON and then as a form post.

use chrono::Local;
use serde::{Deserialize, Serialize};
use songpoll_common::config::FeedbackConfig;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use uuid::Uuid;

const BODY_RULE_WIDTH: usize = 50;
const ENTRY_RULE_WIDTH: usize = 60;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FeedbackRequest {
    /// Email prefix, optional
    #[serde(default)]
    pub identifier: String,
    #[serde(default)]
    pub songs: String,
    #[serde(default)]
    pub ideas: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FeedbackResult {
    pub success: bool,
    /// `"webhook"`, or `None` when only the log file was written
    pub method: Option<String>,
    pub message: String,
    pub error: Option<String>,
}

impl FeedbackResult {
    fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    id: String,
    subject: &'a str,
    body: &'a str,
}

pub struct FeedbackSubmitter {
    client: reqwest::Client,
    webhook_url: Option<String>,
    log_path: PathBuf,
    timeout: Duration,
}

impl FeedbackSubmitter {
    pub fn new(client: reqwest::Client, config: &FeedbackConfig) -> Self {
        Self {
            client,
            webhook_url: config.webhook_url.clone().filter(|u| !u.trim().is_empty()),
            log_path: config.log_path.clone(),
            timeout: Duration::from_secs(config.timeout_seconds),
        }
    }

    pub async fn submit(&self, request: &FeedbackRequest) -> FeedbackResult {
        if request.songs.trim().is_empty() && request.ideas.trim().is_empty() {
            return FeedbackResult::failure("No feedback provided (both fields empty)");
        }

        let body = build_body(request);
        let subject = build_subject(&request.identifier);
        let file_saved = self.save_to_file(&request.identifier, &body).await;

        let mut webhook_error = None;
        if let Some(url) = &self.webhook_url {
            match self.try_webhook(url, &subject, &body).await {
                Ok(()) => {
                    info!("Feedback delivered via webhook");
                    return FeedbackResult {
                        success: true,
                        method: Some("webhook".to_string()),
                        message: success_message("webhook", request, file_saved),
                        error: None,
                    };
                }
                Err(e) => {
                    warn!(error = %e, "Feedback webhook failed, kept in log file");
                    webhook_error = Some(e);
                }
            }
        }

        if !file_saved {
            return FeedbackResult::failure(
                webhook_error.unwrap_or_else(|| "Could not save feedback".to_string()),
            );
        }

        FeedbackResult {
            success: true,
            method: None,
            message: fallback_message(request),
            error: webhook_error,
        }
    }

    async fn try_webhook(&self, url: &str, subject: &str, body: &str) -> Result<(), String> {
        let payload = WebhookPayload {
            id: Uuid::new_v4().to_string(),
            subject,
            body,
        };

        let status = self
            .client
            .post(url)
            .json(&payload)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| format!("Webhook error: {}", e))?
            .status();
        if matches!(status.as_u16(), 200 | 201) {
            return Ok(());
        }

        let status = self
            .client
            .post(url)
            .form(&payload)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| format!("Webhook error: {}", e))?
            .status();
        if matches!(status.as_u16(), 200 | 201) {
            return Ok(());
        }

        Err(format!("Webhook returned status {}", status.as_u16()))
    }

    async fn save_to_file(&self, identifier: &str, body: &str) -> bool {
        let identifier = identifier.trim();
        let entry = format!(
            "\n{rule}\nTimestamp: {ts}\nEmail Prefix: {id}\n{rule}\n{body}",
            rule = "=".repeat(ENTRY_RULE_WIDTH),
            ts = Local::now().format("%Y-%m-%d %H:%M:%S"),
            id = if identifier.is_empty() { "(none)" } else { identifier },
            body = body,
        );

        let result = async {
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.log_path)
                .await?;
            file.write_all(entry.as_bytes()).await?;
            file.flush().await
        }
        .await;

        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(path = %self.log_path.display(), error = %e, "Failed to save feedback to file");
                false
            }
        }
    }
}

fn build_body(request: &FeedbackRequest) -> String {
    let identifier = request.identifier.trim();
    let rule = "=".repeat(BODY_RULE_WIDTH);
    let mut body = String::from("New feedback received!\n\n");
    body.push_str(&format!(
        "Email Prefix: {}\n\n",
        if identifier.is_empty() { "(not provided)" } else { identifier }
    ));

    for (title, text) in [
        ("🎵 SONG SUGGESTIONS:", request.songs.trim()),
        ("💡 IMPROVEMENT IDEAS:", request.ideas.trim()),
    ] {
        if !text.is_empty() {
            body.push_str(&format!("{rule}\n{title}\n{rule}\n{text}\n\n"));
        }
    }
    body
}

fn build_subject(identifier: &str) -> String {
    let mut subject = format!("Music Chart Feedback - {}", Local::now().format("%Y-%m-%d %H:%M"));
    if !identifier.trim().is_empty() {
        subject.push_str(&format!(" | from: {}", identifier.trim()));
    }
    subject
}

fn line_counts(request: &FeedbackRequest) -> String {
    let mut out = String::new();
    if !request.songs.trim().is_empty() {
        out.push_str(&format!("**Songs suggested:** {} lines\n", request.songs.trim().lines().count()));
    }
    if !request.ideas.trim().is_empty() {
        out.push_str(&format!("**Ideas shared:** {} lines\n", request.ideas.trim().lines().count()));
    }
    out
}

fn success_message(method: &str, request: &FeedbackRequest, file_saved: bool) -> String {
    let mut message = format!("✅ **Thank you!** Your feedback has been sent via {}.\n\n", method);
    message.push_str(&line_counts(request));
    if !file_saved {
        message.push_str("\n⚠️ Warning: Could not save to backup file.");
    }
    message
}

fn fallback_message(request: &FeedbackRequest) -> String {
    let mut message = String::from("✅ **Thank you!** Your feedback has been saved.\n\n");
    message.push_str(&line_counts(request));
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submitter(log_path: PathBuf, webhook_url: Option<String>) -> FeedbackSubmitter {
        let config = FeedbackConfig {
            webhook_url,
            log_path,
            timeout_seconds: 1,
        };
        FeedbackSubmitter::new(reqwest::Client::new(), &config)
    }

    fn request(songs: &str, ideas: &str) -> FeedbackRequest {
        FeedbackRequest {
            identifier: "alice".into(),
            songs: songs.into(),
            ideas: ideas.into(),
        }
    }

    #[tokio::test]
    async fn test_empty_feedback_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feedback.txt");
        let result = submitter(path.clone(), None).submit(&request("  ", "")).await;

        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("No feedback provided (both fields empty)"));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_file_fallback_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feedback.txt");
        let feedback = submitter(path.clone(), None);

        let first = feedback.submit(&request("Song one\nSong two", "")).await;
        assert!(first.success);
        assert!(first.method.is_none());
        assert!(first.message.contains("**Songs suggested:** 2 lines"));

        feedback.submit(&request("", "Dark mode")).await;

        let log = std::fs::read_to_string(&path).unwrap();
        assert_eq!(log.matches("Email Prefix: alice\n").count(), 4);
        assert!(log.contains("Song one\nSong two"));
        assert!(log.contains("💡 IMPROVEMENT IDEAS:\n"));
        assert!(log.contains("Dark mode"));
    }

    #[tokio::test]
    async fn test_unreachable_webhook_falls_back_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feedback.txt");
        let feedback = submitter(path.clone(), Some("http://127.0.0.1:9/hook".to_string()));

        let result = feedback.submit(&request("Song", "")).await;
        assert!(result.success);
        assert!(result.method.is_none());
        assert!(result.error.as_deref().unwrap_or_default().starts_with("Webhook error"));
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_unwritable_log_without_webhook_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("feedback.txt");
        let result = submitter(path, None).submit(&request("Song", "")).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Could not save feedback"));
    }

    #[test]
    fn test_subject_includes_identifier() {
        assert!(build_subject(" bob ").ends_with(" | from: bob"));
        assert!(!build_subject("").contains("from:"));
    }
}
