//! Feedback endpoint

use axum::{extract::State, http::StatusCode, Json};

use crate::feedback::{FeedbackRequest, FeedbackResult};
use crate::AppState;

/// POST /api/feedback
///
/// 200 when the feedback was stored or delivered, 422 otherwise. The body is
/// the submission result either way.
pub async fn submit_feedback(
    State(state): State<AppState>,
    Json(request): Json<FeedbackRequest>,
) -> (StatusCode, Json<FeedbackResult>) {
    let result = state.feedback.submit(&request).await;
    let status = if result.success {
        StatusCode::OK
    } else {
        StatusCode::UNPROCESSABLE_ENTITY
    };
    (status, Json(result))
}
