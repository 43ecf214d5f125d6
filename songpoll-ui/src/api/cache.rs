//! Cache inspection and invalidation

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use songpoll_common::cache::CacheStats;

use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct InvalidateRequest {
    pub user: Option<String>,
    pub year: Option<u16>,
}

#[derive(Debug, Serialize)]
pub struct InvalidateResponse {
    pub removed: usize,
}

/// GET /api/cache/stats
pub async fn cache_stats(State(state): State<AppState>) -> Json<CacheStats> {
    Json(state.service.cache_stats().await)
}

/// POST /api/cache/invalidate
///
/// An empty body clears the whole cache.
pub async fn invalidate_cache(
    State(state): State<AppState>,
    body: Option<Json<InvalidateRequest>>,
) -> Json<InvalidateResponse> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let removed = state
        .service
        .invalidate(request.user.as_deref(), request.year)
        .await;
    Json(InvalidateResponse { removed })
}
