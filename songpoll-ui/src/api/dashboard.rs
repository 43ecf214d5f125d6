//! Dashboard and survey-year endpoints

use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use songpoll_common::charts::RankingView;
use songpoll_common::dashboard::{DashboardBundle, DashboardRequest};
use tracing::debug;

use crate::error::ApiResult;
use crate::AppState;

/// Query parameters for the dashboard
#[derive(Debug, Default, Deserialize)]
pub struct DashboardQuery {
    /// Email prefix of the voter to compare; omitted for the community view
    pub user: Option<String>,

    /// Survey year, defaults to the configured default year
    pub year: Option<u16>,

    /// `overlay`, `average` or `user`
    pub view: Option<String>,

    /// Include generated narratives
    #[serde(default)]
    pub insights: bool,
}

#[derive(Debug, Serialize)]
pub struct YearsResponse {
    pub years: Vec<u16>,
    pub default_year: u16,
    pub taste_map: bool,
    pub insights: bool,
}

/// GET /api/years
pub async fn list_years(State(state): State<AppState>) -> Json<YearsResponse> {
    Json(YearsResponse {
        years: state.service.years(),
        default_year: state.service.default_year(),
        taste_map: state.service.projection_available(),
        insights: state.insights_enabled,
    })
}

/// GET /api/dashboard?user=&year=&view=&insights=
///
/// Data problems (unknown year, unreadable sheet, unknown voter) are reported
/// inside the bundle; only malformed parameters are request errors.
pub async fn get_dashboard(
    State(state): State<AppState>,
    Query(query): Query<DashboardQuery>,
) -> ApiResult<Json<DashboardBundle>> {
    let view: RankingView = query.view.as_deref().unwrap_or_default().parse()?;
    let request = DashboardRequest {
        identifier: query.user,
        year: query.year.unwrap_or_else(|| state.service.default_year()),
        view,
    };
    debug!(year = request.year, voter = ?request.voter(), "Dashboard requested");

    Ok(Json(state.service.dashboard(&request, query.insights).await))
}
