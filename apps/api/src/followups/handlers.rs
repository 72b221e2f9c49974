use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::conversations::handlers::{require_user, UserQuery};
use crate::errors::AppError;
use crate::followups::orchestrator::{spawn_refresh, RefreshMode, RefreshReport};
use crate::models::conversation::ConversationEntry;
use crate::models::recommendation::Recommendation;
use crate::models::user::UserId;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct DashboardQuery {
    #[serde(default)]
    pub user: String,
    pub contact: Option<String>,
}

#[derive(Serialize)]
pub struct DashboardResponse {
    pub contacts: Vec<String>,
    pub selected_contact: Option<String>,
    pub history: Vec<ConversationEntry>,
    pub recommendation: Option<Recommendation>,
    pub refresh_in_progress: bool,
    pub refresh_enabled: bool,
}

#[derive(Serialize)]
pub struct RecommendationListResponse {
    pub recommendations: Vec<Recommendation>,
    pub refresh_in_progress: bool,
    pub refresh_enabled: bool,
}

#[derive(Deserialize)]
pub struct RefreshRequest {
    #[serde(default)]
    pub user: String,
}

/// GET /api/v1/dashboard
pub async fn handle_dashboard(
    State(state): State<AppState>,
    Query(params): Query<DashboardQuery>,
) -> Result<Json<DashboardResponse>, AppError> {
    let user = require_user(&params.user)?;
    refresh_in_background(&state, &user).await;

    let contacts = state.conversations.list_contacts(user.as_str()).await?;
    let selected = match params.contact.as_deref().map(str::trim) {
        Some(contact) if !contact.is_empty() => {
            if !contacts.iter().any(|c| c == contact) {
                return Err(AppError::NotFound(format!(
                    "No conversations logged with {contact}"
                )));
            }
            Some(contact.to_string())
        }
        _ => contacts.first().cloned(),
    };

    let (history, recommendation) = match &selected {
        Some(contact) => (
            state.conversations.history(user.as_str(), contact).await?,
            state.recommendations.get(user.as_str(), contact).await?,
        ),
        None => (Vec::new(), None),
    };

    Ok(Json(DashboardResponse {
        contacts,
        selected_contact: selected,
        history,
        recommendation,
        refresh_in_progress: is_refreshing(&state, &user),
        refresh_enabled: state.refresher.is_some(),
    }))
}

/// GET /api/v1/recommendations
pub async fn handle_list_recommendations(
    State(state): State<AppState>,
    Query(params): Query<UserQuery>,
) -> Result<Json<RecommendationListResponse>, AppError> {
    let user = params.user_id()?;
    refresh_in_background(&state, &user).await;

    let mut recommendations = state.recommendations.list(user.as_str()).await?;
    sort_by_urgency(&mut recommendations);

    Ok(Json(RecommendationListResponse {
        recommendations,
        refresh_in_progress: is_refreshing(&state, &user),
        refresh_enabled: state.refresher.is_some(),
    }))
}

/// POST /api/v1/recommendations/refresh
pub async fn handle_force_refresh(
    State(state): State<AppState>,
    Json(req): Json<RefreshRequest>,
) -> Result<Json<RefreshReport>, AppError> {
    let user = require_user(&req.user)?;
    let refresher = state.refresher.clone().ok_or(AppError::RefreshDisabled)?;

    // Joined on a detached task so a dropped connection does not cancel the run.
    let report = spawn_refresh(refresher, user.to_string(), RefreshMode::Force)
        .join()
        .await?;
    Ok(Json(report))
}

/// Starts an `IfStale` run and waits up to the configured grace period for it.
async fn refresh_in_background(state: &AppState, user: &UserId) {
    let Some(refresher) = state.refresher.clone() else {
        return;
    };
    spawn_refresh(refresher, user.to_string(), RefreshMode::IfStale)
        .wait(state.config.refresh_wait)
        .await;
}

fn is_refreshing(state: &AppState, user: &UserId) -> bool {
    state
        .refresher
        .as_ref()
        .map(|r| r.is_refreshing(user.as_str()))
        .unwrap_or(false)
}

/// Most urgent first; ties by contact name.
fn sort_by_urgency(recommendations: &mut [Recommendation]) {
    recommendations.sort_by(|a, b| {
        b.urgency
            .cmp(&a.urgency)
            .then_with(|| a.contact.cmp(&b.contact))
    });
}
