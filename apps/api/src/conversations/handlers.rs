use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::errors::AppError;
use crate::models::conversation::{ConversationEntry, EntryKind};
use crate::models::user::UserId;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct UserQuery {
    #[serde(default)]
    pub user: String,
}

impl UserQuery {
    pub fn user_id(&self) -> Result<UserId, AppError> {
        require_user(&self.user)
    }
}

/// Normalizes the forwarded identity; a blank one is a 401.
pub fn require_user(raw: &str) -> Result<UserId, AppError> {
    UserId::parse(raw).ok_or(AppError::Unauthorized)
}

#[derive(Serialize)]
pub struct ContactListResponse {
    pub contacts: Vec<String>,
}

#[derive(Deserialize)]
pub struct AddEntryRequest {
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub contact: String,
    #[serde(default)]
    pub summary: String,
    pub entry_type: Option<String>,
}

#[derive(Serialize)]
pub struct AddEntryResponse {
    pub contact: String,
    pub entry: ConversationEntry,
}

/// GET /api/v1/conversations
pub async fn handle_list_contacts(
    State(state): State<AppState>,
    Query(params): Query<UserQuery>,
) -> Result<Json<ContactListResponse>, AppError> {
    let user = params.user_id()?;
    let contacts = state.conversations.list_contacts(user.as_str()).await?;
    Ok(Json(ContactListResponse { contacts }))
}

/// POST /api/v1/conversations
pub async fn handle_add_entry(
    State(state): State<AppState>,
    Json(req): Json<AddEntryRequest>,
) -> Result<(StatusCode, Json<AddEntryResponse>), AppError> {
    let user = require_user(&req.user)?;
    let kind = validate_add_entry(&req)?;

    let contact = req.contact.trim().to_string();
    let entry = state
        .conversations
        .add_entry(user.as_str(), &contact, &req.summary, kind)
        .await?;

    Ok((StatusCode::CREATED, Json(AddEntryResponse { contact, entry })))
}

/// Collects every problem with the request instead of stopping at the first.
fn validate_add_entry(req: &AddEntryRequest) -> Result<EntryKind, AppError> {
    let mut problems = Vec::new();

    if req.contact.trim().is_empty() {
        problems.push("contact is required".to_string());
    }
    if req.summary.trim().is_empty() {
        problems.push("summary is required".to_string());
    }
    let kind = match req.entry_type.as_deref() {
        None => Some(EntryKind::default()),
        Some(raw) => {
            let parsed = EntryKind::parse(raw);
            if parsed.is_none() {
                problems.push(format!(
                    "entry_type must be 'conversation' or 'note', got {raw:?}"
                ));
            }
            parsed
        }
    };

    match kind {
        Some(kind) if problems.is_empty() => Ok(kind),
        _ => Err(AppError::Validation(problems.join("; "))),
    }
}
