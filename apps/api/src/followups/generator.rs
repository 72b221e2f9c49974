//! Follow-up generation: turns a contact's history into a (message, urgency) draft.
//!
//! `FollowupGenerator` is the seam the refresh orchestrator depends on. The production
//! backend is `LlmFollowupGenerator`; tests plug in counting doubles.
//!
//! Model output never reaches a store without passing `parse_followup`, which either
//! yields a complete, in-range draft or `MalformedResponse`. There is no partial result.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::followups::prompts::{EMPTY_HISTORY, FOLLOWUP_PROMPT_TEMPLATE, FOLLOWUP_SYSTEM};
use crate::llm_client::prompts::JSON_ONLY_SYSTEM;
use crate::llm_client::{JsonSchema, LlmClient, LlmError};
use crate::models::conversation::ConversationEntry;
use crate::models::recommendation::{URGENCY_MAX, URGENCY_MIN};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FollowupError {
    /// Network, auth, timeout or provider failure. Worth trying again on a later run.
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// The model answered with something that does not fit the schema.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),
}

impl From<LlmError> for FollowupError {
    fn from(e: LlmError) -> Self {
        if e.is_upstream() {
            FollowupError::UpstreamUnavailable(e.to_string())
        } else {
            FollowupError::MalformedResponse(e.to_string())
        }
    }
}

/// Validated model output, not yet stamped or stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FollowupDraft {
    pub message: String,
    pub urgency: u8,
    pub rationale: Option<String>,
}

/// Everything the generator needs for one contact.
#[derive(Debug, Clone, Copy)]
pub struct FollowupRequest<'a> {
    pub user: &'a str,
    pub contact: &'a str,
    pub history: &'a [ConversationEntry],
    pub now: DateTime<Utc>,
}

#[async_trait]
pub trait FollowupGenerator: Send + Sync {
    /// Identifier recorded on every recommendation this generator produces.
    fn model(&self) -> &str;

    async fn generate(&self, request: FollowupRequest<'_>) -> Result<FollowupDraft, FollowupError>;
}

/// Production generator backed by the shared [`LlmClient`].
pub struct LlmFollowupGenerator {
    llm: LlmClient,
    model: String,
}

impl LlmFollowupGenerator {
    pub fn new(llm: LlmClient, model: impl Into<String>) -> Self {
        Self {
            llm,
            model: model.into(),
        }
    }
}

#[async_trait]
impl FollowupGenerator for LlmFollowupGenerator {
    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: FollowupRequest<'_>) -> Result<FollowupDraft, FollowupError> {
        let prompt = build_followup_prompt(&request);
        let system = format!("{FOLLOWUP_SYSTEM} {JSON_ONLY_SYSTEM}");
        let schema = JsonSchema {
            name: "followup_recommendation",
            schema: followup_schema(),
        };

        let text = self
            .llm
            .call_text(&self.model, &system, &prompt, Some(&schema))
            .await?;

        parse_followup(&text)
    }
}

#[derive(Debug, Deserialize)]
struct RawFollowup {
    message: String,
    urgency: i64,
    #[serde(default)]
    rationale: Option<String>,
}

/// Strictly validates model output against the follow-up schema.
pub fn parse_followup(text: &str) -> Result<FollowupDraft, FollowupError> {
    let raw: RawFollowup = serde_json::from_str(text)
        .map_err(|e| FollowupError::MalformedResponse(format!("schema mismatch: {e}")))?;

    let message = raw.message.trim();
    if message.is_empty() {
        return Err(FollowupError::MalformedResponse(
            "message is empty".to_string(),
        ));
    }

    let range = i64::from(URGENCY_MIN)..=i64::from(URGENCY_MAX);
    if !range.contains(&raw.urgency) {
        return Err(FollowupError::MalformedResponse(format!(
            "urgency {} outside {URGENCY_MIN}-{URGENCY_MAX}",
            raw.urgency
        )));
    }

    Ok(FollowupDraft {
        message: message.to_string(),
        urgency: raw.urgency as u8,
        rationale: raw
            .rationale
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty()),
    })
}

/// JSON schema sent as the structured-output contract.
pub fn followup_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "message": {
                "type": "string",
                "description": "Short proposed message to send to the person."
            },
            "urgency": {
                "type": "integer",
                "description": format!("{URGENCY_MIN}-{URGENCY_MAX}, where {URGENCY_MAX} is most urgent.")
            },
            "rationale": {
                "type": "string",
                "description": "One or two sentences explaining the timing."
            }
        },
        "required": ["message", "urgency", "rationale"],
        "additionalProperties": false
    })
}

/// Renders history as `"<timestamp> [LABEL] summary"`, skipping blank summaries.
pub fn format_history(history: &[ConversationEntry]) -> Vec<String> {
    history
        .iter()
        .filter(|e| !e.summary.trim().is_empty())
        .map(|e| {
            format!(
                "{} [{}] {}",
                e.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
                e.kind.label(),
                e.summary.trim()
            )
        })
        .collect()
}

pub fn build_followup_prompt(request: &FollowupRequest<'_>) -> String {
    let lines = format_history(request.history);
    let history = if lines.is_empty() {
        EMPTY_HISTORY.to_string()
    } else {
        lines.join("\n")
    };

    FOLLOWUP_PROMPT_TEMPLATE
        .replace("{now}", &request.now.to_rfc3339_opts(SecondsFormat::Secs, true))
        .replace("{user}", request.user)
        .replace("{contact}", request.contact)
        .replace("{urgency_min}", &URGENCY_MIN.to_string())
        .replace("{urgency_max}", &URGENCY_MAX.to_string())
        // Last, so text inside user summaries is never treated as a placeholder.
        .replace("{history}", &history)
}
