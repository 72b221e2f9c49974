use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What the user logged: an exchange with the contact, or a private note about them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    #[default]
    Conversation,
    Note,
}

impl EntryKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "conversation" => Some(EntryKind::Conversation),
            "note" => Some(EntryKind::Note),
            _ => None,
        }
    }

    /// Label used when the history is rendered into a model prompt.
    pub fn label(&self) -> &'static str {
        match self {
            EntryKind::Conversation => "CONVERSATION",
            EntryKind::Note => "NOTE",
        }
    }
}

/// A single logged summary. Never modified after it is written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    #[serde(default, rename = "entry_type")]
    pub kind: EntryKind,
    pub summary: String,
}
