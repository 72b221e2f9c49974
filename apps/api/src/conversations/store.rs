//! Append-only conversation history, one JSON file per user.
//!
//! When a [`RemoteStore`] is attached the local directory acts as a cache:
//! - read-through: the first access to a user in this process pulls the remote
//!   file if no local copy exists;
//! - write-back: every append is written locally, then the whole file is pushed.
//!   A failed push is logged and the append still succeeds.
//!
//! Hydration runs under the same lock as appends, so a slow fetch never lands on
//! top of a newer local file. While the remote copy cannot be read, reads serve
//! local data but appends are refused: pushing a partial file would replace the
//! user's remote history.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::conversations::sync::{conversations_key, RemoteStore};
use crate::models::conversation::{ConversationEntry, EntryKind};
use crate::storage::{self, StoreError};

#[derive(Debug, Default, Serialize, Deserialize)]
struct UserConversations {
    #[serde(default)]
    conversations: BTreeMap<String, Vec<ConversationEntry>>,
}

struct RemoteSync {
    store: Arc<dyn RemoteStore>,
    prefix: String,
}

pub struct ConversationStore {
    data_dir: PathBuf,
    remote: Option<RemoteSync>,
    /// Users whose local file has been reconciled with remote in this process.
    hydrated: Mutex<HashSet<String>>,
    /// Serializes hydration and read-modify-write cycles on user files.
    write_lock: tokio::sync::Mutex<()>,
}

impl ConversationStore {
    /// Local-only store rooted at `data_dir`.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            remote: None,
            hydrated: Mutex::new(HashSet::new()),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Attaches a remote mirror for conversation files under `prefix`.
    pub fn with_remote(mut self, store: Arc<dyn RemoteStore>, prefix: impl Into<String>) -> Self {
        self.remote = Some(RemoteSync {
            store,
            prefix: prefix.into(),
        });
        self
    }

    /// Contacts with at least one entry, sorted alphabetically.
    pub async fn list_contacts(&self, user: &str) -> Result<Vec<String>, StoreError> {
        let data = self.load(user).await?;
        Ok(data
            .conversations
            .into_iter()
            .filter(|(_, entries)| !entries.is_empty())
            .map(|(contact, _)| contact)
            .collect())
    }

    /// Entries for one contact in insertion order. Unknown contacts yield an empty list.
    pub async fn history(
        &self,
        user: &str,
        contact: &str,
    ) -> Result<Vec<ConversationEntry>, StoreError> {
        let mut data = self.load(user).await?;
        Ok(data.conversations.remove(contact).unwrap_or_default())
    }

    /// Appends a new entry. `contact` and `summary` are trimmed; callers validate emptiness.
    pub async fn add_entry(
        &self,
        user: &str,
        contact: &str,
        summary: &str,
        kind: EntryKind,
    ) -> Result<ConversationEntry, StoreError> {
        let entry = ConversationEntry {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            kind,
            summary: summary.trim().to_string(),
        };

        let bytes = {
            let _guard = self.write_lock.lock().await;
            let path = self.path_for(user);
            self.hydrate_locked(user, &path).await?;
            let mut data: UserConversations =
                storage::read_json(&path).await?.unwrap_or_default();
            data.conversations
                .entry(contact.trim().to_string())
                .or_default()
                .push(entry.clone());
            storage::write_json(&path, &data).await?
        };

        debug!("Appended entry {} for contact {:?}", entry.id, contact.trim());
        self.push_remote(user, Bytes::from(bytes)).await;
        Ok(entry)
    }

    fn path_for(&self, user: &str) -> PathBuf {
        storage::user_file(&self.data_dir, user)
    }

    async fn load(&self, user: &str) -> Result<UserConversations, StoreError> {
        let path = self.path_for(user);
        if self.remote.is_some() && !self.is_hydrated(user) {
            let _guard = self.write_lock.lock().await;
            match self.hydrate_locked(user, &path).await {
                // Not marked: the next access tries the remote again.
                Err(StoreError::Remote(e)) => {
                    warn!("Remote fetch failed for user {user:?}, serving local data: {e}")
                }
                other => other?,
            }
        }
        Ok(storage::read_json(&path).await?.unwrap_or_default())
    }

    /// Pulls the remote file if this user has no local copy yet.
    /// Callers must hold `write_lock`.
    async fn hydrate_locked(&self, user: &str, path: &Path) -> Result<(), StoreError> {
        let Some(remote) = &self.remote else {
            return Ok(());
        };
        if self.is_hydrated(user) {
            return Ok(());
        }
        if tokio::fs::try_exists(path).await.unwrap_or(false) {
            self.mark_hydrated(user);
            return Ok(());
        }

        let key = conversations_key(&remote.prefix, user);
        if let Some(body) = remote.store.fetch(&key).await? {
            storage::write_bytes(path, &body).await?;
            info!("Hydrated conversations from remote key {key}");
        }
        self.mark_hydrated(user);
        Ok(())
    }

    async fn push_remote(&self, user: &str, body: Bytes) {
        let Some(remote) = &self.remote else {
            return;
        };
        let key = conversations_key(&remote.prefix, user);
        if let Err(e) = remote.store.push(&key, body).await {
            warn!("Failed to push conversations to remote key {key}: {e}");
        }
    }

    fn is_hydrated(&self, user: &str) -> bool {
        self.hydrated
            .lock()
            .map(|set| set.contains(user))
            .unwrap_or(false)
    }

    fn mark_hydrated(&self, user: &str) {
        if let Ok(mut set) = self.hydrated.lock() {
            set.insert(user.to_string());
        }
    }
}
