//! Local JSON file persistence shared by the conversation and recommendation stores.
//!
//! Every user owns one file per store, named by [`user_token`]. Files are replaced
//! atomically (write to a sibling temp file, then rename).

use std::path::{Path, PathBuf};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

use crate::conversations::sync::SyncError;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt data in {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The remote copy could not be read, so the local file may be incomplete.
    #[error("Remote sync unavailable: {0}")]
    Remote(#[from] SyncError),

    #[error("Invalid stored record for {contact}: urgency {urgency} out of range")]
    InvalidRecord { contact: String, urgency: i16 },
}

/// Filesystem-safe, reversible token for a user id (URL-safe base64, no padding).
pub fn user_token(user: &str) -> String {
    URL_SAFE_NO_PAD.encode(user.as_bytes())
}

pub fn user_file(dir: &Path, user: &str) -> PathBuf {
    dir.join(format!("{}.json", user_token(user)))
}

/// Reads and decodes a JSON file. A missing file yields `None`.
pub async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let raw = match tokio::fs::read(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    serde_json::from_slice(&raw)
        .map(Some)
        .map_err(|source| StoreError::Corrupt {
            path: path.to_path_buf(),
            source,
        })
}

/// Encodes `value` as pretty JSON and atomically replaces `path`. Returns the bytes written.
pub async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<Vec<u8>, StoreError> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|source| StoreError::Corrupt {
        path: path.to_path_buf(),
        source,
    })?;
    write_bytes(path, &bytes).await?;
    Ok(bytes)
}

/// Atomically replaces `path` with `bytes`, creating parent directories as needed.
pub async fn write_bytes(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let io_err = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
    }
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes).await.map_err(io_err)?;
    tokio::fs::rename(&tmp, path).await.map_err(io_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_token_is_unpadded_url_safe_base64() {
        assert_eq!(user_token("alice@example.com"), "YWxpY2VAZXhhbXBsZS5jb20");
        assert!(!user_token("bob@example.org?").contains('='));
        assert!(!user_token("bob@example.org?").contains('/'));
    }

    #[tokio::test]
    async fn test_missing_file_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let value: Option<serde_json::Value> = read_json(&dir.path().join("nope.json"))
            .await
            .unwrap();
        assert!(value.is_none());
    }

    #[tokio::test]
    async fn test_write_creates_parent_and_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("data.json");
        write_json(&path, &serde_json::json!({"a": 1})).await.unwrap();

        let back: serde_json::Value = read_json(&path).await.unwrap().unwrap();
        assert_eq!(back["a"], 1);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        tokio::fs::write(&path, b"{not json").await.unwrap();
        let result: Result<Option<serde_json::Value>, _> = read_json(&path).await;
        assert!(matches!(result, Err(StoreError::Corrupt { .. })));
    }
}
