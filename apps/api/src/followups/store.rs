//! Recommendation records: one live record per (user, contact).
//!
//! Writes replace the whole record and are conditional: a record whose
//! `generated_at` is older than the stored one is dropped, so timestamps for a
//! pair never move backwards even when two refresh runs race.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::Serialize;
use sqlx::PgPool;
use tracing::debug;

use crate::models::recommendation::{Recommendation, RecommendationRow};
use crate::storage::{self, StoreError};

/// Result of a conditional write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteOutcome {
    Written,
    /// A newer record was already stored; nothing changed.
    Superseded,
}

#[async_trait]
pub trait RecommendationStore: Send + Sync {
    async fn get(&self, user: &str, contact: &str) -> Result<Option<Recommendation>, StoreError>;

    /// Replaces the record for `(user, recommendation.contact)` unless a newer one exists.
    async fn put(
        &self,
        user: &str,
        recommendation: &Recommendation,
    ) -> Result<WriteOutcome, StoreError>;

    /// All records for a user, ordered by contact name.
    async fn list(&self, user: &str) -> Result<Vec<Recommendation>, StoreError>;
}

// ────────────────────────────────────────────────────────────────────────────
// File backend
// ────────────────────────────────────────────────────────────────────────────

/// One JSON file per user mapping contact name to record.
/// Lives in its own directory, apart from conversation files.
pub struct FileRecommendationStore {
    dir: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl FileRecommendationStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    async fn load(&self, user: &str) -> Result<BTreeMap<String, Recommendation>, StoreError> {
        Ok(storage::read_json(&storage::user_file(&self.dir, user))
            .await?
            .unwrap_or_default())
    }
}

#[async_trait]
impl RecommendationStore for FileRecommendationStore {
    async fn get(&self, user: &str, contact: &str) -> Result<Option<Recommendation>, StoreError> {
        Ok(self.load(user).await?.remove(contact))
    }

    async fn put(
        &self,
        user: &str,
        recommendation: &Recommendation,
    ) -> Result<WriteOutcome, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut records = self.load(user).await?;

        if let Some(existing) = records.get(&recommendation.contact) {
            if existing.generated_at > recommendation.generated_at {
                debug!(
                    "Dropping recommendation for {:?}: stored record is newer",
                    recommendation.contact
                );
                return Ok(WriteOutcome::Superseded);
            }
        }

        records.insert(recommendation.contact.clone(), recommendation.clone());
        storage::write_json(&storage::user_file(&self.dir, user), &records).await?;
        Ok(WriteOutcome::Written)
    }

    async fn list(&self, user: &str) -> Result<Vec<Recommendation>, StoreError> {
        Ok(self.load(user).await?.into_values().collect())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// PostgreSQL backend
// ────────────────────────────────────────────────────────────────────────────

pub struct PgRecommendationStore {
    pool: PgPool,
}

impl PgRecommendationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecommendationStore for PgRecommendationStore {
    async fn get(&self, user: &str, contact: &str) -> Result<Option<Recommendation>, StoreError> {
        let row: Option<RecommendationRow> = sqlx::query_as(
            r#"
            SELECT contact, message, urgency, rationale, generated_at, model
            FROM followup_recommendations
            WHERE user_id = $1 AND contact = $2
            "#,
        )
        .bind(user)
        .bind(contact)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Recommendation::try_from).transpose()
    }

    async fn put(
        &self,
        user: &str,
        recommendation: &Recommendation,
    ) -> Result<WriteOutcome, StoreError> {
        // The WHERE clause on the conflict branch makes the upsert a no-op when the
        // stored row is newer; rows_affected is then 0.
        let result = sqlx::query(
            r#"
            INSERT INTO followup_recommendations
                (user_id, contact, message, urgency, rationale, generated_at, model)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (user_id, contact) DO UPDATE SET
                message = EXCLUDED.message,
                urgency = EXCLUDED.urgency,
                rationale = EXCLUDED.rationale,
                generated_at = EXCLUDED.generated_at,
                model = EXCLUDED.model
            WHERE followup_recommendations.generated_at <= EXCLUDED.generated_at
            "#,
        )
        .bind(user)
        .bind(&recommendation.contact)
        .bind(&recommendation.message)
        .bind(i16::from(recommendation.urgency))
        .bind(&recommendation.rationale)
        .bind(recommendation.generated_at)
        .bind(&recommendation.model)
        .execute(&self.pool)
        .await?;

        Ok(if result.rows_affected() == 0 {
            WriteOutcome::Superseded
        } else {
            WriteOutcome::Written
        })
    }

    async fn list(&self, user: &str) -> Result<Vec<Recommendation>, StoreError> {
        let rows: Vec<RecommendationRow> = sqlx::query_as(
            r#"
            SELECT contact, message, urgency, rationale, generated_at, model
            FROM followup_recommendations
            WHERE user_id = $1
            ORDER BY contact ASC
            "#,
        )
        .bind(user)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Recommendation::try_from).collect()
    }
}
