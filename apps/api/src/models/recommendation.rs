use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::storage::StoreError;

pub const URGENCY_MIN: u8 = 1;
pub const URGENCY_MAX: u8 = 10;

/// The live follow-up suggestion for one (user, contact) pair.
/// Regeneration replaces the whole record; no history is kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendation {
    pub contact: String,
    pub message: String,
    pub urgency: u8,
    #[serde(default)]
    pub rationale: Option<String>,
    pub generated_at: DateTime<Utc>,
    pub model: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct RecommendationRow {
    pub contact: String,
    pub message: String,
    pub urgency: i16,
    pub rationale: Option<String>,
    pub generated_at: DateTime<Utc>,
    pub model: String,
}

impl TryFrom<RecommendationRow> for Recommendation {
    type Error = StoreError;

    /// Rejects rows whose urgency falls outside the valid range instead of rewriting them.
    fn try_from(row: RecommendationRow) -> Result<Self, Self::Error> {
        let urgency = u8::try_from(row.urgency)
            .ok()
            .filter(|u| (URGENCY_MIN..=URGENCY_MAX).contains(u))
            .ok_or_else(|| StoreError::InvalidRecord {
                contact: row.contact.clone(),
                urgency: row.urgency,
            })?;

        Ok(Recommendation {
            contact: row.contact,
            message: row.message,
            urgency,
            rationale: row.rationale,
            generated_at: row.generated_at,
            model: row.model,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(urgency: i16) -> RecommendationRow {
        RecommendationRow {
            contact: "Bob".into(),
            message: "Ask about the trip".into(),
            urgency,
            rationale: None,
            generated_at: Utc::now(),
            model: "gpt-4o-2024-08-06".into(),
        }
    }

    #[test]
    fn test_row_in_range_converts() {
        let rec = Recommendation::try_from(row(10)).unwrap();
        assert_eq!(rec.urgency, 10);
        assert_eq!(rec.contact, "Bob");
    }

    #[test]
    fn test_row_out_of_range_is_rejected_not_clamped() {
        for urgency in [0, 11, -4, 300] {
            assert!(
                matches!(
                    Recommendation::try_from(row(urgency)),
                    Err(StoreError::InvalidRecord { urgency: u, .. }) if u == urgency
                ),
                "urgency {urgency} should be rejected"
            );
        }
    }
}
