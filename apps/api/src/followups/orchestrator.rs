//! Refresh orchestrator: regenerates stale follow-up recommendations for one user.
//!
//! Flow per contact: history → stored record → staleness check → model call →
//! conditional write. A failed model call is recorded in the report and the run
//! moves on; only a store failure aborts the run.
//!
//! Runs for the same user serialize on a per-user lock inside this process, so a
//! second run observes the timestamps the first one wrote and skips those contacts.
//! Separate processes still race; the store's conditional write keeps timestamps
//! monotonic and the newest record wins.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::conversations::store::ConversationStore;
use crate::followups::generator::{FollowupError, FollowupGenerator, FollowupRequest};
use crate::followups::staleness::{is_stale, RefreshInterval};
use crate::followups::store::{RecommendationStore, WriteOutcome};
use crate::models::recommendation::Recommendation;
use crate::storage::StoreError;

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    #[error("Refresh task aborted: {0}")]
    Aborted(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshMode {
    /// Only contacts whose record is missing or older than the refresh interval.
    IfStale,
    /// Every contact with history, regardless of age.
    Force,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    UpstreamUnavailable,
    MalformedResponse,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ContactOutcome {
    Regenerated { urgency: u8 },
    SkippedFresh,
    /// The model answered but a newer record was written meanwhile.
    Superseded,
    /// The contact has no logged entries; nothing is generated.
    NoHistory,
    Failed { reason: FailureKind, detail: String },
}

impl From<FollowupError> for ContactOutcome {
    fn from(e: FollowupError) -> Self {
        match e {
            FollowupError::UpstreamUnavailable(detail) => ContactOutcome::Failed {
                reason: FailureKind::UpstreamUnavailable,
                detail,
            },
            FollowupError::MalformedResponse(detail) => ContactOutcome::Failed {
                reason: FailureKind::MalformedResponse,
                detail,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ContactReport {
    pub contact: String,
    #[serde(flatten)]
    pub outcome: ContactOutcome,
}

/// Per-contact outcome of one refresh run.
#[derive(Debug, Clone, Serialize)]
pub struct RefreshReport {
    pub user: String,
    pub contacts: Vec<ContactReport>,
}

impl RefreshReport {
    pub fn outcome_for(&self, contact: &str) -> Option<&ContactOutcome> {
        self.contacts
            .iter()
            .find(|c| c.contact == contact)
            .map(|c| &c.outcome)
    }

    pub fn regenerated(&self) -> usize {
        self.count(|o| matches!(o, ContactOutcome::Regenerated { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, ContactOutcome::SkippedFresh))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, ContactOutcome::Failed { .. }))
    }

    fn count(&self, pred: impl Fn(&ContactOutcome) -> bool) -> usize {
        self.contacts.iter().filter(|c| pred(&c.outcome)).count()
    }
}

pub struct RefreshOrchestrator {
    conversations: Arc<ConversationStore>,
    recommendations: Arc<dyn RecommendationStore>,
    generator: Arc<dyn FollowupGenerator>,
    interval: RefreshInterval,
    user_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl RefreshOrchestrator {
    pub fn new(
        conversations: Arc<ConversationStore>,
        recommendations: Arc<dyn RecommendationStore>,
        generator: Arc<dyn FollowupGenerator>,
        interval: RefreshInterval,
    ) -> Self {
        Self {
            conversations,
            recommendations,
            generator,
            interval,
            user_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn model(&self) -> &str {
        self.generator.model()
    }

    /// True while a refresh run for `user` holds the user's lock.
    pub fn is_refreshing(&self, user: &str) -> bool {
        let lock = {
            let locks = self.user_locks.lock().unwrap_or_else(|p| p.into_inner());
            locks.get(user).cloned()
        };
        match lock {
            Some(lock) => lock.try_lock().is_err(),
            None => false,
        }
    }

    /// Refreshes every contact of `user` that has at least one conversation entry.
    pub async fn refresh(
        &self,
        user: &str,
        mode: RefreshMode,
    ) -> Result<RefreshReport, RefreshError> {
        let lease = self.lease(user);
        let _guard = lease.lock.lock().await;

        let contacts = self.conversations.list_contacts(user).await?;
        let mut report = RefreshReport {
            user: user.to_string(),
            contacts: Vec::with_capacity(contacts.len()),
        };

        for contact in contacts {
            let outcome = self.refresh_locked(user, &contact, mode).await?;
            report.contacts.push(ContactReport { contact, outcome });
        }

        info!(
            "Follow-up refresh for {}: {} regenerated, {} fresh, {} failed",
            user,
            report.regenerated(),
            report.skipped(),
            report.failed()
        );
        Ok(report)
    }

    /// Refreshes a single contact. Used by the command-line entry point.
    pub async fn refresh_contact(
        &self,
        user: &str,
        contact: &str,
        mode: RefreshMode,
    ) -> Result<ContactOutcome, RefreshError> {
        let lease = self.lease(user);
        let _guard = lease.lock.lock().await;
        self.refresh_locked(user, contact, mode).await
    }

    async fn refresh_locked(
        &self,
        user: &str,
        contact: &str,
        mode: RefreshMode,
    ) -> Result<ContactOutcome, RefreshError> {
        let history = self.conversations.history(user, contact).await?;
        if history.is_empty() {
            return Ok(ContactOutcome::NoHistory);
        }

        let existing = self.recommendations.get(user, contact).await?;
        if mode == RefreshMode::IfStale
            && !is_stale(
                existing.as_ref().map(|r| r.generated_at),
                self.interval,
                Utc::now(),
            )
        {
            debug!("Recommendation for {user}/{contact} is fresh, skipping");
            return Ok(ContactOutcome::SkippedFresh);
        }

        let request = FollowupRequest {
            user,
            contact,
            history: &history,
            now: Utc::now(),
        };
        let draft = match self.generator.generate(request).await {
            Ok(draft) => draft,
            Err(e) => {
                warn!("Failed to generate follow-up for user={user} contact={contact}: {e}");
                return Ok(e.into());
            }
        };

        let recommendation = Recommendation {
            contact: contact.to_string(),
            message: draft.message,
            urgency: draft.urgency,
            rationale: draft.rationale,
            generated_at: Utc::now(),
            model: self.generator.model().to_string(),
        };

        Ok(match self.recommendations.put(user, &recommendation).await? {
            WriteOutcome::Written => ContactOutcome::Regenerated {
                urgency: recommendation.urgency,
            },
            WriteOutcome::Superseded => ContactOutcome::Superseded,
        })
    }

    fn lease(&self, user: &str) -> UserLease<'_> {
        let mut locks = self.user_locks.lock().unwrap_or_else(|p| p.into_inner());
        UserLease {
            locks: &self.user_locks,
            user: user.to_string(),
            lock: locks.entry(user.to_string()).or_default().clone(),
        }
    }
}

/// Holder of a user's lock. The map entry is removed when the last holder drops,
/// so the map only contains users with a run queued or in progress.
struct UserLease<'a> {
    locks: &'a Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    user: String,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl Drop for UserLease<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
        // One reference in the map plus ours: nobody else is waiting.
        if Arc::strong_count(&self.lock) <= 2 {
            locks.remove(&self.user);
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Detached background runs
// ────────────────────────────────────────────────────────────────────────────

/// Handle to a refresh running on its own tokio task.
///
/// Dropping the handle does not cancel the run: the task finishes and persists its
/// results even after the request that started it has been answered.
pub struct RefreshHandle {
    user: String,
    task: JoinHandle<Result<RefreshReport, RefreshError>>,
}

/// Starts a refresh for `user` on a detached task.
pub fn spawn_refresh(
    orchestrator: Arc<RefreshOrchestrator>,
    user: String,
    mode: RefreshMode,
) -> RefreshHandle {
    let task_user = user.clone();
    let task = tokio::spawn(async move {
        let result = orchestrator.refresh(&task_user, mode).await;
        if let Err(e) = &result {
            error!("Follow-up refresh for {task_user} aborted: {e}");
        }
        result
    });
    RefreshHandle { user, task }
}

impl RefreshHandle {
    /// Waits for the run to finish.
    pub async fn join(self) -> Result<RefreshReport, RefreshError> {
        self.task
            .await
            .map_err(|e| RefreshError::Aborted(e.to_string()))?
    }

    /// Waits at most `grace`. Returns the report if the run finished in time; otherwise
    /// the run keeps going in the background and `None` is returned.
    pub async fn wait(mut self, grace: Duration) -> Option<RefreshReport> {
        match tokio::time::timeout(grace, &mut self.task).await {
            Ok(Ok(Ok(report))) => Some(report),
            Ok(Ok(Err(_))) => None,
            Ok(Err(e)) => {
                error!("Follow-up refresh task for {} failed: {e}", self.user);
                None
            }
            Err(_) => {
                debug!(
                    "Follow-up refresh for {} still running after {}ms, detaching",
                    self.user,
                    grace.as_millis()
                );
                None
            }
        }
    }
}
