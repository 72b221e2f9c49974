use std::sync::Arc;

use crate::config::Config;
use crate::conversations::store::ConversationStore;
use crate::followups::orchestrator::RefreshOrchestrator;
use crate::followups::store::RecommendationStore;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub conversations: Arc<ConversationStore>,
    pub recommendations: Arc<dyn RecommendationStore>,
    /// `None` when no model credential is configured; stored data is still served.
    pub refresher: Option<Arc<RefreshOrchestrator>>,
    pub config: Config,
}
