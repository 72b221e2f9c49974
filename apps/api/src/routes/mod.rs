pub mod health;

use axum::{
    routing::{get, post},
    Router,
};

use crate::conversations::handlers as conversations;
use crate::followups::handlers as followups;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Conversation log
        .route(
            "/api/v1/conversations",
            get(conversations::handle_list_contacts).post(conversations::handle_add_entry),
        )
        // Follow-ups
        .route("/api/v1/dashboard", get(followups::handle_dashboard))
        .route(
            "/api/v1/recommendations",
            get(followups::handle_list_recommendations),
        )
        .route(
            "/api/v1/recommendations/refresh",
            post(followups::handle_force_refresh),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::config::Config;
    use crate::conversations::store::ConversationStore;
    use crate::followups::generator::{
        FollowupDraft, FollowupError, FollowupGenerator, FollowupRequest,
    };
    use crate::followups::orchestrator::RefreshOrchestrator;
    use crate::followups::store::FileRecommendationStore;

    #[derive(Default)]
    struct CountingGenerator {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl FollowupGenerator for CountingGenerator {
        fn model(&self) -> &str {
            "counting-model"
        }

        async fn generate(
            &self,
            request: FollowupRequest<'_>,
        ) -> Result<FollowupDraft, FollowupError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(FollowupDraft {
                message: format!("Say hi to {}", request.contact),
                urgency: request.contact.len().min(10) as u8,
                rationale: None,
            })
        }
    }

    fn test_state(dir: &Path, generator: Option<Arc<CountingGenerator>>) -> AppState {
        let config = Config::from_lookup(|key| match key {
            "REFRESH_WAIT_MS" => Some("5000".to_string()),
            _ => None,
        })
        .unwrap();
        let conversations = Arc::new(ConversationStore::new(dir.join("userdata")));
        let recommendations = Arc::new(FileRecommendationStore::new(dir.join("recs")));
        let refresher = generator.map(|g| {
            Arc::new(RefreshOrchestrator::new(
                conversations.clone(),
                recommendations.clone(),
                g,
                config.refresh_interval,
            ))
        });
        AppState {
            conversations,
            recommendations,
            refresher,
            config,
        }
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(test_state(dir.path(), None));
        let (status, body) = send(&app, get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_logged_conversation_shows_up_in_contact_list() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(test_state(dir.path(), None));

        let (status, body) = send(
            &app,
            post_json(
                "/api/v1/conversations",
                json!({"user": "Alice@Example.com", "contact": " Bob ", "summary": "Coffee"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["contact"], "Bob");
        assert_eq!(body["entry"]["entry_type"], "conversation");

        let (status, body) = send(&app, get("/api/v1/conversations?user=alice@example.com")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["contacts"], json!(["Bob"]));
    }

    #[tokio::test]
    async fn test_invalid_entry_is_rejected_with_all_problems() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(test_state(dir.path(), None));
        let (status, body) = send(
            &app,
            post_json(
                "/api/v1/conversations",
                json!({"user": "alice", "contact": "", "summary": ""}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
        let message = body["error"]["message"].as_str().unwrap();
        assert!(message.contains("contact") && message.contains("summary"));
    }

    #[tokio::test]
    async fn test_missing_user_is_unauthorized() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(test_state(dir.path(), None));
        let (status, body) = send(&app, get("/api/v1/recommendations")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], "UNAUTHORIZED");
    }

    #[tokio::test]
    async fn test_dashboard_without_credentials_serves_stored_data() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path(), None);
        state
            .conversations
            .add_entry("alice", "Bob", "Coffee", Default::default())
            .await
            .unwrap();
        let app = build_router(state);

        let (status, body) = send(&app, get("/api/v1/dashboard?user=alice")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["selected_contact"], "Bob");
        assert_eq!(body["history"].as_array().unwrap().len(), 1);
        assert!(body["recommendation"].is_null());
        assert_eq!(body["refresh_enabled"], false);

        let (status, _) = send(&app, get("/api/v1/dashboard?user=alice&contact=Zed")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = send(
            &app,
            post_json("/api/v1/recommendations/refresh", json!({"user": "alice"})),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"]["code"], "REFRESH_DISABLED");
    }

    #[tokio::test]
    async fn test_recommendations_are_generated_once_and_sorted_by_urgency() {
        let dir = tempfile::tempdir().unwrap();
        let generator = Arc::new(CountingGenerator::default());
        let state = test_state(dir.path(), Some(generator.clone()));
        for contact in ["Al", "Beatrice", "Cy"] {
            state
                .conversations
                .add_entry("alice", contact, "caught up", Default::default())
                .await
                .unwrap();
        }
        let app = build_router(state);

        let (status, body) = send(&app, get("/api/v1/recommendations?user=alice")).await;
        assert_eq!(status, StatusCode::OK);
        let contacts: Vec<&str> = body["recommendations"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["contact"].as_str().unwrap())
            .collect();
        assert_eq!(contacts, vec!["Beatrice", "Al", "Cy"]);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 3);

        let _ = send(&app, get("/api/v1/dashboard?user=alice")).await;
        assert_eq!(generator.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_forced_refresh_returns_report() {
        let dir = tempfile::tempdir().unwrap();
        let generator = Arc::new(CountingGenerator::default());
        let state = test_state(dir.path(), Some(generator.clone()));
        state
            .conversations
            .add_entry("alice", "Bob", "Coffee", Default::default())
            .await
            .unwrap();
        let app = build_router(state);

        for _ in 0..2 {
            let (status, body) = send(
                &app,
                post_json("/api/v1/recommendations/refresh", json!({"user": "alice"})),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["contacts"][0]["status"], "regenerated");
        }
        assert_eq!(generator.calls.load(Ordering::SeqCst), 2);
    }
}
