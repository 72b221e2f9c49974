mod config;
mod conversations;
mod db;
mod errors;
mod followups;
mod llm_client;
mod models;
mod routes;
mod state;
mod storage;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{Config, S3Setting};
use crate::conversations::store::ConversationStore;
use crate::conversations::sync::S3RemoteStore;
use crate::followups::generator::LlmFollowupGenerator;
use crate::followups::orchestrator::{RefreshMode, RefreshOrchestrator};
use crate::followups::store::{FileRecommendationStore, PgRecommendationStore, RecommendationStore};
use crate::llm_client::LlmClient;
use crate::models::user::UserId;
use crate::routes::build_router;
use crate::state::AppState;

#[derive(Parser)]
#[command(name = "writeback", version, about = "Follow-up reminders for the people you talk to")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API (default)
    Serve,
    /// Generate the follow-up for a single contact and print it
    Followup {
        user: String,
        contact: String,
        /// Override FOLLOWUP_MODEL for this run
        #[arg(long)]
        model: Option<String>,
        /// Regenerate even if the stored recommendation is fresh
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Followup {
            user,
            contact,
            model,
            force,
        } => followup(config, &user, &contact, model, force).await,
    }
}

async fn serve(config: Config) -> Result<()> {
    info!("Starting WriteBack API v{}", env!("CARGO_PKG_VERSION"));

    let conversations = Arc::new(build_conversation_store(&config).await);
    let recommendations = build_recommendation_store(&config).await?;
    let refresher = build_refresher(
        &config,
        config.followup_model.clone(),
        conversations.clone(),
        recommendations.clone(),
    )?;

    let state = AppState {
        conversations,
        recommendations,
        refresher,
        config: config.clone(),
    };

    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Single-contact run for testing prompts and models from a shell.
async fn followup(
    config: Config,
    user: &str,
    contact: &str,
    model: Option<String>,
    force: bool,
) -> Result<()> {
    let user = UserId::parse(user).context("user must not be blank")?;
    let contact = contact.trim();
    if contact.is_empty() {
        bail!("contact must not be blank");
    }

    let conversations = Arc::new(build_conversation_store(&config).await);
    let recommendations = build_recommendation_store(&config).await?;
    let model = model.unwrap_or_else(|| config.followup_model.clone());
    let Some(refresher) =
        build_refresher(&config, model, conversations, recommendations.clone())?
    else {
        bail!("OPENAI_API_KEY is not set; cannot generate follow-ups");
    };

    let mode = if force {
        RefreshMode::Force
    } else {
        RefreshMode::IfStale
    };
    let outcome = refresher
        .refresh_contact(user.as_str(), contact, mode)
        .await?;
    let recommendation = recommendations.get(user.as_str(), contact).await?;

    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "user": user,
            "contact": contact,
            "outcome": outcome,
            "recommendation": recommendation,
        }))?
    );
    Ok(())
}

async fn build_conversation_store(config: &Config) -> ConversationStore {
    let store = ConversationStore::new(&config.user_data_dir);
    match &config.s3 {
        S3Setting::Disabled => {
            info!("Conversation sync disabled; using {:?}", config.user_data_dir);
            store
        }
        S3Setting::Invalid(issues) => {
            warn!(
                "USE_S3 is set but the configuration is unusable ({}); keeping conversations local",
                issues.join(", ")
            );
            store
        }
        S3Setting::Enabled(s3) => {
            let remote = S3RemoteStore::connect(s3).await;
            info!(
                "Conversation sync enabled: bucket={} prefix={}",
                s3.bucket, s3.prefix
            );
            store.with_remote(Arc::new(remote), s3.prefix.clone())
        }
    }
}

async fn build_recommendation_store(config: &Config) -> Result<Arc<dyn RecommendationStore>> {
    match &config.database_url {
        Some(url) => {
            let pool = db::create_pool(url).await?;
            db::ensure_schema(&pool).await?;
            info!("Recommendations stored in PostgreSQL");
            Ok(Arc::new(PgRecommendationStore::new(pool)))
        }
        None => {
            info!(
                "Recommendations stored under {:?}",
                config.recommendations_dir
            );
            Ok(Arc::new(FileRecommendationStore::new(
                &config.recommendations_dir,
            )))
        }
    }
}

/// Returns `None` when no API key is configured.
fn build_refresher(
    config: &Config,
    model: String,
    conversations: Arc<ConversationStore>,
    recommendations: Arc<dyn RecommendationStore>,
) -> Result<Option<Arc<RefreshOrchestrator>>> {
    let Some(api_key) = config.openai_api_key.clone() else {
        warn!("OPENAI_API_KEY is not set; follow-up refresh is disabled");
        return Ok(None);
    };

    let llm = LlmClient::new(api_key, &config.openai_base_url, config.llm_timeout)
        .context("building the language-model HTTP client")?;
    info!(
        "Follow-up refresh enabled (model: {model}, interval: {}h)",
        config.refresh_interval.as_duration().num_minutes() as f64 / 60.0
    );

    let generator = Arc::new(LlmFollowupGenerator::new(llm, model));
    Ok(Some(Arc::new(RefreshOrchestrator::new(
        conversations,
        recommendations,
        generator,
        config.refresh_interval,
    ))))
}
