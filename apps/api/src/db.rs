use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

/// Creates and returns a PostgreSQL connection pool.
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    info!("Connecting to PostgreSQL...");

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .context("connecting to DATABASE_URL")?;

    info!("PostgreSQL connection pool established");
    Ok(pool)
}

/// Creates the recommendation table if it does not exist yet.
pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS followup_recommendations (
            user_id      TEXT        NOT NULL,
            contact      TEXT        NOT NULL,
            message      TEXT        NOT NULL,
            urgency      SMALLINT    NOT NULL CHECK (urgency BETWEEN 1 AND 10),
            rationale    TEXT,
            generated_at TIMESTAMPTZ NOT NULL,
            model        TEXT        NOT NULL,
            PRIMARY KEY (user_id, contact)
        )
        "#,
    )
    .execute(pool)
    .await
    .context("creating followup_recommendations")?;

    Ok(())
}
