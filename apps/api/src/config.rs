use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::followups::staleness::RefreshInterval;

pub const DEFAULT_MODEL: &str = "gpt-4o-2024-08-06";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_S3_PREFIX: &str = "writebackreminder";

/// Fragments that mark a credential as a copy-pasted placeholder rather than a real value.
const PLACEHOLDER_TOKENS: [&str; 9] = [
    "changeme", "replace", "example", "dummy", "sample", "todo", "your-", "your_", "....",
];

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub rust_log: String,
    /// `None` disables recommendation refresh entirely.
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub followup_model: String,
    pub refresh_interval: RefreshInterval,
    pub llm_timeout: Duration,
    /// How long a page request waits on its background refresh before responding.
    pub refresh_wait: Duration,
    pub user_data_dir: PathBuf,
    pub recommendations_dir: PathBuf,
    pub database_url: Option<String>,
    pub s3: S3Setting,
}

/// Remote conversation sync, resolved from `USE_S3` and the AWS variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum S3Setting {
    Disabled,
    Enabled(S3Config),
    /// `USE_S3` was set but the credentials are unusable; each entry names one problem.
    Invalid(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Config {
    pub bucket: String,
    pub endpoint: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub prefix: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let refresh_hours = match var("FOLLOWUP_REFRESH_HOURS") {
            Some(raw) => raw
                .parse::<f64>()
                .context("FOLLOWUP_REFRESH_HOURS must be a number of hours")?,
            None => 24.0,
        };

        Ok(Config {
            port: var("PORT")
                .unwrap_or_else(|| "8080".to_string())
                .parse::<u16>()
                .context("PORT must be a valid port number")?,
            rust_log: var("RUST_LOG").unwrap_or_else(|| "info".to_string()),
            openai_api_key: var("OPENAI_API_KEY"),
            openai_base_url: var("OPENAI_BASE_URL")
                .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
            followup_model: var("FOLLOWUP_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            refresh_interval: RefreshInterval::from_hours(refresh_hours),
            llm_timeout: Duration::from_secs(
                var("LLM_TIMEOUT_SECS")
                    .unwrap_or_else(|| "60".to_string())
                    .parse::<u64>()
                    .context("LLM_TIMEOUT_SECS must be a whole number of seconds")?,
            ),
            refresh_wait: Duration::from_millis(
                var("REFRESH_WAIT_MS")
                    .unwrap_or_else(|| "2000".to_string())
                    .parse::<u64>()
                    .context("REFRESH_WAIT_MS must be a whole number of milliseconds")?,
            ),
            user_data_dir: PathBuf::from(var("USER_DATA_DIR").unwrap_or_else(|| "userdata".into())),
            recommendations_dir: PathBuf::from(
                var("RECOMMENDATIONS_DIR").unwrap_or_else(|| "userdata/recommendations".into()),
            ),
            database_url: var("DATABASE_URL"),
            s3: resolve_s3(&var),
        })
    }
}

fn resolve_s3(var: &dyn Fn(&str) -> Option<String>) -> S3Setting {
    let use_s3 = var("USE_S3")
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false);
    if !use_s3 {
        return S3Setting::Disabled;
    }

    let mut issues = Vec::new();
    for key in [
        "AWS_ACCESS_KEY_ID",
        "AWS_SECRET_ACCESS_KEY",
        "AWS_ENDPOINT_URL_S3",
        "BUCKET_NAME",
    ] {
        let Some(value) = var(key) else {
            issues.push(format!("{key}: missing value"));
            continue;
        };

        if key == "AWS_ENDPOINT_URL_S3" {
            if !value.contains("://") {
                issues.push(format!(
                    "{key}: endpoint URL must include a scheme like https://"
                ));
            }
            continue;
        }

        let lowered = value.to_lowercase();
        if PLACEHOLDER_TOKENS.iter().any(|t| lowered.contains(t)) {
            // Only a short prefix is echoed so a real secret never reaches the logs.
            let preview: String = value.chars().take(6).collect();
            issues.push(format!(
                "{key}: value looks like a placeholder (starts with '{preview}')"
            ));
        }
    }

    if !issues.is_empty() {
        return S3Setting::Invalid(issues);
    }

    S3Setting::Enabled(S3Config {
        bucket: var("BUCKET_NAME").unwrap_or_default(),
        endpoint: var("AWS_ENDPOINT_URL_S3").unwrap_or_default(),
        region: var("AWS_REGION").unwrap_or_else(|| "auto".to_string()),
        access_key_id: var("AWS_ACCESS_KEY_ID").unwrap_or_default(),
        secret_access_key: var("AWS_SECRET_ACCESS_KEY").unwrap_or_default(),
        prefix: var("S3_PREFIX")
            .map(|p| p.trim_matches('/').to_string())
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| DEFAULT_S3_PREFIX.to_string()),
    })
}
