//! Environment configuration
//!
//! Everything is read once at startup. Missing model or storage settings do
//! not stop the process; the corresponding routes answer "service unavailable".

use std::collections::HashMap;

pub const DEFAULT_LOCATION: &str = "us-central1";
pub const DEFAULT_MODEL: &str = "gemini-1.5-pro";
pub const DEFAULT_ALLOWED_ORIGIN: &str = "http://localhost:3000";
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_MAX_CONCURRENT_GENERATIONS: usize = 16;
pub const DEFAULT_METADATA_HOST: &str = "metadata.google.internal";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub project_id: Option<String>,
    pub location: String,
    pub model: String,
    pub project_number: Option<String>,
    pub signing_service_account: Option<String>,
    pub upload_bucket: Option<String>,
    pub allowed_origins: Vec<String>,
    pub host: String,
    pub port: u16,
    pub max_concurrent_generations: usize,
    pub static_access_token: Option<String>,
    pub metadata_host: String,
}

impl AppConfig {
    /// Reads the configuration from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_vars(&std::env::vars().collect())
    }

    /// Builds the configuration from an explicit variable map.
    #[must_use]
    pub fn from_vars(vars: &HashMap<String, String>) -> Self {
        let get = |key: &str| {
            vars.get(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let port = get("PORT").and_then(|p| match p.parse() {
            Ok(port) => Some(port),
            Err(e) => {
                tracing::warn!("Ignoring invalid PORT {:?}: {}", p, e);
                None
            }
        });

        let max_concurrent_generations = get("MAX_CONCURRENT_GENERATIONS")
            .and_then(|n| n.parse::<usize>().ok())
            .filter(|n| *n > 0);

        let allowed_origins = get("ALLOWED_ORIGINS").map_or_else(
            || vec![DEFAULT_ALLOWED_ORIGIN.to_string()],
            |origins| parse_origins(&origins),
        );

        Self {
            project_id: get("GCLOUD_PROJECT"),
            location: get("GCLOUD_LOCATION").unwrap_or_else(|| DEFAULT_LOCATION.to_string()),
            model: get("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            project_number: get("GCLOUD_PROJECT_NUMBER"),
            signing_service_account: get("SIGNING_SERVICE_ACCOUNT"),
            upload_bucket: get("UPLOAD_BUCKET"),
            allowed_origins,
            host: get("HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: port.unwrap_or(DEFAULT_PORT),
            max_concurrent_generations: max_concurrent_generations.unwrap_or(DEFAULT_MAX_CONCURRENT_GENERATIONS),
            static_access_token: get("GOOGLE_OAUTH_ACCESS_TOKEN"),
            metadata_host: get("GCE_METADATA_HOST").unwrap_or_else(|| DEFAULT_METADATA_HOST.to_string()),
        }
    }

    #[must_use]
    pub const fn model_configured(&self) -> bool {
        self.project_id.is_some()
    }

    /// Service account that signs upload URLs: explicit, or the default
    /// compute identity derived from the project number.
    #[must_use]
    pub fn signing_identity(&self) -> Option<String> {
        self.signing_service_account.clone().or_else(|| {
            self.project_number
                .as_ref()
                .map(|n| format!("{n}-compute@developer.gserviceaccount.com"))
        })
    }

    /// Bucket for direct uploads: explicit, or derived from the project.
    #[must_use]
    pub fn upload_bucket(&self) -> Option<String> {
        self.upload_bucket
            .clone()
            .or_else(|| self.project_id.as_ref().map(|p| format!("{p}-persona-uploads")))
    }
}

fn parse_origins(origins: &str) -> Vec<String> {
    origins
        .split(',')
        .map(|o| o.trim().trim_end_matches('/').to_string())
        .filter(|o| !o.is_empty())
        .collect()
}
