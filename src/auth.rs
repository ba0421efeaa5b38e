//! Google OAuth access tokens for the model endpoint and the IAM signing API
//!
//! Tokens come either from a static value (local development) or from the
//! instance metadata server, and are cached until shortly before they expire.

use moka::sync::Cache;
use moka::Expiry;
use serde::Deserialize;
use std::time::{Duration, Instant};

const METADATA_TOKEN_PATH: &str = "/computeMetadata/v1/instance/service-accounts/default/token";
const CACHE_KEY: &str = "default";
/// Refresh this long before the server-reported expiry.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    lifetime: Duration,
}

struct TokenExpiry;

impl Expiry<&'static str, CachedToken> for TokenExpiry {
    fn expire_after_create(
        &self,
        _key: &&'static str,
        value: &CachedToken,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.lifetime)
    }
}

#[derive(Debug, Deserialize)]
struct MetadataToken {
    access_token: String,
    expires_in: u64,
}

/// Shared, read-only provider of bearer tokens.
pub struct GoogleAuth {
    http: reqwest::Client,
    static_token: Option<String>,
    metadata_host: String,
    cache: Cache<&'static str, CachedToken>,
}

impl GoogleAuth {
    #[must_use]
    pub fn new(
        http: reqwest::Client,
        static_token: Option<String>,
        metadata_host: impl Into<String>,
    ) -> Self {
        Self {
            http,
            static_token: static_token.filter(|t| !t.trim().is_empty()),
            metadata_host: metadata_host.into(),
            cache: Cache::builder().max_capacity(1).expire_after(TokenExpiry).build(),
        }
    }

    /// Returns a bearer token, fetching a fresh one from the metadata server when needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the metadata server is unreachable or answers with an error.
    pub async fn access_token(&self) -> Result<String, String> {
        if let Some(token) = &self.static_token {
            return Ok(token.clone());
        }

        if let Some(cached) = self.cache.get(&CACHE_KEY) {
            return Ok(cached.token);
        }

        let fetched = self.fetch_metadata_token().await?;
        let lifetime = Duration::from_secs(fetched.expires_in).saturating_sub(EXPIRY_MARGIN);
        tracing::debug!("Fetched access token from metadata server, valid for {:?}", lifetime);

        if !lifetime.is_zero() {
            self.cache.insert(
                CACHE_KEY,
                CachedToken {
                    token: fetched.access_token.clone(),
                    lifetime,
                },
            );
        }

        Ok(fetched.access_token)
    }

    async fn fetch_metadata_token(&self) -> Result<MetadataToken, String> {
        let url = format!("http://{}{}", self.metadata_host, METADATA_TOKEN_PATH);

        let response = self
            .http
            .get(url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|e| format!("Failed to obtain credentials from metadata server: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(format!("Metadata server returned {status}: {body}"));
        }

        response
            .json::<MetadataToken>()
            .await
            .map_err(|e| format!("Failed to parse metadata token: {e}"))
    }
}
