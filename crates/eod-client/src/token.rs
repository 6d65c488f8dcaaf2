//! Access-token lifecycle.
//!
//! Either a fixed bearer token, or an API key/secret plus refresh token that
//! is exchanged at `{base}/token` whenever the cached access token is close
//! to expiry. Refresh tokens rotate: each exchange may return a new one.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info};
use url::Url;

use crate::error::{Error, Result};
use crate::types::TokenResponse;

/// Refresh this long before the platform says the token expires.
const REFRESH_BUFFER_SECS: i64 = 5 * 60;

/// Assumed lifetime when the token endpoint does not report one.
const DEFAULT_LIFETIME_SECS: u64 = 4 * 60 * 60;

/// How the client authenticates.
#[derive(Clone)]
pub enum Credentials {
    /// Use this bearer token as-is, never refresh.
    Static(String),
    /// Exchange a refresh token using the API key and secret.
    Refresh {
        api_key: String,
        api_secret: String,
        refresh_token: String,
    },
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credentials::Static(_) => f.write_str("Credentials::Static(..)"),
            Credentials::Refresh { api_key, .. } => f
                .debug_struct("Credentials::Refresh")
                .field("api_key", api_key)
                .finish_non_exhaustive(),
        }
    }
}

#[derive(Clone)]
struct CachedToken {
    access_token: String,
    refresh_token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at - ChronoDuration::seconds(REFRESH_BUFFER_SECS)
    }
}

/// Hands out valid access tokens, refreshing as needed.
pub struct TokenManager {
    http: reqwest::Client,
    token_url: Url,
    credentials: Credentials,
    cached: RwLock<Option<CachedToken>>,
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("token_url", &self.token_url.as_str())
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}

impl TokenManager {
    pub fn new(http: reqwest::Client, token_url: Url, credentials: Credentials) -> Self {
        Self {
            http,
            token_url,
            credentials,
            cached: RwLock::new(None),
        }
    }

    /// A token valid for at least the refresh buffer.
    pub async fn access_token(&self) -> Result<String> {
        let (api_key, api_secret, initial_refresh) = match &self.credentials {
            Credentials::Static(token) => return Ok(token.clone()),
            Credentials::Refresh {
                api_key,
                api_secret,
                refresh_token,
            } => (api_key, api_secret, refresh_token),
        };

        {
            let cache = self.cached.read().await;
            if let Some(token) = cache.as_ref().filter(|t| !t.is_expired(Utc::now())) {
                return Ok(token.access_token.clone());
            }
        }

        let mut cache = self.cached.write().await;
        // Another caller may have refreshed while we waited for the lock.
        if let Some(token) = cache.as_ref().filter(|t| !t.is_expired(Utc::now())) {
            return Ok(token.access_token.clone());
        }

        let refresh_token = cache
            .as_ref()
            .map(|t| t.refresh_token.clone())
            .unwrap_or_else(|| initial_refresh.clone());
        debug!(url = %self.token_url, "Refreshing access token");

        let response = self
            .http
            .post(self.token_url.clone())
            .basic_auth(api_key, Some(api_secret))
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token.as_str()),
                ("scope", "PRODUCTION"),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Auth(format!(
                "token refresh returned {}: {}",
                status.as_u16(),
                body.trim()
            )));
        }

        let tokens: TokenResponse = response.json().await?;
        let lifetime = tokens.expires_in.unwrap_or(DEFAULT_LIFETIME_SECS);
        let fresh = CachedToken {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token.unwrap_or(refresh_token),
            expires_at: Utc::now() + ChronoDuration::seconds(lifetime as i64),
        };
        info!(expires_in = lifetime, "Access token refreshed");

        let access = fresh.access_token.clone();
        *cache = Some(fresh);
        Ok(access)
    }

    /// Treat the cached access token as expired so the next call refreshes.
    /// The latest refresh token is kept.
    pub async fn invalidate(&self) {
        if let Some(token) = self.cached.write().await.as_mut() {
            debug!("Discarding rejected access token");
            token.expires_at = Utc::now();
        }
    }
}
