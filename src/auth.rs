use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use reqwest::blocking::Client;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::GatewayError;

const DEFAULT_EXPIRES_IN: u64 = 3600;

#[derive(Debug, Clone)]
pub struct Config {
    pub client_id: String,
    pub client_secret: String,
    pub user_agent: String,
    pub token_url: String,
    pub refresh_skew: Duration,
    pub timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            user_agent: format!("subfeed/{}", crate::VERSION),
            token_url: "https://www.reddit.com/api/v1/access_token".into(),
            refresh_skew: Duration::from_secs(30),
            timeout: Duration::from_secs(8),
        }
    }
}

impl Config {
    fn has_credentials(&self) -> bool {
        !self.client_id.trim().is_empty() && !self.client_secret.trim().is_empty()
    }
}

/// Application-only bearer token. The secret stays inside the crate.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    token: String,
    expires_at: DateTime<Utc>,
}

impl AccessToken {
    pub(crate) fn new(token: String, expires_at: DateTime<Utc>) -> Self {
        Self { token, expires_at }
    }

    pub(crate) fn secret(&self) -> &str {
        &self.token
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn is_expired(&self, skew: Duration) -> bool {
        let skew = chrono::Duration::from_std(skew).unwrap_or_else(|_| chrono::Duration::zero());
        self.expires_at - skew <= Utc::now()
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Process-wide cache for the client-credentials token.
///
/// The refresh runs while the slot lock is held, so concurrent callers that
/// find the token missing or stale wait for that one exchange and share its
/// result instead of starting their own.
pub struct TokenCache {
    cfg: Config,
    client: Client,
    slot: Mutex<Option<AccessToken>>,
    exchanges: AtomicU64,
}

impl TokenCache {
    pub fn new(cfg: Config) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(cfg.timeout)
            .build()
            .map_err(|err| GatewayError::Transport(format!("build token client: {}", err)))?;
        Ok(Self {
            cfg,
            client,
            slot: Mutex::new(None),
            exchanges: AtomicU64::new(0),
        })
    }

    pub(crate) fn get_token(&self) -> Result<AccessToken, GatewayError> {
        let mut slot = self.slot.lock();
        if let Some(token) = slot.as_ref() {
            if !token.is_expired(self.cfg.refresh_skew) {
                return Ok(token.clone());
            }
            debug!(expires_at = %token.expires_at, "cached token expired");
        }
        let fresh = self.exchange()?;
        *slot = Some(fresh.clone());
        Ok(fresh)
    }

    /// Drops the cached token if it is still `stale`. A token that another
    /// caller already refreshed is left alone.
    pub(crate) fn invalidate(&self, stale: &AccessToken) {
        let mut slot = self.slot.lock();
        if slot.as_ref().is_some_and(|current| current.token == stale.token) {
            *slot = None;
        }
    }

    /// Number of token exchanges performed so far.
    pub fn exchange_count(&self) -> u64 {
        self.exchanges.load(Ordering::SeqCst)
    }

    fn exchange(&self) -> Result<AccessToken, GatewayError> {
        if !self.cfg.has_credentials() {
            return Err(GatewayError::Auth(
                "client credentials are not configured".into(),
            ));
        }
        self.exchanges.fetch_add(1, Ordering::SeqCst);

        let resp = self
            .client
            .post(&self.cfg.token_url)
            .basic_auth(&self.cfg.client_id, Some(self.cfg.client_secret.as_str()))
            .header(USER_AGENT, self.cfg.user_agent.clone())
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .form(&[("grant_type", "client_credentials")])
            .send()
            .map_err(|err| {
                if err.is_timeout() {
                    GatewayError::Timeout(format!("token request: {}", err))
                } else {
                    GatewayError::Auth(format!("token request: {}", err))
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            warn!(status = status.as_u16(), "token request rejected");
            if let Ok(err) = serde_json::from_str::<TokenError>(&body) {
                return Err(GatewayError::Auth(format!(
                    "token request failed: {} - {}",
                    status.as_u16(),
                    err
                )));
            }
            return Err(GatewayError::Auth(format!(
                "token request failed: {} - {}",
                status.as_u16(),
                body
            )));
        }

        let payload: TokenResponse = resp
            .json()
            .map_err(|err| GatewayError::Auth(format!("decode token response: {}", err)))?;
        if payload.access_token.trim().is_empty() {
            return Err(GatewayError::Auth("no access token received".into()));
        }

        let expires_in = if payload.expires_in == 0 {
            DEFAULT_EXPIRES_IN
        } else {
            payload.expires_in
        };
        let expires_at = Utc::now() + chrono::Duration::seconds(expires_in as i64);
        info!(expires_in, "obtained application token");

        Ok(AccessToken::new(payload.access_token, expires_at))
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct TokenError {
    #[serde(default)]
    error: String,
    #[serde(default, rename = "error_description")]
    description: String,
}

impl fmt::Display for TokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.error.is_empty() && self.description.is_empty() {
            return write!(f, "unknown token error");
        }
        if self.description.is_empty() {
            write!(f, "{}", self.error)
        } else if self.error.is_empty() {
            write!(f, "{}", self.description)
        } else {
            write!(f, "{} ({})", self.error, self.description)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_credentials_fail_without_exchange() {
        let cache = TokenCache::new(Config {
            token_url: "http://127.0.0.1:9/never".into(),
            ..Config::default()
        })
        .unwrap();
        let err = cache.get_token().unwrap_err();
        assert!(matches!(err, GatewayError::Auth(_)), "got {err:?}");
        assert_eq!(cache.exchange_count(), 0);
    }

    #[test]
    fn expiry_honours_skew() {
        let token = AccessToken::new("t".into(), Utc::now() + chrono::Duration::seconds(20));
        assert!(!token.is_expired(Duration::from_secs(0)));
        assert!(token.is_expired(Duration::from_secs(30)));
    }

    #[test]
    fn invalidate_only_drops_matching_token() {
        let cache = TokenCache::new(Config::default()).unwrap();
        let current = AccessToken::new("fresh".into(), Utc::now() + chrono::Duration::hours(1));
        *cache.slot.lock() = Some(current.clone());

        let stale = AccessToken::new("old".into(), Utc::now());
        cache.invalidate(&stale);
        assert_eq!(cache.get_token().unwrap(), current);

        cache.invalidate(&current);
        assert!(cache.slot.lock().is_none());
    }

    #[test]
    fn debug_output_redacts_secret() {
        let token = AccessToken::new("super-secret".into(), Utc::now());
        let rendered = format!("{:?}", token);
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("redacted"));
    }

    #[test]
    fn token_error_display_combines_fields() {
        let err = TokenError {
            error: "invalid_grant".into(),
            description: "bad secret".into(),
        };
        assert_eq!(err.to_string(), "invalid_grant (bad secret)");
    }
}
