use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::error::{ServiceErrorKind, SyncError, SyncResult};
use crate::http::{classify_transport, parse_payload, with_retry, RetryPolicy};

pub const DEFAULT_TOKEN_URL: &str = "https://www.arcgis.com/sharing/rest/generateToken";
pub const DEFAULT_OAUTH_TOKEN_URL: &str = "https://www.arcgis.com/sharing/rest/oauth2/token";
pub const DEFAULT_REFERER: &str = "requestip";
pub const DEFAULT_EXPIRATION_MINUTES: u32 = 1440;

/// Tokens this close to expiry are treated as already expired.
const EXPIRY_SKEW_SECS: i64 = 60;

#[derive(Debug, Clone)]
pub enum Credential {
    /// ArcGIS Online named user, exchanged at `generateToken`.
    User { username: String, password: String },
    /// Registered application, exchanged with the OAuth2 client-credentials grant.
    Application {
        client_id: String,
        client_secret: String,
    },
}

impl Credential {
    fn kind(&self) -> &'static str {
        match self {
            Credential::User { .. } => "user",
            Credential::Application { .. } => "application",
        }
    }
}

#[derive(Debug, Clone)]
pub struct TokenEndpoints {
    pub generate_token_url: String,
    pub oauth_token_url: String,
    pub referer: String,
    pub expiration_minutes: u32,
}

impl Default for TokenEndpoints {
    fn default() -> Self {
        Self {
            generate_token_url: DEFAULT_TOKEN_URL.to_string(),
            oauth_token_url: DEFAULT_OAUTH_TOKEN_URL.to_string(),
            referer: DEFAULT_REFERER.to_string(),
            expiration_minutes: DEFAULT_EXPIRATION_MINUTES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

impl Token {
    pub fn new(value: impl Into<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            value: value.into(),
            expires_at,
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at
            .is_some_and(|exp| now + Duration::seconds(EXPIRY_SKEW_SECS) >= exp)
    }
}

/// `generateToken` answers with `token` + `expires` (epoch millis); the OAuth2
/// endpoint with `access_token` + `expires_in` (seconds).
#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    expires: Option<i64>,
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

impl TokenResponse {
    fn into_token(self, now: DateTime<Utc>) -> Option<Token> {
        if let Some(value) = self.token.filter(|t| !t.is_empty()) {
            let expires_at = self.expires.and_then(DateTime::from_timestamp_millis);
            return Some(Token::new(value, expires_at));
        }
        let value = self.access_token.filter(|t| !t.is_empty())?;
        let expires_at = self.expires_in.map(|secs| now + Duration::seconds(secs));
        Some(Token::new(value, expires_at))
    }
}

/// Exchanges credentials for a token and hands the same token to every caller
/// until it expires or a service rejects it.
pub struct TokenProvider {
    http: Client,
    credential: Credential,
    endpoints: TokenEndpoints,
    retry: RetryPolicy,
    cached: Mutex<Option<Token>>,
}

impl TokenProvider {
    pub fn new(
        http: Client,
        credential: Credential,
        endpoints: TokenEndpoints,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            http,
            credential,
            endpoints,
            retry,
            cached: Mutex::new(None),
        }
    }

    /// Returns the cached token, exchanging credentials first if there is
    /// none. Concurrent first callers wait on the same exchange.
    pub async fn get_token(&self) -> SyncResult<Token> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if !token.is_expired(Utc::now()) {
                return Ok(token.clone());
            }
            tracing::info!("cached token expired, re-authenticating");
        }

        let token = self.exchange().await?;
        *cached = Some(token.clone());
        Ok(token)
    }

    /// Drops `stale` from the cache. A token already replaced by another
    /// caller is left alone so one rejection costs one exchange.
    pub async fn invalidate(&self, stale: &Token) {
        let mut cached = self.cached.lock().await;
        if cached.as_ref() == Some(stale) {
            *cached = None;
        }
    }

    async fn exchange(&self) -> SyncResult<Token> {
        let (url, form) = self.exchange_request();
        tracing::debug!(credential = self.credential.kind(), url = %url, "requesting token");

        let value = with_retry(&self.retry, "token", ServiceErrorKind::is_transient, || {
            let request = self.http.post(&url).form(&form);
            async move {
                let response = request.send().await.map_err(|err| classify_transport(&err))?;
                let status = response.status();
                let body = response.text().await.map_err(|err| classify_transport(&err))?;
                parse_payload(status, &body)
            }
        })
        .await
        .map_err(|kind| SyncError::auth(kind.to_string()))?;

        let response: TokenResponse = serde_json::from_value(value)
            .map_err(|err| SyncError::auth(format!("invalid token response: {err}")))?;
        response
            .into_token(Utc::now())
            .ok_or_else(|| SyncError::auth("token response did not contain a token"))
    }

    fn exchange_request(&self) -> (String, Vec<(&'static str, String)>) {
        let expiration = self.endpoints.expiration_minutes.to_string();
        match &self.credential {
            Credential::User { username, password } => (
                self.endpoints.generate_token_url.clone(),
                vec![
                    ("username", username.clone()),
                    ("password", password.clone()),
                    ("referer", self.endpoints.referer.clone()),
                    ("expiration", expiration),
                    ("f", "json".to_string()),
                ],
            ),
            Credential::Application {
                client_id,
                client_secret,
            } => (
                self.endpoints.oauth_token_url.clone(),
                vec![
                    ("client_id", client_id.clone()),
                    ("client_secret", client_secret.clone()),
                    ("grant_type", "client_credentials".to_string()),
                    ("expiration", expiration),
                    ("f", "json".to_string()),
                ],
            ),
        }
    }
}

pub fn mask_token(token: &str) -> String {
    if token.len() <= 8 {
        return "***".to_string();
    }
    format!("{}...{}", &token[..4], &token[token.len() - 4..])
}
