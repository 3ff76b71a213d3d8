//! Identity tokens for calls to the agent backend
//!
//! The backend may sit behind an identity-aware front (e.g. Cloud Run), which
//! wants `Authorization: Bearer <id token>` with the backend URL as audience.
//! `GoogleIdTokenProvider` mints those tokens from a service-account key.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{GatewayError, Result};
use crate::types::SecretString;

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Assertion lifetime requested from the token endpoint
const ASSERTION_TTL_SECS: i64 = 3600;

/// Tokens are refreshed this long before the assertion lifetime runs out
const REFRESH_MARGIN: Duration = Duration::from_secs(300);

/// Source of identity tokens for a given audience
#[async_trait]
pub trait IdTokenProvider: Send + Sync {
    /// Return an ID token whose audience is `audience`
    async fn id_token(&self, audience: &str) -> Result<String>;

    /// Provider name for logs
    fn name(&self) -> &str;
}

/// The subset of a Google service-account key file we need
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: SecretString,
    #[serde(default)]
    pub private_key_id: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl ServiceAccountKey {
    /// Decode a base64-encoded key file (the `GOOGLE_KEY_JSON` format).
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| GatewayError::Auth(format!("GOOGLE_KEY_JSON is not valid base64: {e}")))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| GatewayError::Auth(format!("GOOGLE_KEY_JSON is not a key file: {e}")))
    }
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    sub: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
    target_audience: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    id_token: String,
}

struct CachedToken {
    token: String,
    refresh_at: Instant,
}

/// Mints ID tokens through the OAuth2 JWT-bearer flow, caching per audience
pub struct GoogleIdTokenProvider {
    key: ServiceAccountKey,
    encoding_key: EncodingKey,
    http: reqwest::Client,
    cache: RwLock<HashMap<String, CachedToken>>,
}

impl GoogleIdTokenProvider {
    pub fn new(key: ServiceAccountKey, http: reqwest::Client) -> Result<Self> {
        let encoding_key = EncodingKey::from_rsa_pem(key.private_key.expose().as_bytes())
            .map_err(|e| GatewayError::Auth(format!("Invalid service-account private key: {e}")))?;
        Ok(Self {
            key,
            encoding_key,
            http,
            cache: RwLock::new(HashMap::new()),
        })
    }

    /// Build the signed assertion sent to the token endpoint.
    fn assertion(&self, audience: &str) -> Result<String> {
        let now = chrono::Utc::now().timestamp();
        let claims = AssertionClaims {
            iss: &self.key.client_email,
            sub: &self.key.client_email,
            aud: &self.key.token_uri,
            iat: now,
            exp: now + ASSERTION_TTL_SECS,
            target_audience: audience,
        };

        let mut header = Header::new(Algorithm::RS256);
        header.kid = self.key.private_key_id.clone();

        jsonwebtoken::encode(&header, &claims, &self.encoding_key)
            .map_err(|e| GatewayError::Auth(format!("Failed to sign assertion: {e}")))
    }

    async fn exchange(&self, audience: &str) -> Result<String> {
        let assertion = self.assertion(audience)?;
        let response = self
            .http
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Auth(format!(
                "Token endpoint returned {status}: {body}"
            )));
        }

        let token: TokenResponse = response.json().await?;
        Ok(token.id_token)
    }
}

#[async_trait]
impl IdTokenProvider for GoogleIdTokenProvider {
    async fn id_token(&self, audience: &str) -> Result<String> {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.get(audience) {
                if Instant::now() < cached.refresh_at {
                    return Ok(cached.token.clone());
                }
            }
        }

        let token = self.exchange(audience).await?;
        let lifetime = Duration::from_secs(ASSERTION_TTL_SECS as u64) - REFRESH_MARGIN;
        self.cache.write().await.insert(
            audience.to_string(),
            CachedToken {
                token: token.clone(),
                refresh_at: Instant::now() + lifetime,
            },
        );

        tracing::debug!(audience, "Minted backend identity token");
        Ok(token)
    }

    fn name(&self) -> &str {
        "google-service-account"
    }
}

/// Build the identity-token provider for a configured key, if any.
///
/// A malformed key is logged and treated as "no auth": the gateway keeps
/// serving, and a backend that insists on auth will answer 401/403.
pub fn provider_from_key(
    google_key_json: Option<&str>,
    http: reqwest::Client,
) -> Option<Arc<dyn IdTokenProvider>> {
    let encoded = google_key_json?;
    let provider = ServiceAccountKey::from_base64(encoded)
        .and_then(|key| GoogleIdTokenProvider::new(key, http));

    match provider {
        Ok(provider) => {
            tracing::info!(
                client_email = %provider.key.client_email,
                "Backend identity tokens enabled"
            );
            Some(Arc::new(provider))
        }
        Err(e) => {
            tracing::error!(error = %e, "Error parsing GOOGLE_KEY_JSON, continuing without auth");
            None
        }
    }
}
