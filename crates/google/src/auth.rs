//! Service-account OAuth token provider.
//!
//! Mints scoped access tokens through the RS256 JWT-assertion grant and
//! caches them per scope until shortly before expiry. Created once and
//! shared (`Arc`) by every Google client.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use fso_domain::error::{Error, Result};

/// OAuth scopes used across the orchestrator.
pub mod scopes {
    pub const STORAGE_RW: &str = "https://www.googleapis.com/auth/devstorage.read_write";
    pub const CLOUD_PLATFORM: &str = "https://www.googleapis.com/auth/cloud-platform";
    pub const SHEETS_RO: &str = "https://www.googleapis.com/auth/spreadsheets.readonly";
    pub const CALENDAR_RO: &str = "https://www.googleapis.com/auth/calendar.readonly";
}

/// The fields we need from a service-account JSON key file.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
}

impl std::fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print the key material.
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

pub struct TokenProvider {
    http: Client,
    key: ServiceAccountKey,
    encoding_key: EncodingKey,
    token_endpoint: String,
    cache: parking_lot::Mutex<HashMap<String, CachedToken>>,
}

impl TokenProvider {
    /// Load the service-account key file and build the provider.
    pub fn from_file(path: &Path, token_endpoint: &str, timeout: Duration) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let key: ServiceAccountKey = serde_json::from_str(&raw)?;
        Self::from_key(key, token_endpoint, timeout)
    }

    pub fn from_key(
        key: ServiceAccountKey,
        token_endpoint: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|e| Error::Auth(format!("service-account private key: {e}")))?;
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            http,
            key,
            encoding_key,
            token_endpoint: token_endpoint.trim_end_matches('/').to_owned(),
            cache: parking_lot::Mutex::new(HashMap::new()),
        })
    }

    pub fn client_email(&self) -> &str {
        &self.key.client_email
    }

    /// PEM private key, used by the URL signer.
    pub fn private_key_pem(&self) -> &str {
        &self.key.private_key
    }

    /// A bearer token for `scope`, cached until ~60 s before expiry.
    pub async fn access_token(&self, scope: &str) -> Result<String> {
        let now = Utc::now();
        {
            let cache = self.cache.lock();
            if let Some(cached) = cache.get(scope) {
                if cached.expires_at - chrono::Duration::seconds(60) > now {
                    return Ok(cached.token.clone());
                }
            }
        }

        let assertion = self.build_assertion(scope, now)?;
        let params = [
            ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
            ("assertion", assertion.as_str()),
        ];
        let resp = self
            .http
            .post(&self.token_endpoint)
            .form(&params)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Auth(format!(
                "token exchange failed ({status}): {body}"
            )));
        }
        let token: TokenResponse = resp.json().await.map_err(|e| Error::Http(e.to_string()))?;

        let mut cache = self.cache.lock();
        cache.insert(
            scope.to_owned(),
            CachedToken {
                token: token.access_token.clone(),
                expires_at: now + chrono::Duration::seconds(token.expires_in),
            },
        );
        Ok(token.access_token)
    }

    fn build_assertion(&self, scope: &str, now: DateTime<Utc>) -> Result<String> {
        let claims = AssertionClaims {
            iss: &self.key.client_email,
            scope,
            aud: &self.token_endpoint,
            iat: now.timestamp(),
            exp: now.timestamp() + 3600,
        };
        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.encoding_key)
            .map_err(|e| Error::Auth(format!("signing OAuth assertion: {e}")))
    }
}
