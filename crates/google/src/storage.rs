//! Cloud Storage client: JSON artifact upload/delete and V4 signed GET URLs.
//!
//! Signed URLs follow the GOOG4-RSA-SHA256 scheme: the canonical query is
//! lexically sorted, `host` is the sole signed header, the payload is
//! `UNSIGNED-PAYLOAD`, and the string-to-sign is signed with the service
//! account's RSA key.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::Client;
use rsa::pkcs8::DecodePrivateKey;
use rsa::signature::{SignatureEncoding, Signer};
use sha2::{Digest, Sha256};

use fso_domain::error::{Error, Result};
use fso_domain::retry::RetryPolicy;

use crate::auth::{scopes, TokenProvider};

/// Signed-URL expiry bounds: 60 seconds to 7 days.
const MIN_EXPIRY_SECS: u64 = 60;
const MAX_EXPIRY_SECS: u64 = 7 * 24 * 3600;

// Unreserved characters stay literal; everything else is percent-encoded.
const STRICT_ENCODE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');
// Object paths keep their slashes.
const PATH_ENCODE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b'/');

/// Seam for the dispatch router: artifact upload, rollback, and signing.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn upload_json(
        &self,
        bucket: &str,
        object: &str,
        body: &serde_json::Value,
    ) -> Result<String>;
    async fn delete_object(&self, bucket: &str, object: &str) -> Result<()>;
    fn signed_get_url(
        &self,
        bucket: &str,
        object: &str,
        expires_in: Duration,
        now: DateTime<Utc>,
    ) -> Result<String>;
}

#[async_trait]
impl ObjectStore for StorageClient {
    async fn upload_json(
        &self,
        bucket: &str,
        object: &str,
        body: &serde_json::Value,
    ) -> Result<String> {
        StorageClient::upload_json(self, bucket, object, body).await
    }

    async fn delete_object(&self, bucket: &str, object: &str) -> Result<()> {
        StorageClient::delete_object(self, bucket, object).await
    }

    fn signed_get_url(
        &self,
        bucket: &str,
        object: &str,
        expires_in: Duration,
        now: DateTime<Utc>,
    ) -> Result<String> {
        StorageClient::signed_get_url(self, bucket, object, expires_in, now)
    }
}

pub struct StorageClient {
    http: Client,
    endpoint: String,
    token: Arc<TokenProvider>,
    signing_key: rsa::pkcs1v15::SigningKey<Sha256>,
    retry: RetryPolicy,
}

impl StorageClient {
    pub fn new(endpoint: &str, token: Arc<TokenProvider>, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        let private_key = rsa::RsaPrivateKey::from_pkcs8_pem(token.private_key_pem())
            .map_err(|e| Error::Auth(format!("storage signing key: {e}")))?;
        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_owned(),
            token,
            signing_key: rsa::pkcs1v15::SigningKey::<Sha256>::new(private_key),
            retry: RetryPolicy::storage(),
        })
    }

    fn host(&self) -> &str {
        self.endpoint
            .strip_prefix("https://")
            .or_else(|| self.endpoint.strip_prefix("http://"))
            .unwrap_or(&self.endpoint)
    }

    // ── upload / delete ──────────────────────────────────────────────

    /// Upload `body` as a JSON object and return its `gs://` URI.
    ///
    /// Any response status ≥ 300 is retried up to three times with
    /// exponential back-off before failing.
    pub async fn upload_json(
        &self,
        bucket: &str,
        object: &str,
        body: &serde_json::Value,
    ) -> Result<String> {
        let url = format!(
            "{}/upload/storage/v1/b/{}/o?uploadType=media&name={}",
            self.endpoint,
            bucket,
            utf8_percent_encode(object, STRICT_ENCODE)
        );
        let payload = serde_json::to_vec(body)?;

        self.retry
            .run(
                |_| {
                    let url = url.clone();
                    let payload = payload.clone();
                    async move {
                        let token = self.token.access_token(scopes::STORAGE_RW).await?;
                        let resp = self
                            .http
                            .post(&url)
                            .bearer_auth(token)
                            .header("Content-Type", "application/json")
                            .body(payload)
                            .send()
                            .await
                            .map_err(|e| Error::Http(e.to_string()))?;
                        let status = resp.status();
                        if status.as_u16() >= 300 {
                            let body = resp.text().await.unwrap_or_default();
                            return Err(Error::Storage(format!(
                                "upload of {object} returned {status}: {body}"
                            )));
                        }
                        Ok(())
                    }
                },
                |e| !matches!(e, Error::Auth(_)),
            )
            .await?;

        Ok(format!("gs://{bucket}/{object}"))
    }

    /// Best-effort delete; callers decide whether failure matters.
    pub async fn delete_object(&self, bucket: &str, object: &str) -> Result<()> {
        let url = format!(
            "{}/storage/v1/b/{}/o/{}",
            self.endpoint,
            bucket,
            utf8_percent_encode(object, STRICT_ENCODE)
        );
        let token = self.token.access_token(scopes::STORAGE_RW).await?;
        let resp = self
            .http
            .delete(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        let status = resp.status();
        // 404 counts as deleted.
        if status.as_u16() >= 300 && status.as_u16() != 404 {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Storage(format!(
                "delete of {object} returned {status}: {body}"
            )));
        }
        Ok(())
    }

    // ── V4 signed URLs ───────────────────────────────────────────────

    /// Mint a V4 signed GET URL for `gs://{bucket}/{object}`.
    pub fn signed_get_url(
        &self,
        bucket: &str,
        object: &str,
        expires_in: Duration,
        now: DateTime<Utc>,
    ) -> Result<String> {
        let expiry_secs = expires_in
            .as_secs()
            .clamp(MIN_EXPIRY_SECS, MAX_EXPIRY_SECS);
        let host = self.host().to_owned();
        let credential = format!(
            "{}/{}",
            self.token.client_email(),
            credential_scope(&now)
        );
        let (canonical_request, canonical_query, path) = canonical_get_request(
            &host,
            bucket,
            object,
            &credential,
            &now,
            expiry_secs,
        );
        let to_sign = string_to_sign(&now, &credential_scope(&now), &canonical_request);
        let signature = self.signing_key.sign(to_sign.as_bytes());
        let signature_hex = hex::encode(signature.to_bytes());

        Ok(format!(
            "https://{host}{path}?{canonical_query}&X-Goog-Signature={signature_hex}"
        ))
    }
}

/// `{yyyymmdd}/auto/storage/goog4_request`
fn credential_scope(now: &DateTime<Utc>) -> String {
    format!("{}/auto/storage/goog4_request", now.format("%Y%m%d"))
}

/// Build the canonical GET request. Returns `(canonical_request,
/// canonical_query, resource_path)`; the query is already in lexical order.
fn canonical_get_request(
    host: &str,
    bucket: &str,
    object: &str,
    credential: &str,
    now: &DateTime<Utc>,
    expiry_secs: u64,
) -> (String, String, String) {
    let timestamp = now.format("%Y%m%dT%H%M%SZ").to_string();
    let path = format!(
        "/{}/{}",
        bucket,
        utf8_percent_encode(object, PATH_ENCODE)
    );

    // Lexical order of the X-Goog-* parameter names.
    let query = format!(
        "X-Goog-Algorithm=GOOG4-RSA-SHA256\
         &X-Goog-Credential={}\
         &X-Goog-Date={}\
         &X-Goog-Expires={}\
         &X-Goog-SignedHeaders=host",
        utf8_percent_encode(credential, STRICT_ENCODE),
        timestamp,
        expiry_secs,
    );

    let canonical_request = format!(
        "GET\n{path}\n{query}\nhost:{host}\n\nhost\nUNSIGNED-PAYLOAD"
    );
    (canonical_request, query, path)
}

fn string_to_sign(now: &DateTime<Utc>, scope: &str, canonical_request: &str) -> String {
    let digest = hex::encode(Sha256::digest(canonical_request.as_bytes()));
    format!(
        "GOOG4-RSA-SHA256\n{}\n{}\n{}",
        now.format("%Y%m%dT%H%M%SZ"),
        scope,
        digest
    )
}
