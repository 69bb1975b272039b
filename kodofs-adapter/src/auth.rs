//! Credential and signing context.
//!
//! All signatures are HMAC-SHA1 over the signed data, keyed with the
//! secret key and encoded as padded URL-safe base64. The access key is
//! prepended so the backend can find the secret.

use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha1::Sha1;

use kodofs_common::backend::BackendError;

type HmacSha1 = Hmac<Sha1>;

/// Validity window of upload tokens minted for writes.
pub const UPLOAD_TOKEN_TTL_SECS: i64 = 3600;
/// Validity window of private download URLs.
pub const DOWNLOAD_URL_TTL_SECS: i64 = 3600;

#[derive(Clone)]
pub struct Auth {
    access_key: String,
    secret_key: String,
}

impl std::fmt::Debug for Auth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Auth")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

impl Auth {
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
        }
    }

    /// `<access_key>:<base64(hmac_sha1(secret, data))>`
    pub fn sign(&self, data: &[u8]) -> String {
        let mut mac = HmacSha1::new_from_slice(self.secret_key.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(data);
        let signature = URL_SAFE.encode(mac.finalize().into_bytes());
        format!("{}:{}", self.access_key, signature)
    }

    /// Sign the base64 form of `data` and append it: `<sign>:<encoded>`.
    pub fn sign_with_data(&self, data: &[u8]) -> String {
        let encoded = URL_SAFE.encode(data);
        format!("{}:{}", self.sign(encoded.as_bytes()), encoded)
    }

    /// Upload token scoped to `bucket:key`, valid for `expires_secs`.
    ///
    /// A key-scoped token lets the upload replace an existing object
    /// unless `insert_only` is set.
    pub fn upload_token(
        &self,
        bucket: &str,
        key: &str,
        expires_secs: i64,
        insert_only: bool,
    ) -> Result<String, serde_json::Error> {
        let mut policy = PutPolicy::new(bucket, key, Utc::now().timestamp() + expires_secs);
        if insert_only {
            policy.insert_only = Some(1);
        }
        self.sign_put_policy(&policy)
    }

    pub fn sign_put_policy(&self, policy: &PutPolicy) -> Result<String, serde_json::Error> {
        let json = serde_json::to_vec(policy)?;
        Ok(self.sign_with_data(&json))
    }

    pub fn private_download_url(&self, base_url: &str, expires_secs: i64) -> String {
        self.private_download_url_with_deadline(base_url, Utc::now().timestamp() + expires_secs)
    }

    /// Append `e=<deadline>` to `base_url`, sign the result and append the token.
    pub fn private_download_url_with_deadline(&self, base_url: &str, deadline: i64) -> String {
        let sep = if base_url.contains('?') { '&' } else { '?' };
        let url = format!("{}{}e={}", base_url, sep, deadline);
        let token = self.sign(url.as_bytes());
        format!("{}&token={}", url, token)
    }

    /// `Authorization` header value for a management request.
    ///
    /// The signed data is the request path (with query) and a newline,
    /// followed by the body when it is form-encoded.
    pub fn management_authorization(&self, path_and_query: &str, form_body: &[u8]) -> String {
        let mut data = Vec::with_capacity(path_and_query.len() + 1 + form_body.len());
        data.extend_from_slice(path_and_query.as_bytes());
        data.push(b'\n');
        data.extend_from_slice(form_body);
        format!("QBox {}", self.sign(&data))
    }
}

/// Encoded `bucket:key` pair used in management request paths.
pub fn entry(bucket: &str, key: &str) -> String {
    URL_SAFE.encode(format!("{}:{}", bucket, key))
}

/// Policy embedded in an upload token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PutPolicy {
    pub scope: String,
    /// Unix seconds after which the token is rejected.
    pub deadline: i64,
    #[serde(rename = "insertOnly", skip_serializing_if = "Option::is_none")]
    pub insert_only: Option<u8>,
}

impl PutPolicy {
    pub fn new(bucket: &str, key: &str, deadline: i64) -> Self {
        Self {
            scope: format!("{}:{}", bucket, key),
            deadline,
            insert_only: None,
        }
    }

    /// Decode the policy carried in `<access_key>:<sign>:<policy>`.
    pub fn from_token(token: &str) -> Result<Self, BackendError> {
        let mut parts = token.splitn(3, ':');
        let encoded = match (parts.next(), parts.next(), parts.next()) {
            (Some(_), Some(_), Some(encoded)) => encoded,
            _ => return Err(BackendError::InvalidToken("expected three segments".into())),
        };
        let json = URL_SAFE
            .decode(encoded)
            .or_else(|_| URL_SAFE_NO_PAD.decode(encoded))
            .map_err(|e| BackendError::InvalidToken(format!("policy is not base64: {}", e)))?;
        serde_json::from_slice(&json)
            .map_err(|e| BackendError::InvalidToken(format!("policy is not valid JSON: {}", e)))
    }

    pub fn bucket(&self) -> &str {
        self.scope
            .split_once(':')
            .map(|(bucket, _)| bucket)
            .unwrap_or(&self.scope)
    }

    /// Key the token is restricted to; `None` for a bucket-wide scope.
    pub fn key(&self) -> Option<&str> {
        self.scope.split_once(':').map(|(_, key)| key)
    }

    pub fn allows_overwrite(&self) -> bool {
        self.key().is_some() && self.insert_only.unwrap_or(0) == 0
    }

    pub fn is_expired_at(&self, now: i64) -> bool {
        now > self.deadline
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth() -> Auth {
        Auth::new("test-access-key", "test-secret-key")
    }

    #[test]
    fn test_sign() {
        assert_eq!(auth().sign(b"hello"), "test-access-key:0hLKyO7vjnFfCH5cm5KTdI2QHp4=");
    }

    #[test]
    fn test_sign_put_policy() {
        let policy = PutPolicy::new("bkt-a", "photos/cat.png", 1_700_000_000);
        let token = auth().sign_put_policy(&policy).unwrap();
        assert_eq!(
            token,
            "test-access-key:HdekkgRRDkfS0fUcAmkyFLKPDjo=:\
             eyJzY29wZSI6ImJrdC1hOnBob3Rvcy9jYXQucG5nIiwiZGVhZGxpbmUiOjE3MDAwMDAwMDB9"
        );
    }

    #[test]
    fn test_upload_token_roundtrips_policy() {
        let before = Utc::now().timestamp();
        let token = auth()
            .upload_token("bkt-a", "x.png", UPLOAD_TOKEN_TTL_SECS, false)
            .unwrap();
        let policy = PutPolicy::from_token(&token).unwrap();
        assert_eq!(policy.bucket(), "bkt-a");
        assert_eq!(policy.key(), Some("x.png"));
        assert!(policy.allows_overwrite());
        assert!(policy.deadline >= before + UPLOAD_TOKEN_TTL_SECS);
        assert!(!policy.is_expired_at(before));
    }

    #[test]
    fn test_insert_only_token() {
        let token = auth().upload_token("bkt-a", "x.png", 60, true).unwrap();
        let policy = PutPolicy::from_token(&token).unwrap();
        assert_eq!(policy.insert_only, Some(1));
        assert!(!policy.allows_overwrite());
    }

    #[test]
    fn test_malformed_token() {
        assert!(PutPolicy::from_token("only-one-part").is_err());
        assert!(PutPolicy::from_token("ak:sig:!!!not-base64!!!").is_err());
        let not_json = URL_SAFE.encode(b"plain text");
        assert!(PutPolicy::from_token(&format!("ak:sig:{}", not_json)).is_err());
    }

    #[test]
    fn test_private_download_url() {
        let url = auth().private_download_url_with_deadline(
            "http://a.example.com/photos/cat.png",
            1_700_000_000,
        );
        assert_eq!(
            url,
            "http://a.example.com/photos/cat.png?e=1700000000\
             &token=test-access-key:KLx665IXfiwy_zAj0hbwFRBjOuo="
        );
    }

    #[test]
    fn test_private_download_url_with_query() {
        let url =
            auth().private_download_url_with_deadline("http://a.example.com/x.png?imageView2/1", 1);
        assert!(url
            .starts_with("http://a.example.com/x.png?imageView2/1&e=1&token=test-access-key:"));
    }

    #[test]
    fn test_entry_and_management_authorization() {
        let entry = entry("bkt-a", "photos/cat.png");
        assert_eq!(entry, "Ymt0LWE6cGhvdG9zL2NhdC5wbmc=");
        let header = auth().management_authorization(&format!("/stat/{}", entry), b"");
        assert_eq!(header, "QBox test-access-key:kjbVBr4ZIDX4mFf1G0KzHyfSN8E=");
    }

    #[test]
    fn test_debug_redacts_secret() {
        let rendered = format!("{:?}", auth());
        assert!(rendered.contains("test-access-key"));
        assert!(!rendered.contains("test-secret-key"));
    }
}
