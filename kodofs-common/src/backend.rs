use std::collections::BTreeMap;

use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};

/// Backend error code for a key that does not exist.
pub const CODE_NO_SUCH_KEY: u16 = 612;
/// Backend error code for a destination key that already exists.
pub const CODE_KEY_EXISTS: u16 = 614;
/// Backend error code for an unknown bucket.
pub const CODE_NO_SUCH_BUCKET: u16 = 631;

/// Page size requested from the listing endpoint.
pub const LIST_PAGE_LIMIT: usize = 1000;

/// Object content delivered chunk by chunk.
pub type ByteStream = BoxStream<'static, Result<bytes::Bytes, BackendError>>;

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("Backend call failed: {code} - {message}")]
    Call { code: u16, message: String },
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Malformed backend response: {0}")]
    Decode(String),
    #[error("Invalid upload token: {0}")]
    InvalidToken(String),
}

impl BackendError {
    pub fn call(code: u16, message: impl Into<String>) -> Self {
        BackendError::Call {
            code,
            message: message.into(),
        }
    }

    /// The backend-reported status code, if the call reached the backend.
    pub fn code(&self) -> Option<u16> {
        match self {
            BackendError::Call { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.code(), Some(CODE_NO_SUCH_KEY) | Some(404))
    }

    /// True when the request never produced an HTTP response.
    pub fn is_transport(&self) -> bool {
        matches!(self, BackendError::Http(e) if e.status().is_none())
    }
}

/// Stat record for one stored object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectStat {
    /// Filled in by the caller for stat responses; present in list items.
    #[serde(default)]
    pub key: String,
    pub fsize: u64,
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub mime_type: String,
    /// Upload time in 100-nanosecond units since the Unix epoch.
    pub put_time: i64,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ObjectStat {
    /// Upload time in Unix seconds.
    pub fn timestamp(&self) -> i64 {
        self.put_time / 10_000_000
    }
}

/// One page of a prefix listing.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ListPage {
    #[serde(default)]
    pub items: Vec<ObjectStat>,
    #[serde(default)]
    pub common_prefixes: Vec<String>,
    #[serde(default)]
    pub marker: Option<String>,
}

impl ListPage {
    /// Continuation marker for the next page, if there is one.
    pub fn next_marker(&self) -> Option<&str> {
        self.marker.as_deref().filter(|m| !m.is_empty())
    }
}

/// Optional upload parameters passed through to the upload handle.
#[derive(Debug, Clone, PartialEq)]
pub struct PutExtra {
    /// Custom variables, sent as form fields (`x:` prefixed by convention).
    pub params: BTreeMap<String, String>,
    pub mime_type: String,
    pub check_crc: bool,
}

impl Default for PutExtra {
    fn default() -> Self {
        Self {
            params: BTreeMap::new(),
            mime_type: DEFAULT_MIME_TYPE.to_string(),
            check_crc: false,
        }
    }
}

pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Response body of a successful upload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UploadResult {
    pub key: String,
    #[serde(default)]
    pub hash: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Management handle: stat, listing, move, copy and delete against a bucket.
///
/// Implementations translate each call into one backend request and
/// report backend failures as `BackendError::Call` carrying the backend's
/// code and message.
#[async_trait::async_trait]
pub trait BucketManager: Send + Sync {
    /// Fetch the stat record of one key.
    async fn stat(&self, bucket: &str, key: &str) -> Result<ObjectStat, BackendError>;

    /// List one page of keys under `prefix`, starting after `marker`.
    ///
    /// With a `delimiter`, keys containing it past the prefix are folded
    /// into `common_prefixes`.
    async fn list(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: Option<&str>,
        marker: Option<&str>,
        limit: usize,
    ) -> Result<ListPage, BackendError>;

    /// Move a key, possibly across buckets. Fails when the destination
    /// exists and `force` is false.
    async fn move_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
        force: bool,
    ) -> Result<(), BackendError>;

    /// Copy a key, possibly across buckets.
    async fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
        force: bool,
    ) -> Result<(), BackendError>;

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), BackendError>;
}

/// Upload handle: token-authorised content writes.
#[async_trait::async_trait]
pub trait Uploader: Send + Sync {
    async fn put(
        &self,
        token: &str,
        key: &str,
        data: bytes::Bytes,
        extra: &PutExtra,
    ) -> Result<UploadResult, BackendError>;
}

/// Fetches the bytes behind a (signed) download URL.
#[async_trait::async_trait]
pub trait Downloader: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<bytes::Bytes, BackendError>;

    /// Streaming variant of `fetch`. The default buffers the whole body
    /// and yields it as a single chunk.
    async fn fetch_stream(&self, url: &str) -> Result<ByteStream, BackendError> {
        let data = self.fetch(url).await?;
        Ok(stream::once(async move { Ok(data) }).boxed())
    }
}
