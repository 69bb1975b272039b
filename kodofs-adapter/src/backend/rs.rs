//! Management API client: stat, list, move, copy and delete.
//!
//! Every request is a POST signed with a `QBox` authorization header over
//! its path and query. Listing goes to the listing host; everything else
//! goes to the resource host.

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Response};
use serde::Deserialize;
use tracing::debug;

use kodofs_common::backend::{BackendError, BucketManager, ListPage, ObjectStat};

use crate::auth::{entry, Auth};

pub const DEFAULT_RS_HOST: &str = "https://rs.qiniuapi.com";
pub const DEFAULT_RSF_HOST: &str = "https://rsf.qiniuapi.com";

pub struct RsClient {
    auth: Auth,
    client: Client,
    rs_host: String,
    rsf_host: String,
}

impl RsClient {
    pub fn new(
        auth: Auth,
        client: Client,
        rs_host: impl Into<String>,
        rsf_host: impl Into<String>,
    ) -> Self {
        Self {
            auth,
            client,
            rs_host: rs_host.into().trim_end_matches('/').to_string(),
            rsf_host: rsf_host.into().trim_end_matches('/').to_string(),
        }
    }

    async fn post(&self, host: &str, path_and_query: &str) -> Result<Response, BackendError> {
        let url = format!("{}{}", host, path_and_query);
        let authorization = self.auth.management_authorization(path_and_query, b"");
        let resp = self
            .client
            .post(&url)
            .header(AUTHORIZATION, authorization)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .send()
            .await?;
        check_status(resp).await
    }

    async fn transfer(
        &self,
        op: &str,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
        force: bool,
    ) -> Result<(), BackendError> {
        let path = format!(
            "/{}/{}/{}/force/{}",
            op,
            entry(src_bucket, src_key),
            entry(dst_bucket, dst_key),
            force
        );
        self.post(&self.rs_host, &path).await?;
        debug!(
            op,
            src = %format!("{}:{}", src_bucket, src_key),
            dst = %format!("{}:{}", dst_bucket, dst_key),
            "Management call complete"
        );
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// Pass successful responses through; turn anything else into `BackendError::Call`.
pub(crate) async fn check_status(resp: Response) -> Result<Response, BackendError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(BackendError::call(status.as_u16(), error_message(&body)))
}

/// Extract `{"error": "..."}` from an error body, falling back to the raw text.
pub(crate) fn error_message(body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => parsed.error,
        Err(_) if body.trim().is_empty() => "empty error response".to_string(),
        Err(_) => body.trim().to_string(),
    }
}

pub(crate) fn list_query(
    bucket: &str,
    prefix: &str,
    delimiter: Option<&str>,
    marker: Option<&str>,
    limit: usize,
) -> String {
    let mut query = format!(
        "/list?bucket={}&prefix={}&limit={}",
        urlencoding::encode(bucket),
        urlencoding::encode(prefix),
        limit
    );
    if let Some(marker) = marker.filter(|m| !m.is_empty()) {
        query.push_str("&marker=");
        query.push_str(&urlencoding::encode(marker));
    }
    if let Some(delimiter) = delimiter {
        query.push_str("&delimiter=");
        query.push_str(&urlencoding::encode(delimiter));
    }
    query
}

async fn decode<T: serde::de::DeserializeOwned>(resp: Response) -> Result<T, BackendError> {
    let body = resp.text().await?;
    serde_json::from_str(&body).map_err(|e| BackendError::Decode(e.to_string()))
}

#[async_trait]
impl BucketManager for RsClient {
    async fn stat(&self, bucket: &str, key: &str) -> Result<ObjectStat, BackendError> {
        let path = format!("/stat/{}", entry(bucket, key));
        let resp = self.post(&self.rs_host, &path).await?;
        let mut stat: ObjectStat = decode(resp).await?;
        stat.key = key.to_string();
        Ok(stat)
    }

    async fn list(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: Option<&str>,
        marker: Option<&str>,
        limit: usize,
    ) -> Result<ListPage, BackendError> {
        let path = list_query(bucket, prefix, delimiter, marker, limit);
        let resp = self.post(&self.rsf_host, &path).await?;
        let page: ListPage = decode(resp).await?;
        debug!(
            bucket = %bucket,
            prefix = %prefix,
            items = page.items.len(),
            prefixes = page.common_prefixes.len(),
            "List page fetched"
        );
        Ok(page)
    }

    async fn move_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
        force: bool,
    ) -> Result<(), BackendError> {
        self.transfer("move", src_bucket, src_key, dst_bucket, dst_key, force)
            .await
    }

    async fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
        force: bool,
    ) -> Result<(), BackendError> {
        self.transfer("copy", src_bucket, src_key, dst_bucket, dst_key, force)
            .await
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), BackendError> {
        let path = format!("/delete/{}", entry(bucket, key));
        self.post(&self.rs_host, &path).await?;
        debug!(bucket = %bucket, key = %key, "Delete complete");
        Ok(())
    }
}
