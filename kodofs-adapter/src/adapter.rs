//! Bucket-aware file storage adapter.
//!
//! Translates the uniform [`FileStorage`] operations into management,
//! upload and download calls against one of several configured buckets.
//!
//! The adapter keeps an *active* bucket (used by every operation) and an
//! optional *move target* (destination of `rename` / `copy`). Both are
//! changed only through `&mut self` methods, so sharing one adapter
//! between tasks requires the caller to wrap it in a lock; per-call
//! alternatives (`WriteOptions::bucket`, `move_between`, `copy_between`)
//! avoid the shared selection entirely.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use reqwest::Client;
use tracing::{debug, warn};

use kodofs_common::backend::{
    BackendError, BucketManager, Downloader, ObjectStat, PutExtra, UploadResult, Uploader,
    DEFAULT_MIME_TYPE, LIST_PAGE_LIMIT,
};
use kodofs_common::storage::{
    ContentEntry, FileContents, FileStorage, StorageError, StorageStream, WriteOptions,
};

use crate::auth::{Auth, DOWNLOAD_URL_TTL_SECS, UPLOAD_TOKEN_TTL_SECS};
use crate::backend::download::HttpDownloader;
use crate::backend::rs::{RsClient, DEFAULT_RSF_HOST, DEFAULT_RS_HOST};
use crate::backend::upload::{FormUploader, DEFAULT_UP_HOST};
use crate::bucket::{BucketConfig, BucketRegistry};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Base URLs of the backend services.
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoints {
    pub rs: String,
    pub rsf: String,
    pub up: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            rs: DEFAULT_RS_HOST.to_string(),
            rsf: DEFAULT_RSF_HOST.to_string(),
            up: DEFAULT_UP_HOST.to_string(),
        }
    }
}

/// The three backend-call handles an adapter drives.
pub struct Clients {
    pub manager: Box<dyn BucketManager>,
    pub uploader: Box<dyn Uploader>,
    pub downloader: Box<dyn Downloader>,
}

impl Clients {
    /// HTTP handles against `endpoints`, sharing one connection pool.
    pub fn http(
        auth: &Auth,
        endpoints: &Endpoints,
        timeout: Duration,
    ) -> Result<Self, StorageError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                StorageError::Configuration(format!("failed to build HTTP client: {}", e))
            })?;
        Ok(Self {
            manager: Box::new(RsClient::new(
                auth.clone(),
                client.clone(),
                endpoints.rs.clone(),
                endpoints.rsf.clone(),
            )),
            uploader: Box::new(FormUploader::new(client.clone(), endpoints.up.clone())),
            downloader: Box::new(HttpDownloader::new(client)),
        })
    }
}

pub struct QiniuAdapter {
    auth: Auth,
    buckets: BucketRegistry,
    /// Backend name of the active bucket.
    active_bucket: String,
    path_prefix: String,
    /// Backend name of the rename/copy destination; persists until cleared.
    move_target: Option<String>,
    manager: Box<dyn BucketManager>,
    uploader: Box<dyn Uploader>,
    downloader: Box<dyn Downloader>,
}

impl std::fmt::Debug for QiniuAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QiniuAdapter")
            .field("auth", &self.auth)
            .field("active_bucket", &self.active_bucket)
            .field("path_prefix", &self.path_prefix)
            .field("move_target", &self.move_target)
            .finish_non_exhaustive()
    }
}

impl QiniuAdapter {
    /// Adapter talking HTTP to the default endpoints.
    pub fn new(
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
        buckets: BucketRegistry,
    ) -> Result<Self, StorageError> {
        let auth = Auth::new(access_key, secret_key);
        let clients = Clients::http(&auth, &Endpoints::default(), DEFAULT_TIMEOUT)?;
        Self::with_clients(auth, buckets, clients)
    }

    /// Adapter driving the given handles. Fails on an empty registry.
    pub fn with_clients(
        auth: Auth,
        buckets: BucketRegistry,
        clients: Clients,
    ) -> Result<Self, StorageError> {
        let mut adapter = Self {
            auth,
            buckets,
            active_bucket: String::new(),
            path_prefix: String::new(),
            move_target: None,
            manager: clients.manager,
            uploader: clients.uploader,
            downloader: clients.downloader,
        };
        adapter.select_bucket(None)?;
        Ok(adapter)
    }

    /// Make the bucket registered as `alias` active, or the first
    /// registered bucket when `alias` is `None`.
    ///
    /// An unknown alias is an error and leaves the selection untouched.
    pub fn select_bucket(&mut self, alias: Option<&str>) -> Result<&mut Self, StorageError> {
        let bucket = self.resolve(alias)?;
        let (name, prefix) = (bucket.name.clone(), bucket.path_prefix());
        self.active_bucket = name;
        self.path_prefix = prefix;
        debug!(bucket = %self.active_bucket, "Active bucket selected");
        Ok(self)
    }

    /// Send the next `rename` / `copy` calls to the bucket registered as
    /// `alias`. Unknown aliases are ignored.
    pub fn select_move_target(&mut self, alias: &str) -> &mut Self {
        match self.buckets.get(alias) {
            Some(bucket) => self.move_target = Some(bucket.name.clone()),
            None => warn!(alias = %alias, "Ignoring unknown move target bucket"),
        }
        self
    }

    pub fn clear_move_target(&mut self) -> &mut Self {
        self.move_target = None;
        self
    }

    pub fn active_bucket(&self) -> &str {
        &self.active_bucket
    }

    pub fn move_target(&self) -> Option<&str> {
        self.move_target.as_deref()
    }

    pub fn path_prefix(&self) -> &str {
        &self.path_prefix
    }

    pub fn buckets(&self) -> &BucketRegistry {
        &self.buckets
    }

    fn resolve(&self, alias: Option<&str>) -> Result<&BucketConfig, StorageError> {
        if self.buckets.is_empty() {
            return Err(StorageError::Configuration(
                "no buckets are configured".to_string(),
            ));
        }
        match alias {
            Some(alias) => self.buckets.get(alias).ok_or_else(|| {
                StorageError::Configuration(format!("bucket '{}' is not configured", alias))
            }),
            None => self
                .buckets
                .first()
                .map(|(_, bucket)| bucket)
                .ok_or_else(|| {
                    StorageError::Configuration("no buckets are configured".to_string())
                }),
        }
    }

    fn destination_bucket(&self) -> &str {
        self.move_target.as_deref().unwrap_or(&self.active_bucket)
    }

    /// Move `path` in the bucket registered as `from` to `new_path` in the
    /// bucket registered as `to`, without touching the selection state.
    pub async fn move_between(
        &self,
        from: &str,
        path: &str,
        to: &str,
        new_path: &str,
    ) -> Result<(), StorageError> {
        let src = self.resolve(Some(from))?.name.as_str();
        let dst = self.resolve(Some(to))?.name.as_str();
        self.manager
            .move_object(src, path, dst, new_path, false)
            .await?;
        Ok(())
    }

    /// Copy counterpart of [`QiniuAdapter::move_between`].
    pub async fn copy_between(
        &self,
        from: &str,
        path: &str,
        to: &str,
        new_path: &str,
    ) -> Result<(), StorageError> {
        let src = self.resolve(Some(from))?.name.as_str();
        let dst = self.resolve(Some(to))?.name.as_str();
        self.manager
            .copy_object(src, path, dst, new_path, false)
            .await?;
        Ok(())
    }

    /// Every entry under `prefix`, following continuation markers until
    /// the listing is exhausted.
    async fn list_all(
        &self,
        prefix: &str,
        recursive: bool,
    ) -> Result<Vec<ContentEntry>, StorageError> {
        let delimiter = if recursive { None } else { Some("/") };
        let mut entries = Vec::new();
        let mut seen_dirs = BTreeSet::new();
        let mut marker: Option<String> = None;
        let mut pages = 0;

        loop {
            let page = self
                .manager
                .list(
                    &self.active_bucket,
                    prefix,
                    delimiter,
                    marker.as_deref(),
                    LIST_PAGE_LIMIT,
                )
                .await?;
            pages += 1;
            entries.extend(page.items.iter().map(ContentEntry::file));
            for common in &page.common_prefixes {
                if seen_dirs.insert(common.clone()) {
                    entries.push(ContentEntry::dir(common));
                }
            }
            match page.next_marker() {
                Some(next) if marker.as_deref() != Some(next) => marker = Some(next.to_string()),
                _ => break,
            }
        }

        debug!(
            bucket = %self.active_bucket,
            prefix = %prefix,
            entries = entries.len(),
            pages,
            "Listing complete"
        );
        Ok(entries)
    }
}

/// Directory name as a key prefix: no leading slash, one trailing slash,
/// empty for the bucket root.
pub fn directory_prefix(directory: &str) -> String {
    let trimmed = directory.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{}/", trimmed)
    }
}

/// A download that never got an HTTP response is a transport failure.
fn download_error(e: BackendError) -> StorageError {
    if e.is_transport() {
        StorageError::Transport(e.to_string())
    } else {
        e.into()
    }
}

/// Percent-encode each segment of `path`, keeping the separators.
fn encode_key_path(path: &str) -> String {
    path.trim_start_matches('/')
        .split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

#[async_trait]
impl FileStorage for QiniuAdapter {
    async fn write(
        &self,
        path: &str,
        contents: Bytes,
        options: &WriteOptions,
    ) -> Result<UploadResult, StorageError> {
        let bucket = match options.bucket.as_deref() {
            Some(alias) => self.resolve(Some(alias))?.name.as_str(),
            None => self.active_bucket.as_str(),
        };
        let token = self
            .auth
            .upload_token(bucket, path, UPLOAD_TOKEN_TTL_SECS, false)
            .map_err(|e| {
                StorageError::Configuration(format!("failed to encode upload policy: {}", e))
            })?;
        let extra = PutExtra {
            params: options.params.clone(),
            mime_type: options
                .mime
                .clone()
                .unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string()),
            check_crc: options.check_crc,
        };

        let size = contents.len();
        let result = self.uploader.put(&token, path, contents, &extra).await?;
        debug!(bucket = %bucket, key = %path, size, "Write complete");
        Ok(result)
    }

    async fn read(&self, path: &str) -> Result<FileContents, StorageError> {
        let url = self.get_url(path);
        let contents = self.downloader.fetch(&url).await.map_err(download_error)?;
        Ok(FileContents { contents })
    }

    async fn read_stream(&self, path: &str) -> Result<StorageStream, StorageError> {
        let url = self.get_url(path);
        let stream = self
            .downloader
            .fetch_stream(&url)
            .await
            .map_err(download_error)?;
        Ok(stream.map(|chunk| chunk.map_err(download_error)).boxed())
    }

    async fn rename(&self, path: &str, new_path: &str) -> Result<(), StorageError> {
        let dst = self.destination_bucket();
        self.manager
            .move_object(&self.active_bucket, path, dst, new_path, false)
            .await?;
        debug!(from = %path, to = %new_path, dst_bucket = %dst, "Rename complete");
        Ok(())
    }

    async fn copy(&self, path: &str, new_path: &str) -> Result<(), StorageError> {
        let dst = self.destination_bucket();
        self.manager
            .copy_object(&self.active_bucket, path, dst, new_path, false)
            .await?;
        debug!(from = %path, to = %new_path, dst_bucket = %dst, "Copy complete");
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        self.manager.delete(&self.active_bucket, path).await?;
        Ok(())
    }

    async fn delete_dir(&self, directory: &str) -> Result<(), StorageError> {
        let entries = self.list_all(&directory_prefix(directory), true).await?;
        let mut deleted = 0usize;
        for entry in entries.iter().filter(|e| e.is_file()) {
            match self.manager.delete(&self.active_bucket, &entry.path).await {
                Ok(()) => deleted += 1,
                Err(e) => warn!(key = %entry.path, error = %e, "Failed to delete key"),
            }
        }
        debug!(directory = %directory, deleted, "Directory delete complete");
        Ok(())
    }

    async fn get_metadata(&self, path: &str) -> Result<ObjectStat, StorageError> {
        Ok(self.manager.stat(&self.active_bucket, path).await?)
    }

    async fn list_contents(
        &self,
        directory: &str,
        recursive: bool,
    ) -> Result<Vec<ContentEntry>, StorageError> {
        self.list_all(&directory_prefix(directory), recursive).await
    }

    fn get_url(&self, path: &str) -> String {
        let base_url = format!("{}{}", self.path_prefix, encode_key_path(path));
        self.auth.private_download_url(&base_url, DOWNLOAD_URL_TTL_SECS)
    }
}
