//! In-memory backend.
//!
//! Implements the management, upload and download handles over one shared
//! map of buckets, with the backend's error codes and listing semantics.
//! Clones share state, so one instance can be handed to an adapter as all
//! three handles and still be inspected afterwards.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use tracing::debug;

use kodofs_common::backend::{
    BackendError, BucketManager, Downloader, ListPage, ObjectStat, PutExtra, UploadResult,
    Uploader, CODE_KEY_EXISTS, CODE_NO_SUCH_BUCKET, CODE_NO_SUCH_KEY, LIST_PAGE_LIMIT,
};

use crate::auth::PutPolicy;
use crate::bucket::{BucketConfig, BucketRegistry};

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    mime_type: String,
    hash: String,
    put_time: i64,
}

impl StoredObject {
    fn new(data: Bytes, mime_type: &str) -> Self {
        Self {
            hash: format!("{:08x}", crc32fast::hash(&data)),
            put_time: Utc::now().timestamp_nanos_opt().unwrap_or_default() / 100,
            mime_type: mime_type.to_string(),
            data,
        }
    }

    fn stat(&self, key: &str) -> ObjectStat {
        ObjectStat {
            key: key.to_string(),
            fsize: self.data.len() as u64,
            hash: self.hash.clone(),
            mime_type: self.mime_type.clone(),
            put_time: self.put_time,
            extra: Default::default(),
        }
    }
}

type Bucket = BTreeMap<String, StoredObject>;

#[derive(Debug, Default)]
struct State {
    buckets: HashMap<String, Bucket>,
    /// Download host -> bucket name.
    domains: HashMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<State>>,
}

fn no_such_bucket() -> BackendError {
    BackendError::call(CODE_NO_SUCH_BUCKET, "no such bucket")
}

fn no_such_key() -> BackendError {
    BackendError::call(CODE_NO_SUCH_KEY, "no such file or directory")
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend with every bucket of `registry` created and reachable by its domain.
    pub fn for_registry(registry: &BucketRegistry) -> Self {
        let backend = Self::new();
        for (_, bucket) in registry.iter() {
            backend.add_bucket(bucket);
        }
        backend
    }

    pub fn add_bucket(&self, bucket: &BucketConfig) {
        let mut state = self.state();
        state.buckets.entry(bucket.name.clone()).or_default();
        state
            .domains
            .insert(bucket.host().to_string(), bucket.name.clone());
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stored bytes of `bucket:key`, if present.
    pub fn object(&self, bucket: &str, key: &str) -> Option<Bytes> {
        self.state()
            .buckets
            .get(bucket)
            .and_then(|b| b.get(key))
            .map(|o| o.data.clone())
    }

    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.state()
            .buckets
            .get(bucket)
            .map(|b| b.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn transfer(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
        force: bool,
        remove_source: bool,
    ) -> Result<(), BackendError> {
        let mut state = self.state();
        if !state.buckets.contains_key(dst_bucket) {
            return Err(no_such_bucket());
        }
        let source = state.buckets.get_mut(src_bucket).ok_or_else(no_such_bucket)?;
        let object = (if remove_source {
            source.remove(src_key)
        } else {
            source.get(src_key).cloned()
        })
        .ok_or_else(no_such_key)?;

        let dest = state.buckets.entry(dst_bucket.to_string()).or_default();
        if dest.contains_key(dst_key) && !force {
            if remove_source {
                // put the source back; the move did not happen
                state
                    .buckets
                    .entry(src_bucket.to_string())
                    .or_default()
                    .insert(src_key.to_string(), object);
            }
            return Err(BackendError::call(CODE_KEY_EXISTS, "file exists"));
        }
        dest.insert(dst_key.to_string(), object);
        Ok(())
    }
}

/// One listing page over a sorted bucket.
///
/// Keys under an emitted common prefix are folded into it, and the
/// marker is the last key consumed, so a page never splits a prefix.
fn list_bucket(
    bucket: &Bucket,
    prefix: &str,
    delimiter: Option<&str>,
    marker: Option<&str>,
    limit: usize,
) -> ListPage {
    let limit = if limit == 0 { LIST_PAGE_LIMIT } else { limit };
    let mut page = ListPage::default();
    let mut last_key: Option<&str> = None;
    let mut count = 0;

    for (key, object) in bucket {
        if marker.is_some_and(|m| key.as_str() <= m) || !key.starts_with(prefix) {
            continue;
        }
        if let Some(common) = page.common_prefixes.last() {
            if key.starts_with(common.as_str()) {
                last_key = Some(key.as_str());
                continue;
            }
        }
        if count == limit {
            page.marker = last_key.map(str::to_string);
            break;
        }
        let rest = &key[prefix.len()..];
        match delimiter.and_then(|d| rest.find(d).map(|pos| pos + d.len())) {
            Some(end) => page
                .common_prefixes
                .push(format!("{}{}", prefix, &rest[..end])),
            None => page.items.push(object.stat(key)),
        }
        count += 1;
        last_key = Some(key.as_str());
    }
    page
}

#[async_trait]
impl BucketManager for MemoryBackend {
    async fn stat(&self, bucket: &str, key: &str) -> Result<ObjectStat, BackendError> {
        let state = self.state();
        let objects = state.buckets.get(bucket).ok_or_else(no_such_bucket)?;
        objects
            .get(key)
            .map(|o| o.stat(key))
            .ok_or_else(no_such_key)
    }

    async fn list(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: Option<&str>,
        marker: Option<&str>,
        limit: usize,
    ) -> Result<ListPage, BackendError> {
        let state = self.state();
        let objects = state.buckets.get(bucket).ok_or_else(no_such_bucket)?;
        Ok(list_bucket(objects, prefix, delimiter, marker, limit))
    }

    async fn move_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
        force: bool,
    ) -> Result<(), BackendError> {
        self.transfer(src_bucket, src_key, dst_bucket, dst_key, force, true)
    }

    async fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
        force: bool,
    ) -> Result<(), BackendError> {
        self.transfer(src_bucket, src_key, dst_bucket, dst_key, force, false)
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), BackendError> {
        let mut state = self.state();
        let objects = state.buckets.get_mut(bucket).ok_or_else(no_such_bucket)?;
        objects.remove(key).map(|_| ()).ok_or_else(no_such_key)
    }
}

#[async_trait]
impl Uploader for MemoryBackend {
    async fn put(
        &self,
        token: &str,
        key: &str,
        data: Bytes,
        extra: &PutExtra,
    ) -> Result<UploadResult, BackendError> {
        let policy = PutPolicy::from_token(token)?;
        if policy.is_expired_at(Utc::now().timestamp()) {
            return Err(BackendError::call(401, "expired token"));
        }
        if policy.key().is_some_and(|scoped| scoped != key) {
            return Err(BackendError::call(403, "key doesn't match with scope"));
        }

        let mut state = self.state();
        let objects = state
            .buckets
            .get_mut(policy.bucket())
            .ok_or_else(no_such_bucket)?;
        if objects.contains_key(key) && !policy.allows_overwrite() {
            return Err(BackendError::call(CODE_KEY_EXISTS, "file exists"));
        }
        let object = StoredObject::new(data, &extra.mime_type);
        let hash = object.hash.clone();
        objects.insert(key.to_string(), object);
        debug!(bucket = %policy.bucket(), key = %key, "Memory upload complete");

        Ok(UploadResult {
            key: key.to_string(),
            hash,
            extra: Default::default(),
        })
    }
}

#[async_trait]
impl Downloader for MemoryBackend {
    /// Serve `http(s)://<domain>/<key>?e=<deadline>&token=<sign>`.
    async fn fetch(&self, url: &str) -> Result<Bytes, BackendError> {
        let without_scheme = url
            .strip_prefix("https://")
            .or_else(|| url.strip_prefix("http://"))
            .unwrap_or(url);
        let (location, query) = without_scheme
            .split_once('?')
            .unwrap_or((without_scheme, ""));
        let (host, path) = location.split_once('/').unwrap_or((location, ""));

        let params: HashMap<&str, &str> = query
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .collect();
        let deadline = params.get("e").and_then(|e| e.parse::<i64>().ok());
        match (deadline, params.get("token")) {
            (Some(deadline), Some(_)) if deadline >= Utc::now().timestamp() => {}
            (Some(_), Some(_)) => return Err(BackendError::call(401, "token expired")),
            _ => return Err(BackendError::call(401, "token not specified")),
        }

        let key = urlencoding::decode(path)
            .map_err(|e| BackendError::Decode(format!("key is not valid UTF-8: {}", e)))?;
        let state = self.state();
        let bucket = state
            .domains
            .get(host)
            .and_then(|name| state.buckets.get(name))
            .ok_or_else(|| BackendError::call(404, format!("no bucket is served from {}", host)))?;
        bucket
            .get(key.as_ref())
            .map(|o| o.data.clone())
            .ok_or_else(|| BackendError::call(404, "not found"))
    }
}
