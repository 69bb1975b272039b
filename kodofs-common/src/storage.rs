//! Uniform file-operation contract.
//!
//! A filesystem facade dispatches generic file operations through
//! [`FileStorage`] without knowing which object store sits behind it.
//! Object stores have no real directories: "directories" here are key
//! prefixes ending in `/`.

use std::collections::BTreeMap;

use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::backend::{BackendError, ObjectStat, UploadResult};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("Transport error: {0}")]
    Transport(String),
}

/// File content as a stream of chunks.
pub type StorageStream = BoxStream<'static, Result<Bytes, StorageError>>;

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::Backend(e) if e.is_not_found())
    }
}

/// Per-call options for `write` / `update`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteOptions {
    /// Registry alias of the bucket to write into, for this call only.
    pub bucket: Option<String>,
    pub params: BTreeMap<String, String>,
    /// Content type; `application/octet-stream` when unset.
    pub mime: Option<String>,
    pub check_crc: bool,
}

impl WriteOptions {
    pub fn with_bucket(mut self, alias: impl Into<String>) -> Self {
        self.bucket = Some(alias.into());
        self
    }

    pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
        self.mime = Some(mime.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FileContents {
    pub contents: Bytes,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Dir,
}

/// Normalised listing entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContentEntry {
    pub kind: EntryKind,
    pub path: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Unix seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl ContentEntry {
    pub fn file(stat: &ObjectStat) -> Self {
        Self {
            kind: EntryKind::File,
            path: stat.key.clone(),
            mime_type: Some(stat.mime_type.clone()),
            timestamp: Some(stat.timestamp()),
            size: Some(stat.fsize),
        }
    }

    pub fn dir(prefix: &str) -> Self {
        Self {
            kind: EntryKind::Dir,
            path: prefix.trim_end_matches('/').to_string(),
            mime_type: None,
            timestamp: None,
            size: None,
        }
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DirectoryInfo {
    pub path: String,
}

/// The operation set every storage adapter exposes to the facade.
///
/// Operations run to completion in call order; implementations do not
/// fan requests out concurrently.
#[async_trait::async_trait]
pub trait FileStorage: Send + Sync {
    /// Upload `contents` to `path`, replacing any existing object.
    async fn write(
        &self,
        path: &str,
        contents: Bytes,
        options: &WriteOptions,
    ) -> Result<UploadResult, StorageError>;

    /// Same as `write`: uploads always overwrite.
    async fn update(
        &self,
        path: &str,
        contents: Bytes,
        options: &WriteOptions,
    ) -> Result<UploadResult, StorageError> {
        self.write(path, contents, options).await
    }

    /// Upload everything `contents` yields to `path`.
    ///
    /// Chunks are buffered and sent as one upload. A failed chunk aborts
    /// the write before anything reaches the backend.
    async fn write_stream(
        &self,
        path: &str,
        mut contents: StorageStream,
        options: &WriteOptions,
    ) -> Result<UploadResult, StorageError> {
        let mut buffer = BytesMut::new();
        while let Some(chunk) = contents.next().await {
            buffer.extend_from_slice(&chunk?);
        }
        self.write(path, buffer.freeze(), options).await
    }

    async fn update_stream(
        &self,
        path: &str,
        contents: StorageStream,
        options: &WriteOptions,
    ) -> Result<UploadResult, StorageError> {
        self.write_stream(path, contents, options).await
    }

    async fn read(&self, path: &str) -> Result<FileContents, StorageError>;

    /// Content of `path` as a stream. The default yields the result of
    /// `read` as one chunk.
    async fn read_stream(&self, path: &str) -> Result<StorageStream, StorageError> {
        let file = self.read(path).await?;
        Ok(stream::once(async move { Ok(file.contents) }).boxed())
    }

    async fn rename(&self, path: &str, new_path: &str) -> Result<(), StorageError>;

    async fn copy(&self, path: &str, new_path: &str) -> Result<(), StorageError>;

    async fn delete(&self, path: &str) -> Result<(), StorageError>;

    /// Delete every object under `directory`.
    async fn delete_dir(&self, directory: &str) -> Result<(), StorageError>;

    /// Directories are a naming convention; nothing is created remotely.
    async fn create_dir(&self, directory: &str) -> Result<DirectoryInfo, StorageError> {
        Ok(DirectoryInfo {
            path: directory.to_string(),
        })
    }

    async fn has(&self, path: &str) -> Result<bool, StorageError> {
        match self.get_metadata(path).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn get_metadata(&self, path: &str) -> Result<ObjectStat, StorageError>;

    async fn get_size(&self, path: &str) -> Result<u64, StorageError> {
        Ok(self.get_metadata(path).await?.fsize)
    }

    async fn get_mimetype(&self, path: &str) -> Result<String, StorageError> {
        Ok(self.get_metadata(path).await?.mime_type)
    }

    /// Upload time of `path` in Unix seconds.
    async fn get_timestamp(&self, path: &str) -> Result<i64, StorageError> {
        Ok(self.get_metadata(path).await?.timestamp())
    }

    async fn list_contents(
        &self,
        directory: &str,
        recursive: bool,
    ) -> Result<Vec<ContentEntry>, StorageError>;

    /// Signed download URL for `path`. Builds the URL only; no request is made.
    fn get_url(&self, path: &str) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_from_stat() {
        let stat = ObjectStat {
            key: "docs/a.txt".into(),
            fsize: 5,
            hash: "h".into(),
            mime_type: "text/plain".into(),
            put_time: 16_000_000_000_000_000,
            extra: Default::default(),
        };
        let entry = ContentEntry::file(&stat);
        assert!(entry.is_file());
        assert_eq!(entry.path, "docs/a.txt");
        assert_eq!(entry.timestamp, Some(1_600_000_000));
        assert_eq!(entry.size, Some(5));
    }

    #[test]
    fn test_dir_entry_serialization() {
        let entry = ContentEntry::dir("docs/sub/");
        assert_eq!(entry.path, "docs/sub");
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "dir", "path": "docs/sub"}));
    }

    /// Keeps uploads in a map; everything else is out of scope here.
    #[derive(Default)]
    struct Uploads(std::sync::Mutex<BTreeMap<String, Bytes>>);

    #[async_trait::async_trait]
    impl FileStorage for Uploads {
        async fn write(
            &self,
            path: &str,
            contents: Bytes,
            _options: &WriteOptions,
        ) -> Result<UploadResult, StorageError> {
            self.0.lock().unwrap().insert(path.to_string(), contents);
            Ok(UploadResult {
                key: path.to_string(),
                hash: String::new(),
                extra: Default::default(),
            })
        }

        async fn read(&self, path: &str) -> Result<FileContents, StorageError> {
            let contents = self.0.lock().unwrap().get(path).cloned();
            contents
                .map(|contents| FileContents { contents })
                .ok_or_else(|| BackendError::call(612, "no such file or directory").into())
        }

        async fn rename(&self, _: &str, _: &str) -> Result<(), StorageError> {
            unimplemented!()
        }

        async fn copy(&self, _: &str, _: &str) -> Result<(), StorageError> {
            unimplemented!()
        }

        async fn delete(&self, _: &str) -> Result<(), StorageError> {
            unimplemented!()
        }

        async fn delete_dir(&self, _: &str) -> Result<(), StorageError> {
            unimplemented!()
        }

        async fn get_metadata(&self, _: &str) -> Result<ObjectStat, StorageError> {
            unimplemented!()
        }

        async fn list_contents(&self, _: &str, _: bool) -> Result<Vec<ContentEntry>, StorageError> {
            unimplemented!()
        }

        fn get_url(&self, path: &str) -> String {
            path.to_string()
        }
    }

    fn chunks(parts: Vec<Result<&'static str, StorageError>>) -> StorageStream {
        stream::iter(
            parts
                .into_iter()
                .map(|part| part.map(|text| Bytes::from_static(text.as_bytes()))),
        )
        .boxed()
    }

    #[tokio::test]
    async fn test_write_stream_buffers_chunks() {
        let storage = Uploads::default();
        let contents = chunks(vec![Ok("hello "), Ok("streamed "), Ok("world")]);
        storage
            .write_stream("a.txt", contents, &WriteOptions::default())
            .await
            .unwrap();

        let mut read = storage.read_stream("a.txt").await.unwrap();
        let mut data = Vec::new();
        while let Some(chunk) = read.next().await {
            data.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(data, b"hello streamed world");
    }

    #[tokio::test]
    async fn test_failed_chunk_aborts_write() {
        let storage = Uploads::default();
        let contents = chunks(vec![
            Ok("partial"),
            Err(StorageError::Transport("connection reset".into())),
        ]);
        let err = storage
            .update_stream("a.txt", contents, &WriteOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Transport(_)));
        assert!(storage.0.lock().unwrap().is_empty());
        assert!(matches!(
            storage.read_stream("a.txt").await,
            Err(e) if e.is_not_found()
        ));
    }

    #[test]
    fn test_storage_error_not_found() {
        let err = StorageError::from(BackendError::call(612, "no such file or directory"));
        assert!(err.is_not_found());
        assert!(!StorageError::Configuration("empty".into()).is_not_found());
        assert!(!StorageError::Transport("reset".into()).is_not_found());
    }
}
