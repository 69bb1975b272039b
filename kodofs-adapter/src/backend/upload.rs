//! Form upload: one multipart POST per object, authorised by an upload token.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use tracing::debug;

use kodofs_common::backend::{BackendError, PutExtra, UploadResult, Uploader};

use super::rs::check_status;

pub const DEFAULT_UP_HOST: &str = "https://upload.qiniup.com";

pub struct FormUploader {
    client: Client,
    up_host: String,
}

impl FormUploader {
    pub fn new(client: Client, up_host: impl Into<String>) -> Self {
        Self {
            client,
            up_host: up_host.into().trim_end_matches('/').to_string(),
        }
    }
}

fn build_form(token: &str, key: &str, data: Bytes, extra: &PutExtra) -> Result<Form, BackendError> {
    let mut form = Form::new()
        .text("token", token.to_string())
        .text("key", key.to_string());
    for (name, value) in &extra.params {
        form = form.text(name.clone(), value.clone());
    }
    if extra.check_crc {
        form = form.text("crc32", crc32fast::hash(&data).to_string());
    }
    let file_name = key.rsplit('/').next().unwrap_or(key).to_string();
    let part = Part::bytes(data.to_vec())
        .file_name(file_name)
        .mime_str(&extra.mime_type)?;
    Ok(form.part("file", part))
}

#[async_trait]
impl Uploader for FormUploader {
    async fn put(
        &self,
        token: &str,
        key: &str,
        data: Bytes,
        extra: &PutExtra,
    ) -> Result<UploadResult, BackendError> {
        let size = data.len();
        let form = build_form(token, key, data, extra)?;
        let resp = self
            .client
            .post(format!("{}/", self.up_host))
            .multipart(form)
            .send()
            .await?;
        let resp = check_status(resp).await?;
        let body = resp.text().await?;
        let result: UploadResult =
            serde_json::from_str(&body).map_err(|e| BackendError::Decode(e.to_string()))?;
        debug!(key = %result.key, size, "Upload complete");
        Ok(result)
    }
}
