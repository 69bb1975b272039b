pub mod download;
pub mod memory;
pub mod rs;
pub mod upload;

use anyhow::bail;

use crate::adapter::{Clients, QiniuAdapter};
use crate::auth::Auth;
use crate::config::DiskConfig;

use self::memory::MemoryBackend;

/// Construct an adapter for a validated disk configuration.
///
/// The `qiniu` driver talks HTTP to the configured endpoints; the
/// `memory` driver keeps every bucket in process.
pub fn from_disk_config(config: &DiskConfig) -> anyhow::Result<QiniuAdapter> {
    let registry = config.registry()?;
    let auth = Auth::new(config.access_key.clone(), config.secret_key.clone());

    let clients = match config.driver.as_str() {
        "qiniu" => Clients::http(&auth, &config.endpoints(), config.timeout())?,
        "memory" => {
            let backend = MemoryBackend::for_registry(&registry);
            Clients {
                manager: Box::new(backend.clone()),
                uploader: Box::new(backend.clone()),
                downloader: Box::new(backend),
            }
        }
        other => bail!("Unknown storage driver: {}", other),
    };

    Ok(QiniuAdapter::with_clients(auth, registry, clients)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    use bytes::Bytes;
    use kodofs_common::storage::{FileStorage, WriteOptions};

    fn config(driver: &str) -> DiskConfig {
        let toml_str = format!(
            r#"
driver = "{}"
access_key = "ak"
secret_key = "sk"

[[buckets]]
alias = "image"
name = "my-images"
domain = "img.example.com"
"#,
            driver
        );
        toml::from_str(&toml_str).unwrap()
    }

    #[test]
    fn test_qiniu_driver() {
        let adapter = from_disk_config(&config("qiniu")).unwrap();
        assert_eq!(adapter.active_bucket(), "my-images");
        assert!(adapter.get_url("a.png").starts_with("http://img.example.com/a.png?e="));
    }

    #[tokio::test]
    async fn test_memory_driver_roundtrip() {
        let adapter = from_disk_config(&config("memory")).unwrap();
        adapter
            .write("a.txt", Bytes::from("hi"), &WriteOptions::default())
            .await
            .unwrap();
        assert_eq!(adapter.read("a.txt").await.unwrap().contents, Bytes::from("hi"));
    }

    #[test]
    fn test_unknown_driver() {
        assert!(from_disk_config(&config("ftp")).is_err());
    }
}
