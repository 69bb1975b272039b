use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use reqwest::Client;
use tracing::debug;

use kodofs_common::backend::{BackendError, ByteStream, Downloader};

use super::rs::check_status;

/// Plain GET of a signed download URL.
pub struct HttpDownloader {
    client: Client,
}

impl HttpDownloader {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn fetch(&self, url: &str) -> Result<Bytes, BackendError> {
        let resp = self.client.get(url).send().await?;
        let resp = check_status(resp).await?;
        let data = resp.bytes().await?;
        debug!(size = data.len(), "Download complete");
        Ok(data)
    }

    /// Status errors surface here; body errors arrive as stream items.
    async fn fetch_stream(&self, url: &str) -> Result<ByteStream, BackendError> {
        let resp = self.client.get(url).send().await?;
        let resp = check_status(resp).await?;
        debug!(content_length = ?resp.content_length(), "Download stream opened");
        Ok(resp
            .bytes_stream()
            .map(|chunk| chunk.map_err(BackendError::from))
            .boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::extract::Path;
    use axum::http::StatusCode;
    use axum::response::{IntoResponse, Response as AxumResponse};
    use axum::routing::get;
    use axum::Router;

    async fn serve(Path(path): Path<String>) -> AxumResponse {
        if path == "big.bin" {
            (StatusCode::OK, vec![7u8; 256 * 1024]).into_response()
        } else if path == "photos/cat.png" {
            (StatusCode::OK, "meow").into_response()
        } else {
            (StatusCode::NOT_FOUND, r#"{"error":"Document not found"}"#).into_response()
        }
    }

    #[tokio::test]
    async fn test_fetch() {
        let app = Router::new().route("/{*path}", get(serve));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let downloader = HttpDownloader::new(Client::new());
        let data = downloader
            .fetch(&format!("http://{}/photos/cat.png?e=1&token=ak:sig", addr))
            .await
            .unwrap();
        assert_eq!(data, Bytes::from_static(b"meow"));

        let err = downloader
            .fetch(&format!("http://{}/missing.png", addr))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(!err.is_transport());
    }

    #[tokio::test]
    async fn test_fetch_stream() {
        let app = Router::new().route("/{*path}", get(serve));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let downloader = HttpDownloader::new(Client::new());
        let mut stream = downloader
            .fetch_stream(&format!("http://{}/big.bin", addr))
            .await
            .unwrap();
        let mut total = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.unwrap();
            assert!(chunk.iter().all(|b| *b == 7));
            total += chunk.len();
        }
        assert_eq!(total, 256 * 1024);

        let err = match downloader
            .fetch_stream(&format!("http://{}/missing.png", addr))
            .await
        {
            Ok(_) => panic!("missing object streamed"),
            Err(e) => e,
        };
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_fetch_connection_refused() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = HttpDownloader::new(Client::new())
            .fetch(&format!("http://{}/x.png", addr))
            .await
            .unwrap_err();
        assert!(err.is_transport());
    }
}
