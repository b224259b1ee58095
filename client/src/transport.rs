use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::io::AsyncBufRead;
use tokio_util::io::StreamReader;
use tracing::info;

use crate::error::ConnectionError;

/// Buffered byte source for a stream body: line reads plus exact-length reads.
pub type ByteSource = Pin<Box<dyn AsyncBufRead + Send>>;

/// An opened stream: status line, declared content type, and the body.
pub struct StreamResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: ByteSource,
}

impl StreamResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Opens a byte stream for a locator. Implementations own connection setup;
/// the session only reads the body and drops it to release the connection.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &str) -> Result<StreamResponse, ConnectionError>;
}

/// HTTP GET over reqwest. No read timeout: MJPEG bodies are unbounded.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, ConnectionError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(ConnectionError::Client)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &str) -> Result<StreamResponse, ConnectionError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(ConnectionError::Request)?;

        info!(status = %response.status(), url, "connected to MJPEG stream");

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);

        let byte_stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(std::io::Error::other));

        Ok(StreamResponse {
            status,
            content_type,
            body: Box::pin(StreamReader::new(byte_stream)),
        })
    }
}
