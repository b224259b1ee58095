use std::io::Cursor;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use image::{DynamicImage, ImageFormat, ImageReader};
use mjpeg_tap_common::frame::Frame;

/// Turns one encoded payload into a raster image.
///
/// Implementations receive raw part bytes and must not assume they are
/// valid image data.
pub trait RasterDecoder: Send + Sync {
    fn decode(&self, payload: &[u8]) -> Result<DynamicImage, DecodeError>;

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("payload is empty")]
    Empty,
    #[error("invalid image data: {0}")]
    Image(#[from] image::ImageError),
    #[error("decoder panicked")]
    Panicked,
}

/// JPEG decoding through the `image` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct JpegDecoder;

impl RasterDecoder for JpegDecoder {
    fn decode(&self, payload: &[u8]) -> Result<DynamicImage, DecodeError> {
        if payload.is_empty() {
            return Err(DecodeError::Empty);
        }
        let img = ImageReader::with_format(Cursor::new(payload), ImageFormat::Jpeg).decode()?;
        Ok(img)
    }

    fn name(&self) -> &str {
        "jpeg"
    }
}

/// Wraps a [`RasterDecoder`] and stamps decoded images into [`Frame`]s.
///
/// Decoding runs on the blocking pool so large frames never stall the
/// reader's runtime worker.
#[derive(Clone)]
pub struct FrameDecoder {
    inner: Arc<dyn RasterDecoder>,
    seq: Arc<AtomicU64>,
}

impl FrameDecoder {
    pub fn new(inner: Arc<dyn RasterDecoder>) -> Self {
        Self {
            inner,
            seq: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    /// Decode a payload. Sequence numbers count successful decodes across
    /// every start/stop cycle of the owning session.
    pub async fn decode(&self, payload: Bytes) -> Result<Frame, DecodeError> {
        let inner = Arc::clone(&self.inner);
        let payload_len = payload.len();
        let image = tokio::task::spawn_blocking(move || inner.decode(&payload))
            .await
            .map_err(|_| DecodeError::Panicked)??;
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        Ok(Frame::new(
            image,
            seq,
            Utc::now().timestamp_millis(),
            payload_len,
        ))
    }
}
