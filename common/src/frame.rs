use chrono::{DateTime, TimeZone, Utc};
use image::DynamicImage;

/// A decoded camera frame with capture metadata.
///
/// Frames are immutable once produced. Delivery hands ownership to the
/// consumer, which may take the raster out with [`Frame::into_image`].
#[derive(Debug, Clone)]
pub struct Frame {
    image: DynamicImage,
    /// Per-session sequence number, counting decoded frames.
    pub seq: u64,
    /// Wall-clock time the payload finished decoding (Unix millis).
    pub captured_at_ms: i64,
    /// Size of the encoded payload the frame was decoded from.
    pub payload_len: usize,
}

impl Frame {
    pub fn new(image: DynamicImage, seq: u64, captured_at_ms: i64, payload_len: usize) -> Self {
        Self {
            image,
            seq,
            captured_at_ms,
            payload_len,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Returns `(width, height)` in pixels.
    pub fn dimensions(&self) -> (u32, u32) {
        (self.image.width(), self.image.height())
    }

    /// Capture time, if `captured_at_ms` is in chrono's representable range.
    pub fn captured_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.captured_at_ms).single()
    }

    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    pub fn into_image(self) -> DynamicImage {
        self.image
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dimensions_follow_image() {
        let frame = Frame::new(DynamicImage::new_rgb8(4, 3), 7, 1708300000000, 128);
        assert_eq!(frame.dimensions(), (4, 3));
        assert_eq!(frame.width(), 4);
        assert_eq!(frame.height(), 3);
        assert_eq!(frame.seq, 7);
        assert_eq!(frame.payload_len, 128);
        assert_eq!(
            frame.captured_at().map(|t| t.timestamp_millis()),
            Some(1708300000000)
        );
        assert_eq!(frame.into_image().width(), 4);
    }
}
