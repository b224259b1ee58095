use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use image::imageops::FilterType;
use image::ImageFormat;
use mjpeg_tap_common::config::ResizeTarget;
use mjpeg_tap_common::frame::Frame;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("failed to create snapshot directory {0}: {1}")]
    CreateDir(String, std::io::Error),
    #[error("failed to write snapshot {0}: {1}")]
    Write(String, image::ImageError),
    #[error("snapshot task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Relative path for a frame snapshot.
/// e.g. "2026-02-18/20260218T093000000Z_000042.jpg"
pub fn snapshot_path(captured_at: DateTime<Utc>, seq: u64) -> PathBuf {
    PathBuf::from(captured_at.format("%Y-%m-%d").to_string()).join(format!(
        "{ts}_{seq:06}.jpg",
        ts = captured_at.format("%Y%m%dT%H%M%S%3fZ"),
    ))
}

/// Writes `frame` as a JPEG under `dir`, scaled to `resize` first if set.
/// Returns the written path.
pub async fn write_snapshot(
    dir: &Path,
    frame: Frame,
    resize: Option<ResizeTarget>,
) -> Result<PathBuf, SnapshotError> {
    let captured_at = frame.captured_at().unwrap_or_else(Utc::now);
    let path = dir.join(snapshot_path(captured_at, frame.seq));
    let task_path = path.clone();

    tokio::task::spawn_blocking(move || {
        if let Some(parent) = task_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SnapshotError::CreateDir(parent.display().to_string(), e))?;
        }
        let mut image = frame.into_image();
        if let Some(target) = resize {
            image = image.resize_exact(target.width, target.height, FilterType::Triangle);
        }
        // JPEG has no alpha channel.
        image
            .into_rgb8()
            .save_with_format(&task_path, ImageFormat::Jpeg)
            .map_err(|e| SnapshotError::Write(task_path.display().to_string(), e))
    })
    .await??;

    debug!(path = %path.display(), "snapshot written");
    Ok(path)
}
