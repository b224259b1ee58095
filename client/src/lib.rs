//! Control client for MJPEG streams served as `multipart/x-mixed-replace`.
//!
//! A [`Session`] reads one stream in a background task, decodes each part
//! into a [`Frame`] and hands the newest frame to the caller through a
//! [`FrameSource`]. Frames the caller does not pick up in time are replaced,
//! never queued.

pub mod boundary;
pub mod decoder;
pub mod error;
mod pipeline;
mod reader;
mod session;
mod status;
pub mod transport;
mod watchdog;

pub use decoder::{DecodeError, JpegDecoder, RasterDecoder};
pub use error::{ConnectionError, ProtocolError, SessionError, StreamError};
pub use mjpeg_tap_common::config::{ResizeTarget, StreamConfig};
pub use mjpeg_tap_common::frame::Frame;
pub use mjpeg_tap_common::state::{ControlCommand, StreamState};
pub use pipeline::FrameSource;
pub use session::Session;
pub use status::StatusUpdates;
pub use transport::{ByteSource, HttpTransport, StreamResponse, Transport};
