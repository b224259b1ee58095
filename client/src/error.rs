use mjpeg_tap_common::config::ConfigError;

/// The transport could not be established or failed mid-stream.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("failed to build HTTP client: {0}")]
    Client(reqwest::Error),
    #[error("HTTP connection failed: {0}")]
    Request(reqwest::Error),
    #[error("HTTP status {0}")]
    Status(u16),
    #[error("stream read failed: {0}")]
    Io(#[from] std::io::Error),
}

/// The byte stream does not follow the multipart framing.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("stream ended inside a part header block")]
    UnterminatedHeaders,
    #[error("part header block exceeds {limit} bytes")]
    HeaderBlockTooLarge { limit: usize },
    #[error("stream ended after {got} of {expected} payload bytes")]
    TruncatedPayload { expected: usize, got: usize },
}

/// Why a reader task gave up on its stream. Both kinds move the session to
/// `Error`.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("transport setup failed: {0}")]
    Transport(#[from] ConnectionError),
    #[error("sessions must be created inside a tokio runtime")]
    NoRuntime,
    #[error("session supervisor has shut down")]
    Closed,
}
