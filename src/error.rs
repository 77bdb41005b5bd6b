use std::time::Duration;

pub type Result<T> = std::result::Result<T, Error>;

/// Failures that end or refuse a session. Malformed inbound records and
/// non-fatal agent errors are absorbed where they occur and never appear
/// here.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),

    #[error("channel open event not received within {0:?}")]
    ConnectTimeout(Duration),

    #[error("channel transport error: {0}")]
    Channel(String),

    #[error("audio capture error: {0}")]
    Capture(String),

    #[error("speech synthesis error: {0}")]
    Synthesis(String),

    #[error("speech playback error: {0}")]
    Playback(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}
