//! Per-subsystem error types.
//!
//! One enum per subsystem, mirroring how VAD/STT/TTS each carried their own
//! error type rather than a single crate-wide catch-all.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("websocket closed: {0}")]
    Closed(String),

    #[error("malformed control frame: {0}")]
    MalformedFrame(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Codec errors are not reachable on correctly-shaped carrier input; kept so
/// the decode/encode functions have an honest signature rather than panicking.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid sample count: {0}")]
    InvalidLength(String),
}

#[derive(Debug, Error)]
pub enum SttError {
    #[error("rate limited")]
    RateLimited,

    #[error("transport error: {0}")]
    Transport(String),
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("rate limited")]
    RateLimited,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid JSON reply: {0}")]
    InvalidJson(String),
}

#[derive(Debug, Error)]
pub enum TtsError {
    #[error("rate limited")]
    RateLimited,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid audio payload: {0}")]
    InvalidAudio(String),
}
