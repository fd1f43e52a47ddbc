//! callbridge-core — real-time telephony voice-agent bridge.
//!
//! Three cooperating units run per call: a Transport Adapter (owns the
//! WebSocket), an Audio Pipeline (VAD, segmentation, barge-in, interruptible
//! send), and a Dialogue Engine (STT/LLM/TTS collaborators, conversation
//! policy). See `transport::router` for the process entry point's `axum`
//! wiring.

pub mod audio_constants;
pub mod codec;
pub mod collaborators;
pub mod config;
pub mod dialogue;
pub mod errors;
pub mod pipeline;
pub mod rate_limiter;
pub mod session;
pub mod transport;
pub mod vad;

pub use config::Config;
pub use transport::{router, AppState};
