//! AI collaborators: STT, LLM, TTS. Each is a small `async_trait`, matching
//! the trait-based swappable-backend shape the rest of this stack uses (see
//! `vad.rs`) — one production adapter backed by `reqwest`, one deterministic
//! stub adapter for tests that never touches the network.

pub mod llm;
pub mod stt;
pub mod tts;

pub use llm::{LlmReply, ReplyGenerator};
pub use stt::SpeechTranscriber;
pub use tts::SpeechSynthesizer;

use std::time::Duration;

/// Shared HTTP client for all collaborator adapters, with a generous timeout
/// since STT/TTS/LLM round trips can legitimately take several seconds.
pub fn build_http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .expect("reqwest client configuration is valid")
}

pub const DEFAULT_COLLABORATOR_TIMEOUT: Duration = Duration::from_secs(30);
