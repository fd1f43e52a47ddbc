//! Text-to-Speech collaborator.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::Serialize;

use crate::codec::wav::wav_to_pcm;
use crate::errors::TtsError;

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize `text` to 16-bit PCM at `sample_rate`. `cancelled` is
    /// checked before and after the network call; if set, synthesis aborts
    /// and returns `Ok(None)` rather than wasting playback on stale audio.
    async fn synthesize(
        &self,
        text: &str,
        voice: &str,
        sample_rate: u32,
        cancelled: &AtomicBool,
    ) -> Result<Option<Vec<i16>>, TtsError>;
}

pub struct HttpTtsAdapter {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
}

impl HttpTtsAdapter {
    pub fn new(client: reqwest::Client, api_base: String, api_key: String, model: String) -> Self {
        Self {
            client,
            api_base,
            api_key,
            model,
        }
    }
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    voice: &'a str,
    input: &'a str,
    response_format: &'static str,
    sample_rate: u32,
}

#[async_trait]
impl SpeechSynthesizer for HttpTtsAdapter {
    async fn synthesize(
        &self,
        text: &str,
        voice: &str,
        sample_rate: u32,
        cancelled: &AtomicBool,
    ) -> Result<Option<Vec<i16>>, TtsError> {
        if cancelled.load(Ordering::SeqCst) {
            return Ok(None);
        }

        let request = SpeechRequest {
            model: &self.model,
            voice,
            input: text,
            response_format: "wav",
            sample_rate,
        };

        let response = self
            .client
            .post(format!("{}/audio/speech", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| TtsError::Transport(e.to_string()))?;

        if cancelled.load(Ordering::SeqCst) {
            return Ok(None);
        }

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(TtsError::RateLimited);
        }
        if !response.status().is_success() {
            return Err(TtsError::Transport(format!("status {}", response.status())));
        }

        let wav_bytes = response
            .bytes()
            .await
            .map_err(|e| TtsError::Transport(e.to_string()))?;

        let pcm = wav_to_pcm(&wav_bytes).map_err(|e| TtsError::InvalidAudio(e.to_string()))?;
        Ok(Some(pcm))
    }
}

/// Deterministic stub for tests: synthesizes a fixed-length silent buffer
/// rather than calling out to a vendor.
pub struct StubTtsAdapter {
    pub samples_per_call: usize,
}

impl StubTtsAdapter {
    pub fn new(samples_per_call: usize) -> Self {
        Self { samples_per_call }
    }
}

#[async_trait]
impl SpeechSynthesizer for StubTtsAdapter {
    async fn synthesize(
        &self,
        _text: &str,
        _voice: &str,
        _sample_rate: u32,
        cancelled: &AtomicBool,
    ) -> Result<Option<Vec<i16>>, TtsError> {
        if cancelled.load(Ordering::SeqCst) {
            return Ok(None);
        }
        Ok(Some(vec![0i16; self.samples_per_call]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stub_returns_requested_sample_count() {
        let stub = StubTtsAdapter::new(1600);
        let flag = AtomicBool::new(false);
        let pcm = stub.synthesize("hello", "v", 8000, &flag).await.unwrap();
        assert_eq!(pcm.unwrap().len(), 1600);
    }

    #[tokio::test]
    async fn cancelled_probe_aborts_before_synthesis() {
        let stub = StubTtsAdapter::new(1600);
        let flag = AtomicBool::new(true);
        let pcm = stub.synthesize("hello", "v", 8000, &flag).await.unwrap();
        assert!(pcm.is_none());
    }
}
