//! Speech-to-Text collaborator.

use async_trait::async_trait;

use crate::codec::wav::pcm_to_wav;
use crate::errors::SttError;

const GUIDANCE_PROMPT: &str =
    "Transcribe exactly what is spoken in this phone conversation. Be accurate and natural. \
     If unclear or just noise, return empty string.";

#[async_trait]
pub trait SpeechTranscriber: Send + Sync {
    /// Transcribe 8kHz mono PCM. Must tolerate empty/near-silent input by
    /// returning an empty string rather than erroring.
    async fn transcribe(&self, pcm: &[i16], sample_rate: u32) -> Result<String, SttError>;
}

/// Production adapter: wraps PCM as WAV and posts it to a Whisper-compatible
/// cloud transcription endpoint.
pub struct HttpSttAdapter {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
}

impl HttpSttAdapter {
    pub fn new(client: reqwest::Client, api_base: String, api_key: String, model: String) -> Self {
        Self {
            client,
            api_base,
            api_key,
            model,
        }
    }
}

#[async_trait]
impl SpeechTranscriber for HttpSttAdapter {
    async fn transcribe(&self, pcm: &[i16], sample_rate: u32) -> Result<String, SttError> {
        let wav_bytes = pcm_to_wav(pcm, sample_rate)
            .map_err(|e| SttError::Transport(format!("wav encode failed: {e}")))?;

        let form = reqwest::multipart::Form::new()
            .text("model", self.model.clone())
            .text("prompt", GUIDANCE_PROMPT)
            .part(
                "file",
                reqwest::multipart::Part::bytes(wav_bytes)
                    .file_name("audio.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| SttError::Transport(e.to_string()))?,
            );

        let response = self
            .client
            .post(format!("{}/audio/transcriptions", self.api_base))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| SttError::Transport(e.to_string()))?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(SttError::RateLimited);
        }
        if !response.status().is_success() {
            return Err(SttError::Transport(format!("status {}", response.status())));
        }

        #[derive(serde::Deserialize)]
        struct TranscriptionResponse {
            text: String,
        }

        let body: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| SttError::Transport(e.to_string()))?;

        Ok(body.text)
    }
}

/// Deterministic stub for tests: returns whatever fixed transcript it was
/// constructed with, regardless of input audio.
pub struct StubSttAdapter {
    pub fixed_transcript: String,
}

impl StubSttAdapter {
    pub fn new(fixed_transcript: impl Into<String>) -> Self {
        Self {
            fixed_transcript: fixed_transcript.into(),
        }
    }
}

#[async_trait]
impl SpeechTranscriber for StubSttAdapter {
    async fn transcribe(&self, _pcm: &[i16], _sample_rate: u32) -> Result<String, SttError> {
        Ok(self.fixed_transcript.clone())
    }
}
