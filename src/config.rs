//! Process configuration, loaded once at startup from the environment.
//!
//! Required fields have no default and cause startup to fail fast, before any
//! socket is opened. Tunables fall back to the defaults below.

use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    /// Carrier account id (e.g. Twilio Account SID).
    pub carrier_account_id: String,
    /// Carrier auth token.
    pub carrier_auth_token: String,
    /// Carrier phone number the agent answers on.
    pub carrier_phone_number: String,
    /// API key for the AI collaborators (STT/LLM/TTS).
    pub ai_api_key: String,
    /// Public base URL this service is reachable at (used to build the wss:// stream URL).
    pub public_base_url: String,
    /// Port to listen on.
    pub listen_port: u16,

    /// Base URL for the STT/LLM/TTS collaborator endpoints.
    pub ai_api_base_url: String,
    pub stt_model: String,
    pub llm_model: String,
    pub tts_model: String,
    pub tts_voice: String,

    pub vad_aggressiveness: u8,
    pub vad_silence_ms: u64,
    pub vad_min_speech_ms: u64,
    pub max_utterance_length_ms: u64,
    pub echo_cancellation_ms: u64,
    pub agent_response_delay_ms: u64,
    pub min_audio_level_threshold: f32,
    pub min_meaningful_words: usize,
    pub max_call_duration_s: u64,
    pub max_concurrent_calls: usize,
    pub rate_limit_window_minutes: u64,
    pub rate_limit_calls_per_window: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingRequired(&'static str),

    #[error("invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::MissingRequired(name))
}

fn optional_parse<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| ConfigError::InvalidValue { name, value: raw }),
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            carrier_account_id: required("CARRIER_ACCOUNT_ID")?,
            carrier_auth_token: required("CARRIER_AUTH_TOKEN")?,
            carrier_phone_number: required("CARRIER_PHONE_NUMBER")?,
            ai_api_key: required("AI_API_KEY")?,
            public_base_url: required("PUBLIC_BASE_URL")?,
            listen_port: optional_parse("SERVER_PORT", 8080)?,

            ai_api_base_url: optional_parse("AI_API_BASE_URL", "https://api.groq.com/openai/v1".to_string())?,
            stt_model: optional_parse("STT_MODEL", "whisper-large-v3".to_string())?,
            llm_model: optional_parse("LLM_MODEL", "llama-3.1-8b-instant".to_string())?,
            tts_model: optional_parse("TTS_MODEL", "playai-tts".to_string())?,
            tts_voice: optional_parse("TTS_VOICE", "jennifer".to_string())?,

            vad_aggressiveness: optional_parse("VAD_AGGRESSIVENESS", 1)?,
            vad_silence_ms: optional_parse("VAD_SILENCE_MS", 600)?,
            vad_min_speech_ms: optional_parse("VAD_MIN_SPEECH_MS", 150)?,
            max_utterance_length_ms: optional_parse("MAX_UTTERANCE_LENGTH_MS", 10_000)?,
            echo_cancellation_ms: optional_parse("ECHO_CANCELLATION_MS", 100)?,
            agent_response_delay_ms: optional_parse("AGENT_RESPONSE_DELAY_MS", 100)?,
            min_audio_level_threshold: optional_parse("MIN_AUDIO_LEVEL_THRESHOLD", 0.015)?,
            min_meaningful_words: optional_parse("MIN_MEANINGFUL_WORDS", 2)?,
            max_call_duration_s: optional_parse("MAX_CALL_DURATION_S", 600)?,
            max_concurrent_calls: optional_parse("MAX_CONCURRENT_CALLS", 5)?,
            rate_limit_window_minutes: optional_parse("RATE_LIMIT_WINDOW_MINUTES", 1)?,
            rate_limit_calls_per_window: optional_parse("RATE_LIMIT_CALLS_PER_WINDOW", 10)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_required_field_fails_fast() {
        // SERVER_PORT alone being present or absent must not matter here;
        // CARRIER_ACCOUNT_ID is required and, in a test process, unset.
        let err = required("DEFINITELY_NOT_SET_CALLBRIDGE_VAR");
        assert!(err.is_err());
    }

    #[test]
    fn optional_parse_falls_back_to_default() {
        let v: u8 = optional_parse("DEFINITELY_NOT_SET_CALLBRIDGE_VAR_2", 1).unwrap();
        assert_eq!(v, 1);
    }
}
