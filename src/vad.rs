//! Voice Activity Detection — runtime-swappable, trait-based, like the rest
//! of this stack's pluggable algorithms.
//!
//! Detection is pure computation over one 20 ms/8 kHz frame, so the trait is
//! sync — no need to make frame-by-frame classification async.

use earshot::{VoiceActivityDetector, VoiceActivityProfile};

use crate::audio_constants::AUDIO_FRAME_SAMPLES;

#[derive(Debug, thiserror::Error)]
pub enum VadError {
    #[error("invalid frame: expected {expected} samples, got {actual}")]
    InvalidFrame { expected: usize, actual: usize },
}

pub trait VoiceActivity: Send + Sync {
    /// Is this 20 ms/8 kHz frame speech?
    fn detect(&mut self, frame: &[i16]) -> Result<bool, VadError>;
}

/// WebRTC-style fixed-point VAD at the configured aggressiveness (1..=3).
pub struct WebRtcVad {
    inner: VoiceActivityDetector,
}

impl WebRtcVad {
    pub fn new(aggressiveness: u8) -> Self {
        let profile = match aggressiveness {
            0 | 1 => VoiceActivityProfile::LBR,
            2 => VoiceActivityProfile::AGGRESSIVE,
            _ => VoiceActivityProfile::VERY_AGGRESSIVE,
        };
        Self {
            inner: VoiceActivityDetector::new(profile),
        }
    }
}

impl VoiceActivity for WebRtcVad {
    fn detect(&mut self, frame: &[i16]) -> Result<bool, VadError> {
        if frame.len() != AUDIO_FRAME_SAMPLES {
            return Err(VadError::InvalidFrame {
                expected: AUDIO_FRAME_SAMPLES,
                actual: frame.len(),
            });
        }
        self.inner
            .predict_8khz(frame)
            .map_err(|_| VadError::InvalidFrame {
                expected: AUDIO_FRAME_SAMPLES,
                actual: frame.len(),
            })
    }
}

/// Dependency-free RMS-threshold VAD, kept for tests and environments that
/// want to avoid the WebRTC backend.
pub struct RmsThresholdVad {
    threshold: f32,
}

impl RmsThresholdVad {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }
}

impl VoiceActivity for RmsThresholdVad {
    fn detect(&mut self, frame: &[i16]) -> Result<bool, VadError> {
        Ok(crate::pipeline::rms(frame) >= self.threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rms_vad_flags_loud_frame_as_speech() {
        let mut vad = RmsThresholdVad::new(0.01);
        let loud = vec![20_000i16; AUDIO_FRAME_SAMPLES];
        assert!(vad.detect(&loud).unwrap());
    }

    #[test]
    fn rms_vad_flags_silence_as_not_speech() {
        let mut vad = RmsThresholdVad::new(0.01);
        let silence = vec![0i16; AUDIO_FRAME_SAMPLES];
        assert!(!vad.detect(&silence).unwrap());
    }

    #[test]
    fn webrtc_vad_rejects_wrong_frame_size() {
        let mut vad = WebRtcVad::new(1);
        let bad = vec![0i16; 17];
        assert!(vad.detect(&bad).is_err());
    }
}
