//! Canonical mono 16-bit WAV container wrap/unwrap, for collaborators that
//! demand a WAV byte stream instead of raw PCM.

use std::io::Cursor;

#[derive(Debug, thiserror::Error)]
pub enum WavError {
    #[error("wav encode failed: {0}")]
    Encode(String),

    #[error("wav decode failed: {0}")]
    Decode(String),
}

/// Wrap linear PCM samples in a mono, 16-bit WAV container at `sample_rate`.
pub fn pcm_to_wav(pcm: &[i16], sample_rate: u32) -> Result<Vec<u8>, WavError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut buf = Vec::new();
    {
        let cursor = Cursor::new(&mut buf);
        let mut writer =
            hound::WavWriter::new(cursor, spec).map_err(|e| WavError::Encode(e.to_string()))?;
        for &sample in pcm {
            writer
                .write_sample(sample)
                .map_err(|e| WavError::Encode(e.to_string()))?;
        }
        writer.finalize().map_err(|e| WavError::Encode(e.to_string()))?;
    }
    Ok(buf)
}

/// Extract linear PCM samples from a WAV byte buffer, regardless of its
/// original sample rate (callers resample if they need a specific rate).
pub fn wav_to_pcm(wav_bytes: &[u8]) -> Result<Vec<i16>, WavError> {
    let cursor = Cursor::new(wav_bytes);
    let mut reader = hound::WavReader::new(cursor).map_err(|e| WavError::Decode(e.to_string()))?;
    let samples: Result<Vec<i16>, _> = reader.samples::<i16>().collect();
    samples.map_err(|e| WavError::Decode(e.to_string()))
}
