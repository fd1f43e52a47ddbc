//! G.711 μ-law ↔ 16-bit linear PCM.
//!
//! `ulaw_decode` deliberately reconstructs samples from (sign, exponent,
//! mantissa) via the segment-bias formula below rather than a 256-entry
//! lookup table. The classic table some reference implementations ship has
//! a documented irregularity in its low-magnitude negative region (duplicate
//! values around the silence midpoint) — the formula has no such anomaly.

const BIAS: i32 = 0x84;
const CLIP: i32 = 32_635;

/// Per-segment magnitude offset, indexed by exponent (0..=7). Standard G.711
/// companding constant, not the suspect 256-entry decode table.
const SEGMENT_BIAS: [i32; 8] = [0, 132, 396, 924, 1980, 4092, 8316, 16764];

/// Encode linear PCM to μ-law, one output byte per input sample.
pub fn ulaw_encode(pcm: &[i16]) -> Vec<u8> {
    pcm.iter().map(|&s| encode_sample(s)).collect()
}

fn encode_sample(sample: i16) -> u8 {
    let sign: i32 = if sample < 0 { 0x80 } else { 0x00 };
    let mut magnitude = if sample < 0 {
        -(sample as i32)
    } else {
        sample as i32
    };
    magnitude = magnitude.min(CLIP) + BIAS;

    // Highest set bit among bits 14..7 selects which power-of-two segment
    // this magnitude falls in; no bit set in that range means the smallest
    // segment (quiet signal).
    let exponent = (7..=14)
        .rev()
        .find(|&bit| magnitude & (1 << bit) != 0)
        .map(|bit| bit - 7)
        .unwrap_or(0);
    let mantissa = (magnitude >> (exponent + 3)) & 0x0F;

    let byte = (sign | (exponent << 4) | mantissa) as u8;
    !byte
}

/// Decode μ-law to linear PCM, one output sample per input byte.
pub fn ulaw_decode(ulaw: &[u8]) -> Vec<i16> {
    ulaw.iter().map(|&b| decode_sample(b)).collect()
}

fn decode_sample(byte: u8) -> i16 {
    let byte = !byte;
    let sign = byte & 0x80;
    let exponent = ((byte >> 4) & 0x07) as usize;
    let mantissa = (byte & 0x0F) as i32;

    let magnitude = SEGMENT_BIAS[exponent] + (mantissa << (exponent + 3));
    let sample = if sign != 0 { -magnitude } else { magnitude };
    sample.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_encodes_to_0xff() {
        assert_eq!(encode_sample(0), 0xFF);
    }

    #[test]
    fn encode_is_one_byte_per_sample() {
        let pcm = vec![0i16; 777];
        assert_eq!(ulaw_encode(&pcm).len(), 777);
    }

    #[test]
    fn decode_is_one_sample_per_byte() {
        let ulaw = vec![0xFFu8; 42];
        assert_eq!(ulaw_decode(&ulaw).len(), 42);
    }

    #[test]
    fn roundtrip_stays_within_quantization_error() {
        let pcm: Vec<i16> = (-32000..32000).step_by(137).collect();
        let encoded = ulaw_encode(&pcm);
        let decoded = ulaw_decode(&encoded);
        assert_eq!(decoded.len(), pcm.len());
        for (original, roundtripped) in pcm.iter().zip(decoded.iter()) {
            // Largest segment step is 2^(7+3) = 1024; quantization error is
            // bounded by roughly one segment step.
            let diff = (*original as i32 - *roundtripped as i32).abs();
            assert!(diff <= 1100, "diff {diff} too large for {original} -> {roundtripped}");
        }
    }

    #[test]
    fn handles_arbitrary_lengths() {
        for len in [0, 1, 3, 319, 320, 321] {
            let pcm = vec![100i16; len];
            assert_eq!(ulaw_encode(&pcm).len(), len);
        }
    }
}
