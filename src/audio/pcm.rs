// Wire codec for audio payloads
//
// Outbound blocks are float samples converted to 16-bit signed PCM
// (little-endian) and base64-encoded. Inbound synthesized speech arrives
// in the same PCM16 LE framing and is expanded back to floats in [-1, 1).

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::error::{MeetError, Result};

/// Convert float samples to signed 16-bit PCM
///
/// Samples are clamped to [-1, 1]; negative values scale by 0x8000 and
/// positive values by 0x7FFF so both extremes map exactly.
pub fn float32_to_pcm16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| {
            let s = s.clamp(-1.0, 1.0);
            if s < 0.0 {
                (s * 32768.0) as i16
            } else {
                (s * 32767.0) as i16
            }
        })
        .collect()
}

/// Convert signed 16-bit PCM to float samples
pub fn pcm16_to_float32(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| s as f32 / 32768.0).collect()
}

/// Encode a captured block for an outbound `audio` message
pub fn encode_block(samples: &[f32]) -> String {
    let pcm_bytes: Vec<u8> = float32_to_pcm16(samples)
        .iter()
        .flat_map(|s| s.to_le_bytes())
        .collect();

    STANDARD.encode(pcm_bytes)
}

/// Decode an inbound `audio` payload into float samples
pub fn decode_payload(data: &str) -> Result<Vec<f32>> {
    let bytes = STANDARD.decode(data.trim())?;

    if bytes.len() % 2 != 0 {
        return Err(MeetError::Protocol(format!(
            "PCM16 payload has odd length {}",
            bytes.len()
        )));
    }

    let pcm: Vec<i16> = bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect();

    Ok(pcm16_to_float32(&pcm))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_to_pcm16_extremes() {
        let pcm = float32_to_pcm16(&[-1.0, 0.0, 1.0, 2.0, -3.0]);
        assert_eq!(pcm, vec![i16::MIN, 0, i16::MAX, i16::MAX, i16::MIN]);
    }

    #[test]
    fn test_float_to_pcm16_half_scale() {
        let pcm = float32_to_pcm16(&[0.5, -0.5]);
        assert_eq!(pcm, vec![16383, -16384]);
    }

    #[test]
    fn test_encode_block_is_little_endian() {
        // 1.0 -> 0x7FFF -> [0xFF, 0x7F]
        let encoded = encode_block(&[1.0]);
        assert_eq!(STANDARD.decode(encoded).unwrap(), vec![0xFF, 0x7F]);
    }

    #[test]
    fn test_decode_payload() {
        let bytes: Vec<u8> = [0i16, 16384, -32768]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();
        let samples = decode_payload(&STANDARD.encode(bytes)).unwrap();
        assert_eq!(samples, vec![0.0, 0.5, -1.0]);
    }

    #[test]
    fn test_decode_rejects_odd_length() {
        let err = decode_payload(&STANDARD.encode([1u8, 2, 3])).unwrap_err();
        assert!(matches!(err, MeetError::Protocol(_)));
    }

    #[test]
    fn test_decode_rejects_invalid_base64() {
        let err = decode_payload("not base64!!").unwrap_err();
        assert!(matches!(err, MeetError::Protocol(_)));
    }
}
