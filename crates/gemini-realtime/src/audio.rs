use base64::Engine;

/// Gemini Live expects 16 kHz mono PCM16 input.
pub const INPUT_SAMPLE_RATE: u32 = 16_000;
/// Gemini Live produces 24 kHz mono PCM16 output.
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

pub(crate) const INPUT_MIME_TYPE: &str = "audio/pcm;rate=16000";

/// Encodes PCM16 samples as little-endian bytes in base64.
pub fn encode_pcm16(samples: &[i16]) -> String {
    let bytes: Vec<u8> = samples
        .iter()
        .flat_map(|&sample| sample.to_le_bytes())
        .collect();
    base64::engine::general_purpose::STANDARD.encode(&bytes)
}

/// Decodes base64 little-endian PCM16. A trailing odd byte is dropped.
pub fn decode_pcm16(base64_fragment: &str) -> Result<Vec<i16>, base64::DecodeError> {
    let bytes = base64::engine::general_purpose::STANDARD.decode(base64_fragment)?;
    Ok(bytes
        .chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_known_bytes() {
        // 16384 = 0x4000, -32768 = 0x8000, little endian
        let encoded = base64::engine::general_purpose::STANDARD.encode([0x00u8, 0x40, 0x00, 0x80]);
        assert_eq!(decode_pcm16(&encoded).unwrap(), vec![16384, i16::MIN]);
    }

    #[test]
    fn test_encode_matches_wire_layout() {
        assert_eq!(encode_pcm16(&[256, -256]), "AAEA/w==");
        assert_eq!(encode_pcm16(&[]), "");
    }

    #[test]
    fn test_decode_odd_and_invalid_input() {
        let odd = base64::engine::general_purpose::STANDARD.encode([0x01u8]);
        assert!(decode_pcm16(&odd).unwrap().is_empty());
        assert!(decode_pcm16("invalid_base64!").is_err());
        assert!(decode_pcm16("").unwrap().is_empty());
    }
}
