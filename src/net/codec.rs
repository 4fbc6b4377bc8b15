//! Base64 body codec for the forwarding proxy.
//!
//! The proxy ships binary bodies as RFC 4648 standard base64. Decoding is
//! lenient about padding and embedded ASCII whitespace (line-wrapped bodies
//! are common) but otherwise byte-exact.

use crate::error::Arxiv2MdError;
use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD};
use base64::engine::DecodePaddingMode;
use base64::Engine as _;

const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Decode a standard-alphabet base64 string into raw bytes.
pub fn decode_base64(data: &str) -> Result<Vec<u8>, Arxiv2MdError> {
    let compact: String = data.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    LENIENT
        .decode(compact.as_bytes())
        .map_err(|e| Arxiv2MdError::ProxyEncoding {
            encoding: format!("base64 ({e})"),
        })
}

/// Encode bytes as padded standard base64.
pub fn encode_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_all_lengths() {
        for len in 0..=1000usize {
            let bytes: Vec<u8> = (0..len).map(|i| (i * 31 + len) as u8).collect();
            let encoded = encode_base64(&bytes);
            let decoded = decode_base64(&encoded).unwrap();
            assert_eq!(decoded, bytes, "length {len}");
        }
    }

    #[test]
    fn rfc4648_vectors() {
        let vectors = [
            ("", ""),
            ("f", "Zg=="),
            ("fo", "Zm8="),
            ("foo", "Zm9v"),
            ("foob", "Zm9vYg=="),
            ("fooba", "Zm9vYmE="),
            ("foobar", "Zm9vYmFy"),
        ];
        for (plain, encoded) in vectors {
            assert_eq!(decode_base64(encoded).unwrap(), plain.as_bytes());
            assert_eq!(encode_base64(plain.as_bytes()), encoded);
        }
    }

    #[test]
    fn tolerates_whitespace_and_missing_padding() {
        assert_eq!(decode_base64("Zm9v\nYmFy\r\n").unwrap(), b"foobar");
        assert_eq!(decode_base64("Zg").unwrap(), b"f");
    }

    #[test]
    fn all_byte_values() {
        let bytes: Vec<u8> = (0..=255u8).collect();
        assert_eq!(decode_base64(&encode_base64(&bytes)).unwrap(), bytes);
    }

    #[test]
    fn rejects_invalid_alphabet() {
        assert!(matches!(
            decode_base64("Zm9v*YmFy"),
            Err(Arxiv2MdError::ProxyEncoding { .. })
        ));
    }
}
