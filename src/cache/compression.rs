//! zstd compression for cached payloads
//!
//! Every payload is encoded as a zstd frame, so `decompress(compress(x))`
//! returns `x` exactly for any input, including empty input.

use thiserror::Error;

/// Default compression level (fast, decent ratio)
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

#[derive(Debug, Error)]
pub enum CompressionError {
    #[error("compression failed: {0}")]
    CompressFailed(String),

    #[error("decompression failed: {0}")]
    DecompressFailed(String),
}

/// Compress bytes at the given zstd level (1-22)
pub fn compress(data: &[u8], level: i32) -> Result<Vec<u8>, CompressionError> {
    zstd::encode_all(data, level).map_err(|e| CompressionError::CompressFailed(e.to_string()))
}

pub fn decompress(data: &[u8]) -> Result<Vec<u8>, CompressionError> {
    zstd::decode_all(data).map_err(|e| CompressionError::DecompressFailed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_empty_payload_round_trips() {
        let compressed = compress(b"", DEFAULT_COMPRESSION_LEVEL).unwrap();
        assert!(!compressed.is_empty());
        assert_eq!(decompress(&compressed).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_large_repetitive_payload_shrinks() {
        let payload = br#"{"text":"the quick brown fox","tokens_used":5}"#.repeat(10_000);
        let compressed = compress(&payload, DEFAULT_COMPRESSION_LEVEL).unwrap();
        assert!(compressed.len() < payload.len() / 10);
        assert_eq!(decompress(&compressed).unwrap(), payload);
    }

    #[test]
    fn test_garbage_fails_to_decompress() {
        let err = decompress(b"definitely not zstd").unwrap_err();
        assert!(matches!(err, CompressionError::DecompressFailed(_)));
    }

    proptest! {
        #[test]
        fn prop_round_trip_is_exact(
            data in proptest::collection::vec(any::<u8>(), 0..4096),
            level in 1i32..=19,
        ) {
            let compressed = compress(&data, level).unwrap();
            prop_assert_eq!(decompress(&compressed).unwrap(), data);
        }

        #[test]
        fn prop_text_round_trips(text in "\\PC{0,2000}") {
            let compressed = compress(text.as_bytes(), DEFAULT_COMPRESSION_LEVEL).unwrap();
            let restored = String::from_utf8(decompress(&compressed).unwrap()).unwrap();
            prop_assert_eq!(restored, text);
        }
    }
}
