//! Codec Layer (C2, §4.2): short-field codec for control payloads and the
//! bulk codec for file bodies sent outside binary mode.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use flate2::write::{ZlibDecoder, ZlibEncoder};
use flate2::Compression;
use std::io::Write;

use crate::error::TrzError;

/// Sample window size used by the compression-profitability heuristic.
const SAMPLE_WINDOW: usize = 128 * 1024;

/// `zlib-compress -> base64-standard`. Used for every non-`DATA` control
/// payload and for `NAME`/`CFG`/`ACT` style metadata.
pub fn short_field_encode(input: &[u8]) -> String {
    let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
    // Writes to an in-memory buffer; infallible in practice.
    enc.write_all(input).expect("zlib encode to Vec cannot fail");
    let compressed = enc.finish().expect("zlib finish to Vec cannot fail");
    BASE64.encode(compressed)
}

/// Reverse of [`short_field_encode`]. A decode error at either stage
/// surfaces as [`TrzError::Corrupt`].
pub fn short_field_decode(input: &str) -> Result<Vec<u8>, TrzError> {
    let compressed = BASE64
        .decode(input.trim_end())
        .map_err(|e| TrzError::Corrupt(format!("base64: {e}")))?;
    let mut dec = ZlibDecoder::new(Vec::new());
    dec.write_all(&compressed)
        .map_err(|e| TrzError::Corrupt(format!("zlib: {e}")))?;
    dec.finish().map_err(|e| TrzError::Corrupt(format!("zlib: {e}")))
}

/// `zstd-compress -> base64-standard`. Used for file bodies when binary mode
/// is off and the bulk codec is selected.
pub fn bulk_encode(input: &[u8]) -> Result<String, TrzError> {
    let compressed =
        zstd::stream::encode_all(input, 0).map_err(|e| TrzError::Corrupt(format!("zstd: {e}")))?;
    Ok(BASE64.encode(compressed))
}

/// Reverse of [`bulk_encode`].
pub fn bulk_decode(input: &str) -> Result<Vec<u8>, TrzError> {
    let compressed = BASE64
        .decode(input.trim_end())
        .map_err(|e| TrzError::Corrupt(format!("base64: {e}")))?;
    zstd::stream::decode_all(compressed.as_slice())
        .map_err(|e| TrzError::Corrupt(format!("zstd: {e}")))
}

/// Sample three windows (start, middle, end) of `data` and return `true` if
/// the payload looks already-compressed, in which case `compression=auto`
/// should fall back to sending uncompressed bytes (§4.2).
pub fn looks_already_compressed(data: &[u8]) -> bool {
    if data.len() < SAMPLE_WINDOW {
        return false;
    }
    let mid_start = (data.len() - SAMPLE_WINDOW) / 2;
    let windows = [
        &data[0..SAMPLE_WINDOW],
        &data[mid_start..mid_start + SAMPLE_WINDOW],
        &data[data.len() - SAMPLE_WINDOW..],
    ];
    let mut poorly_compressible = 0;
    for w in windows {
        if let Ok(compressed) = zstd::stream::encode_all(w, 0) {
            if compressed.len() as f64 >= 0.98 * w.len() as f64 {
                poorly_compressible += 1;
            }
        }
    }
    poorly_compressible >= 2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_field_round_trips() {
        let input = b"the quick brown fox jumps over the lazy dog";
        let encoded = short_field_encode(input);
        let decoded = short_field_decode(&encoded).unwrap();
        assert_eq!(decoded, input);
    }

    #[test]
    fn short_field_round_trips_empty() {
        let encoded = short_field_encode(b"");
        let decoded = short_field_decode(&encoded).unwrap();
        assert_eq!(decoded, b"");
    }

    #[test]
    fn bulk_round_trips() {
        let input = vec![7u8; 4096];
        let encoded = bulk_encode(&input).unwrap();
        let decoded = bulk_decode(&encoded).unwrap();
        assert_eq!(decoded, input);
    }

    #[test]
    fn short_field_decode_rejects_garbage() {
        assert!(short_field_decode("not base64 at all!!").is_err());
    }

    #[test]
    fn random_data_is_not_already_compressed() {
        // Too small to sample; heuristic should not fire.
        assert!(!looks_already_compressed(b"short"));
    }

    proptest::proptest! {
        #[test]
        fn short_field_codec_round_trips_any_bytes(input: Vec<u8>) {
            let encoded = short_field_encode(&input);
            let decoded = short_field_decode(&encoded).unwrap();
            proptest::prop_assert_eq!(decoded, input);
        }

        #[test]
        fn bulk_codec_round_trips_any_bytes(input: Vec<u8>) {
            let encoded = bulk_encode(&input).unwrap();
            let decoded = bulk_decode(&encoded).unwrap();
            proptest::prop_assert_eq!(decoded, input);
        }
    }
}
