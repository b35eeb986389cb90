//! Content-encoding transforms applied between caller bytes and stored bytes.
//!
//! Only `gzip` is recognized. Any other encoding (or none) passes bytes
//! through unchanged.

use crate::traits::{StorageError, StorageResult};
use bytes::Bytes;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};

pub const GZIP: &str = "gzip";

pub fn is_gzip(encoding: Option<&str>) -> bool {
    encoding.is_some_and(|e| e.trim().eq_ignore_ascii_case(GZIP))
}

/// Caller bytes -> stored bytes.
pub fn encode(encoding: Option<&str>, data: Bytes) -> StorageResult<Bytes> {
    if !is_gzip(encoding) {
        return Ok(data);
    }

    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    encoder.write_all(&data)?;
    Ok(Bytes::from(encoder.finish()?))
}

/// Stored bytes -> caller bytes.
pub fn decode(encoding: Option<&str>, data: Bytes) -> StorageResult<Bytes> {
    if !is_gzip(encoding) {
        return Ok(data);
    }

    let mut decoded = Vec::with_capacity(data.len() * 2);
    GzDecoder::new(data.as_ref())
        .read_to_end(&mut decoded)
        .map_err(|e| StorageError::Encoding(format!("Failed to decompress gzip body: {}", e)))?;
    Ok(Bytes::from(decoded))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gzip_output_is_a_gzip_stream() {
        let encoded = encode(Some("gzip"), Bytes::from_static(b"hello hello hello")).unwrap();
        assert_eq!(&encoded[..2], &[0x1f, 0x8b]);
        assert_eq!(
            decode(Some("GZIP"), encoded).unwrap(),
            Bytes::from_static(b"hello hello hello")
        );
    }

    #[test]
    fn empty_input_survives_gzip() {
        let encoded = encode(Some(GZIP), Bytes::new()).unwrap();
        assert!(!encoded.is_empty());
        assert!(decode(Some(GZIP), encoded).unwrap().is_empty());
    }

    #[test]
    fn unknown_encodings_pass_through() {
        let data = Bytes::from_static(b"\x00raw/bytes\n");
        assert_eq!(encode(None, data.clone()).unwrap(), data);
        assert_eq!(encode(Some("br"), data.clone()).unwrap(), data);
        assert_eq!(decode(Some("identity"), data.clone()).unwrap(), data);
    }

    #[test]
    fn corrupt_gzip_is_an_encoding_error() {
        let result = decode(Some(GZIP), Bytes::from_static(b"not gzip at all"));
        assert!(matches!(result, Err(StorageError::Encoding(_))));
    }
}
