//! Payload codec.
//!
//! Large payloads are shipped by the receptor plugins as
//! `base64(gzip(json))`. Small payloads and plain-text error messages are
//! shipped as-is. [`decode_payload`] tries the full pipeline and falls back to
//! the original value whenever any stage fails, so callers never see a decode
//! error.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde_json::Value;
use std::io::{Read, Write};
use thiserror::Error;

/// First two bytes of every gzip stream.
pub const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[derive(Debug, Error)]
enum PayloadDecodeError {
    #[error("payload is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("payload is not gzip compressed")]
    NotGzip,

    #[error("failed to inflate payload: {0}")]
    Inflate(#[from] std::io::Error),

    #[error("inflated payload is not JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Decode a payload as received in an envelope.
///
/// Only JSON strings are candidates for decoding; any other value is
/// returned as-is.
#[must_use]
pub fn decode_payload(payload: &Value) -> Value {
    let Value::String(encoded) = payload else {
        return payload.clone();
    };

    match unpack(encoded) {
        Ok(decoded) => decoded,
        Err(e) => {
            tracing::trace!(error = %e, "Payload kept as raw string");
            payload.clone()
        },
    }
}

/// Encode a structured payload the way receptor plugins do.
///
/// Inverse of [`decode_payload`]: JSON text, gzip, then base64.
#[must_use]
pub fn encode_payload(payload: &Value) -> String {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    // Writing into a Vec cannot fail.
    let compressed = encoder
        .write_all(payload.to_string().as_bytes())
        .and_then(|()| encoder.finish())
        .unwrap_or_default();
    STANDARD.encode(compressed)
}

/// Whether the bytes start with the gzip magic number.
#[must_use]
pub fn is_gzipped(bytes: &[u8]) -> bool {
    bytes.starts_with(&GZIP_MAGIC)
}

fn unpack(encoded: &str) -> Result<Value, PayloadDecodeError> {
    // MIME-style encoders wrap lines every 60 characters.
    let compact: String = encoded.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let compressed = STANDARD.decode(compact)?;

    if !is_gzipped(&compressed) {
        return Err(PayloadDecodeError::NotGzip);
    }

    let mut inflated = Vec::new();
    GzDecoder::new(compressed.as_slice()).read_to_end(&mut inflated)?;

    Ok(serde_json::from_slice(&inflated)?)
}
