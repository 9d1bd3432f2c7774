//! Base64 helpers for job payloads.
//!
//! Input images arrive either as bare base64 or as a data URI
//! (`data:image/png;base64,....`). Output artifacts delivered inline
//! are plain standard-alphabet base64.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

/// Strip an optional data-URI prefix (everything up to and including
/// the first comma) from an encoded payload.
pub fn strip_data_uri(payload: &str) -> &str {
    match payload.split_once(',') {
        Some((_, data)) => data,
        None => payload,
    }
}

/// Decode an input image payload, tolerating a data-URI prefix and
/// line-wrapped base64 (as produced by `base64` at 76 columns).
pub fn decode_image_payload(payload: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let cleaned: String = strip_data_uri(payload)
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    STANDARD.decode(cleaned)
}

/// Encode raw artifact bytes for inline delivery.
pub fn encode_artifact(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}
