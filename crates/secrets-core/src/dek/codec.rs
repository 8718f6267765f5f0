//! Binary envelope framing: `'#' <base64(id)> '#' <ciphertext>`.
//!
//! This module performs no cryptography — it only frames and parses the
//! DEK-id header that [`crate::core::SecretsCore`] prepends to ciphertext.
//!
//! ```text
//! '#' <raw unpadded standard base64(id)> '#' <ciphertext bytes>
//! ```
//!
//! A blob with no leading `#` is a *legacy* payload, encrypted directly
//! under the process-wide master key before envelope encryption existed.
//! Legacy blobs remain decryptable indefinitely — see
//! [`crate::core::SecretsCore::decrypt`].

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use common::CoreError;

const FRAME_MARKER: u8 = b'#';

/// Encode `id` and `ciphertext` into a framed envelope blob.
pub fn encode(id: &str, ciphertext: &[u8]) -> Vec<u8> {
    let encoded_id = STANDARD_NO_PAD.encode(id.as_bytes());
    let mut out = Vec::with_capacity(1 + encoded_id.len() + 1 + ciphertext.len());
    out.push(FRAME_MARKER);
    out.extend_from_slice(encoded_id.as_bytes());
    out.push(FRAME_MARKER);
    out.extend_from_slice(ciphertext);
    out
}

/// The outcome of inspecting a payload for the envelope frame marker.
pub enum Parsed<'a> {
    /// A well-formed frame: the DEK id and the remaining ciphertext.
    Envelope { id: String, ciphertext: &'a [u8] },
    /// No leading `#` — caller should route to the legacy decrypt path.
    Legacy,
}

/// Parse `payload`, distinguishing a framed envelope from a legacy blob.
///
/// # Errors
///
/// Returns [`CoreError::EmptyPayload`] if `payload` is empty, or
/// [`CoreError::MalformedFrame`] if the first byte is `#` but no closing
/// `#` is found, or the id segment is not valid base64.
pub fn decode(payload: &[u8]) -> Result<Parsed<'_>, CoreError> {
    if payload.is_empty() {
        return Err(CoreError::EmptyPayload);
    }
    if payload[0] != FRAME_MARKER {
        return Ok(Parsed::Legacy);
    }

    let rest = &payload[1..];
    let sep = rest
        .iter()
        .position(|&b| b == FRAME_MARKER)
        .ok_or(CoreError::MalformedFrame)?;

    let (id_part, tail) = rest.split_at(sep);
    let ciphertext = &tail[1..];

    let id_bytes = STANDARD_NO_PAD
        .decode(id_part)
        .map_err(|_| CoreError::MalformedFrame)?;
    let id = String::from_utf8(id_bytes).map_err(|_| CoreError::MalformedFrame)?;

    Ok(Parsed::Envelope { id, ciphertext })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_then_decode_round_trip() {
        let framed = encode("abc123", b"ciphertext-bytes");
        match decode(&framed).unwrap() {
            Parsed::Envelope { id, ciphertext } => {
                assert_eq!(id, "abc123");
                assert_eq!(ciphertext, b"ciphertext-bytes");
            }
            Parsed::Legacy => panic!("expected envelope frame"),
        }
    }

    #[test]
    fn encoded_frame_starts_with_marker() {
        let framed = encode("id", b"x");
        assert_eq!(framed[0], b'#');
    }

    #[test]
    fn empty_payload_is_empty_error() {
        assert!(matches!(decode(&[]), Err(CoreError::EmptyPayload)));
    }

    #[test]
    fn no_marker_is_legacy() {
        assert!(matches!(decode(b"raw-legacy-blob"), Ok(Parsed::Legacy)));
    }

    #[test]
    fn missing_closing_marker_is_malformed() {
        assert!(matches!(decode(b"#abc"), Err(CoreError::MalformedFrame)));
    }

    #[test]
    fn invalid_base64_id_is_malformed() {
        assert!(matches!(decode(b"#!!!#xx"), Err(CoreError::MalformedFrame)));
    }

    #[test]
    fn empty_ciphertext_is_allowed() {
        let framed = encode("id", b"");
        match decode(&framed).unwrap() {
            Parsed::Envelope { id, ciphertext } => {
                assert_eq!(id, "id");
                assert!(ciphertext.is_empty());
            }
            Parsed::Legacy => panic!("expected envelope frame"),
        }
    }
}
