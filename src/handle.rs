//! Ciphertext Handles and Canonical Encoding
//!
//! The encryption layer hands back handles and proofs in whichever shape its
//! environment produced: a hex string, a plain byte vector, or a boxed byte
//! buffer. Everything past this module works with a single canonical
//! representation: a fixed-width 32-byte [`Handle`] and a variable-length
//! proof byte string. Normalization recognizes exactly those three input
//! shapes and fails loudly on anything malformed.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{SurveyError, SurveyResult};

/// Byte width of a ciphertext handle
pub const HANDLE_LEN: usize = 32;

/// Opaque fixed-width identifier for an encrypted value.
///
/// Either the all-zero unset sentinel or a value returned verbatim by the
/// ledger; the orchestrator never fabricates handle bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle([u8; HANDLE_LEN]);

impl Handle {
    /// The all-zero sentinel meaning "no submission yet"
    pub const UNSET: Handle = Handle([0u8; HANDLE_LEN]);

    pub const fn from_bytes(bytes: [u8; HANDLE_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; HANDLE_LEN] {
        &self.0
    }

    /// False for the unset sentinel
    pub fn is_set(&self) -> bool {
        self.0 != [0u8; HANDLE_LEN]
    }

    /// Canonical 0x-prefixed lowercase hex
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    /// Parse from hex, with or without a 0x prefix
    pub fn from_hex(s: &str) -> SurveyResult<Self> {
        let stripped = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(stripped)
            .map_err(|e| SurveyError::malformed(format!("invalid handle hex: {e}")))?;
        let arr: [u8; HANDLE_LEN] = bytes.try_into().map_err(|b: Vec<u8>| {
            SurveyError::malformed(format!("handle must be {HANDLE_LEN} bytes, got {}", b.len()))
        })?;
        Ok(Self(arr))
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_set() {
            write!(f, "Handle(0x{}..)", hex::encode(&self.0[..8]))
        } else {
            write!(f, "Handle(unset)")
        }
    }
}

impl Serialize for Handle {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Handle {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Handle::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Raw encrypted output as produced by the encryption service.
///
/// Closed set of recognized shapes; the encryption library emits different
/// representations in different environments and nothing downstream should
/// have to care which one it got.
#[derive(Clone, Debug)]
pub enum CiphertextBlob {
    /// Hex string, with or without a 0x prefix
    Hex(String),
    /// Plain byte vector
    Bytes(Vec<u8>),
    /// Boxed byte buffer
    Buffer(Box<[u8]>),
}

impl CiphertextBlob {
    /// Decode to raw bytes, rejecting malformed hex rather than guessing
    fn to_canonical_bytes(&self) -> SurveyResult<Vec<u8>> {
        match self {
            Self::Hex(s) => {
                let stripped = s.strip_prefix("0x").unwrap_or(s);
                hex::decode(stripped)
                    .map_err(|e| SurveyError::malformed(format!("invalid ciphertext hex: {e}")))
            }
            Self::Bytes(b) => Ok(b.clone()),
            Self::Buffer(b) => Ok(b.to_vec()),
        }
    }
}

/// Normalize an encrypted-handle blob to the canonical fixed-width form.
///
/// Deterministic: the same logical bytes normalize identically regardless of
/// which shape carried them. Wrong width is a hard error.
pub fn normalize_handle(blob: &CiphertextBlob) -> SurveyResult<Handle> {
    let bytes = blob.to_canonical_bytes()?;
    let arr: [u8; HANDLE_LEN] = bytes.try_into().map_err(|b: Vec<u8>| {
        SurveyError::malformed(format!(
            "ciphertext handle must be {HANDLE_LEN} bytes, got {}",
            b.len()
        ))
    })?;
    Ok(Handle::from_bytes(arr))
}

/// Normalize a correctness-proof blob to canonical bytes.
///
/// Variable length, but an empty proof is never valid.
pub fn normalize_proof(blob: &CiphertextBlob) -> SurveyResult<Vec<u8>> {
    let bytes = blob.to_canonical_bytes()?;
    if bytes.is_empty() {
        return Err(SurveyError::malformed("empty input proof"));
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_bytes() -> [u8; HANDLE_LEN] {
        let mut b = [0u8; HANDLE_LEN];
        for (i, v) in b.iter_mut().enumerate() {
            *v = i as u8 + 1;
        }
        b
    }

    #[test]
    fn test_unset_sentinel() {
        assert!(!Handle::UNSET.is_set());
        assert!(Handle::from_bytes(sample_bytes()).is_set());
    }

    #[test]
    fn test_hex_round_trip() {
        let h = Handle::from_bytes(sample_bytes());
        let parsed = Handle::from_hex(&h.to_hex()).unwrap();
        assert_eq!(h, parsed);

        // Unprefixed hex is accepted too
        let unprefixed = h.to_hex().trim_start_matches("0x").to_string();
        assert_eq!(Handle::from_hex(&unprefixed).unwrap(), h);
    }

    #[test]
    fn test_all_shapes_normalize_identically() {
        let bytes = sample_bytes();
        let from_hex =
            normalize_handle(&CiphertextBlob::Hex(format!("0x{}", hex::encode(bytes)))).unwrap();
        let from_bytes = normalize_handle(&CiphertextBlob::Bytes(bytes.to_vec())).unwrap();
        let from_buffer =
            normalize_handle(&CiphertextBlob::Buffer(bytes.to_vec().into_boxed_slice())).unwrap();

        assert_eq!(from_hex, from_bytes);
        assert_eq!(from_bytes, from_buffer);
        assert_eq!(*from_hex.as_bytes(), bytes);
    }

    #[test]
    fn test_wrong_width_rejected() {
        let short = normalize_handle(&CiphertextBlob::Bytes(vec![1, 2, 3]));
        assert!(matches!(short, Err(SurveyError::MalformedResponse(_))));

        let long = normalize_handle(&CiphertextBlob::Bytes(vec![0xAA; 33]));
        assert!(matches!(long, Err(SurveyError::MalformedResponse(_))));
    }

    #[test]
    fn test_bad_hex_rejected() {
        let odd = normalize_handle(&CiphertextBlob::Hex("0xabc".into()));
        assert!(matches!(odd, Err(SurveyError::MalformedResponse(_))));

        let junk = normalize_proof(&CiphertextBlob::Hex("0xzz".into()));
        assert!(matches!(junk, Err(SurveyError::MalformedResponse(_))));
    }

    #[test]
    fn test_empty_proof_rejected() {
        let empty = normalize_proof(&CiphertextBlob::Bytes(vec![]));
        assert!(matches!(empty, Err(SurveyError::MalformedResponse(_))));
    }

    #[test]
    fn test_serde_as_hex_string() {
        let h = Handle::from_bytes(sample_bytes());
        let json = serde_json::to_string(&h).unwrap();
        assert!(json.starts_with("\"0x"));
        let back: Handle = serde_json::from_str(&json).unwrap();
        assert_eq!(h, back);
    }
}
