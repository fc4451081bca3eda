//! Key hierarchy: master secret → per-purpose sub-keys
//!
//! ```text
//! Master Secret (256-bit random, one per upload, handed to the caller encoded)
//!   ├── Metadata Key  HKDF-SHA256(info = "filemeta" || 0u64 LE)
//!   └── Stream Key    HKDF-SHA256(info = "filedata" || 1u64 LE)
//! ```
//!
//! Index and context label are protocol constants: both ends must use the
//! same values to recompute the sub-keys from the master secret.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hkdf::Hkdf;
use rand::RngCore;
use secrecy::SecretString;
use sealdrop_core::{SealError, SealResult};
use sha2::Sha256;
use zeroize::Zeroize;

use crate::KEY_SIZE;

/// Sub-key index of the metadata key
pub const METADATA_KEY_INDEX: u64 = 0;
/// Context label of the metadata key
pub const METADATA_KEY_CONTEXT: &[u8; 8] = b"filemeta";
/// Sub-key index of the stream key
pub const STREAM_KEY_INDEX: u64 = 1;
/// Context label of the stream key
pub const STREAM_KEY_CONTEXT: &[u8; 8] = b"filedata";

/// The root secret of one upload. Zeroized on drop.
pub struct MasterSecret {
    bytes: [u8; KEY_SIZE],
}

impl MasterSecret {
    /// Generate a fresh random master secret.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    /// Render as the URL-safe token handed to the caller.
    pub fn encode(&self) -> SecretString {
        SecretString::from(URL_SAFE_NO_PAD.encode(self.bytes))
    }

    /// Parse a token produced by [`MasterSecret::encode`].
    pub fn from_encoded(encoded: &str) -> SealResult<Self> {
        let mut decoded = URL_SAFE_NO_PAD
            .decode(encoded.trim())
            .map_err(|e| SealError::InvalidKey(format!("not URL-safe base64: {e}")))?;

        if decoded.len() != KEY_SIZE {
            let len = decoded.len();
            decoded.zeroize();
            return Err(SealError::InvalidKey(format!(
                "decoded key has wrong size: {len} bytes (expected {KEY_SIZE})"
            )));
        }

        let mut bytes = [0u8; KEY_SIZE];
        bytes.copy_from_slice(&decoded);
        decoded.zeroize();
        Ok(Self { bytes })
    }

    /// Key for the single-shot metadata seal.
    pub fn metadata_key(&self) -> SealResult<SubKey> {
        derive_subkey(self, METADATA_KEY_INDEX, METADATA_KEY_CONTEXT)
    }

    /// Key for the chunk stream cipher.
    pub fn stream_key(&self) -> SealResult<SubKey> {
        derive_subkey(self, STREAM_KEY_INDEX, STREAM_KEY_CONTEXT)
    }
}

impl Drop for MasterSecret {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for MasterSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterSecret")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// A 256-bit key derived from the master secret. Zeroized on drop.
pub struct SubKey {
    bytes: [u8; KEY_SIZE],
}

impl SubKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for SubKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for SubKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// HKDF-SHA256 sub-key derivation keyed by an index and an 8-byte context.
///
/// `info = context || index (8 bytes, little-endian)`, no salt.
pub fn derive_subkey(master: &MasterSecret, index: u64, context: &[u8; 8]) -> SealResult<SubKey> {
    let hkdf = Hkdf::<Sha256>::new(None, master.as_bytes());

    let mut info = [0u8; 16];
    info[..8].copy_from_slice(context);
    info[8..].copy_from_slice(&index.to_le_bytes());

    // expanded in place; zeroized on drop if expand fails
    let mut key = SubKey::from_bytes([0u8; KEY_SIZE]);
    hkdf.expand(&info, &mut key.bytes)
        .map_err(|e| SealError::Crypto(format!("HKDF expand failed: {e}")))?;
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    fn test_master() -> MasterSecret {
        MasterSecret::from_bytes([42u8; KEY_SIZE])
    }

    #[test]
    fn test_generate_is_random() {
        let a = MasterSecret::generate();
        let b = MasterSecret::generate();
        assert_ne!(a.as_bytes(), b.as_bytes(), "random secrets must differ");
    }

    #[test]
    fn test_encode_roundtrip() {
        let master = MasterSecret::generate();
        let encoded = master.encode();
        let token = encoded.expose_secret();

        assert_eq!(token.len(), 43, "32 bytes → 43 base64 chars without padding");
        assert!(token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));

        let decoded = MasterSecret::from_encoded(token).unwrap();
        assert_eq!(decoded.as_bytes(), master.as_bytes());
    }

    #[test]
    fn test_from_encoded_rejects_garbage() {
        assert!(matches!(
            MasterSecret::from_encoded("not a key!"),
            Err(SealError::InvalidKey(_))
        ));
        // valid base64, wrong length
        assert!(matches!(
            MasterSecret::from_encoded("AAAA"),
            Err(SealError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_subkeys_are_deterministic() {
        let master = test_master();
        let a = master.stream_key().unwrap();
        let b = derive_subkey(&master, STREAM_KEY_INDEX, STREAM_KEY_CONTEXT).unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn test_subkeys_are_independent() {
        let master = test_master();
        let meta = master.metadata_key().unwrap();
        let stream = master.stream_key().unwrap();

        assert_ne!(meta.as_bytes(), stream.as_bytes());
        assert_ne!(meta.as_bytes(), master.as_bytes());
        assert_ne!(stream.as_bytes(), master.as_bytes());
    }

    #[test]
    fn test_index_and_context_both_matter() {
        let master = test_master();
        let base = derive_subkey(&master, 0, b"filemeta").unwrap();
        let other_index = derive_subkey(&master, 1, b"filemeta").unwrap();
        let other_context = derive_subkey(&master, 0, b"filedata").unwrap();

        assert_ne!(base.as_bytes(), other_index.as_bytes());
        assert_ne!(base.as_bytes(), other_context.as_bytes());
    }

    #[test]
    fn test_subkey_matches_hkdf_output() {
        let master = test_master();
        let mut expected = [0u8; KEY_SIZE];
        Hkdf::<Sha256>::new(None, master.as_bytes())
            .expand(b"filedata\x01\0\0\0\0\0\0\0", &mut expected)
            .unwrap();

        let key = derive_subkey(&master, STREAM_KEY_INDEX, STREAM_KEY_CONTEXT).unwrap();
        assert_eq!(key.as_bytes(), &expected);
        assert_ne!(key.as_bytes(), &[0u8; KEY_SIZE]);
    }

    #[test]
    fn test_debug_is_redacted() {
        let master = test_master();
        let rendered = format!("{master:?} {:?}", master.stream_key().unwrap());
        assert!(rendered.contains("REDACTED"));
        assert!(!rendered.contains("42"));
    }
}
