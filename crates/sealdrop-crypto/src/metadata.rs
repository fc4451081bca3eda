//! Sealed metadata record
//!
//! Every envelope starts with one fixed-size block:
//! ```text
//! [4096 bytes: XChaCha20-Poly1305(metadata key, nonce = 0,
//!     varint(json_len) || json || zero padding up to 4080 bytes)]
//! ```
//!
//! The metadata key seals exactly one message, so the all-zero nonce is never
//! reused. The fixed size hides the length of the name and content type.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chacha20poly1305::{
    aead::{AeadInPlace, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use serde::{Deserialize, Serialize};
use sealdrop_core::{SealError, SealResult};

use crate::keys::SubKey;
use crate::packer::{MetaPacker, MetaReader};
use crate::{HEADER_SIZE, TAG_SIZE};

/// Ciphertext size of a sealed metadata record
pub const METADATA_BLOCK_SIZE: usize = 4096;
/// Largest framed record that fits the block
pub const METADATA_PLAINTEXT_LIMIT: usize = METADATA_BLOCK_SIZE - TAG_SIZE;

/// Cleartext description of an envelope, readable only with the master secret
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataRecord {
    /// Stream header (URL-safe base64, no padding)
    pub header: String,
    /// Plaintext length in bytes
    pub size: u64,
    /// Plaintext chunk size the stream was sealed with
    pub chunk_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

impl MetadataRecord {
    /// A record for `size` bytes split into `chunk_size` chunks. The header is
    /// filled in by the encryption engine.
    pub fn new(size: u64, chunk_size: u64) -> Self {
        Self {
            header: String::new(),
            size,
            chunk_size,
            name: None,
            content_type: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn set_stream_header(&mut self, header: &[u8; HEADER_SIZE]) {
        self.header = URL_SAFE_NO_PAD.encode(header);
    }

    /// Decode the stream header carried by this record.
    pub fn stream_header(&self) -> SealResult<[u8; HEADER_SIZE]> {
        let decoded = URL_SAFE_NO_PAD
            .decode(&self.header)
            .map_err(|e| SealError::Protocol(format!("metadata header is not base64: {e}")))?;
        <[u8; HEADER_SIZE]>::try_from(decoded.as_slice()).map_err(|_| {
            SealError::Protocol(format!(
                "metadata header has {} bytes, expected {HEADER_SIZE}",
                decoded.len()
            ))
        })
    }

    pub fn to_json(&self) -> SealResult<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| SealError::Protocol(format!("metadata serialization: {e}")))
    }

    pub fn from_json(data: &[u8]) -> SealResult<Self> {
        serde_json::from_slice(data)
            .map_err(|e| SealError::Protocol(format!("metadata deserialization: {e}")))
    }
}

/// Frame, pad and seal `record` into exactly [`METADATA_BLOCK_SIZE`] bytes.
pub fn seal_metadata(record: &MetadataRecord, key: &SubKey) -> SealResult<Vec<u8>> {
    let json = record.to_json()?;

    let mut packer = MetaPacker::new();
    packer.push_varint(json.len() as u64);
    let mut framed = packer.finish();
    framed.extend_from_slice(&json);

    if framed.len() > METADATA_PLAINTEXT_LIMIT {
        return Err(SealError::MetadataTooLarge {
            size: framed.len(),
            limit: METADATA_PLAINTEXT_LIMIT,
        });
    }
    framed.resize(METADATA_PLAINTEXT_LIMIT, 0);
    framed.reserve_exact(TAG_SIZE);

    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());
    let nonce = XNonce::default();
    cipher
        .encrypt_in_place(&nonce, b"", &mut framed)
        .map_err(|e| SealError::Crypto(format!("metadata encryption failed: {e}")))?;

    debug_assert_eq!(framed.len(), METADATA_BLOCK_SIZE);
    Ok(framed)
}

/// Authenticate and parse a sealed metadata block.
pub fn open_metadata(ciphertext: &[u8], key: &SubKey) -> SealResult<MetadataRecord> {
    if ciphertext.len() != METADATA_BLOCK_SIZE {
        return Err(SealError::Protocol(format!(
            "metadata block is {} bytes, expected {METADATA_BLOCK_SIZE}",
            ciphertext.len()
        )));
    }

    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());
    let nonce = XNonce::default();
    let mut plaintext = ciphertext.to_vec();
    cipher
        .decrypt_in_place(&nonce, b"", &mut plaintext)
        .map_err(|_| {
            SealError::Authentication("metadata failed to authenticate: wrong key or corrupted".into())
        })?;

    let mut reader = MetaReader::new(&plaintext);
    let len = usize::try_from(reader.read_varint()?)
        .map_err(|_| SealError::Protocol("metadata length out of range".into()))?;
    let json = reader.read_bytes(len)?;
    if reader.remaining().iter().any(|&b| b != 0) {
        return Err(SealError::Protocol("metadata padding is not zero".into()));
    }

    MetadataRecord::from_json(json)
}
