//! Tagged chunk stream over XChaCha20-Poly1305
//!
//! Encrypted chunk format (binary):
//! ```text
//! [1 + N + 16 bytes: AEAD(tag byte || N bytes of chunk)]
//! nonce(i) = header with its last 8 bytes XORed with i (u64, little-endian)
//! ```
//!
//! The 24-byte header is random per stream and travels in cleartext. The
//! counter binds every chunk to its position, so reordering, dropping or
//! replaying a chunk fails authentication. The tag byte is sealed with the
//! chunk, so the reader learns which chunk is terminal only from data that
//! authenticated.

use chacha20poly1305::{
    aead::{AeadInPlace, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;
use sealdrop_core::{ChunkTag, SealError, SealResult};
use zeroize::Zeroize;

use crate::keys::SubKey;
use crate::{HEADER_SIZE, TAG_SIZE};

/// Ciphertext bytes added to every chunk: tag byte + Poly1305 tag
pub const STREAM_OVERHEAD: usize = 1 + TAG_SIZE;

fn chunk_nonce(header: &[u8; HEADER_SIZE], counter: u64) -> XNonce {
    let mut nonce = *header;
    for (byte, ctr) in nonce[HEADER_SIZE - 8..]
        .iter_mut()
        .zip(counter.to_le_bytes())
    {
        *byte ^= ctr;
    }
    XNonce::clone_from_slice(&nonce)
}

/// Encrypting half of a chunk stream
pub struct StreamSealer {
    cipher: XChaCha20Poly1305,
    header: [u8; HEADER_SIZE],
    counter: u64,
    finished: bool,
}

impl StreamSealer {
    /// Start a new stream under `key` with a fresh random header.
    pub fn new(key: &SubKey) -> Self {
        let mut header = [0u8; HEADER_SIZE];
        rand::thread_rng().fill_bytes(&mut header);
        Self {
            cipher: XChaCha20Poly1305::new(key.as_bytes().into()),
            header,
            counter: 0,
            finished: false,
        }
    }

    /// The header the reader needs to open this stream.
    pub fn header(&self) -> &[u8; HEADER_SIZE] {
        &self.header
    }

    /// Seal the next chunk with `tag`.
    ///
    /// Returns `[tag byte || chunk]` encrypted, `chunk.len() + 17` bytes.
    pub fn push(&mut self, chunk: &[u8], tag: ChunkTag) -> SealResult<Vec<u8>> {
        if self.finished {
            return Err(SealError::Protocol(
                "chunk sealed after terminal marker".into(),
            ));
        }

        let nonce = chunk_nonce(&self.header, self.counter);
        let mut buffer = Vec::with_capacity(STREAM_OVERHEAD + chunk.len());
        buffer.push(tag.as_byte());
        buffer.extend_from_slice(chunk);

        if let Err(e) = self.cipher.encrypt_in_place(&nonce, b"", &mut buffer) {
            buffer.zeroize();
            return Err(SealError::Crypto(format!("chunk encryption failed: {e}")));
        }

        self.counter = self
            .counter
            .checked_add(1)
            .ok_or_else(|| SealError::Crypto("stream counter exhausted".into()))?;
        self.finished = tag == ChunkTag::Terminal;
        Ok(buffer)
    }
}

/// Decrypting half of a chunk stream
pub struct StreamOpener {
    cipher: XChaCha20Poly1305,
    header: [u8; HEADER_SIZE],
    counter: u64,
    finished: bool,
}

impl StreamOpener {
    pub fn new(key: &SubKey, header: &[u8; HEADER_SIZE]) -> Self {
        Self {
            cipher: XChaCha20Poly1305::new(key.as_bytes().into()),
            header: *header,
            counter: 0,
            finished: false,
        }
    }

    /// Authenticate and decrypt the next chunk.
    ///
    /// Nothing is returned for a chunk that fails to authenticate.
    pub fn pull(&mut self, ciphertext: &[u8]) -> SealResult<(Vec<u8>, ChunkTag)> {
        if self.finished {
            return Err(SealError::TrailingData);
        }
        if ciphertext.len() < STREAM_OVERHEAD {
            return Err(SealError::Authentication(format!(
                "chunk {} too short: {} bytes (minimum {STREAM_OVERHEAD})",
                self.counter,
                ciphertext.len()
            )));
        }

        let nonce = chunk_nonce(&self.header, self.counter);
        let mut buffer = ciphertext.to_vec();
        self.cipher
            .decrypt_in_place(&nonce, b"", &mut buffer)
            .map_err(|_| {
                SealError::Authentication(format!(
                    "chunk {} failed to authenticate: wrong key, corrupted or reordered data",
                    self.counter
                ))
            })?;

        let Some(tag) = buffer.first().copied().and_then(ChunkTag::from_byte) else {
            buffer.zeroize();
            return Err(SealError::Protocol(format!(
                "chunk {} carries an unknown tag",
                self.counter
            )));
        };
        buffer.drain(..1);

        self.counter = self
            .counter
            .checked_add(1)
            .ok_or_else(|| SealError::Crypto("stream counter exhausted".into()))?;
        self.finished = tag == ChunkTag::Terminal;
        Ok((buffer, tag))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> SubKey {
        SubKey::from_bytes([7u8; 32])
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let key = test_key();
        let mut sealer = StreamSealer::new(&key);
        let first = sealer.push(b"hello, ", ChunkTag::Continuation).unwrap();
        let last = sealer.push(b"stream", ChunkTag::Terminal).unwrap();

        let mut opener = StreamOpener::new(&key, sealer.header());
        assert_eq!(
            opener.pull(&first).unwrap(),
            (b"hello, ".to_vec(), ChunkTag::Continuation)
        );
        assert_eq!(
            opener.pull(&last).unwrap(),
            (b"stream".to_vec(), ChunkTag::Terminal)
        );
        assert!(matches!(opener.pull(&last), Err(SealError::TrailingData)));
    }

    #[test]
    fn test_sealed_size() {
        let mut sealer = StreamSealer::new(&test_key());
        let sealed = sealer.push(&[0u8; 1000], ChunkTag::Terminal).unwrap();
        // tag byte (1) + chunk (1000) + Poly1305 tag (16)
        assert_eq!(sealed.len(), 1000 + STREAM_OVERHEAD);
    }

    #[test]
    fn test_empty_terminal_chunk() {
        let key = test_key();
        let mut sealer = StreamSealer::new(&key);
        let sealed = sealer.push(b"", ChunkTag::Terminal).unwrap();
        assert_eq!(sealed.len(), STREAM_OVERHEAD);

        let mut opener = StreamOpener::new(&key, sealer.header());
        let (plain, tag) = opener.pull(&sealed).unwrap();
        assert!(plain.is_empty());
        assert_eq!(tag, ChunkTag::Terminal);
    }

    #[test]
    fn test_push_after_terminal_fails() {
        let mut sealer = StreamSealer::new(&test_key());
        sealer.push(b"end", ChunkTag::Terminal).unwrap();
        assert!(matches!(
            sealer.push(b"more", ChunkTag::Continuation),
            Err(SealError::Protocol(_))
        ));
    }

    #[test]
    fn test_headers_are_random() {
        let key = test_key();
        let a = StreamSealer::new(&key);
        let b = StreamSealer::new(&key);
        assert_ne!(a.header(), b.header());
    }

    #[test]
    fn test_wrong_key_fails() {
        let mut sealer = StreamSealer::new(&test_key());
        let sealed = sealer.push(b"secret", ChunkTag::Terminal).unwrap();

        let mut opener = StreamOpener::new(&SubKey::from_bytes([8u8; 32]), sealer.header());
        assert!(matches!(
            opener.pull(&sealed),
            Err(SealError::Authentication(_))
        ));
    }

    #[test]
    fn test_reordered_chunks_fail() {
        let key = test_key();
        let mut sealer = StreamSealer::new(&key);
        let first = sealer.push(b"one", ChunkTag::Continuation).unwrap();
        let second = sealer.push(b"two", ChunkTag::Terminal).unwrap();

        let mut opener = StreamOpener::new(&key, sealer.header());
        assert!(matches!(
            opener.pull(&second),
            Err(SealError::Authentication(_))
        ));
        // position 0 still expects the first chunk
        assert!(opener.pull(&first).is_ok());
    }

    #[test]
    fn test_tampered_tag_byte_fails() {
        let key = test_key();
        let mut sealer = StreamSealer::new(&key);
        let mut sealed = sealer.push(b"data", ChunkTag::Continuation).unwrap();
        sealed[0] ^= 0x03;

        let mut opener = StreamOpener::new(&key, sealer.header());
        assert!(matches!(
            opener.pull(&sealed),
            Err(SealError::Authentication(_))
        ));
    }

    #[test]
    fn test_too_short_chunk() {
        let mut opener = StreamOpener::new(&test_key(), &[0u8; HEADER_SIZE]);
        assert!(matches!(
            opener.pull(&[0u8; STREAM_OVERHEAD - 1]),
            Err(SealError::Authentication(_))
        ));
    }

    #[test]
    fn test_pull_after_terminal_is_trailing_data() {
        let key = test_key();
        let mut sealer = StreamSealer::new(&key);
        let sealed = sealer.push(b"last", ChunkTag::Terminal).unwrap();

        let mut opener = StreamOpener::new(&key, sealer.header());
        opener.pull(&sealed).unwrap();
        assert!(matches!(opener.pull(&sealed), Err(SealError::TrailingData)));
    }
}
