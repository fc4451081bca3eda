//! sealdrop-crypto: envelope encryption for sealdrop uploads
//!
//! Architecture: one random master secret per upload, two HKDF sub-keys
//!
//! Pipeline: plaintext chunks → EncryptStream → ciphertext chunks (+ sealed metadata block)
//!
//! Key hierarchy:
//! ```text
//! Master Secret (256-bit random, returned to the caller as URL-safe base64)
//!   ├── Metadata Key (HKDF, index 0, "filemeta")
//!   │   └── XChaCha20-Poly1305, zero nonce, one 4096-byte block
//!   └── Stream Key (HKDF, index 1, "filedata")
//!       └── XChaCha20-Poly1305 chunk stream (nonce = header ^ counter, tag byte sealed per chunk)
//! ```

pub mod envelope;
pub mod keys;
pub mod metadata;
pub mod packer;
pub mod secretstream;

pub use envelope::{decrypt, encrypt, open, DecryptStream, EncryptStream, Envelope, OpenedEnvelope};
pub use keys::{derive_subkey, MasterSecret, SubKey};
pub use metadata::{open_metadata, seal_metadata, MetadataRecord, METADATA_BLOCK_SIZE};
pub use packer::{MetaPacker, MetaReader};
pub use secretstream::{StreamOpener, StreamSealer, STREAM_OVERHEAD};

/// Size of a master secret or sub-key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an XChaCha20-Poly1305 nonce (192-bit)
pub const NONCE_SIZE: usize = 24;

/// Size of a stream header; one full nonce
pub const HEADER_SIZE: usize = NONCE_SIZE;

/// Size of a Poly1305 authentication tag
pub const TAG_SIZE: usize = 16;
