//! sealdrop-chunks: fixed-size framing of plaintext pull streams
//!
//! # Overview
//! - `rebuffer`: arbitrary-size input chunks → fixed-size output chunks
//! - `compress`: identity compression stage that keeps framing fixed-size

pub mod compress;
pub mod rebuffer;

pub use compress::compressor;
pub use rebuffer::{chunk_count, Rebuffer};

/// Default plaintext chunk size (1 MiB)
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;
