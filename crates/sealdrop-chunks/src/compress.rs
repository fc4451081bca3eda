//! Pass-through compression stage
//!
//! Sits between the plaintext rebuffering and the encryption engine. The
//! codec is the identity: the stage only re-frames its input to the target
//! chunk size, so whatever a real codec would emit still reaches the cipher
//! as fixed-size chunks.

use tracing::trace;

use crate::rebuffer::Rebuffer;

/// Identity "compressor" emitting `size`-byte frames.
pub fn compressor<S>(source: S, size: usize) -> Rebuffer<S> {
    trace!(size, "identity compression stage");
    Rebuffer::new(source, size)
}
