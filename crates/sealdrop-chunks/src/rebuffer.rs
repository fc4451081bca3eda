//! Fixed-size rebuffering of a pull stream
//!
//! Turns a stream yielding byte chunks of arbitrary size into a stream
//! yielding chunks of exactly `size` bytes, except the last one which carries
//! whatever remains (1..=size bytes). Boundaries depend only on the input
//! bytes and `size`, never on how the input happened to be split.

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::task::{ready, Context, Poll};

/// Stream adapter emitting fixed-size chunks.
///
/// Holds at most one pulled-but-unconsumed input chunk (`leftover`) and one
/// partially filled output chunk between polls.
#[derive(Debug)]
pub struct Rebuffer<S> {
    source: S,
    size: usize,
    filled: BytesMut,
    leftover: Bytes,
    exhausted: bool,
}

impl<S> Rebuffer<S> {
    /// Wrap `source`, emitting `size`-byte chunks.
    ///
    /// # Panics
    ///
    /// Panics if `size` is zero.
    pub fn new(source: S, size: usize) -> Self {
        assert!(size > 0, "rebuffer size must be positive");
        Self {
            source,
            size,
            filled: BytesMut::new(),
            leftover: Bytes::new(),
            exhausted: false,
        }
    }

    /// Target chunk size
    pub fn size(&self) -> usize {
        self.size
    }

    /// Move as much of the held leftover as fits into the output buffer.
    fn drain_leftover(&mut self) {
        if self.leftover.is_empty() {
            return;
        }
        let wanted = self.size - self.filled.len();
        let take = wanted.min(self.leftover.len());
        self.filled.extend_from_slice(&self.leftover.split_to(take));
    }
}

impl<S, E> Stream for Rebuffer<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    type Item = Result<Bytes, E>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;

        if this.filled.capacity() < this.size {
            let missing = this.size - this.filled.len();
            this.filled.reserve(missing);
        }

        loop {
            this.drain_leftover();
            if this.filled.len() == this.size || this.exhausted {
                break;
            }

            match ready!(this.source.poll_next_unpin(cx)) {
                Some(Ok(chunk)) => this.leftover = chunk,
                Some(Err(e)) => return Poll::Ready(Some(Err(e))),
                None => this.exhausted = true,
            }
        }

        if this.filled.is_empty() {
            return Poll::Ready(None);
        }

        Poll::Ready(Some(Ok(this.filled.split().freeze())))
    }
}

/// Number of chunks an encrypted stream carries for `len` plaintext bytes.
///
/// An empty input still produces one (empty, terminal) chunk.
pub fn chunk_count(len: u64, size: usize) -> usize {
    let size = size.max(1) as u64;
    let count = len.div_ceil(size).max(1);
    usize::try_from(count).unwrap_or(usize::MAX)
}
