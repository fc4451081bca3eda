//! Plaintext source that must deliver exactly the size sealed into metadata

use bytes::Bytes;
use futures::{Stream, StreamExt};
use sealdrop_core::{SealError, SealResult};
use std::pin::Pin;
use std::task::{ready, Context, Poll};

/// Counts the bytes of `source` and fails once they disagree with `expected`.
///
/// Too many bytes fail as soon as the excess is seen; too few fail in place
/// of the end of stream, so the encryptor never seals a terminal chunk for a
/// file whose length changed underneath it.
#[derive(Debug)]
pub struct SizedSource<S> {
    source: S,
    expected: u64,
    seen: u64,
    done: bool,
}

impl<S> SizedSource<S> {
    pub fn new(source: S, expected: u64) -> Self {
        Self {
            source,
            expected,
            seen: 0,
            done: false,
        }
    }

    fn mismatch(&mut self) -> SealError {
        self.done = true;
        SealError::Protocol(format!(
            "source changed while reading: {} bytes read, {} expected",
            self.seen, self.expected
        ))
    }
}

impl<S, E> Stream for SizedSource<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Into<SealError>,
{
    type Item = SealResult<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        if this.done {
            return Poll::Ready(None);
        }

        match ready!(this.source.poll_next_unpin(cx)) {
            Some(Ok(chunk)) => {
                this.seen = this.seen.saturating_add(chunk.len() as u64);
                if this.seen > this.expected {
                    return Poll::Ready(Some(Err(this.mismatch())));
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            Some(Err(e)) => {
                this.done = true;
                Poll::Ready(Some(Err(e.into())))
            }
            None if this.seen != this.expected => Poll::Ready(Some(Err(this.mismatch()))),
            None => {
                this.done = true;
                Poll::Ready(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use futures::stream::{self, TryStreamExt};

    fn parts(lens: &[usize]) -> impl Stream<Item = SealResult<Bytes>> + Unpin {
        let items: Vec<SealResult<Bytes>> =
            lens.iter().map(|&n| Ok(Bytes::from(vec![0u8; n]))).collect();
        stream::iter(items)
    }

    #[test]
    fn test_exact_size_passes_through() {
        let chunks = block_on(SizedSource::new(parts(&[4, 4, 2]), 10).try_collect::<Vec<_>>())
            .unwrap();
        assert_eq!(chunks.len(), 3);
    }

    #[test]
    fn test_empty_source_of_size_zero() {
        let chunks =
            block_on(SizedSource::new(parts(&[]), 0).try_collect::<Vec<_>>()).unwrap();
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_short_source_fails_at_end() {
        let mut sized = SizedSource::new(parts(&[4, 4, 1]), 10);
        block_on(async {
            for _ in 0..3 {
                assert!(sized.next().await.unwrap().is_ok());
            }
            assert!(matches!(sized.next().await, Some(Err(SealError::Protocol(_)))));
            assert!(sized.next().await.is_none());
        });
    }

    #[test]
    fn test_long_source_fails_on_excess() {
        let mut sized = SizedSource::new(parts(&[4, 4, 4]), 10);
        block_on(async {
            assert!(sized.next().await.unwrap().is_ok());
            assert!(sized.next().await.unwrap().is_ok());
            assert!(matches!(sized.next().await, Some(Err(SealError::Protocol(_)))));
            assert!(sized.next().await.is_none());
        });
    }

    #[test]
    fn test_source_error_is_converted() {
        let items: Vec<Result<Bytes, std::io::Error>> =
            vec![Err(std::io::Error::other("disk gone"))];
        let result = block_on(SizedSource::new(stream::iter(items), 3).try_collect::<Vec<_>>());
        assert!(matches!(result, Err(SealError::Io(_))));
    }
}
