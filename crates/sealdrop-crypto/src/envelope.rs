//! Envelope encryption and decryption over pull streams
//!
//! Encrypting side:
//! ```text
//! MasterSecret::generate()
//!   ├── metadata key → seal_metadata(record + stream header) → 4096 bytes
//!   └── stream key   → StreamSealer → EncryptStream (one chunk of look-ahead)
//! ```
//!
//! The caller receives the encoded master secret, the sealed metadata and a
//! stream of ciphertext chunks. The secret itself is dropped (and zeroized)
//! before `encrypt` returns.

use std::pin::Pin;
use std::task::{ready, Context, Poll};

use bytes::Bytes;
use futures::{Stream, StreamExt};
use secrecy::SecretString;
use sealdrop_core::{ChunkTag, SealError, SealResult};
use tracing::{debug, trace};

use crate::keys::{MasterSecret, SubKey};
use crate::metadata::{open_metadata, seal_metadata, MetadataRecord};
use crate::secretstream::{StreamOpener, StreamSealer};
use crate::HEADER_SIZE;

/// Everything produced by [`encrypt`]
pub struct Envelope<S> {
    /// Encoded master secret, the only way back to the plaintext
    pub key: SecretString,
    /// Sealed metadata block
    pub metadata: Bytes,
    /// The record that was sealed, header included
    pub record: MetadataRecord,
    /// Ciphertext chunks, last one terminal
    pub stream: EncryptStream<S>,
}

impl<S> std::fmt::Debug for Envelope<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Envelope")
            .field("key", &"[REDACTED]")
            .field("metadata", &self.metadata.len())
            .field("record", &self.record)
            .finish_non_exhaustive()
    }
}

/// Start encrypting `source` (already cut into plaintext chunks).
///
/// Stores a fresh stream header in `record` and seals it under the metadata
/// key. No chunk is pulled until the returned stream is polled.
pub fn encrypt<S, E>(source: S, mut record: MetadataRecord) -> SealResult<Envelope<S>>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Into<SealError>,
{
    let master = MasterSecret::generate();
    let metadata_key = master.metadata_key()?;
    let stream_key = master.stream_key()?;

    let sealer = StreamSealer::new(&stream_key);
    record.set_stream_header(sealer.header());
    let metadata = seal_metadata(&record, &metadata_key)?;

    debug!(
        size = record.size,
        chunk_size = record.chunk_size,
        "envelope initialized"
    );

    Ok(Envelope {
        key: master.encode(),
        metadata: Bytes::from(metadata),
        record,
        stream: EncryptStream::new(source, sealer),
    })
}

enum Lookahead {
    /// Nothing pulled yet
    Empty,
    /// One plaintext chunk waiting for its successor
    Held(Bytes),
    /// Terminal chunk emitted or an error was raised
    Finished,
}

/// Ciphertext stream produced by [`encrypt`].
///
/// Chunk N is sealed only after the pull for chunk N+1 answered, so the
/// terminal tag lands on the true last chunk without knowing the length up
/// front. An empty source yields one empty terminal chunk.
pub struct EncryptStream<S> {
    source: S,
    sealer: StreamSealer,
    state: Lookahead,
    sealed: u64,
}

impl<S> EncryptStream<S> {
    fn new(source: S, sealer: StreamSealer) -> Self {
        Self {
            source,
            sealer,
            state: Lookahead::Empty,
            sealed: 0,
        }
    }

    /// Chunks sealed so far
    pub fn sealed(&self) -> u64 {
        self.sealed
    }

    fn seal(&mut self, chunk: &[u8], tag: ChunkTag) -> SealResult<Bytes> {
        let sealed = self.sealer.push(chunk, tag)?;
        trace!(index = self.sealed, len = chunk.len(), ?tag, "sealed chunk");
        self.sealed += 1;
        Ok(Bytes::from(sealed))
    }
}

impl<S, E> Stream for EncryptStream<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Into<SealError>,
{
    type Item = SealResult<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;

        loop {
            if matches!(this.state, Lookahead::Finished) {
                return Poll::Ready(None);
            }

            let pulled = ready!(this.source.poll_next_unpin(cx));
            let previous = std::mem::replace(&mut this.state, Lookahead::Finished);

            let result = match (previous, pulled) {
                (_, Some(Err(e))) => Err(e.into()),
                (Lookahead::Empty, Some(Ok(next))) => {
                    this.state = Lookahead::Held(next);
                    continue;
                }
                (Lookahead::Held(held), Some(Ok(next))) => {
                    this.state = Lookahead::Held(next);
                    this.seal(&held, ChunkTag::Continuation)
                }
                (Lookahead::Held(held), None) => this.seal(&held, ChunkTag::Terminal),
                (Lookahead::Empty, None) => this.seal(&[], ChunkTag::Terminal),
                (Lookahead::Finished, _) => return Poll::Ready(None),
            };

            if result.is_err() {
                this.state = Lookahead::Finished;
            }
            return Poll::Ready(Some(result));
        }
    }
}

/// Start decrypting `stream` with the header from the metadata record.
pub fn decrypt<S, E>(stream: S, header: &[u8], stream_key: &SubKey) -> SealResult<DecryptStream<S>>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Into<SealError>,
{
    let header = <&[u8; HEADER_SIZE]>::try_from(header).map_err(|_| {
        SealError::Protocol(format!(
            "stream header has {} bytes, expected {HEADER_SIZE}",
            header.len()
        ))
    })?;

    Ok(DecryptStream {
        source: stream,
        opener: StreamOpener::new(stream_key, header),
        state: DecryptState::Reading,
    })
}

enum DecryptState {
    Reading,
    /// Terminal chunk opened; held until the source confirms it is exhausted
    Confirming(Vec<u8>),
    Finished,
}

/// Plaintext stream produced by [`decrypt`].
///
/// Every chunk is authenticated before it is released. The terminal chunk is
/// released only once the source has ended, so a stream with trailing data
/// yields `TrailingData` instead of its last plaintext. After the first error
/// the stream ends.
pub struct DecryptStream<S> {
    source: S,
    opener: StreamOpener,
    state: DecryptState,
}

impl<S, E> Stream for DecryptStream<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Into<SealError>,
{
    type Item = SealResult<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;

        loop {
            match this.state {
                DecryptState::Finished => return Poll::Ready(None),
                DecryptState::Reading => {
                    let pulled = ready!(this.source.poll_next_unpin(cx));
                    let ciphertext = match pulled {
                        Some(Ok(ciphertext)) => ciphertext,
                        Some(Err(e)) => {
                            this.state = DecryptState::Finished;
                            return Poll::Ready(Some(Err(e.into())));
                        }
                        None => {
                            this.state = DecryptState::Finished;
                            return Poll::Ready(Some(Err(SealError::MissingTerminal)));
                        }
                    };

                    match this.opener.pull(&ciphertext) {
                        Ok((plaintext, ChunkTag::Continuation)) => {
                            return Poll::Ready(Some(Ok(Bytes::from(plaintext))));
                        }
                        Ok((plaintext, ChunkTag::Terminal)) => {
                            this.state = DecryptState::Confirming(plaintext);
                        }
                        Err(e) => {
                            this.state = DecryptState::Finished;
                            return Poll::Ready(Some(Err(e)));
                        }
                    }
                }
                DecryptState::Confirming(_) => {
                    let pulled = ready!(this.source.poll_next_unpin(cx));
                    let DecryptState::Confirming(plaintext) =
                        std::mem::replace(&mut this.state, DecryptState::Finished)
                    else {
                        return Poll::Ready(None);
                    };

                    return Poll::Ready(Some(match pulled {
                        None => Ok(Bytes::from(plaintext)),
                        Some(Ok(_)) => Err(SealError::TrailingData),
                        Some(Err(e)) => Err(e.into()),
                    }));
                }
            }
        }
    }
}

/// Metadata and stream key recovered from an encoded master secret
pub struct OpenedEnvelope {
    pub record: MetadataRecord,
    pub header: [u8; HEADER_SIZE],
    stream_key: SubKey,
}

impl OpenedEnvelope {
    /// Decrypt the ciphertext chunks belonging to this envelope.
    pub fn decrypt<S, E>(&self, stream: S) -> SealResult<DecryptStream<S>>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin,
        E: Into<SealError>,
    {
        decrypt(stream, &self.header, &self.stream_key)
    }
}

impl std::fmt::Debug for OpenedEnvelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenedEnvelope")
            .field("record", &self.record)
            .field("stream_key", &self.stream_key)
            .finish_non_exhaustive()
    }
}

/// Open a sealed metadata block with the encoded master secret.
pub fn open(metadata: &[u8], key: &str) -> SealResult<OpenedEnvelope> {
    let master = MasterSecret::from_encoded(key)?;
    let record = open_metadata(metadata, &master.metadata_key()?)?;
    let header = record.stream_header()?;

    Ok(OpenedEnvelope {
        record,
        header,
        stream_key: master.stream_key()?,
    })
}
