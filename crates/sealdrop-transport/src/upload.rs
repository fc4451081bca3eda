//! Upload strategies
//!
//! Both strategies share one contract: move the sealed metadata and every
//! ciphertext chunk to the store in order, report progress as
//! `chunks acknowledged / chunk_count`, and return the session id only after
//! the store accepted the whole stream. A stream that yields a different
//! number of chunks than announced is abandoned without finalizing.

use bytes::Bytes;
use futures::{Stream, StreamExt};
use sealdrop_core::{SealError, SealResult, SessionId};
use tokio::sync::{mpsc, OwnedSemaphorePermit};
use tracing::{debug, info, warn};

use crate::duplex::{DuplexChannel, Reply};
use crate::flow::FlowControl;
use crate::store::UploadStore;

/// Frames queued between producer and writer
const QUEUE_DEPTH: usize = 16;

fn check_count(chunk_count: usize) -> SealResult<()> {
    if chunk_count == 0 {
        return Err(SealError::Protocol(
            "an encrypted stream carries at least one chunk".into(),
        ));
    }
    Ok(())
}

fn count_mismatch(sent: usize, chunk_count: usize) -> SealError {
    SealError::Protocol(format!(
        "stream yielded {sent} chunks, expected {chunk_count}"
    ))
}

/// One request per chunk, each awaited before the next is pulled
#[derive(Debug, Clone)]
pub struct RequestUploader<T> {
    store: T,
}

impl<T: UploadStore> RequestUploader<T> {
    pub fn new(store: T) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &T {
        &self.store
    }

    pub async fn upload<S, P>(
        &self,
        metadata: Bytes,
        mut chunks: S,
        chunk_count: usize,
        mut on_progress: P,
    ) -> SealResult<SessionId>
    where
        S: Stream<Item = SealResult<Bytes>> + Unpin,
        P: FnMut(f64),
    {
        check_count(chunk_count)?;

        let session = self.store.create_upload(metadata).await?;
        info!(session = %session, chunks = chunk_count, "upload started");

        let mut sent = 0usize;
        let mut bytes = 0u64;
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk.inspect_err(|e| {
                warn!(session = %session, error = %e, "upload abandoned");
            })?;
            if sent == chunk_count {
                warn!(session = %session, "upload abandoned: too many chunks");
                return Err(count_mismatch(sent + 1, chunk_count));
            }

            bytes += chunk.len() as u64;
            self.store.append_chunk(&session, chunk).await?;
            sent += 1;
            debug!(session = %session, index = sent, "chunk stored");
            on_progress(sent as f64 / chunk_count as f64);
        }

        if sent != chunk_count {
            warn!(session = %session, sent, "upload abandoned: stream ended early");
            return Err(count_mismatch(sent, chunk_count));
        }

        self.store.finalize_upload(&session).await?;
        info!(session = %session, chunks = sent, bytes, "upload complete");
        Ok(session)
    }
}

enum Frame {
    Metadata(Bytes),
    Chunk(usize, Bytes),
    End,
}

impl Frame {
    fn len(&self) -> usize {
        match self {
            Frame::Metadata(data) | Frame::Chunk(_, data) => data.len(),
            Frame::End => 0,
        }
    }

    fn into_bytes(self) -> Bytes {
        match self {
            Frame::Metadata(data) | Frame::Chunk(_, data) => data,
            Frame::End => Bytes::new(),
        }
    }
}

/// All frames over one channel, throttled by a byte-credit window
pub struct DuplexUploader<C> {
    channel: C,
    flow: FlowControl,
}

impl<C: DuplexChannel> DuplexUploader<C> {
    pub fn new(channel: C, watermark: usize) -> Self {
        Self {
            channel,
            flow: FlowControl::new(watermark),
        }
    }

    pub fn into_inner(self) -> C {
        self.channel
    }

    pub async fn upload<S, P>(
        &mut self,
        metadata: Bytes,
        chunks: S,
        chunk_count: usize,
        mut on_progress: P,
    ) -> SealResult<SessionId>
    where
        S: Stream<Item = SealResult<Bytes>> + Unpin,
        P: FnMut(f64),
    {
        check_count(chunk_count)?;
        info!(chunks = chunk_count, window = self.flow.window(), "duplex upload started");

        let (tx, mut rx) = mpsc::channel::<(Frame, OwnedSemaphorePermit)>(QUEUE_DEPTH);
        let producer = produce(metadata, chunks, chunk_count, self.flow.clone(), tx);

        let channel = &mut self.channel;
        let writer = async {
            while let Some((frame, permit)) = rx.recv().await {
                let index = match &frame {
                    Frame::Chunk(index, _) => Some(*index),
                    Frame::Metadata(_) | Frame::End => None,
                };
                channel.send(frame.into_bytes()).await?;
                drop(permit);

                if let Some(index) = index {
                    debug!(index, "chunk flushed");
                    on_progress(index as f64 / chunk_count as f64);
                }
            }
            Ok::<_, SealError>(())
        };

        if let Err(e) = tokio::try_join!(producer, writer) {
            warn!(error = %e, "duplex upload abandoned");
            return Err(e);
        }

        match self.channel.recv().await? {
            Some(Reply::Text(id)) => {
                let session = SessionId::new(id.trim());
                info!(session = %session, chunks = chunk_count, "upload complete");
                Ok(session)
            }
            Some(Reply::Binary(data)) => Err(SealError::Protocol(format!(
                "expected session id, store sent {} binary bytes",
                data.len()
            ))),
            None => Err(SealError::Transport(
                "channel closed before the store sent a session id".into(),
            )),
        }
    }
}

/// Pull chunks and queue them behind the credit window. The end marker is
/// queued only when the stream yielded exactly `chunk_count` chunks.
async fn produce<S>(
    metadata: Bytes,
    mut chunks: S,
    chunk_count: usize,
    flow: FlowControl,
    tx: mpsc::Sender<(Frame, OwnedSemaphorePermit)>,
) -> SealResult<()>
where
    S: Stream<Item = SealResult<Bytes>> + Unpin,
{
    enqueue(&flow, &tx, Frame::Metadata(metadata)).await?;

    let mut sent = 0usize;
    while let Some(chunk) = chunks.next().await {
        let chunk = chunk?;
        if sent == chunk_count {
            return Err(count_mismatch(sent + 1, chunk_count));
        }
        sent += 1;
        enqueue(&flow, &tx, Frame::Chunk(sent, chunk)).await?;
    }
    if sent != chunk_count {
        return Err(count_mismatch(sent, chunk_count));
    }

    enqueue(&flow, &tx, Frame::End).await
}

async fn enqueue(
    flow: &FlowControl,
    tx: &mpsc::Sender<(Frame, OwnedSemaphorePermit)>,
    frame: Frame,
) -> SealResult<()> {
    let permit = flow.reserve(frame.len()).await?;
    tx.send((frame, permit))
        .await
        .map_err(|_| SealError::Transport("duplex writer stopped".into()))
}

/// [`RequestUploader::upload`] over a borrowed store.
pub async fn upload_request<T, S, P>(
    store: &T,
    metadata: Bytes,
    chunks: S,
    chunk_count: usize,
    on_progress: P,
) -> SealResult<SessionId>
where
    T: UploadStore,
    S: Stream<Item = SealResult<Bytes>> + Unpin,
    P: FnMut(f64),
{
    RequestUploader::new(store)
        .upload(metadata, chunks, chunk_count, on_progress)
        .await
}

/// [`DuplexUploader::upload`] over an owned channel.
pub async fn upload_duplex<C, S, P>(
    channel: C,
    watermark: usize,
    metadata: Bytes,
    chunks: S,
    chunk_count: usize,
    on_progress: P,
) -> SealResult<SessionId>
where
    C: DuplexChannel,
    S: Stream<Item = SealResult<Bytes>> + Unpin,
    P: FnMut(f64),
{
    DuplexUploader::new(channel, watermark)
        .upload(metadata, chunks, chunk_count, on_progress)
        .await
}
