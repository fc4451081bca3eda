//! Upload strategies against the in-memory store

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use sealdrop_core::{SealError, SealResult, SessionId};
use sealdrop_transport::{
    upload_duplex, upload_request, DuplexChannel, DuplexUploader, MemoryChannel, MemoryStore,
    Reply, RequestUploader,
};

const MIB: usize = 1024 * 1024;

fn chunks(sizes: &[usize]) -> BoxStream<'static, SealResult<Bytes>> {
    let parts: Vec<SealResult<Bytes>> = sizes
        .iter()
        .enumerate()
        .map(|(i, &len)| Ok(Bytes::from(vec![i as u8; len])))
        .collect();
    stream::iter(parts).boxed()
}

fn metadata() -> Bytes {
    Bytes::from(vec![0xAAu8; 4096])
}

#[tokio::test]
async fn request_upload_reports_progress_and_finalizes() {
    let store = MemoryStore::new();
    let mut progress = Vec::new();

    let session = upload_request(&store, metadata(), chunks(&[10, 10, 5]), 3, |p| {
        progress.push(p)
    })
    .await
    .unwrap();

    assert_eq!(progress, vec![1.0 / 3.0, 2.0 / 3.0, 1.0]);
    let upload = store.get(&session).await.unwrap();
    assert!(upload.complete);
    assert_eq!(upload.metadata, metadata());
    assert_eq!(upload.chunks.len(), 3);
    assert_eq!(upload.chunks[2].len(), 5);
}

#[tokio::test]
async fn duplex_upload_two_and_a_half_mib() {
    let store = MemoryStore::new();
    let mut progress = Vec::new();

    let sizes = [MIB + 17, MIB + 17, MIB / 2 + 17];
    let session = upload_duplex(
        MemoryChannel::new(store.clone()),
        MIB,
        metadata(),
        chunks(&sizes),
        3,
        |p| progress.push(p),
    )
    .await
    .unwrap();

    assert_eq!(progress, vec![1.0 / 3.0, 2.0 / 3.0, 1.0]);
    let upload = store.get(&session).await.unwrap();
    assert!(upload.complete);
    let lens: Vec<usize> = upload.chunks.iter().map(Bytes::len).collect();
    assert_eq!(lens, sizes);
}

#[tokio::test]
async fn duplex_frames_arrive_in_order() {
    let store = MemoryStore::new();
    let mut uploader = DuplexUploader::new(MemoryChannel::new(store.clone()), 64);

    let session = uploader
        .upload(metadata(), chunks(&[40, 40, 40, 40, 3]), 5, |_| {})
        .await
        .unwrap();

    let upload = store.get(&session).await.unwrap();
    let firsts: Vec<u8> = upload.chunks.iter().map(|c| c[0]).collect();
    assert_eq!(firsts, vec![0, 1, 2, 3, 4]);
    // metadata + 5 chunks + end marker
    assert_eq!(uploader.into_inner().frames(), 7);
}

#[tokio::test]
async fn short_stream_is_abandoned_without_finalizing() {
    let store = MemoryStore::new();
    let err = RequestUploader::new(store.clone())
        .upload(metadata(), chunks(&[8, 8]), 3, |_| {})
        .await
        .unwrap_err();
    assert!(matches!(err, SealError::Protocol(_)));

    let session = SessionId::new("mem-00000001");
    let upload = store.get(&session).await.unwrap();
    assert!(!upload.complete);
    assert_eq!(upload.chunks.len(), 2);
}

#[tokio::test]
async fn long_stream_is_abandoned_without_finalizing() {
    let store = MemoryStore::new();
    let mut channel = MemoryChannel::new(store.clone());
    let mut uploader = DuplexUploader::new(&mut channel, MIB);

    let err = uploader
        .upload(metadata(), chunks(&[8, 8, 8]), 2, |_| {})
        .await
        .unwrap_err();
    assert!(matches!(err, SealError::Protocol(_)));

    let session = channel.session().cloned().unwrap();
    assert!(!store.get(&session).await.unwrap().complete);
}

#[tokio::test]
async fn source_error_aborts_duplex_upload() {
    let store = MemoryStore::new();
    let parts: Vec<SealResult<Bytes>> = vec![
        Ok(Bytes::from_static(b"first")),
        Err(SealError::Authentication("chunk 1".into())),
    ];

    let err = upload_duplex(
        MemoryChannel::new(store.clone()),
        MIB,
        metadata(),
        stream::iter(parts),
        2,
        |_| {},
    )
    .await
    .unwrap_err();
    assert!(matches!(err, SealError::Authentication(_)));
}

#[tokio::test]
async fn binary_reply_is_a_protocol_error() {
    let channel = MemoryChannel::new(MemoryStore::new()).with_reply(Reply::Binary(Bytes::from_static(b"?")));
    let err = upload_duplex(channel, MIB, metadata(), chunks(&[1]), 1, |_| {})
        .await
        .unwrap_err();
    assert!(matches!(err, SealError::Protocol(_)));
}

/// Channel that accepts frames but never answers
struct SilentChannel;

impl DuplexChannel for SilentChannel {
    async fn send(&mut self, _frame: Bytes) -> SealResult<()> {
        Ok(())
    }

    async fn recv(&mut self) -> SealResult<Option<Reply>> {
        Ok(None)
    }
}

#[tokio::test]
async fn channel_closed_without_reply_is_an_error() {
    let err = upload_duplex(SilentChannel, MIB, metadata(), chunks(&[1]), 1, |_| {})
        .await
        .unwrap_err();
    assert!(matches!(err, SealError::Transport(_)));
}

/// Channel that records how far the producer ran ahead of each send
struct MeteredChannel {
    pulled: Arc<AtomicUsize>,
    sent: usize,
    max_ahead: usize,
}

impl DuplexChannel for MeteredChannel {
    async fn send(&mut self, frame: Bytes) -> SealResult<()> {
        // give the producer every chance to run ahead
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
        if !frame.is_empty() && self.sent > 0 {
            let ahead = self.pulled.load(Ordering::SeqCst).saturating_sub(self.sent);
            self.max_ahead = self.max_ahead.max(ahead);
        }
        self.sent += 1;
        Ok(())
    }

    async fn recv(&mut self) -> SealResult<Option<Reply>> {
        Ok(Some(Reply::Text("metered".into())))
    }
}

#[tokio::test]
async fn producer_is_bounded_by_credit_window() {
    let pulled = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&pulled);
    let source = chunks(&[100; 20])
        .inspect(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .boxed();

    let channel = MeteredChannel {
        pulled,
        sent: 0,
        max_ahead: 0,
    };
    let mut uploader = DuplexUploader::new(channel, 100);
    let session = uploader.upload(metadata(), source, 20, |_| {}).await.unwrap();
    assert_eq!(session.as_str(), "metered");

    // one frame in flight plus one pulled and waiting for credit
    let channel = uploader.into_inner();
    assert!(channel.max_ahead <= 2, "producer ran {} chunks ahead", channel.max_ahead);
}

#[tokio::test]
async fn zero_chunk_count_rejected() {
    let err = upload_request(&MemoryStore::new(), metadata(), chunks(&[]), 0, |_| {})
        .await
        .unwrap_err();
    assert!(matches!(err, SealError::Protocol(_)));
}
