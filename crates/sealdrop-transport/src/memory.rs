//! In-process store used by tests and local dry runs
//!
//! Acceptance rules:
//! - metadata larger than 4096 bytes is refused
//! - chunks for an unknown or already sealed session are refused
//! - an empty chunk seals the session

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use bytes::Bytes;
use sealdrop_core::{SealError, SealResult, SessionId};
use tokio::sync::Mutex;
use tracing::debug;

use crate::duplex::{DuplexChannel, Reply};
use crate::store::UploadStore;

/// Largest metadata block the store accepts
pub const MAX_METADATA_SIZE: usize = 4096;

/// One upload as the store saw it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredUpload {
    pub metadata: Bytes,
    pub chunks: Vec<Bytes>,
    pub complete: bool,
}

#[derive(Debug, Default)]
struct Sessions {
    next_id: u64,
    uploads: HashMap<SessionId, StoredUpload>,
}

/// Cloneable handle to a shared in-memory store
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Sessions>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of one upload.
    pub async fn get(&self, session: &SessionId) -> Option<StoredUpload> {
        self.inner.lock().await.uploads.get(session).cloned()
    }

    /// Number of uploads ever created.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.uploads.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Apply one append; an empty chunk seals the session.
    async fn append(&self, session: &SessionId, chunk: Bytes) -> SealResult<bool> {
        let mut sessions = self.inner.lock().await;
        let upload = sessions
            .uploads
            .get_mut(session)
            .filter(|u| !u.complete)
            .ok_or_else(|| {
                SealError::Transport(format!("upload {session} not present or gone"))
            })?;

        if chunk.is_empty() {
            upload.complete = true;
            debug!(session = %session, chunks = upload.chunks.len(), "memory upload sealed");
            return Ok(true);
        }
        upload.chunks.push(chunk);
        Ok(false)
    }
}

impl UploadStore for MemoryStore {
    async fn create_upload(&self, metadata: Bytes) -> SealResult<SessionId> {
        if metadata.len() > MAX_METADATA_SIZE {
            return Err(SealError::Transport(format!(
                "metadata may not be larger than {MAX_METADATA_SIZE} bytes"
            )));
        }

        let mut sessions = self.inner.lock().await;
        sessions.next_id += 1;
        let session = SessionId::new(format!("mem-{:08x}", sessions.next_id));
        sessions.uploads.insert(
            session.clone(),
            StoredUpload {
                metadata,
                ..Default::default()
            },
        );
        Ok(session)
    }

    async fn append_chunk(&self, session: &SessionId, chunk: Bytes) -> SealResult<()> {
        if chunk.is_empty() {
            // an empty append would seal the session
            return Err(SealError::Protocol("refusing to append an empty chunk".into()));
        }
        self.append(session, chunk).await.map(drop)
    }

    async fn finalize_upload(&self, session: &SessionId) -> SealResult<()> {
        self.append(session, Bytes::new()).await.map(drop)
    }
}

/// [`DuplexChannel`] answering like the store's WebSocket endpoint.
///
/// The first frame creates the upload, later frames append, the empty frame
/// seals it and queues the session id as a text reply.
#[derive(Debug)]
pub struct MemoryChannel {
    store: MemoryStore,
    session: Option<SessionId>,
    replies: VecDeque<Reply>,
    frames: usize,
    closed: bool,
}

impl MemoryChannel {
    pub fn new(store: MemoryStore) -> Self {
        Self {
            store,
            session: None,
            replies: VecDeque::new(),
            frames: 0,
            closed: false,
        }
    }

    /// Queue a reply delivered before anything the store itself answers.
    pub fn with_reply(mut self, reply: Reply) -> Self {
        self.replies.push_back(reply);
        self
    }

    /// Drop the connection; sends fail and `recv` drains then yields `None`.
    pub fn close(&mut self) {
        self.closed = true;
    }

    /// Frames received so far, metadata and end marker included
    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn session(&self) -> Option<&SessionId> {
        self.session.as_ref()
    }
}

impl DuplexChannel for MemoryChannel {
    async fn send(&mut self, frame: Bytes) -> SealResult<()> {
        if self.closed {
            return Err(SealError::Transport("memory channel closed".into()));
        }
        self.frames += 1;

        let Some(session) = self.session.clone() else {
            self.session = Some(self.store.create_upload(frame).await?);
            return Ok(());
        };

        if self.store.append(&session, frame).await? {
            self.replies.push_back(Reply::Text(session.to_string()));
        }
        Ok(())
    }

    async fn recv(&mut self) -> SealResult<Option<Reply>> {
        Ok(self.replies.pop_front())
    }
}
