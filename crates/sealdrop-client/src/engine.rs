//! Client engine: file → envelope → store, and local envelope directories
//!
//! Pipeline per file:
//!   read (ReaderStream) → rebuffer(chunk_size) → compress → encrypt → upload
//!
//! `upload_file` picks the transport from config. `upload_with_store` and
//! `upload_with_channel` take any store or channel, which is how the
//! in-memory collaborators are plugged in.
//!
//! Local envelopes (`seal_to_dir` / `open_dir`) use this layout:
//! ```text
//! <dir>/metadata.bin        sealed metadata block (4096 bytes)
//! <dir>/chunk-000000.bin    ciphertext chunk 0
//! <dir>/chunk-000001.bin    ...
//! ```

use anyhow::{Context, Result};
use bytes::Bytes;
use futures::{stream, StreamExt, TryStreamExt};
use secrecy::SecretString;
use sealdrop_chunks::{chunk_count, compressor, Rebuffer};
use sealdrop_core::config::{TransportKind, UploadConfig, MAX_CHUNK_SIZE};
use sealdrop_core::{SealError, SessionId};
use sealdrop_crypto::{encrypt, open, EncryptStream, MetadataRecord};
use sealdrop_transport::{
    duplex_url, upload_request, DuplexChannel, DuplexUploader, HttpStore, UploadStore, WsChannel,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

use crate::source::SizedSource;

/// Progress callback, called with the acknowledged fraction in (0, 1]
pub type ProgressFn = Box<dyn Fn(f64) + Send + Sync>;

/// File name of the sealed metadata block in an envelope directory
pub const METADATA_FILE: &str = "metadata.bin";

/// Read buffer for the file source; the rebuffer stage sets chunk boundaries
const READ_BUFFER: usize = 64 * 1024;

/// Plaintext chunks of a file, framed to the chunk size and held to its length
pub type FileChunks = SizedSource<Rebuffer<Rebuffer<ReaderStream<File>>>>;

/// A file ready to be streamed out as an envelope
pub struct SealedFile {
    pub path: PathBuf,
    pub key: SecretString,
    pub metadata: Bytes,
    pub record: MetadataRecord,
    /// Ciphertext chunks the stream will yield
    pub chunk_count: usize,
    pub stream: EncryptStream<FileChunks>,
}

/// Result of uploading a single file
#[derive(Debug)]
pub struct UploadOutcome {
    pub path: PathBuf,
    pub session: SessionId,
    /// Encoded master secret; the only way to read the upload back
    pub key: SecretString,
    pub chunks: usize,
    pub bytes: u64,
}

/// Result of writing a local envelope directory
#[derive(Debug)]
pub struct SealedDir {
    pub dir: PathBuf,
    pub key: SecretString,
    pub chunks: usize,
    pub bytes: u64,
}

/// Result of opening a local envelope directory
#[derive(Debug)]
pub struct OpenedFile {
    pub path: PathBuf,
    pub record: MetadataRecord,
    pub bytes: u64,
}

fn check_chunk_size(chunk_size: usize) -> Result<()> {
    if chunk_size == 0 || chunk_size > MAX_CHUNK_SIZE {
        return Err(SealError::Config(format!(
            "chunk size must be in 1..={MAX_CHUNK_SIZE}, got {chunk_size}"
        ))
        .into());
    }
    Ok(())
}

/// Open `path` and set up its encryption pipeline.
///
/// Nothing is read until the returned stream is polled. If the file changes
/// length before it is fully read, the stream fails before the terminal chunk
/// is sealed, so the upload is never finalized with a wrong size.
pub async fn seal_file(path: &Path, chunk_size: usize) -> Result<SealedFile> {
    check_chunk_size(chunk_size)?;

    let file = File::open(path)
        .await
        .with_context(|| format!("opening: {}", path.display()))?;
    let size = file
        .metadata()
        .await
        .with_context(|| format!("reading metadata: {}", path.display()))?
        .len();

    let mut record = MetadataRecord::new(size, chunk_size as u64);
    if let Some(name) = path.file_name() {
        record = record.with_name(name.to_string_lossy());
    }

    let reader = ReaderStream::with_capacity(file, READ_BUFFER.min(chunk_size));
    let framed = SizedSource::new(
        compressor(Rebuffer::new(reader, chunk_size), chunk_size),
        size,
    );
    let envelope = encrypt(framed, record).context("initializing envelope")?;

    let chunks = chunk_count(size, chunk_size);
    debug!(path = %path.display(), size, chunks, "file sealed");

    Ok(SealedFile {
        path: path.to_path_buf(),
        key: envelope.key,
        metadata: envelope.metadata,
        record: envelope.record,
        chunk_count: chunks,
        stream: envelope.stream,
    })
}

fn report(progress: Option<&ProgressFn>) -> impl FnMut(f64) + '_ {
    move |fraction| {
        if let Some(cb) = progress {
            cb(fraction);
        }
    }
}

fn outcome(
    path: PathBuf,
    session: SessionId,
    key: SecretString,
    chunks: usize,
    bytes: u64,
) -> UploadOutcome {
    info!(path = %path.display(), session = %session, chunks, bytes, "uploaded");
    UploadOutcome {
        path,
        session,
        key,
        chunks,
        bytes,
    }
}

/// Upload a sealed file over a request/response store.
pub async fn upload_with_store<T: UploadStore>(
    store: &T,
    sealed: SealedFile,
    progress: Option<&ProgressFn>,
) -> Result<UploadOutcome> {
    let SealedFile {
        path,
        key,
        metadata,
        record,
        chunk_count,
        stream,
    } = sealed;

    let session = upload_request(store, metadata, stream, chunk_count, report(progress))
        .await
        .with_context(|| format!("uploading: {}", path.display()))?;
    Ok(outcome(path, session, key, chunk_count, record.size))
}

/// Upload a sealed file over a duplex channel.
pub async fn upload_with_channel<C: DuplexChannel>(
    channel: C,
    watermark: usize,
    sealed: SealedFile,
    progress: Option<&ProgressFn>,
) -> Result<(UploadOutcome, C)> {
    let SealedFile {
        path,
        key,
        metadata,
        record,
        chunk_count,
        stream,
    } = sealed;

    let mut uploader = DuplexUploader::new(channel, watermark);
    let session = uploader
        .upload(metadata, stream, chunk_count, report(progress))
        .await
        .with_context(|| format!("uploading: {}", path.display()))?;
    Ok((
        outcome(path, session, key, chunk_count, record.size),
        uploader.into_inner(),
    ))
}

/// Seal `path` and upload it with the transport named in `config`.
pub async fn upload_file(
    config: &UploadConfig,
    path: &Path,
    progress: Option<&ProgressFn>,
) -> Result<UploadOutcome> {
    let sealed = seal_file(path, config.chunk_size).await?;
    let timeout = Duration::from_secs(config.timeout_secs);

    info!(
        path = %path.display(),
        server = %config.server,
        transport = ?config.transport,
        chunks = sealed.chunk_count,
        "upload starting"
    );

    match config.transport {
        TransportKind::Http => {
            let store = HttpStore::new(&config.server, timeout)?;
            upload_with_store(&store, sealed, progress).await
        }
        TransportKind::Duplex => {
            let url = duplex_url(&config.server, &config.duplex_path)?;
            let channel = WsChannel::connect(&url, timeout)
                .await
                .with_context(|| format!("connecting: {url}"))?;
            let (outcome, channel) =
                upload_with_channel(channel, config.watermark, sealed, progress).await?;
            if let Err(e) = channel.close().await {
                // the session id is already in hand
                debug!(error = %e, "closing duplex channel");
            }
            Ok(outcome)
        }
    }
}

fn chunk_file_name(index: usize) -> String {
    format!("chunk-{index:06}.bin")
}

fn parse_chunk_index(name: &str) -> Option<usize> {
    let digits = name.strip_prefix("chunk-")?.strip_suffix(".bin")?;
    if digits.len() < 6 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Seal `path` into an envelope directory at `dir`.
pub async fn seal_to_dir(path: &Path, dir: &Path, chunk_size: usize) -> Result<SealedDir> {
    let mut sealed = seal_file(path, chunk_size).await?;

    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("creating dir: {}", dir.display()))?;
    let metadata_path = dir.join(METADATA_FILE);
    tokio::fs::write(&metadata_path, &sealed.metadata)
        .await
        .with_context(|| format!("writing: {}", metadata_path.display()))?;

    let mut index = 0usize;
    while let Some(chunk) = sealed.stream.next().await {
        let chunk = chunk.with_context(|| format!("sealing chunk {index}: {}", path.display()))?;
        let chunk_path = dir.join(chunk_file_name(index));
        tokio::fs::write(&chunk_path, &chunk)
            .await
            .with_context(|| format!("writing: {}", chunk_path.display()))?;
        index += 1;
    }

    if index != sealed.chunk_count {
        return Err(SealError::Protocol(format!(
            "{} changed while sealing: {index} chunks, expected {}",
            path.display(),
            sealed.chunk_count
        ))
        .into());
    }

    info!(path = %path.display(), dir = %dir.display(), chunks = index, "envelope written");
    Ok(SealedDir {
        dir: dir.to_path_buf(),
        key: sealed.key,
        chunks: index,
        bytes: sealed.record.size,
    })
}

/// Chunk files of an envelope directory in stream order.
async fn list_chunks(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("listing: {}", dir.display()))?;

    let mut chunks = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        if let Some(index) = name.to_str().and_then(parse_chunk_index) {
            chunks.push((index, entry.path()));
        }
    }
    chunks.sort_by_key(|(index, _)| *index);
    Ok(chunks.into_iter().map(|(_, path)| path).collect())
}

/// Decrypt the envelope directory at `dir` into `out`.
///
/// Plaintext goes to a temporary file next to `out`, renamed into place only
/// after the terminal chunk authenticated and the size matched the record.
pub async fn open_dir(dir: &Path, key: &str, out: &Path) -> Result<OpenedFile> {
    let metadata_path = dir.join(METADATA_FILE);
    let metadata = tokio::fs::read(&metadata_path)
        .await
        .with_context(|| format!("reading: {}", metadata_path.display()))?;
    let opened = open(&metadata, key).context("opening envelope metadata")?;

    let chunk_paths = list_chunks(dir).await?;
    debug!(dir = %dir.display(), chunks = chunk_paths.len(), "opening envelope");

    let ciphertext = stream::iter(chunk_paths)
        .then(|path| async move { tokio::fs::read(&path).await.map(Bytes::from) })
        .boxed();
    let mut plaintext = opened.decrypt(ciphertext)?;

    if let Some(parent) = out.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("creating dir: {}", parent.display()))?;
    }
    let tmp = out.with_extension("sealdrop_tmp");
    let mut file = File::create(&tmp)
        .await
        .with_context(|| format!("creating tmp: {}", tmp.display()))?;

    let written: Result<u64> = async {
        let mut bytes = 0u64;
        while let Some(chunk) = plaintext.try_next().await? {
            file.write_all(&chunk).await?;
            bytes += chunk.len() as u64;
        }
        file.flush().await?;
        Ok(bytes)
    }
    .await;

    let bytes = match written {
        Ok(bytes) if bytes == opened.record.size => bytes,
        Ok(bytes) => {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(SealError::Protocol(format!(
                "envelope holds {bytes} bytes, metadata says {}",
                opened.record.size
            ))
            .into());
        }
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "envelope rejected");
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.context(format!("decrypting: {}", dir.display())));
        }
    };

    tokio::fs::rename(&tmp, out)
        .await
        .with_context(|| format!("renaming to: {}", out.display()))?;

    info!(dir = %dir.display(), out = %out.display(), bytes, "envelope opened");
    Ok(OpenedFile {
        path: out.to_path_buf(),
        record: opened.record,
        bytes,
    })
}
