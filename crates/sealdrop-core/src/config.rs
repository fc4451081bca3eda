use serde::{Deserialize, Serialize};

use crate::error::{SealError, SealResult};

/// Largest accepted plaintext chunk size (64 MiB)
pub const MAX_CHUNK_SIZE: usize = 64 * 1024 * 1024;

/// Top-level client configuration (loaded from sealdrop.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SealdropConfig {
    pub upload: UploadConfig,
    pub log: LogConfig,
}

/// Wire protocol used to reach the store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// One request per chunk, awaited sequentially
    #[default]
    Http,
    /// One persistent WebSocket channel with flow control
    Duplex,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Base URL of the store API (default: http://localhost:8008/api)
    pub server: String,
    /// Transport strategy: "http" or "duplex"
    pub transport: TransportKind,
    /// Path of the WebSocket endpoint, relative to `server`
    pub duplex_path: String,
    /// Plaintext chunk size in bytes (default: 1 MiB)
    pub chunk_size: usize,
    /// Bytes allowed in flight on the duplex channel (default: 1 MiB)
    pub watermark: usize,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            server: "http://localhost:8008/api".into(),
            transport: TransportKind::Http,
            duplex_path: "/upload/ws".into(),
            chunk_size: 1024 * 1024,
            watermark: 1024 * 1024,
            timeout_secs: 30,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl SealdropConfig {
    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> SealResult<()> {
        let upload = &self.upload;
        if upload.chunk_size == 0 || upload.chunk_size > MAX_CHUNK_SIZE {
            return Err(SealError::Config(format!(
                "upload.chunk_size must be in 1..={MAX_CHUNK_SIZE}, got {}",
                upload.chunk_size
            )));
        }
        if upload.watermark == 0 || u32::try_from(upload.watermark).is_err() {
            return Err(SealError::Config(format!(
                "upload.watermark must be in 1..={}, got {}",
                u32::MAX,
                upload.watermark
            )));
        }
        if upload.server.is_empty() {
            return Err(SealError::Config("upload.server must be set".into()));
        }
        if !matches!(self.log.format.as_str(), "json" | "text") {
            return Err(SealError::Config(format!(
                "log.format must be \"json\" or \"text\", got {:?}",
                self.log.format
            )));
        }
        Ok(())
    }
}
