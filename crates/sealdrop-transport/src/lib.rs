//! sealdrop-transport: moves sealed envelopes to the remote store
//!
//! - `store`: request/response contract ([`UploadStore`]) and its HTTP client
//! - `duplex`: message channel contract ([`DuplexChannel`]) and its WebSocket client
//! - `flow`: byte-credit window bounding what the duplex writer may hold
//! - `upload`: the two upload strategies
//! - `memory`: in-process store and channel

pub mod duplex;
pub mod flow;
pub mod memory;
pub mod store;
pub mod upload;

pub use duplex::{duplex_url, DuplexChannel, Reply, WsChannel};
pub use flow::{FlowControl, DEFAULT_WATERMARK};
pub use memory::{MemoryChannel, MemoryStore, StoredUpload};
pub use store::{HttpStore, UploadStore};
pub use upload::{upload_duplex, upload_request, DuplexUploader, RequestUploader};
