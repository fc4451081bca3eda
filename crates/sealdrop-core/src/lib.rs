pub mod config;
pub mod error;
pub mod types;

pub use error::{ErrorKind, SealError, SealResult};
pub use types::{ChunkTag, SessionId};
