use serde::{Deserialize, Serialize};
use std::fmt;

/// Server-side identifier of one upload session
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Marker sealed together with every ciphertext chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChunkTag {
    /// More chunks follow
    Continuation = 0x00,
    /// Last chunk of the stream
    Terminal = 0x03,
}

impl ChunkTag {
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(ChunkTag::Continuation),
            0x03 => Some(ChunkTag::Terminal),
            _ => None,
        }
    }
}
