//! Compact binary records: unsigned LEB128-style varints and raw UTF-8
//!
//! Strings carry no length prefix. A record either length-prefixes a string
//! with `push_varint` itself or places it last.

use sealdrop_core::{SealError, SealResult};

/// Append-only record builder
#[derive(Debug, Clone, Default)]
pub struct MetaPacker {
    data: Vec<u8>,
}

impl MetaPacker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit `num` 7 bits at a time, low bits first, with 0x80 on every byte
    /// but the last. Zero encodes as a single 0x00.
    pub fn push_varint(&mut self, mut num: u64) -> &mut Self {
        loop {
            let mut byte = (num & 0x7F) as u8;
            num >>= 7;
            if num != 0 {
                byte |= 0x80;
            }
            self.data.push(byte);
            if num == 0 {
                return self;
            }
        }
    }

    /// Emit the raw UTF-8 bytes of `s`.
    pub fn push_str(&mut self, s: &str) -> &mut Self {
        self.data.extend_from_slice(s.as_bytes());
        self
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn finish(self) -> Vec<u8> {
        self.data
    }
}

/// Cursor over a packed record
#[derive(Debug, Clone)]
pub struct MetaReader<'a> {
    data: &'a [u8],
}

impl<'a> MetaReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    pub fn read_varint(&mut self) -> SealResult<u64> {
        let mut value: u64 = 0;
        let mut shift = 0u32;

        loop {
            let (&byte, rest) = self
                .data
                .split_first()
                .ok_or_else(|| SealError::Protocol("truncated varint".into()))?;
            self.data = rest;

            let bits = u64::from(byte & 0x7F);
            if shift > 63 || (shift == 63 && bits > 1) {
                return Err(SealError::Protocol("varint overflows 64 bits".into()));
            }
            value |= bits << shift;

            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
        }
    }

    pub fn read_bytes(&mut self, len: usize) -> SealResult<&'a [u8]> {
        if len > self.data.len() {
            return Err(SealError::Protocol(format!(
                "record field needs {len} bytes, {} left",
                self.data.len()
            )));
        }
        let (head, rest) = self.data.split_at(len);
        self.data = rest;
        Ok(head)
    }

    pub fn remaining(&self) -> &'a [u8] {
        self.data
    }
}
