use bytes::Bytes;

use crate::err::{DecodeError, DecodeErrorKind};

/// Where a [ByteReader::seek] offset is measured from.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Anchor {
    Start,
    Current,
    End,
}

/// Positional reader over an in-memory byte buffer.
///
/// Reads are clamped to the end of the buffer; `read(n)` past the end yields
/// the remaining bytes. The codec uses the checked `read_exact` variants,
/// which fail instead of truncating.
#[derive(Debug, Clone)]
pub struct ByteReader {
    bytes: Bytes,
    pos: usize,
}

impl ByteReader {
    pub fn new(bytes: Bytes) -> Self {
        return Self { bytes, pos: 0 };
    }

    pub fn position(&self) -> usize {
        return self.pos;
    }

    pub fn remaining(&self) -> usize {
        return self.bytes.len() - self.pos;
    }

    pub fn seek(&mut self, offset: isize, anchor: Anchor) {
        let base = match anchor {
            Anchor::Start => 0,
            Anchor::Current => self.pos as isize,
            Anchor::End => self.bytes.len() as isize,
        };

        let pos = base + offset;
        self.pos = pos.clamp(0, self.bytes.len() as isize) as usize;
    }

    /// Reads up to `count` bytes, clamped to the end of the buffer.
    pub fn read(&mut self, count: usize) -> Bytes {
        let end = (self.pos + count).min(self.bytes.len());
        let out = self.bytes.slice(self.pos..end);
        self.pos = end;
        return out;
    }

    /// Reads the rest of the buffer.
    pub fn read_to_end(&mut self) -> Bytes {
        return self.read(self.remaining());
    }

    pub fn read_exact(&mut self, count: usize) -> Result<Bytes, DecodeError> {
        if count > self.remaining() {
            return Err(DecodeError::new(
                DecodeErrorKind::MalformedString,
                format!(
                    "Attempted to read {count} bytes with {} remaining.",
                    self.remaining()
                ),
            ));
        }

        return Ok(self.read(count));
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        let bytes = self.read_exact(1)?;
        return Ok(bytes[0]);
    }

    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        let bytes = self.read_exact(2)?;
        return Ok(u16::from_be_bytes([bytes[0], bytes[1]]));
    }

    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        let bytes = self.read_exact(4)?;
        return Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]));
    }
}
