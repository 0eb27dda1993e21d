//! Field-level readers and writers for payload shapes.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{DecodeError, EncodeError, Result};

const INT_SIZE: usize = 4;

/// Sequential, bounds-checked cursor over a borrowed payload.
#[derive(Debug, Clone)]
pub struct PayloadReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Read a 4-byte little-endian integer.
    pub fn read_int(&mut self) -> Result<i32> {
        let available = self.remaining();
        if available < INT_SIZE {
            return Err(DecodeError::Truncated {
                offset: self.pos,
                available,
            });
        }
        let mut raw = [0u8; INT_SIZE];
        raw.copy_from_slice(&self.buf[self.pos..self.pos + INT_SIZE]);
        self.pos += INT_SIZE;
        Ok(i32::from_le_bytes(raw))
    }

    /// Read a NUL-terminated UTF-8 string, consuming the terminator.
    pub fn read_str(&mut self) -> Result<&'a str> {
        let start = self.pos;
        let rest = &self.buf[start..];
        let len = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(DecodeError::MissingTerminator { offset: start })?;
        let text = std::str::from_utf8(&rest[..len])
            .map_err(|_| DecodeError::InvalidUtf8 { offset: start })?;
        self.pos += len + 1;
        Ok(text)
    }

    /// Read a string and take ownership of it.
    pub fn read_string(&mut self) -> Result<String> {
        self.read_str().map(str::to_owned)
    }

    /// Fail if anything is left.
    pub fn finish(self) -> Result<()> {
        match self.remaining() {
            0 => Ok(()),
            count => Err(DecodeError::TrailingBytes { count }),
        }
    }
}

/// Builds a payload field by field.
///
/// The first string that cannot be encoded is remembered and reported by
/// [`PayloadWriter::finish`].
#[derive(Debug, Default)]
pub struct PayloadWriter {
    buf: BytesMut,
    error: Option<EncodeError>,
}

impl PayloadWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_int(&mut self, value: i32) -> &mut Self {
        self.buf.put_i32_le(value);
        self
    }

    /// Append a string and its terminator.
    pub fn put_str(&mut self, value: &str) -> &mut Self {
        let bytes = value.as_bytes();
        if let Some(position) = bytes.iter().position(|&b| b == 0) {
            self.error.get_or_insert(EncodeError::InteriorNul {
                offset: self.buf.len(),
                position,
            });
        }
        self.buf.reserve(bytes.len() + 1);
        self.buf.put_slice(bytes);
        self.buf.put_u8(0);
        self
    }

    pub fn put_raw(&mut self, value: &[u8]) -> &mut Self {
        self.buf.put_slice(value);
        self
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn finish(self) -> std::result::Result<Bytes, EncodeError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.buf.freeze()),
        }
    }
}
