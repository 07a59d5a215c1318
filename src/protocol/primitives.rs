//! Shared wire primitives
//!
//! Length-encoded integers and strings, NUL-terminated strings, a bounds-checked
//! payload reader and the header length patch used after in-place edits.

use crate::{Error, Result};
use bytes::{BufMut, BytesMut};

/// Prefix byte for a NULL column / zero length-encoded integer
pub const LENENC_NULL: u8 = 0xFB;
/// Prefix byte for a 2-byte length-encoded integer
pub const LENENC_U16: u8 = 0xFC;
/// Prefix byte for a 3-byte length-encoded integer
pub const LENENC_U24: u8 = 0xFD;
/// Prefix byte for an 8-byte length-encoded integer
pub const LENENC_U64: u8 = 0xFE;

fn truncated(what: &str) -> Error {
    Error::Protocol(format!("truncated packet while reading {}", what))
}

/// Bounds-checked cursor over a frame payload
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    /// Start reading at the beginning of `buf`
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Current offset
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left to read
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// True when every byte was consumed
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Read one byte
    pub fn u8(&mut self) -> Result<u8> {
        let b = *self.buf.get(self.pos).ok_or_else(|| truncated("u8"))?;
        self.pos += 1;
        Ok(b)
    }

    /// Read a little-endian u16
    pub fn u16_le(&mut self) -> Result<u16> {
        let b = self.bytes(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    /// Read a little-endian u24
    pub fn u24_le(&mut self) -> Result<u32> {
        let b = self.bytes(3)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], 0]))
    }

    /// Read a little-endian u32
    pub fn u32_le(&mut self) -> Result<u32> {
        let b = self.bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Read a little-endian u64
    pub fn u64_le(&mut self) -> Result<u64> {
        let b = self.bytes(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(u64::from_le_bytes(raw))
    }

    /// Read a big-endian i32
    pub fn i32_be(&mut self) -> Result<i32> {
        let b = self.bytes(4)?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Read exactly `n` bytes
    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(n).ok_or_else(|| truncated("bytes"))?;
        let out = self.buf.get(self.pos..end).ok_or_else(|| truncated("bytes"))?;
        self.pos = end;
        Ok(out)
    }

    /// Read everything that is left
    pub fn rest(&mut self) -> &'a [u8] {
        let out = &self.buf[self.pos..];
        self.pos = self.buf.len();
        out
    }

    /// Read a NUL-terminated string, consuming the terminator
    pub fn nul_bytes(&mut self) -> Result<&'a [u8]> {
        let rest = &self.buf[self.pos..];
        let end = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| Error::Protocol("missing null terminator in string".into()))?;
        self.pos += end + 1;
        Ok(&rest[..end])
    }

    /// Read a NUL-terminated string, or everything left if no terminator exists.
    ///
    /// Returns the bytes and whether a terminator was consumed.
    pub fn nul_bytes_or_rest(&mut self) -> (&'a [u8], bool) {
        let rest = &self.buf[self.pos..];
        match rest.iter().position(|&b| b == 0) {
            Some(end) => {
                self.pos += end + 1;
                (&rest[..end], true)
            }
            None => {
                self.pos = self.buf.len();
                (rest, false)
            }
        }
    }

    /// Read a NUL-terminated UTF-8 string (lossy)
    pub fn nul_string(&mut self) -> Result<String> {
        Ok(String::from_utf8_lossy(self.nul_bytes()?).into_owned())
    }

    /// Read a length-encoded integer
    pub fn lenenc_int(&mut self) -> Result<u64> {
        match self.u8()? {
            LENENC_NULL => Ok(0),
            LENENC_U16 => Ok(u64::from(self.u16_le()?)),
            LENENC_U24 => Ok(u64::from(self.u24_le()?)),
            LENENC_U64 => self.u64_le(),
            b => Ok(u64::from(b)),
        }
    }

    /// Read a length-encoded string
    pub fn lenenc_bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.lenenc_int()?;
        let len = usize::try_from(len).map_err(|_| truncated("length-encoded string"))?;
        self.bytes(len)
    }
}

/// Encoded size of a length-encoded integer
pub fn lenenc_int_len(value: u64) -> usize {
    match value {
        0..=0xFA => 1,
        0xFB..=0xFFFF => 3,
        0x1_0000..=0xFF_FFFF => 4,
        _ => 9,
    }
}

/// Append a length-encoded integer
pub fn put_lenenc_int(buf: &mut BytesMut, value: u64) {
    match value {
        0..=0xFA => buf.put_u8(value as u8),
        0xFB..=0xFFFF => {
            buf.put_u8(LENENC_U16);
            buf.put_u16_le(value as u16);
        }
        0x1_0000..=0xFF_FFFF => {
            buf.put_u8(LENENC_U24);
            buf.put_slice(&(value as u32).to_le_bytes()[..3]);
        }
        _ => {
            buf.put_u8(LENENC_U64);
            buf.put_u64_le(value);
        }
    }
}

/// Append a length-encoded string
pub fn put_lenenc_bytes(buf: &mut BytesMut, value: &[u8]) {
    put_lenenc_int(buf, value.len() as u64);
    buf.put_slice(value);
}

/// Append a NUL-terminated string
pub fn put_nul_bytes(buf: &mut BytesMut, value: &[u8]) {
    buf.put_slice(value);
    buf.put_u8(0);
}

/// Header length recomputation after variable-length fields change.
///
/// `new = original + Σ(new_field_len - old_field_len)`; a negative total is a
/// malformed packet.
#[derive(Debug, Clone, Copy)]
pub struct LengthPatch {
    original: usize,
    delta: i64,
}

impl LengthPatch {
    /// Start from the length carried by the original frame header
    pub fn new(original: usize) -> Self {
        Self { original, delta: 0 }
    }

    /// Account for one field whose encoded size went from `old` to `new`
    pub fn field(mut self, old: usize, new: usize) -> Self {
        self.delta += new as i64 - old as i64;
        self
    }

    /// Net change across all recorded fields
    pub fn delta(&self) -> i64 {
        self.delta
    }

    /// Resulting header length
    pub fn resolve(&self) -> Result<usize> {
        let total = self.original as i64 + self.delta;
        if total < 0 {
            return Err(Error::Protocol(format!(
                "malformed packet: patched length {} is negative",
                total
            )));
        }
        Ok(total as usize)
    }
}
