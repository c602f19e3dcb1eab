//! # Byte Cursors
//!
//! Sequential binary encode/decode over in-memory byte buffers.
//!
//! [`ByteWriter`] appends fixed-width primitives and length-prefixed strings
//! in call order and exposes the resulting buffer. [`ByteReader`] wraps a
//! byte slice with a cursor; each typed read consumes exactly the width of
//! the type and advances the cursor. Reading past the end of the buffer is
//! an error, never a truncated value.
//!
//! Encoding rules:
//!
//! - Integers and floats: little-endian, `size_of::<T>()` bytes
//! - Strings: u16 byte length followed by that many UTF-8 bytes
//!
//! Both cursors are purely functional over the buffer; no I/O happens here.

use eyre::{ensure, Result};

/// Append-only encoder over a growable byte buffer.
#[derive(Debug, Default)]
pub struct ByteWriter {
    buf: Vec<u8>,
}

macro_rules! write_primitive {
    ($name:ident, $ty:ty) => {
        pub fn $name(&mut self, value: $ty) {
            self.buf.extend_from_slice(&value.to_le_bytes());
        }
    };
}

macro_rules! read_primitive {
    ($name:ident, $ty:ty) => {
        pub fn $name(&mut self) -> Result<$ty> {
            const WIDTH: usize = std::mem::size_of::<$ty>();
            let bytes = self.read_bytes(WIDTH)?;
            let mut raw = [0u8; WIDTH];
            raw.copy_from_slice(bytes);
            Ok(<$ty>::from_le_bytes(raw))
        }
    };
}

impl ByteWriter {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Creates a writer pre-sized for `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    write_primitive!(write_u8, u8);
    write_primitive!(write_u16, u16);
    write_primitive!(write_u32, u32);
    write_primitive!(write_u64, u64);
    write_primitive!(write_i8, i8);
    write_primitive!(write_i16, i16);
    write_primitive!(write_i32, i32);
    write_primitive!(write_i64, i64);
    write_primitive!(write_f32, f32);
    write_primitive!(write_f64, f64);

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Writes a u16 byte-length prefix followed by the raw UTF-8 bytes.
    ///
    /// Panics when `s` is longer than `u16::MAX` bytes; such a string has
    /// no representable length prefix.
    pub fn write_str(&mut self, s: &str) {
        assert!(
            s.len() <= u16::MAX as usize,
            "string of {} bytes overflows the u16 length prefix",
            s.len()
        );
        self.write_u16(s.len() as u16);
        self.buf.extend_from_slice(s.as_bytes());
    }

    /// Appends `count` zero bytes.
    pub fn pad(&mut self, count: usize) {
        self.buf.resize(self.buf.len() + count, 0);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Cursor-based decoder over a borrowed byte slice.
#[derive(Debug)]
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Consumes `count` bytes and returns them as a slice of the buffer.
    pub fn read_bytes(&mut self, count: usize) -> Result<&'a [u8]> {
        ensure!(
            count <= self.remaining(),
            "read of {} bytes past end of buffer (position {}, length {})",
            count,
            self.pos,
            self.buf.len()
        );
        let start = self.pos;
        self.pos += count;
        Ok(&self.buf[start..self.pos])
    }

    read_primitive!(read_u8, u8);
    read_primitive!(read_u16, u16);
    read_primitive!(read_u32, u32);
    read_primitive!(read_u64, u64);
    read_primitive!(read_i8, i8);
    read_primitive!(read_i16, i16);
    read_primitive!(read_i32, i32);
    read_primitive!(read_i64, i64);
    read_primitive!(read_f32, f32);
    read_primitive!(read_f64, f64);

    /// Reads a u16 byte-length prefix followed by that many UTF-8 bytes.
    pub fn read_str(&mut self) -> Result<String> {
        let len = self.read_u16()? as usize;
        let bytes = self.read_bytes(len)?;
        let s = std::str::from_utf8(bytes)
            .map_err(|e| eyre::eyre!("invalid UTF-8 in string field: {}", e))?;
        Ok(s.to_owned())
    }

    /// Advances the cursor without interpreting the skipped bytes.
    pub fn skip(&mut self, count: usize) -> Result<()> {
        ensure!(
            count <= self.remaining(),
            "skip of {} bytes past end of buffer (position {}, length {})",
            count,
            self.pos,
            self.buf.len()
        );
        self.pos += count;
        Ok(())
    }

    /// Moves the cursor to an absolute offset within the buffer.
    pub fn seek_to(&mut self, offset: usize) -> Result<()> {
        ensure!(
            offset <= self.buf.len(),
            "seek to {} past end of buffer (length {})",
            offset,
            self.buf.len()
        );
        self.pos = offset;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitives_round_trip() {
        let mut w = ByteWriter::new();
        w.write_u8(0xAB);
        w.write_i32(-123456);
        w.write_u64(u64::MAX - 1);
        w.write_f64(3.5);
        w.write_i64(-1);

        let bytes = w.into_bytes();
        let mut r = ByteReader::new(&bytes);

        assert_eq!(r.read_u8().unwrap(), 0xAB);
        assert_eq!(r.read_i32().unwrap(), -123456);
        assert_eq!(r.read_u64().unwrap(), u64::MAX - 1);
        assert_eq!(r.read_f64().unwrap(), 3.5);
        assert_eq!(r.read_i64().unwrap(), -1);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn integers_are_little_endian() {
        let mut w = ByteWriter::new();
        w.write_u32(0x0102_0304);

        assert_eq!(w.as_slice(), &[0x04, 0x03, 0x02, 0x01]);
    }

    #[test]
    fn string_round_trip() {
        let mut w = ByteWriter::new();
        w.write_str("pagina");
        w.write_str("");

        let bytes = w.into_bytes();
        let mut r = ByteReader::new(&bytes);

        assert_eq!(r.read_str().unwrap(), "pagina");
        assert_eq!(r.read_str().unwrap(), "");
    }

    #[test]
    #[should_panic(expected = "overflows the u16 length prefix")]
    fn write_str_rejects_prefix_overflow() {
        let mut w = ByteWriter::new();
        w.write_str(&"x".repeat(u16::MAX as usize + 1));
    }

    #[test]
    fn read_past_end_fails() {
        let bytes = [1u8, 2, 3];
        let mut r = ByteReader::new(&bytes);

        assert!(r.read_u16().is_ok());
        let err = r.read_u32().unwrap_err();

        assert!(err.to_string().contains("past end of buffer"));
        // A failed read must not move the cursor.
        assert_eq!(r.position(), 2);
    }

    #[test]
    fn skip_and_seek() {
        let bytes = [0u8; 16];
        let mut r = ByteReader::new(&bytes);

        r.skip(10).unwrap();
        assert_eq!(r.position(), 10);
        assert_eq!(r.remaining(), 6);

        r.seek_to(4).unwrap();
        assert_eq!(r.position(), 4);

        assert!(r.skip(13).is_err());
        assert!(r.seek_to(17).is_err());
    }

    #[test]
    fn pad_writes_zeros() {
        let mut w = ByteWriter::with_capacity(8);
        w.write_u8(7);
        w.pad(3);

        assert_eq!(w.as_slice(), &[7, 0, 0, 0]);
    }

    #[test]
    fn truncated_string_fails() {
        let mut w = ByteWriter::new();
        w.write_u16(10);
        w.write_bytes(b"abc");

        let bytes = w.into_bytes();
        let mut r = ByteReader::new(&bytes);

        assert!(r.read_str().is_err());
    }
}
