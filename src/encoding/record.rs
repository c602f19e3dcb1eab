//! # Record Contract
//!
//! Every key and value type stored in a tree must implement [`Record`]: a
//! declared maximum encoded size plus encode/decode against the byte
//! cursors. The maximum size is what makes page images fixed-width — each
//! key or value occupies a slot of exactly `MAX_ENCODED_SIZE` bytes on
//! disk, so sibling fields never shift when a shorter encoding is stored.
//!
//! ## Slot discipline
//!
//! [`encode_slot`] and [`decode_slot`] enforce the contract at the boundary
//! between a `Record` implementation and the cursor:
//!
//! - Encoding fewer bytes than declared is fine; the remainder is
//!   zero-padded.
//! - Encoding more bytes than declared is a fatal contract violation
//!   (surfaced immediately, never silently truncated).
//! - Decoding fewer bytes than declared skips the padding so the cursor
//!   lands on the next field.
//! - Decoding more bytes than declared is a fatal integrity error.
//!
//! ## Provided implementations
//!
//! All fixed-width integers, `f32`/`f64`, `[u8; N]`, and [`BoundedString`]
//! for capped-length text.

use eyre::{bail, ensure, Result};

use super::cursor::{ByteReader, ByteWriter};

/// Capability required of tree key and value types.
///
/// `MAX_ENCODED_SIZE` is an upper bound on the bytes `encode` may produce;
/// it sizes every page's fixed slot for this type. `decode` must consume at
/// most that many bytes.
pub trait Record: Sized {
    const MAX_ENCODED_SIZE: usize;

    fn encode(&self, out: &mut ByteWriter);

    fn decode(input: &mut ByteReader<'_>) -> Result<Self>;
}

macro_rules! impl_record_primitive {
    ($ty:ty, $write:ident, $read:ident) => {
        impl Record for $ty {
            const MAX_ENCODED_SIZE: usize = std::mem::size_of::<$ty>();

            fn encode(&self, out: &mut ByteWriter) {
                out.$write(*self);
            }

            fn decode(input: &mut ByteReader<'_>) -> Result<Self> {
                input.$read()
            }
        }
    };
}

impl_record_primitive!(u8, write_u8, read_u8);
impl_record_primitive!(u16, write_u16, read_u16);
impl_record_primitive!(u32, write_u32, read_u32);
impl_record_primitive!(u64, write_u64, read_u64);
impl_record_primitive!(i8, write_i8, read_i8);
impl_record_primitive!(i16, write_i16, read_i16);
impl_record_primitive!(i32, write_i32, read_i32);
impl_record_primitive!(i64, write_i64, read_i64);
impl_record_primitive!(f32, write_f32, read_f32);
impl_record_primitive!(f64, write_f64, read_f64);

impl<const N: usize> Record for [u8; N] {
    const MAX_ENCODED_SIZE: usize = N;

    fn encode(&self, out: &mut ByteWriter) {
        out.write_bytes(self);
    }

    fn decode(input: &mut ByteReader<'_>) -> Result<Self> {
        let bytes = input.read_bytes(N)?;
        let mut raw = [0u8; N];
        raw.copy_from_slice(bytes);
        Ok(raw)
    }
}

/// UTF-8 string with an enforced maximum byte length.
///
/// Encoded as a u16 length prefix plus the raw bytes, so the slot cost is
/// `2 + MAX` bytes regardless of the stored length. Ordering is the usual
/// lexicographic string order, which makes it usable as a tree key.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BoundedString<const MAX: usize>(String);

impl<const MAX: usize> BoundedString<MAX> {
    pub fn new(s: impl Into<String>) -> Result<Self> {
        // Forces the length-prefix bound check even when no page layout
        // ever evaluates the slot size.
        let _ = Self::MAX_ENCODED_SIZE;
        let s = s.into();
        ensure!(
            s.len() <= MAX,
            "string of {} bytes exceeds bound of {}",
            s.len(),
            MAX
        );
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<const MAX: usize> std::fmt::Display for BoundedString<MAX> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl<const MAX: usize> Record for BoundedString<MAX> {
    // A bound past u16::MAX could not be represented in the length prefix,
    // so it is rejected when the type is instantiated.
    const MAX_ENCODED_SIZE: usize = {
        assert!(
            MAX <= u16::MAX as usize,
            "BoundedString bound exceeds the u16 length prefix"
        );
        2 + MAX
    };

    fn encode(&self, out: &mut ByteWriter) {
        out.write_str(&self.0);
    }

    fn decode(input: &mut ByteReader<'_>) -> Result<Self> {
        let s = input.read_str()?;
        Self::new(s)
    }
}

/// Encodes one record into a fixed slot of exactly `slot_size` bytes.
///
/// `slot_size` is the record type's declared maximum; producing more than
/// that is a caller contract violation and fails the whole operation.
pub(crate) fn encode_slot<T: Record>(out: &mut ByteWriter, record: &T, slot_size: usize) -> Result<()> {
    let start = out.len();
    record.encode(out);
    let written = out.len() - start;
    if written > slot_size {
        tracing::error!(
            written,
            declared = slot_size,
            "record encoded more bytes than its declared maximum"
        );
        bail!(
            "record encoded {} bytes, exceeding its declared maximum of {}",
            written,
            slot_size
        );
    }
    out.pad(slot_size - written);
    Ok(())
}

/// Decodes one record from a fixed slot of exactly `slot_size` bytes,
/// skipping any padding the encoder left behind.
pub(crate) fn decode_slot<T: Record>(input: &mut ByteReader<'_>, slot_size: usize) -> Result<T> {
    let start = input.position();
    let record = T::decode(input)?;
    let consumed = input.position() - start;
    if consumed > slot_size {
        tracing::error!(
            consumed,
            declared = slot_size,
            "record decoded more bytes than its declared maximum"
        );
        bail!(
            "record decoded {} bytes, exceeding its declared maximum of {}",
            consumed,
            slot_size
        );
    }
    input.skip(slot_size - consumed)?;
    Ok(record)
}
