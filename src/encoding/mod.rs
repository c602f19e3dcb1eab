//! # Encoding Module
//!
//! This module provides the serialization layer for treefile:
//!
//! - **Byte cursors**: sequential, bounds-checked binary encode/decode over
//!   in-memory buffers ([`ByteWriter`] / [`ByteReader`])
//! - **Record contract**: the capability every key/value type must satisfy
//!   to be stored in a tree ([`Record`]), plus the fixed-slot adapter that
//!   pads each record to its declared maximum size so page fields stay
//!   aligned
//!
//! All multi-byte integers are little-endian. Strings are length-prefixed
//! (u16) UTF-8. The cursors perform no I/O; page images are moved to and
//! from disk by [`crate::tree::store`].

mod cursor;
mod record;

pub use cursor::{ByteReader, ByteWriter};
pub use record::{BoundedString, Record};

pub(crate) use record::{decode_slot, encode_slot};
