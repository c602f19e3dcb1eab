//! # Page Layout
//!
//! One tree node, in memory and on disk. A page of order `m` holds up to
//! `m-1` sorted `(key, value)` entries interleaved with `m` child
//! addresses. Leaf-ness is implied by pointer nullity: a page is a leaf iff
//! its first child pointer is null.
//!
//! ## On-Disk Image
//!
//! Every page serializes to the same number of bytes so that a page
//! appended at end-of-file can later be overwritten in place:
//!
//! ```text
//! Offset                      Field
//! ------                      -----
//! 0                           entry count (u32)
//! 4                           child[0] (i64, -1 = null)
//! 12                          key[0] slot | value[0] slot | child[1]
//! ...                         (repeats per entry; unused slots zero-padded)
//! tail                        next_leaf (i64, leaf-chained layouts only)
//! ```
//!
//! Key and value slots are fixed-width: the declared `MAX_ENCODED_SIZE` of
//! the type, padded by the slot adapter in [`crate::encoding`]. The
//! trailing next-leaf pointer sits at a fixed offset past all `m-1` entry
//! slots, so it decodes without scanning the padding.
//!
//! ## Child Pointers
//!
//! In memory a child is `Option<PageAddress>`; on disk the slot is an `i64`
//! with `-1` as the null sentinel. The `children` vector always holds
//! exactly `entries + 1` slots, leaves included (all null there).
//!
//! ## Split And Transfer Primitives
//!
//! [`Page::split_high_into`] moves the upper half of a full page into a
//! cleared sibling, leaving the sibling's leftmost child slot open; the
//! engine's promotion step fills or discards it. The single-entry moves
//! used by borrowing ([`Page::insert_front`], [`Page::push_entry`],
//! [`Page::remove_at`]) carry the adjacent child pointer named by the
//! caller — getting that directionality right is the whole game, see
//! `tree::engine` for the four call sites.

use eyre::{bail, ensure, Result};

use crate::encoding::{decode_slot, encode_slot, ByteReader, ByteWriter, Record};

/// Byte offset of a page within the tree file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageAddress(u64);

impl PageAddress {
    pub fn new(offset: u64) -> Self {
        Self(offset)
    }

    pub fn offset(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for PageAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// On-disk null pointer sentinel.
const NULL_ADDRESS: i64 = -1;

pub(crate) fn encode_child(out: &mut ByteWriter, child: Option<PageAddress>) {
    match child {
        Some(addr) => out.write_i64(addr.offset() as i64),
        None => out.write_i64(NULL_ADDRESS),
    }
}

pub(crate) fn decode_child(input: &mut ByteReader<'_>) -> Result<Option<PageAddress>> {
    let raw = input.read_i64()?;
    if raw == NULL_ADDRESS {
        Ok(None)
    } else if raw >= 0 {
        Ok(Some(PageAddress::new(raw as u64)))
    } else {
        bail!("corrupt page: child pointer {} is neither null nor a file offset", raw)
    }
}

/// Which child pointer [`Page::remove_at`] removes along with the entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropChild {
    Left,
    Right,
}

/// Fixed sizing of one page image for a given order and key/value types.
#[derive(Debug, Clone, Copy)]
pub struct PageLayout {
    pub order: usize,
    pub key_slot: usize,
    pub value_slot: usize,
    pub leaf_chained: bool,
}

const COUNT_FIELD_SIZE: usize = 4;
const POINTER_FIELD_SIZE: usize = 8;

impl PageLayout {
    pub fn new<K: Record, V: Record>(order: usize, leaf_chained: bool) -> Self {
        Self {
            order,
            key_slot: K::MAX_ENCODED_SIZE,
            value_slot: V::MAX_ENCODED_SIZE,
            leaf_chained,
        }
    }

    pub fn max_keys(&self) -> usize {
        self.order - 1
    }

    /// Offset of the trailing next-leaf slot: past the count, child[0] and
    /// all `m-1` (key, value, child) entry slots.
    fn tail_offset(&self) -> usize {
        COUNT_FIELD_SIZE
            + POINTER_FIELD_SIZE
            + self.max_keys() * (self.key_slot + self.value_slot + POINTER_FIELD_SIZE)
    }

    /// Exact size of every page image under this layout.
    pub fn page_size(&self) -> usize {
        self.tail_offset() + if self.leaf_chained { POINTER_FIELD_SIZE } else { 0 }
    }
}

/// One tree node: sorted entries, `entries + 1` child slots, and (for
/// leaf-chained layouts) a forward pointer to the next leaf.
#[derive(Debug, Clone)]
pub struct Page<K, V> {
    pub(crate) order: usize,
    pub(crate) keys: Vec<K>,
    pub(crate) values: Vec<V>,
    pub(crate) children: Vec<Option<PageAddress>>,
    pub(crate) address: Option<PageAddress>,
    pub(crate) next_leaf: Option<PageAddress>,
}

impl<K, V> Page<K, V>
where
    K: Record + Ord + Clone,
    V: Record + Clone,
{
    pub fn new(order: usize) -> Self {
        Self {
            order,
            keys: Vec::with_capacity(order - 1),
            values: Vec::with_capacity(order - 1),
            children: vec![None],
            address: None,
            next_leaf: None,
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn max_keys(&self) -> usize {
        self.order - 1
    }

    pub fn is_full(&self) -> bool {
        self.keys.len() == self.max_keys()
    }

    /// A page is a leaf iff its first child pointer is null. An internal
    /// page emptied by a merge still reports internal through its
    /// remaining child pointer.
    pub fn is_leaf(&self) -> bool {
        self.children[0].is_none()
    }

    pub fn keys(&self) -> &[K] {
        &self.keys
    }

    pub fn values(&self) -> &[V] {
        &self.values
    }

    pub fn address(&self) -> Option<PageAddress> {
        self.address
    }

    pub fn next_leaf(&self) -> Option<PageAddress> {
        self.next_leaf
    }

    /// First index whose key is `>= key`. Used for both insertion position
    /// and descent child selection; duplicates land leftward.
    pub fn lower_bound(&self, key: &K) -> usize {
        self.keys.partition_point(|k| k < key)
    }

    /// First index whose key is `> key`. Used by range scans.
    pub fn upper_bound(&self, key: &K) -> usize {
        self.keys.partition_point(|k| k <= key)
    }

    /// Inserts an entry at `index`, with `right_child` as the pointer to
    /// its right. Returns false (without mutating) when the page is full.
    #[must_use]
    pub fn insert_at(
        &mut self,
        index: usize,
        key: K,
        value: V,
        right_child: Option<PageAddress>,
    ) -> bool {
        if self.is_full() {
            return false;
        }
        debug_assert!(index <= self.keys.len());
        self.keys.insert(index, key);
        self.values.insert(index, value);
        self.children.insert(index + 1, right_child);
        true
    }

    /// Prepends an entry together with a new leftmost child pointer.
    pub(crate) fn insert_front(&mut self, key: K, value: V, left_child: Option<PageAddress>) {
        self.keys.insert(0, key);
        self.values.insert(0, value);
        self.children.insert(0, left_child);
    }

    /// Appends an entry together with a new rightmost child pointer.
    pub(crate) fn push_entry(&mut self, key: K, value: V, right_child: Option<PageAddress>) {
        self.keys.push(key);
        self.values.push(value);
        self.children.push(right_child);
    }

    /// Removes the entry at `index` plus exactly one adjacent child
    /// pointer, returning the entry and the dropped pointer. `None` when
    /// the page is empty or the index is out of range.
    pub fn remove_at(
        &mut self,
        index: usize,
        drop: DropChild,
    ) -> Option<(K, V, Option<PageAddress>)> {
        if index >= self.keys.len() {
            return None;
        }
        let key = self.keys.remove(index);
        let value = self.values.remove(index);
        let child = match drop {
            DropChild::Left => self.children.remove(index),
            DropChild::Right => self.children.remove(index + 1),
        };
        Some((key, value, child))
    }

    /// Moves the upper `len / 2` entries (and their trailing child
    /// pointers) into `sibling`, which is cleared first. The sibling's
    /// leftmost child slot is left open (null); the caller's promotion
    /// step fills or discards it.
    pub(crate) fn split_high_into(&mut self, sibling: &mut Page<K, V>) {
        let moved = self.keys.len() / 2;
        let keep = self.keys.len() - moved;

        sibling.clear();
        sibling.keys = self.keys.split_off(keep);
        sibling.values = self.values.split_off(keep);
        sibling.children.extend(self.children.drain(keep + 1..));
    }

    /// Appends every entry and child of `other` into this page, pulling an
    /// optional separator entry down in front of them. Leaf pages rebuild
    /// their null child slots instead of concatenating.
    pub(crate) fn absorb(&mut self, mut other: Page<K, V>, separator: Option<(K, V)>) {
        let leaf_merge = self.is_leaf() && other.is_leaf();
        if let Some((key, value)) = separator {
            self.keys.push(key);
            self.values.push(value);
        }
        self.keys.append(&mut other.keys);
        self.values.append(&mut other.values);
        if leaf_merge {
            self.children.clear();
            self.children.resize(self.keys.len() + 1, None);
        } else {
            self.children.append(&mut other.children);
        }
    }

    pub(crate) fn clear(&mut self) {
        self.keys.clear();
        self.values.clear();
        self.children.clear();
        self.children.push(None);
        self.next_leaf = None;
    }

    /// Serializes this page to exactly `layout.page_size()` bytes.
    pub(crate) fn encode_into(&self, layout: &PageLayout) -> Result<Vec<u8>> {
        ensure!(
            self.keys.len() <= layout.max_keys(),
            "page holds {} entries, layout allows {}",
            self.keys.len(),
            layout.max_keys()
        );
        debug_assert_eq!(self.children.len(), self.keys.len() + 1);

        let mut out = ByteWriter::with_capacity(layout.page_size());
        out.write_u32(self.keys.len() as u32);
        encode_child(&mut out, self.children[0]);
        for i in 0..self.keys.len() {
            encode_slot(&mut out, &self.keys[i], layout.key_slot)?;
            encode_slot(&mut out, &self.values[i], layout.value_slot)?;
            encode_child(&mut out, self.children[i + 1]);
        }
        out.pad(layout.tail_offset() - out.len());
        if layout.leaf_chained {
            encode_child(&mut out, self.next_leaf);
        }
        debug_assert_eq!(out.len(), layout.page_size());
        Ok(out.into_bytes())
    }

    /// Rebuilds a page from one fixed-size image.
    pub(crate) fn decode(layout: &PageLayout, bytes: &[u8]) -> Result<Self> {
        ensure!(
            bytes.len() == layout.page_size(),
            "corrupt page: image is {} bytes, layout expects {}",
            bytes.len(),
            layout.page_size()
        );

        let mut input = ByteReader::new(bytes);
        let count = input.read_u32()? as usize;
        ensure!(
            count <= layout.max_keys(),
            "corrupt page: entry count {} exceeds maximum {}",
            count,
            layout.max_keys()
        );

        let mut page = Page::new(layout.order);
        page.children[0] = decode_child(&mut input)?;
        for _ in 0..count {
            page.keys.push(decode_slot(&mut input, layout.key_slot)?);
            page.values.push(decode_slot(&mut input, layout.value_slot)?);
            page.children.push(decode_child(&mut input)?);
        }
        if layout.leaf_chained {
            input.seek_to(layout.tail_offset())?;
            page.next_leaf = decode_child(&mut input)?;
        }
        Ok(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page_with(order: usize, entries: &[(i32, i64)]) -> Page<i32, i64> {
        let mut page = Page::new(order);
        for &(k, v) in entries {
            let idx = page.lower_bound(&k);
            assert!(page.insert_at(idx, k, v, None));
        }
        page
    }

    fn addr(n: u64) -> Option<PageAddress> {
        Some(PageAddress::new(n))
    }

    #[test]
    fn fresh_page_is_an_empty_leaf() {
        let page: Page<i32, i64> = Page::new(4);

        assert!(page.is_leaf());
        assert!(page.is_empty());
        assert_eq!(page.children.len(), 1);
    }

    #[test]
    fn lower_bound_with_duplicates() {
        let page = page_with(8, &[(10, 0), (20, 0), (20, 1), (30, 0)]);

        assert_eq!(page.lower_bound(&5), 0);
        assert_eq!(page.lower_bound(&20), 1);
        assert_eq!(page.upper_bound(&20), 3);
        assert_eq!(page.lower_bound(&35), 4);
    }

    #[test]
    fn insert_at_keeps_keys_sorted_and_rejects_overflow() {
        let mut page = page_with(4, &[(30, 3), (10, 1)]);
        let idx = page.lower_bound(&20);
        assert!(page.insert_at(idx, 20, 2, None));

        assert_eq!(page.keys(), &[10, 20, 30]);
        assert_eq!(page.values(), &[1, 2, 3]);
        assert!(page.is_full());

        // Full page: insertion fails and nothing shifts.
        assert!(!page.insert_at(0, 5, 0, None));
        assert_eq!(page.keys(), &[10, 20, 30]);
        assert_eq!(page.children.len(), 4);
    }

    #[test]
    fn remove_at_drops_the_named_child() {
        let mut page = page_with(8, &[(10, 1), (20, 2), (30, 3)]);
        page.children = vec![addr(100), addr(200), addr(300), addr(400)];

        let (key, value, child) = page.remove_at(1, DropChild::Right).unwrap();
        assert_eq!((key, value), (20, 2));
        assert_eq!(child, addr(300));
        assert_eq!(page.children, vec![addr(100), addr(200), addr(400)]);

        let (key, _, child) = page.remove_at(0, DropChild::Left).unwrap();
        assert_eq!(key, 10);
        assert_eq!(child, addr(100));
        assert_eq!(page.children, vec![addr(200), addr(400)]);

        assert!(page.remove_at(5, DropChild::Right).is_none());
    }

    #[test]
    fn split_moves_upper_half_and_leaves_sibling_slot_open() {
        let mut page = page_with(6, &[(1, 1), (2, 2), (3, 3), (4, 4), (5, 5)]);
        page.children = vec![addr(10), addr(20), addr(30), addr(40), addr(50), addr(60)];

        let mut sibling = Page::new(6);
        page.split_high_into(&mut sibling);

        assert_eq!(page.keys(), &[1, 2, 3]);
        assert_eq!(page.children, vec![addr(10), addr(20), addr(30), addr(40)]);
        assert_eq!(sibling.keys(), &[4, 5]);
        // Leftmost sibling slot stays open for the promotion fix-up.
        assert_eq!(sibling.children, vec![None, addr(50), addr(60)]);
    }

    #[test]
    fn absorb_internal_pulls_separator_and_concatenates_children() {
        let mut left = page_with(8, &[(1, 1)]);
        left.children = vec![addr(10), addr(20)];
        let mut right = page_with(8, &[(5, 5), (6, 6)]);
        right.children = vec![addr(30), addr(40), addr(50)];

        left.absorb(right, Some((3, 3)));

        assert_eq!(left.keys(), &[1, 3, 5, 6]);
        assert_eq!(
            left.children,
            vec![addr(10), addr(20), addr(30), addr(40), addr(50)]
        );
    }

    #[test]
    fn absorb_leaves_rebuilds_null_children() {
        let mut left = page_with(8, &[(1, 1), (2, 2)]);
        let right = page_with(8, &[(7, 7)]);

        left.absorb(right, None);

        assert_eq!(left.keys(), &[1, 2, 7]);
        assert_eq!(left.children, vec![None; 4]);
        assert!(left.is_leaf());
    }

    #[test]
    fn empty_page_round_trip() {
        let layout = PageLayout::new::<i32, i64>(4, false);
        let page: Page<i32, i64> = Page::new(4);

        let image = page.encode_into(&layout).unwrap();
        assert_eq!(image.len(), layout.page_size());

        let back: Page<i32, i64> = Page::decode(&layout, &image).unwrap();
        assert!(back.is_leaf());
        assert_eq!(back.len(), 0);
    }

    #[test]
    fn populated_page_round_trip() {
        let layout = PageLayout::new::<i32, i64>(4, false);
        let mut page = page_with(4, &[(10, 100), (20, 200)]);
        page.children = vec![addr(8), addr(500), addr(992)];

        let image = page.encode_into(&layout).unwrap();
        let back: Page<i32, i64> = Page::decode(&layout, &image).unwrap();

        assert_eq!(back.keys(), page.keys());
        assert_eq!(back.values(), page.values());
        assert_eq!(back.children, page.children);
        assert!(!back.is_leaf());
    }

    #[test]
    fn chained_layout_round_trips_next_leaf() {
        let layout = PageLayout::new::<i32, i64>(4, true);
        let mut page = page_with(4, &[(10, 100)]);
        page.next_leaf = addr(1234);

        let image = page.encode_into(&layout).unwrap();
        assert_eq!(image.len(), layout.page_size());

        let back: Page<i32, i64> = Page::decode(&layout, &image).unwrap();
        assert_eq!(back.next_leaf(), addr(1234));

        // Plain layout is one pointer slot smaller.
        let plain = PageLayout::new::<i32, i64>(4, false);
        assert_eq!(layout.page_size(), plain.page_size() + 8);
    }

    #[test]
    fn decode_rejects_bad_images() {
        let layout = PageLayout::new::<i32, i64>(4, false);
        let page: Page<i32, i64> = Page::new(4);
        let image = page.encode_into(&layout).unwrap();

        // Wrong size.
        assert!(Page::<i32, i64>::decode(&layout, &image[1..]).is_err());

        // Entry count beyond capacity.
        let mut bad = image.clone();
        bad[0] = 9;
        let err = Page::<i32, i64>::decode(&layout, &bad).unwrap_err();
        assert!(err.to_string().contains("entry count"));

        // Child pointer that is neither null nor an offset.
        let mut bad = image;
        bad[4..12].copy_from_slice(&(-7i64).to_le_bytes());
        let err = Page::<i32, i64>::decode(&layout, &bad).unwrap_err();
        assert!(err.to_string().contains("child pointer"));
    }
}
