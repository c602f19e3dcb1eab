//! # Tree Module
//!
//! File-backed B-tree and B+tree engine.
//!
//! ## Components
//!
//! - [`page`]: one node's in-memory form and its fixed-size binary image
//! - [`store`]: the page file — root-pointer header plus page slab
//! - [`engine`]: descent, insertion with split propagation, deletion with
//!   borrow/merge, point and range search
//! - [`debug`]: diagnostic printers and the structural verifier
//!
//! ## Variants
//!
//! One engine serves both tree flavors; the [`Variant`] marker selects the
//! behavioral delta at compile time instead of through virtual dispatch:
//!
//! - [`Plain`] ([`BTree`]): entries may live in internal pages; point
//!   lookups stop at the first match; range scans recurse through every
//!   intersecting subtree; deleting from an internal page swaps with the
//!   in-order predecessor first.
//! - [`LeafChained`] ([`BPlusTree`]): all entries live in leaf pages, which
//!   carry a forward `next_leaf` pointer. Leaf splits copy a separator key
//!   up (routing only); range scans descend once and walk the chain.
//!
//! Internal pages of the chained variant behave exactly like the plain
//! B-tree — the delta is confined to leaf level.

pub mod debug;
pub mod engine;
pub mod page;
pub mod store;

pub use debug::TreeStats;
pub use engine::Tree;
pub use page::{DropChild, Page, PageAddress};

/// Compile-time selector for the tree flavor.
pub trait Variant {
    /// True when leaves carry a forward chain pointer and keep all data.
    const LEAF_CHAINED: bool;
}

/// Marker for the classic B-tree.
pub enum Plain {}

/// Marker for the leaf-chained B+tree.
pub enum LeafChained {}

impl Variant for Plain {
    const LEAF_CHAINED: bool = false;
}

impl Variant for LeafChained {
    const LEAF_CHAINED: bool = true;
}

/// Classic B-tree over a single file.
pub type BTree<K, V> = Tree<K, V, Plain>;

/// B+tree over a single file, with chained leaves for sequential scans.
pub type BPlusTree<K, V> = Tree<K, V, LeafChained>;
