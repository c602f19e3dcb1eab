//! # treefile - File-Backed Ordered Indexes
//!
//! treefile is an embeddable library providing ordered key-value indexing
//! over a single random-access file, with a generic binary serialization
//! layer underneath. Two tree flavors share one engine:
//!
//! - [`BTree`]: classic B-tree; entries live in every page, point lookups
//!   may terminate at an internal page.
//! - [`BPlusTree`]: B+tree; all entries live in leaf pages, which are
//!   forward-chained for sequential range scans.
//!
//! ## Quick Start
//!
//! ```ignore
//! use treefile::BPlusTree;
//!
//! let mut tree: BPlusTree<i64, i64> = BPlusTree::open("./index.db", 8)?;
//! tree.insert(42, 4200)?;
//! assert_eq!(tree.search(&42)?, Some(4200));
//! let hits = tree.range_search(&10, &100)?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │   Public API (BTree / BPlusTree)    │
//! ├─────────────────────────────────────┤
//! │   Tree Engine (descent, split,      │
//! │   borrow/merge, range scans)        │
//! ├─────────────────────────────────────┤
//! │   Page (fixed-capacity node image)  │
//! ├─────────────────────────────────────┤
//! │   FilePageStore (header + page I/O) │
//! ├─────────────────────────────────────┤
//! │   Record / byte-cursor serialization│
//! └─────────────────────────────────────┘
//! ```
//!
//! ## File Layout
//!
//! One file per tree: an 8-byte root-pointer header followed by fixed-size
//! page images. New pages append at end-of-file; existing pages overwrite in
//! place. See [`tree::store`] for the exact format.
//!
//! ## Key and Value Types
//!
//! Keys and values are caller-supplied types implementing [`Record`]: a
//! declared maximum encoded size plus encode/decode against the byte
//! cursors. Fixed-width primitives implement it out of the box;
//! [`BoundedString`] covers capped-length text. Keys additionally need
//! `Ord + Clone`, values `Clone`.
//!
//! ## Concurrency
//!
//! None. A tree owns its file handle exclusively; operations are
//! synchronous and run to completion. Callers needing concurrent access
//! must serialize externally.
//!
//! ## Module Overview
//!
//! - [`encoding`]: byte cursors and the [`Record`] serialization contract
//! - [`tree`]: page layout, file store, and the tree engine

pub mod encoding;
pub mod tree;

pub use encoding::{BoundedString, ByteReader, ByteWriter, Record};
pub use tree::{
    BPlusTree, BTree, DropChild, LeafChained, Page, PageAddress, Plain, Tree, TreeStats, Variant,
};
