//! # Diagnostics
//!
//! Structural inspection of a tree file: [`Tree::dump`] renders the page
//! graph as indented text and [`Tree::verify`] re-walks every page and
//! checks the invariants the engine is supposed to maintain:
//!
//! - keys sorted within each page, and bounded by the parent separators
//! - every internal page has one more child than keys
//! - no page above capacity, no non-root page below half occupancy
//! - all leaves at the same depth
//! - for the chained flavor, the leaf chain visits exactly the leaves of
//!   the in-order traversal, left to right, and ends with a null pointer
//!
//! Both walk the file read-only. `verify` is the backbone of the test
//! suite: the integration tests call it after every mutation batch.

use std::fmt::Display;

use eyre::{ensure, Result};

use crate::encoding::Record;

use super::engine::required_child;
use super::page::PageAddress;
use super::{Page, Tree, Variant};

/// Summary returned by a successful [`Tree::verify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeStats {
    /// Number of levels, root included. Zero for an empty tree.
    pub depth: usize,
    /// Pages reachable from the root.
    pub page_count: u64,
    /// Data entries stored. Routing copies in the chained flavor's
    /// internal pages are not counted.
    pub entry_count: u64,
}

struct VerifyState {
    min_fill: usize,
    leaf_depth: Option<usize>,
    /// Leaves in in-order (left to right) position, with their forward
    /// pointers, for the chain check.
    leaves: Vec<(PageAddress, Option<PageAddress>)>,
    stats: TreeStats,
}

impl<K, V, X> Tree<K, V, X>
where
    K: Record + Ord + Clone,
    V: Record + Clone,
    X: Variant,
{
    /// Checks every structural invariant and returns tree-wide counts.
    pub fn verify(&mut self) -> Result<TreeStats> {
        let Some(root) = self.store.read_root_address()? else {
            return Ok(TreeStats {
                depth: 0,
                page_count: 0,
                entry_count: 0,
            });
        };

        let mut state = VerifyState {
            min_fill: (self.order - 1) / 2,
            leaf_depth: None,
            leaves: Vec::new(),
            stats: TreeStats {
                depth: 0,
                page_count: 0,
                entry_count: 0,
            },
        };
        self.verify_page(root, 1, None, None, true, &mut state)?;
        state.stats.depth = state.leaf_depth.unwrap_or(0);

        if X::LEAF_CHAINED {
            for window in state.leaves.windows(2) {
                let (addr, next) = window[0];
                let (successor, _) = window[1];
                ensure!(
                    next == Some(successor),
                    "leaf {} links to {:?}, expected its in-order successor {}",
                    addr,
                    next,
                    successor
                );
            }
            if let Some(&(last, next)) = state.leaves.last() {
                ensure!(
                    next.is_none(),
                    "rightmost leaf {} links to {:?}, expected end of chain",
                    last,
                    next
                );
            }
        }

        Ok(state.stats)
    }

    fn verify_page(
        &mut self,
        addr: PageAddress,
        depth: usize,
        low: Option<K>,
        high: Option<K>,
        is_root: bool,
        state: &mut VerifyState,
    ) -> Result<()> {
        let page: Page<K, V> = self.store.load(addr)?;
        state.stats.page_count += 1;
        if page.is_leaf() || !X::LEAF_CHAINED {
            state.stats.entry_count += page.len() as u64;
        }

        ensure!(
            page.children.len() == page.len() + 1,
            "page {} has {} children for {} keys",
            addr,
            page.children.len(),
            page.len()
        );
        ensure!(
            page.len() <= page.max_keys(),
            "page {} holds {} entries, capacity is {}",
            addr,
            page.len(),
            page.max_keys()
        );
        if is_root {
            ensure!(
                page.is_leaf() || !page.is_empty(),
                "internal root {} has no keys",
                addr
            );
        } else {
            ensure!(
                page.len() >= state.min_fill,
                "page {} is underfull: {} entries, minimum is {}",
                addr,
                page.len(),
                state.min_fill
            );
        }

        for pair in page.keys().windows(2) {
            ensure!(pair[0] <= pair[1], "page {} keys are out of order", addr);
        }
        if let (Some(bound), Some(first)) = (&low, page.keys().first()) {
            ensure!(first >= bound, "page {} violates its lower separator", addr);
        }
        if let (Some(bound), Some(last)) = (&high, page.keys().last()) {
            ensure!(last <= bound, "page {} violates its upper separator", addr);
        }

        if page.is_leaf() {
            match state.leaf_depth {
                None => state.leaf_depth = Some(depth),
                Some(expected) => ensure!(
                    depth == expected,
                    "leaf {} at depth {}, other leaves at {}",
                    addr,
                    depth,
                    expected
                ),
            }
            state.leaves.push((addr, page.next_leaf()));
            return Ok(());
        }

        for i in 0..=page.len() {
            let child = required_child(&page, i)?;
            let child_low = if i == 0 {
                low.clone()
            } else {
                Some(page.keys()[i - 1].clone())
            };
            let child_high = if i == page.len() {
                high.clone()
            } else {
                Some(page.keys()[i].clone())
            };
            self.verify_page(child, depth + 1, child_low, child_high, false, state)?;
        }
        Ok(())
    }
}

impl<K, V, X> Tree<K, V, X>
where
    K: Record + Ord + Clone + Display,
    V: Record + Clone + Display,
    X: Variant,
{
    /// Renders the page graph as indented text, one page per line,
    /// pre-order. Chained leaves show their forward pointer.
    pub fn dump(&mut self) -> Result<String> {
        let mut out = String::new();
        if let Some(root) = self.store.read_root_address()? {
            self.dump_page(root, 0, &mut out)?;
        }
        Ok(out)
    }

    fn dump_page(&mut self, addr: PageAddress, depth: usize, out: &mut String) -> Result<()> {
        let page: Page<K, V> = self.store.load(addr)?;

        out.push_str(&"  ".repeat(depth));
        out.push_str(&format!("{addr}:"));
        for i in 0..page.len() {
            out.push_str(&format!(" {}={}", page.keys()[i], page.values()[i]));
        }
        if page.is_leaf() && X::LEAF_CHAINED {
            match page.next_leaf() {
                Some(next) => out.push_str(&format!(" -> {next}")),
                None => out.push_str(" -> end"),
            }
        }
        out.push('\n');

        if !page.is_leaf() {
            for i in 0..=page.len() {
                self.dump_page(required_child(&page, i)?, depth + 1, out)?;
            }
        }
        Ok(())
    }
}
