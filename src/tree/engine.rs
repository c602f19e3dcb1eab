//! # Tree Engine
//!
//! Descent, insertion with split propagation, deletion with borrow/merge
//! rebalancing, and the search family. One generic [`Tree`] serves both
//! flavors; the [`Variant`] parameter picks the leaf-level behavior at
//! compile time.
//!
//! ## Descent Path
//!
//! Every mutating operation first walks root-to-target, recording
//! `(address, index in parent)` per visited page in a [`SmallVec`]. Split
//! propagation and rebalancing then replay that path bottom-up instead of
//! re-searching. The inline capacity covers any realistic depth without
//! allocating.
//!
//! ## Insertion
//!
//! New entries always land in a leaf. A full page splits its upper half
//! into a fresh sibling appended at end-of-file, the pending entry goes
//! into whichever half its key orders into, and one separator entry is
//! promoted into the parent:
//!
//! - plain pages move the surplus entry up (left half's last entry when the
//!   insert went left, otherwise the right half's first);
//! - chained leaves copy the left half's maximum up and keep the entry,
//!   then relink the forward chain through the new sibling.
//!
//! A full parent splits the same way, up to a new root when needed.
//!
//! ## Deletion
//!
//! The first matching entry is removed. A hit in an internal page (plain
//! variant only) is first swapped with its in-order predecessor so the
//! removal always happens at a leaf. A page left less than half full then
//! borrows an entry through the parent from a sibling that is more than
//! half full, or failing that merges with a sibling, pulling the separator
//! down; merges can cascade and ultimately shrink the tree by one level.
//!
//! Deleting a chained leaf's maximum leaves its routing separator stale:
//! duplicates of that key may survive in the next leaf. Point search and
//! delete therefore continue into the in-order successor leaf before
//! reporting a key absent.

use std::marker::PhantomData;
use std::mem;
use std::path::Path;

use eyre::{bail, Result};
use smallvec::SmallVec;
use tracing::{debug, trace};

use crate::encoding::Record;

use super::page::{DropChild, Page, PageAddress, PageLayout};
use super::store::FilePageStore;
use super::Variant;

/// Inline capacity of the descent path. Depth 8 covers billions of entries
/// at any sane order; deeper trees spill to the heap and keep working.
pub(crate) const MAX_TREE_DEPTH: usize = 8;

/// Root-to-target trail: one `(page address, index in parent)` per level.
/// The root's index slot is unused and recorded as zero.
type DescentPath = SmallVec<[(PageAddress, usize); MAX_TREE_DEPTH]>;

/// File-backed tree of order `m`: up to `m - 1` entries and `m` children
/// per page. `X` selects the [`Plain`](super::Plain) or
/// [`LeafChained`](super::LeafChained) flavor.
pub struct Tree<K, V, X> {
    pub(crate) store: FilePageStore,
    pub(crate) order: usize,
    marker: PhantomData<fn() -> (K, V, X)>,
}

pub(crate) fn required_child<K, V>(page: &Page<K, V>, index: usize) -> Result<PageAddress>
where
    K: Record + Ord + Clone,
    V: Record + Clone,
{
    match page.children[index] {
        Some(addr) => Ok(addr),
        None => bail!(
            "corrupt page {:?}: internal page is missing child {}",
            page.address(),
            index
        ),
    }
}

impl<K, V, X> Tree<K, V, X>
where
    K: Record + Ord + Clone,
    V: Record + Clone,
    X: Variant,
{
    /// Opens a tree file, creating it empty if it does not exist. `order`
    /// must be at least 3 and must match the order the file was created
    /// with.
    pub fn open(path: impl AsRef<Path>, order: usize) -> Result<Self> {
        let layout = PageLayout::new::<K, V>(order, X::LEAF_CHAINED);
        let store = FilePageStore::open_or_create(path.as_ref(), layout)?;
        Ok(Self {
            store,
            order,
            marker: PhantomData,
        })
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn is_empty(&mut self) -> Result<bool> {
        Ok(self.store.read_root_address()?.is_none())
    }

    /// Flushes all written pages to stable storage.
    pub fn sync(&mut self) -> Result<()> {
        self.store.sync()
    }

    /// Inserts one entry. Duplicate keys are allowed and kept.
    pub fn insert(&mut self, key: K, value: V) -> Result<()> {
        let Some(root) = self.store.read_root_address()? else {
            let mut page = Page::new(self.order);
            let inserted = page.insert_at(0, key, value, None);
            debug_assert!(inserted);
            let addr = self.store.store(&mut page)?;
            self.store.write_root_address(Some(addr))?;
            return Ok(());
        };

        let (mut path, mut leaf) = self.descend(root, &key, true)?;
        if !leaf.is_full() {
            let idx = leaf.lower_bound(&key);
            let inserted = leaf.insert_at(idx, key, value, None);
            debug_assert!(inserted);
            self.store.store(&mut leaf)?;
            return Ok(());
        }
        self.split_insert(&mut path, leaf, key, value, None)
    }

    /// Looks up the first entry matching `key`. `Ok(None)` when absent.
    pub fn search(&mut self, key: &K) -> Result<Option<V>> {
        let Some(root) = self.store.read_root_address()? else {
            return Ok(None);
        };
        let (_, mut page) = self.descend(root, key, X::LEAF_CHAINED)?;
        let mut idx = page.lower_bound(key);
        if X::LEAF_CHAINED && idx == page.len() {
            // A stale separator routes the descent one leaf short of any
            // surviving duplicates; the match, if any, starts the next leaf.
            if let Some(next) = page.next_leaf() {
                page = self.store.load(next)?;
                idx = 0;
            }
        }
        if idx < page.len() && page.keys()[idx] == *key {
            Ok(Some(page.values()[idx].clone()))
        } else {
            Ok(None)
        }
    }

    /// Collects every value stored under `key`, in insertion-independent
    /// sorted position order.
    pub fn search_all(&mut self, key: &K) -> Result<Vec<V>> {
        let mut out = Vec::new();
        let Some(root) = self.store.read_root_address()? else {
            return Ok(out);
        };
        if X::LEAF_CHAINED {
            let (_, mut page) = self.descend(root, key, true)?;
            let mut idx = page.lower_bound(key);
            loop {
                while idx < page.len() && page.keys()[idx] == *key {
                    out.push(page.values()[idx].clone());
                    idx += 1;
                }
                if idx < page.len() {
                    break;
                }
                match page.next_leaf() {
                    Some(next) => {
                        page = self.store.load(next)?;
                        idx = 0;
                    }
                    None => break,
                }
            }
        } else {
            self.collect_matches(root, key, &mut out)?;
        }
        Ok(out)
    }

    /// Collects every entry with `low <= key <= high`, in ascending key
    /// order. An inverted range yields nothing.
    pub fn range_search(&mut self, low: &K, high: &K) -> Result<Vec<(K, V)>> {
        let mut out = Vec::new();
        if low > high {
            return Ok(out);
        }
        let Some(root) = self.store.read_root_address()? else {
            return Ok(out);
        };
        if X::LEAF_CHAINED {
            let (_, mut page) = self.descend(root, low, true)?;
            let mut idx = page.lower_bound(low);
            'chain: loop {
                while idx < page.len() {
                    if page.keys()[idx] > *high {
                        break 'chain;
                    }
                    out.push((page.keys()[idx].clone(), page.values()[idx].clone()));
                    idx += 1;
                }
                match page.next_leaf() {
                    Some(next) => {
                        page = self.store.load(next)?;
                        idx = 0;
                    }
                    None => break,
                }
            }
        } else {
            self.collect_range(root, low, high, &mut out)?;
        }
        Ok(out)
    }

    /// Collects every entry in ascending key order. The chained flavor
    /// walks the leaf chain; the plain flavor traverses in order.
    pub fn scan_all(&mut self) -> Result<Vec<(K, V)>> {
        let mut out = Vec::new();
        let Some(root) = self.store.read_root_address()? else {
            return Ok(out);
        };
        if X::LEAF_CHAINED {
            let mut page: Page<K, V> = self.store.load(root)?;
            while !page.is_leaf() {
                page = self.store.load(required_child(&page, 0)?)?;
            }
            loop {
                for i in 0..page.len() {
                    out.push((page.keys()[i].clone(), page.values()[i].clone()));
                }
                match page.next_leaf() {
                    Some(next) => page = self.store.load(next)?,
                    None => break,
                }
            }
        } else {
            self.collect_subtree(root, &mut out)?;
        }
        Ok(out)
    }

    /// Removes the first entry matching `key` and returns its value.
    /// `Ok(None)` when absent.
    pub fn delete(&mut self, key: &K) -> Result<Option<V>> {
        let Some(root) = self.store.read_root_address()? else {
            return Ok(None);
        };
        let (mut path, mut page) = self.descend(root, key, X::LEAF_CHAINED)?;
        let mut idx = page.lower_bound(key);
        if X::LEAF_CHAINED && idx == page.len() {
            // Stale separator: any match starts the in-order successor
            // leaf, and rebalancing needs that leaf's own path.
            match self.successor_leaf(&mut path)? {
                Some(successor) => {
                    page = successor;
                    idx = 0;
                }
                None => return Ok(None),
            }
        }
        if idx >= page.len() || page.keys()[idx] != *key {
            return Ok(None);
        }

        if page.is_leaf() {
            let Some((_, value, _)) = page.remove_at(idx, DropChild::Right) else {
                return Ok(None);
            };
            self.store.store(&mut page)?;
            self.rebalance(path)?;
            return Ok(Some(value));
        }

        // Internal hit (plain flavor): swap with the in-order predecessor,
        // the rightmost entry of the subtree left of the key, so the
        // removal happens at a leaf.
        let removed = page.values()[idx].clone();
        let mut child_addr = required_child(&page, idx)?;
        let mut child_index = idx;
        loop {
            let mut child: Page<K, V> = self.store.load(child_addr)?;
            path.push((child_addr, child_index));
            if child.is_leaf() {
                if child.is_empty() {
                    bail!("corrupt page {}: empty leaf on predecessor walk", child_addr);
                }
                let last = child.len() - 1;
                let Some((pred_key, pred_value, _)) = child.remove_at(last, DropChild::Right)
                else {
                    bail!("corrupt page {}: empty leaf on predecessor walk", child_addr);
                };
                page.keys[idx] = pred_key;
                page.values[idx] = pred_value;
                self.store.store(&mut page)?;
                self.store.store(&mut child)?;
                self.rebalance(path)?;
                return Ok(Some(removed));
            }
            child_index = child.len();
            child_addr = required_child(&child, child_index)?;
        }
    }

    /// Walks root-to-target for `key`, recording the path. Stops at the
    /// first internal match unless `to_leaf` forces a full descent.
    fn descend(
        &mut self,
        root: PageAddress,
        key: &K,
        to_leaf: bool,
    ) -> Result<(DescentPath, Page<K, V>)> {
        let mut path = DescentPath::new();
        let mut addr = root;
        let mut index_in_parent = 0;
        loop {
            let page: Page<K, V> = self.store.load(addr)?;
            path.push((addr, index_in_parent));
            if page.is_leaf() {
                return Ok((path, page));
            }
            let idx = page.lower_bound(key);
            if !to_leaf && idx < page.len() && page.keys()[idx] == *key {
                return Ok((path, page));
            }
            addr = required_child(&page, idx)?;
            index_in_parent = idx;
        }
    }

    /// Retargets `path` from the leaf it currently ends at to that leaf's
    /// in-order successor, reloading ancestors as needed. `Ok(None)` when
    /// the leaf is the rightmost in the tree.
    fn successor_leaf(&mut self, path: &mut DescentPath) -> Result<Option<Page<K, V>>> {
        loop {
            let Some((_, index_in_parent)) = path.pop() else {
                return Ok(None);
            };
            let Some(&(parent_addr, _)) = path.last() else {
                return Ok(None);
            };
            let parent: Page<K, V> = self.store.load(parent_addr)?;
            if index_in_parent < parent.len() {
                // Leftmost descent from the next sibling over.
                let mut idx = index_in_parent + 1;
                let mut addr = required_child(&parent, idx)?;
                loop {
                    let page: Page<K, V> = self.store.load(addr)?;
                    path.push((addr, idx));
                    if page.is_leaf() {
                        return Ok(Some(page));
                    }
                    idx = 0;
                    addr = required_child(&page, 0)?;
                }
            }
        }
    }

    /// Splits the full `page`, places the pending entry, and promotes one
    /// separator upward, splitting full ancestors as needed.
    fn split_insert(
        &mut self,
        path: &mut DescentPath,
        mut page: Page<K, V>,
        mut key: K,
        mut value: V,
        mut right_child: Option<PageAddress>,
    ) -> Result<()> {
        loop {
            let Some((page_addr, index_in_parent)) = path.pop() else {
                bail!("split of a page that is not on the descent path");
            };

            let mut sibling = Page::new(self.order);
            page.split_high_into(&mut sibling);
            let sibling_addr = self.store.reserve(&mut sibling);
            let splitting_leaf = page.is_leaf();
            let into_left = key <= sibling.keys()[0];

            let (promoted_key, promoted_value) = if X::LEAF_CHAINED && splitting_leaf {
                if into_left {
                    let idx = page.lower_bound(&key);
                    let inserted = page.insert_at(idx, key, value, None);
                    debug_assert!(inserted);
                } else {
                    let idx = sibling.lower_bound(&key);
                    let inserted = sibling.insert_at(idx, key, value, None);
                    debug_assert!(inserted);
                }
                sibling.next_leaf = page.next_leaf;
                page.next_leaf = Some(sibling_addr);
                // Copy the left half's maximum up as a routing separator;
                // the entry itself stays in the leaf.
                let last = page.len() - 1;
                (page.keys()[last].clone(), page.values()[last].clone())
            } else if into_left {
                let idx = page.lower_bound(&key);
                let inserted = page.insert_at(idx, key, value, right_child);
                debug_assert!(inserted);
                // The left half's surplus last entry moves up; its right
                // child becomes the sibling's leftmost.
                let last = page.len() - 1;
                let Some((surplus_key, surplus_value, carried)) =
                    page.remove_at(last, DropChild::Right)
                else {
                    bail!("split left half is unexpectedly empty");
                };
                sibling.children[0] = carried;
                (surplus_key, surplus_value)
            } else {
                let idx = sibling.lower_bound(&key);
                let inserted = sibling.insert_at(idx, key, value, right_child);
                debug_assert!(inserted);
                // The right half's first entry moves up, taking the open
                // leftmost child slot with it.
                let Some((surplus_key, surplus_value, _)) = sibling.remove_at(0, DropChild::Left)
                else {
                    bail!("split right half is unexpectedly empty");
                };
                (surplus_key, surplus_value)
            };

            self.store.store(&mut page)?;
            self.store.store(&mut sibling)?;
            trace!(left = %page_addr, right = %sibling_addr, "split page");

            let Some(&(parent_addr, _)) = path.last() else {
                // The root itself split; grow a new one above both halves.
                let mut root = Page::new(self.order);
                root.children[0] = Some(page_addr);
                let inserted =
                    root.insert_at(0, promoted_key, promoted_value, Some(sibling_addr));
                debug_assert!(inserted);
                let new_root = self.store.store(&mut root)?;
                self.store.write_root_address(Some(new_root))?;
                debug!(root = %new_root, "tree grew one level");
                return Ok(());
            };

            let mut parent: Page<K, V> = self.store.load(parent_addr)?;
            if !parent.is_full() {
                let inserted = parent.insert_at(
                    index_in_parent,
                    promoted_key,
                    promoted_value,
                    Some(sibling_addr),
                );
                debug_assert!(inserted);
                self.store.store(&mut parent)?;
                return Ok(());
            }

            // Full parent: promote into it by splitting one level up.
            page = parent;
            key = promoted_key;
            value = promoted_value;
            right_child = Some(sibling_addr);
        }
    }

    /// Restores minimum occupancy bottom-up after a removal. A page less
    /// than half full borrows through the parent or merges with a sibling;
    /// an emptied root hands the tree over to its single child.
    fn rebalance(&mut self, mut path: DescentPath) -> Result<()> {
        let min_fill = (self.order - 1) / 2;
        while let Some((addr, index_in_parent)) = path.pop() {
            let mut page: Page<K, V> = self.store.load(addr)?;

            let Some(&(parent_addr, _)) = path.last() else {
                if page.is_empty() {
                    if page.is_leaf() {
                        self.store.write_root_address(None)?;
                        debug!("tree is now empty");
                    } else {
                        let only = required_child(&page, 0)?;
                        self.store.write_root_address(Some(only))?;
                        debug!(root = %only, "tree shrank one level");
                    }
                }
                return Ok(());
            };

            if page.len() >= min_fill {
                return Ok(());
            }

            let mut parent: Page<K, V> = self.store.load(parent_addr)?;
            if self.borrow_into(&mut parent, &mut page, index_in_parent, min_fill)? {
                return Ok(());
            }
            self.merge_with_sibling(&mut parent, page, index_in_parent)?;
            self.store.store(&mut parent)?;
        }
        Ok(())
    }

    /// Moves one entry into the underfull `page` from a sibling that is
    /// more than half full, rotating through the parent separator. Returns
    /// false when neither sibling can lend.
    fn borrow_into(
        &mut self,
        parent: &mut Page<K, V>,
        page: &mut Page<K, V>,
        index_in_parent: usize,
        min_fill: usize,
    ) -> Result<bool> {
        let chained_leaf = X::LEAF_CHAINED && page.is_leaf();

        if index_in_parent > 0 {
            let left_addr = required_child(parent, index_in_parent - 1)?;
            let mut left: Page<K, V> = self.store.load(left_addr)?;
            if left.len() > min_fill {
                let separator = index_in_parent - 1;
                let last = left.len() - 1;
                let Some((lent_key, lent_value, carried)) = left.remove_at(last, DropChild::Right)
                else {
                    bail!("corrupt page {}: empty lender", left_addr);
                };
                if chained_leaf {
                    // Leaf entries move directly; the separator is only
                    // rewritten to track the lender's new maximum.
                    page.insert_front(lent_key, lent_value, None);
                    parent.keys[separator] = left.keys()[left.len() - 1].clone();
                    parent.values[separator] = left.values()[left.len() - 1].clone();
                } else {
                    let sep_key = mem::replace(&mut parent.keys[separator], lent_key);
                    let sep_value = mem::replace(&mut parent.values[separator], lent_value);
                    page.insert_front(sep_key, sep_value, carried);
                }
                trace!(from = %left_addr, "borrowed entry from left sibling");
                self.store.store(&mut left)?;
                self.store.store(page)?;
                self.store.store(parent)?;
                return Ok(true);
            }
        }

        if index_in_parent < parent.len() {
            let right_addr = required_child(parent, index_in_parent + 1)?;
            let mut right: Page<K, V> = self.store.load(right_addr)?;
            if right.len() > min_fill {
                let Some((lent_key, lent_value, carried)) = right.remove_at(0, DropChild::Left)
                else {
                    bail!("corrupt page {}: empty lender", right_addr);
                };
                if chained_leaf {
                    page.push_entry(lent_key.clone(), lent_value.clone(), None);
                    parent.keys[index_in_parent] = lent_key;
                    parent.values[index_in_parent] = lent_value;
                } else {
                    let sep_key = mem::replace(&mut parent.keys[index_in_parent], lent_key);
                    let sep_value = mem::replace(&mut parent.values[index_in_parent], lent_value);
                    page.push_entry(sep_key, sep_value, carried);
                }
                trace!(from = %right_addr, "borrowed entry from right sibling");
                self.store.store(&mut right)?;
                self.store.store(page)?;
                self.store.store(parent)?;
                return Ok(true);
            }
        }

        Ok(false)
    }

    /// Folds the underfull `page` together with a sibling, pulling the
    /// separator out of the parent. Prefers absorbing the right sibling;
    /// the rightmost child folds into its left sibling instead.
    fn merge_with_sibling(
        &mut self,
        parent: &mut Page<K, V>,
        mut page: Page<K, V>,
        index_in_parent: usize,
    ) -> Result<()> {
        let chained_leaf = X::LEAF_CHAINED && page.is_leaf();

        if index_in_parent < parent.len() {
            let right_addr = required_child(parent, index_in_parent + 1)?;
            let right: Page<K, V> = self.store.load(right_addr)?;
            let Some((sep_key, sep_value, _)) = parent.remove_at(index_in_parent, DropChild::Right)
            else {
                bail!("corrupt page {:?}: no separator to merge on", parent.address());
            };
            if chained_leaf {
                // The separator is a routing copy of a leaf entry, so it
                // is discarded rather than pulled down.
                page.next_leaf = right.next_leaf;
            }
            let separator = (!chained_leaf).then_some((sep_key, sep_value));
            trace!(from = %right_addr, "merged right sibling");
            page.absorb(right, separator);
            self.store.store(&mut page)?;
        } else {
            let left_addr = required_child(parent, index_in_parent - 1)?;
            let mut left: Page<K, V> = self.store.load(left_addr)?;
            let Some((sep_key, sep_value, _)) =
                parent.remove_at(index_in_parent - 1, DropChild::Right)
            else {
                bail!("corrupt page {:?}: no separator to merge on", parent.address());
            };
            if chained_leaf {
                left.next_leaf = page.next_leaf;
            }
            let separator = (!chained_leaf).then_some((sep_key, sep_value));
            trace!(into = %left_addr, "merged into left sibling");
            left.absorb(page, separator);
            self.store.store(&mut left)?;
        }
        Ok(())
    }

    fn collect_matches(&mut self, addr: PageAddress, key: &K, out: &mut Vec<V>) -> Result<()> {
        let page: Page<K, V> = self.store.load(addr)?;
        let lo = page.lower_bound(key);
        let hi = page.upper_bound(key);
        if page.is_leaf() {
            for i in lo..hi {
                out.push(page.values()[i].clone());
            }
            return Ok(());
        }
        for i in lo..hi {
            self.collect_matches(required_child(&page, i)?, key, out)?;
            out.push(page.values()[i].clone());
        }
        self.collect_matches(required_child(&page, hi)?, key, out)
    }

    fn collect_range(
        &mut self,
        addr: PageAddress,
        low: &K,
        high: &K,
        out: &mut Vec<(K, V)>,
    ) -> Result<()> {
        let page: Page<K, V> = self.store.load(addr)?;
        let lo = page.lower_bound(low);
        let hi = page.upper_bound(high);
        if page.is_leaf() {
            for i in lo..hi {
                out.push((page.keys()[i].clone(), page.values()[i].clone()));
            }
            return Ok(());
        }
        for i in lo..hi {
            self.collect_range(required_child(&page, i)?, low, high, out)?;
            out.push((page.keys()[i].clone(), page.values()[i].clone()));
        }
        self.collect_range(required_child(&page, hi)?, low, high, out)
    }

    fn collect_subtree(&mut self, addr: PageAddress, out: &mut Vec<(K, V)>) -> Result<()> {
        let page: Page<K, V> = self.store.load(addr)?;
        if page.is_leaf() {
            for i in 0..page.len() {
                out.push((page.keys()[i].clone(), page.values()[i].clone()));
            }
            return Ok(());
        }
        for i in 0..page.len() {
            self.collect_subtree(required_child(&page, i)?, out)?;
            out.push((page.keys()[i].clone(), page.values()[i].clone()));
        }
        self.collect_subtree(required_child(&page, page.len())?, out)
    }
}

impl<K, V, X> std::fmt::Debug for Tree<K, V, X> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tree")
            .field("order", &self.order)
            .field("store", &self.store)
            .finish()
    }
}
