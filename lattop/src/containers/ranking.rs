//! Records ordered by cumulative latency.
//!
//! Cumulative latency is a coarse key: many call paths converge on the
//! same total. Each entry therefore also carries an insertion sequence
//! number, so equal totals coexist, and a back-reference to its record so
//! the entry belonging to one specific record can be told apart from its
//! ties.
//!
//! An entry's key is never changed in place. When a record's total moves,
//! its entry is removed and a new one inserted at the new value.
//!
//! The tree is a treap over a node arena reserved at construction. Node
//! priorities are a scrambled insertion sequence, which keeps the expected
//! depth logarithmic without a random source.

use std::cmp::Ordering;

use super::{next_slot, reserve_slots};
use crate::domain::{AllocError, AllocSite};
use crate::model::{RankEntry, RecordId};

/// Position of an entry in the tree: (cumulative latency, insertion order).
type Slot = (u64, u64);

type Link = Option<u32>;

#[derive(Debug)]
struct Node {
    total: u64,
    seq: u64,
    record: RecordId,
    priority: u64,
    left: Link,
    right: Link,
}

impl Node {
    fn slot(&self) -> Slot {
        (self.total, self.seq)
    }

    fn entry(&self) -> RankEntry {
        RankEntry { total: self.total, record: self.record, seq: self.seq }
    }
}

/// splitmix64 finalizer.
fn priority(seq: u64) -> u64 {
    let mut z = seq.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

#[derive(Debug)]
pub struct RankingTree {
    nodes: Vec<Node>,
    free: Vec<u32>,
    root: Link,
    capacity: usize,
    len: usize,
    next_seq: u64,
}

impl RankingTree {
    /// Reserve room for `capacity` entries up front.
    ///
    /// # Errors
    /// Returns `AllocError` if the node arena cannot be reserved.
    pub fn new(capacity: usize) -> Result<Self, AllocError> {
        Ok(Self {
            nodes: reserve_slots(capacity, AllocSite::RankEntry)?,
            free: reserve_slots(capacity, AllocSite::RankEntry)?,
            root: None,
            capacity,
            len: 0,
            next_seq: 0,
        })
    }

    fn node(&self, i: u32) -> &Node {
        &self.nodes[i as usize]
    }

    fn node_mut(&mut self, i: u32) -> &mut Node {
        &mut self.nodes[i as usize]
    }

    /// Link a new entry for `record` keyed by `total`.
    ///
    /// # Errors
    /// Returns `AllocError` once every reserved node is in use.
    pub fn insert(&mut self, record: RecordId, total: u64) -> Result<RankEntry, AllocError> {
        let seq = self.next_seq;
        let node = Node { total, seq, record, priority: priority(seq), left: None, right: None };
        let i = match self.free.pop() {
            Some(i) => {
                self.nodes[i as usize] = node;
                i
            }
            None => {
                let i = next_slot(self.nodes.len(), self.capacity, AllocSite::RankEntry)?;
                self.nodes.push(node);
                i
            }
        };
        self.next_seq += 1;
        self.len += 1;
        self.root = Some(self.insert_at(self.root, i));
        Ok(RankEntry { total, record, seq })
    }

    fn insert_at(&mut self, link: Link, i: u32) -> u32 {
        let Some(n) = link else {
            return i;
        };
        if self.node(i).slot() < self.node(n).slot() {
            let left = self.insert_at(self.node(n).left, i);
            self.node_mut(n).left = Some(left);
            if self.node(left).priority > self.node(n).priority {
                return self.rotate_right(n);
            }
        } else {
            let right = self.insert_at(self.node(n).right, i);
            self.node_mut(n).right = Some(right);
            if self.node(right).priority > self.node(n).priority {
                return self.rotate_left(n);
            }
        }
        n
    }

    fn rotate_right(&mut self, n: u32) -> u32 {
        let Some(l) = self.node(n).left else {
            return n;
        };
        self.node_mut(n).left = self.node(l).right;
        self.node_mut(l).right = Some(n);
        l
    }

    fn rotate_left(&mut self, n: u32) -> u32 {
        let Some(r) = self.node(n).right else {
            return n;
        };
        self.node_mut(n).right = self.node(r).left;
        self.node_mut(r).left = Some(n);
        r
    }

    /// Locate the entry that references `record`, keyed by `total`.
    ///
    /// Descends to the run of equal totals and searches it for the entry
    /// whose back-reference is `record`. Returns `None` if no entry with that
    /// total references `record`.
    #[must_use]
    pub fn find_entry_for(&self, record: RecordId, total: u64) -> Option<RankEntry> {
        self.find_in(self.root, record, total).map(|i| self.node(i).entry())
    }

    fn find_in(&self, link: Link, record: RecordId, total: u64) -> Option<u32> {
        let n = link?;
        let node = self.node(n);
        match total.cmp(&node.total) {
            Ordering::Less => self.find_in(node.left, record, total),
            Ordering::Greater => self.find_in(node.right, record, total),
            // Ties may sit on either side
            Ordering::Equal if node.record == record => Some(n),
            Ordering::Equal => self
                .find_in(node.left, record, total)
                .or_else(|| self.find_in(node.right, record, total)),
        }
    }

    /// Unlink `entry`. Returns `false` if it was not in the tree.
    pub fn remove(&mut self, entry: RankEntry) -> bool {
        let (root, removed) = self.remove_at(self.root, (entry.total, entry.seq), entry.record);
        self.root = root;
        let Some(i) = removed else {
            return false;
        };
        self.free.push(i);
        self.len -= 1;
        true
    }

    fn remove_at(&mut self, link: Link, slot: Slot, record: RecordId) -> (Link, Link) {
        let Some(n) = link else {
            return (None, None);
        };
        match slot.cmp(&self.node(n).slot()) {
            Ordering::Less => {
                let (left, removed) = self.remove_at(self.node(n).left, slot, record);
                self.node_mut(n).left = left;
                (Some(n), removed)
            }
            Ordering::Greater => {
                let (right, removed) = self.remove_at(self.node(n).right, slot, record);
                self.node_mut(n).right = right;
                (Some(n), removed)
            }
            Ordering::Equal if self.node(n).record != record => (Some(n), None),
            Ordering::Equal => {
                let (left, right) = (self.node(n).left, self.node(n).right);
                (self.merge(left, right), Some(n))
            }
        }
    }

    /// Join two subtrees where every key in `a` sorts before every key in `b`.
    fn merge(&mut self, a: Link, b: Link) -> Link {
        match (a, b) {
            (None, other) | (other, None) => other,
            (Some(a), Some(b)) => {
                if self.node(a).priority > self.node(b).priority {
                    let right = self.merge(self.node(a).right, Some(b));
                    self.node_mut(a).right = right;
                    Some(a)
                } else {
                    let left = self.merge(Some(a), self.node(b).left);
                    self.node_mut(b).left = left;
                    Some(b)
                }
            }
        }
    }

    /// Release every entry (teardown only). Returns how many were released.
    pub fn remove_all(&mut self) -> usize {
        let released = self.len;
        self.nodes.clear();
        self.free.clear();
        self.root = None;
        self.len = 0;
        released
    }

    /// Up to `limit` entries, largest total first.
    ///
    /// Among equal totals the most recently inserted comes first. The
    /// sequence borrows the tree, so it cannot outlive the lock guard it
    /// was taken under.
    pub fn descending(&self, limit: usize) -> Descending<'_> {
        let mut walk = Descending { tree: self, stack: Vec::new(), remaining: limit };
        walk.push_right_spine(self.root);
        walk
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Reverse in-order walk returned by [`RankingTree::descending`].
pub struct Descending<'a> {
    tree: &'a RankingTree,
    stack: Vec<u32>,
    remaining: usize,
}

impl Descending<'_> {
    fn push_right_spine(&mut self, mut link: Link) {
        while let Some(n) = link {
            self.stack.push(n);
            link = self.tree.node(n).right;
        }
    }
}

impl Iterator for Descending<'_> {
    type Item = RankEntry;

    fn next(&mut self) -> Option<RankEntry> {
        if self.remaining == 0 {
            return None;
        }
        let n = self.stack.pop()?;
        self.remaining -= 1;
        let tree = self.tree;
        let node = tree.node(n);
        self.push_right_spine(node.left);
        Some(node.entry())
    }
}
