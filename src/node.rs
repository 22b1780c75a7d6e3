//! The stride node (§3, §4.2): a prefix table plus a sparse 256-slot
//! children array, and the path-compressed leaf/fringe terminals.

use std::fmt::Debug;
use std::sync::Arc;

use crate::bitset::Bitset256;
use crate::error::TrieError;
use crate::prefix_table::PrefixTable;
use inetnum::addr::Prefix;

/// A path-compressed terminal carrying an explicit prefix (§3).
#[derive(Debug, Clone)]
pub struct LeafNode<V> {
    pub prefix: Prefix,
    pub value: V,
}

/// A path-compressed terminal at a stride boundary, carrying only a
/// value; its prefix is recovered from the traversal path (§3).
#[derive(Debug, Clone)]
pub struct FringeNode<V> {
    pub value: V,
}

/// One occupied children-array slot (§3 ChildrenArray).
pub enum Child<V, P> {
    Node(Arc<StrideNode<V, P>>),
    Leaf(Arc<LeafNode<V>>),
    Fringe(Arc<FringeNode<V>>),
}

impl<V, P> Clone for Child<V, P> {
    fn clone(&self) -> Self {
        match self {
            Child::Node(n) => Child::Node(Arc::clone(n)),
            Child::Leaf(l) => Child::Leaf(Arc::clone(l)),
            Child::Fringe(f) => Child::Fringe(Arc::clone(f)),
        }
    }
}

/// Sparse 256-slot array of children, stored as an occupancy bitset plus
/// a densely packed vector indexed by rank (§3 ChildrenArray).
pub struct ChildrenArray<V, P> {
    occupied: Bitset256,
    slots: Vec<Child<V, P>>,
}

impl<V, P> Default for ChildrenArray<V, P> {
    fn default() -> Self {
        ChildrenArray { occupied: Bitset256::EMPTY, slots: Vec::new() }
    }
}

impl<V, P> Clone for ChildrenArray<V, P> {
    fn clone(&self) -> Self {
        ChildrenArray { occupied: self.occupied, slots: self.slots.clone() }
    }
}

impl<V, P> ChildrenArray<V, P> {
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn occupied(&self) -> &Bitset256 {
        &self.occupied
    }

    pub fn get(&self, octet: u8) -> Option<&Child<V, P>> {
        if self.occupied.test(octet) {
            Some(&self.slots[self.occupied.rank(octet)])
        } else {
            None
        }
    }

    pub fn must_get(&self, octet: u8) -> &Child<V, P> {
        self.get(octet)
            .unwrap_or_else(|| crate::error::corrupt(0, octet, "missing child slot expected to exist"))
    }

    pub fn get_mut(&mut self, octet: u8) -> Option<&mut Child<V, P>> {
        if self.occupied.test(octet) {
            let rank = self.occupied.rank(octet);
            Some(&mut self.slots[rank])
        } else {
            None
        }
    }

    /// Insert or replace the child at `octet`; returns the previous one,
    /// if any.
    pub fn insert_at(
        &mut self,
        octet: u8,
        child: Child<V, P>,
    ) -> Option<Child<V, P>> {
        let rank = self.occupied.rank(octet);
        if self.occupied.test(octet) {
            Some(std::mem::replace(&mut self.slots[rank], child))
        } else {
            self.occupied.set_mut(octet);
            self.slots.insert(rank, child);
            None
        }
    }

    pub fn delete_at(&mut self, octet: u8) -> Option<Child<V, P>> {
        if !self.occupied.test(octet) {
            return None;
        }
        let rank = self.occupied.rank(octet);
        self.occupied.clear_mut(octet);
        Some(self.slots.remove(rank))
    }

    /// Iterate `(octet, &Child)` pairs in ascending octet order.
    pub fn iter(&self) -> impl Iterator<Item = (u8, &Child<V, P>)> {
        self.occupied.iter().zip(self.slots.iter())
    }

    pub fn only_child(&self) -> Option<(u8, &Child<V, P>)> {
        if self.slots.len() == 1 {
            self.iter().next()
        } else {
            None
        }
    }
}

/// Diagnostic counts for one node (§4.2 `stats()`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeStats {
    pub prefixes: usize,
    pub child_slots: usize,
    pub subnodes: usize,
    pub leaves: usize,
    pub fringes: usize,
}

impl std::ops::Add for NodeStats {
    type Output = NodeStats;
    fn add(self, other: NodeStats) -> NodeStats {
        NodeStats {
            prefixes: self.prefixes + other.prefixes,
            child_slots: self.child_slots + other.child_slots,
            subnodes: self.subnodes + other.subnodes,
            leaves: self.leaves + other.leaves,
            fringes: self.fringes + other.fringes,
        }
    }
}

/// Coarse shape classification for a node, derived from [`NodeStats`]
/// (§4.2). Useful for tests and the tree dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// No prefixes, no children.
    Null,
    /// Prefixes only, no children.
    Stop,
    /// Prefixes and children both present.
    Half,
    /// No prefixes, multiple/mixed children (the only shape in which a
    /// childless-of-its-own-prefix node legally persists, e.g. the root).
    Full,
    /// No prefixes, exactly one child that is itself an interior node.
    Path,
}

impl NodeKind {
    pub fn classify(stats: &NodeStats) -> NodeKind {
        match (stats.prefixes, stats.child_slots) {
            (0, 0) => NodeKind::Null,
            (p, 0) if p > 0 => NodeKind::Stop,
            (0, 1) => NodeKind::Path,
            (0, _) => NodeKind::Full,
            _ => NodeKind::Half,
        }
    }
}

/// The stride node itself: a prefix table of flavor `P` plus a sparse
/// children array (§3 StrideNode).
pub struct StrideNode<V, P> {
    pub prefixes: P,
    pub children: ChildrenArray<V, P>,
}

impl<V, P> Default for StrideNode<V, P>
where
    P: Default,
{
    fn default() -> Self {
        StrideNode { prefixes: P::default(), children: ChildrenArray::default() }
    }
}

impl<V, P: PrefixTable<V>> StrideNode<V, P> {
    pub fn try_new() -> Result<Self, TrieError> {
        log::trace!("allocating new stride node");
        Ok(StrideNode { prefixes: P::try_new()?, children: ChildrenArray::default() })
    }

    /// Create a fresh interior node during a mutation that already holds a
    /// live node of this same `(V, P)` instantiation — the zero-sized-value
    /// check in [`PrefixTable::try_new`] cannot fail a second time for a
    /// type that has already produced one.
    pub fn new_child() -> Self {
        Self::try_new().unwrap_or_else(|e| {
            crate::error::corrupt(0, 0, &format!("value type rejected after table construction: {e}"))
        })
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty() && self.children.is_empty()
    }

    pub fn stats(&self) -> NodeStats {
        let mut s = NodeStats {
            prefixes: self.prefixes.len(),
            child_slots: self.children.len(),
            subnodes: 0,
            leaves: 0,
            fringes: 0,
        };
        for (_, child) in self.children.iter() {
            match child {
                Child::Node(_) => s.subnodes += 1,
                Child::Leaf(_) => s.leaves += 1,
                Child::Fringe(_) => s.fringes += 1,
            }
        }
        s
    }

    pub fn stats_rec(&self) -> NodeStats {
        let mut total = self.stats();
        for (_, child) in self.children.iter() {
            if let Child::Node(n) = child {
                total = total + n.stats_rec();
            }
        }
        total
    }

    pub fn kind(&self) -> NodeKind {
        NodeKind::classify(&self.stats())
    }
}

impl<V, P: Clone> Clone for StrideNode<V, P> {
    /// Shallow copy: duplicates the bitsets and children vector, sharing
    /// interior subnode pointers and leaf/fringe payloads via `Arc`
    /// clones (§4.2 `clone_flat`). This is exactly what `Arc::make_mut`
    /// needs to materialize a private copy of a shared node before a
    /// mutation descends past it.
    fn clone(&self) -> Self {
        StrideNode { prefixes: self.prefixes.clone(), children: self.children.clone() }
    }
}

impl<V: Clone, P: PrefixTable<V> + Clone> StrideNode<V, P> {
    /// Deep copy of the whole subtree (§4.2 `clone_rec`).
    pub fn clone_rec(&self) -> Self {
        let mut out = self.clone();
        for (octet, child) in self.children.iter() {
            let cloned = match child {
                Child::Node(n) => Child::Node(Arc::new(n.clone_rec())),
                Child::Leaf(l) => Child::Leaf(Arc::new((**l).clone())),
                Child::Fringe(f) => Child::Fringe(Arc::new((**f).clone())),
            };
            out.children.insert_at(octet, cloned);
        }
        out
    }
}

impl<V, P> Debug for StrideNode<V, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrideNode")
            .field("prefixes", &self.children.len())
            .field("children", &self.children.len())
            .finish()
    }
}
