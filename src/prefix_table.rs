//! The per-stride prefix table (§4.2): the set of base indices "visible"
//! at a node, plus whatever value storage the node's flavor calls for.
//!
//! Three flavors share the same contract:
//! - [`BartTable`] and [`FastTable`] hold one value per base index via the
//!   allotment trick — a value inserted at index `idx` is propagated into
//!   every CBT descendant of `idx` that is not itself already claimed by a
//!   more specific explicit prefix, so a lookup is a single array read
//!   (§4.2, §9). They differ only in array residency: `BartTable`
//!   allocates its 256-cell value array lazily on first insert (cheaper
//!   for the common case of a node with no prefixes of its own), while
//!   `FastTable` allocates it eagerly at construction, trading memory for
//!   one fewer branch on every read.
//! - [`LiteTable`] stores no values at all — only the occupancy bitset —
//!   and is meant to be used at `V = ()`, the idiomatic Rust way to get a
//!   presence-only set (`HashSet<K> = HashMap<K, ()>`).
//!
//! The zero-sized-value rejection (§7, §9) is specific to the allotment
//! flavors: `LiteTable` never touches the allotment array, so it is the
//! correct choice precisely when the value type has nothing in it.

use crate::bitset::Bitset256;
use crate::error::TrieError;

/// The common contract implemented by `BartTable`, `FastTable` and
/// `LiteTable`.
pub trait PrefixTable<V>: Sized {
    fn try_new() -> Result<Self, TrieError>;

    /// Set `idx`'s value; returns whether it already existed.
    fn insert(&mut self, idx: u8, value: V) -> bool;

    /// Clear `idx`; returns whether it existed.
    fn remove(&mut self, idx: u8) -> bool;

    fn get(&self, idx: u8) -> Option<&V>;

    /// LPM presence check: true iff `idx` or an ancestor of `idx` is set.
    fn contains(&self, idx: u8) -> bool;

    /// LPM value lookup: the value of the deepest set ancestor of `idx`
    /// (inclusive), plus which index it came from.
    fn lookup(&self, idx: u8) -> Option<(u8, &V)>;

    fn bitset(&self) -> &Bitset256;

    fn len(&self) -> usize {
        self.bitset().count() as usize
    }

    fn is_empty(&self) -> bool {
        self.bitset().is_empty()
    }
}

#[inline]
fn check_not_zero_sized<V>() -> Result<(), TrieError> {
    if std::mem::size_of::<V>() == 0 {
        Err(TrieError::ZeroSizedValue)
    } else {
        Ok(())
    }
}

/// The CBT children of `idx` (at most two: `2*idx` and `2*idx+1`), or none
/// once `idx` is a depth-8 leaf (`idx >= 128`, where `2*idx` would overflow
/// the valid `1..255` base-index range).
fn cbt_children(idx: u8) -> impl Iterator<Item = u8> {
    let left = idx as u16 * 2;
    [left, left + 1].into_iter().filter(|&c| c <= 255).map(|c| c as u8)
}

/// Recursive write-through allotment used by both `BartTable` and
/// `FastTable` (§9 open-question resolution: write-through, bounded by
/// early-stop at an already-occupied descendant). Only the two real CBT
/// children of `idx` are visited at each level, so a descendant that
/// already carries its own explicit value — and everything beneath it —
/// is left untouched.
fn allot_insert<V: Clone>(
    prefixes: &Bitset256,
    values: &mut [Option<(u8, V)>; 256],
    idx: u8,
    value: &(u8, V),
) {
    for c in cbt_children(idx) {
        if !prefixes.test(c) {
            values[c as usize] = Some(value.clone());
            allot_insert(prefixes, values, c, value);
        }
    }
}

/// Write-through roll-back on delete: descendants that inherited their
/// value from `idx` are reset to whatever `idx`'s nearest remaining
/// ancestor provides (or cleared).
fn allot_delete<V: Clone>(
    prefixes: &Bitset256,
    values: &mut [Option<(u8, V)>; 256],
    idx: u8,
    replacement: &Option<(u8, V)>,
) {
    for c in cbt_children(idx) {
        if !prefixes.test(c) {
            values[c as usize] = replacement.clone();
            allot_delete(prefixes, values, c, replacement);
        }
    }
}

fn nearest_ancestor_value<V: Clone>(
    prefixes: &Bitset256,
    values: &[Option<(u8, V)>; 256],
    mut idx: u8,
) -> Option<(u8, V)> {
    idx >>= 1;
    while idx != 0 {
        if prefixes.test(idx) {
            return values[idx as usize].clone();
        }
        idx >>= 1;
    }
    None
}

// ---------------------------------------------------------------- Bart --

/// Allotment-flavored prefix table with a lazily allocated value array.
#[derive(Debug, Clone)]
pub struct BartTable<V> {
    prefixes: Bitset256,
    values: Option<Box<[Option<(u8, V)>; 256]>>,
}

impl<V: Clone> BartTable<V> {
    fn values_mut(&mut self) -> &mut [Option<(u8, V)>; 256] {
        self.values
            .get_or_insert_with(|| Box::new(std::array::from_fn(|_| None)))
    }
}

impl<V: Clone> PrefixTable<V> for BartTable<V> {
    fn try_new() -> Result<Self, TrieError> {
        check_not_zero_sized::<V>()?;
        Ok(BartTable { prefixes: Bitset256::EMPTY, values: None })
    }

    fn insert(&mut self, idx: u8, value: V) -> bool {
        let existed = self.prefixes.test(idx);
        self.prefixes.set_mut(idx);
        let entry = (idx, value);
        let prefixes = self.prefixes;
        let values = self.values_mut();
        values[idx as usize] = Some(entry.clone());
        allot_insert(&prefixes, values, idx, &entry);
        existed
    }

    fn remove(&mut self, idx: u8) -> bool {
        if !self.prefixes.test(idx) {
            return false;
        }
        self.prefixes.clear_mut(idx);
        let prefixes = self.prefixes;
        let values = self.values_mut();
        let replacement = nearest_ancestor_value(&prefixes, values, idx);
        values[idx as usize] = replacement.clone();
        allot_delete(&prefixes, values, idx, &replacement);
        true
    }

    fn get(&self, idx: u8) -> Option<&V> {
        if !self.prefixes.test(idx) {
            return None;
        }
        self.values.as_ref().and_then(|v| v[idx as usize].as_ref()).map(|(_, v)| v)
    }

    fn contains(&self, idx: u8) -> bool {
        self.prefixes.intersects(&crate::bitset::LPM_LOOKUP[idx as usize])
    }

    fn lookup(&self, idx: u8) -> Option<(u8, &V)> {
        self.values
            .as_ref()
            .and_then(|v| v[idx as usize].as_ref())
            .map(|(i, v)| (*i, v))
    }

    fn bitset(&self) -> &Bitset256 {
        &self.prefixes
    }
}

// ---------------------------------------------------------------- Fast --

/// Allotment-flavored prefix table with an eagerly allocated value array,
/// trading memory for one fewer branch on every read than [`BartTable`].
#[derive(Debug, Clone)]
pub struct FastTable<V> {
    prefixes: Bitset256,
    values: Box<[Option<(u8, V)>; 256]>,
}

impl<V: Clone> PrefixTable<V> for FastTable<V> {
    fn try_new() -> Result<Self, TrieError> {
        check_not_zero_sized::<V>()?;
        Ok(FastTable {
            prefixes: Bitset256::EMPTY,
            values: Box::new(std::array::from_fn(|_| None)),
        })
    }

    fn insert(&mut self, idx: u8, value: V) -> bool {
        let existed = self.prefixes.test(idx);
        self.prefixes.set_mut(idx);
        let entry = (idx, value);
        self.values[idx as usize] = Some(entry.clone());
        let prefixes = self.prefixes;
        allot_insert(&prefixes, &mut self.values, idx, &entry);
        existed
    }

    fn remove(&mut self, idx: u8) -> bool {
        if !self.prefixes.test(idx) {
            return false;
        }
        self.prefixes.clear_mut(idx);
        let prefixes = self.prefixes;
        let replacement =
            nearest_ancestor_value(&prefixes, &self.values, idx);
        self.values[idx as usize] = replacement.clone();
        allot_delete(&prefixes, &mut self.values, idx, &replacement);
        true
    }

    fn get(&self, idx: u8) -> Option<&V> {
        if !self.prefixes.test(idx) {
            return None;
        }
        self.values[idx as usize].as_ref().map(|(_, v)| v)
    }

    fn contains(&self, idx: u8) -> bool {
        self.prefixes.intersects(&crate::bitset::LPM_LOOKUP[idx as usize])
    }

    fn lookup(&self, idx: u8) -> Option<(u8, &V)> {
        self.values[idx as usize].as_ref().map(|(i, v)| (*i, v))
    }

    fn bitset(&self) -> &Bitset256 {
        &self.prefixes
    }
}

// ---------------------------------------------------------------- Lite --

/// Presence-only prefix table: no value storage, just the occupancy
/// bitset. Meant to be used at `V = ()`.
#[derive(Debug, Clone, Default)]
pub struct LiteTable {
    prefixes: Bitset256,
}

impl PrefixTable<()> for LiteTable {
    fn try_new() -> Result<Self, TrieError> {
        // Never rejected: the allotment array this check protects does
        // not exist here.
        Ok(LiteTable::default())
    }

    fn insert(&mut self, idx: u8, _value: ()) -> bool {
        let existed = self.prefixes.test(idx);
        self.prefixes.set_mut(idx);
        existed
    }

    fn remove(&mut self, idx: u8) -> bool {
        let existed = self.prefixes.test(idx);
        self.prefixes.clear_mut(idx);
        existed
    }

    fn get(&self, idx: u8) -> Option<&()> {
        self.prefixes.test(idx).then_some(&())
    }

    fn contains(&self, idx: u8) -> bool {
        self.prefixes.intersects(&crate::bitset::LPM_LOOKUP[idx as usize])
    }

    fn lookup(&self, idx: u8) -> Option<(u8, &())> {
        self.prefixes
            .intersection_top(&crate::bitset::LPM_LOOKUP[idx as usize])
            .map(|top| (top, &()))
    }

    fn bitset(&self) -> &Bitset256 {
        &self.prefixes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_sized_value_rejected_for_allotment_flavors() {
        assert_eq!(
            BartTable::<()>::try_new().unwrap_err(),
            TrieError::ZeroSizedValue
        );
        assert_eq!(
            FastTable::<()>::try_new().unwrap_err(),
            TrieError::ZeroSizedValue
        );
    }

    #[test]
    fn lite_table_allows_zero_sized_value() {
        assert!(LiteTable::try_new().is_ok());
    }

    #[test]
    fn allotment_propagates_and_rolls_back() {
        let mut t = BartTable::<&'static str>::try_new().unwrap();
        // insert /0 (idx 1) = "A", then /1 (idx 2) = "B" — B should win
        // for its half, A should still answer for the other half.
        t.insert(1, "A");
        t.insert(2, "B");
        assert_eq!(t.lookup(2).map(|(_, v)| *v), Some("B"));
        assert_eq!(t.lookup(3).map(|(_, v)| *v), Some("A"));
        // 200's CBT ancestor chain is 200,100,50,25,12,6,3,1 — index 2 is
        // not among them, so "A" (from idx 1) is the correct LPM, not "B".
        assert_eq!(t.lookup(200).map(|(_, v)| *v), Some("A"));
        t.remove(2);
        assert_eq!(t.lookup(2).map(|(_, v)| *v), Some("A"));
        assert_eq!(t.lookup(200).map(|(_, v)| *v), Some("A"));
    }

    #[test]
    fn more_specific_insert_does_not_disturb_sibling() {
        let mut t = FastTable::<u32>::try_new().unwrap();
        t.insert(1, 10);
        t.insert(4, 40); // /2 child under idx 2's range
        assert_eq!(t.lookup(4).map(|(_, v)| *v), Some(40));
        assert_eq!(t.lookup(5).map(|(_, v)| *v), Some(10));
        assert_eq!(t.lookup(3).map(|(_, v)| *v), Some(10));
    }
}
