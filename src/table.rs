//! The synchronized wrapper table (§5, §6): one atomically-swapped root per
//! address family, writers serialized by a mutex, readers lock-free.

use std::net::IpAddr;
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use inetnum::addr::Prefix;

use crate::index::StridePath;
use crate::node::StrideNode;
use crate::ops;
use crate::prefix_table::{BartTable, FastTable, LiteTable, PrefixTable};
use crate::TrieError;

/// One address family's root, published via [`ArcSwap`] so readers never
/// take a lock (§5): they load the pointer once and observe a consistent
/// snapshot for the lifetime of their call.
struct Family<V, P> {
    root: ArcSwap<StrideNode<V, P>>,
}

impl<V, P: PrefixTable<V>> Family<V, P> {
    fn try_new() -> Result<Self, TrieError> {
        Ok(Family { root: ArcSwap::new(Arc::new(StrideNode::try_new()?)) })
    }
}

/// A routing table over both IPv4 and IPv6, generic over the prefix-table
/// flavor `P` (§6 Public operations).
///
/// Mutators serialize on an internal mutex; readers (`get`, `contains`,
/// `lookup`, `supernets`, `subnets`, `overlaps`, `all`, `all_sorted`) take
/// no lock at all.
pub struct Table<V, P> {
    v4: Family<V, P>,
    v6: Family<V, P>,
    write_lock: Mutex<()>,
}

/// A table using the lazily allocated allotment flavor.
pub type BartTrie<V> = Table<V, BartTable<V>>;
/// A table using the eagerly allocated allotment flavor.
pub type FastTrie<V> = Table<V, FastTable<V>>;
/// A presence-only table (`V = ()`).
pub type LiteTrie = Table<(), LiteTable>;

fn require_canonical(pfx: &Prefix) {
    let canonical = if pfx.is_v4() {
        Prefix::new_v4(
            match pfx.addr() {
                IpAddr::V4(a) => a,
                IpAddr::V6(_) => unreachable!(),
            },
            pfx.len(),
        )
    } else {
        Prefix::new_v6(
            match pfx.addr() {
                IpAddr::V6(a) => a,
                IpAddr::V4(_) => unreachable!(),
            },
            pfx.len(),
        )
    };
    match canonical {
        Ok(p) if p == *pfx => {}
        _ => crate::error::bad_prefix(&format!("{pfx} has non-zero host bits")),
    }
}

impl<V: Clone, P: PrefixTable<V> + Clone> Table<V, P> {
    pub fn try_new() -> Result<Self, TrieError> {
        Ok(Table {
            v4: Family::try_new()?,
            v6: Family::try_new()?,
            write_lock: Mutex::new(()),
        })
    }

    fn family(&self, is_ipv4: bool) -> &Family<V, P> {
        if is_ipv4 {
            &self.v4
        } else {
            &self.v6
        }
    }

    /// §6 `insert`.
    pub fn insert(&self, pfx: &Prefix, v: V) -> bool {
        require_canonical(pfx);
        let _guard = self.write_lock.lock().unwrap();
        let fam = self.family(pfx.is_v4());
        let mut root = fam.root.load_full();
        let existed = ops::insert(&mut root, pfx, v);
        fam.root.store(root);
        existed
    }

    /// §6 `delete`.
    pub fn delete(&self, pfx: &Prefix) -> bool {
        require_canonical(pfx);
        let _guard = self.write_lock.lock().unwrap();
        let fam = self.family(pfx.is_v4());
        let mut root = fam.root.load_full();
        let existed = ops::delete(&mut root, pfx);
        fam.root.store(root);
        existed
    }

    /// §6 `modify`.
    pub fn modify(&self, pfx: &Prefix, cb: impl FnOnce(Option<&V>) -> (Option<V>, bool)) -> i8 {
        require_canonical(pfx);
        let _guard = self.write_lock.lock().unwrap();
        let fam = self.family(pfx.is_v4());
        let mut root = fam.root.load_full();
        let delta = ops::modify(&mut root, pfx, cb);
        fam.root.store(root);
        delta
    }

    /// §6 `get`.
    pub fn get(&self, pfx: &Prefix) -> Option<V> {
        require_canonical(pfx);
        let root = self.family(pfx.is_v4()).root.load();
        ops::get(&root, pfx)
    }

    /// §6 `contains` (address LPM presence).
    pub fn contains(&self, addr: IpAddr) -> bool {
        let root = self.family(addr.is_ipv4()).root.load();
        ops::contains(&root, addr)
    }

    /// §6 `lookup` (address LPM value).
    pub fn lookup(&self, addr: IpAddr) -> Option<(Prefix, V)> {
        let root = self.family(addr.is_ipv4()).root.load();
        ops::lookup(&root, addr)
    }

    /// §6 `lookup_prefix`: exact match only.
    pub fn lookup_prefix(&self, pfx: &Prefix) -> Option<V> {
        self.get(pfx)
    }

    /// §6 `lookup_prefix_lpm`: LPM over the query prefix's address.
    pub fn lookup_prefix_lpm(&self, pfx: &Prefix) -> Option<(Prefix, V)> {
        require_canonical(pfx);
        let root = self.family(pfx.is_v4()).root.load();
        ops::lookup_prefix_lpm(&root, pfx)
    }

    /// §6 `supernets`.
    pub fn supernets(&self, pfx: &Prefix, yield_fn: impl FnMut(Prefix, &V) -> bool) {
        require_canonical(pfx);
        let root = self.family(pfx.is_v4()).root.load();
        ops::supernets(&root, pfx, yield_fn);
    }

    /// §6 `subnets`.
    pub fn subnets(&self, pfx: &Prefix, yield_fn: impl FnMut(Prefix, &V) -> bool) {
        require_canonical(pfx);
        let root = self.family(pfx.is_v4()).root.load();
        ops::subnets(&root, pfx, yield_fn);
    }

    /// §6 `overlaps_prefix`.
    pub fn overlaps_prefix(&self, pfx: &Prefix) -> bool {
        require_canonical(pfx);
        let root = self.family(pfx.is_v4()).root.load();
        ops::overlaps_prefix(&root, pfx)
    }

    /// §6 `overlaps`.
    pub fn overlaps(&self, other: &Table<V, P>) -> bool {
        ops::overlaps(&self.v4.root.load(), &other.v4.root.load())
            || ops::overlaps(&self.v6.root.load(), &other.v6.root.load())
    }

    /// §6 `union`.
    pub fn union(&self, other: &Table<V, P>) -> usize {
        let _guard = self.write_lock.lock().unwrap();
        let mut v4 = self.v4.root.load_full();
        let d4 = ops::union(&mut v4, &other.v4.root.load());
        self.v4.root.store(v4);
        let mut v6 = self.v6.root.load_full();
        let d6 = ops::union(&mut v6, &other.v6.root.load());
        self.v6.root.store(v6);
        d4 + d6
    }

    /// §6 `equal`, using `V: PartialEq` as the default value-equality
    /// witness (§6 "Value-type helpers").
    pub fn equal(&self, other: &Table<V, P>) -> bool
    where
        V: PartialEq,
    {
        ops::equal(&self.v4.root.load(), &other.v4.root.load(), &|a, b| a == b)
            && ops::equal(&self.v6.root.load(), &other.v6.root.load(), &|a, b| a == b)
    }

    /// §6 `all`.
    pub fn all(&self, mut yield_fn: impl FnMut(Prefix, &V) -> bool) {
        let v4 = self.v4.root.load();
        let path4 = StridePath::new(true, &[0; 16]);
        if !ops::all_rec(&v4, &path4, 0, &mut yield_fn) {
            return;
        }
        let v6 = self.v6.root.load();
        let path6 = StridePath::new(false, &[0; 16]);
        ops::all_rec(&v6, &path6, 0, &mut yield_fn);
    }

    /// §6 `all_sorted`.
    pub fn all_sorted(&self, mut yield_fn: impl FnMut(Prefix, &V) -> bool) {
        let v4 = self.v4.root.load();
        let path4 = StridePath::new(true, &[0; 16]);
        if !ops::all_rec_sorted(&v4, &path4, 0, &mut yield_fn) {
            return;
        }
        let v6 = self.v6.root.load();
        let path6 = StridePath::new(false, &[0; 16]);
        ops::all_rec_sorted(&v6, &path6, 0, &mut yield_fn);
    }

    /// §4.11 `insert_persist`: leaves `self` structurally unchanged and
    /// returns a new table sharing every untouched subtree.
    pub fn insert_persist(&self, pfx: &Prefix, v: V) -> (Table<V, P>, bool)
    where
        P: 'static,
        V: 'static,
    {
        require_canonical(pfx);
        let out = self.snapshot_structure();
        let fam = out.family(pfx.is_v4());
        let mut root = fam.root.load_full();
        let existed = ops::insert(&mut root, pfx, v);
        fam.root.store(root);
        (out, existed)
    }

    /// §4.11 `delete_persist`.
    pub fn delete_persist(&self, pfx: &Prefix) -> (Table<V, P>, bool) {
        require_canonical(pfx);
        let out = self.snapshot_structure();
        let fam = out.family(pfx.is_v4());
        let mut root = fam.root.load_full();
        let existed = ops::delete(&mut root, pfx);
        fam.root.store(root);
        (out, existed)
    }

    /// §4.11 `modify_persist`.
    pub fn modify_persist(
        &self,
        pfx: &Prefix,
        cb: impl FnOnce(Option<&V>) -> (Option<V>, bool),
    ) -> (Table<V, P>, i8) {
        require_canonical(pfx);
        let out = self.snapshot_structure();
        let fam = out.family(pfx.is_v4());
        let mut root = fam.root.load_full();
        let delta = ops::modify(&mut root, pfx, cb);
        fam.root.store(root);
        (out, delta)
    }

    /// §4.11 `union_persist`.
    pub fn union_persist(&self, other: &Table<V, P>) -> (Table<V, P>, usize) {
        let out = self.snapshot_structure();
        let mut v4 = out.v4.root.load_full();
        let d4 = ops::union(&mut v4, &other.v4.root.load());
        out.v4.root.store(v4);
        let mut v6 = out.v6.root.load_full();
        let d6 = ops::union(&mut v6, &other.v6.root.load());
        out.v6.root.store(v6);
        (out, d4 + d6)
    }

    /// A line-oriented, indented dump of every stored prefix, IPv4 then
    /// IPv6, nested under the stride node that owns it (§11).
    pub fn dump(&self) -> String
    where
        V: std::fmt::Display,
    {
        let mut out = String::new();
        let v4 = self.v4.root.load();
        ops::dump_tree(&v4, &StridePath::new(true, &[0; 16]), 0, 0, &mut out);
        let v6 = self.v6.root.load();
        ops::dump_tree(&v6, &StridePath::new(false, &[0; 16]), 0, 0, &mut out);
        out
    }

    /// A fresh `Table` sharing both family roots with `self` (an `Arc`
    /// clone, O(1)) — the starting point every `*_persist` operation
    /// mutates via copy-on-write without disturbing `self`.
    fn snapshot_structure(&self) -> Table<V, P> {
        log::trace!("persistent snapshot: sharing both family roots via Arc clone");
        Table {
            v4: Family { root: ArcSwap::new(self.v4.root.load_full()) },
            v6: Family { root: ArcSwap::new(self.v6.root.load_full()) },
            write_lock: Mutex::new(()),
        }
    }
}
