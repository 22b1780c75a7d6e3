//! The tree algorithms (§4.3-§4.13): insert, delete, modify, get, the
//! address/prefix LPM walks, supernets/subnets, overlaps, union, structural
//! equality and enumeration.
//!
//! Every mutator here takes `&mut Arc<StrideNode<V, P>>` and descends by
//! calling `Arc::make_mut` at each step. That single idiom gives both
//! mutation styles the core needs for free: called on a node nobody else
//! references, `make_mut` is a no-op and the edit happens in place; called
//! on a node a reader snapshot still points at (because the caller cloned
//! the `Arc` before handing it in, as the persistent wrappers in
//! `persist.rs` do), it clones exactly the nodes on the descent path before
//! editing them, which is precisely the copy-on-write contract in §4.11.

use std::sync::Arc;

use inetnum::addr::Prefix;

use crate::bitset::{FRINGE_ROUTES, LPM_LOOKUP, PFX_ROUTES};
use crate::index::{
    cidr_for_fringe, cidr_from_path, cmp_prefix, host_idx,
    last_octet_plus_one_and_last_bits, octets_of, pfx_to_idx, StridePath,
};
use crate::node::{Child, FringeNode, LeafNode, StrideNode};
use crate::prefix_table::PrefixTable;

/// `IsFringe` (§3 invariant 7 / §4.3): true iff the prefix terminates
/// exactly at this stride boundary.
#[inline]
fn is_fringe_here(depth: u8, last_one: u8, last_bits: u8) -> bool {
    last_bits == 0 && depth + 1 == last_one
}

// ------------------------------------------------------------------ insert

/// §4.3.
pub fn insert<V: Clone, P: PrefixTable<V> + Clone>(
    root: &mut Arc<StrideNode<V, P>>,
    pfx: &Prefix,
    value: V,
) -> bool {
    let is_ipv4 = pfx.is_v4();
    let path = StridePath::new(is_ipv4, &octets_of(pfx));
    insert_rec(root, &path, 0, pfx, value)
}

fn insert_rec<V: Clone, P: PrefixTable<V> + Clone>(
    node: &mut Arc<StrideNode<V, P>>,
    path: &StridePath,
    depth: u8,
    pfx: &Prefix,
    value: V,
) -> bool {
    let (last_one, last_bits) = last_octet_plus_one_and_last_bits(pfx.len());
    if depth == last_one {
        let octet = path.octet(depth as usize);
        return Arc::make_mut(node)
            .prefixes
            .insert(pfx_to_idx(octet, last_bits), value);
    }

    let octet = path.octet(depth as usize);
    let is_fringe = is_fringe_here(depth, last_one, last_bits);
    let node_mut = Arc::make_mut(node);

    match node_mut.children.get_mut(octet) {
        None => {
            let child = if is_fringe {
                Child::Fringe(Arc::new(FringeNode { value }))
            } else {
                Child::Leaf(Arc::new(LeafNode { prefix: *pfx, value }))
            };
            node_mut.children.insert_at(octet, child);
            false
        }
        Some(Child::Node(sub)) => insert_rec(sub, path, depth + 1, pfx, value),
        Some(Child::Leaf(leaf)) => {
            if leaf.prefix == *pfx {
                node_mut
                    .children
                    .insert_at(octet, Child::Leaf(Arc::new(LeafNode { prefix: *pfx, value })));
                true
            } else {
                let old = Arc::clone(leaf);
                let mut sub = Arc::new(StrideNode::<V, P>::new_child());
                let old_path = StridePath::new(pfx.is_v4(), &octets_of(&old.prefix));
                insert_rec(&mut sub, &old_path, depth + 1, &old.prefix, old.value.clone());
                let existed = insert_rec(&mut sub, path, depth + 1, pfx, value);
                node_mut.children.insert_at(octet, Child::Node(sub));
                existed
            }
        }
        Some(Child::Fringe(fringe)) => {
            if is_fringe {
                node_mut
                    .children
                    .insert_at(octet, Child::Fringe(Arc::new(FringeNode { value })));
                true
            } else {
                let old = Arc::clone(fringe);
                let mut sub = Arc::new(StrideNode::<V, P>::new_child());
                Arc::make_mut(&mut sub).prefixes.insert(1, old.value.clone());
                let existed = insert_rec(&mut sub, path, depth + 1, pfx, value);
                node_mut.children.insert_at(octet, Child::Node(sub));
                existed
            }
        }
    }
}

// ------------------------------------------------------------------ delete

enum DeleteOutcome {
    NotFound,
    Removed,
}

/// §4.4, including the bottom-up `purge_and_compress`.
pub fn delete<V: Clone, P: PrefixTable<V> + Clone>(
    root: &mut Arc<StrideNode<V, P>>,
    pfx: &Prefix,
) -> bool {
    let is_ipv4 = pfx.is_v4();
    let path = StridePath::new(is_ipv4, &octets_of(pfx));
    let mut stack: Vec<u8> = Vec::new();
    let outcome = delete_rec(root, &path, 0, pfx, &mut stack);
    match outcome {
        DeleteOutcome::NotFound => false,
        DeleteOutcome::Removed => {
            purge_and_compress(root, &path, is_ipv4, &stack);
            true
        }
    }
}

fn delete_rec<V: Clone, P: PrefixTable<V> + Clone>(
    node: &mut Arc<StrideNode<V, P>>,
    path: &StridePath,
    depth: u8,
    pfx: &Prefix,
    stack: &mut Vec<u8>,
) -> DeleteOutcome {
    let (last_one, last_bits) = last_octet_plus_one_and_last_bits(pfx.len());
    if depth == last_one {
        let octet = path.octet(depth as usize);
        let existed = Arc::make_mut(node)
            .prefixes
            .remove(pfx_to_idx(octet, last_bits));
        return if existed { DeleteOutcome::Removed } else { DeleteOutcome::NotFound };
    }

    let octet = path.octet(depth as usize);
    let is_fringe = is_fringe_here(depth, last_one, last_bits);
    let node_mut = Arc::make_mut(node);

    match node_mut.children.get_mut(octet) {
        None => DeleteOutcome::NotFound,
        Some(Child::Node(sub)) => {
            stack.push(octet);
            delete_rec(sub, path, depth + 1, pfx, stack)
        }
        Some(Child::Fringe(_)) => {
            if is_fringe {
                node_mut.children.delete_at(octet);
                DeleteOutcome::Removed
            } else {
                DeleteOutcome::NotFound
            }
        }
        Some(Child::Leaf(leaf)) => {
            if leaf.prefix == *pfx {
                node_mut.children.delete_at(octet);
                DeleteOutcome::Removed
            } else {
                DeleteOutcome::NotFound
            }
        }
    }
}

/// Unwind `stack` (the octets chosen at each level during descent) and
/// re-establish the path-compression invariant bottom-up (§4.4, §3
/// invariant 3).
enum CompressAction {
    /// Node still satisfies the invariant on its own (or can't be
    /// compressed further because its sole child is a subnode): stop
    /// unwinding.
    Stop,
    /// Node became empty: drop it from its parent.
    Remove,
    /// Node collapses to a single prefix: drop it, reinsert the prefix
    /// one level up.
    Reinsert(Prefix),
}

fn purge_and_compress<V: Clone, P: PrefixTable<V> + Clone>(
    root: &mut Arc<StrideNode<V, P>>,
    path: &StridePath,
    is_ipv4: bool,
    stack: &[u8],
) {
    for depth in (0..stack.len()).rev() {
        let octet = stack[depth];
        let parent = locate_mut(root, &stack[..depth]);
        let parent_ref = Arc::make_mut(parent);
        let Some(Child::Node(n)) = parent_ref.children.get(octet) else {
            continue;
        };
        let p = n.prefixes.len();
        let c = n.children.len();

        let (action, value): (CompressAction, Option<V>) = if p == 0 && c == 0 {
            (CompressAction::Remove, None)
        } else if p == 0 && c == 1 {
            let (child_octet, grandchild) = n.children.iter().next().unwrap();
            match grandchild {
                Child::Node(_) => (CompressAction::Stop, None),
                Child::Leaf(leaf) => {
                    (CompressAction::Reinsert(leaf.prefix), Some(leaf.value.clone()))
                }
                Child::Fringe(fringe) => {
                    let fringe_pfx =
                        cidr_for_fringe(path, depth as u8 + 2, is_ipv4, child_octet);
                    (CompressAction::Reinsert(fringe_pfx), Some(fringe.value.clone()))
                }
            }
        } else if p == 1 && c == 0 {
            let idx = n.prefixes.bitset().first_set().unwrap_or_else(|| {
                crate::error::corrupt(depth as u8, octet, "p==1 but prefix bitset empty")
            });
            let value = n
                .prefixes
                .get(idx)
                .unwrap_or_else(|| {
                    crate::error::corrupt(depth as u8, octet, "missing value for sole prefix")
                })
                .clone();
            let reconstructed = cidr_from_path(path, depth as u8 + 1, is_ipv4, idx);
            (CompressAction::Reinsert(reconstructed), Some(value))
        } else {
            (CompressAction::Stop, None)
        };

        match action {
            CompressAction::Stop => break,
            CompressAction::Remove => {
                log::trace!("purge: dropping empty child at depth {depth}, octet {octet}");
                parent_ref.children.delete_at(octet);
            }
            CompressAction::Reinsert(pfx) => {
                log::trace!(
                    "purge: collapsing child at depth {depth}, octet {octet} into {pfx}"
                );
                parent_ref.children.delete_at(octet);
                insert_rec(parent, path, depth as u8, &pfx, value.unwrap());
            }
        }
    }
}

fn locate_mut<'a, V, P>(
    root: &'a mut Arc<StrideNode<V, P>>,
    path: &[u8],
) -> &'a mut Arc<StrideNode<V, P>>
where
    V: Clone,
    P: PrefixTable<V> + Clone,
{
    let mut cur = root;
    for &octet in path {
        let node = Arc::make_mut(cur);
        match node.children.get_mut(octet) {
            Some(Child::Node(sub)) => cur = sub,
            _ => crate::error::corrupt(0, octet, "purge path entry is not a subnode"),
        }
    }
    cur
}

// --------------------------------------------------------------------- get

/// §4.6.
pub fn get<V: Clone, P: PrefixTable<V>>(root: &StrideNode<V, P>, pfx: &Prefix) -> Option<V> {
    let path = StridePath::new(pfx.is_v4(), &octets_of(pfx));
    get_rec(root, &path, 0, pfx)
}

fn get_rec<V: Clone, P: PrefixTable<V>>(
    node: &StrideNode<V, P>,
    path: &StridePath,
    depth: u8,
    pfx: &Prefix,
) -> Option<V> {
    let (last_one, last_bits) = last_octet_plus_one_and_last_bits(pfx.len());
    if depth == last_one {
        let octet = path.octet(depth as usize);
        return node.prefixes.get(pfx_to_idx(octet, last_bits)).cloned();
    }
    let octet = path.octet(depth as usize);
    match node.children.get(octet) {
        None => None,
        Some(Child::Node(sub)) => get_rec(sub, path, depth + 1, pfx),
        Some(Child::Leaf(leaf)) => (leaf.prefix == *pfx).then(|| leaf.value.clone()),
        Some(Child::Fringe(fringe)) => {
            is_fringe_here(depth, last_one, last_bits).then(|| fringe.value.clone())
        }
    }
}

// ------------------------------------------------------------------ modify

/// §4.5: combined insert/delete in a single descent. Returns the size
/// delta.
pub fn modify<V, P, F>(root: &mut Arc<StrideNode<V, P>>, pfx: &Prefix, cb: F) -> i8
where
    V: Clone,
    P: PrefixTable<V> + Clone,
    F: FnOnce(Option<&V>) -> (Option<V>, bool),
{
    let existing = get(root, pfx);
    let (new_value, should_delete) = cb(existing.as_ref());
    match (existing.is_some(), should_delete, new_value) {
        (_, true, _) => {
            if delete(root, pfx) {
                -1
            } else {
                0
            }
        }
        (true, false, Some(v)) => {
            insert(root, pfx, v);
            0
        }
        (false, false, Some(v)) => {
            insert(root, pfx, v);
            1
        }
        (_, false, None) => 0,
    }
}

// --------------------------------------------------------- contains/lookup

/// §4.7: address LPM presence check.
pub fn contains<V: Clone, P: PrefixTable<V>>(root: &StrideNode<V, P>, addr: std::net::IpAddr) -> bool {
    lookup(root, addr).is_some()
}

/// §4.7: address LPM value lookup. Returns the matched prefix and value.
pub fn lookup<V: Clone, P: PrefixTable<V>>(
    root: &StrideNode<V, P>,
    addr: std::net::IpAddr,
) -> Option<(Prefix, V)> {
    let is_ipv4 = addr.is_ipv4();
    let octets = match addr {
        std::net::IpAddr::V4(a) => {
            let mut b = [0u8; 16];
            b[..4].copy_from_slice(&a.octets());
            b
        }
        std::net::IpAddr::V6(a) => a.octets(),
    };
    let path = StridePath::new(is_ipv4, &octets);
    let max_depth = if is_ipv4 { 4 } else { 16 };

    let mut best: Option<(u8, V)> = None;
    let mut node = root;
    for depth in 0..max_depth {
        let octet = path.octet(depth);
        if let Some((idx, v)) = node.prefixes.lookup(host_idx(octet)) {
            best = Some((depth as u8 * 8 + crate::bitset::idx_to_pfx(idx).1, v.clone()));
        }
        match node.children.get(octet) {
            None => break,
            Some(Child::Node(sub)) => node = sub,
            Some(Child::Leaf(leaf)) => {
                if leaf.prefix.contains(addr) && leaf.prefix.len() as usize >= best.as_ref().map(|(b, _)| *b as usize).unwrap_or(0) {
                    best = Some((leaf.prefix.len(), leaf.value.clone()));
                }
                break;
            }
            Some(Child::Fringe(fringe)) => {
                let fringe_bits = (depth as u8 + 1) * 8;
                if fringe_bits >= best.as_ref().map(|(b, _)| *b).unwrap_or(0) {
                    best = Some((fringe_bits, fringe.value.clone()));
                }
                break;
            }
        }
    }
    best.map(|(bits, v)| (cidr_from_path(&path, (bits / 8).min(max_depth as u8), is_ipv4, {
        let in_stride_bits = bits % 8;
        if in_stride_bits == 0 && bits != 0 {
            1
        } else {
            pfx_to_idx(path.octet((bits / 8) as usize), in_stride_bits)
        }
    }), v))
}

/// §4.6 variant used by `lookup_prefix`/`lookup_prefix_lpm`: exact lookup
/// plus, on miss, the longest-matching ancestor of `pfx` itself.
pub fn lookup_prefix_lpm<V: Clone, P: PrefixTable<V>>(
    root: &StrideNode<V, P>,
    pfx: &Prefix,
) -> Option<(Prefix, V)> {
    lookup(root, pfx.addr())
}

// ---------------------------------------------------------- supernets/subnets

/// §4.8: ancestors of `pfx` that are present in the trie, shallowest first.
pub fn supernets<V: Clone, P: PrefixTable<V>>(
    root: &StrideNode<V, P>,
    pfx: &Prefix,
    mut yield_fn: impl FnMut(Prefix, &V) -> bool,
) {
    let is_ipv4 = pfx.is_v4();
    let path = StridePath::new(is_ipv4, &octets_of(pfx));
    let (last_one, _) = last_octet_plus_one_and_last_bits(pfx.len());
    let mut node = root;
    'walk: for depth in 0..=last_one {
        let octet = path.octet(depth as usize);
        let h = host_idx(octet);
        let chain = LPM_LOOKUP[h as usize];
        for idx in chain.iter() {
            if idx == h && depth == last_one {
                // the query's own base index is not a supernet of itself
                continue;
            }
            if let Some(v) = node.prefixes.get(idx) {
                let p = cidr_from_path(&path, depth, is_ipv4, idx);
                if !yield_fn(p, v) {
                    return;
                }
            }
        }
        if depth == last_one {
            break;
        }
        match node.children.get(octet) {
            None => break 'walk,
            Some(Child::Node(sub)) => node = sub,
            Some(Child::Leaf(leaf)) => {
                if leaf.prefix.len() < pfx.len() && leaf.prefix.covers(*pfx) {
                    yield_fn(leaf.prefix, &leaf.value);
                }
                break 'walk;
            }
            Some(Child::Fringe(fringe)) => {
                let fringe_pfx = cidr_for_fringe(&path, depth + 1, is_ipv4, octet);
                if fringe_pfx.len() < pfx.len() && fringe_pfx.covers(*pfx) {
                    yield_fn(fringe_pfx, &fringe.value);
                }
                break 'walk;
            }
        }
    }
}

/// §4.8: every prefix in the trie that `pfx` covers, in `cmp_prefix` order.
pub fn subnets<V: Clone, P: PrefixTable<V>>(
    root: &StrideNode<V, P>,
    pfx: &Prefix,
    mut yield_fn: impl FnMut(Prefix, &V) -> bool,
) {
    let is_ipv4 = pfx.is_v4();
    let path = StridePath::new(is_ipv4, &octets_of(pfx));
    let (last_one, last_bits) = last_octet_plus_one_and_last_bits(pfx.len());
    let mut node = root;
    for depth in 0..last_one {
        let octet = path.octet(depth as usize);
        match node.children.get(octet) {
            None => return,
            Some(Child::Node(sub)) => node = sub,
            Some(Child::Leaf(leaf)) => {
                if pfx.covers(leaf.prefix) {
                    yield_fn(leaf.prefix, &leaf.value);
                }
                return;
            }
            Some(Child::Fringe(fringe)) => {
                let fringe_pfx = cidr_for_fringe(&path, depth + 1, is_ipv4, octet);
                if pfx.covers(fringe_pfx) {
                    yield_fn(fringe_pfx, &fringe.value);
                }
                return;
            }
        }
    }
    let query_idx = pfx_to_idx(path.octet(last_one as usize), last_bits);
    let mut results: Vec<(Prefix, V)> = Vec::new();
    collect_subnet_prefixes(node, &path, last_one, query_idx, &mut results);
    results.sort_by(|a, b| cmp_prefix(&a.0, &b.0));
    for (p, v) in &results {
        if !yield_fn(*p, v) {
            return;
        }
    }
}

fn collect_subnet_prefixes<V: Clone, P: PrefixTable<V>>(
    node: &StrideNode<V, P>,
    path: &StridePath,
    depth: u8,
    query_idx: u8,
    out: &mut Vec<(Prefix, V)>,
) {
    let covered = PFX_ROUTES[query_idx as usize];
    for idx in node.prefixes.bitset().iter() {
        if covered.test(idx) {
            if let Some(v) = node.prefixes.get(idx) {
                out.push((cidr_from_path(path, depth, true_family(path), idx), v.clone()));
            }
        }
    }
    let octets_in_range = FRINGE_ROUTES[query_idx as usize];
    for (octet, child) in node.children.iter() {
        if !octets_in_range.test(octet) {
            continue;
        }
        match child {
            Child::Node(sub) => {
                let mut child_path = *path;
                child_path.set_octet(depth as usize, octet);
                collect_all_prefixes(sub, &child_path, depth + 1, out);
            }
            Child::Leaf(leaf) => out.push((leaf.prefix, leaf.value.clone())),
            Child::Fringe(fringe) => {
                let p = cidr_for_fringe(path, depth + 1, true_family(path), octet);
                out.push((p, fringe.value.clone()));
            }
        }
    }
}

fn collect_all_prefixes<V: Clone, P: PrefixTable<V>>(
    node: &StrideNode<V, P>,
    path: &StridePath,
    depth: u8,
    out: &mut Vec<(Prefix, V)>,
) {
    for idx in node.prefixes.bitset().iter() {
        if let Some(v) = node.prefixes.get(idx) {
            out.push((cidr_from_path(path, depth, true_family(path), idx), v.clone()));
        }
    }
    for (octet, child) in node.children.iter() {
        match child {
            Child::Node(sub) => {
                let mut child_path = *path;
                child_path.set_octet(depth as usize, octet);
                collect_all_prefixes(sub, &child_path, depth + 1, out);
            }
            Child::Leaf(leaf) => out.push((leaf.prefix, leaf.value.clone())),
            Child::Fringe(fringe) => {
                let p = cidr_for_fringe(path, depth + 1, true_family(path), octet);
                out.push((p, fringe.value.clone()));
            }
        }
    }
}

#[inline]
fn true_family(path: &StridePath) -> bool {
    path.is_ipv4()
}

// ----------------------------------------------------------------- overlaps

const OVERLAPS_CHILDREN_THRESHOLD: usize = 15;

/// §6 `overlaps`: whether any prefix in the trie rooted at `a` overlaps any
/// prefix in the trie rooted at `b`.
pub fn overlaps<V, P: PrefixTable<V>>(a: &StrideNode<V, P>, b: &StrideNode<V, P>) -> bool {
    overlaps_at_depth(a, b, 0)
}

/// §4.9 `Overlaps(a, b, depth)`: `depth` is the absolute tree depth (in
/// strides) both `a` and `b` sit at, threaded through so that a node×leaf
/// crossover below the top level looks up the leaf's octets at the right
/// position instead of restarting from octet 0.
fn overlaps_at_depth<V, P: PrefixTable<V>>(
    a: &StrideNode<V, P>,
    b: &StrideNode<V, P>,
    depth: u8,
) -> bool {
    if overlaps_routes(a, b) {
        return true;
    }
    let (n, o) = if a.children.len() > b.children.len() { (b, a) } else { (a, b) };
    if overlaps_children_in(n, o) || overlaps_children_in(o, n) {
        return true;
    }
    for (octet, a_child) in a.children.iter() {
        if let Some(b_child) = b.children.get(octet) {
            if overlaps_two_children(a_child, b_child, depth + 1) {
                return true;
            }
        }
    }
    false
}

fn overlaps_routes<V, P: PrefixTable<V>>(a: &StrideNode<V, P>, b: &StrideNode<V, P>) -> bool {
    if a.prefixes.bitset().intersects(b.prefixes.bitset()) {
        return true;
    }
    for idx in a.prefixes.bitset().iter() {
        if b.prefixes.contains(idx) {
            return true;
        }
    }
    for idx in b.prefixes.bitset().iter() {
        if a.prefixes.contains(idx) {
            return true;
        }
    }
    false
}

fn overlaps_children_in<V, P: PrefixTable<V>>(n: &StrideNode<V, P>, o: &StrideNode<V, P>) -> bool {
    if n.prefixes.len() > OVERLAPS_CHILDREN_THRESHOLD {
        for idx in n.prefixes.bitset().iter() {
            if o.children.occupied().intersects(&FRINGE_ROUTES[idx as usize]) {
                return true;
            }
        }
    } else {
        for (octet, _) in o.children.iter() {
            if n.prefixes.contains(host_idx(octet)) {
                return true;
            }
        }
    }
    false
}

/// `depth` is the absolute tree depth of both `a` and `b` (one level below
/// the parent that owns this same-address child pair).
fn overlaps_two_children<V, P: PrefixTable<V>>(
    a: &Child<V, P>,
    b: &Child<V, P>,
    depth: u8,
) -> bool {
    match (a, b) {
        (Child::Node(an), Child::Node(bn)) => overlaps_at_depth(an, bn, depth),
        (Child::Node(n), Child::Leaf(l)) | (Child::Leaf(l), Child::Node(n)) => {
            overlaps_prefix_at_depth(n, &l.prefix, depth)
        }
        (Child::Node(_), Child::Fringe(_)) | (Child::Fringe(_), Child::Node(_)) => true,
        (Child::Leaf(a), Child::Leaf(b)) => a.prefix.covers(b.prefix) || b.prefix.covers(a.prefix),
        (Child::Leaf(_), Child::Fringe(_)) | (Child::Fringe(_), Child::Leaf(_)) => true,
        (Child::Fringe(_), Child::Fringe(_)) => true,
    }
}

/// Whether `pfx` overlaps anything reachable from `node`, which is `depth`
/// strides below `pfx`'s own root.
fn overlaps_prefix_at_depth<V, P: PrefixTable<V>>(
    node: &StrideNode<V, P>,
    pfx: &Prefix,
    depth: u8,
) -> bool {
    let path = StridePath::new(pfx.is_v4(), &octets_of(pfx));
    let (last_one, last_bits) = last_octet_plus_one_and_last_bits(pfx.len());
    let mut node = node;
    let mut depth = depth;
    loop {
        if depth >= last_one {
            let octet = path.octet(depth as usize);
            return node.prefixes.contains(pfx_to_idx(octet, last_bits));
        }
        let octet = path.octet(depth as usize);
        if node.prefixes.contains(host_idx(octet)) {
            return true;
        }
        match node.children.get(octet) {
            None => return false,
            Some(Child::Node(sub)) => {
                node = sub;
                depth += 1;
            }
            Some(Child::Leaf(leaf)) => return leaf.prefix.covers(*pfx) || pfx.covers(leaf.prefix),
            Some(Child::Fringe(_)) => return true,
        }
    }
}

/// §6 `overlaps_prefix`: whether `pfx` overlaps anything in the trie
/// rooted at `root`.
pub fn overlaps_prefix<V, P: PrefixTable<V>>(root: &StrideNode<V, P>, pfx: &Prefix) -> bool {
    overlaps_prefix_at_depth(root, pfx, 0)
}

/// §4.9 `overlaps_idx`.
pub fn overlaps_idx<V, P: PrefixTable<V>>(node: &StrideNode<V, P>, idx: u8) -> bool {
    node.prefixes.contains(idx)
        || node.prefixes.bitset().intersects(&PFX_ROUTES[idx as usize])
        || node.children.occupied().intersects(&FRINGE_ROUTES[idx as usize])
}

// -------------------------------------------------------------------- union

/// §4.10: merge `b` into `a` in place, returning the number of collisions.
pub fn union<V: Clone, P: PrefixTable<V> + Clone>(
    a: &mut Arc<StrideNode<V, P>>,
    b: &StrideNode<V, P>,
) -> usize {
    let mut duplicates = 0;
    let a_mut = Arc::make_mut(a);
    for idx in b.prefixes.bitset().iter() {
        if let Some(v) = b.prefixes.get(idx) {
            if a_mut.prefixes.insert(idx, v.clone()) {
                duplicates += 1;
            }
        }
    }
    let b_octets: Vec<u8> = b.children.iter().map(|(o, _)| o).collect();
    for octet in b_octets {
        let b_child = b.children.must_get(octet);
        duplicates += union_child(a, octet, b_child);
    }
    duplicates
}

fn union_child<V: Clone, P: PrefixTable<V> + Clone>(
    a: &mut Arc<StrideNode<V, P>>,
    octet: u8,
    b_child: &Child<V, P>,
) -> usize {
    let a_mut = Arc::make_mut(a);
    let existing = a_mut.children.get(octet).cloned();
    match (existing, b_child) {
        (None, Child::Node(bn)) => {
            let mut cloned = Arc::new(StrideNode::new_child());
            let dup = union(&mut cloned, bn);
            Arc::make_mut(a).children.insert_at(octet, Child::Node(cloned));
            dup
        }
        (None, Child::Leaf(bl)) => {
            Arc::make_mut(a)
                .children
                .insert_at(octet, Child::Leaf(Arc::new((**bl).clone())));
            0
        }
        (None, Child::Fringe(bf)) => {
            Arc::make_mut(a)
                .children
                .insert_at(octet, Child::Fringe(Arc::new((**bf).clone())));
            0
        }
        (Some(Child::Node(mut an)), Child::Node(bn)) => {
            let dup = union(&mut an, bn);
            Arc::make_mut(a).children.insert_at(octet, Child::Node(an));
            dup
        }
        (Some(Child::Node(mut an)), Child::Leaf(bl)) => {
            let path = StridePath::new(bl.prefix.is_v4(), &octets_of(&bl.prefix));
            insert_rec(&mut an, &path, 1, &bl.prefix, bl.value.clone());
            Arc::make_mut(a).children.insert_at(octet, Child::Node(an));
            0
        }
        (Some(Child::Node(mut an)), Child::Fringe(bf)) => {
            Arc::make_mut(&mut an).prefixes.insert(1, bf.value.clone());
            Arc::make_mut(a).children.insert_at(octet, Child::Node(an));
            0
        }
        (Some(Child::Leaf(al)), Child::Node(bn)) => {
            let mut sub = Arc::new(StrideNode::<V, P>::new_child());
            let path = StridePath::new(al.prefix.is_v4(), &octets_of(&al.prefix));
            insert_rec(&mut sub, &path, 1, &al.prefix, al.value.clone());
            let dup = union(&mut sub, bn);
            Arc::make_mut(a).children.insert_at(octet, Child::Node(sub));
            dup
        }
        (Some(Child::Leaf(al)), Child::Leaf(bl)) => {
            if al.prefix == bl.prefix {
                Arc::make_mut(a)
                    .children
                    .insert_at(octet, Child::Leaf(Arc::new((**bl).clone())));
                1
            } else {
                let mut sub = Arc::new(StrideNode::<V, P>::new_child());
                let ap = StridePath::new(al.prefix.is_v4(), &octets_of(&al.prefix));
                insert_rec(&mut sub, &ap, 1, &al.prefix, al.value.clone());
                let bp = StridePath::new(bl.prefix.is_v4(), &octets_of(&bl.prefix));
                insert_rec(&mut sub, &bp, 1, &bl.prefix, bl.value.clone());
                Arc::make_mut(a).children.insert_at(octet, Child::Node(sub));
                0
            }
        }
        (Some(Child::Leaf(al)), Child::Fringe(bf)) => {
            let mut sub = Arc::new(StrideNode::<V, P>::new_child());
            let ap = StridePath::new(al.prefix.is_v4(), &octets_of(&al.prefix));
            insert_rec(&mut sub, &ap, 1, &al.prefix, al.value.clone());
            Arc::make_mut(&mut sub).prefixes.insert(1, bf.value.clone());
            Arc::make_mut(a).children.insert_at(octet, Child::Node(sub));
            0
        }
        (Some(Child::Fringe(_)), Child::Node(bn)) => {
            let mut sub = Arc::new(StrideNode::<V, P>::new_child());
            let dup = union(&mut sub, bn);
            Arc::make_mut(a).children.insert_at(octet, Child::Node(sub));
            dup
        }
        (Some(Child::Fringe(_)), Child::Leaf(bl)) => {
            Arc::make_mut(a)
                .children
                .insert_at(octet, Child::Leaf(Arc::new((**bl).clone())));
            0
        }
        (Some(Child::Fringe(_)), Child::Fringe(bf)) => {
            Arc::make_mut(a)
                .children
                .insert_at(octet, Child::Fringe(Arc::new((**bf).clone())));
            1
        }
    }
}

// -------------------------------------------------------------------- equal

/// §4.12: structural equality with a caller-supplied value equality.
pub fn equal<V, P: PrefixTable<V>>(
    a: &StrideNode<V, P>,
    b: &StrideNode<V, P>,
    value_eq: &impl Fn(&V, &V) -> bool,
) -> bool {
    if a.prefixes.bitset() != b.prefixes.bitset() {
        return false;
    }
    if a.children.occupied() != b.children.occupied() {
        return false;
    }
    for idx in a.prefixes.bitset().iter() {
        match (a.prefixes.get(idx), b.prefixes.get(idx)) {
            (Some(av), Some(bv)) if value_eq(av, bv) => {}
            _ => return false,
        }
    }
    for (octet, a_child) in a.children.iter() {
        let b_child = b.children.must_get(octet);
        let ok = match (a_child, b_child) {
            (Child::Node(an), Child::Node(bn)) => equal(an, bn, value_eq),
            (Child::Leaf(al), Child::Leaf(bl)) => {
                al.prefix == bl.prefix && value_eq(&al.value, &bl.value)
            }
            (Child::Fringe(af), Child::Fringe(bf)) => value_eq(&af.value, &bf.value),
            _ => false,
        };
        if !ok {
            return false;
        }
    }
    true
}

// --------------------------------------------------------------- enumerate

/// §4.13: visit every stored prefix in arbitrary order.
pub fn all_rec<V, P: PrefixTable<V>>(
    node: &StrideNode<V, P>,
    path: &StridePath,
    depth: u8,
    yield_fn: &mut impl FnMut(Prefix, &V) -> bool,
) -> bool {
    for idx in node.prefixes.bitset().iter() {
        if let Some(v) = node.prefixes.get(idx) {
            if !yield_fn(cidr_from_path(path, depth, true_family(path), idx), v) {
                return false;
            }
        }
    }
    for (octet, child) in node.children.iter() {
        match child {
            Child::Node(sub) => {
                let mut child_path = *path;
                child_path.set_octet(depth as usize, octet);
                if !all_rec(sub, &child_path, depth + 1, yield_fn) {
                    return false;
                }
            }
            Child::Leaf(leaf) => {
                if !yield_fn(leaf.prefix, &leaf.value) {
                    return false;
                }
            }
            Child::Fringe(fringe) => {
                let p = cidr_for_fringe(path, depth + 1, true_family(path), octet);
                if !yield_fn(p, &fringe.value) {
                    return false;
                }
            }
        }
    }
    true
}

/// §4.13: visit every stored prefix in `cmp_prefix` order.
pub fn all_rec_sorted<V: Clone, P: PrefixTable<V>>(
    node: &StrideNode<V, P>,
    path: &StridePath,
    depth: u8,
    yield_fn: &mut impl FnMut(Prefix, &V) -> bool,
) -> bool {
    let mut own: Vec<(Prefix, V)> = node
        .prefixes
        .bitset()
        .iter()
        .filter_map(|idx| node.prefixes.get(idx).map(|v| (cidr_from_path(path, depth, true_family(path), idx), v.clone())))
        .collect();
    own.sort_by(|a, b| cmp_prefix(&a.0, &b.0));
    for (p, v) in &own {
        if !yield_fn(*p, v) {
            return false;
        }
    }
    for (octet, child) in node.children.iter() {
        match child {
            Child::Node(sub) => {
                let mut child_path = *path;
                child_path.set_octet(depth as usize, octet);
                if !all_rec_sorted(sub, &child_path, depth + 1, yield_fn) {
                    return false;
                }
            }
            Child::Leaf(leaf) => {
                if !yield_fn(leaf.prefix, &leaf.value) {
                    return false;
                }
            }
            Child::Fringe(fringe) => {
                let p = cidr_for_fringe(path, depth + 1, true_family(path), octet);
                if !yield_fn(p, &fringe.value) {
                    return false;
                }
            }
        }
    }
    true
}

/// §4.13: items directly covered by `parent_idx` at this node (used by the
/// hierarchical tree formatter).
pub fn direct_items_rec<V: Clone, P: PrefixTable<V>>(
    node: &StrideNode<V, P>,
    path: &StridePath,
    depth: u8,
    parent_idx: u8,
) -> Vec<(Prefix, V)> {
    let mut out = Vec::new();
    for idx in node.prefixes.bitset().iter() {
        let nearest = nearest_set_ancestor(node, idx);
        if nearest == parent_idx {
            if let Some(v) = node.prefixes.get(idx) {
                out.push((cidr_from_path(path, depth, true_family(path), idx), v.clone()));
            }
        }
    }
    for (octet, child) in node.children.iter() {
        let h = host_idx(octet);
        let nearest = nearest_set_ancestor(node, h);
        if nearest != parent_idx {
            continue;
        }
        match child {
            Child::Leaf(leaf) => out.push((leaf.prefix, leaf.value.clone())),
            Child::Fringe(fringe) => {
                out.push((cidr_for_fringe(path, depth + 1, true_family(path), octet), fringe.value.clone()));
            }
            Child::Node(_) => {}
        }
    }
    out
}

fn nearest_set_ancestor<V, P: PrefixTable<V>>(node: &StrideNode<V, P>, mut idx: u8) -> u8 {
    if node.prefixes.bitset().test(idx) {
        return idx;
    }
    idx >>= 1;
    while idx != 0 {
        if node.prefixes.bitset().test(idx) {
            return idx;
        }
        idx >>= 1;
    }
    0
}

/// §4.13/§11: a line-oriented, indentation-based tree dump, one line per
/// stored prefix, nested under the stride node that owns it.
pub fn dump_tree<V: Clone + std::fmt::Display, P: PrefixTable<V>>(
    node: &StrideNode<V, P>,
    path: &StridePath,
    depth: u8,
    indent: usize,
    out: &mut String,
) {
    use std::fmt::Write;
    for (pfx, v) in all_rec_sorted_owned(node, path, depth) {
        let _ = writeln!(out, "{}{pfx} = {v}", "  ".repeat(indent));
    }
    for (octet, child) in node.children.iter() {
        if let Child::Node(sub) = child {
            let mut child_path = *path;
            child_path.set_octet(depth as usize, octet);
            dump_tree(sub, &child_path, depth + 1, indent + 1, out);
        }
    }
}

fn all_rec_sorted_owned<V: Clone, P: PrefixTable<V>>(
    node: &StrideNode<V, P>,
    path: &StridePath,
    depth: u8,
) -> Vec<(Prefix, V)> {
    let mut own: Vec<(Prefix, V)> = node
        .prefixes
        .bitset()
        .iter()
        .filter_map(|idx| {
            node.prefixes
                .get(idx)
                .map(|v| (cidr_from_path(path, depth, true_family(path), idx), v.clone()))
        })
        .collect();
    for (octet, child) in node.children.iter() {
        match child {
            Child::Leaf(leaf) => own.push((leaf.prefix, leaf.value.clone())),
            Child::Fringe(fringe) => {
                own.push((cidr_for_fringe(path, depth + 1, true_family(path), octet), fringe.value.clone()))
            }
            Child::Node(_) => {}
        }
    }
    own.sort_by(|a, b| cmp_prefix(&a.0, &b.0));
    own
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prefix_table::FastTable;

    type TestNode = StrideNode<u32, FastTable<u32>>;

    fn pfx(s: &str) -> Prefix {
        s.parse().unwrap()
    }

    #[test]
    fn insert_then_get_roundtrips() {
        let mut root = Arc::new(TestNode::new_child());
        assert!(!insert(&mut root, &pfx("10.0.0.0/8"), 1));
        assert_eq!(get(&root, &pfx("10.0.0.0/8")), Some(1));
        assert_eq!(get(&root, &pfx("10.0.0.0/9")), None);
    }

    #[test]
    fn insert_fringe_at_stride_boundary() {
        let mut root = Arc::new(TestNode::new_child());
        insert(&mut root, &pfx("10.20.0.0/16"), 42);
        assert_eq!(get(&root, &pfx("10.20.0.0/16")), Some(42));
    }

    #[test]
    fn insert_more_specific_then_less_specific() {
        let mut root = Arc::new(TestNode::new_child());
        insert(&mut root, &pfx("192.168.1.0/24"), 1);
        insert(&mut root, &pfx("192.168.0.0/16"), 2);
        assert_eq!(get(&root, &pfx("192.168.1.0/24")), Some(1));
        assert_eq!(get(&root, &pfx("192.168.0.0/16")), Some(2));
    }

    #[test]
    fn lookup_address_finds_longest_match() {
        let mut root = Arc::new(TestNode::new_child());
        insert(&mut root, &pfx("10.0.0.0/8"), 1);
        insert(&mut root, &pfx("10.1.0.0/16"), 2);
        let (p, v) = lookup(&root, "10.1.2.3".parse().unwrap()).unwrap();
        assert_eq!(v, 2);
        assert_eq!(p, pfx("10.1.0.0/16"));
        let (p, v) = lookup(&root, "10.2.2.3".parse().unwrap()).unwrap();
        assert_eq!(v, 1);
        assert_eq!(p, pfx("10.0.0.0/8"));
    }

    #[test]
    fn delete_inverse_of_insert() {
        let mut root = Arc::new(TestNode::new_child());
        insert(&mut root, &pfx("10.0.0.0/8"), 1);
        assert!(delete(&mut root, &pfx("10.0.0.0/8")));
        assert_eq!(get(&root, &pfx("10.0.0.0/8")), None);
        assert!(root.is_empty());
    }

    #[test]
    fn delete_triggers_purge_and_compress() {
        let mut root = Arc::new(TestNode::new_child());
        insert(&mut root, &pfx("10.1.0.0/16"), 1);
        insert(&mut root, &pfx("10.2.0.0/16"), 2);
        delete(&mut root, &pfx("10.2.0.0/16"));
        assert_eq!(get(&root, &pfx("10.1.0.0/16")), Some(1));
        assert_eq!(root.stats_rec().prefixes + root.stats_rec().leaves + root.stats_rec().fringes, 1);
    }

    #[test]
    fn persistent_insert_leaves_old_root_untouched() {
        let mut root = Arc::new(TestNode::new_child());
        insert(&mut root, &pfx("10.0.0.0/8"), 1);
        let mut snapshot = Arc::clone(&root);
        insert(&mut snapshot, &pfx("11.0.0.0/8"), 2);
        assert_eq!(get(&root, &pfx("11.0.0.0/8")), None);
        assert_eq!(get(&snapshot, &pfx("11.0.0.0/8")), Some(2));
        assert_eq!(get(&root, &pfx("10.0.0.0/8")), Some(1));
    }

    #[test]
    fn equal_and_union() {
        let mut a = Arc::new(TestNode::new_child());
        insert(&mut a, &pfx("10.0.0.0/8"), 1);
        let mut b = Arc::new(TestNode::new_child());
        insert(&mut b, &pfx("10.0.0.0/8"), 1);
        assert!(equal(&a, &b, &|x, y| x == y));
        insert(&mut b, &pfx("11.0.0.0/8"), 2);
        assert!(!equal(&a, &b, &|x, y| x == y));
        let dup = union(&mut a, &b);
        assert_eq!(dup, 1);
        assert_eq!(get(&a, &pfx("11.0.0.0/8")), Some(2));
    }

    #[test]
    fn all_sorted_orders_by_address_then_length() {
        let mut root = Arc::new(TestNode::new_child());
        insert(&mut root, &pfx("10.1.0.0/16"), 1);
        insert(&mut root, &pfx("10.0.0.0/8"), 2);
        let path = StridePath::new(true, &[0; 16]);
        let mut out = Vec::new();
        all_rec_sorted(&root, &path, 0, &mut |p, v| {
            out.push((p, *v));
            true
        });
        assert_eq!(out, vec![(pfx("10.0.0.0/8"), 2), (pfx("10.1.0.0/16"), 1)]);
    }
}
