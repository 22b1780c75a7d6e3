//! End-to-end scenarios against the public `Table` API (§8): LPM chains,
//! stride-boundary fringes, symmetric overlap, supernet ordering,
//! purge-and-compress as delete's exact inverse, and persistent-snapshot
//! isolation.

use std::net::IpAddr;
use std::str::FromStr;

use octrie::{FastTrie, LiteTrie, Prefix};

fn pfx(s: &str) -> Prefix {
    Prefix::from_str(s).unwrap()
}

fn addr(s: &str) -> IpAddr {
    s.parse().unwrap()
}

#[test]
fn lpm_chain_finds_most_specific() {
    let t: FastTrie<&'static str> = FastTrie::try_new().unwrap();
    t.insert(&pfx("10.0.0.0/8"), "a");
    t.insert(&pfx("10.1.0.0/16"), "b");
    t.insert(&pfx("10.1.2.0/24"), "c");

    let (p, v) = t.lookup(addr("10.1.2.42")).unwrap();
    assert_eq!(p, pfx("10.1.2.0/24"));
    assert_eq!(v, "c");

    let (p, v) = t.lookup(addr("10.1.9.9")).unwrap();
    assert_eq!(p, pfx("10.1.0.0/16"));
    assert_eq!(v, "b");

    let (p, v) = t.lookup(addr("10.9.9.9")).unwrap();
    assert_eq!(p, pfx("10.0.0.0/8"));
    assert_eq!(v, "a");

    assert!(t.lookup(addr("11.0.0.0")).is_none());
}

#[test]
fn stride_boundary_fringe_roundtrips() {
    let t: FastTrie<u32> = FastTrie::try_new().unwrap();
    assert!(!t.insert(&pfx("192.168.1.0/24"), 1));
    assert_eq!(t.get(&pfx("192.168.1.0/24")), Some(1));
    assert!(t.contains(addr("192.168.1.5")));
    assert!(t.delete(&pfx("192.168.1.0/24")));
    assert_eq!(t.get(&pfx("192.168.1.0/24")), None);
}

#[test]
fn overlaps_is_symmetric() {
    let a: FastTrie<u32> = FastTrie::try_new().unwrap();
    let b: FastTrie<u32> = FastTrie::try_new().unwrap();
    a.insert(&pfx("10.0.0.0/8"), 1);
    b.insert(&pfx("10.1.0.0/16"), 2);
    assert!(a.overlaps(&b));
    assert!(b.overlaps(&a));

    let c: FastTrie<u32> = FastTrie::try_new().unwrap();
    c.insert(&pfx("192.0.2.0/24"), 3);
    assert!(!a.overlaps(&c));
    assert!(!c.overlaps(&a));
}

/// A node×leaf crossover two levels down: `a` has a subnode at tree-depth 2
/// (under shared octets `1.5`), `b` has a leaf one octet further in. The
/// overlap test must look up the leaf's octets at the node's real depth,
/// not restart from octet 0.
#[test]
fn overlaps_finds_node_leaf_crossover_below_top_level() {
    let a: FastTrie<u32> = FastTrie::try_new().unwrap();
    a.insert(&pfx("1.5.1.0/24"), 1);
    a.insert(&pfx("1.5.2.0/24"), 2);

    let b: FastTrie<u32> = FastTrie::try_new().unwrap();
    b.insert(&pfx("1.5.1.128/25"), 3);
    b.insert(&pfx("1.200.0.0/16"), 4);

    assert!(a.overlaps(&b));
    assert!(b.overlaps(&a));
}

#[test]
fn supernets_yields_ancestors_shallow_to_deep() {
    let t: FastTrie<u32> = FastTrie::try_new().unwrap();
    t.insert(&pfx("10.0.0.0/8"), 1);
    t.insert(&pfx("10.1.0.0/16"), 2);
    t.insert(&pfx("10.1.2.0/24"), 3);

    let mut seen = Vec::new();
    t.supernets(&pfx("10.1.2.0/24"), |p, v| {
        seen.push((p, *v));
        true
    });
    assert_eq!(seen, vec![(pfx("10.0.0.0/8"), 1), (pfx("10.1.0.0/16"), 2)]);
}

#[test]
fn subnets_collects_everything_covered() {
    let t: FastTrie<u32> = FastTrie::try_new().unwrap();
    t.insert(&pfx("10.1.0.0/16"), 1);
    t.insert(&pfx("10.1.2.0/24"), 2);
    t.insert(&pfx("10.2.0.0/16"), 3);

    let mut seen = Vec::new();
    t.subnets(&pfx("10.0.0.0/8"), |p, v| {
        seen.push((p, *v));
        true
    });
    assert_eq!(
        seen,
        vec![(pfx("10.1.0.0/16"), 1), (pfx("10.1.2.0/24"), 2), (pfx("10.2.0.0/16"), 3)]
    );
}

#[test]
fn delete_is_the_exact_inverse_of_insert() {
    let t: FastTrie<u32> = FastTrie::try_new().unwrap();
    let prefixes = [
        "10.0.0.0/8",
        "10.1.0.0/16",
        "10.1.2.0/24",
        "10.1.2.128/25",
        "172.16.0.0/12",
    ];
    for (i, p) in prefixes.iter().enumerate() {
        t.insert(&pfx(p), i as u32);
    }
    for p in prefixes.iter().rev() {
        assert!(t.delete(&pfx(p)), "expected {p} to exist before delete");
    }
    let mut count = 0;
    t.all(|_, _| {
        count += 1;
        true
    });
    assert_eq!(count, 0, "trie should be fully empty after deleting everything inserted");
}

#[test]
fn persistent_snapshot_is_isolated_from_later_mutation() {
    let base: FastTrie<u32> = FastTrie::try_new().unwrap();
    base.insert(&pfx("10.0.0.0/8"), 1);

    let (snap, existed) = base.insert_persist(&pfx("10.1.0.0/16"), 2);
    assert!(!existed);

    assert_eq!(base.get(&pfx("10.1.0.0/16")), None);
    assert_eq!(snap.get(&pfx("10.1.0.0/16")), Some(2));
    assert_eq!(snap.get(&pfx("10.0.0.0/8")), Some(1));

    base.insert(&pfx("192.0.2.0/24"), 3);
    assert_eq!(snap.get(&pfx("192.0.2.0/24")), None);
}

#[test]
fn insert_order_does_not_affect_final_shape() {
    let a: FastTrie<u32> = FastTrie::try_new().unwrap();
    let b: FastTrie<u32> = FastTrie::try_new().unwrap();
    let prefixes = [
        ("10.0.0.0/8", 1u32),
        ("10.1.0.0/16", 2),
        ("10.1.2.0/24", 3),
        ("192.168.0.0/16", 4),
    ];
    for (p, v) in prefixes.iter() {
        a.insert(&pfx(p), *v);
    }
    for (p, v) in prefixes.iter().rev() {
        b.insert(&pfx(p), *v);
    }
    assert!(a.equal(&b));
}

#[test]
fn union_is_idempotent() {
    let a: FastTrie<u32> = FastTrie::try_new().unwrap();
    a.insert(&pfx("10.0.0.0/8"), 1);
    let b: FastTrie<u32> = FastTrie::try_new().unwrap();
    b.insert(&pfx("10.1.0.0/16"), 2);

    a.union(&b);
    let snapshot_count = {
        let mut n = 0;
        a.all(|_, _| {
            n += 1;
            true
        });
        n
    };
    a.union(&b);
    let mut n = 0;
    a.all(|_, _| {
        n += 1;
        true
    });
    assert_eq!(n, snapshot_count, "re-union of the same table must not duplicate entries");
}

#[test]
fn lite_trie_tracks_presence_only() {
    let t: LiteTrie = LiteTrie::try_new().unwrap();
    assert!(!t.insert(&pfx("10.0.0.0/8"), ()));
    assert!(t.contains(addr("10.1.2.3")));
    assert!(!t.contains(addr("11.0.0.0")));
    assert!(t.delete(&pfx("10.0.0.0/8")));
    assert!(!t.contains(addr("10.1.2.3")));
}

#[test]
fn ipv6_lpm_and_dump_round_trip() {
    let t: FastTrie<u32> = FastTrie::try_new().unwrap();
    t.insert(&pfx("2001:db8::/32"), 1);
    t.insert(&pfx("2001:db8:1::/48"), 2);

    let (p, v) = t.lookup(addr("2001:db8:1::1")).unwrap();
    assert_eq!(p, pfx("2001:db8:1::/48"));
    assert_eq!(v, 2);

    let dump = t.dump();
    assert!(dump.contains("2001:db8::/32"));
    assert!(dump.contains("2001:db8:1::/48"));
}
