#![allow(clippy::type_complexity)]

//! An 8-bit-stride multibit trie for IPv4/IPv6 prefixes, with path
//! compression and lock-free immutable-snapshot reads.
//!
//! Three interchangeable node flavors share one generic tree
//! implementation ([`prefix_table::PrefixTable`]): [`prefix_table::BartTable`]
//! and [`prefix_table::FastTable`] use the allotment trick for O(1) LPM
//! reads, while [`prefix_table::LiteTable`] stores presence only. The
//! [`table::Table`] wrapper synchronizes mutation behind a single-writer
//! mutex and publishes new roots atomically so readers never block
//! (§5/§6 of the design).

pub mod bitset;
pub mod error;
pub mod index;
pub mod node;
pub mod ops;
pub mod prefix_table;
pub mod table;

pub use error::TrieError;
pub use index::{cidr_for_fringe, cidr_from_path, cmp_prefix, idx_to_pfx, pfx_to_idx};
pub use inetnum::addr::Prefix;
pub use node::{Child, ChildrenArray, FringeNode, LeafNode, NodeKind, NodeStats, StrideNode};
pub use prefix_table::{BartTable, FastTable, LiteTable, PrefixTable};
pub use table::{BartTrie, FastTrie, LiteTrie, Table};
