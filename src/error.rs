//! Error taxonomy (§7).
//!
//! Only one condition in the core is a recoverable, caller-facing error:
//! constructing an allotment-flavored trie (`Bart`/`Fast`) over a
//! zero-sized value type. Everything else in §7 — a non-canonical prefix,
//! a wrong-family prefix, an impossible child-slot variant, an unreachable
//! trie-walk fallthrough — is a programmer error and panics with enough
//! context to reproduce, rather than threading a `Result` through every
//! operation that is not supposed to fail in normal use.

use std::fmt;

/// Errors returned by fallible core constructors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrieError {
    /// The allotment flavors (`BartNode`/`FastNode`) distinguish a base
    /// index's own value from an inherited one by writing into distinct
    /// array cells; that collapses for a zero-sized `V`, so construction
    /// is rejected up front (§7, §9).
    ZeroSizedValue,
}

impl fmt::Display for TrieError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrieError::ZeroSizedValue => write!(
                f,
                "Error: the allotment flavor cannot be instantiated over \
                 a zero-sized value type; use the Lite flavor for a \
                 presence-only set instead."
            ),
        }
    }
}

impl std::error::Error for TrieError {}

/// Abort with context on an internal invariant violation (§7): a child
/// slot holding something other than `{Node, Leaf, Fringe}`, or a trie
/// walk that fell through without returning.
#[cold]
#[track_caller]
pub(crate) fn corrupt(depth: u8, octet: u8, what: &str) -> ! {
    log::error!(
        "trie invariant violation at depth {depth}, octet {octet}: {what}"
    );
    panic!(
        "trie corrupted: depth={depth} octet={octet}: {what}; \
         this indicates a bug in the trie implementation, not caller \
         misuse"
    );
}

/// Abort on a caller contract violation: a non-canonical or wrong-family
/// prefix (§7).
#[cold]
#[track_caller]
pub(crate) fn bad_prefix(msg: &str) -> ! {
    log::error!("rejected prefix: {msg}");
    panic!("caller contract violation: {msg}");
}
