//! weak-hashmap: A single-threaded hash map that holds its keys weakly and
//! reports the values of entries whose keys were reclaimed.
//!
//! Internal Design:
//!
//! Summary
//! - Goal: a map whose entries disappear on their own once nothing else
//!   holds their key, with an observer told about every such eviction.
//! - Layers:
//!   - Tracked<T> / WeakHandle<T> / ReclaimQueue (`reclaim`): Rc-backed
//!     key handles. When the last `Tracked` clone of a key is dropped, the
//!     key's destructor posts a ticket to the queue of every table entry
//!     that registered with it.
//!   - BucketTable<K, V>: structural table. Power-of-two bucket array,
//!     singly linked collision chains threaded through a generational
//!     arena, cached per-entry hashes, transfer between bucket arrays.
//!   - WeakKeyMap<K, V, H, S>: public API. Drains its queue before every
//!     operation, expunges the entries named by the tickets, and hands
//!     their values to the `StaleEntryHook`.
//!
//! Constraints
//! - Single-threaded: `!Send`/`!Sync` by construction (built on `Rc`).
//! - Drain-before-op: every public operation observes a table reconciled
//!   with every key that died before the call.
//! - Each reclaimed entry reaches the hook exactly once; `remove` and
//!   `clear` never call it.
//! - Capacity grows by doubling, never shrinks, and stops at
//!   `MAXIMUM_CAPACITY`.
//!
//! Why arena + links?
//! - Chains of arena keys give the classic chained table without an
//!   internal pointer graph.
//! - Arena keys are generational, so they double as reclamation tickets: a
//!   ticket for an entry that was already removed fails to resolve and is
//!   skipped.
//!
//! Hasher and rehashing invariants
//! - Each entry caches a 32-bit hash computed at insertion from the live
//!   key. Relocation during resize uses only the cached hash, so entries
//!   whose key died mid-operation can still be moved or released.
//! - The `BuildHasher` output is folded to 32 bits and passed through a
//!   supplemental mixing function before masking, which keeps poor hash
//!   functions from piling entries into a few buckets.
//!
//! Resize and anti-thrashing
//! - Growth is attempted when the live count reaches the threshold after an
//!   insertion. Entries with dead keys are dropped during transfer. If fewer
//!   than half the old threshold survive, the transfer is undone and the
//!   smaller array kept; the caller is not told.
//!
//! Notes and non-goals
//! - No iteration views; `entry_set` reports `Error::Unsupported`.
//! - A panicking hook is contained and logged; the drain carries on.
//! - Values are plain owned data. A value may hold the last handle to
//!   another key; that key's entry is then expunged by the same drain.

mod bucket_table;
mod bucket_table_proptest;
mod error;
mod reclaim;
mod weak_key_map;

// Public surface
pub use bucket_table::{DEFAULT_INITIAL_CAPACITY, DEFAULT_LOAD_FACTOR, MAXIMUM_CAPACITY};
pub use error::Error;
pub use reclaim::{Tracked, WeakHandle};
pub use weak_key_map::{Discard, StaleEntryHook, WeakKeyMap};

#[cfg(feature = "bench_internal")]
pub use bucket_table::{supplemental_hash, BucketTable, Buckets, Handle};
