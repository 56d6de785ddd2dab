//! BucketTable: structural layer. A power-of-two bucket array whose
//! singly linked collision chains thread through entries stored in a
//! generational arena.
//!
//! The table knows nothing about hashing keys or reclamation queues: callers
//! pass in precomputed hashes and equality predicates, and receive the values
//! of entries whose keys died while their chains were being transferred.
//! Arena keys double as reclamation tickets, so a ticket for an entry that was
//! already removed simply fails to resolve.

use crate::error::Error;
use crate::reclaim::WeakHandle;
use core::hash::{BuildHasher, Hash};
use log::error;
use slotmap::{DefaultKey, SlotMap};

/// Capacity used by constructors that do not take one.
pub const DEFAULT_INITIAL_CAPACITY: usize = 16;

/// Largest bucket array the table will allocate. Once reached, the resize
/// threshold is pinned and the table only grows its chains.
pub const MAXIMUM_CAPACITY: usize = 1 << 30;

/// Load factor used by constructors that do not take one.
pub const DEFAULT_LOAD_FACTOR: f32 = 0.75;

type Link = Option<DefaultKey>;

/// Stable reference to one entry. Survives resizes; never aliases a later
/// entry that reuses the same arena slot.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct Handle(DefaultKey);

impl Handle {
    pub(crate) fn new(k: DefaultKey) -> Self {
        Handle(k)
    }
    pub(crate) fn raw_handle(&self) -> DefaultKey {
        self.0
    }
}

/// A bucket array detached from its table by `rehash_into`.
#[derive(Debug)]
pub struct Buckets(Vec<Link>);

impl Buckets {
    pub fn capacity(&self) -> usize {
        self.0.len()
    }
}

#[derive(Debug)]
struct Entry<K, V> {
    key: WeakHandle<K>,
    value: V,
    // Computed once from the live key; used for relocation after it dies.
    hash: u32,
    next: Link,
}

pub struct BucketTable<K, V> {
    buckets: Vec<Link>,
    slots: SlotMap<DefaultKey, Entry<K, V>>,
    threshold: usize,
    load_factor: f32,
    // Power of two; `MAXIMUM_CAPACITY` outside of tests.
    max_capacity: usize,
}

/// Hash `q` with `hasher` and spread the result over the low bits.
pub fn make_hash<S, Q>(hasher: &S, q: &Q) -> u32
where
    S: BuildHasher,
    Q: ?Sized + Hash,
{
    let h = hasher.hash_one(q);
    supplemental_hash((h as u32) ^ ((h >> 32) as u32))
}

/// Mixes high bits into low bits so that hashes differing only in their upper
/// bits do not all collide under power-of-two masking.
pub fn supplemental_hash(mut h: u32) -> u32 {
    h ^= (h >> 20) ^ (h >> 12);
    h ^ (h >> 7) ^ (h >> 4)
}

#[inline]
fn index_for(hash: u32, capacity: usize) -> usize {
    hash as usize & (capacity - 1)
}

/// Bucket count for a requested capacity: clamped to `max_capacity`, then
/// rounded up to a power of two.
fn capacity_for(initial_capacity: usize, max_capacity: usize) -> usize {
    initial_capacity.min(max_capacity).next_power_of_two()
}

fn threshold_for(capacity: usize, load_factor: f32) -> usize {
    (capacity as f32 * load_factor) as usize
}

impl<K, V> BucketTable<K, V> {
    pub fn new() -> Self {
        Self::sized(DEFAULT_INITIAL_CAPACITY, DEFAULT_LOAD_FACTOR)
    }

    /// Validating constructor. The capacity is clamped to `MAXIMUM_CAPACITY`
    /// and rounded up to a power of two.
    pub fn with_capacity(initial_capacity: usize, load_factor: f32) -> Result<Self, Error> {
        // Also rejects NaN.
        if !(load_factor > 0.0) {
            return Err(Error::IllegalLoadFactor(load_factor));
        }
        Ok(Self::sized(initial_capacity, load_factor))
    }

    pub(crate) fn sized(initial_capacity: usize, load_factor: f32) -> Self {
        Self::bounded(initial_capacity, load_factor, MAXIMUM_CAPACITY)
    }

    pub(crate) fn bounded(initial_capacity: usize, load_factor: f32, max_capacity: usize) -> Self {
        debug_assert!(max_capacity.is_power_of_two());
        let capacity = capacity_for(initial_capacity, max_capacity);
        Self {
            buckets: vec![None; capacity],
            slots: SlotMap::with_key(),
            threshold: threshold_for(capacity, load_factor),
            load_factor,
            max_capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
    pub fn capacity(&self) -> usize {
        self.buckets.len()
    }
    pub fn threshold(&self) -> usize {
        self.threshold
    }
    pub fn load_factor(&self) -> f32 {
        self.load_factor
    }
    /// Largest bucket array this table may grow to.
    pub fn max_capacity(&self) -> usize {
        self.max_capacity
    }

    /// True once the live count has reached the resize threshold.
    pub fn needs_resize(&self) -> bool {
        self.len() >= self.threshold
    }

    /// Walk the chain for `hash`, returning the first entry whose cached hash
    /// matches and whose key satisfies `matches`.
    pub fn find<F>(&self, hash: u32, mut matches: F) -> Option<Handle>
    where
        F: FnMut(&WeakHandle<K>) -> bool,
    {
        let mut link = self.buckets[index_for(hash, self.capacity())];
        while let Some(k) = link {
            let e = &self.slots[k];
            if e.hash == hash && matches(&e.key) {
                return Some(Handle(k));
            }
            link = e.next;
        }
        None
    }

    pub fn find_mut<F>(&mut self, hash: u32, matches: F) -> Option<(&WeakHandle<K>, &mut V)>
    where
        F: FnMut(&WeakHandle<K>) -> bool,
    {
        let h = self.find(hash, matches)?;
        self.slots.get_mut(h.0).map(|e| (&e.key, &mut e.value))
    }

    pub fn value(&self, h: Handle) -> Option<&V> {
        self.slots.get(h.0).map(|e| &e.value)
    }

    /// Link a new entry at the head of its chain. Does not check for an
    /// existing entry with an equal key, and never resizes.
    pub fn insert(&mut self, hash: u32, key: WeakHandle<K>, value: V) -> Handle {
        let i = index_for(hash, self.capacity());
        let next = self.buckets[i];
        let k = self.slots.insert(Entry {
            key,
            value,
            hash,
            next,
        });
        self.buckets[i] = Some(k);
        Handle(k)
    }

    /// Unlink `h` from its chain and release it. Returns `None` if the entry
    /// is already gone.
    pub fn remove(&mut self, h: Handle) -> Option<(WeakHandle<K>, V)> {
        let k = h.0;
        let hash = self.slots.get(k)?.hash;
        let i = index_for(hash, self.capacity());

        let mut prev: Link = None;
        let mut link = self.buckets[i];
        while let Some(cur) = link {
            let next = self.slots[cur].next;
            if cur == k {
                match prev {
                    None => self.buckets[i] = next,
                    Some(p) => self.slots[p].next = next,
                }
                let e = self.slots.remove(k)?;
                return Some((e.key, e.value));
            }
            prev = Some(cur);
            link = next;
        }

        debug_assert!(false, "entry present in arena but missing from its chain");
        error!("bucket table: entry {:?} missing from chain {}", k, i);
        None
    }

    /// Install an empty bucket array of `capacity` slots and move every entry
    /// into it. Entries whose key has died are released and their values
    /// pushed onto `stale`. Returns the previous array, now empty.
    pub fn rehash_into(&mut self, capacity: usize, stale: &mut Vec<V>) -> Buckets {
        debug_assert!(capacity.is_power_of_two());
        let mut old = core::mem::replace(&mut self.buckets, vec![None; capacity]);
        self.transfer_from(&mut old, stale);
        Buckets(old)
    }

    /// Reinstall an array returned by `rehash_into`, moving every entry back
    /// into it and discarding the current array.
    pub fn restore(&mut self, buckets: Buckets, stale: &mut Vec<V>) {
        let mut current = core::mem::replace(&mut self.buckets, buckets.0);
        self.transfer_from(&mut current, stale);
    }

    fn transfer_from(&mut self, src: &mut [Link], stale: &mut Vec<V>) {
        let capacity = self.capacity();
        for head in src.iter_mut() {
            let mut link = head.take();
            while let Some(k) = link {
                let e = &mut self.slots[k];
                link = e.next.take();
                if e.key.is_expired() {
                    if let Some(dead) = self.slots.remove(k) {
                        stale.push(dead.value);
                    }
                } else {
                    let i = index_for(e.hash, capacity);
                    e.next = self.buckets[i];
                    self.buckets[i] = Some(k);
                }
            }
        }
    }

    /// Recompute the threshold from the current capacity.
    pub fn reset_threshold(&mut self) {
        self.threshold = threshold_for(self.capacity(), self.load_factor);
    }

    /// Disable further growth.
    pub fn pin_threshold(&mut self) {
        self.threshold = usize::MAX;
    }

    /// Empty the table, yielding every entry. Buckets are cleared up front;
    /// the arena is emptied as the iterator is consumed or dropped.
    pub fn drain(&mut self) -> impl Iterator<Item = (Handle, WeakHandle<K>, V)> + '_ {
        self.buckets.iter_mut().for_each(|b| *b = None);
        self.slots.drain().map(|(k, e)| (Handle(k), e.key, e.value))
    }

    /// Panics unless every arena entry is linked exactly once, in the chain
    /// its cached hash selects.
    #[cfg(test)]
    pub(crate) fn assert_consistent(&self) {
        let mut seen = std::collections::HashSet::new();
        for (i, head) in self.buckets.iter().enumerate() {
            let mut link = *head;
            while let Some(k) = link {
                let e = self.slots.get(k).expect("chain links a released entry");
                assert_eq!(index_for(e.hash, self.capacity()), i, "entry in wrong bucket");
                assert!(seen.insert(k), "entry linked twice");
                link = e.next;
            }
        }
        assert_eq!(seen.len(), self.slots.len(), "unlinked entries in arena");
    }
}

impl<K, V> Default for BucketTable<K, V> {
    fn default() -> Self {
        Self::new()
    }
}
