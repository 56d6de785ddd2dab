//! WeakKeyMap: public layer. Couples the bucket table with the reclamation
//! queue and the stale-entry hook.
//!
//! Every public operation first drains the queue, so callers always observe a
//! table reconciled with every key that died before the call.

use crate::bucket_table::{
    make_hash, BucketTable, Handle, DEFAULT_INITIAL_CAPACITY, DEFAULT_LOAD_FACTOR,
};
use crate::error::Error;
use crate::reclaim::{ReclaimQueue, Tracked, WeakHandle};
use core::convert::Infallible;
use core::fmt;
use core::hash::{BuildHasher, Hash};
use hashbrown::hash_map::DefaultHashBuilder;
use log::{trace, warn};
use std::panic::{self, AssertUnwindSafe};

/// Receives the value of every entry expunged because its key was reclaimed.
///
/// Never called for `remove` or `clear`. Implemented for any `FnMut(V)`.
pub trait StaleEntryHook<V> {
    fn stale_entry_expunged(&mut self, value: V);
}

/// Hook that drops evicted values without looking at them.
#[derive(Copy, Clone, Debug, Default)]
pub struct Discard;

impl<V> StaleEntryHook<V> for Discard {
    fn stale_entry_expunged(&mut self, _value: V) {}
}

impl<V, F> StaleEntryHook<V> for F
where
    F: FnMut(V),
{
    fn stale_entry_expunged(&mut self, value: V) {
        self(value)
    }
}

/// Hash map whose keys are held weakly.
///
/// Keys are passed in as `Tracked<K>` handles; the map keeps only a
/// `WeakHandle<K>`. Once every `Tracked` clone of a key is dropped, the entry
/// is expunged on the next operation and its value handed to the hook `H`.
///
/// Lookups take any borrowed form `Q` of the key, comparing identity first and
/// `Eq` second.
pub struct WeakKeyMap<K, V, H = Discard, S = DefaultHashBuilder> {
    hasher: S,
    table: BucketTable<K, V>,
    queue: ReclaimQueue,
    hook: H,
}

impl<K, V> WeakKeyMap<K, V>
where
    K: Eq + Hash,
{
    pub fn new() -> Self {
        Self::with_hook(Discard)
    }

    pub fn with_capacity(initial_capacity: usize) -> Result<Self, Error> {
        Self::with_capacity_and_load_factor(initial_capacity, DEFAULT_LOAD_FACTOR)
    }

    pub fn with_capacity_and_load_factor(
        initial_capacity: usize,
        load_factor: f32,
    ) -> Result<Self, Error> {
        Self::with_config(initial_capacity, load_factor, Discard, Default::default())
    }

    /// Build a map holding the same mappings as `source`, sized so that they
    /// fit without resizing.
    pub fn from_map<'a, I>(source: I) -> Self
    where
        I: IntoIterator<Item = (&'a Tracked<K>, V)>,
        I::IntoIter: ExactSizeIterator,
        K: 'a,
    {
        let source = source.into_iter();
        let capacity = ((source.len() as f32 / DEFAULT_LOAD_FACTOR) as usize + 1)
            .max(DEFAULT_INITIAL_CAPACITY);
        let mut map = Self::from_parts(
            BucketTable::sized(capacity, DEFAULT_LOAD_FACTOR),
            Discard,
            Default::default(),
        );
        map.extend(source);
        map
    }
}

impl<K, V> Default for WeakKeyMap<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, H> WeakKeyMap<K, V, H>
where
    K: Eq + Hash,
    H: StaleEntryHook<V>,
{
    /// Default capacity and load factor, with `hook` notified of evictions.
    pub fn with_hook(hook: H) -> Self {
        Self::from_parts(BucketTable::new(), hook, Default::default())
    }
}

impl<K, V, H, S> WeakKeyMap<K, V, H, S>
where
    K: Eq + Hash,
    H: StaleEntryHook<V>,
    S: BuildHasher,
{
    pub fn with_config(
        initial_capacity: usize,
        load_factor: f32,
        hook: H,
        hasher: S,
    ) -> Result<Self, Error> {
        let table = BucketTable::with_capacity(initial_capacity, load_factor)?;
        Ok(Self::from_parts(table, hook, hasher))
    }

    fn from_parts(table: BucketTable<K, V>, hook: H, hasher: S) -> Self {
        Self {
            hasher,
            table,
            queue: ReclaimQueue::new(),
            hook,
        }
    }

    fn make_hash<Q>(&self, q: &Q) -> u32
    where
        Q: ?Sized + Hash,
    {
        make_hash(&self.hasher, q)
    }

    pub fn get<Q>(&mut self, key: &Q) -> Option<&V>
    where
        K: core::borrow::Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let hash = self.make_hash(key);
        self.expunge_stale_entries();
        let h = self.table.find(hash, |w| key_eq(w, key))?;
        self.table.value(h)
    }

    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: core::borrow::Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let hash = self.make_hash(key);
        self.expunge_stale_entries();
        self.table
            .find_mut(hash, |w| key_eq(w, key))
            .map(|(_, value)| value)
    }

    pub fn contains_key<Q>(&mut self, key: &Q) -> bool
    where
        K: core::borrow::Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let hash = self.make_hash(key);
        self.expunge_stale_entries();
        self.table.find(hash, |w| key_eq(w, key)).is_some()
    }

    /// Map `key` to `value`, returning the previous value if the key was
    /// present. The map holds `key` weakly.
    pub fn put(&mut self, key: &Tracked<K>, value: V) -> Option<V> {
        self.upsert(key, value).1
    }

    /// Like `put`, but returns a weak handle to the key the map now tracks for
    /// this slot. If an equal key was already present, the handle refers to
    /// that earlier key rather than to `key`.
    pub fn put_and_get_weak_handle(&mut self, key: &Tracked<K>, value: V) -> WeakHandle<K> {
        self.upsert(key, value).0
    }

    fn upsert(&mut self, key: &Tracked<K>, value: V) -> (WeakHandle<K>, Option<V>) {
        let hash = self.make_hash::<K>(key);
        self.expunge_stale_entries();
        let q: &K = key;
        if let Some((stored, slot)) = self.table.find_mut(hash, |w| key_eq(w, q)) {
            let previous = core::mem::replace(slot, value);
            return (stored.clone(), Some(previous));
        }

        let weak = Tracked::downgrade(key);
        let h = self.table.insert(hash, weak.clone(), value);
        self.queue.watch(key, h.raw_handle());
        if self.table.needs_resize() {
            self.resize(self.table.capacity() * 2);
        }
        (weak, None)
    }

    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: core::borrow::Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let hash = self.make_hash(key);
        self.expunge_stale_entries();
        let h = self.table.find(hash, |w| key_eq(w, key))?;
        let (stored, value) = self.table.remove(h)?;
        // The key outlives this entry: stop it from notifying us later.
        if let Some(k) = stored.upgrade() {
            self.queue.unwatch(&k, h.raw_handle());
        }
        Some(value)
    }

    /// Number of live entries after draining pending reclamation notices.
    ///
    /// Keys that die after this call are not reflected until the next one.
    pub fn size(&mut self) -> usize {
        if self.table.is_empty() {
            return 0;
        }
        self.expunge_stale_entries();
        self.table.len()
    }

    pub fn len(&mut self) -> usize {
        self.size()
    }

    pub fn is_empty(&mut self) -> bool {
        self.size() == 0
    }

    /// Remove every entry without notifying the hook, including entries whose
    /// keys died but were not yet expunged.
    pub fn clear(&mut self) {
        let pending = self.queue.discard_pending();
        let mut cleared = 0usize;
        for (h, stored, value) in self.table.drain() {
            if let Some(k) = stored.upgrade() {
                self.queue.unwatch(&k, h.raw_handle());
            }
            // May release the last handle to other keys.
            drop(value);
            cleared += 1;
        }
        let late = self.queue.discard_pending();
        trace!(
            "clear: {} entries dropped, {} pending and {} late notices discarded",
            cleared,
            pending,
            late
        );
    }

    /// Bulk entry views are not offered; always fails.
    pub fn entry_set(&self) -> Result<Infallible, Error> {
        Err(Error::Unsupported {
            operation: "entry_set",
        })
    }

    /// Current bucket-array length.
    pub fn capacity(&self) -> usize {
        self.table.capacity()
    }

    pub fn load_factor(&self) -> f32 {
        self.table.load_factor()
    }

    pub fn hook(&self) -> &H {
        &self.hook
    }

    pub fn hook_mut(&mut self) -> &mut H {
        &mut self.hook
    }

    pub fn hasher(&self) -> &S {
        &self.hasher
    }

    fn expunge_stale_entries(&mut self) {
        let mut expunged = 0usize;
        while let Some(ticket) = self.queue.poll() {
            // Tickets of entries already removed no longer resolve.
            let (stored, value) = match self.table.remove(Handle::new(ticket)) {
                Some(entry) => entry,
                None => continue,
            };
            debug_assert!(stored.is_expired(), "notice for a live key");
            expunged += 1;
            notify(&mut self.hook, value);
        }
        if expunged > 0 {
            trace!(
                "expunged {} stale entries, {} remain",
                expunged,
                self.table.len()
            );
        }
    }

    fn resize(&mut self, new_capacity: usize) {
        self.expunge_stale_entries();
        let old_capacity = self.table.capacity();
        if old_capacity >= self.table.max_capacity() {
            self.table.pin_threshold();
            return;
        }

        let old_threshold = self.table.threshold();
        let mut stale = Vec::new();
        let old = self.table.rehash_into(new_capacity, &mut stale);
        if self.table.len() >= old_threshold / 2 {
            self.table.reset_threshold();
            trace!("resize: {} -> {} buckets", old_capacity, new_capacity);
        } else {
            // Growth was mostly dead entries; keep the smaller array.
            self.expunge_stale_entries();
            let kept = old.capacity();
            self.table.restore(old, &mut stale);
            trace!(
                "resize to {} reverted: {} live entries in {} buckets",
                new_capacity,
                self.table.len(),
                kept
            );
        }
        for value in stale {
            notify(&mut self.hook, value);
        }
    }
}

fn key_eq<K, Q>(stored: &WeakHandle<K>, q: &Q) -> bool
where
    K: core::borrow::Borrow<Q>,
    Q: ?Sized + Eq,
{
    stored
        .with(|k| {
            let k: &Q = core::borrow::Borrow::borrow(k);
            core::ptr::eq(k, q) || k == q
        })
        .unwrap_or(false)
}

/// Hand `value` to the hook. A panicking hook must not leave later notices
/// undrained, so the panic is contained here.
fn notify<V, H: StaleEntryHook<V>>(hook: &mut H, value: V) {
    let result = panic::catch_unwind(AssertUnwindSafe(|| hook.stale_entry_expunged(value)));
    if result.is_err() {
        warn!("stale entry hook panicked; continuing expunge");
    }
}

impl<'a, K, V, H, S> Extend<(&'a Tracked<K>, V)> for WeakKeyMap<K, V, H, S>
where
    K: Eq + Hash + 'a,
    H: StaleEntryHook<V>,
    S: BuildHasher,
{
    fn extend<I: IntoIterator<Item = (&'a Tracked<K>, V)>>(&mut self, iter: I) {
        for (key, value) in iter {
            self.put(key, value);
        }
    }
}

impl<K, V, H, S> fmt::Debug for WeakKeyMap<K, V, H, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakKeyMap")
            .field("len", &self.table.len())
            .field("capacity", &self.table.capacity())
            .field("load_factor", &self.table.load_factor())
            .field("queue", &self.queue)
            .finish()
    }
}
