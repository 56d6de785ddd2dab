//! Strong and weak key handles, and the per-table queue that carries
//! reclamation notices from dying keys to the tables that track them.
//!
//! A `Tracked<T>` owns its key the way `Rc<T>` does. Each table entry that
//! refers to the key registers a watcher (the table's queue plus the entry's
//! ticket) inside the key's allocation. When the last `Tracked<T>` is dropped,
//! the allocation's destructor pushes every registered ticket onto its queue.
//! By then the strong count is already zero, so no `WeakHandle` to the key can
//! be upgraded any more: a table draining its queue never sees a key that is
//! both notified and alive.

use core::cell::RefCell;
use core::cmp::Ordering;
use core::fmt;
use core::hash::{Hash, Hasher};
use core::ops::Deref;
use slotmap::DefaultKey;
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

type Pending = RefCell<VecDeque<DefaultKey>>;

struct Watcher {
    queue: Weak<Pending>,
    ticket: DefaultKey,
}

struct TrackedBox<T> {
    value: T,
    watchers: RefCell<Vec<Watcher>>,
}

impl<T> Drop for TrackedBox<T> {
    fn drop(&mut self) {
        // Queues are only borrowed for single push/pop calls, so this cannot
        // collide with a drain in progress.
        for w in self.watchers.get_mut().drain(..) {
            if let Some(queue) = w.queue.upgrade() {
                queue.borrow_mut().push_back(w.ticket);
            }
        }
    }
}

/// A shared, owning handle to a key that weak-keyed tables can track.
///
/// Behaves like `Rc<T>`: cloning is cheap and the key lives as long as any
/// clone does. Comparison, hashing and formatting delegate to `T`.
pub struct Tracked<T>(Rc<TrackedBox<T>>);

impl<T> Tracked<T> {
    pub fn new(value: T) -> Self {
        Tracked(Rc::new(TrackedBox {
            value,
            watchers: RefCell::new(Vec::new()),
        }))
    }

    /// Create a non-owning handle to this key.
    pub fn downgrade(this: &Self) -> WeakHandle<T> {
        WeakHandle(Rc::downgrade(&this.0))
    }

    /// Identity comparison: true if both handles point at the same key.
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        Rc::ptr_eq(&this.0, &other.0)
    }

    pub fn strong_count(this: &Self) -> usize {
        Rc::strong_count(&this.0)
    }
}

impl<T> Clone for Tracked<T> {
    fn clone(&self) -> Self {
        Tracked(Rc::clone(&self.0))
    }
}

impl<T> Deref for Tracked<T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.0.value
    }
}

impl<T> AsRef<T> for Tracked<T> {
    fn as_ref(&self) -> &T {
        &self.0.value
    }
}

impl<T> core::borrow::Borrow<T> for Tracked<T> {
    fn borrow(&self) -> &T {
        &self.0.value
    }
}

impl<T: PartialEq> PartialEq for Tracked<T> {
    fn eq(&self, other: &Self) -> bool {
        self.0.value == other.0.value
    }
}

impl<T: Eq> Eq for Tracked<T> {}

impl<T: PartialOrd> PartialOrd for Tracked<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.0.value.partial_cmp(&other.0.value)
    }
}

impl<T: Ord> Ord for Tracked<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.value.cmp(&other.0.value)
    }
}

impl<T: Hash> Hash for Tracked<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.value.hash(state);
    }
}

impl<T: fmt::Debug> fmt::Debug for Tracked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.value.fmt(f)
    }
}

impl<T: fmt::Display> fmt::Display for Tracked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.value.fmt(f)
    }
}

/// A non-owning handle to a `Tracked` key.
///
/// Resolves to the key while any `Tracked` clone is alive, and to `None`
/// afterwards. Holding it never keeps the key alive.
pub struct WeakHandle<T>(Weak<TrackedBox<T>>);

impl<T> WeakHandle<T> {
    pub fn upgrade(&self) -> Option<Tracked<T>> {
        self.0.upgrade().map(Tracked)
    }

    pub fn is_expired(&self) -> bool {
        self.0.strong_count() == 0
    }

    /// True if this handle refers to the same key allocation as `key`.
    pub fn ptr_eq(&self, key: &Tracked<T>) -> bool {
        core::ptr::eq(self.0.as_ptr(), Rc::as_ptr(&key.0))
    }

    /// Run `f` against the key if it is still alive.
    pub(crate) fn with<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.0.upgrade().map(|b| f(&b.value))
    }
}

impl<T> Clone for WeakHandle<T> {
    fn clone(&self) -> Self {
        WeakHandle(Weak::clone(&self.0))
    }
}

impl<T: fmt::Debug> fmt::Debug for WeakHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.upgrade() {
            Some(b) => f.debug_tuple("WeakHandle").field(&b.value).finish(),
            None => f.write_str("WeakHandle(<expired>)"),
        }
    }
}

/// Receiving end of reclamation notices for one table.
///
/// Keys only hold weak references to the queue, so notices for a table that
/// has been dropped are silently discarded.
#[derive(Default)]
pub(crate) struct ReclaimQueue {
    pending: Rc<Pending>,
}

impl ReclaimQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Ask `key` to deliver `ticket` to this queue when it dies.
    pub(crate) fn watch<T>(&self, key: &Tracked<T>, ticket: DefaultKey) {
        let mut watchers = key.0.watchers.borrow_mut();
        // Drop registrations for tables that no longer exist.
        watchers.retain(|w| w.queue.strong_count() > 0);
        watchers.push(Watcher {
            queue: Rc::downgrade(&self.pending),
            ticket,
        });
    }

    /// Withdraw a registration made by `watch`. Unknown tickets are ignored.
    pub(crate) fn unwatch<T>(&self, key: &Tracked<T>, ticket: DefaultKey) {
        let mut watchers = key.0.watchers.borrow_mut();
        if let Some(pos) = watchers
            .iter()
            .position(|w| w.ticket == ticket && Weak::as_ptr(&w.queue) == Rc::as_ptr(&self.pending))
        {
            watchers.swap_remove(pos);
        }
    }

    pub(crate) fn poll(&self) -> Option<DefaultKey> {
        self.pending.borrow_mut().pop_front()
    }

    /// Drop every pending notice; returns how many were discarded.
    pub(crate) fn discard_pending(&self) -> usize {
        let mut pending = self.pending.borrow_mut();
        let n = pending.len();
        pending.clear();
        n
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.pending.borrow().is_empty()
    }
}

impl fmt::Debug for ReclaimQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReclaimQueue")
            .field("pending", &self.pending.borrow().len())
            .finish()
    }
}
