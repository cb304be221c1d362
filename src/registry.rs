//! Per-thread slot assignment.
//!
//! A [`SlotRegistry`] hands out slots `0, 1, 2, ...` from a single atomic
//! counter, one per distinct thread, in first-come order. The slot a thread
//! received is cached in per-thread storage owned by the registry, so later
//! lookups never touch the counter, and the cache is freed together with the
//! registry. Slots are never reclaimed, not even when their thread exits.
//!
//! The registry does not know about capacity: it keeps counting past any
//! bound. Callers compare the slot against their own limit.

use core::fmt;
use core::sync::atomic::Ordering::SeqCst;

use crate::cfg::atomic::AtomicUsize;

/// The outcome of [`SlotRegistry::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    slot: usize,
    fresh: bool,
}

impl Registration {
    /// The slot owned by the calling thread.
    #[inline]
    #[must_use]
    pub const fn slot(&self) -> usize {
        self.slot
    }

    /// Returns `true` if this call assigned the slot, `false` if it was
    /// already assigned by an earlier call from the same thread.
    #[inline]
    #[must_use]
    pub const fn is_fresh(&self) -> bool {
        self.fresh
    }
}

/// Assigns every calling thread a stable slot number.
///
/// # Examples
///
/// ```
/// use std::thread;
///
/// use treelock::SlotRegistry;
///
/// let registry = SlotRegistry::new();
/// let first = registry.register();
/// assert!(first.is_fresh());
/// assert_eq!(registry.resolve(), first.slot());
///
/// thread::scope(|s| {
///     s.spawn(|| assert_ne!(registry.resolve(), first.slot()));
/// });
/// assert_eq!(registry.registered(), 2);
/// ```
pub struct SlotRegistry {
    slots: SlotCache,
    next: AtomicUsize,
}

impl SlotRegistry {
    /// Creates a registry that has not handed out any slot yet.
    #[must_use]
    pub fn new() -> Self {
        Self { slots: SlotCache::new(), next: AtomicUsize::new(0) }
    }

    /// Returns the calling thread's slot, assigning the next free one if this
    /// thread has never registered here.
    ///
    /// Assignment is a single atomic increment of the shared counter, so no
    /// two threads are ever given the same slot.
    pub fn register(&self) -> Registration {
        if let Some(slot) = self.slots.get() {
            return Registration { slot, fresh: false };
        }
        let slot = self.next.fetch_add(1, SeqCst);
        self.slots.insert(slot);
        tracing::trace!(slot, "registered thread slot");
        Registration { slot, fresh: true }
    }

    /// Returns the calling thread's slot, registering it if needed.
    #[inline]
    pub fn resolve(&self) -> usize {
        self.register().slot()
    }

    /// Number of slots handed out so far.
    #[must_use]
    pub fn registered(&self) -> usize {
        self.next.load(SeqCst)
    }
}

impl Default for SlotRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SlotRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotRegistry").field("registered", &self.registered()).finish()
    }
}

/// The slot of every thread that registered, each one visible only to the
/// thread that owns it.
#[cfg(not(all(loom, test)))]
struct SlotCache(thread_local::ThreadLocal<usize>);

#[cfg(not(all(loom, test)))]
impl SlotCache {
    fn new() -> Self {
        Self(thread_local::ThreadLocal::new())
    }

    /// The calling thread's slot, if it has one.
    fn get(&self) -> Option<usize> {
        self.0.get().copied()
    }

    /// Records `slot` for the calling thread.
    fn insert(&self, slot: usize) {
        self.0.get_or(|| slot);
    }

    /// Number of threads with a cached slot.
    #[cfg(test)]
    fn len(&self) -> usize {
        self.0.iter().count()
    }
}

// Loom threads are not OS threads, so they are told apart by loom's own ids.
#[cfg(all(loom, test))]
#[cfg(not(tarpaulin_include))]
struct SlotCache(loom::sync::Mutex<Vec<(loom::thread::ThreadId, usize)>>);

#[cfg(all(loom, test))]
#[cfg(not(tarpaulin_include))]
impl SlotCache {
    fn new() -> Self {
        Self(loom::sync::Mutex::new(Vec::new()))
    }

    fn get(&self) -> Option<usize> {
        let id = loom::thread::current().id();
        let slots = self.0.lock().unwrap();
        slots.iter().find(|(owner, _)| *owner == id).map(|&(_, slot)| slot)
    }

    fn insert(&self, slot: usize) {
        let id = loom::thread::current().id();
        self.0.lock().unwrap().push((id, slot));
    }
}

#[cfg(all(not(loom), test))]
mod test {
    use std::collections::HashSet;
    use std::sync::{Arc, Barrier};
    use std::thread;

    use super::SlotRegistry;

    #[test]
    fn first_registration_is_fresh() {
        let registry = SlotRegistry::new();
        let first = registry.register();
        assert!(first.is_fresh());
        assert_eq!(first.slot(), 0);

        let again = registry.register();
        assert!(!again.is_fresh());
        assert_eq!(again.slot(), 0);
        assert_eq!(registry.registered(), 1);
    }

    #[test]
    fn slot_is_stable() {
        let registry = SlotRegistry::new();
        let slot = registry.resolve();
        for _ in 0..100 {
            assert_eq!(registry.resolve(), slot);
        }
        assert_eq!(registry.registered(), 1);
    }

    #[test]
    fn registries_are_independent() {
        let a = SlotRegistry::new();
        let b = SlotRegistry::new();
        thread::scope(|s| {
            s.spawn(|| a.resolve());
        });
        assert_eq!(a.resolve(), 1);
        assert_eq!(b.resolve(), 0);
    }

    #[test]
    fn concurrent_threads_get_distinct_slots() {
        const THREADS: usize = 16;

        let registry = Arc::new(SlotRegistry::new());
        let barrier = Arc::new(Barrier::new(THREADS));
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    let slot = registry.resolve();
                    assert_eq!(registry.resolve(), slot);
                    slot
                })
            })
            .collect();

        let slots: HashSet<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(slots, (0..THREADS).collect());
        assert_eq!(registry.registered(), THREADS);
    }

    #[test]
    fn cache_holds_one_entry_per_thread() {
        const THREADS: usize = 4;

        let registry = SlotRegistry::new();
        thread::scope(|s| {
            for _ in 0..THREADS {
                s.spawn(|| registry.resolve());
            }
        });
        assert_eq!(registry.slots.len(), THREADS);
        registry.resolve();
        registry.resolve();
        assert_eq!(registry.slots.len(), THREADS + 1);
    }

    // A thread that goes through many short-lived registries keeps no trace
    // of the dropped ones: each new registry starts from an empty cache.
    #[test]
    fn dropped_registries_leave_no_cached_slots() {
        for _ in 0..10_000 {
            let registry = SlotRegistry::new();
            assert_eq!(registry.slots.len(), 0);
            let first = registry.register();
            assert!(first.is_fresh());
            assert_eq!(first.slot(), 0);
            assert_eq!(registry.slots.len(), 1);
        }
    }

    #[test]
    fn slots_are_not_reused() {
        let registry = SlotRegistry::new();
        for expected in 0..4 {
            let slot = thread::scope(|s| s.spawn(|| registry.resolve()).join().unwrap());
            assert_eq!(slot, expected);
        }
        assert_eq!(registry.registered(), 4);
    }
}
