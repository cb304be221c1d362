use core::fmt;

use crate::error::{Result, TreeLockError};
use crate::registry::SlotRegistry;
use crate::relax::Relax;
use crate::tree::Tree;
use crate::two_party::Side;

/// A mutual exclusion lock for a fixed, power-of-two number of threads.
///
/// The lock is a tournament tree of [`TwoPartyLock`]s. Every thread that uses
/// the lock is given a leaf of its own the first time it calls [`lock`],
/// [`unlock`] or [`register`], and keeps it for the life of the lock. To enter
/// the critical section, a thread wins the duel at each node from its leaf up
/// to the root, meeting at most one rival per node. With `capacity` leaves
/// that is `log2(capacity)` contested duels per acquisition, whichever leaf
/// the thread holds.
///
/// The lock holds no data: it is the caller's job to pair [`lock`] with
/// [`unlock`] on the same thread, or to use [`lock_then`], which does so.
///
/// Waiting never parks the thread, the [`Relax`] policy runs instead. Keep
/// the number of threads at or below the number of processors available to
/// them, or a descheduled holder keeps every rival spinning.
///
/// # Panics
///
/// At most `capacity` distinct threads may ever use a given lock. Once that
/// many threads have registered, [`lock`] and [`unlock`] panic on any further
/// thread with [`TreeLockError::CapacityExceeded`]. Use [`register`] to
/// detect this without panicking.
///
/// The slot lookup relies on the calling thread's local storage. A thread
/// may use the lock from its own thread-local destructors only while that
/// storage is alive, that is, from destructors of thread locals first touched
/// after the thread's first use of any tree lock. Later ones panic.
///
/// # Examples
///
/// ```
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::thread;
///
/// use treelock::spins::TreeLock;
///
/// const THREADS: usize = 4;
///
/// let lock = TreeLock::new(THREADS).unwrap();
/// let count = AtomicUsize::new(0);
///
/// thread::scope(|s| {
///     for _ in 0..THREADS {
///         s.spawn(|| {
///             for _ in 0..100 {
///                 lock.lock();
///                 // Load and store separately, only correct under exclusion.
///                 let value = count.load(Ordering::Relaxed);
///                 count.store(value + 1, Ordering::Relaxed);
///                 lock.unlock();
///             }
///         });
///     }
/// });
///
/// assert_eq!(count.load(Ordering::Relaxed), THREADS * 100);
/// ```
/// [`TwoPartyLock`]: crate::TwoPartyLock
/// [`lock`]: TreeLock::lock
/// [`unlock`]: TreeLock::unlock
/// [`register`]: TreeLock::register
/// [`lock_then`]: TreeLock::lock_then
pub struct TreeLock<R> {
    tree: Tree<R>,
    registry: SlotRegistry,
}

impl<R> TreeLock<R> {
    /// Creates an unlocked tree lock with one leaf per thread, for `capacity`
    /// threads.
    ///
    /// # Errors
    ///
    /// Returns [`TreeLockError::InvalidConfiguration`] if `capacity` is zero
    /// or is not a power of two.
    ///
    /// # Examples
    ///
    /// ```
    /// use treelock::spins::TreeLock;
    /// use treelock::{InvalidConfiguration, TreeLockError};
    ///
    /// let lock = TreeLock::new(8).unwrap();
    /// assert_eq!(lock.capacity(), 8);
    ///
    /// let err = TreeLock::new(6).unwrap_err();
    /// assert_eq!(err, TreeLockError::InvalidConfiguration(InvalidConfiguration::NotPowerOfTwo(6)));
    /// ```
    pub fn new(capacity: usize) -> Result<Self> {
        let tree = Tree::build(capacity).map_err(|err| {
            tracing::warn!(capacity, %err, "rejected tree lock capacity");
            err
        })?;
        tracing::debug!(capacity, depth = tree.depth(), nodes = tree.len(), "created tree lock");
        Ok(Self { tree, registry: SlotRegistry::new() })
    }

    /// Number of threads this lock can serve.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.tree.capacity()
    }

    /// Number of contested duels a thread wins for each acquisition, that is,
    /// `log2(capacity)`.
    #[inline]
    #[must_use]
    pub fn depth(&self) -> usize {
        self.tree.depth()
    }

    /// Returns the calling thread's slot, assigning one if the thread has not
    /// used this lock before.
    ///
    /// # Errors
    ///
    /// Returns [`TreeLockError::CapacityExceeded`] if `capacity` other threads
    /// already registered before the calling thread did. The slot stays
    /// assigned, so every later call from this thread fails the same way.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::thread;
    ///
    /// use treelock::spins::TreeLock;
    /// use treelock::TreeLockError;
    ///
    /// let lock = TreeLock::new(1).unwrap();
    /// assert_eq!(lock.register(), Ok(0));
    ///
    /// thread::scope(|s| {
    ///     s.spawn(|| {
    ///         let err = TreeLockError::CapacityExceeded { slot: 1, capacity: 1 };
    ///         assert_eq!(lock.register(), Err(err));
    ///     });
    /// });
    /// ```
    pub fn register(&self) -> Result<usize> {
        self.leaf().map(|leaf| leaf - self.capacity())
    }

    /// Releases the lock held by the calling thread.
    ///
    /// Duels are released from the root down to the thread's leaf, the
    /// reverse of the order they were won in.
    ///
    /// Calling this on a thread that does not hold the lock is a logic error:
    /// it withdraws the thread from duels it may be waiting on or that another
    /// thread's progress depends on. It is not checked.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread's slot exceeds the lock's capacity.
    pub fn unlock(&self) {
        let leaf = self.leaf_or_panic();
        self.tree.unlock(leaf, Side::Zero);
    }

    /// Returns the arena index of the calling thread's leaf.
    fn leaf(&self) -> Result<usize> {
        let registration = self.registry.register();
        let slot = registration.slot();
        self.tree.leaf(slot).ok_or_else(|| {
            let capacity = self.capacity();
            if registration.is_fresh() {
                tracing::warn!(slot, capacity, "thread registered past tree lock capacity");
            }
            TreeLockError::CapacityExceeded { slot, capacity }
        })
    }

    fn leaf_or_panic(&self) -> usize {
        match self.leaf() {
            Ok(leaf) => leaf,
            Err(err) => panic!("{err}"),
        }
    }
}

impl<R: Relax> TreeLock<R> {
    /// Acquires the lock, spinning until the calling thread holds it.
    ///
    /// The calling thread wins the duel at its own leaf, then at every
    /// ancestor of it up to the root. Once this returns, no other thread
    /// holds the lock until this thread calls [`unlock`].
    ///
    /// The lock is not reentrant: calling this again before [`unlock`]
    /// corrupts the duels on the thread's path. There is no timeout.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread's slot exceeds the lock's capacity.
    ///
    /// [`unlock`]: TreeLock::unlock
    pub fn lock(&self) {
        let leaf = self.leaf_or_panic();
        self.tree.lock(leaf, Side::Zero);
    }

    /// Acquires the lock, runs `f`, then releases the lock, also when `f`
    /// panics.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread's slot exceeds the lock's capacity.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::sync::atomic::{AtomicUsize, Ordering};
    ///
    /// use treelock::spins::TreeLock;
    ///
    /// let lock = TreeLock::new(2).unwrap();
    /// let count = AtomicUsize::new(0);
    /// let value = lock.lock_then(|| count.fetch_add(1, Ordering::Relaxed) + 1);
    /// assert_eq!(value, 1);
    /// ```
    pub fn lock_then<F, Ret>(&self, f: F) -> Ret
    where
        F: FnOnce() -> Ret,
    {
        self.lock();
        let _unlock = Unlock(self);
        f()
    }
}

impl<R> fmt::Debug for TreeLock<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TreeLock")
            .field("capacity", &self.capacity())
            .field("depth", &self.depth())
            .field("registered", &self.registry.registered())
            .finish()
    }
}

/// Releases the lock when dropped.
struct Unlock<'a, R>(&'a TreeLock<R>);

impl<R> Drop for Unlock<'_, R> {
    fn drop(&mut self) {
        self.0.unlock();
    }
}

#[cfg(all(not(loom), test))]
mod test {
    use crate::relax::{Spin, SpinBackoff, Yield};
    use crate::test::tests;

    #[test]
    fn smoke() {
        tests::smoke::<Yield>();
    }

    #[test]
    fn single_slot() {
        tests::single_slot::<Spin>();
    }

    #[test]
    fn lots_and_lots_eight_threads() {
        tests::lots_and_lots::<Yield>(8, 1_000);
    }

    #[test]
    fn lots_and_lots_two_threads() {
        tests::lots_and_lots::<Yield>(2, 100_000);
    }

    #[test]
    fn lots_and_lots_spin() {
        tests::lots_and_lots::<Spin>(2, 10_000);
    }

    #[test]
    fn lots_and_lots_spin_backoff() {
        tests::lots_and_lots::<SpinBackoff>(2, 10_000);
    }

    #[test]
    fn lots_and_lots_partial_occupancy() {
        tests::lots_and_lots_on::<Yield>(16, 5, 500);
    }

    #[test]
    fn mutual_exclusion() {
        for capacity in [1, 2, 4, 8] {
            tests::mutual_exclusion::<Yield>(capacity);
        }
    }

    #[test]
    fn slot_stability() {
        tests::slot_stability::<Yield>();
    }

    #[test]
    fn capacity_exceeded() {
        tests::capacity_exceeded::<Yield>();
    }

    #[test]
    fn capacity_exceeded_panics_on_lock() {
        tests::capacity_exceeded_panics_on_lock::<Yield>();
    }

    #[test]
    fn lock_then_unlocks_on_unwind() {
        tests::lock_then_unlocks_on_unwind::<Yield>();
    }

    #[test]
    fn test_lock_debug() {
        tests::test_lock_debug::<Yield>();
    }
}

#[cfg(all(loom, test))]
mod model {
    use crate::loom::models;

    #[test]
    fn tree_lock_join() {
        models::tree_lock_join();
    }
}
