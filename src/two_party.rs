//! Peterson's two-party lock, the duel played at every node of the tree.
//!
//! The lock is correct for exactly two parties, told apart by a [`Side`]. Each
//! party raises its own interest flag, then volunteers as the victim. The
//! party that wrote the victim marker last waits for as long as the other
//! party remains interested. Once a party has raised its flag and written the
//! marker, its sibling can enter the critical section at most once more
//! before it does.
//!
//! Every flag and marker access is sequentially consistent: the protocol
//! relies on a store to one location being ordered before a load of another,
//! which weaker orderings do not provide.

use core::fmt;
use core::marker::PhantomData;
use core::sync::atomic::Ordering::SeqCst;

use crate::cfg::atomic::{fence, AtomicBool};
use crate::relax::Relax;

/// Which of the two parties of a [`TwoPartyLock`] is acting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// The party identified by `0`.
    Zero,
    /// The party identified by `1`.
    One,
}

impl Side {
    /// Returns the side given by the lowest bit of `index`.
    ///
    /// # Examples
    ///
    /// ```
    /// use treelock::Side;
    ///
    /// assert_eq!(Side::from_index(4), Side::Zero);
    /// assert_eq!(Side::from_index(7), Side::One);
    /// ```
    #[inline]
    #[must_use]
    pub const fn from_index(index: usize) -> Self {
        if index % 2 == 0 {
            Self::Zero
        } else {
            Self::One
        }
    }

    /// Returns `0` for [`Side::Zero`] and `1` for [`Side::One`].
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Zero => 0,
            Self::One => 1,
        }
    }

    /// Returns the opposing side.
    #[inline]
    #[must_use]
    pub const fn other(self) -> Self {
        match self {
            Self::Zero => Self::One,
            Self::One => Self::Zero,
        }
    }

    /// The encoding of this side in the victim marker.
    const fn as_victim(self) -> bool {
        matches!(self, Self::One)
    }
}

/// A mutual exclusion primitive for exactly two parties.
///
/// Callers identify themselves with a [`Side`] on every call. Two distinct
/// parties must never share a side, and a third party must never use the
/// lock at all: either breaks mutual exclusion. There is no timeout and no
/// cancellation; a party that never releases starves its sibling forever.
///
/// The lock is generic over the [`Relax`] policy run while waiting.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::thread;
///
/// use treelock::spins::TwoPartyLock;
/// use treelock::Side;
///
/// let lock = Arc::new(TwoPartyLock::new());
/// let count = Arc::new(AtomicUsize::new(0));
///
/// let handles: Vec<_> = [Side::Zero, Side::One]
///     .into_iter()
///     .map(|side| {
///         let (lock, count) = (Arc::clone(&lock), Arc::clone(&count));
///         thread::spawn(move || {
///             for _ in 0..100 {
///                 lock.acquire(side);
///                 // Load and store separately, only correct under exclusion.
///                 let value = count.load(Ordering::Relaxed);
///                 count.store(value + 1, Ordering::Relaxed);
///                 lock.release(side);
///             }
///         })
///     })
///     .collect();
///
/// for handle in handles {
///     handle.join().unwrap();
/// }
/// assert_eq!(count.load(Ordering::Relaxed), 200);
/// ```
pub struct TwoPartyLock<R> {
    interested: [AtomicBool; 2],
    victim: AtomicBool,
    marker: PhantomData<fn() -> R>,
}

impl<R> TwoPartyLock<R> {
    /// Creates a new lock that neither side holds.
    ///
    /// # Examples
    ///
    /// ```
    /// use treelock::spins::TwoPartyLock;
    ///
    /// const LOCK: TwoPartyLock = TwoPartyLock::new();
    /// let lock = TwoPartyLock::new();
    /// ```
    #[cfg(not(all(loom, test)))]
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        let interested = [AtomicBool::new(false), AtomicBool::new(false)];
        let victim = AtomicBool::new(false);
        Self { interested, victim, marker: PhantomData }
    }

    /// Creates a new lock with Loom primitives (non-const).
    #[cfg(all(loom, test))]
    #[cfg(not(tarpaulin_include))]
    pub(crate) fn new() -> Self {
        let interested = [AtomicBool::new(false), AtomicBool::new(false)];
        let victim = AtomicBool::new(false);
        Self { interested, victim, marker: PhantomData }
    }

    /// Releases the critical section held by `side`.
    ///
    /// Calling this for a side that does not hold the lock withdraws that
    /// side's interest, which is only harmless if it was not interested.
    #[inline]
    pub fn release(&self, side: Side) {
        self.interested[side.index()].store(false, SeqCst);
    }

    /// Returns `true` if `side` has raised its flag, that is, it either holds
    /// the lock or is waiting for it.
    ///
    /// The answer may be stale by the time the caller reads it.
    #[inline]
    #[must_use]
    pub fn is_interested(&self, side: Side) -> bool {
        self.interested[side.index()].load(SeqCst)
    }

    /// Raises the flag of `side` and volunteers it as the victim.
    fn enter(&self, side: Side) {
        self.interested[side.index()].store(true, SeqCst);
        self.victim.store(side.as_victim(), SeqCst);
        // The stores above must be visible before the sibling's flag is read.
        fence(SeqCst);
    }

    /// Returns `true` while `side` must keep waiting.
    fn must_wait(&self, side: Side) -> bool {
        self.interested[side.other().index()].load(SeqCst)
            && self.victim.load(SeqCst) == side.as_victim()
    }
}

impl<R: Relax> TwoPartyLock<R> {
    /// Acquires the lock for `side`, busy-waiting until the sibling side is
    /// either not interested or has conceded.
    ///
    /// Never parks the thread. The [`Relax`] policy runs on every failed
    /// check of the wait condition.
    #[inline]
    pub fn acquire(&self, side: Side) {
        self.enter(side);
        self.wait(side);
    }

    /// Spins until `side` is allowed into the critical section.
    fn wait(&self, side: Side) {
        let mut relax = R::new();
        while self.must_wait(side) {
            relax.relax();
        }
    }
}

#[cfg(not(all(loom, test)))]
impl<R> Default for TwoPartyLock<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> fmt::Debug for TwoPartyLock<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let victim = if self.victim.load(SeqCst) { Side::One } else { Side::Zero };
        f.debug_struct("TwoPartyLock")
            .field("interested", &[self.is_interested(Side::Zero), self.is_interested(Side::One)])
            .field("victim", &victim)
            .finish()
    }
}

#[cfg(all(not(loom), test))]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;

    use super::Side;
    use crate::test::tests;
    use crate::yields::TwoPartyLock;

    #[test]
    fn side_arithmetic() {
        assert_eq!(Side::from_index(0), Side::Zero);
        assert_eq!(Side::from_index(3), Side::One);
        assert_eq!(Side::Zero.other(), Side::One);
        assert_eq!(Side::One.other().index(), 0);
    }

    #[test]
    fn smoke() {
        let lock = TwoPartyLock::new();
        lock.acquire(Side::Zero);
        assert!(lock.is_interested(Side::Zero));
        assert!(!lock.is_interested(Side::One));
        lock.release(Side::Zero);
        lock.acquire(Side::One);
        lock.release(Side::One);
        assert!(!lock.is_interested(Side::Zero));
        assert!(!lock.is_interested(Side::One));
    }

    #[test]
    fn uncontended_side_enters_even_as_victim() {
        let lock = TwoPartyLock::new();
        // Both acquisitions leave `Zero` as the victim with nobody to yield to.
        lock.acquire(Side::Zero);
        lock.release(Side::Zero);
        lock.acquire(Side::Zero);
        lock.release(Side::Zero);
    }

    #[test]
    fn debug_shows_flags() {
        let lock = TwoPartyLock::new();
        lock.acquire(Side::One);
        let msg = format!("{lock:?}");
        assert_eq!(msg, "TwoPartyLock { interested: [false, true], victim: One }");
        lock.release(Side::One);
    }

    #[test]
    fn lots_and_lots() {
        tests::two_party_lots_and_lots::<crate::relax::Yield>();
    }

    #[test]
    fn lots_and_lots_spin() {
        tests::two_party_lots_and_lots::<crate::relax::Spin>();
    }

    #[test]
    fn mutual_exclusion() {
        tests::two_party_mutual_exclusion::<crate::relax::Yield>();
    }

    // Once a side has passed its doorway, the sibling side gets into the
    // critical section at most once before it does.
    #[test]
    fn bounded_waiting() {
        const ROUNDS: usize = 2_000;

        let lock = Arc::new(TwoPartyLock::new());
        let entries = Arc::new([AtomicUsize::new(0), AtomicUsize::new(0)]);
        let barrier = Arc::new(Barrier::new(2));

        let handles: Vec<_> = [Side::Zero, Side::One]
            .into_iter()
            .map(|side| {
                let lock = Arc::clone(&lock);
                let entries = Arc::clone(&entries);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let other = &entries[side.other().index()];
                    barrier.wait();
                    for _ in 0..ROUNDS {
                        lock.enter(side);
                        let before = other.load(Ordering::SeqCst);
                        lock.wait(side);
                        let bypassed = other.load(Ordering::SeqCst) - before;
                        assert!(bypassed <= 1, "{side:?} was bypassed {bypassed} times");
                        entries[side.index()].fetch_add(1, Ordering::SeqCst);
                        lock.release(side);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(entries[0].load(Ordering::SeqCst), ROUNDS);
        assert_eq!(entries[1].load(Ordering::SeqCst), ROUNDS);
    }
}

#[cfg(all(loom, test))]
mod model {
    use crate::loom::models;

    #[test]
    fn two_party_join() {
        models::two_party_join();
    }
}
