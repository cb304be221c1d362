//! A tournament tree lock: mutual exclusion for a fixed, power-of-two number
//! of threads, composed of Peterson's two-party [spin-locks].
//!
//! A single shared lock word makes every waiting thread contend on the same
//! cache line. A tree lock instead hands each thread a leaf of a balanced
//! binary tree. Every internal node is a two-party lock, a duel between its
//! two children, and a thread holds the tree lock once it has won every duel
//! from its leaf to the root. With `N` threads, each acquisition plays
//! `log2(N)` contested duels and meets at most one rival in each of them. The
//! main properties of this mechanism are:
//!
//! - contention on any one memory location is limited to two threads;
//! - a thread that has entered a duel is bypassed at most once at that duel;
//! - the tree is built once and never changes; and
//! - no thread is ever parked, all waiting is busy-waiting.
//!
//! The construction appears as the tournament tree lock in Herlihy and Shavit's
//! [The Art of Multiprocessor Programming], built from [Peterson's algorithm].
//!
//! ## Use cases
//!
//! [Spinlocks are usually not what you want]. OS-based mutexes such as
//! [`std::sync::Mutex`] park waiting threads and free their processor for
//! other work. A tree lock is only a good fit for short critical sections
//! shared by a small, known set of threads that each run on a processor of
//! their own. It has no notion of priority, so a thread descheduled while it
//! holds a duel keeps its rivals spinning until it runs again.
//!
//! ## Capacity
//!
//! A [`TreeLock`] is built for a capacity of `N` threads, where `N` is a power
//! of two. The first time a thread uses the lock it is assigned the next free
//! slot, and it keeps that slot for the life of the lock. Slots are never
//! reused, so at most `N` distinct threads may use a lock over its whole life.
//! See [`TreeLock::register`].
//!
//! ## Relax policies
//!
//! Both [`TreeLock`] and [`TwoPartyLock`] are generic over the [`Relax`]
//! policy run while waiting. The [`spins`], [`yields`] and [`loops`] modules
//! provide aliases for each policy.
//!
//! ## Features
//!
//! This crate does not provide any default features. Features that can be
//! enabled are:
//!
//! ### yield
//!
//! The `yield` feature enables the [`yields`] aliases and the yielding relax
//! policies. Those call [`std::thread::yield_now`] while waiting, which may
//! cause a context switch. This trades the latency of pure spinning for
//! better behaviour when threads outnumber processors.
//!
//! [`Relax`]: relax::Relax
//! [`yields`]: crate::yields
//! [spin-locks]: https://en.wikipedia.org/wiki/Spinlock
//! [Peterson's algorithm]: https://en.wikipedia.org/wiki/Peterson%27s_algorithm
//! [The Art of Multiprocessor Programming]: https://www.elsevier.com/books/the-art-of-multiprocessor-programming/herlihy/978-0-12-415950-1
//! [Spinlocks are usually not what you want]: https://matklad.github.io/2020/01/02/spinlocks-considered-harmful.html

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]

mod cfg;
mod error;
mod lock;
mod registry;
mod tree;
mod two_party;

pub mod relax;

pub use error::{InvalidConfiguration, Result, TreeLockError};
pub use lock::TreeLock;
pub use registry::{Registration, SlotRegistry};
pub use two_party::{Side, TwoPartyLock};

#[cfg(test)]
mod test;

#[cfg(all(loom, test))]
#[cfg(not(tarpaulin_include))]
mod loom;

/// Locks that implement a `spin` relax policy.
///
/// During contention, a waiting thread spins while signaling the processor
/// that it is running a busy-wait spin-loop.
pub mod spins {
    use crate::relax::Spin;

    /// A [`TreeLock`] that implements the [`Spin`] relax policy.
    ///
    /// # Example
    ///
    /// ```
    /// use treelock::spins::TreeLock;
    ///
    /// let lock = TreeLock::new(4).unwrap();
    /// lock.lock();
    /// lock.unlock();
    /// ```
    /// [`TreeLock`]: crate::TreeLock
    pub type TreeLock = crate::TreeLock<Spin>;

    /// A [`TwoPartyLock`] that implements the [`Spin`] relax policy.
    ///
    /// # Example
    ///
    /// ```
    /// use treelock::spins::TwoPartyLock;
    /// use treelock::Side;
    ///
    /// let lock = TwoPartyLock::new();
    /// lock.acquire(Side::One);
    /// lock.release(Side::One);
    /// ```
    /// [`TwoPartyLock`]: crate::TwoPartyLock
    pub type TwoPartyLock = crate::TwoPartyLock<Spin>;

    /// Locks that implement a `spin with backoff` relax policy.
    ///
    /// During contention, a waiting thread performs exponential backoff while
    /// spinning, signaling the processor that it is running a busy-wait
    /// spin-loop.
    pub mod backoff {
        use crate::relax::SpinBackoff;

        /// A [`TreeLock`] that implements the [`SpinBackoff`] relax policy.
        ///
        /// # Example
        ///
        /// ```
        /// use treelock::spins::backoff::TreeLock;
        ///
        /// let lock = TreeLock::new(4).unwrap();
        /// lock.lock_then(|| ());
        /// ```
        /// [`TreeLock`]: crate::TreeLock
        pub type TreeLock = crate::TreeLock<SpinBackoff>;

        /// A [`TwoPartyLock`] that implements the [`SpinBackoff`] relax policy.
        ///
        /// [`TwoPartyLock`]: crate::TwoPartyLock
        pub type TwoPartyLock = crate::TwoPartyLock<SpinBackoff>;
    }
}

/// Locks that implement a `yield` relax policy.
///
/// During contention, a waiting thread yields the current time slice to the
/// OS scheduler.
#[cfg(any(feature = "yield", test))]
#[cfg_attr(docsrs, doc(cfg(feature = "yield")))]
pub mod yields {
    use crate::relax::Yield;

    /// A [`TreeLock`] that implements the [`Yield`] relax policy.
    ///
    /// # Example
    ///
    /// ```
    /// use treelock::yields::TreeLock;
    ///
    /// let lock = TreeLock::new(4).unwrap();
    /// lock.lock_then(|| ());
    /// ```
    /// [`TreeLock`]: crate::TreeLock
    pub type TreeLock = crate::TreeLock<Yield>;

    /// A [`TwoPartyLock`] that implements the [`Yield`] relax policy.
    ///
    /// [`TwoPartyLock`]: crate::TwoPartyLock
    pub type TwoPartyLock = crate::TwoPartyLock<Yield>;

    /// Locks that implement a `yield with backoff` relax policy.
    ///
    /// During contention, a waiting thread performs exponential backoff while
    /// spinning, up to a threshold, then yields back to the OS scheduler.
    #[cfg(feature = "yield")]
    pub mod backoff {
        use crate::relax::YieldBackoff;

        /// A [`TreeLock`] that implements the [`YieldBackoff`] relax policy.
        ///
        /// # Example
        ///
        /// ```
        /// use treelock::yields::backoff::TreeLock;
        ///
        /// let lock = TreeLock::new(4).unwrap();
        /// lock.lock_then(|| ());
        /// ```
        /// [`TreeLock`]: crate::TreeLock
        pub type TreeLock = crate::TreeLock<YieldBackoff>;

        /// A [`TwoPartyLock`] that implements the [`YieldBackoff`] relax policy.
        ///
        /// [`TwoPartyLock`]: crate::TwoPartyLock
        pub type TwoPartyLock = crate::TwoPartyLock<YieldBackoff>;
    }
}

/// Locks that implement a `loop` relax policy.
///
/// During contention, a waiting thread rapidly spins without telling the CPU
/// to do any power down.
pub mod loops {
    use crate::relax::Loop;

    /// A [`TreeLock`] that implements the [`Loop`] relax policy.
    ///
    /// # Example
    ///
    /// ```
    /// use treelock::loops::TreeLock;
    ///
    /// let lock = TreeLock::new(1).unwrap();
    /// lock.lock_then(|| ());
    /// ```
    /// [`TreeLock`]: crate::TreeLock
    pub type TreeLock = crate::TreeLock<Loop>;

    /// A [`TwoPartyLock`] that implements the [`Loop`] relax policy.
    ///
    /// [`TwoPartyLock`]: crate::TwoPartyLock
    pub type TwoPartyLock = crate::TwoPartyLock<Loop>;
}
