#[cfg(all(not(loom), test))]
pub mod tests {
    // Test bodies shared by every relax policy, in the spirit of the Rust's
    // Mutex test suite: many threads hammering a counter that is only correct
    // under mutual exclusion.

    use std::panic::{self, AssertUnwindSafe};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;

    use crate::error::TreeLockError;
    use crate::lock::TreeLock;
    use crate::relax::Relax;
    use crate::two_party::{Side, TwoPartyLock};

    /// A counter whose increments are a separate load and store, so that
    /// concurrent increments lose updates unless they are serialized.
    #[derive(Default)]
    pub struct RacyCounter(AtomicUsize);

    impl RacyCounter {
        pub fn inc(&self) {
            let value = self.0.load(Ordering::Relaxed);
            self.0.store(value + 1, Ordering::Relaxed);
        }

        pub fn get(&self) -> usize {
            self.0.load(Ordering::Relaxed)
        }
    }

    /// Counts the threads currently inside a critical section.
    #[derive(Default)]
    pub struct Occupancy(AtomicUsize);

    impl Occupancy {
        /// Enters the section, asserting nobody else is inside.
        pub fn enter(&self) {
            let inside = self.0.fetch_add(1, Ordering::SeqCst) + 1;
            assert_eq!(inside, 1, "{inside} threads inside the critical section");
        }

        pub fn exit(&self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    const TWO_PARTY_ITERS: usize = 10_000;

    pub fn two_party_lots_and_lots<R: Relax>() {
        let lock = TwoPartyLock::<R>::new();
        let counter = RacyCounter::default();
        thread::scope(|s| {
            for side in [Side::Zero, Side::One] {
                let (lock, counter) = (&lock, &counter);
                s.spawn(move || {
                    for _ in 0..TWO_PARTY_ITERS {
                        lock.acquire(side);
                        counter.inc();
                        lock.release(side);
                    }
                });
            }
        });
        assert_eq!(counter.get(), 2 * TWO_PARTY_ITERS);
    }

    pub fn two_party_mutual_exclusion<R: Relax>() {
        let lock = TwoPartyLock::<R>::new();
        let occupancy = Occupancy::default();
        thread::scope(|s| {
            for side in [Side::Zero, Side::One] {
                let (lock, occupancy) = (&lock, &occupancy);
                s.spawn(move || {
                    for _ in 0..TWO_PARTY_ITERS {
                        lock.acquire(side);
                        occupancy.enter();
                        occupancy.exit();
                        lock.release(side);
                    }
                });
            }
        });
    }

    /// Runs `threads` threads against a tree lock of `capacity` leaves, each
    /// incrementing a shared counter `iters` times.
    pub fn lots_and_lots_on<R: Relax>(capacity: usize, threads: usize, iters: usize) {
        let lock = TreeLock::<R>::new(capacity).unwrap();
        let counter = RacyCounter::default();
        let barrier = Barrier::new(threads);
        thread::scope(|s| {
            for _ in 0..threads {
                s.spawn(|| {
                    barrier.wait();
                    for _ in 0..iters {
                        lock.lock();
                        counter.inc();
                        lock.unlock();
                    }
                });
            }
        });
        assert_eq!(counter.get(), threads * iters);
    }

    /// Fills every slot of a tree lock with a thread.
    pub fn lots_and_lots<R: Relax>(threads: usize, iters: usize) {
        lots_and_lots_on::<R>(threads, threads, iters);
    }

    pub fn mutual_exclusion<R: Relax>(capacity: usize) {
        const ITERS: usize = 1_000;
        let lock = TreeLock::<R>::new(capacity).unwrap();
        let occupancy = Occupancy::default();
        thread::scope(|s| {
            for _ in 0..capacity {
                s.spawn(|| {
                    for _ in 0..ITERS {
                        lock.lock_then(|| {
                            occupancy.enter();
                            occupancy.exit();
                        });
                    }
                });
            }
        });
    }

    pub fn smoke<R: Relax>() {
        let lock = TreeLock::<R>::new(4).unwrap();
        lock.lock();
        lock.unlock();
        lock.lock();
        lock.unlock();
    }

    pub fn single_slot<R: Relax>() {
        let lock = TreeLock::<R>::new(1).unwrap();
        assert_eq!(lock.depth(), 0);
        for _ in 0..100 {
            lock.lock_then(|| ());
        }
        assert_eq!(lock.register(), Ok(0));
    }

    pub fn slot_stability<R: Relax>() {
        const THREADS: usize = 4;
        let lock = TreeLock::<R>::new(THREADS).unwrap();
        let slots: Vec<usize> = thread::scope(|s| {
            let handles: Vec<_> = (0..THREADS)
                .map(|_| {
                    s.spawn(|| {
                        let slot = lock.register().unwrap();
                        for _ in 0..100 {
                            lock.lock();
                            assert_eq!(lock.register(), Ok(slot));
                            lock.unlock();
                        }
                        slot
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        let mut sorted = slots;
        sorted.sort_unstable();
        assert_eq!(sorted, (0..THREADS).collect::<Vec<_>>());
    }

    pub fn capacity_exceeded<R: Relax>() {
        let lock = TreeLock::<R>::new(2).unwrap();
        thread::scope(|s| {
            s.spawn(|| assert_eq!(lock.register(), Ok(0)));
        });
        thread::scope(|s| {
            s.spawn(|| assert_eq!(lock.register(), Ok(1)));
        });
        let err = TreeLockError::CapacityExceeded { slot: 2, capacity: 2 };
        assert_eq!(lock.register(), Err(err));
        // The slot stays assigned.
        assert_eq!(lock.register(), Err(err));
    }

    pub fn capacity_exceeded_panics_on_lock<R: Relax>() {
        let lock = TreeLock::<R>::new(1).unwrap();
        thread::scope(|s| {
            s.spawn(|| lock.lock_then(|| ()));
        });
        let payload = panic::catch_unwind(AssertUnwindSafe(|| lock.lock())).unwrap_err();
        let msg = payload.downcast::<String>().unwrap();
        assert_eq!(*msg, "thread slot 1 is out of range for a tree lock of capacity 1");
    }

    pub fn lock_then_unlocks_on_unwind<R: Relax>() {
        let lock = TreeLock::<R>::new(2).unwrap();
        let counter = RacyCounter::default();
        thread::scope(|s| {
            let joined = s
                .spawn(|| {
                    lock.lock_then(|| {
                        counter.inc();
                        panic!();
                    })
                })
                .join();
            assert!(joined.is_err());
        });
        // The lock was released during unwinding, or this would spin forever.
        lock.lock_then(|| counter.inc());
        assert_eq!(counter.get(), 2);
    }

    pub fn test_lock_debug<R: Relax>() {
        let lock = TreeLock::<R>::new(8).unwrap();
        lock.lock_then(|| ());
        let msg = format!("{lock:?}");
        assert_eq!(msg, "TreeLock { capacity: 8, depth: 3, registered: 1 }");
    }
}
