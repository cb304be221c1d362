use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;

use treelock::relax::Relax;
use treelock::{InvalidConfiguration, TreeLock, TreeLockError};

// Threads in these tests may outnumber the processors, so waiting threads
// give up their time slice instead of spinning it away.
struct YieldNow;

impl Relax for YieldNow {
    fn new() -> Self {
        Self
    }

    fn relax(&mut self) {
        thread::yield_now();
    }
}

type Lock = TreeLock<YieldNow>;

/// Increments with a separate load and store, which loses updates unless
/// increments are serialized.
fn racy_inc(count: &AtomicUsize) {
    let value = count.load(Ordering::Relaxed);
    count.store(value + 1, Ordering::Relaxed);
}

fn hammer(threads: usize, iters: usize) -> usize {
    let lock = Arc::new(Lock::new(threads).unwrap());
    let count = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let lock = Arc::clone(&lock);
            let count = Arc::clone(&count);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..iters {
                    lock.lock();
                    racy_inc(&count);
                    lock.unlock();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    count.load(Ordering::Relaxed)
}

#[test]
fn accepts_powers_of_two() {
    for k in 0..12 {
        let capacity = 1 << k;
        let lock = Lock::new(capacity).unwrap();
        assert_eq!(lock.capacity(), capacity);
        assert_eq!(lock.depth(), k);
    }
}

#[test]
fn rejects_other_capacities() {
    let err = Lock::new(0).unwrap_err();
    assert_eq!(err, TreeLockError::InvalidConfiguration(InvalidConfiguration::Empty));
    for capacity in [3, 5, 6, 10, 1000] {
        let err = Lock::new(capacity).unwrap_err();
        let reason = InvalidConfiguration::NotPowerOfTwo(capacity);
        assert_eq!(err, TreeLockError::InvalidConfiguration(reason));
    }
}

#[test]
fn no_lost_updates_eight_threads() {
    assert_eq!(hammer(8, 1_000), 8_000);
}

#[test]
fn no_lost_updates_two_threads() {
    assert_eq!(hammer(2, 100_000), 200_000);
}

#[test]
fn at_most_one_thread_inside() {
    const THREADS: usize = 8;
    const ITERS: usize = 1_000;

    let lock = Lock::new(THREADS).unwrap();
    let inside = AtomicUsize::new(0);
    thread::scope(|s| {
        for _ in 0..THREADS {
            s.spawn(|| {
                for _ in 0..ITERS {
                    lock.lock();
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    assert_eq!(now, 1);
                    inside.fetch_sub(1, Ordering::SeqCst);
                    lock.unlock();
                }
            });
        }
    });
}

#[test]
fn slots_follow_first_use() {
    let lock = Lock::new(4).unwrap();
    for expected in 0..4 {
        let slot = thread::scope(|s| {
            s.spawn(|| {
                let slot = lock.register().unwrap();
                for _ in 0..10 {
                    lock.lock_then(|| assert_eq!(lock.register(), Ok(slot)));
                }
                slot
            })
            .join()
            .unwrap()
        });
        assert_eq!(slot, expected);
    }
}

#[test]
fn capacity_is_enforced() {
    let lock = Lock::new(2).unwrap();
    thread::scope(|s| {
        s.spawn(|| lock.lock_then(|| ()));
        s.spawn(|| lock.lock_then(|| ()));
    });
    let err = TreeLockError::CapacityExceeded { slot: 2, capacity: 2 };
    assert_eq!(lock.register(), Err(err));
}

#[test]
#[should_panic(expected = "out of range for a tree lock of capacity 1")]
fn capacity_exceeded_panics() {
    let lock = Lock::new(1).unwrap();
    thread::scope(|s| {
        s.spawn(|| lock.lock_then(|| ()));
    });
    lock.lock();
}

// A holder at one leaf keeps its sibling waiting low in the tree and its
// cousins waiting near the root. Unwinding releases the root duel before
// the leaf's own, so either group may go next; only exclusion and progress
// are asserted.
#[test]
fn release_order_contention() {
    const THREADS: usize = 4;
    const ROUNDS: usize = 200;

    let lock = Lock::new(THREADS).unwrap();
    let inside = AtomicUsize::new(0);
    let order = Mutex::new(Vec::with_capacity(THREADS * ROUNDS));
    let barrier = Barrier::new(THREADS);

    thread::scope(|s| {
        for _ in 0..THREADS {
            s.spawn(|| {
                let slot = lock.register().unwrap();
                barrier.wait();
                for _ in 0..ROUNDS {
                    lock.lock_then(|| {
                        assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                        order.lock().unwrap().push(slot);
                        // Hold long enough for every rival to queue up.
                        for _ in 0..64 {
                            thread::yield_now();
                        }
                        inside.fetch_sub(1, Ordering::SeqCst);
                    });
                }
            });
        }
    });

    let order = order.into_inner().unwrap();
    assert_eq!(order.len(), THREADS * ROUNDS);
    for slot in 0..THREADS {
        assert_eq!(order.iter().filter(|&&s| s == slot).count(), ROUNDS);
    }
}

/// Locks and sets `done` when dropped.
struct LockOnDrop {
    lock: Arc<Lock>,
    done: Arc<AtomicBool>,
}

impl Drop for LockOnDrop {
    fn drop(&mut self) {
        self.lock.lock_then(|| self.done.store(true, Ordering::SeqCst));
    }
}

thread_local! {
    static ON_EXIT: RefCell<Option<LockOnDrop>> = RefCell::new(None);
}

#[test]
fn lock_from_thread_local_destructor() {
    let lock = Arc::new(Lock::new(2).unwrap());
    let done = Arc::new(AtomicBool::new(false));

    let handle = thread::spawn({
        let (lock, done) = (Arc::clone(&lock), Arc::clone(&done));
        move || {
            let slot = lock.register().unwrap();
            lock.lock_then(|| ());
            ON_EXIT.with(|on_exit| *on_exit.borrow_mut() = Some(LockOnDrop { lock, done }));
            slot
        }
    });
    let slot = handle.join().unwrap();

    assert!(done.load(Ordering::SeqCst));
    // The destructor reused the thread's slot instead of taking a new one.
    assert_eq!(slot, 0);
    assert_eq!(lock.register(), Ok(1));
}
