pub mod models {
    use loom::sync::atomic::AtomicUsize;
    use loom::sync::Arc;
    use loom::{model, thread};

    use core::sync::atomic::Ordering::Relaxed;

    use crate::two_party::Side;
    use crate::yields::{TreeLock, TwoPartyLock};

    /// Increments `count` with a separate load and store, so that an
    /// unserialized pair of increments can lose one of them.
    fn racy_inc(count: &AtomicUsize) {
        let value = count.load(Relaxed);
        count.store(value + 1, Relaxed);
    }

    /// Evaluates that the two sides of a two-party lock serialize their
    /// critical sections.
    pub fn two_party_join() {
        model(|| {
            let lock = Arc::new(TwoPartyLock::new());
            let count = Arc::new(AtomicUsize::new(0));

            let handle = {
                let (lock, count) = (Arc::clone(&lock), Arc::clone(&count));
                thread::spawn(move || {
                    lock.acquire(Side::One);
                    racy_inc(&count);
                    lock.release(Side::One);
                })
            };

            lock.acquire(Side::Zero);
            racy_inc(&count);
            lock.release(Side::Zero);

            handle.join().unwrap();
            assert_eq!(count.load(Relaxed), 2);
        });
    }

    /// Evaluates that two threads climbing a capacity-2 tree serialize their
    /// critical sections.
    pub fn tree_lock_join() {
        model(|| {
            const CAPACITY: usize = 2;
            let lock = Arc::new(TreeLock::new(CAPACITY).unwrap());
            let count = Arc::new(AtomicUsize::new(0));

            let handle = {
                let (lock, count) = (Arc::clone(&lock), Arc::clone(&count));
                thread::spawn(move || lock.lock_then(|| racy_inc(&count)))
            };

            lock.lock_then(|| racy_inc(&count));

            handle.join().unwrap();
            assert_eq!(count.load(Relaxed), CAPACITY);
        });
    }
}
