use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::channel;
use std::sync::Arc;
use std::thread;

use treelock::spins::TreeLock;

fn main() {
    const N: usize = 8;

    // Spawn one thread per slot to increment a shared counter with a separate
    // load and store, and let the main thread know once all increments are
    // done. The counter is only correct because the lock serializes them.
    let lock = Arc::new(TreeLock::new(N).unwrap());
    let count = Arc::new(AtomicUsize::new(0));

    let (tx, rx) = channel();
    for _ in 0..N {
        let (lock, count, tx) = (Arc::clone(&lock), Arc::clone(&count), tx.clone());
        thread::spawn(move || {
            lock.lock_then(|| {
                let value = count.load(Ordering::Relaxed) + 1;
                count.store(value, Ordering::Relaxed);
                if value == N {
                    tx.send(()).unwrap();
                }
            });
        });
    }
    let _message = rx.recv();

    assert_eq!(count.load(Ordering::Relaxed), N);
    // Every slot has been handed out, so the main thread may not lock.
    assert!(lock.register().is_err());
}
