use thiserror::Error;

/// The reason a capacity was rejected by [`TreeLock::new`].
///
/// [`TreeLock::new`]: crate::TreeLock::new
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidConfiguration {
    /// A tree lock needs at least one slot.
    #[error("at least one thread slot is required")]
    Empty,

    /// Leaves of a balanced binary tree only come in powers of two.
    #[error("capacity must be a power of two, got {0}")]
    NotPowerOfTwo(usize),

    /// The node arena for this capacity is not addressable.
    #[error("capacity {0} is too large for the node arena")]
    TooLarge(usize),
}

/// Errors produced by a [`TreeLock`].
///
/// [`TreeLock`]: crate::TreeLock
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeLockError {
    /// The requested capacity cannot be built into a tree.
    #[error("invalid tree lock configuration: {0}")]
    InvalidConfiguration(#[from] InvalidConfiguration),

    /// More distinct threads have used the lock than it has leaves.
    #[error("thread slot {slot} is out of range for a tree lock of capacity {capacity}")]
    CapacityExceeded {
        /// The slot handed out to the calling thread.
        slot: usize,
        /// The number of leaves in the tree.
        capacity: usize,
    },
}

/// A specialized [`Result`](core::result::Result) for tree lock operations.
pub type Result<T> = core::result::Result<T, TreeLockError>;

#[cfg(all(not(loom), test))]
mod test {
    use super::{InvalidConfiguration, TreeLockError};

    #[test]
    fn messages() {
        let err = TreeLockError::from(InvalidConfiguration::NotPowerOfTwo(6));
        assert_eq!(
            err.to_string(),
            "invalid tree lock configuration: capacity must be a power of two, got 6"
        );
        let err = TreeLockError::CapacityExceeded { slot: 4, capacity: 4 };
        assert_eq!(
            err.to_string(),
            "thread slot 4 is out of range for a tree lock of capacity 4"
        );
    }
}
