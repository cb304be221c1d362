//! The tournament tree: a flat arena of duels wired to a root sentinel.
//!
//! The arena holds `2 * capacity` entries. Index `0` is the root sentinel and
//! index `1` is the topmost duel, the sentinel's only child. Each row of the
//! tree doubles the previous one, so a row of size `k` lives at `k..2 * k`,
//! and the node at index `i > 1` duels at parent `i / 2` on side `i % 2`. The
//! last row, `capacity..2 * capacity`, is the leaf row: slot `s` enters the
//! tree at leaf `capacity + s`.
//!
//! A leaf is private to its slot, so the duel played there is never
//! contested. Every node above it is shared by exactly two children, one per
//! side, which makes `log2(capacity)` contested duels per climb.

use crate::error::{InvalidConfiguration, Result};
use crate::relax::Relax;
use crate::two_party::{Side, TwoPartyLock};

/// Arena index of the root sentinel.
const SENTINEL: usize = 0;

/// Arena index of the topmost duel.
const TOP: usize = 1;

/// A tree position: either a duel or the sentinel that ends the climb.
enum Node<R> {
    Sentinel,
    Duel(Duel<R>),
}

/// A two-party lock, the arena index of the node above it, and the side it
/// plays there.
struct Duel<R> {
    lock: TwoPartyLock<R>,
    parent: usize,
    side: Side,
}

impl<R> Node<R> {
    fn duel(parent: usize, side: Side) -> Self {
        Self::Duel(Duel { lock: TwoPartyLock::new(), parent, side })
    }
}

/// An immutable tree of duels, shared by all slots.
pub(crate) struct Tree<R> {
    nodes: Box<[Node<R>]>,
    capacity: usize,
}

impl<R> Tree<R> {
    /// Builds a tree with `capacity` leaves.
    ///
    /// Starts from a single duel under the sentinel and doubles the row until
    /// it is `capacity` wide. The last row is the leaf row.
    pub fn build(capacity: usize) -> Result<Self> {
        let len = Self::arena_len(capacity)?;
        let mut nodes = Vec::with_capacity(len);
        nodes.push(Node::Sentinel);
        nodes.push(Node::duel(SENTINEL, Side::Zero));
        let mut row = TOP..TOP + 1;
        while row.len() < capacity {
            let next = row.end..row.end + 2 * row.len();
            for j in 0..next.len() {
                nodes.push(Node::duel(row.start + j / 2, Side::from_index(j)));
            }
            row = next;
        }
        debug_assert_eq!(nodes.len(), len);
        debug_assert_eq!(row.start, capacity);
        Ok(Self { nodes: nodes.into_boxed_slice(), capacity })
    }

    /// Validates `capacity` and returns the arena length it requires.
    fn arena_len(capacity: usize) -> Result<usize> {
        if capacity == 0 {
            return Err(InvalidConfiguration::Empty.into());
        }
        if !capacity.is_power_of_two() {
            return Err(InvalidConfiguration::NotPowerOfTwo(capacity).into());
        }
        let len = capacity.checked_mul(2).ok_or(InvalidConfiguration::TooLarge(capacity))?;
        Ok(len)
    }

    /// Number of leaves, that is, of thread slots.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of contested duels between a leaf and the sentinel.
    pub fn depth(&self) -> usize {
        self.capacity.trailing_zeros() as usize
    }

    /// Total number of arena entries, sentinel included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Arena index of the leaf that belongs to `slot`, if there is one.
    pub fn leaf(&self, slot: usize) -> Option<usize> {
        (slot < self.capacity).then(|| self.capacity + slot)
    }

    /// Returns the duel at `index`, or `None` for the sentinel.
    #[cfg(all(not(loom), test))]
    fn get(&self, index: usize) -> Option<&Duel<R>> {
        match &self.nodes[index] {
            Node::Sentinel => None,
            Node::Duel(duel) => Some(duel),
        }
    }

    /// Returns the arena indices visited by a climb from `leaf`, leaf first,
    /// sentinel excluded.
    #[cfg(all(not(loom), test))]
    fn path(&self, leaf: usize) -> impl Iterator<Item = usize> + '_ {
        let mut next = Some(leaf);
        core::iter::from_fn(move || {
            let index = next?;
            let duel = self.get(index)?;
            next = Some(duel.parent);
            Some(index)
        })
    }

    /// Releases every node from the sentinel down to `index`, for `side` at
    /// `index`.
    ///
    /// The parent is released before the local flag is cleared, so a climb
    /// is unwound root first. Mutual exclusion holds in either order, only
    /// the waiter that wakes first changes.
    pub fn unlock(&self, index: usize, side: Side) {
        match &self.nodes[index] {
            Node::Sentinel => {}
            Node::Duel(duel) => {
                self.unlock(duel.parent, duel.side);
                duel.lock.release(side);
            }
        }
    }

    /// Number of contested duels on the climb from `slot`'s private leaf.
    #[cfg(all(not(loom), test))]
    fn duels(&self, slot: usize) -> Option<usize> {
        self.leaf(slot).map(|leaf| self.path(leaf).count() - 1)
    }

    /// Returns `true` if `side` is interested at the duel at `index`.
    #[cfg(all(not(loom), test))]
    fn is_interested(&self, index: usize, side: Side) -> bool {
        self.get(index).map_or(false, |duel| duel.lock.is_interested(side))
    }
}

impl<R: Relax> Tree<R> {
    /// Wins the duel at `index` as `side`, then climbs to the parent.
    ///
    /// Returns once every duel up to and including the topmost one is won.
    pub fn lock(&self, index: usize, side: Side) {
        match &self.nodes[index] {
            Node::Sentinel => {}
            Node::Duel(duel) => {
                duel.lock.acquire(side);
                self.lock(duel.parent, duel.side);
            }
        }
    }
}

#[cfg(all(not(loom), test))]
mod test {
    use super::{Node, Tree, SENTINEL, TOP};
    use crate::error::{InvalidConfiguration, TreeLockError};
    use crate::relax::Yield;
    use crate::two_party::Side;

    type YieldTree = Tree<Yield>;

    fn invalid(capacity: usize) -> InvalidConfiguration {
        match YieldTree::build(capacity) {
            Err(TreeLockError::InvalidConfiguration(reason)) => reason,
            Err(err) => panic!("unexpected error: {err}"),
            Ok(_) => panic!("capacity {capacity} was accepted"),
        }
    }

    #[test]
    fn rejects_empty() {
        assert_eq!(invalid(0), InvalidConfiguration::Empty);
    }

    #[test]
    fn rejects_non_powers_of_two() {
        for capacity in [3, 5, 6, 7, 9, 12, 100, usize::MAX] {
            assert_eq!(invalid(capacity), InvalidConfiguration::NotPowerOfTwo(capacity));
        }
    }

    #[test]
    fn rejects_unaddressable() {
        let capacity = 1 << (usize::BITS - 1);
        assert_eq!(invalid(capacity), InvalidConfiguration::TooLarge(capacity));
    }

    #[test]
    fn arena_layout() {
        for k in 0..8 {
            let capacity = 1 << k;
            let tree = YieldTree::build(capacity).unwrap();
            assert_eq!(tree.capacity(), capacity);
            assert_eq!(tree.len(), 2 * capacity);
            assert!(matches!(tree.nodes[SENTINEL], Node::Sentinel));
            for (index, node) in tree.nodes.iter().enumerate().skip(TOP) {
                let Node::Duel(duel) = node else { panic!("sentinel at {index}") };
                if index == TOP {
                    assert_eq!((duel.parent, duel.side), (SENTINEL, Side::Zero));
                } else {
                    assert_eq!((duel.parent, duel.side), (index / 2, Side::from_index(index)));
                }
            }
        }
    }

    #[test]
    fn single_slot_tree() {
        let tree = YieldTree::build(1).unwrap();
        assert_eq!(tree.depth(), 0);
        assert_eq!(tree.leaf(0), Some(TOP));
        assert_eq!(tree.leaf(1), None);
        assert_eq!(tree.path(TOP).collect::<Vec<_>>(), [TOP]);
        assert_eq!(tree.duels(0), Some(0));
        assert_eq!(tree.duels(1), None);
    }

    #[test]
    fn leaf_row_in_slot_order() {
        let tree = YieldTree::build(8).unwrap();
        let leaves: Vec<_> = (0..8).map(|slot| tree.leaf(slot).unwrap()).collect();
        assert_eq!(leaves, (8..16).collect::<Vec<_>>());
        assert_eq!(tree.leaf(8), None);
    }

    #[test]
    fn depth_is_independent_of_slot() {
        for k in 0..10 {
            let capacity = 1 << k;
            let tree = YieldTree::build(capacity).unwrap();
            assert_eq!(tree.depth(), k);
            for slot in 0..capacity {
                let leaf = tree.leaf(slot).unwrap();
                // The leaf is private; every node above it is a contested duel.
                assert_eq!(tree.path(leaf).count(), k + 1);
                assert_eq!(tree.duels(slot), Some(k));
                assert_eq!(tree.path(leaf).last(), Some(TOP));
            }
        }
    }

    #[test]
    fn siblings_meet_on_opposite_sides() {
        let tree = YieldTree::build(4).unwrap();
        let (a, b) = (tree.leaf(2).unwrap(), tree.leaf(3).unwrap());
        let (Some(a), Some(b)) = (tree.get(a), tree.get(b)) else { panic!() };
        assert_eq!(a.parent, b.parent);
        assert_ne!(a.side, b.side);
    }

    #[test]
    fn climb_raises_and_unwind_clears_the_path() {
        let tree = YieldTree::build(8).unwrap();
        let leaf = tree.leaf(5).unwrap();
        tree.lock(leaf, Side::Zero);

        let path: Vec<_> = tree.path(leaf).collect();
        assert_eq!(path, [13, 6, 3, TOP]);
        assert!(tree.is_interested(leaf, Side::Zero));
        for pair in path.windows(2) {
            assert!(tree.is_interested(pair[1], Side::from_index(pair[0])));
        }
        // Nothing outside the path was touched.
        assert!(!tree.is_interested(tree.leaf(4).unwrap(), Side::Zero));
        assert!(!tree.is_interested(6, Side::Zero));

        tree.unlock(leaf, Side::Zero);
        for index in TOP..tree.len() {
            assert!(!tree.is_interested(index, Side::Zero));
            assert!(!tree.is_interested(index, Side::One));
        }
    }

    #[test]
    fn sentinel_ignores_both_sides() {
        let tree = YieldTree::build(2).unwrap();
        tree.lock(SENTINEL, Side::Zero);
        tree.lock(SENTINEL, Side::One);
        tree.unlock(SENTINEL, Side::One);
        tree.unlock(SENTINEL, Side::Zero);
        assert_eq!(tree.path(SENTINEL).count(), 0);
    }
}
