//! Persistent append lists
//!
//! [`PersistentList`] is an immutable, structurally shared chain of nodes.
//! Appending builds a new head that points at the previous list, so every
//! list value ever observed stays valid and frozen no matter what happens
//! afterwards. Nodes only ever point backwards; there are no cycles.
//!
//! [`AtomicList`] is the one piece of mutable state: a shared slot holding
//! the current head, updated with compare-and-swap. Readers load the slot and
//! get a snapshot; writers race optimistically and retry with back-off.
//!
//! ```rust
//! use rpcflow_core::persistent::AtomicList;
//!
//! let slot = AtomicList::new();
//! slot.thread_safe_add(1);
//! let before = slot.load();
//! slot.thread_safe_add(2);
//!
//! assert_eq!(before.to_vec(), vec![1]);
//! assert_eq!(slot.load().to_vec(), vec![1, 2]);
//! ```

use arc_swap::ArcSwap;
use std::fmt;
use std::sync::Arc;

/// Longest list walked oldest-first by recursion
const MAX_VISIT_DEPTH: usize = 256;

struct Node<T> {
    value: T,
    next: Option<Arc<Node<T>>>,
}

/// Immutable singly linked list with structural sharing
///
/// Values are stored newest first. `add` is O(1) and never touches the list
/// it was called on.
pub struct PersistentList<T> {
    head: Option<Arc<Node<T>>>,
    len: usize,
}

impl<T> PersistentList<T> {
    /// The empty list
    pub const fn empty() -> Self {
        Self { head: None, len: 0 }
    }

    /// Returns a new list with `value` in front of this one
    pub fn add(&self, value: T) -> Self {
        Self {
            head: Some(Arc::new(Node {
                value,
                next: self.head.clone(),
            })),
            len: self.len + 1,
        }
    }

    /// Returns a new list with every value of `values` appended in order
    pub fn add_range<I: IntoIterator<Item = T>>(&self, values: I) -> Self {
        values
            .into_iter()
            .fold(self.clone(), |list, value| list.add(value))
    }

    /// Number of values
    pub fn len(&self) -> usize {
        self.len
    }

    /// True for the empty list
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Iterates newest first
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            next: self.head.as_deref(),
        }
    }

    /// Calls `f` for every value
    ///
    /// With `from_end` the walk starts at the oldest value, giving insertion
    /// order; otherwise it starts at the newest. Newest-first never
    /// allocates. Oldest-first recurses on short lists and buffers node
    /// references on long ones, so stack use stays bounded.
    pub fn visit<F: FnMut(&T)>(&self, mut f: F, from_end: bool) {
        fn oldest_first<T, F: FnMut(&T)>(node: Option<&Node<T>>, f: &mut F) {
            if let Some(node) = node {
                oldest_first(node.next.as_deref(), f);
                f(&node.value);
            }
        }

        if !from_end {
            self.iter().for_each(f);
        } else if self.len <= MAX_VISIT_DEPTH {
            oldest_first(self.head.as_deref(), &mut f);
        } else {
            let values: Vec<&T> = self.iter().collect();
            values.into_iter().rev().for_each(f);
        }
    }

    /// True when any value equals `value`
    pub fn contains(&self, value: &T) -> bool
    where
        T: PartialEq,
    {
        self.iter().any(|v| v == value)
    }

    /// Values in insertion order
    pub fn to_vec(&self) -> Vec<T>
    where
        T: Clone,
    {
        let mut out = Vec::with_capacity(self.len);
        self.visit(|v| out.push(v.clone()), true);
        out
    }

    /// A new list holding the same values in the opposite order
    pub fn reverse(&self) -> Self
    where
        T: Clone,
    {
        self.iter()
            .fold(Self::empty(), |list, value| list.add(value.clone()))
    }

    /// True when both lists share the same head node
    ///
    /// Two lists with equal identity hold identical contents, which makes
    /// this a cheap change detector for snapshot caches.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        match (&self.head, &other.head) {
            (None, None) => true,
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl<T> Clone for PersistentList<T> {
    fn clone(&self) -> Self {
        Self {
            head: self.head.clone(),
            len: self.len,
        }
    }
}

impl<T> Default for PersistentList<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T> Drop for PersistentList<T> {
    // Unlinks uniquely owned nodes iteratively so long chains cannot
    // overflow the stack through recursive drops.
    fn drop(&mut self) {
        let mut next = self.head.take();
        while let Some(node) = next {
            match Arc::try_unwrap(node) {
                Ok(mut node) => next = node.next.take(),
                Err(_) => break,
            }
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for PersistentList<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl<T> FromIterator<T> for PersistentList<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::empty().add_range(iter)
    }
}

/// Newest-first iterator over a [`PersistentList`]
pub struct Iter<'a, T> {
    next: Option<&'a Node<T>>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.next?;
        self.next = node.next.as_deref();
        Some(&node.value)
    }
}

/// Shared slot holding the current head of a [`PersistentList`]
///
/// All updates are lock-free compare-and-swap loops; readers never block.
pub struct AtomicList<T> {
    slot: ArcSwap<PersistentList<T>>,
}

impl<T> AtomicList<T> {
    /// A slot holding the empty list
    pub fn new() -> Self {
        Self {
            slot: ArcSwap::from_pointee(PersistentList::empty()),
        }
    }

    /// Frozen snapshot of the current contents
    pub fn load(&self) -> PersistentList<T> {
        PersistentList::clone(&self.slot.load())
    }

    /// Appends `value`, retrying with back-off when another writer wins the race
    pub fn thread_safe_add(&self, value: T)
    where
        T: Clone,
    {
        self.update(|list| list.add(value.clone()));
    }

    /// Appends every value as one atomic step
    pub fn thread_safe_add_range(&self, values: Vec<T>)
    where
        T: Clone,
    {
        self.update(|list| list.add_range(values.iter().cloned()));
    }

    /// Atomically replaces the contents with the empty list, returning what was there
    pub fn thread_safe_empty(&self) -> PersistentList<T> {
        let previous = self.slot.swap(Arc::new(PersistentList::empty()));
        PersistentList::clone(&previous)
    }

    fn update<F>(&self, mut build: F)
    where
        F: FnMut(&PersistentList<T>) -> PersistentList<T>,
    {
        let mut backoff = Backoff::default();
        loop {
            let current = self.slot.load_full();
            let next = Arc::new(build(&current));
            let previous = self.slot.compare_and_swap(&current, next);
            if Arc::ptr_eq(&*previous, &current) {
                return;
            }
            backoff.snooze();
        }
    }
}

impl<T> Default for AtomicList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: fmt::Debug> fmt::Debug for AtomicList<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AtomicList").field(&self.load()).finish()
    }
}

/// Exponential spin, then yield to the scheduler
#[derive(Default)]
struct Backoff {
    step: u32,
}

impl Backoff {
    const SPIN_LIMIT: u32 = 6;

    fn snooze(&mut self) {
        if self.step <= Self::SPIN_LIMIT {
            for _ in 0..(1u32 << self.step) {
                std::hint::spin_loop();
            }
            self.step += 1;
        } else {
            std::thread::yield_now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_is_pure() {
        let empty = PersistentList::empty();
        let one = empty.add(1);
        let two = one.add(2);

        assert!(empty.is_empty());
        assert_eq!(one.to_vec(), vec![1]);
        assert_eq!(two.to_vec(), vec![1, 2]);
        assert_eq!(two.len(), 2);
    }

    #[test]
    fn test_visit_directions() {
        let list: PersistentList<i32> = (1..=4).collect();

        let mut newest_first = Vec::new();
        list.visit(|v| newest_first.push(*v), false);
        assert_eq!(newest_first, vec![4, 3, 2, 1]);

        let mut oldest_first = Vec::new();
        list.visit(|v| oldest_first.push(*v), true);
        assert_eq!(oldest_first, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_contains_and_reverse() {
        let list = PersistentList::empty().add_range(["a", "b", "c"]);
        assert!(list.contains(&"b"));
        assert!(!list.contains(&"z"));
        assert_eq!(list.reverse().to_vec(), vec!["c", "b", "a"]);
    }

    #[test]
    fn test_ptr_eq_tracks_identity() {
        let a = PersistentList::empty().add(1);
        let b = a.clone();
        let c = PersistentList::empty().add(1);

        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&c));
        assert!(PersistentList::<i32>::empty().ptr_eq(&PersistentList::empty()));
    }

    #[test]
    fn test_snapshot_survives_later_writes() {
        let slot = AtomicList::new();
        slot.thread_safe_add_range(vec![1, 2]);
        let frozen = slot.load();

        slot.thread_safe_add(3);
        let drained = slot.thread_safe_empty();

        assert_eq!(frozen.to_vec(), vec![1, 2]);
        assert_eq!(drained.to_vec(), vec![1, 2, 3]);
        assert!(slot.load().is_empty());
    }

    #[test]
    fn test_concurrent_adds_are_not_lost() {
        const WRITERS: usize = 8;
        const PER_WRITER: usize = 500;

        let slot = AtomicList::new();
        std::thread::scope(|scope| {
            for writer in 0..WRITERS {
                let slot = &slot;
                scope.spawn(move || {
                    for i in 0..PER_WRITER {
                        slot.thread_safe_add(writer * PER_WRITER + i);
                    }
                });
            }
        });

        let mut values = slot.load().to_vec();
        assert_eq!(values.len(), WRITERS * PER_WRITER);
        values.sort_unstable();
        values.dedup();
        assert_eq!(values.len(), WRITERS * PER_WRITER);
    }

    #[test]
    fn test_long_chain_drops_without_overflow() {
        let list: PersistentList<u32> = (0..200_000).collect();
        assert_eq!(list.len(), 200_000);
        drop(list);
    }

    #[test]
    fn test_long_chain_walks_oldest_first() {
        let list: PersistentList<u32> = (0..200_000).collect();

        let values = list.to_vec();
        assert_eq!(values.len(), 200_000);
        assert_eq!(values[0], 0);
        assert_eq!(values[199_999], 199_999);

        let mut expected = 0;
        list.visit(
            |v| {
                assert_eq!(*v, expected);
                expected += 1;
            },
            true,
        );
        assert_eq!(expected, 200_000);
    }
}
