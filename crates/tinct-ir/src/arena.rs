//! Arena storage with typed handles.
//!
//! Module-level declarations (types, globals, overrides, functions, locals)
//! live in arenas and are referenced by [`Handle`]. Passes that drop
//! declarations rebuild the arena with [`Arena::retain_mapped`] and rewrite
//! every reference through the returned [`HandleMap`].

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::ops::{Index, IndexMut};

/// A typed index into an [`Arena`] or [`UniqueArena`].
pub struct Handle<T> {
    index: u32,
    _phantom: PhantomData<T>,
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl<T> Eq for Handle<T> {}

impl<T> PartialOrd for Handle<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Handle<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.index.cmp(&other.index)
    }
}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.index)
    }
}

impl<T> Handle<T> {
    /// Creates a handle from a zero-based index.
    pub fn new(index: u32) -> Self {
        Self {
            index,
            _phantom: PhantomData,
        }
    }

    /// Returns the zero-based index of this handle.
    pub fn index(self) -> usize {
        self.index as usize
    }
}

fn checked_index(len: usize) -> u32 {
    u32::try_from(len).unwrap_or_else(|_| panic!("arena overflow: {len} items exceeds u32::MAX"))
}

/// Old-to-new handle translation produced when an arena is compacted.
#[derive(Debug)]
pub struct HandleMap<T> {
    new_index: Vec<Option<u32>>,
    _phantom: PhantomData<T>,
}

impl<T> HandleMap<T> {
    /// Returns the new handle for `old`, or `None` if it was removed.
    pub fn get(&self, old: Handle<T>) -> Option<Handle<T>> {
        self.new_index
            .get(old.index())
            .copied()
            .flatten()
            .map(Handle::new)
    }

    /// Returns `true` if no handle changed position and nothing was removed.
    pub fn is_identity(&self) -> bool {
        self.new_index
            .iter()
            .enumerate()
            .all(|(i, n)| *n == Some(i as u32))
    }
}

/// An append-only arena with typed [`Handle`]-based access.
#[derive(Clone, Debug, PartialEq)]
pub struct Arena<T> {
    data: Vec<T>,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Arena<T> {
    /// Creates an empty arena.
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    /// Returns the number of elements in the arena.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the arena contains no elements.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the handle that the next appended value will receive.
    ///
    /// # Panics
    ///
    /// Panics if the arena already holds more than `u32::MAX` items.
    pub fn next_handle(&self) -> Handle<T> {
        Handle::new(checked_index(self.data.len()))
    }

    /// Appends a value and returns its handle.
    ///
    /// # Panics
    ///
    /// Panics if the arena already holds more than `u32::MAX` items.
    pub fn append(&mut self, value: T) -> Handle<T> {
        let handle = self.next_handle();
        self.data.push(value);
        handle
    }

    /// Returns a reference to the value if the handle is valid.
    pub fn try_get(&self, handle: Handle<T>) -> Option<&T> {
        self.data.get(handle.index())
    }

    /// Returns `true` if `handle` refers to an element of this arena.
    pub fn contains(&self, handle: Handle<T>) -> bool {
        handle.index() < self.data.len()
    }

    /// Iterates over `(handle, &value)` pairs.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (Handle<T>, &T)> {
        self.data
            .iter()
            .enumerate()
            .map(|(i, v)| (Handle::new(i as u32), v))
    }

    /// Iterates over `(handle, &mut value)` pairs.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Handle<T>, &mut T)> {
        self.data
            .iter_mut()
            .enumerate()
            .map(|(i, v)| (Handle::new(i as u32), v))
    }

    /// Iterates over the handles in order.
    pub fn handles(&self) -> impl Iterator<Item = Handle<T>> + use<T> {
        (0..checked_index(self.data.len())).map(Handle::new)
    }

    /// Removes every element for which `keep` returns `false`, preserving
    /// the relative order of the survivors.
    ///
    /// The returned map must be applied to every handle that referred into
    /// this arena.
    pub fn retain_mapped(&mut self, mut keep: impl FnMut(Handle<T>, &T) -> bool) -> HandleMap<T> {
        let old = std::mem::take(&mut self.data);
        let mut new_index = Vec::with_capacity(old.len());
        for (i, value) in old.into_iter().enumerate() {
            if keep(Handle::new(i as u32), &value) {
                new_index.push(Some(checked_index(self.data.len())));
                self.data.push(value);
            } else {
                new_index.push(None);
            }
        }
        HandleMap {
            new_index,
            _phantom: PhantomData,
        }
    }
}

impl<T> Index<Handle<T>> for Arena<T> {
    type Output = T;

    fn index(&self, handle: Handle<T>) -> &T {
        &self.data[handle.index()]
    }
}

impl<T> IndexMut<Handle<T>> for Arena<T> {
    fn index_mut(&mut self, handle: Handle<T>) -> &mut T {
        &mut self.data[handle.index()]
    }
}

/// A deduplicating arena that returns the same [`Handle`] for equal values.
///
/// Insertion order is a valid dependency order: a value can only refer to
/// handles that were inserted before it.
#[derive(Clone, Debug)]
pub struct UniqueArena<T> {
    data: Vec<T>,
    map: HashMap<T, u32>,
}

impl<T: PartialEq> PartialEq for UniqueArena<T> {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data
    }
}

impl<T: Hash + Eq> Default for UniqueArena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Hash + Eq> UniqueArena<T> {
    /// Creates an empty deduplicating arena.
    pub fn new() -> Self {
        Self {
            data: Vec::new(),
            map: HashMap::new(),
        }
    }

    /// Returns the number of unique elements in the arena.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the arena contains no elements.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Inserts a value, returning an existing handle if it is already present.
    ///
    /// # Panics
    ///
    /// Panics if the arena already holds more than `u32::MAX` items.
    pub fn insert(&mut self, value: T) -> Handle<T>
    where
        T: Clone,
    {
        if let Some(&index) = self.map.get(&value) {
            return Handle::new(index);
        }
        let index = checked_index(self.data.len());
        self.map.insert(value.clone(), index);
        self.data.push(value);
        Handle::new(index)
    }

    /// Returns the handle of `value` if it has been inserted.
    pub fn get(&self, value: &T) -> Option<Handle<T>> {
        self.map.get(value).map(|&i| Handle::new(i))
    }

    /// Returns a reference to the value if the handle is valid.
    pub fn try_get(&self, handle: Handle<T>) -> Option<&T> {
        self.data.get(handle.index())
    }

    /// Iterates over `(handle, &value)` pairs in insertion order.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (Handle<T>, &T)> {
        self.data
            .iter()
            .enumerate()
            .map(|(i, v)| (Handle::new(i as u32), v))
    }

    /// Rewrites elements in place and rebuilds the lookup table.
    ///
    /// Handles stay valid. If two elements become equal, lookups return
    /// the earlier one.
    pub fn map_in_place(&mut self, mut f: impl FnMut(Handle<T>, &mut T))
    where
        T: Clone,
    {
        for (i, value) in self.data.iter_mut().enumerate() {
            f(Handle::new(i as u32), value);
        }
        self.map.clear();
        for (i, value) in self.data.iter().enumerate() {
            self.map.entry(value.clone()).or_insert(i as u32);
        }
    }
}

impl<T> Index<Handle<T>> for UniqueArena<T> {
    type Output = T;

    fn index(&self, handle: Handle<T>) -> &T {
        &self.data[handle.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_index() {
        let mut arena = Arena::new();
        let a = arena.append("main");
        let b = arena.append("helper");
        assert_eq!(arena[a], "main");
        assert_eq!(arena[b], "helper");
        assert_eq!(arena.len(), 2);
        assert!(arena.contains(b));
        assert!(!arena.contains(Handle::new(2)));
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    #[should_panic(expected = "arena overflow")]
    fn index_past_u32_max_panics() {
        checked_index(u32::MAX as usize + 1);
    }

    #[test]
    fn next_handle_predicts_append() {
        let mut arena = Arena::<u32>::new();
        let predicted = arena.next_handle();
        assert_eq!(arena.append(7), predicted);
    }

    #[test]
    fn retain_mapped_compacts_and_remaps() {
        let mut arena = Arena::new();
        let a = arena.append('a');
        let b = arena.append('b');
        let c = arena.append('c');
        let map = arena.retain_mapped(|_, v| *v != 'b');
        assert_eq!(arena.len(), 2);
        assert_eq!(map.get(a), Some(Handle::new(0)));
        assert_eq!(map.get(b), None);
        let c2 = map.get(c).unwrap();
        assert_eq!(arena[c2], 'c');
        assert!(!map.is_identity());
    }

    #[test]
    fn retain_everything_is_identity() {
        let mut arena = Arena::new();
        arena.append(1);
        arena.append(2);
        let map = arena.retain_mapped(|_, _| true);
        assert!(map.is_identity());
    }

    #[test]
    fn unique_arena_dedup() {
        let mut arena = UniqueArena::new();
        let h0 = arena.insert("vec4<f32>");
        let h1 = arena.insert("u32");
        let h2 = arena.insert("vec4<f32>");
        assert_eq!(h0, h2);
        assert_ne!(h0, h1);
        assert_eq!(arena.len(), 2);
        assert_eq!(arena.get(&"u32"), Some(h1));
        assert_eq!(arena.get(&"bool"), None);
    }

    #[test]
    fn map_in_place_keeps_handles() {
        let mut arena = UniqueArena::new();
        let a = arena.insert(String::from("a"));
        let b = arena.insert(String::from("b"));
        arena.map_in_place(|h, v| {
            if h == b {
                v.push('2');
            }
        });
        assert_eq!(arena[a], "a");
        assert_eq!(arena[b], "b2");
        assert_eq!(arena.get(&"b2".to_string()), Some(b));
        assert_eq!(arena.get(&"b".to_string()), None);
    }

    #[test]
    fn handle_ordering_and_debug() {
        let h0: Handle<u32> = Handle::new(0);
        let h1: Handle<u32> = Handle::new(1);
        assert!(h0 < h1);
        assert_eq!(format!("{h1:?}"), "[1]");
    }
}
