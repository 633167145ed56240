//! Type-indexed configuration and result storage passed between passes.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;

/// A map holding at most one value of each type.
///
/// Passes read their configuration from the input map by type and publish
/// results (such as renaming tables) into the output map.
#[derive(Default)]
pub struct DataMap {
    entries: HashMap<TypeId, Box<dyn Any>>,
}

impl DataMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value`, replacing any previous value of the same type.
    pub fn insert<T: Any>(&mut self, value: T) -> &mut Self {
        self.entries.insert(TypeId::of::<T>(), Box::new(value));
        self
    }

    pub fn get<T: Any>(&self) -> Option<&T> {
        self.entries
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref())
    }

    pub fn get_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.entries
            .get_mut(&TypeId::of::<T>())
            .and_then(|v| v.downcast_mut())
    }

    /// Removes and returns the value of type `T`.
    pub fn take<T: Any>(&mut self) -> Option<T> {
        self.entries
            .remove(&TypeId::of::<T>())
            .and_then(|v| v.downcast().ok())
            .map(|b| *b)
    }

    pub fn contains<T: Any>(&self) -> bool {
        self.entries.contains_key(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Moves every entry of `other` into `self`.
    pub fn extend(&mut self, other: DataMap) {
        self.entries.extend(other.entries);
    }
}

impl fmt::Debug for DataMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataMap")
            .field("entries", &self.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Config(u32);

    #[test]
    fn values_are_keyed_by_type() {
        let mut data = DataMap::new();
        data.insert(Config(3)).insert(String::from("x"));
        assert_eq!(data.get::<Config>(), Some(&Config(3)));
        assert_eq!(data.get::<String>().map(String::as_str), Some("x"));
        assert!(data.get::<u64>().is_none());

        data.insert(Config(4));
        assert_eq!(data.len(), 2);
        assert_eq!(data.take::<Config>(), Some(Config(4)));
        assert!(!data.contains::<Config>());
    }
}
