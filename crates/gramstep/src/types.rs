//! Utility types.

use std::{collections::VecDeque, hash::Hash};

type BuildHasher = std::hash::BuildHasherDefault<rustc_hash::FxHasher>;

pub type Map<K, V> = indexmap::IndexMap<K, V, BuildHasher>;
pub type Set<T> = indexmap::IndexSet<T, BuildHasher>;

/// A FIFO work list that ignores values already waiting in it.
#[derive(Debug)]
pub struct Queue<T> {
    queue: VecDeque<T>,
    hash: Set<T>,
}
impl<T> Default for Queue<T> {
    fn default() -> Self {
        Self {
            queue: VecDeque::new(),
            hash: Set::default(),
        }
    }
}

impl<T> Queue<T>
where
    T: Clone + Eq + Hash,
{
    pub fn push(&mut self, value: T) {
        if self.hash.insert(value.clone()) {
            self.queue.push_back(value);
        }
    }

    pub fn pop(&mut self) -> Option<T> {
        let value = self.queue.pop_front()?;
        self.hash.swap_remove(&value);
        Some(value)
    }
}

impl<T> FromIterator<T> for Queue<T>
where
    T: Clone + Eq + Hash,
{
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut queue = Self::default();
        for value in iter {
            queue.push(value);
        }
        queue
    }
}
