//! Candidate index: name -> suppliers sorted by preference.
//!
//! Buckets are kept sorted on insert with a caller supplied comparator, so
//! the index itself never needs to know how suppliers are ranked. Removal is
//! by identity and `reorder` re-sorts every bucket after a batch of state
//! changes has invalidated the ranking.

use indexmap::IndexMap;
use std::cmp::Ordering;

/// Multi-valued, preference-sorted lookup table
#[derive(Debug, Clone)]
pub struct CandidateIndex<T> {
    buckets: IndexMap<String, Vec<T>>,
}

impl<T> Default for CandidateIndex<T> {
    fn default() -> Self {
        Self {
            buckets: IndexMap::new(),
        }
    }
}

impl<T: Copy + PartialEq> CandidateIndex<T> {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a supplier, keeping the bucket sorted
    ///
    /// Equal-ranked suppliers keep insertion order.
    pub fn put<F>(&mut self, name: &str, value: T, mut compare: F)
    where
        F: FnMut(&T, &T) -> Ordering,
    {
        let bucket = self.buckets.entry(name.to_string()).or_default();
        let position = match bucket.last() {
            Some(last) if compare(last, &value) == Ordering::Greater => {
                bucket.partition_point(|existing| compare(existing, &value) != Ordering::Greater)
            }
            _ => bucket.len(),
        };
        bucket.insert(position, value);
    }

    /// Remove a supplier by identity; returns whether it was present
    pub fn remove(&mut self, name: &str, value: &T) -> bool {
        let Some(bucket) = self.buckets.get_mut(name) else {
            return false;
        };
        let Some(position) = bucket.iter().position(|existing| existing == value) else {
            return false;
        };
        bucket.remove(position);
        if bucket.is_empty() {
            self.buckets.shift_remove(name);
        }
        true
    }

    /// Current suppliers for a name, most preferred first
    pub fn get(&self, name: &str) -> &[T] {
        self.buckets.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, name: &str, value: &T) -> bool {
        self.get(name).contains(value)
    }

    /// Re-sort all buckets
    pub fn reorder<F>(&mut self, mut compare: F)
    where
        F: FnMut(&T, &T) -> Ordering,
    {
        for bucket in self.buckets.values_mut() {
            bucket.sort_by(&mut compare);
        }
    }

    /// Number of distinct names
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Iterate over every (name, suppliers) bucket
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[T])> {
        self.buckets.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}
