//! Add/remove diff between two fetch results.
//!
//! Records are matched by value (`Hash + Eq`), never by reference: every
//! fetch produces fresh objects, so only content can say two records are
//! the same.

use std::collections::HashSet;
use std::hash::Hash;

#[derive(Debug, PartialEq, Eq)]
pub struct Changes<'a, T> {
    /// Items of the new collection absent from the old one, in new order.
    pub added: Vec<&'a T>,
    /// Items of the old collection absent from the new one, in old order.
    pub removed: Vec<&'a T>,
}

impl<T> Changes<'_, T> {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

pub fn diff<'a, T: Hash + Eq>(old: &'a [T], new: &'a [T]) -> Changes<'a, T> {
    let old_set: HashSet<&T> = old.iter().collect();
    let new_set: HashSet<&T> = new.iter().collect();

    Changes {
        added: new.iter().filter(|item| !old_set.contains(item)).collect(),
        removed: old.iter().filter(|item| !new_set.contains(item)).collect(),
    }
}
