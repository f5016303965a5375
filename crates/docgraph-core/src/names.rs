//! Ordered set of target names carried by a sync item.
//!
//! Names are kept sorted so iteration is deterministic. The set is only
//! turned into a plain list at the history persistence edge
//! (see [`crate::history::HistoryEntry`]).

use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameSet {
    names: BTreeSet<String>,
}

impl NameSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// A set holding exactly one name.
    pub fn single(name: impl Into<String>) -> Self {
        let mut set = Self::new();
        set.insert(name);
        set
    }

    /// Insert a name. Returns `true` if it was not already present.
    pub fn insert(&mut self, name: impl Into<String>) -> bool {
        self.names.insert(name.into())
    }

    /// Union `other` into this set, returning how many names were new.
    pub fn extend_from(&mut self, other: &NameSet) -> usize {
        other
            .names
            .iter()
            .filter(|name| self.names.insert((*name).clone()))
            .count()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn is_superset(&self, other: &NameSet) -> bool {
        self.names.is_superset(&other.names)
    }

    /// Names present in `self` but not in `other`.
    pub fn difference(&self, other: &NameSet) -> NameSet {
        self.names.difference(&other.names).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    /// Serialize to an ordered list.
    pub fn to_vec(&self) -> Vec<String> {
        self.names.iter().cloned().collect()
    }
}

impl<S: Into<String>> FromIterator<S> for NameSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            names: iter.into_iter().map(Into::into).collect(),
        }
    }
}

impl fmt::Display for NameSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined: Vec<&str> = self.iter().collect();
        write!(f, "{}", joined.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_is_idempotent() {
        let mut set = NameSet::single("Status");
        assert!(!set.insert("Status"));
        assert!(set.insert("Owner"));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_extend_counts_new_names() {
        let mut set: NameSet = ["a", "b"].into_iter().collect();
        let other: NameSet = ["b", "c", "d"].into_iter().collect();
        assert_eq!(set.extend_from(&other), 2);
        assert_eq!(set.to_vec(), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_superset_and_difference() {
        let all: NameSet = ["a", "b", "c"].into_iter().collect();
        let some: NameSet = ["a", "c"].into_iter().collect();
        assert!(all.is_superset(&some));
        assert!(!some.is_superset(&all));
        assert_eq!(all.difference(&some).to_vec(), vec!["b"]);
    }

    #[test]
    fn test_display_joins_sorted() {
        let set: NameSet = ["zeta", "alpha"].into_iter().collect();
        assert_eq!(set.to_string(), "alpha, zeta");
    }
}
