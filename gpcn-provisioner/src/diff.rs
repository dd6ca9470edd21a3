//! Set difference between a prior and a desired identifier list.

use std::collections::HashSet;

/// Identifiers to add and remove to turn one list into another.
///
/// Order follows the input lists; duplicates are collapsed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl ListDiff {
    /// `added = new - old`, `removed = old - new`.
    pub fn between(old: &[String], new: &[String]) -> Self {
        Self {
            added: minus(new, old),
            removed: minus(old, new),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    /// The diff that undoes this one.
    pub fn inverse(&self) -> Self {
        Self {
            added: self.removed.clone(),
            removed: self.added.clone(),
        }
    }
}

fn minus(left: &[String], right: &[String]) -> Vec<String> {
    let exclude: HashSet<&str> = right.iter().map(String::as_str).collect();
    let mut seen = HashSet::new();
    left.iter()
        .filter(|id| !exclude.contains(id.as_str()) && seen.insert(id.as_str()))
        .cloned()
        .collect()
}
