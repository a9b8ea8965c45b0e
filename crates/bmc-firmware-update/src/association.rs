//! Published relations between version objects and lifecycle tags

use serde::{Deserialize, Serialize};

/// Forward name of the `active` relation
pub const ACTIVE_FWD: &str = "active";
/// Reverse name of the `active` relation
pub const ACTIVE_REV: &str = "software_version";
/// Forward name of the `functional` relation
pub const FUNCTIONAL_FWD: &str = "functional";
/// Reverse name of the `functional` relation
pub const FUNCTIONAL_REV: &str = "software_version";
/// Forward name of the `updateable` relation
pub const UPDATEABLE_FWD: &str = "updateable";
/// Reverse name of the `updateable` relation
pub const UPDATEABLE_REV: &str = "software_version";
/// Forward name of the relation from an activation to its inventory anchor
pub const INVENTORY_FWD: &str = "inventory";
/// Reverse name of the relation from an activation to its inventory anchor
pub const INVENTORY_REV: &str = "activation";

/// Kind of lifecycle relation held in the shared set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationKind {
    /// Version currently running for its class
    Active,
    /// Version the class boots from today
    Functional,
    /// Class can be updated at all
    Updateable,
}

impl RelationKind {
    /// Forward and reverse relation names
    pub fn names(self) -> (&'static str, &'static str) {
        match self {
            RelationKind::Active => (ACTIVE_FWD, ACTIVE_REV),
            RelationKind::Functional => (FUNCTIONAL_FWD, FUNCTIONAL_REV),
            RelationKind::Updateable => (UPDATEABLE_FWD, UPDATEABLE_REV),
        }
    }
}

/// One `(forward, reverse, object path)` tuple
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Association {
    /// Forward relation name
    pub forward: String,
    /// Reverse relation name
    pub reverse: String,
    /// Object the relation points at
    pub path: String,
}

impl Association {
    /// Build an association from its parts
    pub fn new(forward: &str, reverse: &str, path: impl Into<String>) -> Self {
        Self {
            forward: forward.to_string(),
            reverse: reverse.to_string(),
            path: path.into(),
        }
    }

    /// Build a lifecycle relation of the given kind
    pub fn of_kind(kind: RelationKind, path: impl Into<String>) -> Self {
        let (forward, reverse) = kind.names();
        Self::new(forward, reverse, path)
    }

    /// Relation from an activation to its inventory anchor
    pub fn inventory(anchor: impl Into<String>) -> Self {
        Self::new(INVENTORY_FWD, INVENTORY_REV, anchor)
    }
}

/// Ordered list of lifecycle associations shared by all versions
///
/// Every mutation returns whether the list changed so the owner can republish
/// the whole list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssociationSet {
    entries: Vec<Association>,
}

impl AssociationSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a relation unless an identical one is already present
    pub fn add(&mut self, kind: RelationKind, path: &str) -> bool {
        let association = Association::of_kind(kind, path);
        if self.entries.contains(&association) {
            return false;
        }
        self.entries.push(association);
        true
    }

    /// Remove every relation pointing at `path`, returning how many went
    pub fn remove_path(&mut self, path: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|a| a.path != path);
        before.saturating_sub(self.entries.len())
    }

    /// Remove the relation of `kind` pointing at `path`
    pub fn remove(&mut self, kind: RelationKind, path: &str) -> bool {
        let association = Association::of_kind(kind, path);
        let before = self.entries.len();
        self.entries.retain(|a| *a != association);
        self.entries.len() != before
    }

    /// Whether a relation of `kind` points at `path`
    pub fn contains(&self, kind: RelationKind, path: &str) -> bool {
        let (forward, _) = kind.names();
        self.entries
            .iter()
            .any(|a| a.forward == forward && a.path == path)
    }

    /// Current list, in insertion order
    pub fn as_slice(&self) -> &[Association] {
        &self.entries
    }

    /// Number of relations
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_is_unique_per_kind_and_path() {
        let mut set = AssociationSet::new();
        assert!(set.add(RelationKind::Active, "/sw/a"));
        assert!(!set.add(RelationKind::Active, "/sw/a"));
        assert!(set.add(RelationKind::Functional, "/sw/a"));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_remove_path_removes_all_kinds() {
        let mut set = AssociationSet::new();
        set.add(RelationKind::Active, "/sw/a");
        set.add(RelationKind::Updateable, "/sw/a");
        set.add(RelationKind::Active, "/sw/b");
        assert_eq!(set.remove_path("/sw/a"), 2);
        assert!(!set.contains(RelationKind::Active, "/sw/a"));
        assert!(set.contains(RelationKind::Active, "/sw/b"));
        assert_eq!(set.remove_path("/sw/missing"), 0);
    }

    #[test]
    fn test_insertion_order_is_kept() {
        let mut set = AssociationSet::new();
        set.add(RelationKind::Updateable, "/sw/b");
        set.add(RelationKind::Active, "/sw/a");
        let paths: Vec<&str> = set.as_slice().iter().map(|a| a.path.as_str()).collect();
        assert_eq!(paths, vec!["/sw/b", "/sw/a"]);
    }
}
