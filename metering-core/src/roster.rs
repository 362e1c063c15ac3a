//! Active participant set with O(1) membership and removal
//!
//! Dense vector of addresses plus a position index. Removal swaps the last
//! element into the vacated slot, updates the moved element's index entry and
//! truncates, so iteration order is unstable but removal never shifts the
//! whole tail.

use crate::types::Address;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Unordered set of currently active participants for one stream
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActiveRoster {
    /// Dense member list
    members: Vec<Address>,

    /// Member position in `members`; presence in this map is membership
    positions: HashMap<Address, usize>,
}

impl ActiveRoster {
    /// Create an empty roster
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of active members
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the roster is empty
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Membership test
    pub fn contains(&self, participant: &Address) -> bool {
        self.positions.contains_key(participant)
    }

    /// Insert a member. Returns false when already present.
    pub fn insert(&mut self, participant: Address) -> bool {
        if self.positions.contains_key(&participant) {
            return false;
        }

        self.positions.insert(participant.clone(), self.members.len());
        self.members.push(participant);
        true
    }

    /// Remove a member by swapping the last element into its slot.
    /// Returns false when not present, so double removal is a no-op.
    pub fn remove(&mut self, participant: &Address) -> bool {
        let Some(index) = self.positions.remove(participant) else {
            return false;
        };

        let last = self.members.len() - 1;
        if index != last {
            self.members.swap(index, last);
            self.positions.insert(self.members[index].clone(), index);
        }
        self.members.truncate(last);
        true
    }

    /// Current members in slot order
    pub fn members(&self) -> &[Address] {
        &self.members
    }

    /// Owned copy of the current membership, for iteration that mutates
    pub fn snapshot(&self) -> Vec<Address> {
        self.members.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> Address {
        Address::new(s)
    }

    #[test]
    fn test_insert_and_contains() {
        let mut roster = ActiveRoster::new();
        assert!(roster.insert(addr("alice")));
        assert!(roster.insert(addr("bob")));

        assert!(roster.contains(&addr("alice")));
        assert!(roster.contains(&addr("bob")));
        assert!(!roster.contains(&addr("carol")));
        assert_eq!(roster.len(), 2);
    }

    #[test]
    fn test_double_insert_rejected() {
        let mut roster = ActiveRoster::new();
        assert!(roster.insert(addr("alice")));
        assert!(!roster.insert(addr("alice")));
        assert_eq!(roster.len(), 1);
    }

    #[test]
    fn test_swap_remove_updates_moved_index() {
        let mut roster = ActiveRoster::new();
        roster.insert(addr("alice"));
        roster.insert(addr("bob"));
        roster.insert(addr("carol"));

        // Removing the first member swaps carol into slot 0
        assert!(roster.remove(&addr("alice")));
        assert_eq!(roster.len(), 2);
        assert!(!roster.contains(&addr("alice")));
        assert!(roster.contains(&addr("carol")));

        // The moved member must still be removable via its new index
        assert!(roster.remove(&addr("carol")));
        assert_eq!(roster.members(), &[addr("bob")]);
    }

    #[test]
    fn test_double_remove_is_noop() {
        let mut roster = ActiveRoster::new();
        roster.insert(addr("alice"));

        assert!(roster.remove(&addr("alice")));
        assert!(!roster.remove(&addr("alice")));
        assert!(roster.is_empty());
    }

    #[test]
    fn test_remove_last_member() {
        let mut roster = ActiveRoster::new();
        roster.insert(addr("alice"));
        roster.insert(addr("bob"));

        assert!(roster.remove(&addr("bob")));
        assert_eq!(roster.members(), &[addr("alice")]);
    }

    #[test]
    fn test_reinsert_after_remove() {
        let mut roster = ActiveRoster::new();
        roster.insert(addr("alice"));
        roster.remove(&addr("alice"));
        assert!(roster.insert(addr("alice")));
        assert_eq!(roster.len(), 1);
    }
}
