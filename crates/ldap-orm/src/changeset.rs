//! Change-set engine
//!
//! Computes the modify and delete operations that turn an original entry
//! into a modified one. Attributes the client never retrieved are never
//! deleted, and operational or server-restricted attributes are never
//! written.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::directory::Modification;
use crate::entry::{DirectoryEntry, EntryValue};

/// Attributes that are never round-tripped to the server.
pub const RESTRICTED_ATTRIBUTES: &[&str] = &[
    "objectClass",
    "uid",
    "employeeId",
    "dn",
    "cn",
    "distinguishedName",
    "name",
    "instanceType",
    "sAMAccountType",
];

/// Operations computed for one entry, keyed by attribute name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeOperandSet {
    /// Attributes whose values are replaced.
    pub to_modify: BTreeMap<String, Vec<EntryValue>>,
    /// Attributes removed, with the values they held.
    pub to_delete: BTreeMap<String, Vec<EntryValue>>,
    /// Values appended to multi-valued attributes.
    pub to_add: BTreeMap<String, Vec<EntryValue>>,
}

impl ChangeOperandSet {
    pub fn is_empty(&self) -> bool {
        self.to_modify.is_empty() && self.to_delete.is_empty() && self.to_add.is_empty()
    }

    /// Replace operations, one per modified attribute.
    pub fn replacements(&self) -> Vec<Modification> {
        self.to_modify
            .iter()
            .map(|(attr, values)| Modification::Replace(attr.clone(), values.clone()))
            .collect()
    }

    /// Delete operations carrying the original values.
    pub fn deletions(&self) -> Vec<Modification> {
        self.to_delete
            .iter()
            .map(|(attr, values)| Modification::Delete(attr.clone(), values.clone()))
            .collect()
    }

    pub fn additions(&self) -> Vec<Modification> {
        self.to_add
            .iter()
            .map(|(attr, values)| Modification::Add(attr.clone(), values.clone()))
            .collect()
    }
}

/// Diff engine with a configurable restricted-attribute set.
#[derive(Debug, Clone)]
pub struct ChangeSetEngine {
    restricted: BTreeSet<String>,
}

impl Default for ChangeSetEngine {
    fn default() -> Self {
        Self {
            restricted: RESTRICTED_ATTRIBUTES
                .iter()
                .map(|a| a.to_lowercase())
                .collect(),
        }
    }
}

impl ChangeSetEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add attributes to the restricted set.
    pub fn with_restricted<S: AsRef<str>>(mut self, attributes: impl IntoIterator<Item = S>) -> Self {
        self.restricted
            .extend(attributes.into_iter().map(|a| a.as_ref().to_lowercase()));
        self
    }

    pub fn is_restricted(&self, attribute: &str) -> bool {
        self.restricted.contains(&attribute.to_lowercase())
    }

    /// Compute the change set between two serialized entities.
    ///
    /// `not_retrieved` holds lowercase attribute names. A value that is
    /// emptied is deleted with its original values, unless it was never
    /// retrieved.
    pub fn diff<'a>(
        &self,
        original: &DirectoryEntry,
        modified: &DirectoryEntry,
        not_retrieved: &BTreeSet<String>,
        operational: impl IntoIterator<Item = &'a str>,
    ) -> ChangeOperandSet {
        let operational: BTreeSet<String> =
            operational.into_iter().map(str::to_lowercase).collect();
        let mut changes = ChangeOperandSet::default();

        for attribute in modified.attributes() {
            let key = attribute.name.to_lowercase();
            if operational.contains(&key) || self.restricted.contains(&key) {
                continue;
            }

            let before = original.values(&attribute.name);
            if same_values(before, &attribute.values) {
                continue;
            }

            if attribute.is_empty() {
                if not_retrieved.contains(&key) {
                    debug!(attribute = %attribute.name, "Skipping delete of attribute never retrieved");
                    continue;
                }
                changes
                    .to_delete
                    .insert(attribute.name.clone(), before.to_vec());
            } else {
                changes
                    .to_modify
                    .insert(attribute.name.clone(), attribute.values.clone());
            }
        }

        changes
    }
}

/// Order-sensitive comparison where "no values" equals "one empty value".
fn same_values(a: &[EntryValue], b: &[EntryValue]) -> bool {
    let empty = |v: &[EntryValue]| v.iter().all(EntryValue::is_empty);
    if empty(a) || empty(b) {
        return empty(a) && empty(b);
    }
    a == b
}

#[cfg(test)]
mod tests {
    use super::*;

    fn original() -> DirectoryEntry {
        DirectoryEntry::new("uid=jdoe,ou=people,dc=example,dc=com")
            .with("objectClass", ["top", "inetOrgPerson"])
            .with("uid", ["jdoe"])
            .with("cn", ["John Doe"])
            .with("sn", ["Doe"])
            .with("mail", ["jdoe@example.com"])
            .with("telephoneNumber", ["555-0100"])
            .with("modifyTimestamp", ["20170725024805Z"])
    }

    fn diff(modified: &DirectoryEntry, not_retrieved: &[&str]) -> ChangeOperandSet {
        let not_retrieved = not_retrieved.iter().map(|a| a.to_lowercase()).collect();
        ChangeSetEngine::new().diff(&original(), modified, &not_retrieved, ["modifyTimestamp"])
    }

    #[test]
    fn test_identical_entries_yield_nothing() {
        let changes = diff(&original(), &[]);
        assert!(changes.to_modify.is_empty());
        assert!(changes.to_delete.is_empty());
        assert!(changes.is_empty());
    }

    #[test]
    fn test_changed_value_is_modified() {
        let mut modified = original();
        modified.set("sn", ["Smith"]);
        let changes = diff(&modified, &[]);
        assert_eq!(changes.to_modify.get("sn"), Some(&vec![EntryValue::from("Smith")]));
        assert!(changes.to_delete.is_empty());
    }

    #[test]
    fn test_emptied_value_is_deleted_with_original() {
        let mut modified = original();
        modified.set::<&str>("telephoneNumber", []);
        let changes = diff(&modified, &[]);
        assert_eq!(
            changes.to_delete.get("telephoneNumber"),
            Some(&vec![EntryValue::from("555-0100")])
        );
        assert!(changes.to_modify.is_empty());
    }

    #[test]
    fn test_single_empty_string_counts_as_empty() {
        let mut modified = original();
        modified.set("telephoneNumber", [""]);
        let changes = diff(&modified, &[]);
        assert!(changes.to_delete.contains_key("telephoneNumber"));
    }

    #[test]
    fn test_not_retrieved_suppresses_delete() {
        let mut modified = original();
        modified.set::<&str>("telephoneNumber", []);
        let changes = diff(&modified, &["telephoneNumber"]);
        assert!(changes.is_empty());
    }

    #[test]
    fn test_zero_and_false_are_values() {
        let mut modified = original();
        modified.set("loginCount", ["0"]);
        modified.set("locked", ["FALSE"]);
        let changes = diff(&modified, &[]);
        assert!(changes.to_modify.contains_key("loginCount"));
        assert!(changes.to_modify.contains_key("locked"));
        assert!(changes.to_delete.is_empty());
    }

    #[test]
    fn test_restricted_and_operational_attributes_are_skipped() {
        let mut modified = original();
        modified.set("cn", ["Johnny"]);
        modified.set("uid", ["johnny"]);
        modified.set("objectClass", ["top", "person"]);
        modified.set("modifyTimestamp", ["20200101000000Z"]);
        assert!(diff(&modified, &[]).is_empty());
    }

    #[test]
    fn test_extended_restricted_set() {
        let mut modified = original();
        modified.set("mail", ["other@example.com"]);
        let engine = ChangeSetEngine::new().with_restricted(["mail"]);
        let changes = engine.diff(&original(), &modified, &BTreeSet::new(), Vec::<&str>::new());
        assert!(changes.is_empty());
    }

    #[test]
    fn test_value_order_matters() {
        let base = DirectoryEntry::new("cn=g").with("member", ["a", "b"]);
        let reordered = DirectoryEntry::new("cn=g").with("member", ["b", "a"]);
        let changes = ChangeSetEngine::new().diff(&base, &reordered, &BTreeSet::new(), Vec::<&str>::new());
        assert!(changes.to_modify.contains_key("member"));
    }

    #[test]
    fn test_modifications() {
        let mut changes = ChangeOperandSet::default();
        changes.to_modify.insert("sn".into(), vec!["Smith".into()]);
        changes.to_delete.insert("mail".into(), vec!["a@x".into()]);
        changes.to_add.insert("member".into(), vec!["cn=x".into()]);
        assert_eq!(
            changes.replacements(),
            vec![Modification::Replace("sn".into(), vec!["Smith".into()])]
        );
        assert_eq!(
            changes.deletions(),
            vec![Modification::Delete("mail".into(), vec!["a@x".into()])]
        );
        assert_eq!(
            changes.additions(),
            vec![Modification::Add("member".into(), vec!["cn=x".into()])]
        );
    }
}
