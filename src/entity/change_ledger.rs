use std::collections::BTreeMap;

use crate::models::AttrValue;

/// One dirty attribute: its value at the last synchronization and now.
///
/// `None` means the attribute is absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub old: Option<AttrValue>,
    pub new: Option<AttrValue>,
}

/// Attributes that diverged from the last synchronized state.
///
/// An attribute is listed only while its current value differs from the
/// synchronized one; the first recorded `old` is kept across later writes.
#[derive(Debug, Clone, Default)]
pub struct ChangeLedger {
    changes: BTreeMap<String, Change>,
}

impl ChangeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a write of `attr` from `old` to `new`.
    pub fn record(&mut self, attr: &str, old: Option<AttrValue>, new: Option<AttrValue>) {
        let original = match self.changes.get(attr) {
            Some(existing) => existing.old.clone(),
            None => old,
        };

        if same_value(&original, &new) {
            self.changes.remove(attr);
        } else {
            self.changes.insert(
                attr.to_string(),
                Change {
                    old: original,
                    new,
                },
            );
        }
    }

    pub fn get(&self, attr: &str) -> Option<&Change> {
        self.changes.get(attr)
    }

    pub fn contains(&self, attr: &str) -> bool {
        self.changes.contains_key(attr)
    }

    pub fn dirty_attributes(&self) -> Vec<&str> {
        self.changes.keys().map(String::as_str).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Change)> {
        self.changes.iter().map(|(name, change)| (name.as_str(), change))
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn clear(&mut self) {
        self.changes.clear();
    }
}

/// An empty list and an absent attribute are the same thing on the wire.
fn same_value(a: &Option<AttrValue>, b: &Option<AttrValue>) -> bool {
    let a = a.as_ref().filter(|v| !v.is_empty());
    let b = b.as_ref().filter(|v| !v.is_empty());
    a == b
}
