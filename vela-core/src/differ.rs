//! Differ - Compare two property bags
//!
//! Compares the "olds" of a resource with its proposed "news" and reports,
//! per property, whether it was added, removed or changed.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::resource::{PropertyBag, Value};

/// Change to a single property
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PropertyChange {
    /// Present only in the new bag
    Added { new: Value },
    /// Present only in the old bag
    Removed { old: Value },
    /// Present in both with different values
    Changed { old: Value, new: Value },
}

impl PropertyChange {
    pub fn old(&self) -> Option<&Value> {
        match self {
            PropertyChange::Added { .. } => None,
            PropertyChange::Removed { old } | PropertyChange::Changed { old, .. } => Some(old),
        }
    }

    pub fn new_value(&self) -> Option<&Value> {
        match self {
            PropertyChange::Removed { .. } => None,
            PropertyChange::Added { new } | PropertyChange::Changed { new, .. } => Some(new),
        }
    }
}

/// Result of comparing two property bags, ordered by property name
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct PropertyDiff {
    changes: BTreeMap<String, PropertyChange>,
}

impl PropertyDiff {
    /// Returns whether the property differs between the two bags
    pub fn changed(&self, name: &str) -> bool {
        self.changes.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&PropertyChange> {
        self.changes.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.changes.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PropertyChange)> {
        self.changes.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl PropertyBag {
    /// Compare this bag (olds) against `news`
    pub fn diff(&self, news: &PropertyBag) -> PropertyDiff {
        diff(self, news)
    }
}

/// Compute the per-property difference between `olds` and `news`
pub fn diff(olds: &PropertyBag, news: &PropertyBag) -> PropertyDiff {
    let mut changes = BTreeMap::new();

    for (key, old) in olds.iter() {
        match news.get(key) {
            Some(new) if new == old => {}
            Some(new) => {
                changes.insert(
                    key.to_string(),
                    PropertyChange::Changed {
                        old: old.clone(),
                        new: new.clone(),
                    },
                );
            }
            None => {
                changes.insert(key.to_string(), PropertyChange::Removed { old: old.clone() });
            }
        }
    }

    for (key, new) in news.iter() {
        if !olds.contains(key) {
            changes.insert(key.to_string(), PropertyChange::Added { new: new.clone() });
        }
    }

    PropertyDiff { changes }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diff_empty_when_same() {
        let olds = PropertyBag::new()
            .with("imageId", "ami-123")
            .with("securityGroups", vec!["sg-1".to_string()]);
        let news = olds.clone();

        assert!(olds.diff(&news).is_empty());
    }

    #[test]
    fn diff_reports_added_removed_changed() {
        let olds = PropertyBag::new()
            .with("imageId", "ami-123")
            .with("keyName", "ops")
            .with("stable", true);
        let news = PropertyBag::new()
            .with("imageId", "ami-456")
            .with("instanceType", "t3.micro")
            .with("stable", true);

        let d = olds.diff(&news);
        assert_eq!(
            d.keys().collect::<Vec<_>>(),
            vec!["imageId", "instanceType", "keyName"]
        );
        assert!(matches!(d.get("imageId"), Some(PropertyChange::Changed { .. })));
        assert!(matches!(d.get("instanceType"), Some(PropertyChange::Added { .. })));
        assert!(matches!(d.get("keyName"), Some(PropertyChange::Removed { .. })));
        assert!(!d.changed("stable"));
        assert!(!d.changed("subnetId"));
    }

    #[test]
    fn diff_is_exactly_the_symmetric_difference() {
        let bags = [
            PropertyBag::new(),
            PropertyBag::new().with("a", "1"),
            PropertyBag::new().with("a", "2").with("b", false),
            PropertyBag::new().with("b", false).with("c", 1.5),
            PropertyBag::new()
                .with("a", "1")
                .with("c", PropertyBag::new().with("x", "y")),
        ];

        for olds in &bags {
            for news in &bags {
                let d = olds.diff(news);
                let keys: std::collections::BTreeSet<&str> =
                    olds.keys().chain(news.keys()).collect();
                for key in keys {
                    assert_eq!(
                        d.changed(key),
                        olds.get(key) != news.get(key),
                        "property {key}"
                    );
                }
                assert!(d.keys().all(|k| olds.contains(k) || news.contains(k)));
            }
        }
    }

    #[test]
    fn change_exposes_before_and_after() {
        let olds = PropertyBag::new().with("instanceType", "small");
        let news = PropertyBag::new().with("instanceType", "large");

        let d = olds.diff(&news);
        let change = d.get("instanceType").unwrap();
        assert_eq!(change.old(), Some(&Value::from("small")));
        assert_eq!(change.new_value(), Some(&Value::from("large")));
    }
}
