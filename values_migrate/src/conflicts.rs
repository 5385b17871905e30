//! Detection of keys held twice in a migrated document.
//!
//! A typed migration struct names some keys as fields and keeps every other
//! key in a flattened `rest` mapping. Deserialization never puts a named key
//! into `rest`, but a migration that moves user data into a struct can. When
//! that happens the serialized document would carry the key twice, so the
//! migration is refused instead.

use serde_yaml::Mapping;

use crate::Error;

/// A migration output that can hold a key both in a typed field and in its
/// catch-all mapping.
pub trait Conflicts {
    /// Push the dotted path of every doubly held key onto `found`, each
    /// prefixed by `prefix`.
    fn collect_conflicts(&self, prefix: &str, found: &mut Vec<String>);

    /// Check the whole document.
    ///
    /// # Errors
    ///
    /// Function will return [`Error::Conflict`] naming every doubly held key.
    fn check_conflicts(&self) -> Result<(), Error> {
        self.check_conflicts_at("")
    }

    /// Check a section of the document found at `prefix`.
    ///
    /// # Errors
    ///
    /// Function will return [`Error::Conflict`] naming every doubly held key.
    fn check_conflicts_at(&self, prefix: &str) -> Result<(), Error> {
        let mut found = Vec::new();
        self.collect_conflicts(prefix, &mut found);
        if found.is_empty() {
            Ok(())
        } else {
            Err(Error::Conflict(found))
        }
    }
}

impl<T> Conflicts for Option<T>
where
    T: Conflicts,
{
    fn collect_conflicts(&self, prefix: &str, found: &mut Vec<String>) {
        if let Some(inner) = self {
            inner.collect_conflicts(prefix, found);
        }
    }
}

/// Record every key of `known` that `rest` also holds.
pub fn rest_conflicts(rest: &Mapping, known: &[&str], prefix: &str, found: &mut Vec<String>) {
    for key in known {
        if rest.contains_key(*key) {
            found.push(format!("{prefix}{key}"));
        }
    }
}

/// The prefix for the children of `key`.
#[must_use]
pub fn nested(prefix: &str, key: &str) -> String {
    format!("{prefix}{key}.")
}
