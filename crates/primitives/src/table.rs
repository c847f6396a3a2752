use std::fmt;

use borsh::{BorshDeserialize, BorshSerialize};

/// Stable identifier of a table, independent of its name.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    BorshSerialize,
    BorshDeserialize,
)]
pub struct TableId(pub u64);

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Identity of a table: keyspace, name and stable id.
#[derive(Clone, Debug, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
pub struct TableRef {
    pub keyspace: String,
    pub name: String,
    pub id: TableId,
}

impl TableRef {
    #[must_use]
    pub fn new(keyspace: impl Into<String>, name: impl Into<String>, id: TableId) -> Self {
        Self {
            keyspace: keyspace.into(),
            name: name.into(),
            id,
        }
    }

    /// Whether this table lives in an internal system keyspace.
    ///
    /// System keyspaces are exempt from tombstone thresholds: internal
    /// reads must never be aborted by operator-tunable limits.
    #[must_use]
    pub fn is_system_keyspace(&self) -> bool {
        is_system_keyspace(&self.keyspace)
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.keyspace, self.name)
    }
}

/// Keyspaces reserved for node-local internal state.
const SYSTEM_KEYSPACES: &[&str] = &["system", "system_schema", "system_local"];

#[must_use]
pub fn is_system_keyspace(keyspace: &str) -> bool {
    SYSTEM_KEYSPACES.contains(&keyspace)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_keyspace_classification() {
        assert!(is_system_keyspace("system"));
        assert!(is_system_keyspace("system_schema"));
        assert!(!is_system_keyspace("app_data"));
    }

    #[test]
    fn table_ref_display() {
        let table = TableRef::new("ks", "events", TableId(7));
        assert_eq!(table.to_string(), "ks.events");
    }
}
