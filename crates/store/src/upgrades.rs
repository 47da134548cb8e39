//! Schema upgrades applied while loading a version.

/// One store rename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreRename {
    /// Name the store was mounted under before the upgrade.
    pub old_name: String,
    /// Name the store is mounted under after the upgrade.
    pub new_name: String,
}

/// Store schema changes to apply during `load_version_and_upgrade`.
///
/// Added stores start their history at the multi-store's next version;
/// deleted stores have their contents removed; renamed stores carry their
/// contents from the old name to the new one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreUpgrades {
    /// Names of stores added by this upgrade.
    pub added: Vec<String>,
    /// Renames applied by this upgrade.
    pub renamed: Vec<StoreRename>,
    /// Names of stores whose contents are deleted by this upgrade.
    pub deleted: Vec<String>,
}

impl StoreUpgrades {
    /// Whether `name` is added by this upgrade.
    pub fn is_added(&self, name: &str) -> bool {
        self.added.iter().any(|n| n == name)
    }

    /// Whether `name` is deleted by this upgrade.
    pub fn is_deleted(&self, name: &str) -> bool {
        self.deleted.iter().any(|n| n == name)
    }

    /// If `new_name` is the target of a rename, the old name.
    pub fn renamed_from(&self, new_name: &str) -> Option<&str> {
        self.renamed
            .iter()
            .find(|r| r.new_name == new_name)
            .map(|r| r.old_name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookups() {
        let upgrades = StoreUpgrades {
            added: vec!["c".into()],
            renamed: vec![StoreRename {
                old_name: "b".into(),
                new_name: "d".into(),
            }],
            deleted: vec!["x".into()],
        };

        assert!(upgrades.is_added("c"));
        assert!(!upgrades.is_added("b"));
        assert!(upgrades.is_deleted("x"));
        assert_eq!(upgrades.renamed_from("d"), Some("b"));
        assert_eq!(upgrades.renamed_from("b"), None);
    }
}
