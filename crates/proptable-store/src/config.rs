use std::path::{Path, PathBuf};

use proptable_types::{PropertyError, PropertyResult};
use serde::{Deserialize, Serialize};

use crate::migrate::MigrationConfig;

/// Configuration for a [`PropertyTable`](crate::PropertyTable).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableConfig {
    /// Directory holding the `*Settings.json` files.
    pub user_settings_dir: PathBuf,
    /// Settings id of the active project; empty when no project is open.
    pub local_settings_id: String,
    /// Schema migration run by `run_migration_if_needed`.
    pub migration: MigrationConfig,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            user_settings_dir: PathBuf::from("."),
            local_settings_id: String::new(),
            migration: MigrationConfig::default(),
        }
    }
}

impl TableConfig {
    /// Configuration rooted at `user_settings_dir` with no active project.
    pub fn new(user_settings_dir: impl Into<PathBuf>) -> Self {
        Self {
            user_settings_dir: user_settings_dir.into(),
            ..Default::default()
        }
    }

    pub fn with_local_settings_id(mut self, id: impl Into<String>) -> Self {
        self.local_settings_id = id.into();
        self
    }

    /// Parse a TOML configuration document. Missing keys take their defaults.
    pub fn from_toml_str(s: &str) -> PropertyResult<Self> {
        toml::from_str(s).map_err(|e| PropertyError::Serialization(e.to_string()))
    }

    /// Read and parse a TOML configuration file.
    pub fn from_toml_file(path: &Path) -> PropertyResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| PropertyError::io(path, e))?;
        Self::from_toml_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let c = TableConfig::default();
        assert_eq!(c.user_settings_dir, PathBuf::from("."));
        assert!(c.local_settings_id.is_empty());
        assert_eq!(c.migration, MigrationConfig::default());
    }

    #[test]
    fn builder_helpers() {
        let c = TableConfig::new("/var/settings").with_local_settings_id("proj1");
        assert_eq!(c.user_settings_dir, PathBuf::from("/var/settings"));
        assert_eq!(c.local_settings_id, "proj1");
    }

    #[test]
    fn parse_toml_with_defaults() {
        let c = TableConfig::from_toml_str(
            r#"
            user_settings_dir = "/home/me/.settings"
            local_settings_id = "proj1"
            "#,
        )
        .unwrap();
        assert_eq!(c.user_settings_dir, PathBuf::from("/home/me/.settings"));
        assert_eq!(c.local_settings_id, "proj1");
        assert_eq!(c.migration, MigrationConfig::default());
    }

    #[test]
    fn parse_toml_migration_section() {
        let c = TableConfig::from_toml_str(
            r#"
            [migration]
            current_version = 7

            [[migration.module_renames]]
            from = "Old"
            to = "New"
            "#,
        )
        .unwrap();
        assert_eq!(c.migration.current_version, 7);
        assert_eq!(c.migration.module_renames.len(), 1);
        assert_eq!(c.migration.module_renames[0].from, "Old");
    }

    #[test]
    fn invalid_toml_is_serialization_error() {
        let err = TableConfig::from_toml_str("user_settings_dir = [").unwrap_err();
        assert!(matches!(err, PropertyError::Serialization(_)));
    }

    #[test]
    fn from_toml_file_reads_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proptable.toml");
        std::fs::write(&path, "local_settings_id = \"p\"\n").unwrap();
        let c = TableConfig::from_toml_file(&path).unwrap();
        assert_eq!(c.local_settings_id, "p");

        let missing = TableConfig::from_toml_file(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(missing, PropertyError::Io { .. }));
    }
}
