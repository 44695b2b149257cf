//! One-shot startup upgrade of persisted property shapes.
//!
//! Structured payloads may embed references to the module a type lives in,
//! either as a qualified type string (`"Some.Type, Module"`) or as a bare
//! module name under a `"module"` / `"assembly"` field. When modules are
//! renamed between releases, [`VersionMigrator`] rewrites those references
//! and bumps the schema marker so the pass never runs twice.

use proptable_types::{PropertyResult, SettingsGroup};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::table::PropertyTable;

/// Global property holding the schema version of the stored settings.
pub const SCHEMA_VERSION_PROPERTY: &str = "PropertyTableVersion";

/// Schema version written by this release.
pub const CURRENT_SCHEMA_VERSION: i64 = 2;

/// Obsolete module names and their current replacements.
pub const DEFAULT_MODULE_RENAMES: &[(&str, &str)] = &[
    ("SettingsCoreCompat", "SettingsCore"),
    ("ViewsLegacy", "Views"),
    ("DialogKit1", "DialogKit"),
    ("FilterLib", "Filters"),
    ("ExplorerShell", "Explorer"),
];

/// Object fields whose string value is a bare module name.
const MODULE_FIELDS: &[&str] = &["module", "assembly"];

/// A single module rename.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleRename {
    pub from: String,
    pub to: String,
}

/// Configuration of the migration pass.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    pub current_version: i64,
    pub module_renames: Vec<ModuleRename>,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            current_version: CURRENT_SCHEMA_VERSION,
            module_renames: DEFAULT_MODULE_RENAMES
                .iter()
                .map(|(from, to)| ModuleRename {
                    from: (*from).to_string(),
                    to: (*to).to_string(),
                })
                .collect(),
        }
    }
}

/// What a migration run did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MigrationReport {
    pub from_version: i64,
    pub to_version: i64,
    /// Keys whose payload was rewritten, sorted.
    pub rewritten: Vec<String>,
}

impl MigrationReport {
    /// Returns `true` if the run changed the schema version.
    pub fn migrated(&self) -> bool {
        self.from_version != self.to_version
    }
}

/// Rewrites obsolete module references in stored structured values.
#[derive(Clone, Debug, Default)]
pub struct VersionMigrator {
    config: MigrationConfig,
}

impl VersionMigrator {
    pub fn new(config: MigrationConfig) -> Self {
        Self { config }
    }

    /// Migrate `table` if its schema marker is older than the configured version.
    ///
    /// On migration, both the global and the active local scope are saved.
    pub fn run(&self, table: &PropertyTable) -> PropertyResult<MigrationReport> {
        let target = self.config.current_version;
        let from = table.get::<i64>(SCHEMA_VERSION_PROPERTY, SettingsGroup::Global)?;
        if from >= target {
            if from > target {
                warn!(stored = from, current = target, "settings written by a newer release");
            }
            return Ok(MigrationReport {
                from_version: from,
                to_version: from,
                rewritten: Vec::new(),
            });
        }

        let rewritten = table.rewrite_structured(|value| self.rewrite(value))?;
        table.set(SCHEMA_VERSION_PROPERTY, SettingsGroup::Global, target, true, false)?;
        table.save_global()?;
        table.save_local()?;

        info!(from, to = target, rewritten = rewritten.len(), "settings migrated");
        Ok(MigrationReport {
            from_version: from,
            to_version: target,
            rewritten,
        })
    }

    /// Rewrite module references inside `value`. Returns `true` on any change.
    pub fn rewrite(&self, value: &mut serde_json::Value) -> bool {
        match value {
            serde_json::Value::String(s) => match self.rewrite_qualified(s) {
                Some(new) => {
                    *s = new;
                    true
                }
                None => false,
            },
            serde_json::Value::Array(items) => {
                let mut changed = false;
                for item in items {
                    changed |= self.rewrite(item);
                }
                changed
            }
            serde_json::Value::Object(map) => {
                let mut changed = false;
                for (field, item) in map.iter_mut() {
                    if MODULE_FIELDS.contains(&field.as_str()) {
                        if let serde_json::Value::String(module) = item {
                            if let Some(to) = self.renamed(module) {
                                *module = to.to_string();
                                changed = true;
                                continue;
                            }
                        }
                    }
                    changed |= self.rewrite(item);
                }
                changed
            }
            _ => false,
        }
    }

    /// `"Type, Module[, extra...]"` with an obsolete module, rewritten.
    fn rewrite_qualified(&self, s: &str) -> Option<String> {
        let parts: Vec<&str> = s.split(',').collect();
        if parts.len() < 2 || parts[0].trim().is_empty() {
            return None;
        }
        let to = self.renamed(parts[1].trim())?;
        let mut out = format!("{}, {to}", parts[0]);
        for rest in &parts[2..] {
            out.push(',');
            out.push_str(rest);
        }
        Some(out)
    }

    fn renamed(&self, module: &str) -> Option<&str> {
        self.config
            .module_renames
            .iter()
            .find(|r| r.from == module)
            .map(|r| r.to.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TableConfig;
    use serde_json::json;
    use tempfile::TempDir;

    fn migrator() -> VersionMigrator {
        VersionMigrator::default()
    }

    fn table_in(dir: &TempDir) -> PropertyTable {
        PropertyTable::new(TableConfig::new(dir.path()).with_local_settings_id("proj1")).unwrap()
    }

    // -----------------------------------------------------------------------
    // Value rewriting
    // -----------------------------------------------------------------------

    #[test]
    fn rewrites_qualified_type_strings() {
        let mut v = json!("App.Views.Browse, ViewsLegacy");
        assert!(migrator().rewrite(&mut v));
        assert_eq!(v, json!("App.Views.Browse, Views"));

        let mut v = json!("App.Filter, FilterLib, Version=1.0");
        assert!(migrator().rewrite(&mut v));
        assert_eq!(v, json!("App.Filter, Filters, Version=1.0"));
    }

    #[test]
    fn rewrites_module_fields_recursively() {
        let mut v = json!({
            "columns": [
                {"type": "App.Column", "module": "DialogKit1"},
                {"type": "App.Other", "assembly": "Current"}
            ],
            "factory": {"assembly": "ExplorerShell"}
        });
        assert!(migrator().rewrite(&mut v));
        assert_eq!(
            v,
            json!({
                "columns": [
                    {"type": "App.Column", "module": "DialogKit"},
                    {"type": "App.Other", "assembly": "Current"}
                ],
                "factory": {"assembly": "Explorer"}
            })
        );
    }

    #[test]
    fn leaves_unrelated_text_alone() {
        let mut v = json!({
            "title": "ViewsLegacy",
            "note": "hello, world",
            "count": 3,
            "module": "Unknown"
        });
        let before = v.clone();
        assert!(!migrator().rewrite(&mut v));
        assert_eq!(v, before);
    }

    #[test]
    fn rewrite_is_idempotent() {
        let mut v = json!(["A, ViewsLegacy", {"module": "FilterLib"}]);
        assert!(migrator().rewrite(&mut v));
        let once = v.clone();
        assert!(!migrator().rewrite(&mut v));
        assert_eq!(v, once);
    }

    // -----------------------------------------------------------------------
    // Table migration
    // -----------------------------------------------------------------------

    #[test]
    fn migrates_stale_table_and_saves_both_scopes() {
        let dir = TempDir::new().unwrap();
        let t = table_in(&dir);
        t.set(
            "BrowseView",
            SettingsGroup::Global,
            json!({"module": "ViewsLegacy"}),
            true,
            false,
        )
        .unwrap();
        t.set("Filter", SettingsGroup::Local, json!("X.Filter, FilterLib"), true, false)
            .unwrap();
        t.set("Theme", SettingsGroup::Global, "Dark", true, false).unwrap();

        let report = t.run_migration_if_needed().unwrap();
        assert_eq!(report.from_version, 0);
        assert_eq!(report.to_version, CURRENT_SCHEMA_VERSION);
        assert!(report.migrated());
        assert_eq!(report.rewritten, vec!["BrowseView", "db$proj1$Filter"]);

        assert_eq!(
            t.get::<serde_json::Value>("BrowseView", SettingsGroup::Global).unwrap(),
            json!({"module": "Views"})
        );
        assert_eq!(
            t.get::<i64>(SCHEMA_VERSION_PROPERTY, SettingsGroup::Global).unwrap(),
            CURRENT_SCHEMA_VERSION
        );
        assert!(t.settings_path("").exists());
        assert!(t.settings_path("proj1").exists());
    }

    #[test]
    fn second_run_changes_nothing_on_disk() {
        let dir = TempDir::new().unwrap();
        let t = table_in(&dir);
        t.set("View", SettingsGroup::Global, json!("A.B, ViewsLegacy"), true, false)
            .unwrap();
        t.set("Local", SettingsGroup::Local, json!({"module": "DialogKit1"}), true, false)
            .unwrap();

        t.run_migration_if_needed().unwrap();
        let global_once = std::fs::read(t.settings_path("")).unwrap();
        let local_once = std::fs::read(t.settings_path("proj1")).unwrap();

        let report = t.run_migration_if_needed().unwrap();
        assert!(!report.migrated());
        assert!(report.rewritten.is_empty());
        assert_eq!(std::fs::read(t.settings_path("")).unwrap(), global_once);
        assert_eq!(std::fs::read(t.settings_path("proj1")).unwrap(), local_once);
    }

    #[test]
    fn reloaded_table_does_not_migrate_again() {
        let dir = TempDir::new().unwrap();
        {
            let t = table_in(&dir);
            t.set("View", SettingsGroup::Global, json!("A.B, ViewsLegacy"), true, false)
                .unwrap();
            t.run_migration_if_needed().unwrap();
        }
        let t = table_in(&dir);
        t.load_global().unwrap();
        let report = t.run_migration_if_needed().unwrap();
        assert!(!report.migrated());
        assert_eq!(
            t.get::<serde_json::Value>("View", SettingsGroup::Global).unwrap(),
            json!("A.B, Views")
        );
    }

    #[test]
    fn newer_schema_is_left_alone() {
        let dir = TempDir::new().unwrap();
        let t = table_in(&dir);
        t.set(SCHEMA_VERSION_PROPERTY, SettingsGroup::Global, 99i64, true, false)
            .unwrap();
        t.set("View", SettingsGroup::Global, json!("A.B, ViewsLegacy"), true, false)
            .unwrap();
        let report = t.run_migration_if_needed().unwrap();
        assert_eq!(report.from_version, 99);
        assert!(!report.migrated());
        assert!(!t.settings_path("").exists());
    }

    #[test]
    fn custom_rename_table() {
        let config = MigrationConfig {
            current_version: 5,
            module_renames: vec![ModuleRename {
                from: "Old".into(),
                to: "New".into(),
            }],
        };
        let mut v = json!("T, Old");
        assert!(VersionMigrator::new(config.clone()).rewrite(&mut v));
        assert_eq!(v, json!("T, New"));
        let mut v = json!("T, ViewsLegacy");
        assert!(!VersionMigrator::new(config).rewrite(&mut v));
    }
}
