use std::fmt;

use serde::{Deserialize, Serialize};

/// Visibility scope a property name is looked up or stored in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettingsGroup {
    /// Shared across every project of the installation.
    #[default]
    Global,
    /// Scoped to the active project; keys are mangled with its settings id.
    Local,
    /// Lookup policy: the local entry when one exists, otherwise the global one.
    Best,
}

impl SettingsGroup {
    /// Returns `true` for the two physical storage scopes.
    pub fn is_storage_scope(&self) -> bool {
        !matches!(self, SettingsGroup::Best)
    }
}

impl fmt::Display for SettingsGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingsGroup::Global => write!(f, "global"),
            SettingsGroup::Local => write!(f, "local"),
            SettingsGroup::Best => write!(f, "best"),
        }
    }
}
