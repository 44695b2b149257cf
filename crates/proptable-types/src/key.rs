//! Mapping from logical property names to internal storage keys.
//!
//! Global names are stored unchanged. Local names are mangled as
//! `db$<settings id>$<name>`, so every key belonging to one project starts
//! with the same prefix and can be selected with a `starts_with` test.

use crate::error::{PropertyError, PropertyResult};
use crate::scope::SettingsGroup;

/// Fixed marker at the front of every mangled key.
pub const MANGLE_MARKER: &str = "db";

/// Separator between the marker, the settings id and the name.
pub const MANGLE_SEPARATOR: char = '$';

/// Settings id of the global scope.
pub const GLOBAL_SETTINGS_ID: &str = "";

const MARKER_PREFIX: &str = "db$";

/// Mangle `name` into the local scope identified by `settings_id`.
pub fn mangle(settings_id: &str, name: &str) -> String {
    format!("{MANGLE_MARKER}{MANGLE_SEPARATOR}{settings_id}{MANGLE_SEPARATOR}{name}")
}

/// Key prefix shared by every entry of a scope (empty for the global scope).
pub fn scope_prefix(settings_id: &str) -> String {
    if settings_id == GLOBAL_SETTINGS_ID {
        String::new()
    } else {
        mangle(settings_id, "")
    }
}

/// Split a mangled key into `(settings_id, name)`.
pub fn demangle(key: &str) -> Option<(&str, &str)> {
    let rest = key.strip_prefix(MARKER_PREFIX)?;
    let idx = rest.find(MANGLE_SEPARATOR)?;
    Some((&rest[..idx], &rest[idx + 1..]))
}

/// Returns `true` if `key` belongs to some local scope.
pub fn is_mangled(key: &str) -> bool {
    demangle(key).is_some()
}

/// The logical name of a key, with any local-scope prefix removed.
pub fn unscoped(key: &str) -> &str {
    demangle(key).map(|(_, name)| name).unwrap_or(key)
}

/// Check that a settings id can be embedded in a mangled key.
pub fn validate_settings_id(settings_id: &str) -> PropertyResult<()> {
    if settings_id.contains(MANGLE_SEPARATOR) {
        return Err(PropertyError::InvalidOperation(format!(
            "settings id {settings_id:?} must not contain '{MANGLE_SEPARATOR}'"
        )));
    }
    Ok(())
}

/// Resolves logical names to storage keys for one active settings id.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KeyResolver {
    local_settings_id: String,
}

impl KeyResolver {
    /// Create a resolver for the given local settings id.
    pub fn new(local_settings_id: impl Into<String>) -> PropertyResult<Self> {
        let local_settings_id = local_settings_id.into();
        validate_settings_id(&local_settings_id)?;
        Ok(Self { local_settings_id })
    }

    /// The active local settings id.
    pub fn local_settings_id(&self) -> &str {
        &self.local_settings_id
    }

    /// Resolve `name` for a physical scope.
    ///
    /// `Best` cannot be resolved without a store lookup; use
    /// [`KeyResolver::resolve_best`] instead.
    pub fn resolve(&self, name: &str, group: SettingsGroup) -> PropertyResult<String> {
        match group {
            SettingsGroup::Global => {
                if name.starts_with(MARKER_PREFIX) {
                    return Err(PropertyError::InvalidOperation(format!(
                        "global property name {name:?} collides with the local-scope marker"
                    )));
                }
                Ok(name.to_string())
            }
            SettingsGroup::Local => {
                if self.local_settings_id.is_empty() {
                    return Err(PropertyError::InvalidOperation(
                        "no local settings id is active".into(),
                    ));
                }
                Ok(mangle(&self.local_settings_id, name))
            }
            SettingsGroup::Best => Err(PropertyError::InvalidOperation(
                "best scope needs a store lookup".into(),
            )),
        }
    }

    /// Resolve `name` for any scope, using `exists` to decide `Best`.
    ///
    /// `Best` yields the local key when `exists` reports an entry under it,
    /// otherwise the global key. With no active local id it is the global key.
    pub fn resolve_best<F>(
        &self,
        name: &str,
        group: SettingsGroup,
        exists: F,
    ) -> PropertyResult<String>
    where
        F: FnOnce(&str) -> bool,
    {
        match group {
            SettingsGroup::Best => {
                if !self.local_settings_id.is_empty() {
                    let local = mangle(&self.local_settings_id, name);
                    if exists(&local) {
                        return Ok(local);
                    }
                }
                self.resolve(name, SettingsGroup::Global)
            }
            other => self.resolve(name, other),
        }
    }

    /// Key prefix of the active local scope.
    pub fn local_prefix(&self) -> String {
        scope_prefix(&self.local_settings_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    // -----------------------------------------------------------------------
    // Mangling
    // -----------------------------------------------------------------------

    #[test]
    fn mangle_format() {
        assert_eq!(mangle("proj1", "Theme"), "db$proj1$Theme");
        assert_eq!(scope_prefix("proj1"), "db$proj1$");
        assert_eq!(scope_prefix(GLOBAL_SETTINGS_ID), "");
    }

    #[test]
    fn demangle_splits_id_and_name() {
        assert_eq!(demangle("db$proj1$Theme"), Some(("proj1", "Theme")));
        assert_eq!(demangle("db$proj1$a$b"), Some(("proj1", "a$b")));
        assert_eq!(demangle("Theme"), None);
        assert_eq!(demangle("db$noname"), None);
    }

    #[test]
    fn unscoped_strips_prefix() {
        assert_eq!(unscoped("db$proj1$Theme"), "Theme");
        assert_eq!(unscoped("Theme"), "Theme");
    }

    #[test]
    fn settings_id_with_separator_is_rejected() {
        assert!(KeyResolver::new("a$b").is_err());
        assert!(KeyResolver::new("proj1").is_ok());
    }

    // -----------------------------------------------------------------------
    // Resolution
    // -----------------------------------------------------------------------

    #[test]
    fn global_and_local_resolution() {
        let r = KeyResolver::new("proj1").unwrap();
        assert_eq!(r.resolve("Theme", SettingsGroup::Global).unwrap(), "Theme");
        assert_eq!(
            r.resolve("Theme", SettingsGroup::Local).unwrap(),
            "db$proj1$Theme"
        );
        assert_eq!(r.local_prefix(), "db$proj1$");
    }

    #[test]
    fn global_name_with_marker_is_rejected() {
        let r = KeyResolver::new("proj1").unwrap();
        let err = r.resolve("db$x$y", SettingsGroup::Global).unwrap_err();
        assert!(matches!(err, PropertyError::InvalidOperation(_)));
    }

    #[test]
    fn local_without_id_is_rejected() {
        let r = KeyResolver::default();
        assert!(r.resolve("Theme", SettingsGroup::Local).is_err());
    }

    #[test]
    fn best_prefers_existing_local() {
        let r = KeyResolver::new("proj1").unwrap();
        let key = r
            .resolve_best("Theme", SettingsGroup::Best, |k| k == "db$proj1$Theme")
            .unwrap();
        assert_eq!(key, "db$proj1$Theme");

        let key = r.resolve_best("Theme", SettingsGroup::Best, |_| false).unwrap();
        assert_eq!(key, "Theme");
    }

    #[test]
    fn best_without_local_id_is_global() {
        let r = KeyResolver::default();
        let key = r.resolve_best("Theme", SettingsGroup::Best, |_| true).unwrap();
        assert_eq!(key, "Theme");
    }

    proptest! {
        #[test]
        fn mangled_keys_never_collide_with_global_names(
            id in "[A-Za-z0-9_-]{1,12}",
            name in "[A-Za-z0-9_.$]{0,16}",
        ) {
            let key = mangle(&id, &name);
            prop_assert!(is_mangled(&key));
            prop_assert!(key.starts_with(&scope_prefix(&id)));
            prop_assert_eq!(demangle(&key), Some((id.as_str(), name.as_str())));
            prop_assert_eq!(unscoped(&key), name.as_str());
        }
    }
}
