//! The process-wide property table.
//!
//! [`PropertyTable`] maps resolved keys to [`Property`] entries behind a
//! `RwLock`. Every public operation takes a logical name plus a
//! [`SettingsGroup`]; the `Best` scope is resolved under the same map guard
//! as the read or write it serves.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use proptable_types::{
    is_mangled, unscoped, validate_settings_id, values_equal, KeyResolver,
    PropertyError, PropertyResult, PropertyType, PropertyValue, SettingsGroup,
};
use tracing::{debug, info};

use crate::broadcast::{ChangeBroadcaster, NullBroadcaster, PropertyChanged};
use crate::config::TableConfig;
use crate::migrate::{MigrationConfig, MigrationReport, VersionMigrator};
use crate::notify::{LogNotifier, UserNotifier};
use crate::property::{Property, PropertyInfo};

#[derive(Debug, Default)]
struct UpdateBatch {
    depth: usize,
    pending: Vec<PropertyChanged>,
}

/// Typed, scoped key/value store backing user and project settings.
///
/// Values owned by the table (see [`PropertyTable::set_dispose_ownership`])
/// are released exactly once: on replacement, removal, or teardown.
pub struct PropertyTable {
    properties: RwLock<HashMap<String, Property>>,
    resolver: RwLock<KeyResolver>,
    user_settings_dir: PathBuf,
    migration: MigrationConfig,
    broadcaster: Arc<dyn ChangeBroadcaster>,
    notifier: Arc<dyn UserNotifier>,
    updates: Mutex<UpdateBatch>,
}

impl PropertyTable {
    /// Create an empty table. Changes go nowhere until a broadcaster is attached.
    pub fn new(config: TableConfig) -> PropertyResult<Self> {
        let resolver = KeyResolver::new(config.local_settings_id)?;
        info!(
            dir = %config.user_settings_dir.display(),
            local_settings_id = resolver.local_settings_id(),
            "property table created"
        );
        Ok(Self {
            properties: RwLock::new(HashMap::new()),
            resolver: RwLock::new(resolver),
            user_settings_dir: config.user_settings_dir,
            migration: config.migration,
            broadcaster: Arc::new(NullBroadcaster),
            notifier: Arc::new(LogNotifier),
            updates: Mutex::new(UpdateBatch::default()),
        })
    }

    /// Publish changes through `broadcaster`.
    pub fn with_broadcaster(mut self, broadcaster: Arc<dyn ChangeBroadcaster>) -> Self {
        self.broadcaster = broadcaster;
        self
    }

    /// Report load problems through `notifier`.
    pub fn with_notifier(mut self, notifier: Arc<dyn UserNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    // -----------------------------------------------------------------------
    // Session state
    // -----------------------------------------------------------------------

    /// Directory the settings files live in.
    pub fn user_settings_dir(&self) -> &Path {
        &self.user_settings_dir
    }

    /// Settings id of the active project.
    pub fn local_settings_id(&self) -> PropertyResult<String> {
        Ok(self.resolver()?.local_settings_id().to_string())
    }

    /// Switch the active project.
    ///
    /// Existing entries keep their keys; only later lookups resolve differently.
    pub fn set_local_settings_id(&self, id: impl Into<String>) -> PropertyResult<()> {
        let id = id.into();
        validate_settings_id(&id)?;
        let mut resolver = self.resolver.write().map_err(|_| PropertyError::LockPoisoned)?;
        *resolver = KeyResolver::new(id)?;
        debug!(local_settings_id = resolver.local_settings_id(), "local settings id changed");
        Ok(())
    }

    pub(crate) fn notifier(&self) -> &dyn UserNotifier {
        self.notifier.as_ref()
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Returns `true` if an entry exists for `name` in `group`.
    pub fn exists(&self, name: &str, group: SettingsGroup) -> PropertyResult<bool> {
        let resolver = self.resolver()?;
        let props = self.read_props()?;
        let key = resolver.resolve_best(name, group, |k| props.contains_key(k))?;
        Ok(props.contains_key(&key))
    }

    /// Read a typed value.
    ///
    /// Absent entries and empty payloads give `Ok(None)`; a payload of another
    /// type is a [`PropertyError::TypeMismatch`].
    pub fn try_get<T: PropertyType>(
        &self,
        name: &str,
        group: SettingsGroup,
    ) -> PropertyResult<Option<T>> {
        let resolver = self.resolver()?;
        let props = self.read_props()?;
        let key = resolver.resolve_best(name, group, |k| props.contains_key(k))?;
        match props.get(&key).and_then(|p| p.value.as_ref()) {
            None => Ok(None),
            Some(value) => typed(&key, value).map(Some),
        }
    }

    /// Read a typed value, falling back to `T::default()` when absent.
    pub fn get<T: PropertyType + Default>(
        &self,
        name: &str,
        group: SettingsGroup,
    ) -> PropertyResult<T> {
        Ok(self.try_get(name, group)?.unwrap_or_default())
    }

    /// Read a typed value; when the entry is absent, store `default` as a
    /// non-persisted entry first and return it.
    pub fn get_or_default<T: PropertyType + Clone>(
        &self,
        name: &str,
        group: SettingsGroup,
        default: T,
    ) -> PropertyResult<T> {
        let resolver = self.resolver()?;
        let mut props = self.write_props()?;
        let key = resolver.resolve_best(name, group, |k| props.contains_key(k))?;
        match props.get(&key) {
            Some(prop) => match prop.value.as_ref() {
                Some(value) => typed(&key, value),
                None => Ok(default),
            },
            None => {
                debug!(key = %key, "materialized default");
                props.insert(
                    key.clone(),
                    Property::new(key, Some(default.clone().into_value()), false),
                );
                Ok(default)
            }
        }
    }

    /// Untyped copy of the stored payload.
    pub fn get_value(
        &self,
        name: &str,
        group: SettingsGroup,
    ) -> PropertyResult<Option<PropertyValue>> {
        let resolver = self.resolver()?;
        let props = self.read_props()?;
        let key = resolver.resolve_best(name, group, |k| props.contains_key(k))?;
        Ok(props.get(&key).and_then(|p| p.value.clone()))
    }

    /// Metadata of the entry for `name`, if it exists.
    pub fn property_info(
        &self,
        name: &str,
        group: SettingsGroup,
    ) -> PropertyResult<Option<PropertyInfo>> {
        let resolver = self.resolver()?;
        let props = self.read_props()?;
        let key = resolver.resolve_best(name, group, |k| props.contains_key(k))?;
        Ok(props.get(&key).map(PropertyInfo::from))
    }

    /// Sorted logical names visible in `group`.
    pub fn property_names(&self, group: SettingsGroup) -> PropertyResult<Vec<String>> {
        let prefix = self.resolver()?.local_prefix();
        let props = self.read_props()?;
        let in_local = |k: &str| !prefix.is_empty() && k.starts_with(&prefix);
        let names: BTreeSet<String> = props
            .keys()
            .filter(|k| match group {
                SettingsGroup::Global => !is_mangled(k.as_str()),
                SettingsGroup::Local => in_local(k.as_str()),
                SettingsGroup::Best => !is_mangled(k.as_str()) || in_local(k.as_str()),
            })
            .map(|k| unscoped(k).to_string())
            .collect();
        Ok(names.into_iter().collect())
    }

    /// Number of entries across every scope.
    pub fn len(&self) -> PropertyResult<usize> {
        Ok(self.read_props()?.len())
    }

    pub fn is_empty(&self) -> PropertyResult<bool> {
        Ok(self.read_props()?.is_empty())
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Store a typed value.
    pub fn set(
        &self,
        name: &str,
        group: SettingsGroup,
        value: impl Into<PropertyValue>,
        persist: bool,
        broadcast: bool,
    ) -> PropertyResult<()> {
        self.store(name, group, Some(value.into()), persist, broadcast, false)
    }

    /// Store a raw payload, which may be empty.
    pub fn set_value(
        &self,
        name: &str,
        group: SettingsGroup,
        value: Option<PropertyValue>,
        persist: bool,
        broadcast: bool,
    ) -> PropertyResult<()> {
        self.store(name, group, value, persist, broadcast, false)
    }

    /// Like [`PropertyTable::set`], but only when no entry exists yet.
    pub fn set_default(
        &self,
        name: &str,
        group: SettingsGroup,
        value: impl Into<PropertyValue>,
        persist: bool,
        broadcast: bool,
    ) -> PropertyResult<()> {
        self.store(name, group, Some(value.into()), persist, broadcast, true)
    }

    /// Remove an entry. Returns `true` if it existed.
    ///
    /// An owned value is released before the entry goes away.
    pub fn remove(&self, name: &str, group: SettingsGroup) -> PropertyResult<bool> {
        let resolver = self.resolver()?;
        let removed = {
            let mut props = self.write_props()?;
            let key = resolver.resolve_best(name, group, |k| props.contains_key(k))?;
            props.remove(&key)
        };
        match removed {
            Some(prop) => {
                if let Some(owned) = prop.owned_value() {
                    owned.release();
                    debug!(key = %prop.name, "released owned value on remove");
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Make the table responsible for releasing the current value of `name`.
    ///
    /// Fails with [`PropertyError::InvalidOperation`] when the entry is absent,
    /// its value does not support release, or another entry already owns it.
    pub fn set_dispose_ownership(
        &self,
        name: &str,
        group: SettingsGroup,
        owns: bool,
    ) -> PropertyResult<()> {
        let resolver = self.resolver()?;
        let mut props = self.write_props()?;
        let key = resolver.resolve_best(name, group, |k| props.contains_key(k))?;

        let value = match props.get(&key) {
            None => {
                return Err(PropertyError::InvalidOperation(format!(
                    "no property {key} to take ownership of"
                )))
            }
            Some(prop) => prop.value.clone(),
        };
        if !value.as_ref().is_some_and(PropertyValue::is_disposable) {
            return Err(PropertyError::InvalidOperation(format!(
                "value of {key} does not support release"
            )));
        }
        if owns && owned_elsewhere(&props, &key, value.as_ref()) {
            return Err(PropertyError::InvalidOperation(format!(
                "value of {key} is already owned by another property"
            )));
        }
        if let Some(prop) = props.get_mut(&key) {
            prop.dispose = owns;
        }
        Ok(())
    }

    fn store(
        &self,
        name: &str,
        group: SettingsGroup,
        value: Option<PropertyValue>,
        persist: bool,
        broadcast: bool,
        only_if_absent: bool,
    ) -> PropertyResult<()> {
        let resolver = self.resolver()?;
        let (key, released) = {
            let mut props = self.write_props()?;
            let key = resolver.resolve_best(name, group, |k| props.contains_key(k))?;
            let exclusive = !owned_elsewhere(&props, &key, value.as_ref());
            match props.get_mut(&key) {
                None => {
                    props.insert(key.clone(), Property::new(key.clone(), value.clone(), persist));
                    if value.is_none() {
                        return Ok(());
                    }
                    (key, None)
                }
                Some(_) if only_if_absent => return Ok(()),
                Some(prop) => {
                    prop.persist = persist;
                    if values_equal(prop.value.as_ref(), value.as_ref()) {
                        return Ok(());
                    }
                    (key, prop.replace(value.clone(), exclusive))
                }
            }
        };

        if let Some(old) = released {
            old.release();
            debug!(key = %key, "released replaced value");
        }
        if broadcast {
            self.publish(unscoped(&key), value.as_ref())?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Update batches
    // -----------------------------------------------------------------------

    /// Start deferring change notifications. Calls nest.
    pub fn begin_update(&self) -> PropertyResult<()> {
        let mut batch = self.updates.lock().map_err(|_| PropertyError::LockPoisoned)?;
        batch.depth += 1;
        Ok(())
    }

    /// Close the innermost update; the outermost one delivers every
    /// deferred notification in order before returning.
    pub fn end_update(&self) -> PropertyResult<()> {
        let pending = {
            let mut batch = self.updates.lock().map_err(|_| PropertyError::LockPoisoned)?;
            if batch.depth == 0 {
                return Err(PropertyError::InvalidOperation(
                    "end_update without matching begin_update".into(),
                ));
            }
            batch.depth -= 1;
            if batch.depth > 0 {
                return Ok(());
            }
            std::mem::take(&mut batch.pending)
        };
        for change in &pending {
            self.broadcaster.publish(&change.name, change.value.as_ref());
        }
        Ok(())
    }

    fn publish(&self, name: &str, value: Option<&PropertyValue>) -> PropertyResult<()> {
        {
            let mut batch = self.updates.lock().map_err(|_| PropertyError::LockPoisoned)?;
            if batch.depth > 0 {
                batch.pending.push(PropertyChanged {
                    name: name.to_string(),
                    value: value.cloned(),
                });
                return Ok(());
            }
        }
        self.broadcaster.publish(name, value);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------------

    /// Release every owned value and clear the table. Safe to call repeatedly.
    pub fn teardown(&self) -> PropertyResult<()> {
        let drained: Vec<Property> = {
            let mut props = self.write_props()?;
            props.drain().map(|(_, p)| p).collect()
        };
        let mut released = 0usize;
        for prop in &drained {
            if let Some(owned) = prop.owned_value() {
                owned.release();
                released += 1;
            }
        }
        if !drained.is_empty() {
            info!(entries = drained.len(), released, "property table torn down");
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Persistence and migration hooks
    // -----------------------------------------------------------------------

    /// Settings file for `scope_id` (empty for the global scope).
    pub fn settings_path(&self, scope_id: &str) -> PathBuf {
        crate::persist::settings_path(&self.user_settings_dir, scope_id)
    }

    /// Entries whose key satisfies `include`, sorted by key.
    pub(crate) fn collect<F>(&self, include: F) -> PropertyResult<Vec<Property>>
    where
        F: Fn(&Property) -> bool,
    {
        let props = self.read_props()?;
        let mut out: Vec<Property> = props.values().filter(|p| include(p)).cloned().collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    /// Insert or overwrite entries by key without broadcasting.
    pub(crate) fn merge(&self, entries: Vec<Property>) -> PropertyResult<usize> {
        let mut released = Vec::new();
        let count = entries.len();
        {
            let mut props = self.write_props()?;
            for entry in entries {
                match props.get_mut(&entry.name) {
                    Some(existing) => {
                        existing.persist = entry.persist;
                        if !values_equal(existing.value.as_ref(), entry.value.as_ref()) {
                            released.extend(existing.replace(entry.value, false));
                        }
                    }
                    None => {
                        props.insert(entry.name.clone(), entry);
                    }
                }
            }
        }
        for old in &released {
            old.release();
        }
        Ok(count)
    }

    /// Apply `rewrite` to every structured payload in place. Returns the keys
    /// whose payload changed.
    pub(crate) fn rewrite_structured<F>(&self, mut rewrite: F) -> PropertyResult<Vec<String>>
    where
        F: FnMut(&mut serde_json::Value) -> bool,
    {
        let mut props = self.write_props()?;
        let mut changed = Vec::new();
        for (key, prop) in props.iter_mut() {
            if let Some(PropertyValue::Structured(value)) = prop.value.as_mut() {
                if rewrite(value) {
                    changed.push(key.clone());
                }
            }
        }
        changed.sort();
        Ok(changed)
    }

    /// Run the schema migration configured for this table, if it is due.
    pub fn run_migration_if_needed(&self) -> PropertyResult<MigrationReport> {
        VersionMigrator::new(self.migration.clone()).run(self)
    }

    // -----------------------------------------------------------------------
    // Locking
    // -----------------------------------------------------------------------

    fn resolver(&self) -> PropertyResult<KeyResolver> {
        self.resolver
            .read()
            .map(|r| r.clone())
            .map_err(|_| PropertyError::LockPoisoned)
    }

    fn read_props(&self) -> PropertyResult<RwLockReadGuard<'_, HashMap<String, Property>>> {
        self.properties.read().map_err(|_| PropertyError::LockPoisoned)
    }

    fn write_props(&self) -> PropertyResult<RwLockWriteGuard<'_, HashMap<String, Property>>> {
        self.properties.write().map_err(|_| PropertyError::LockPoisoned)
    }
}

impl Drop for PropertyTable {
    fn drop(&mut self) {
        let _ = self.teardown();
    }
}

impl std::fmt::Debug for PropertyTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.len().unwrap_or(0);
        f.debug_struct("PropertyTable")
            .field("user_settings_dir", &self.user_settings_dir)
            .field("property_count", &count)
            .finish()
    }
}

fn typed<T: PropertyType>(key: &str, value: &PropertyValue) -> PropertyResult<T> {
    T::from_value(value).ok_or_else(|| PropertyError::TypeMismatch {
        key: key.to_string(),
        expected: T::KIND,
        found: value.kind(),
    })
}

/// Returns `true` if an entry other than `key` owns `value`.
fn owned_elsewhere(
    props: &HashMap<String, Property>,
    key: &str,
    value: Option<&PropertyValue>,
) -> bool {
    match value {
        Some(v) if v.is_disposable() => props
            .iter()
            .any(|(k, p)| k != key && p.owned_value() == Some(v)),
        _ => false,
    }
}
