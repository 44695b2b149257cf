//! Settings files on disk.
//!
//! One file per scope, `{dir}/{scope prefix}Settings.json`, holding a JSON
//! array of `{ name, value, persist }` records sorted by name.
//!
//! # Failure policy
//!
//! - Load: a missing file is not an error. An unreadable or corrupt file is
//!   reported through the table's [`UserNotifier`](crate::UserNotifier) and
//!   otherwise ignored. A single undecodable record is reported and skipped;
//!   the rest of the file still loads.
//! - Save: contention with another writer (permission or sharing failures)
//!   is logged and swallowed. Any other failure is returned.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use proptable_types::{
    is_mangled, scope_prefix, PropertyError, PropertyResult, PropertyValue, GLOBAL_SETTINGS_ID,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::property::Property;
use crate::table::PropertyTable;

/// File name suffix shared by every settings file.
pub const SETTINGS_FILE_SUFFIX: &str = "Settings.json";

/// One persisted entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SettingsRecord {
    pub name: String,
    pub value: PropertyValue,
    pub persist: bool,
}

/// Outcome of writing a settings file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    /// Another writer held the file; nothing was written this round.
    Contended,
}

/// Path of the settings file for `scope_id`.
pub fn settings_path(dir: &Path, scope_id: &str) -> PathBuf {
    dir.join(format!("{}{SETTINGS_FILE_SUFFIX}", scope_prefix(scope_id)))
}

/// Returns `true` if `key` belongs to the scope `scope_id`.
///
/// The global scope owns every unmangled key; a local scope owns the keys
/// carrying its prefix.
pub fn key_in_scope(key: &str, scope_id: &str) -> bool {
    if scope_id == GLOBAL_SETTINGS_ID {
        !is_mangled(key)
    } else {
        key.starts_with(&scope_prefix(scope_id))
    }
}

pub fn encode(records: &[SettingsRecord]) -> PropertyResult<Vec<u8>> {
    serde_json::to_vec_pretty(records).map_err(|e| PropertyError::Serialization(e.to_string()))
}

/// Records decoded from a settings file.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DecodedSettings {
    pub records: Vec<SettingsRecord>,
    /// Records that could not be decoded, one description each.
    pub rejected: Vec<String>,
}

/// Decode a settings file body.
///
/// Fails only when the body is not a JSON array. Records inside it are
/// decoded one by one so a bad record does not take its neighbours down.
pub fn decode(bytes: &[u8]) -> PropertyResult<DecodedSettings> {
    let items: Vec<serde_json::Value> =
        serde_json::from_slice(bytes).map_err(|e| PropertyError::Serialization(e.to_string()))?;
    let mut decoded = DecodedSettings::default();
    for (index, item) in items.into_iter().enumerate() {
        let name = item
            .get("name")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string);
        match serde_json::from_value::<SettingsRecord>(item) {
            Ok(record) => decoded.records.push(record),
            Err(e) => decoded.rejected.push(match name {
                Some(name) => format!("{name}: {e}"),
                None => format!("record {index}: {e}"),
            }),
        }
    }
    Ok(decoded)
}

/// Read a settings file. `Ok(None)` when it does not exist.
pub fn read_settings_file(path: &Path) -> PropertyResult<Option<DecodedSettings>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(PropertyError::io(path, e)),
    };
    decode(&bytes).map(Some)
}

/// Atomically replace the file at `path` with `bytes`.
///
/// The data goes to a temporary file in the same directory which is then
/// renamed over the target, so readers never see a partial file.
fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Encode `records` and hand the bytes to `write`, classifying its failure.
pub(crate) fn write_settings_with<W>(
    path: &Path,
    records: &[SettingsRecord],
    write: W,
) -> PropertyResult<WriteOutcome>
where
    W: FnOnce(&Path, &[u8]) -> io::Result<()>,
{
    let bytes = encode(records)?;
    match write(path, &bytes) {
        Ok(()) => {
            debug!(path = %path.display(), records = records.len(), "settings file written");
            Ok(WriteOutcome::Written)
        }
        Err(e) if is_contention(&e) => {
            debug!(path = %path.display(), error = %e, "settings file busy; skipping save");
            Ok(WriteOutcome::Contended)
        }
        Err(e) => Err(PropertyError::io(path, e)),
    }
}

/// Errors caused by another process holding the file.
fn is_contention(err: &io::Error) -> bool {
    if matches!(
        err.kind(),
        io::ErrorKind::PermissionDenied | io::ErrorKind::WouldBlock
    ) {
        return true;
    }
    // ERROR_SHARING_VIOLATION, ERROR_LOCK_VIOLATION
    cfg!(windows) && matches!(err.raw_os_error(), Some(32) | Some(33))
}

impl PropertyTable {
    /// Write every persisted entry of `scope_id` to its settings file,
    /// leaving out keys that belong to any scope in `exclude_ids`.
    pub fn save(&self, scope_id: &str, exclude_ids: &[&str]) -> PropertyResult<()> {
        self.save_with(scope_id, exclude_ids, write_atomic)
    }

    pub(crate) fn save_with<W>(
        &self,
        scope_id: &str,
        exclude_ids: &[&str],
        write: W,
    ) -> PropertyResult<()>
    where
        W: FnOnce(&Path, &[u8]) -> io::Result<()>,
    {
        let entries = self.collect(|p| {
            p.is_saveable()
                && key_in_scope(&p.name, scope_id)
                && !exclude_ids.iter().any(|id| key_in_scope(&p.name, id))
        })?;
        let records: Vec<SettingsRecord> = entries
            .into_iter()
            .filter_map(|p| {
                p.value.map(|value| SettingsRecord {
                    name: p.name,
                    value,
                    persist: p.persist,
                })
            })
            .collect();

        let path = self.settings_path(scope_id);
        match write_settings_with(&path, &records, write)? {
            WriteOutcome::Written => {
                info!(
                    scope = scope_id,
                    path = %path.display(),
                    records = records.len(),
                    "settings saved"
                )
            }
            WriteOutcome::Contended => {
                warn!(scope = scope_id, path = %path.display(), "settings not saved: file in use")
            }
        }
        Ok(())
    }

    pub fn save_global(&self) -> PropertyResult<()> {
        self.save(GLOBAL_SETTINGS_ID, &[])
    }

    /// Save the active project's settings. Does nothing when no project is active.
    pub fn save_local(&self) -> PropertyResult<()> {
        let id = self.local_settings_id()?;
        if id.is_empty() {
            debug!("no local settings id; skipping local save");
            return Ok(());
        }
        self.save(&id, &[])
    }

    /// Merge the settings file of `scope_id` into the table.
    ///
    /// Entries from the file overwrite entries already present under the same
    /// key. Load never broadcasts.
    pub fn load(&self, scope_id: &str) -> PropertyResult<()> {
        let path = self.settings_path(scope_id);
        let decoded = match read_settings_file(&path) {
            Ok(Some(decoded)) => decoded,
            Ok(None) => {
                debug!(path = %path.display(), "no settings file");
                return Ok(());
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "settings file ignored");
                self.notifier().notify(&format!(
                    "Your settings in {} could not be read and were not loaded: {e}",
                    path.display()
                ));
                return Ok(());
            }
        };

        if !decoded.rejected.is_empty() {
            for reason in &decoded.rejected {
                warn!(path = %path.display(), reason = %reason, "settings record skipped");
            }
            self.notifier().notify(&format!(
                "Some settings in {} could not be read and were skipped: {}",
                path.display(),
                decoded.rejected.join("; ")
            ));
        }

        let entries = decoded
            .records
            .into_iter()
            .map(|r| Property::new(r.name, Some(r.value), r.persist))
            .collect();
        let count = self.merge(entries)?;
        info!(scope = scope_id, path = %path.display(), records = count, "settings loaded");
        Ok(())
    }

    pub fn load_global(&self) -> PropertyResult<()> {
        self.load(GLOBAL_SETTINGS_ID)
    }

    /// Load the active project's settings. Does nothing when no project is active.
    pub fn load_local(&self) -> PropertyResult<()> {
        let id = self.local_settings_id()?;
        if id.is_empty() {
            return Ok(());
        }
        self.load(&id)
    }
}
