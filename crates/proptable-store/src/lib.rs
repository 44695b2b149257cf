//! Process-wide property table for user and project settings.
//!
//! This crate implements the typed key/value store that collaborating
//! subsystems (windows, dialogs, tools) read their settings from. Values are
//! looked up by logical name in one of three scopes:
//!
//! - **Global** — shared by every project of the installation
//! - **Local** — private to the active project (keys mangled as `db$<id>$<name>`)
//! - **Best** — the local entry when one exists, otherwise the global one
//!
//! # Components
//!
//! - [`PropertyTable`] — the store itself, with scoped typed reads and writes
//! - [`ChangeBroadcaster`] / [`PropertyBroadcaster`] — change notification
//! - [`persist`] — `*Settings.json` files, one per scope
//! - [`VersionMigrator`] — one-shot rewrite of obsolete stored shapes
//!
//! # Design Rules
//!
//! 1. Absence is not an error; reading a value as the wrong type always is.
//! 2. Writes that do not change the value never notify subscribers.
//! 3. Subscribers have seen a change by the time the write returns.
//! 4. A value the table owns is released exactly once.
//! 5. Loading never fails the session: unreadable files are reported and skipped.

pub mod broadcast;
pub mod config;
pub mod migrate;
pub mod notify;
pub mod persist;
pub mod property;
pub mod table;

pub use broadcast::{
    ChangeBroadcaster, ChangeStream, NullBroadcaster, PropertyBroadcaster, PropertyChanged,
    SubscriptionId,
};
pub use config::TableConfig;
pub use migrate::{
    MigrationConfig, MigrationReport, ModuleRename, VersionMigrator, CURRENT_SCHEMA_VERSION,
    SCHEMA_VERSION_PROPERTY,
};
pub use notify::{LogNotifier, UserNotifier};
pub use persist::{DecodedSettings, SettingsRecord, WriteOutcome, SETTINGS_FILE_SUFFIX};
pub use property::{Property, PropertyInfo};
pub use table::PropertyTable;

pub use proptable_types::{
    Disposable, PropertyError, PropertyKind, PropertyResult, PropertyType, PropertyValue,
    SettingsGroup,
};
