//! Foundation types for the property table.
//!
//! Every other proptable crate depends on `proptable-types`.
//!
//! # Key Types
//!
//! - [`SettingsGroup`] — Global, Local and Best visibility scopes
//! - [`KeyResolver`] — maps logical names to mangled storage keys
//! - [`PropertyValue`] — type-erased payload stored under a key
//! - [`PropertyType`] — typed view over a payload, checked at read time
//! - [`Disposable`] — resources whose release the table can own
//! - [`PropertyError`] — error taxonomy shared by all crates

pub mod error;
pub mod key;
pub mod scope;
pub mod value;

pub use error::{PropertyError, PropertyResult};
pub use key::{
    demangle, is_mangled, mangle, scope_prefix, unscoped, validate_settings_id, KeyResolver,
    GLOBAL_SETTINGS_ID, MANGLE_MARKER, MANGLE_SEPARATOR,
};
pub use scope::SettingsGroup;
pub use value::{values_equal, Disposable, PropertyKind, PropertyType, PropertyValue};
