use proptable_types::{PropertyKind, PropertyValue};

/// One stored entry of the property table.
#[derive(Clone, Debug)]
pub struct Property {
    /// Fully resolved storage key.
    pub name: String,
    /// Payload; `None` for an entry that exists but holds nothing.
    pub value: Option<PropertyValue>,
    /// Whether this entry is written to its scope's settings file.
    pub persist: bool,
    /// Whether the table owns releasing `value`.
    pub dispose: bool,
}

impl Property {
    pub fn new(name: impl Into<String>, value: Option<PropertyValue>, persist: bool) -> Self {
        Self {
            name: name.into(),
            value,
            persist,
            dispose: false,
        }
    }

    /// Kind of the stored payload, if any.
    pub fn kind(&self) -> Option<PropertyKind> {
        self.value.as_ref().map(PropertyValue::kind)
    }

    /// Returns `true` when this entry would be written by a save.
    pub fn is_saveable(&self) -> bool {
        self.persist && self.value.as_ref().is_some_and(PropertyValue::is_persistable)
    }

    /// Returns the value this entry owns, if ownership is set.
    pub fn owned_value(&self) -> Option<&PropertyValue> {
        if self.dispose {
            self.value.as_ref()
        } else {
            None
        }
    }

    /// Swap in a new payload.
    ///
    /// Returns the old payload when the entry owned it, so the caller can
    /// release it outside any lock. Ownership carries over only when `keep_ownership`
    /// is set and the new payload is disposable.
    pub fn replace(
        &mut self,
        value: Option<PropertyValue>,
        keep_ownership: bool,
    ) -> Option<PropertyValue> {
        let old = std::mem::replace(&mut self.value, value);
        let released = if self.dispose { old } else { None };
        self.dispose = self.dispose
            && keep_ownership
            && self.value.as_ref().is_some_and(PropertyValue::is_disposable);
        released
    }
}

/// Read-only description of an entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PropertyInfo {
    pub key: String,
    pub kind: Option<PropertyKind>,
    pub persist: bool,
    pub dispose: bool,
}

impl From<&Property> for PropertyInfo {
    fn from(p: &Property) -> Self {
        Self {
            key: p.name.clone(),
            kind: p.kind(),
            persist: p.persist,
            dispose: p.dispose,
        }
    }
}
