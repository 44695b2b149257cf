use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// A resource whose cleanup the property table can take ownership of.
///
/// `release` is called at most once per ownership period: when an owned value
/// is replaced, removed, or the table is torn down.
pub trait Disposable: Send + Sync + fmt::Debug {
    /// Release the resources held by this value.
    fn release(&self);
}

/// Payload kinds a property can hold.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PropertyKind {
    Bool,
    Int,
    Float,
    Str,
    StrList,
    Structured,
    Handle,
}

impl fmt::Display for PropertyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PropertyKind::Bool => "bool",
            PropertyKind::Int => "int",
            PropertyKind::Float => "float",
            PropertyKind::Str => "string",
            PropertyKind::StrList => "string-list",
            PropertyKind::Structured => "structured",
            PropertyKind::Handle => "handle",
        };
        f.write_str(s)
    }
}

/// Type-erased property payload.
///
/// Every variant except [`PropertyValue::Handle`] can be written to a
/// settings file. Handles live only in memory.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "kebab-case")]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    /// Non-finite values are written as the tokens `"NaN"`, `"inf"` and `"-inf"`.
    Float(#[serde(with = "float_repr")] f64),
    Str(String),
    StrList(Vec<String>),
    /// Serialized structured blob (dialog layouts, column specs, ...).
    Structured(serde_json::Value),
    #[serde(skip)]
    Handle(Arc<dyn Disposable>),
}

impl PropertyValue {
    /// The kind of this payload.
    pub fn kind(&self) -> PropertyKind {
        match self {
            PropertyValue::Bool(_) => PropertyKind::Bool,
            PropertyValue::Int(_) => PropertyKind::Int,
            PropertyValue::Float(_) => PropertyKind::Float,
            PropertyValue::Str(_) => PropertyKind::Str,
            PropertyValue::StrList(_) => PropertyKind::StrList,
            PropertyValue::Structured(_) => PropertyKind::Structured,
            PropertyValue::Handle(_) => PropertyKind::Handle,
        }
    }

    /// Returns `true` if this value can be written to a settings file.
    pub fn is_persistable(&self) -> bool {
        !matches!(self, PropertyValue::Handle(_))
    }

    /// Returns `true` if this value supports resource release.
    pub fn is_disposable(&self) -> bool {
        matches!(self, PropertyValue::Handle(_))
    }

    /// Release the underlying resource, if any.
    pub fn release(&self) {
        if let PropertyValue::Handle(handle) = self {
            handle.release();
        }
    }
}

impl PartialEq for PropertyValue {
    /// Handles compare by reference, floats bitwise, everything else structurally.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (PropertyValue::Handle(a), PropertyValue::Handle(b)) => Arc::ptr_eq(a, b),
            (PropertyValue::Bool(a), PropertyValue::Bool(b)) => a == b,
            (PropertyValue::Int(a), PropertyValue::Int(b)) => a == b,
            (PropertyValue::Float(a), PropertyValue::Float(b)) => a.to_bits() == b.to_bits(),
            (PropertyValue::Str(a), PropertyValue::Str(b)) => a == b,
            (PropertyValue::StrList(a), PropertyValue::StrList(b)) => a == b,
            (PropertyValue::Structured(a), PropertyValue::Structured(b)) => a == b,
            _ => false,
        }
    }
}

mod float_repr {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    const NAN: &str = "NaN";
    const INFINITY: &str = "inf";
    const NEG_INFINITY: &str = "-inf";

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(f64),
        Token(String),
    }

    pub fn serialize<S: Serializer>(v: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if v.is_finite() {
            serializer.serialize_f64(*v)
        } else if v.is_nan() {
            serializer.serialize_str(NAN)
        } else if v.is_sign_positive() {
            serializer.serialize_str(INFINITY)
        } else {
            serializer.serialize_str(NEG_INFINITY)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Number(v) => Ok(v),
            Repr::Token(token) => match token.as_str() {
                NAN => Ok(f64::NAN),
                INFINITY => Ok(f64::INFINITY),
                NEG_INFINITY => Ok(f64::NEG_INFINITY),
                other => Err(D::Error::custom(format!("invalid float token `{other}`"))),
            },
        }
    }
}

/// Equality over optional payloads; two empty payloads are equal.
pub fn values_equal(a: Option<&PropertyValue>, b: Option<&PropertyValue>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// A Rust type that can be read from and written to a property.
pub trait PropertyType: Sized {
    /// Payload kind this type is stored as.
    const KIND: PropertyKind;

    /// Convert into a payload.
    fn into_value(self) -> PropertyValue;

    /// Extract from a payload; `None` when the payload has another kind.
    fn from_value(value: &PropertyValue) -> Option<Self>;
}

macro_rules! impl_property_type {
    ($ty:ty, $kind:ident, $variant:ident) => {
        impl PropertyType for $ty {
            const KIND: PropertyKind = PropertyKind::$kind;

            fn into_value(self) -> PropertyValue {
                PropertyValue::$variant(self)
            }

            fn from_value(value: &PropertyValue) -> Option<Self> {
                match value {
                    PropertyValue::$variant(v) => Some(v.clone()),
                    _ => None,
                }
            }
        }

        impl From<$ty> for PropertyValue {
            fn from(v: $ty) -> Self {
                PropertyValue::$variant(v)
            }
        }
    };
}

impl_property_type!(bool, Bool, Bool);
impl_property_type!(i64, Int, Int);
impl_property_type!(f64, Float, Float);
impl_property_type!(String, Str, Str);
impl_property_type!(Vec<String>, StrList, StrList);
impl_property_type!(serde_json::Value, Structured, Structured);
impl_property_type!(Arc<dyn Disposable>, Handle, Handle);

impl PropertyType for i32 {
    const KIND: PropertyKind = PropertyKind::Int;

    fn into_value(self) -> PropertyValue {
        PropertyValue::Int(self.into())
    }

    fn from_value(value: &PropertyValue) -> Option<Self> {
        match value {
            PropertyValue::Int(v) => i32::try_from(*v).ok(),
            _ => None,
        }
    }
}

impl From<i32> for PropertyValue {
    fn from(v: i32) -> Self {
        PropertyValue::Int(v.into())
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        PropertyValue::Str(v.to_string())
    }
}
