//! # Core Type Definitions
//!
//! This module contains the value-level types shared by every other module:
//! - Normalized and raw values (`Valu`)
//! - Node identifiers (`Buid`)
//! - Error types (`StoreError`)
//!
//! ## Determinism Guarantees
//!
//! All types in this module:
//! - Use integer values only (no floating-point)
//! - Implement `Ord` for deterministic ordering in `BTreeMap`/`BTreeSet`

use crate::primitives::BUID_LEN;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// =============================================================================
// VALUES
// =============================================================================

/// A raw or normalized value.
///
/// Raw input handed to a type's `norm` and the normalized value it returns
/// share this representation. Booleans are carried as `Int(0)`/`Int(1)`;
/// composite and ndef values are `List`s.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Valu {
    Int(i64),
    Str(String),
    List(Vec<Valu>),
}

impl Valu {
    /// Get the integer payload, if this is an `Int`.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Get the string payload, if this is a `Str`.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Get the list payload, if this is a `List`.
    #[must_use]
    pub fn as_list(&self) -> Option<&[Valu]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Convert a JSON value (schema defaults, feed payloads) into a raw value.
    ///
    /// Floats, objects and null have no raw representation.
    pub fn from_json(json: &serde_json::Value) -> Result<Self, StoreError> {
        match json {
            serde_json::Value::Bool(b) => Ok(Self::Int(i64::from(*b))),
            serde_json::Value::Number(n) => {
                n.as_i64()
                    .map(Self::Int)
                    .ok_or_else(|| StoreError::BadTypeValu {
                        name: "json".to_string(),
                        field: String::new(),
                        mesg: format!("number {} is not a 64-bit integer", n),
                    })
            }
            serde_json::Value::String(s) => Ok(Self::Str(s.clone())),
            serde_json::Value::Array(items) => items
                .iter()
                .map(Self::from_json)
                .collect::<Result<Vec<_>, _>>()
                .map(Self::List),
            serde_json::Value::Null | serde_json::Value::Object(_) => {
                Err(StoreError::BadTypeValu {
                    name: "json".to_string(),
                    field: String::new(),
                    mesg: format!("unsupported json value: {}", json),
                })
            }
        }
    }

    /// Render as plain JSON for the packed boundary form.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Int(v) => serde_json::Value::from(*v),
            Self::Str(s) => serde_json::Value::from(s.as_str()),
            Self::List(items) => {
                serde_json::Value::Array(items.iter().map(Self::to_json).collect())
            }
        }
    }
}

impl fmt::Display for Valu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{}", v),
            Self::Str(s) => write!(f, "{}", s),
            Self::List(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, ")")
            }
        }
    }
}

impl From<i64> for Valu {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Valu {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<bool> for Valu {
    fn from(v: bool) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<&str> for Valu {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for Valu {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<Vec<Valu>> for Valu {
    fn from(v: Vec<Valu>) -> Self {
        Self::List(v)
    }
}

// =============================================================================
// NODE IDENTIFIER
// =============================================================================

/// Binary unique id of a node.
///
/// The BLAKE3 digest of `form ‖ 0x00 ‖ index bytes of the primary value`.
/// Index bytes are collision free per type, so two distinct ndefs never
/// share a buid input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Buid(pub [u8; BUID_LEN]);

impl Buid {
    /// Derive the buid of an ndef from its form name and primary index bytes.
    #[must_use]
    pub fn from_parts(form: &str, indx: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(form.as_bytes());
        hasher.update(&[0u8]);
        hasher.update(indx);
        Self(*hasher.finalize().as_bytes())
    }

    /// Read a buid from the trailing bytes of a row key.
    #[must_use]
    pub fn from_key_suffix(key: &[u8]) -> Option<Self> {
        let start = key.len().checked_sub(BUID_LEN)?;
        let mut bytes = [0u8; BUID_LEN];
        bytes.copy_from_slice(&key[start..]);
        Some(Self(bytes))
    }

    /// Parse a buid from its hex form.
    pub fn from_hex(text: &str) -> Result<Self, StoreError> {
        let raw = hex::decode(text).map_err(|e| StoreError::BadTypeValu {
            name: "buid".to_string(),
            field: String::new(),
            mesg: e.to_string(),
        })?;
        let bytes: [u8; BUID_LEN] = raw.try_into().map_err(|_| StoreError::BadTypeValu {
            name: "buid".to_string(),
            field: String::new(),
            mesg: format!("expected {} bytes", BUID_LEN),
        })?;
        Ok(Self(bytes))
    }

    /// Get the raw digest bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; BUID_LEN] {
        &self.0
    }
}

impl fmt::Display for Buid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur in the tufo store.
///
/// - Schema and normalization errors are surfaced synchronously
/// - Lookups for absent nodes return empty results, never an error
/// - Storage failures abort the enclosing transaction
#[derive(Debug, Error)]
pub enum StoreError {
    /// A value failed normalization for its type.
    #[error("bad value for type {name}{}: {mesg}", field_suffix(.field))]
    BadTypeValu {
        /// The type that rejected the value.
        name: String,
        /// Dotted path of the failing sub-field (empty at top level).
        field: String,
        /// What was wrong.
        mesg: String,
    },

    /// The requested form is not part of the model.
    #[error("no such form: {0}")]
    NoSuchForm(String),

    /// The requested property is not declared on the form.
    #[error("no such prop: {0}")]
    NoSuchProp(String),

    /// A schema referenced a type that is not registered.
    #[error("no such type: {0}")]
    NoSuchType(String),

    /// A mutation targeted a node that does not exist.
    #[error("no such node: {0}")]
    NoSuchNode(String),

    /// Attempt to overwrite a read-only property with a different value.
    #[error("read-only prop: {0}")]
    ReadOnlyProp(String),

    /// A layer mount is misconfigured.
    #[error("no such layer: {0}")]
    NoSuchLayer(String),

    /// The authorization hook refused the operation.
    #[error("auth denied: {actor} may not {perm}")]
    AuthDenied {
        /// The acting identity.
        actor: String,
        /// The permission tuple, dotted.
        perm: String,
    },

    /// No feed function is registered under the name.
    #[error("no such feed: {0}")]
    NoSuchFeed(String),

    /// The declarative schema is malformed.
    #[error("bad schema: {0}")]
    BadSchema(String),

    /// The store configuration is malformed.
    #[error("bad config: {0}")]
    BadConfig(String),

    /// An underlying storage (redb) failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// A row could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),
}

fn field_suffix(field: &str) -> String {
    if field.is_empty() {
        String::new()
    } else {
        format!(" (field {})", field)
    }
}

impl StoreError {
    /// Build a `BadTypeValu` for a top-level value of the named type.
    pub fn bad_valu(name: &str, mesg: impl Into<String>) -> Self {
        Self::BadTypeValu {
            name: name.to_string(),
            field: String::new(),
            mesg: mesg.into(),
        }
    }

    /// Prefix the field path of a `BadTypeValu` with a sub-field name.
    ///
    /// Other variants pass through unchanged.
    #[must_use]
    pub fn within_field(self, sub: &str) -> Self {
        match self {
            Self::BadTypeValu { name, field, mesg } => Self::BadTypeValu {
                name,
                field: if field.is_empty() {
                    sub.to_string()
                } else {
                    format!("{}.{}", sub, field)
                },
                mesg,
            },
            other => other,
        }
    }
}

macro_rules! storage_error_from {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for StoreError {
                fn from(e: $ty) -> Self {
                    Self::Storage(e.to_string())
                }
            }
        )*
    };
}

storage_error_from!(
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError,
    redb::CompactionError,
    std::io::Error,
);

impl From<postcard::Error> for StoreError {
    fn from(e: postcard::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::BadSchema(e.to_string())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valu_from_json_maps_bools_to_ints() {
        let v = Valu::from_json(&serde_json::json!(true)).expect("bool");
        assert_eq!(v, Valu::Int(1));
    }

    #[test]
    fn valu_from_json_nested_list() {
        let v = Valu::from_json(&serde_json::json!([10, "haha"])).expect("list");
        assert_eq!(v, Valu::List(vec![Valu::Int(10), Valu::from("haha")]));
    }

    #[test]
    fn valu_from_json_rejects_floats_and_null() {
        assert!(Valu::from_json(&serde_json::json!(1.5)).is_err());
        assert!(Valu::from_json(&serde_json::Value::Null).is_err());
    }

    #[test]
    fn valu_display_renders_lists() {
        let v = Valu::List(vec![Valu::Int(1), Valu::from("a")]);
        assert_eq!(v.to_string(), "(1, a)");
    }

    #[test]
    fn buid_hex_roundtrip() {
        let buid = Buid::from_parts("teststr", b"hehe");
        let parsed = Buid::from_hex(&buid.to_string()).expect("parse");
        assert_eq!(buid, parsed);
    }

    #[test]
    fn buid_depends_on_form() {
        assert_ne!(
            Buid::from_parts("teststr", b"hehe"),
            Buid::from_parts("testlower", b"hehe")
        );
    }

    #[test]
    fn buid_from_short_key_is_none() {
        assert!(Buid::from_key_suffix(&[1, 2, 3]).is_none());
    }

    #[test]
    fn within_field_builds_dotted_path() {
        let err = StoreError::bad_valu("int", "too big")
            .within_field("hehe")
            .within_field("outer");
        match err {
            StoreError::BadTypeValu { field, .. } => assert_eq!(field, "outer.hehe"),
            other => unreachable!("unexpected error: {other}"),
        }
    }
}
