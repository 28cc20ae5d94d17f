//! Persistent progress store.
//!
//! Upload sessions and part cursors survive process restarts through a small key/value store. Stores only deal with
//! raw strings ([`KvStore`]); typing is layered on top with an explicit tagged encoding, each persisted value being
//! written as `<tag>:<payload>`:
//!
//! ```text
//!     i:10485760                  -> Value::Int
//!     f:0.5                       -> Value::Float
//!     s:"etag-1","etag-2"         -> Value::Str
//!     r:{"task_id":"..."}         -> Value::Record (JSON)
//! ```
//!
//! Callers request a concrete [`Stored`] type through [`StoreExt::load()`]; the tag is checked before decoding and a
//! mismatch fails with [`StoreError::TypeMismatch`] instead of coercing anything.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

mod disk;
pub use disk::*;

mod memory;
pub use memory::*;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("key `{key}` holds a {found} value, expected {expected}")]
    TypeMismatch { key: String, expected: Kind, found: Kind },
    #[error("malformed stored value: {0}")]
    Malformed(String),
    #[error("invalid store key: `{0}`")]
    InvalidKey(String),
}

/// Raw string key/value store.
///
/// Implementations own their interior mutability so that a store can be shared by reference.
pub trait KvStore: Send + Sync {
    /// Return the raw value stored under `key`, if any.
    fn get_raw(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Store `raw` under `key`, replacing any previous value.
    fn set_raw(&self, key: &str, raw: String) -> Result<(), StoreError>;

    /// Remove `key`, removing a missing key is not an error.
    fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// Type tag of a stored value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Int,
    Float,
    Str,
    Record,
}

impl Kind {
    const fn tag(self) -> &'static str {
        match self {
            Self::Int => "i",
            Self::Float => "f",
            Self::Str => "s",
            Self::Record => "r",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Int => "scalar-int",
            Self::Float => "scalar-float",
            Self::Str => "scalar-string",
            Self::Record => "structured-record",
        })
    }
}

/// A tagged stored value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Str(String),
    /// A JSON-serialized record.
    Record(String),
}

impl Value {
    pub fn kind(&self) -> Kind {
        match self {
            Self::Int(_) => Kind::Int,
            Self::Float(_) => Kind::Float,
            Self::Str(_) => Kind::Str,
            Self::Record(_) => Kind::Record,
        }
    }

    /// Serialize `record` into a [`Value::Record`].
    pub fn record<T: Serialize>(record: &T) -> Result<Self, StoreError> {
        Ok(Self::Record(serde_json::to_string(record)?))
    }

    /// Deserialize a [`Value::Record`] payload.
    pub fn into_record<T: DeserializeOwned>(self) -> Result<T, StoreError> {
        match self {
            Self::Record(json) => Ok(serde_json::from_str(&json)?),
            other => Err(StoreError::Malformed(format!("{} is not a record", other.kind()))),
        }
    }

    pub fn encode(&self) -> String {
        let tag = self.kind().tag();
        match self {
            Self::Int(i) => format!("{tag}:{i}"),
            Self::Float(f) => format!("{tag}:{f}"),
            Self::Str(s) | Self::Record(s) => format!("{tag}:{s}"),
        }
    }

    pub fn decode(raw: &str) -> Result<Self, StoreError> {
        let malformed = || StoreError::Malformed(raw.to_owned());

        match raw.split_once(':').ok_or_else(malformed)? {
            ("i", payload) => payload.parse().map(Self::Int).map_err(|_| malformed()),
            ("f", payload) => payload.parse().map(Self::Float).map_err(|_| malformed()),
            ("s", payload) => Ok(Self::Str(payload.to_owned())),
            ("r", payload) => Ok(Self::Record(payload.to_owned())),
            _ => Err(malformed()),
        }
    }
}

/// A type that can be persisted in a [`KvStore`].
///
/// [`Stored::from_value()`] is only called with a value of kind [`Stored::KIND`].
pub trait Stored: Sized {
    const KIND: Kind;

    fn to_value(&self) -> Result<Value, StoreError>;

    fn from_value(value: Value) -> Result<Self, StoreError>;
}

impl Stored for i64 {
    const KIND: Kind = Kind::Int;

    fn to_value(&self) -> Result<Value, StoreError> {
        Ok(Value::Int(*self))
    }

    fn from_value(value: Value) -> Result<Self, StoreError> {
        match value {
            Value::Int(i) => Ok(i),
            other => Err(StoreError::Malformed(other.encode())),
        }
    }
}

impl Stored for u64 {
    const KIND: Kind = Kind::Int;

    fn to_value(&self) -> Result<Value, StoreError> {
        i64::try_from(*self)
            .map(Value::Int)
            .map_err(|_| StoreError::Malformed(self.to_string()))
    }

    fn from_value(value: Value) -> Result<Self, StoreError> {
        let i = i64::from_value(value)?;
        u64::try_from(i).map_err(|_| StoreError::Malformed(i.to_string()))
    }
}

impl Stored for f64 {
    const KIND: Kind = Kind::Float;

    fn to_value(&self) -> Result<Value, StoreError> {
        Ok(Value::Float(*self))
    }

    fn from_value(value: Value) -> Result<Self, StoreError> {
        match value {
            Value::Float(f) => Ok(f),
            other => Err(StoreError::Malformed(other.encode())),
        }
    }
}

impl Stored for String {
    const KIND: Kind = Kind::Str;

    fn to_value(&self) -> Result<Value, StoreError> {
        Ok(Value::Str(self.clone()))
    }

    fn from_value(value: Value) -> Result<Self, StoreError> {
        match value {
            Value::Str(s) => Ok(s),
            other => Err(StoreError::Malformed(other.encode())),
        }
    }
}

/// Typed access on top of any [`KvStore`].
pub trait StoreExt: KvStore {
    /// Load and decode the value under `key` as a `T`.
    fn load<T: Stored>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let Some(raw) = self.get_raw(key)? else {
            return Ok(None);
        };

        let value = Value::decode(&raw)?;
        if value.kind() != T::KIND {
            return Err(StoreError::TypeMismatch {
                key: key.to_owned(),
                expected: T::KIND,
                found: value.kind(),
            });
        }

        T::from_value(value).map(Some)
    }

    /// Encode and store `value` under `key`.
    fn save<T: Stored>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        self.set_raw(key, value.to_value()?.encode())
    }
}

impl<S: KvStore + ?Sized> StoreExt for S {}

/// Keys end up as file names, restrict them to a portable charset without extensions.
pub(crate) fn validate_key(key: &str) -> Result<(), StoreError> {
    let valid = !key.is_empty() && key.bytes().all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-'));

    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(key.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Cursor {
        offset: u64,
        tokens: Vec<String>,
    }

    impl Stored for Cursor {
        const KIND: Kind = Kind::Record;

        fn to_value(&self) -> Result<Value, StoreError> {
            Value::record(self)
        }

        fn from_value(value: Value) -> Result<Self, StoreError> {
            value.into_record()
        }
    }

    #[test]
    fn test_encoding() {
        assert_eq!(Value::Int(-3).encode(), "i:-3");
        assert_eq!(Value::Float(0.5).encode(), "f:0.5");
        assert_eq!(Value::Str("a:b".into()).encode(), "s:a:b");

        assert_eq!(Value::decode("s:a:b").unwrap(), Value::Str("a:b".into()));
        assert_eq!(Value::decode("s:").unwrap(), Value::Str("".into()));
        assert!(matches!(Value::decode("i:abc"), Err(StoreError::Malformed(_))));
        assert!(matches!(Value::decode("x:1"), Err(StoreError::Malformed(_))));
        assert!(matches!(Value::decode("untagged"), Err(StoreError::Malformed(_))));
    }

    #[test]
    fn test_typed_access() {
        let store = MemoryStore::default();
        let cursor = Cursor {
            offset: 42,
            tokens: vec!["a".into(), "b".into()],
        };

        store.save("cursor", &cursor).unwrap();
        store.save("bytes", &10_485_760u64).unwrap();
        store.save("ratio", &0.25f64).unwrap();
        store.save("tokens", &"a,b".to_owned()).unwrap();

        assert_eq!(store.load::<Cursor>("cursor").unwrap(), Some(cursor));
        assert_eq!(store.load::<u64>("bytes").unwrap(), Some(10_485_760));
        assert_eq!(store.load::<f64>("ratio").unwrap(), Some(0.25));
        assert_eq!(store.load::<String>("tokens").unwrap().as_deref(), Some("a,b"));
        assert_eq!(store.load::<u64>("missing").unwrap(), None);
    }

    #[test]
    fn test_type_mismatch() {
        let store = MemoryStore::default();
        store.save("tokens", &"a,b".to_owned()).unwrap();

        let err = store.load::<i64>("tokens").unwrap_err();

        assert!(matches!(
            err,
            StoreError::TypeMismatch {
                expected: Kind::Int,
                found: Kind::Str,
                ..
            }
        ));
    }

    #[test]
    fn test_negative_int_as_u64() {
        let store = MemoryStore::default();
        store.save("bytes", &-1i64).unwrap();

        assert!(matches!(store.load::<u64>("bytes"), Err(StoreError::Malformed(_))));
    }

    #[test]
    fn test_validate_key() {
        assert!(validate_key("session_5eb63bbbe01eeed093cb22bb8f5acdc3").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key(".hidden").is_err());
        assert!(validate_key("../escape").is_err());
        assert!(validate_key("a/b").is_err());
        assert!(validate_key("entry.tmp").is_err());
    }
}
