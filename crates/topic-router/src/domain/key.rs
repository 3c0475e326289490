//! # Topic Keys
//!
//! Caller-facing topic keys and their canonical string form.
//!
//! A key is either a plain name or an ordered list of scalars. Its identifier
//! is the compact JSON encoding of the key, which other readers of the same
//! physical queue must reproduce byte for byte.

use super::errors::RouterError;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::fmt;

/// A single scalar inside a compound topic key or storage key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyPart {
    /// A string component.
    Str(String),
    /// A numeric component.
    Number(Number),
    /// A boolean component.
    Bool(bool),
}

impl KeyPart {
    /// Build a numeric part from a float.
    ///
    /// Integral values are stored as integers so that `1.0` and `1` produce
    /// the same identifier, and `2^60` is written out in full digits as a
    /// JSON encoder would.
    ///
    /// # Errors
    ///
    /// Returns `RouterError::Encoding` for NaN or infinite values, and for
    /// integral values outside the 64-bit integer range, whose exponent form
    /// would not match other encoders.
    pub fn float(value: f64) -> Result<Self, RouterError> {
        if !value.is_finite() {
            return Err(RouterError::Encoding(format!(
                "non-finite number {value} cannot be used in a key"
            )));
        }

        if value.fract() == 0.0 {
            // Saturating cast; anything saturated fails both conversions below.
            #[allow(clippy::cast_possible_truncation)]
            let whole = value as i128;
            return i64::try_from(whole)
                .map(Number::from)
                .or_else(|_| u64::try_from(whole).map(Number::from))
                .map(Self::Number)
                .map_err(|_| {
                    RouterError::Encoding(format!(
                        "integral number {value} is outside the 64-bit integer range"
                    ))
                });
        }

        Number::from_f64(value)
            .map(Self::Number)
            .ok_or_else(|| RouterError::Encoding(format!("unencodable number {value}")))
    }

    /// JSON value of this part.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Str(s) => Value::String(s.clone()),
            Self::Number(n) => Value::Number(n.clone()),
            Self::Bool(b) => Value::Bool(*b),
        }
    }
}

impl From<&str> for KeyPart {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for KeyPart {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<bool> for KeyPart {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

macro_rules! key_part_from_int {
    ($($t:ty),*) => {
        $(
            impl From<$t> for KeyPart {
                fn from(value: $t) -> Self {
                    Self::Number(Number::from(value))
                }
            }
        )*
    };
}

key_part_from_int!(i32, i64, u32, u64, usize);

/// Caller-supplied identifier of a logical queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TopicKey {
    /// An opaque string name, e.g. `"my-queue"`.
    Name(String),
    /// An ordered sequence of scalars, e.g. `["jobs", 7, true]`.
    Parts(Vec<KeyPart>),
}

impl TopicKey {
    /// Build a compound key from anything convertible into key parts.
    pub fn parts<I, P>(parts: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<KeyPart>,
    {
        Self::Parts(parts.into_iter().map(Into::into).collect())
    }

    /// JSON value of this key, as stored inside an envelope.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Name(name) => Value::String(name.clone()),
            Self::Parts(parts) => Value::Array(parts.iter().map(KeyPart::to_value).collect()),
        }
    }

    /// Canonical identifier of this key.
    ///
    /// Compact JSON: key order preserved, exact scalar types kept, no
    /// whitespace. Two keys are the same topic iff their identifiers match.
    #[must_use]
    pub fn identifier(&self) -> TopicId {
        TopicId(self.to_value().to_string())
    }
}

impl From<&str> for TopicKey {
    fn from(value: &str) -> Self {
        Self::Name(value.to_string())
    }
}

impl From<String> for TopicKey {
    fn from(value: String) -> Self {
        Self::Name(value)
    }
}

impl From<Vec<KeyPart>> for TopicKey {
    fn from(value: Vec<KeyPart>) -> Self {
        Self::Parts(value)
    }
}

impl<const N: usize> From<[KeyPart; N]> for TopicKey {
    fn from(value: [KeyPart; N]) -> Self {
        Self::Parts(value.into())
    }
}

impl From<&TopicKey> for TopicKey {
    fn from(value: &TopicKey) -> Self {
        value.clone()
    }
}

/// Canonical string form of a [`TopicKey`], used as the registry key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TopicId(String);

impl TopicId {
    /// Borrow the identifier string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TopicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A storage location where the physical queue parks a message it could not
/// deliver.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StorageKey(Vec<KeyPart>);

impl StorageKey {
    /// Build a storage key from its parts.
    pub fn new<I, P>(parts: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<KeyPart>,
    {
        Self(parts.into_iter().map(Into::into).collect())
    }

    /// The key's components.
    #[must_use]
    pub fn parts(&self) -> &[KeyPart] {
        &self.0
    }

    /// JSON value of this key.
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::Array(self.0.iter().map(KeyPart::to_value).collect())
    }
}

// `Number` is not `Hash`; hash through its canonical text instead.
impl std::hash::Hash for KeyPart {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Str(s) => s.hash(state),
            Self::Number(n) => n.to_string().hash(state),
            Self::Bool(b) => b.hash(state),
        }
    }
}
