//! # Envelope
//!
//! Wire record placed into the physical queue.
//!
//! ```text
//! {
//!   "key": <topic key>,
//!   "value": <payload>,
//!   "format": 1,
//!   "keysIfUndelivered": [<storage key>, ...]   // omitted when empty
//! }
//! ```
//!
//! The `format` marker lets the dispatch path reject records written by
//! anything other than this protocol.

use super::errors::RouterError;
use super::key::{StorageKey, TopicId, TopicKey};
use serde::Deserialize;
use serde_json::{Map, Value};

/// The single recognised envelope format marker.
pub const ENVELOPE_FORMAT: u64 = 1;

const KEY_FIELD: &str = "key";
const VALUE_FIELD: &str = "value";
const FORMAT_FIELD: &str = "format";
const UNDELIVERED_FIELD: &str = "keysIfUndelivered";

/// A decoded envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Canonical identifier of `key`.
    pub topic: TopicId,
    /// The topic key as written by the producer.
    pub key: TopicKey,
    /// The caller payload.
    pub payload: Value,
    /// Fallback storage keys carried with the message.
    pub keys_if_undelivered: Vec<StorageKey>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEnvelope {
    key: TopicKey,
    value: Value,
    #[serde(default)]
    keys_if_undelivered: Vec<StorageKey>,
}

/// Wrap a payload for the physical queue.
#[must_use]
pub fn encode(key: &TopicKey, payload: Value, keys_if_undelivered: &[StorageKey]) -> Value {
    let mut record = Map::new();
    record.insert(KEY_FIELD.to_string(), key.to_value());
    record.insert(VALUE_FIELD.to_string(), payload);
    record.insert(FORMAT_FIELD.to_string(), Value::from(ENVELOPE_FORMAT));
    if !keys_if_undelivered.is_empty() {
        record.insert(
            UNDELIVERED_FIELD.to_string(),
            Value::Array(keys_if_undelivered.iter().map(StorageKey::to_value).collect()),
        );
    }
    Value::Object(record)
}

/// Unwrap a raw record delivered by the physical queue.
///
/// # Errors
///
/// `RouterError::UnrecognizedFormat` if the record is not an object carrying
/// the expected format marker, or if its fields are malformed.
pub fn decode(raw: Value) -> Result<Envelope, RouterError> {
    match raw.get(FORMAT_FIELD) {
        Some(marker) if marker.as_u64() == Some(ENVELOPE_FORMAT) => {}
        Some(marker) => {
            return Err(RouterError::UnrecognizedFormat {
                found: format!("format marker {marker}"),
            })
        }
        None => {
            return Err(RouterError::UnrecognizedFormat {
                found: format!("no format marker in {}", describe(&raw)),
            })
        }
    }

    let wire: WireEnvelope =
        serde_json::from_value(raw).map_err(|e| RouterError::UnrecognizedFormat {
            found: format!("malformed envelope: {e}"),
        })?;

    Ok(Envelope {
        topic: wire.key.identifier(),
        key: wire.key,
        payload: wire.value,
        keys_if_undelivered: wire.keys_if_undelivered,
    })
}

fn describe(raw: &Value) -> &'static str {
    match raw {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
