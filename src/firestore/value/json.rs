//! Plain-JSON representation of Firestore values.
//!
//! Scalars, arrays and maps map onto their JSON counterparts; timestamps are
//! rendered as RFC 3339 strings. Write sentinels use a tagged object carrying
//! the reserved `__fieldValue__` key, e.g. `{"__fieldValue__":"increment","value":5}`.
//! The tagged form is write-only: decoding JSON that contains the marker key
//! is rejected.

use std::collections::BTreeMap;

use serde::{Serialize, Serializer};
use serde_json::{json, Map, Number, Value as JsonValue};

use crate::firestore::constants::FIELD_VALUE_MARKER;
use crate::firestore::error::{invalid_argument, FirestoreResult};
use crate::firestore::value::{FirestoreValue, SentinelValue, ValueKind};

impl FirestoreValue {
    /// Encodes the value into its JSON wire form.
    pub fn to_json(&self) -> JsonValue {
        match self.kind() {
            ValueKind::Null => JsonValue::Null,
            ValueKind::Boolean(value) => JsonValue::Bool(*value),
            ValueKind::Integer(value) => JsonValue::Number((*value).into()),
            ValueKind::Double(value) => Number::from_f64(*value)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            ValueKind::Timestamp(value) => JsonValue::String(value.to_rfc3339()),
            ValueKind::String(value) => JsonValue::String(value.clone()),
            ValueKind::Array(array) => {
                JsonValue::Array(array.values().iter().map(FirestoreValue::to_json).collect())
            }
            ValueKind::Map(map) => JsonValue::Object(
                map.fields()
                    .iter()
                    .map(|(key, value)| (key.clone(), value.to_json()))
                    .collect(),
            ),
            ValueKind::Sentinel(sentinel) => encode_sentinel(sentinel),
        }
    }

    /// Decodes plain JSON read from the backend or produced by `serde_json`.
    pub fn from_json(value: JsonValue) -> FirestoreResult<Self> {
        Ok(match value {
            JsonValue::Null => FirestoreValue::null(),
            JsonValue::Bool(flag) => FirestoreValue::from_bool(flag),
            JsonValue::Number(number) => decode_number(&number)?,
            JsonValue::String(text) => FirestoreValue::from_string(text),
            JsonValue::Array(values) => FirestoreValue::from_array(
                values
                    .into_iter()
                    .map(FirestoreValue::from_json)
                    .collect::<FirestoreResult<Vec<_>>>()?,
            ),
            JsonValue::Object(object) => FirestoreValue::from_map(decode_object(object)?),
        })
    }
}

/// Decodes a JSON object into document fields.
pub(crate) fn decode_object(object: Map<String, JsonValue>) -> FirestoreResult<BTreeMap<String, FirestoreValue>> {
    if object.contains_key(FIELD_VALUE_MARKER) {
        return Err(invalid_argument(format!(
            "'{FIELD_VALUE_MARKER}' objects are write-only sentinels and cannot be decoded"
        )));
    }
    object
        .into_iter()
        .map(|(key, value)| FirestoreValue::from_json(value).map(|decoded| (key, decoded)))
        .collect()
}

fn decode_number(number: &Number) -> FirestoreResult<FirestoreValue> {
    if let Some(integer) = number.as_i64() {
        return Ok(FirestoreValue::from_integer(integer));
    }
    number
        .as_f64()
        .map(FirestoreValue::from_double)
        .ok_or_else(|| invalid_argument(format!("Unsupported JSON number {number}")))
}

fn encode_sentinel(sentinel: &SentinelValue) -> JsonValue {
    let tag = sentinel.tag();
    match sentinel {
        SentinelValue::ServerTimestamp | SentinelValue::Delete => json!({ FIELD_VALUE_MARKER: tag }),
        SentinelValue::NumericIncrement(operand) => json!({
            FIELD_VALUE_MARKER: tag,
            "value": operand.to_json(),
        }),
        SentinelValue::ArrayUnion(elements) | SentinelValue::ArrayRemove(elements) => json!({
            FIELD_VALUE_MARKER: tag,
            "elements": elements.iter().map(FirestoreValue::to_json).collect::<Vec<_>>(),
        }),
    }
}

impl Serialize for FirestoreValue {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_json().serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firestore::model::Timestamp;

    #[test]
    fn increment_uses_tagged_form() {
        let encoded = serde_json::to_string(&FirestoreValue::numeric_increment(5)).unwrap();
        assert_eq!(encoded, r#"{"__fieldValue__":"increment","value":5}"#);
    }

    #[test]
    fn array_union_uses_tagged_form() {
        let sentinel = FirestoreValue::array_union(vec!["a".into(), 2.into()]);
        assert_eq!(
            sentinel.to_json(),
            json!({"__fieldValue__": "arrayUnion", "elements": ["a", 2]})
        );
        let remove = FirestoreValue::array_remove(vec!["a".into()]);
        assert_eq!(
            remove.to_json(),
            json!({"__fieldValue__": "arrayRemove", "elements": ["a"]})
        );
    }

    #[test]
    fn timestamp_and_delete_sentinels() {
        assert_eq!(
            FirestoreValue::server_timestamp().to_json(),
            json!({"__fieldValue__": "serverTimestamp"})
        );
        assert_eq!(
            FirestoreValue::delete_field().to_json(),
            json!({"__fieldValue__": "delete"})
        );
    }

    #[test]
    fn sentinels_cannot_be_decoded() {
        let encoded = FirestoreValue::numeric_increment(1).to_json();
        let err = FirestoreValue::from_json(encoded).unwrap_err();
        assert_eq!(err.code_str(), "firestore/invalid-argument");
    }

    #[test]
    fn decodes_nested_documents() {
        let decoded = FirestoreValue::from_json(json!({
            "name": "Ada",
            "age": 36,
            "score": 9.5,
            "tags": ["math", null],
        }))
        .unwrap();
        let map = decoded.as_map().unwrap();
        assert_eq!(map.get("age"), Some(&FirestoreValue::from_integer(36)));
        assert_eq!(map.get("score"), Some(&FirestoreValue::from_double(9.5)));
        assert_eq!(decoded.to_json()["tags"], json!(["math", null]));
    }

    #[test]
    fn timestamps_render_as_rfc3339() {
        let value = FirestoreValue::from_timestamp(Timestamp::new(0, 0));
        assert_eq!(value.to_json(), json!("1970-01-01T00:00:00Z"));
    }
}
