use std::collections::BTreeMap;

use crate::firestore::model::Timestamp;
use crate::firestore::value::{ArrayValue, MapValue};

#[derive(Clone, Debug, PartialEq)]
pub struct FirestoreValue {
    kind: ValueKind,
}

/// Write-only placeholders resolved by the backend when a write is applied.
///
/// Sentinels never appear in data read back from the backend and cannot be
/// used as filter or cursor values.
#[derive(Clone, Debug, PartialEq)]
pub enum SentinelValue {
    ServerTimestamp,
    ArrayUnion(Vec<FirestoreValue>),
    ArrayRemove(Vec<FirestoreValue>),
    NumericIncrement(Box<FirestoreValue>),
    Delete,
}

impl SentinelValue {
    /// Operation tag used by the JSON wire format.
    pub fn tag(&self) -> &'static str {
        match self {
            SentinelValue::ServerTimestamp => "serverTimestamp",
            SentinelValue::ArrayUnion(_) => "arrayUnion",
            SentinelValue::ArrayRemove(_) => "arrayRemove",
            SentinelValue::NumericIncrement(_) => "increment",
            SentinelValue::Delete => "delete",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ValueKind {
    Null,
    Boolean(bool),
    Integer(i64),
    Double(f64),
    Timestamp(Timestamp),
    String(String),
    Array(ArrayValue),
    Map(MapValue),
    Sentinel(SentinelValue),
}

impl FirestoreValue {
    pub fn null() -> Self {
        Self { kind: ValueKind::Null }
    }

    pub fn from_bool(value: bool) -> Self {
        Self {
            kind: ValueKind::Boolean(value),
        }
    }

    pub fn from_integer(value: i64) -> Self {
        Self {
            kind: ValueKind::Integer(value),
        }
    }

    pub fn from_double(value: f64) -> Self {
        Self {
            kind: ValueKind::Double(value),
        }
    }

    pub fn from_timestamp(value: Timestamp) -> Self {
        Self {
            kind: ValueKind::Timestamp(value),
        }
    }

    pub fn from_string(value: impl Into<String>) -> Self {
        Self {
            kind: ValueKind::String(value.into()),
        }
    }

    pub fn from_array(values: Vec<FirestoreValue>) -> Self {
        Self {
            kind: ValueKind::Array(ArrayValue::new(values)),
        }
    }

    pub fn from_map(map: BTreeMap<String, FirestoreValue>) -> Self {
        Self {
            kind: ValueKind::Map(MapValue::new(map)),
        }
    }

    /// Sentinel that makes the backend store its own commit time in the field.
    pub fn server_timestamp() -> Self {
        Self::sentinel(SentinelValue::ServerTimestamp)
    }

    /// Sentinel that adds each element not already present in the array field.
    pub fn array_union(elements: Vec<FirestoreValue>) -> Self {
        Self::sentinel(SentinelValue::ArrayUnion(elements))
    }

    /// Sentinel that removes every occurrence of the elements from the array field.
    pub fn array_remove(elements: Vec<FirestoreValue>) -> Self {
        Self::sentinel(SentinelValue::ArrayRemove(elements))
    }

    /// Sentinel that increments the numeric field by `operand`.
    pub fn numeric_increment(operand: impl Into<FirestoreValue>) -> Self {
        Self::sentinel(SentinelValue::NumericIncrement(Box::new(operand.into())))
    }

    /// Sentinel that removes the field from the document.
    pub fn delete_field() -> Self {
        Self::sentinel(SentinelValue::Delete)
    }

    fn sentinel(sentinel: SentinelValue) -> Self {
        Self {
            kind: ValueKind::Sentinel(sentinel),
        }
    }

    pub fn kind(&self) -> &ValueKind {
        &self.kind
    }

    pub fn into_kind(self) -> ValueKind {
        self.kind
    }

    pub fn is_null(&self) -> bool {
        matches!(self.kind, ValueKind::Null)
    }

    pub fn is_sentinel(&self) -> bool {
        matches!(self.kind, ValueKind::Sentinel(_))
    }

    /// Returns `true` if this value or any nested element is a sentinel.
    pub fn contains_sentinel(&self) -> bool {
        match &self.kind {
            ValueKind::Sentinel(_) => true,
            ValueKind::Array(array) => array.values().iter().any(FirestoreValue::contains_sentinel),
            ValueKind::Map(map) => map.fields().values().any(FirestoreValue::contains_sentinel),
            _ => false,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.kind {
            ValueKind::Boolean(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self.kind {
            ValueKind::Integer(value) => Some(value),
            _ => None,
        }
    }

    /// Numeric view of integer and double values.
    pub fn as_f64(&self) -> Option<f64> {
        match self.kind {
            ValueKind::Integer(value) => Some(value as f64),
            ValueKind::Double(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.kind {
            ValueKind::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&ArrayValue> {
        match &self.kind {
            ValueKind::Array(array) => Some(array),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&MapValue> {
        match &self.kind {
            ValueKind::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Short name of the value type, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match &self.kind {
            ValueKind::Null => "null",
            ValueKind::Boolean(_) => "boolean",
            ValueKind::Integer(_) => "integer",
            ValueKind::Double(_) => "double",
            ValueKind::Timestamp(_) => "timestamp",
            ValueKind::String(_) => "string",
            ValueKind::Array(_) => "array",
            ValueKind::Map(_) => "map",
            ValueKind::Sentinel(_) => "sentinel",
        }
    }
}

impl From<bool> for FirestoreValue {
    fn from(value: bool) -> Self {
        Self::from_bool(value)
    }
}

impl From<i64> for FirestoreValue {
    fn from(value: i64) -> Self {
        Self::from_integer(value)
    }
}

impl From<i32> for FirestoreValue {
    fn from(value: i32) -> Self {
        Self::from_integer(value as i64)
    }
}

impl From<u32> for FirestoreValue {
    fn from(value: u32) -> Self {
        Self::from_integer(value as i64)
    }
}

impl From<f64> for FirestoreValue {
    fn from(value: f64) -> Self {
        Self::from_double(value)
    }
}

impl From<&str> for FirestoreValue {
    fn from(value: &str) -> Self {
        Self::from_string(value)
    }
}

impl From<String> for FirestoreValue {
    fn from(value: String) -> Self {
        Self::from_string(value)
    }
}

impl From<Timestamp> for FirestoreValue {
    fn from(value: Timestamp) -> Self {
        Self::from_timestamp(value)
    }
}

impl From<MapValue> for FirestoreValue {
    fn from(value: MapValue) -> Self {
        Self {
            kind: ValueKind::Map(value),
        }
    }
}

impl From<BTreeMap<String, FirestoreValue>> for FirestoreValue {
    fn from(value: BTreeMap<String, FirestoreValue>) -> Self {
        Self::from_map(value)
    }
}

impl<T> From<Vec<T>> for FirestoreValue
where
    T: Into<FirestoreValue>,
{
    fn from(values: Vec<T>) -> Self {
        Self::from_array(values.into_iter().map(Into::into).collect())
    }
}

impl<T> From<Option<T>> for FirestoreValue
where
    T: Into<FirestoreValue>,
{
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or_else(Self::null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_basic_values() {
        let v = FirestoreValue::from_string("hello");
        match v.kind() {
            ValueKind::String(value) => assert_eq!(value, "hello"),
            _ => panic!("unexpected kind"),
        }
    }

    #[test]
    fn conversions_cover_common_scalars() {
        assert_eq!(FirestoreValue::from(18).as_integer(), Some(18));
        assert_eq!(FirestoreValue::from(2.5).as_f64(), Some(2.5));
        assert_eq!(FirestoreValue::from("John").as_str(), Some("John"));
        assert!(FirestoreValue::from(None::<i64>).is_null());
        let list = FirestoreValue::from(vec!["a", "b"]);
        assert_eq!(list.as_array().map(|array| array.values().len()), Some(2));
    }

    #[test]
    fn detects_nested_sentinels() {
        let nested = FirestoreValue::from_map(BTreeMap::from([(
            "stats".to_string(),
            FirestoreValue::numeric_increment(1),
        )]));
        assert!(nested.contains_sentinel());
        assert!(!nested.is_sentinel());
        assert!(!FirestoreValue::from(vec![1, 2]).contains_sentinel());
    }
}
