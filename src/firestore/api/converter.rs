use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::firestore::error::{invalid_argument, FirestoreResult};
use crate::firestore::value::json::decode_object;
use crate::firestore::value::{FirestoreValue, MapValue};

/// Trait describing how to convert between user models and Firestore maps.
///
/// Writes use `to_map`, reads use `from_map`, and callers choose the `Model`
/// type they want to surface.
pub trait FirestoreDataConverter: Send + Sync + Clone + 'static {
    /// The strongly typed model associated with this converter.
    type Model: Clone;

    /// Encodes the user model into a Firestore map for writes.
    fn to_map(&self, value: &Self::Model) -> FirestoreResult<BTreeMap<String, FirestoreValue>>;

    /// Decodes a Firestore map into the user model for reads.
    fn from_map(&self, value: &MapValue) -> FirestoreResult<Self::Model>;
}

/// Default converter that leaves Firestore maps unchanged (raw JSON-style data).
#[derive(Clone, Debug, Default)]
pub struct PassthroughConverter;

impl FirestoreDataConverter for PassthroughConverter {
    type Model = BTreeMap<String, FirestoreValue>;

    fn to_map(&self, value: &Self::Model) -> FirestoreResult<BTreeMap<String, FirestoreValue>> {
        Ok(value.clone())
    }

    fn from_map(&self, value: &MapValue) -> FirestoreResult<Self::Model> {
        Ok(value.fields().clone())
    }
}

/// A document type bound to the collection it is stored in.
///
/// ```
/// use firestore_query_core::firestore::api::FirestoreRecord;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Clone, Serialize, Deserialize)]
/// struct Product {
///     name: String,
///     price: i64,
/// }
///
/// impl FirestoreRecord for Product {
///     const COLLECTION: &'static str = "products";
/// }
/// ```
pub trait FirestoreRecord: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Collection path (relative to the database root) holding the records.
    const COLLECTION: &'static str;
}

/// Converter backed by `serde`: models round-trip through plain JSON.
pub struct SerdeConverter<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> SerdeConverter<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for SerdeConverter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for SerdeConverter<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> Debug for SerdeConverter<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("SerdeConverter")
    }
}

impl<T> FirestoreDataConverter for SerdeConverter<T>
where
    T: Serialize + DeserializeOwned + Clone + 'static,
{
    type Model = T;

    fn to_map(&self, value: &Self::Model) -> FirestoreResult<BTreeMap<String, FirestoreValue>> {
        let json = serde_json::to_value(value)
            .map_err(|err| invalid_argument(format!("Failed to serialize document: {err}")))?;
        match json {
            JsonValue::Object(object) => decode_object(object),
            other => Err(invalid_argument(format!(
                "Documents must serialize to a JSON object, got {other}"
            ))),
        }
    }

    fn from_map(&self, value: &MapValue) -> FirestoreResult<Self::Model> {
        let json = FirestoreValue::from_map(value.fields().clone()).to_json();
        serde_json::from_value(json)
            .map_err(|err| invalid_argument(format!("Failed to deserialize document: {err}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Product {
        name: String,
        price: i64,
        tags: Vec<String>,
    }

    #[test]
    fn serde_converter_round_trips_models() {
        let converter = SerdeConverter::<Product>::new();
        let product = Product {
            name: "lamp".into(),
            price: 30,
            tags: vec!["home".into()],
        };
        let map = converter.to_map(&product).unwrap();
        assert_eq!(map.get("price"), Some(&FirestoreValue::from(30)));
        let decoded = converter.from_map(&MapValue::new(map)).unwrap();
        assert_eq!(decoded, product);
    }

    #[test]
    fn non_object_models_are_rejected() {
        let converter = SerdeConverter::<i64>::new();
        let err = converter.to_map(&5).unwrap_err();
        assert_eq!(err.code_str(), "firestore/invalid-argument");
    }

    #[test]
    fn mismatched_documents_fail_to_decode() {
        let converter = SerdeConverter::<Product>::new();
        let map = MapValue::new(BTreeMap::from([(
            "name".to_string(),
            FirestoreValue::from(1),
        )]));
        assert!(converter.from_map(&map).is_err());
    }
}
