use std::collections::BTreeMap;

use crate::firestore::value::FirestoreValue;

#[derive(Clone, Debug, PartialEq, Default)]
pub struct MapValue {
    fields: BTreeMap<String, FirestoreValue>,
}

impl MapValue {
    pub fn new(fields: BTreeMap<String, FirestoreValue>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &BTreeMap<String, FirestoreValue> {
        &self.fields
    }

    pub fn get(&self, key: &str) -> Option<&FirestoreValue> {
        self.fields.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn into_fields(self) -> BTreeMap<String, FirestoreValue> {
        self.fields
    }
}

impl From<BTreeMap<String, FirestoreValue>> for MapValue {
    fn from(fields: BTreeMap<String, FirestoreValue>) -> Self {
        Self::new(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stores_map_entries() {
        let mut map = BTreeMap::new();
        map.insert("foo".to_string(), FirestoreValue::from_integer(1));
        let value = MapValue::new(map.clone());
        assert_eq!(value.get("foo"), map.get("foo"));
        assert!(!value.is_empty());
    }
}
