use crate::firestore::value::FirestoreValue;

#[derive(Clone, Debug, PartialEq, Default)]
pub struct ArrayValue {
    values: Vec<FirestoreValue>,
}

impl ArrayValue {
    pub fn new(values: Vec<FirestoreValue>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[FirestoreValue] {
        &self.values
    }

    pub fn contains(&self, needle: &FirestoreValue) -> bool {
        self.values.iter().any(|candidate| candidate == needle)
    }

    pub fn into_values(self) -> Vec<FirestoreValue> {
        self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn membership_uses_value_equality() {
        let array = ArrayValue::new(vec![FirestoreValue::from_integer(1), FirestoreValue::from_string("a")]);
        assert!(array.contains(&FirestoreValue::from_string("a")));
        assert!(!array.contains(&FirestoreValue::from_integer(2)));
    }
}
