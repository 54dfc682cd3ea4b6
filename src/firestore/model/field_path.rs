use std::fmt::{Display, Formatter};

use crate::firestore::error::{invalid_argument, FirestoreResult};

const DOCUMENT_ID_FIELD: &str = "__name__";

/// Dot-separated path to a (possibly nested) document field.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldPath {
    segments: Vec<String>,
}

impl FieldPath {
    pub fn new<S, I>(segments: I) -> FirestoreResult<Self>
    where
        S: Into<String>,
        I: IntoIterator<Item = S>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        if segments.is_empty() {
            return Err(invalid_argument("FieldPath must contain at least one segment"));
        }
        if segments.iter().any(|segment| segment.is_empty()) {
            return Err(invalid_argument(format!(
                "FieldPath '{}' contains an empty segment",
                segments.join(".")
            )));
        }
        Ok(Self { segments })
    }

    pub fn from_dot_separated(path: &str) -> FirestoreResult<Self> {
        if path.trim().is_empty() {
            return Err(invalid_argument("FieldPath string cannot be empty"));
        }
        FieldPath::new(path.split('.'))
    }

    /// Special path that addresses the document key instead of a field.
    pub fn document_id() -> Self {
        Self {
            segments: vec![DOCUMENT_ID_FIELD.to_string()],
        }
    }

    pub fn is_document_id(&self) -> bool {
        self.segments.len() == 1 && self.segments[0] == DOCUMENT_ID_FIELD
    }

    pub fn child(&self, segment: impl Into<String>) -> FirestoreResult<Self> {
        let mut segments = self.segments.clone();
        segments.push(segment.into());
        Self::new(segments)
    }

    pub fn last_segment(&self) -> &str {
        self.segments
            .last()
            .map(String::as_str)
            .unwrap_or_default()
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn canonical_string(&self) -> String {
        self.segments.join(".")
    }
}

impl Display for FieldPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.canonical_string())
    }
}

/// Trait that converts common user inputs into a validated [`FieldPath`].
pub trait IntoFieldPath {
    fn into_field_path(self) -> FirestoreResult<FieldPath>;
}

impl IntoFieldPath for FieldPath {
    fn into_field_path(self) -> FirestoreResult<FieldPath> {
        Ok(self)
    }
}

impl IntoFieldPath for &FieldPath {
    fn into_field_path(self) -> FirestoreResult<FieldPath> {
        Ok(self.clone())
    }
}

impl IntoFieldPath for String {
    fn into_field_path(self) -> FirestoreResult<FieldPath> {
        FieldPath::from_dot_separated(&self)
    }
}

impl IntoFieldPath for &str {
    fn into_field_path(self) -> FirestoreResult<FieldPath> {
        FieldPath::from_dot_separated(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_dot_path() {
        let field = FieldPath::from_dot_separated("address.city").unwrap();
        assert_eq!(field.segments(), &["address", "city"]);
        assert_eq!(field.last_segment(), "city");
    }

    #[test]
    fn rejects_empty() {
        let err = FieldPath::from_dot_separated("  ").unwrap_err();
        assert_eq!(err.code_str(), "firestore/invalid-argument");
    }

    #[test]
    fn rejects_empty_segment() {
        assert!(FieldPath::from_dot_separated("address..city").is_err());
    }

    #[test]
    fn document_id_is_recognised() {
        assert!(FieldPath::document_id().is_document_id());
        assert!(!FieldPath::from_dot_separated("name").unwrap().is_document_id());
    }
}
