use std::cmp::Ordering;
use std::fmt::{Display, Formatter};

use crate::firestore::error::{invalid_argument, FirestoreResult};
use crate::firestore::model::ResourcePath;

/// Path to a single document: an even, non-zero number of segments.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DocumentKey {
    path: ResourcePath,
}

impl DocumentKey {
    pub fn from_path(path: ResourcePath) -> FirestoreResult<Self> {
        if path.is_empty() || path.len() % 2 != 0 {
            return Err(invalid_argument(format!(
                "Document keys must point to a document (even number of segments), got '{}'",
                path.canonical_string()
            )));
        }
        Ok(Self { path })
    }

    pub fn from_string(path: &str) -> FirestoreResult<Self> {
        Self::from_path(ResourcePath::from_string(path)?)
    }

    pub fn collection_path(&self) -> ResourcePath {
        self.path.without_last()
    }

    pub fn path(&self) -> &ResourcePath {
        &self.path
    }

    pub fn id(&self) -> &str {
        self.path.last_segment().unwrap_or_default()
    }
}

impl Display for DocumentKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        self.path.fmt(f)
    }
}

impl PartialOrd for DocumentKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DocumentKey {
    fn cmp(&self, other: &Self) -> Ordering {
        ResourcePath::comparator(&self.path, &other.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_even_segments() {
        let err = DocumentKey::from_string("cities").unwrap_err();
        assert_eq!(err.code_str(), "firestore/invalid-argument");
    }

    #[test]
    fn parses_valid_path() {
        let key = DocumentKey::from_string("cities/sf").unwrap();
        assert_eq!(key.id(), "sf");
        assert_eq!(key.collection_path().canonical_string(), "cities");
    }

    #[test]
    fn orders_by_segments() {
        let a = DocumentKey::from_string("cities/a").unwrap();
        let b = DocumentKey::from_string("cities/b").unwrap();
        assert!(a < b);
    }
}
