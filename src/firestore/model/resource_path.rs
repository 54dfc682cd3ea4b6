use std::cmp::Ordering;
use std::fmt::{Display, Formatter};

use crate::firestore::error::{invalid_argument, FirestoreResult};

/// `/`-separated path of alternating collection and document identifiers.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResourcePath {
    segments: Vec<String>,
}

impl ResourcePath {
    pub fn root() -> Self {
        Self { segments: Vec::new() }
    }

    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            segments: segments.into_iter().map(Into::into).collect(),
        }
    }

    pub fn from_string(path: &str) -> FirestoreResult<Self> {
        let trimmed = path.trim().trim_matches('/');
        if trimmed.is_empty() {
            return Ok(Self::root());
        }
        if trimmed.contains("//") {
            return Err(invalid_argument(format!(
                "Found empty segment in resource path '{path}'"
            )));
        }
        Ok(Self::from_segments(trimmed.split('/')))
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn child<I, S>(&self, segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut new_segments = self.segments.clone();
        new_segments.extend(segments.into_iter().map(Into::into));
        Self {
            segments: new_segments,
        }
    }

    pub fn without_last(&self) -> Self {
        let mut segments = self.segments.clone();
        segments.pop();
        Self { segments }
    }

    pub fn last_segment(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn canonical_string(&self) -> String {
        self.segments.join("/")
    }

    pub fn is_prefix_of(&self, other: &Self) -> bool {
        self.len() <= other.len()
            && self
                .segments
                .iter()
                .zip(other.segments.iter())
                .all(|(l, r)| l == r)
    }

    /// Segment-wise ordering used as the final tiebreak when sorting documents.
    pub fn comparator(left: &Self, right: &Self) -> Ordering {
        for (l, r) in left.segments.iter().zip(right.segments.iter()) {
            match l.cmp(r) {
                Ordering::Equal => continue,
                non_eq => return non_eq,
            }
        }
        left.len().cmp(&right.len())
    }
}

impl Display for ResourcePath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.canonical_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_render_path() {
        let path = ResourcePath::from_string("cities/sf/neighborhoods/downtown").unwrap();
        assert_eq!(path.len(), 4);
        assert_eq!(path.last_segment(), Some("downtown"));
        assert_eq!(path.canonical_string(), "cities/sf/neighborhoods/downtown");
    }

    #[test]
    fn leading_and_trailing_slashes_are_ignored() {
        let path = ResourcePath::from_string("/cities/sf/").unwrap();
        assert_eq!(path.canonical_string(), "cities/sf");
    }

    #[test]
    fn rejects_empty_segments() {
        let err = ResourcePath::from_string("cities//sf").unwrap_err();
        assert_eq!(err.code_str(), "firestore/invalid-argument");
    }

    #[test]
    fn prefix_and_ordering() {
        let collection = ResourcePath::from_string("cities").unwrap();
        let doc = ResourcePath::from_string("cities/sf").unwrap();
        assert!(collection.is_prefix_of(&doc));
        assert_eq!(ResourcePath::comparator(&collection, &doc), Ordering::Less);
    }
}
