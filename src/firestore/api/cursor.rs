//! Pagination cursors.
//!
//! A cursor is recorded on the query as written (raw values or a document
//! snapshot) and only encoded against the query's orderings when the query
//! is executed, so the order of `order_by`/`start_at` calls does not matter.

use crate::firestore::error::{failed_precondition, invalid_argument, FirestoreResult};
use crate::firestore::value::FirestoreValue;

use super::query::{Bound, OrderBy};
use super::snapshot::DocumentSnapshot;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CursorKind {
    StartAt,
    StartAfter,
    EndAt,
    EndBefore,
}

impl CursorKind {
    pub fn method_name(&self) -> &'static str {
        match self {
            CursorKind::StartAt => "start_at",
            CursorKind::StartAfter => "start_after",
            CursorKind::EndAt => "end_at",
            CursorKind::EndBefore => "end_before",
        }
    }

    pub fn is_start(&self) -> bool {
        matches!(self, CursorKind::StartAt | CursorKind::StartAfter)
    }

    /// Whether documents equal to the cursor position are part of the result.
    pub fn inclusive(&self) -> bool {
        matches!(self, CursorKind::StartAt | CursorKind::EndAt)
    }
}

#[derive(Clone, Debug, PartialEq)]
enum CursorSource {
    Values(Vec<FirestoreValue>),
    Snapshot(DocumentSnapshot),
}

/// A cursor as supplied by the caller, not yet bound to any ordering.
#[derive(Clone, Debug, PartialEq)]
pub struct CursorBound {
    kind: CursorKind,
    source: CursorSource,
}

impl CursorBound {
    pub fn from_values<I, V>(kind: CursorKind, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<FirestoreValue>,
    {
        Self {
            kind,
            source: CursorSource::Values(values.into_iter().map(Into::into).collect()),
        }
    }

    pub fn from_snapshot(kind: CursorKind, snapshot: &DocumentSnapshot) -> Self {
        Self {
            kind,
            source: CursorSource::Snapshot(snapshot.clone()),
        }
    }

    pub fn kind(&self) -> CursorKind {
        self.kind
    }

    /// Encodes the cursor into one value per ordering.
    pub fn encode(&self, order_by: &[OrderBy]) -> FirestoreResult<Bound> {
        let method = self.kind.method_name();
        if order_by.is_empty() {
            return Err(failed_precondition(format!(
                "{method}() requires the query to have at least one order_by() clause"
            )));
        }

        let values = match &self.source {
            CursorSource::Values(values) => {
                if values.len() != order_by.len() {
                    return Err(invalid_argument(format!(
                        "Too {} arguments provided to {method}(): expected {} value(s) matching \
                         the order_by() clauses, got {}",
                        if values.len() > order_by.len() { "many" } else { "few" },
                        order_by.len(),
                        values.len()
                    )));
                }
                if values.iter().any(FirestoreValue::contains_sentinel) {
                    return Err(invalid_argument(format!(
                        "{method}() values cannot contain write sentinels"
                    )));
                }
                values.clone()
            }
            CursorSource::Snapshot(snapshot) => snapshot_values(method, snapshot, order_by)?,
        };

        Ok(Bound::new(values, self.kind.inclusive()))
    }
}

fn snapshot_values(
    method: &str,
    snapshot: &DocumentSnapshot,
    order_by: &[OrderBy],
) -> FirestoreResult<Vec<FirestoreValue>> {
    if !snapshot.exists() {
        return Err(invalid_argument(format!(
            "Cannot use {method}() with document '{}' because it does not exist",
            snapshot.document_key()
        )));
    }
    order_by
        .iter()
        .map(|order| {
            snapshot.get(order.field())?.ok_or_else(|| {
                invalid_argument(format!(
                    "Invalid {method}() snapshot: document '{}' has no value for order_by field '{}'",
                    snapshot.document_key(),
                    order.field()
                ))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firestore::api::query::OrderDirection;
    use crate::firestore::api::SnapshotMetadata;
    use crate::firestore::model::{DocumentKey, FieldPath};
    use crate::firestore::value::MapValue;
    use std::collections::BTreeMap;

    fn order(field: &str) -> OrderBy {
        OrderBy::new(
            FieldPath::from_dot_separated(field).unwrap(),
            OrderDirection::Ascending,
        )
    }

    fn product() -> DocumentSnapshot {
        let key = DocumentKey::from_string("products/p1").unwrap();
        let data = MapValue::new(BTreeMap::from([(
            "price".to_string(),
            FirestoreValue::from(20),
        )]));
        DocumentSnapshot::new(key, Some(data), SnapshotMetadata::default())
    }

    #[test]
    fn requires_ordering() {
        let cursor = CursorBound::from_values(CursorKind::StartAt, [1]);
        let err = cursor.encode(&[]).unwrap_err();
        assert_eq!(err.code_str(), "firestore/failed-precondition");
        assert!(err.message().contains("start_at()"));
    }

    #[test]
    fn value_count_must_match_orderings() {
        let cursor = CursorBound::from_values(CursorKind::EndBefore, [1, 2]);
        let err = cursor.encode(&[order("price")]).unwrap_err();
        assert_eq!(err.code_str(), "firestore/invalid-argument");
        assert!(err.message().contains("Too many"));
    }

    #[test]
    fn inclusivity_follows_kind() {
        let orders = [order("price")];
        assert!(CursorBound::from_values(CursorKind::StartAt, [1])
            .encode(&orders)
            .unwrap()
            .inclusive());
        assert!(!CursorBound::from_values(CursorKind::StartAfter, [1])
            .encode(&orders)
            .unwrap()
            .inclusive());
        assert!(CursorBound::from_values(CursorKind::EndAt, [1])
            .encode(&orders)
            .unwrap()
            .inclusive());
    }

    #[test]
    fn snapshot_cursor_reads_ordered_fields() {
        let bound = CursorBound::from_snapshot(CursorKind::StartAfter, &product())
            .encode(&[order("price"), order("__name__")])
            .unwrap();
        assert_eq!(
            bound.values(),
            [FirestoreValue::from(20), FirestoreValue::from("products/p1")]
        );

        let err = CursorBound::from_snapshot(CursorKind::StartAfter, &product())
            .encode(&[order("rating")])
            .unwrap_err();
        assert_eq!(err.code_str(), "firestore/invalid-argument");
    }

    #[test]
    fn missing_snapshot_is_rejected() {
        let missing = DocumentSnapshot::missing(DocumentKey::from_string("products/x").unwrap());
        let err = CursorBound::from_snapshot(CursorKind::StartAt, &missing)
            .encode(&[order("price")])
            .unwrap_err();
        assert_eq!(err.code_str(), "firestore/invalid-argument");
    }

    #[test]
    fn sentinels_are_rejected() {
        let err = CursorBound::from_values(CursorKind::StartAt, [FirestoreValue::server_timestamp()])
            .encode(&[order("price")])
            .unwrap_err();
        assert_eq!(err.code_str(), "firestore/invalid-argument");
    }
}
