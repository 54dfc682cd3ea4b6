use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::firestore::api::{
    AggregateDefinition, AggregateOperation, Bound, DocumentSnapshot, FieldFilter, FilterOperator,
    LimitType, OrderBy, OrderDirection, QueryDefinition,
};
use crate::firestore::model::{DocumentKey, FieldPath};
use crate::firestore::value::{ArrayValue, FirestoreValue, MapValue, ValueKind};

/// Applies the provided query definition to a set of candidate documents and returns
/// the filtered, ordered, and bounded result set.
///
/// Documents that lack a value for an ordered field are excluded, ties are
/// broken by document key, and comparisons across value types follow the
/// type order null < boolean < number < timestamp < string < array < map.
pub(crate) fn apply_query_to_documents(
    documents: Vec<DocumentSnapshot>,
    definition: &QueryDefinition,
) -> Vec<DocumentSnapshot> {
    let order_by = definition.order_by();
    let mut filtered: Vec<DocumentSnapshot> = documents
        .into_iter()
        .filter(|snapshot| snapshot.exists())
        .filter(|snapshot| definition.matches_collection(snapshot.document_key()))
        .filter(|snapshot| has_ordered_fields(snapshot, order_by))
        .filter(|snapshot| document_satisfies_filters(snapshot, definition.filters()))
        .collect();

    filtered.sort_by(|left, right| compare_snapshots(left, right, order_by));

    if let Some(bound) = definition.start_at() {
        filtered.retain(|snapshot| !is_before_start_bound(snapshot, bound, order_by));
    }

    if let Some(bound) = definition.end_at() {
        filtered.retain(|snapshot| !is_after_end_bound(snapshot, bound, order_by));
    }

    if let Some(limit) = definition.limit() {
        let limit = limit as usize;
        match definition.limit_type() {
            LimitType::First => {
                if filtered.len() > limit {
                    filtered.truncate(limit);
                }
            }
            LimitType::Last => {
                if filtered.len() > limit {
                    let start = filtered.len() - limit;
                    filtered.drain(0..start);
                }
            }
        }
    }

    filtered
}

/// Reduces the documents matched by a query, keyed by alias.
pub(crate) fn evaluate_aggregates(
    documents: &[DocumentSnapshot],
    aggregations: &[AggregateDefinition],
) -> BTreeMap<String, FirestoreValue> {
    aggregations
        .iter()
        .map(|aggregation| {
            let value = match aggregation.operation() {
                AggregateOperation::Count => FirestoreValue::from_integer(documents.len() as i64),
                AggregateOperation::Sum(field) => sum_field(documents, field),
                AggregateOperation::Average(field) => average_field(documents, field),
            };
            (aggregation.alias().to_string(), value)
        })
        .collect()
}

fn numeric_values<'a>(
    documents: &'a [DocumentSnapshot],
    field: &'a FieldPath,
) -> impl Iterator<Item = FirestoreValue> + 'a {
    documents
        .iter()
        .filter_map(move |snapshot| get_field_value(snapshot, field))
        .filter(|value| matches!(value.kind(), ValueKind::Integer(_) | ValueKind::Double(_)))
}

fn sum_field(documents: &[DocumentSnapshot], field: &FieldPath) -> FirestoreValue {
    let mut integer_sum: Option<i64> = Some(0);
    let mut double_sum = 0.0;
    for value in numeric_values(documents, field) {
        match value.kind() {
            ValueKind::Integer(i) => {
                integer_sum = integer_sum.and_then(|sum| sum.checked_add(*i));
                double_sum += *i as f64;
            }
            ValueKind::Double(d) => {
                integer_sum = None;
                double_sum += d;
            }
            _ => {}
        }
    }
    match integer_sum {
        Some(sum) => FirestoreValue::from_integer(sum),
        None => FirestoreValue::from_double(double_sum),
    }
}

fn average_field(documents: &[DocumentSnapshot], field: &FieldPath) -> FirestoreValue {
    let (count, total) = numeric_values(documents, field).fold((0usize, 0.0), |(count, total), value| {
        (count + 1, total + value.as_f64().unwrap_or_default())
    });
    if count == 0 {
        FirestoreValue::null()
    } else {
        FirestoreValue::from_double(total / count as f64)
    }
}

fn has_ordered_fields(snapshot: &DocumentSnapshot, order_by: &[OrderBy]) -> bool {
    order_by
        .iter()
        .all(|order| get_field_value(snapshot, order.field()).is_some())
}

fn document_satisfies_filters(snapshot: &DocumentSnapshot, filters: &[FieldFilter]) -> bool {
    filters
        .iter()
        .all(|filter| match get_field_value(snapshot, filter.field()) {
            Some(value) => evaluate_filter(filter, &value),
            None => false,
        })
}

fn evaluate_filter(filter: &FieldFilter, value: &FirestoreValue) -> bool {
    match filter.operator() {
        FilterOperator::Equal => values_equal(value, filter.value()),
        FilterOperator::NotEqual => {
            !value.is_null() && !values_equal(value, filter.value())
        }
        FilterOperator::LessThan => compare_same_type(value, filter.value()) == Some(Ordering::Less),
        FilterOperator::LessThanOrEqual => matches!(
            compare_same_type(value, filter.value()),
            Some(Ordering::Less | Ordering::Equal)
        ),
        FilterOperator::GreaterThan => {
            compare_same_type(value, filter.value()) == Some(Ordering::Greater)
        }
        FilterOperator::GreaterThanOrEqual => matches!(
            compare_same_type(value, filter.value()),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        FilterOperator::ArrayContains => match value.kind() {
            ValueKind::Array(array) => array_contains(array, filter.value()),
            _ => false,
        },
        FilterOperator::ArrayContainsAny => match (value.kind(), filter.value().kind()) {
            (ValueKind::Array(array), ValueKind::Array(needles)) => {
                array_contains_any(array, needles)
            }
            _ => false,
        },
        FilterOperator::In => match filter.value().kind() {
            ValueKind::Array(values) => values
                .values()
                .iter()
                .any(|needle| values_equal(needle, value)),
            _ => false,
        },
        FilterOperator::NotIn => match filter.value().kind() {
            ValueKind::Array(values) => {
                !value.is_null()
                    && values
                        .values()
                        .iter()
                        .all(|needle| !values_equal(needle, value))
            }
            _ => false,
        },
    }
}

fn get_field_value(snapshot: &DocumentSnapshot, field: &FieldPath) -> Option<FirestoreValue> {
    if field.is_document_id() {
        let key = snapshot.document_key();
        return Some(FirestoreValue::from_string(key.path().canonical_string()));
    }

    let map = snapshot.map_value()?;
    find_in_map(map, field.segments()).cloned()
}

fn find_in_map<'a>(map: &'a MapValue, segments: &'a [String]) -> Option<&'a FirestoreValue> {
    let (first, rest) = segments.split_first()?;
    let value = map.fields().get(first)?;
    if rest.is_empty() {
        Some(value)
    } else if let ValueKind::Map(child) = value.kind() {
        find_in_map(child, rest)
    } else {
        None
    }
}

fn compare_snapshots(left: &DocumentSnapshot, right: &DocumentSnapshot, order_by: &[OrderBy]) -> Ordering {
    for order in order_by {
        let left_value = get_field_value(left, order.field()).unwrap_or_else(FirestoreValue::null);
        let right_value =
            get_field_value(right, order.field()).unwrap_or_else(FirestoreValue::null);

        let ordering = directed(compare_values(&left_value, &right_value), order.direction());
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    let last_direction = order_by
        .last()
        .map(OrderBy::direction)
        .unwrap_or(OrderDirection::Ascending);
    directed(
        compare_keys(left.document_key(), right.document_key()),
        last_direction,
    )
}

fn directed(ordering: Ordering, direction: OrderDirection) -> Ordering {
    match direction {
        OrderDirection::Ascending => ordering,
        OrderDirection::Descending => ordering.reverse(),
    }
}

fn compare_keys(left: &DocumentKey, right: &DocumentKey) -> Ordering {
    left.cmp(right)
}

fn type_rank(value: &FirestoreValue) -> u8 {
    match value.kind() {
        ValueKind::Null => 0,
        ValueKind::Boolean(_) => 1,
        ValueKind::Integer(_) | ValueKind::Double(_) => 2,
        ValueKind::Timestamp(_) => 3,
        ValueKind::String(_) => 4,
        ValueKind::Array(_) => 5,
        ValueKind::Map(_) => 6,
        ValueKind::Sentinel(_) => 7,
    }
}

/// Total order over values, used for sorting and cursors.
pub(crate) fn compare_values(left: &FirestoreValue, right: &FirestoreValue) -> Ordering {
    match (left.kind(), right.kind()) {
        (ValueKind::Boolean(a), ValueKind::Boolean(b)) => a.cmp(b),
        (ValueKind::Integer(a), ValueKind::Integer(b)) => a.cmp(b),
        (ValueKind::Double(a), ValueKind::Double(b)) => a.total_cmp(b),
        (ValueKind::Integer(a), ValueKind::Double(b)) => (*a as f64).total_cmp(b),
        (ValueKind::Double(a), ValueKind::Integer(b)) => a.total_cmp(&(*b as f64)),
        (ValueKind::Timestamp(a), ValueKind::Timestamp(b)) => a.cmp(b),
        (ValueKind::String(a), ValueKind::String(b)) => a.cmp(b),
        (ValueKind::Array(a), ValueKind::Array(b)) => compare_arrays(a, b),
        (ValueKind::Map(a), ValueKind::Map(b)) => compare_maps(a, b),
        _ => type_rank(left).cmp(&type_rank(right)),
    }
}

fn compare_arrays(left: &ArrayValue, right: &ArrayValue) -> Ordering {
    for (l, r) in left.values().iter().zip(right.values()) {
        let ordering = compare_values(l, r);
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    left.values().len().cmp(&right.values().len())
}

fn compare_maps(left: &MapValue, right: &MapValue) -> Ordering {
    for ((lk, lv), (rk, rv)) in left.fields().iter().zip(right.fields()) {
        let ordering = lk.cmp(rk).then_with(|| compare_values(lv, rv));
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    left.fields().len().cmp(&right.fields().len())
}

/// Range filters only match values of the same type class.
fn compare_same_type(left: &FirestoreValue, right: &FirestoreValue) -> Option<Ordering> {
    if type_rank(left) != type_rank(right) {
        return None;
    }
    Some(compare_values(left, right))
}

fn values_equal(left: &FirestoreValue, right: &FirestoreValue) -> bool {
    type_rank(left) == type_rank(right) && compare_values(left, right) == Ordering::Equal
}

fn array_contains(array: &ArrayValue, needle: &FirestoreValue) -> bool {
    array
        .values()
        .iter()
        .any(|candidate| values_equal(candidate, needle))
}

fn array_contains_any(array: &ArrayValue, needles: &ArrayValue) -> bool {
    needles
        .values()
        .iter()
        .any(|needle| array_contains(array, needle))
}

fn is_before_start_bound(snapshot: &DocumentSnapshot, bound: &Bound, order_by: &[OrderBy]) -> bool {
    let ordering = compare_snapshot_to_bound(snapshot, bound, order_by);
    if bound.inclusive() {
        ordering == Ordering::Less
    } else {
        ordering != Ordering::Greater
    }
}

fn is_after_end_bound(snapshot: &DocumentSnapshot, bound: &Bound, order_by: &[OrderBy]) -> bool {
    let ordering = compare_snapshot_to_bound(snapshot, bound, order_by);
    if bound.inclusive() {
        ordering == Ordering::Greater
    } else {
        ordering != Ordering::Less
    }
}

fn compare_snapshot_to_bound(snapshot: &DocumentSnapshot, bound: &Bound, order_by: &[OrderBy]) -> Ordering {
    for (order, bound_value) in order_by.iter().zip(bound.values()) {
        let snapshot_value =
            get_field_value(snapshot, order.field()).unwrap_or_else(FirestoreValue::null);

        let ordering = directed(compare_values(&snapshot_value, bound_value), order.direction());
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firestore::api::{field, Firestore, FirestoreSettings, Query, SnapshotMetadata};
    use crate::firestore::remote::datastore::InMemoryDatastore;
    use std::sync::Arc;

    fn build_query() -> Query {
        let firestore = Firestore::new(
            FirestoreSettings::new("query-evaluator"),
            Arc::new(InMemoryDatastore::new()),
        )
        .unwrap();
        firestore.collection("cities").unwrap().query()
    }

    fn snapshot_for(id: &str, population: impl Into<FirestoreValue>) -> DocumentSnapshot {
        let key = DocumentKey::from_string(&format!("cities/{id}")).unwrap();
        let mut map = BTreeMap::new();
        map.insert("population".into(), population.into());
        let metadata = SnapshotMetadata::new(false, false);
        DocumentSnapshot::new(key, Some(MapValue::new(map)), metadata)
    }

    fn ids(documents: &[DocumentSnapshot]) -> Vec<&str> {
        documents.iter().map(DocumentSnapshot::id).collect()
    }

    #[test]
    fn applies_limit_and_ordering() {
        let definition = build_query()
            .order_by("population")
            .unwrap()
            .take(2)
            .unwrap()
            .definition()
            .unwrap();

        let docs = vec![
            snapshot_for("sf", 100),
            snapshot_for("nyc", 50),
            snapshot_for("la", 75),
        ];

        let result = apply_query_to_documents(docs, &definition);
        assert_eq!(ids(&result), ["nyc", "la"]);
    }

    #[test]
    fn ties_break_on_document_key() {
        let definition = build_query()
            .order_by("population")
            .unwrap()
            .definition()
            .unwrap();
        let docs = vec![
            snapshot_for("b", 10),
            snapshot_for("c", 5),
            snapshot_for("a", 10),
        ];
        let result = apply_query_to_documents(docs, &definition);
        assert_eq!(ids(&result), ["c", "a", "b"]);
    }

    #[test]
    fn range_filters_are_type_restricted() {
        let definition = build_query()
            .filter(field("population").gt(10))
            .unwrap()
            .definition()
            .unwrap();
        let docs = vec![
            snapshot_for("numeric", 20),
            snapshot_for("text", "many"),
            snapshot_for("double", 10.5),
        ];
        let result = apply_query_to_documents(docs, &definition);
        assert_eq!(ids(&result), ["double", "numeric"]);
    }

    #[test]
    fn limit_to_last_keeps_the_tail() {
        let definition = build_query()
            .order_by("population")
            .unwrap()
            .limit_to_last(2)
            .unwrap()
            .definition()
            .unwrap();
        let docs = vec![
            snapshot_for("sf", 100),
            snapshot_for("nyc", 50),
            snapshot_for("la", 75),
        ];
        let result = apply_query_to_documents(docs, &definition);
        assert_eq!(ids(&result), ["la", "sf"]);
    }

    #[test]
    fn aggregates_numeric_fields() {
        let docs = vec![
            snapshot_for("a", 1),
            snapshot_for("b", 2.5),
            snapshot_for("c", "n/a"),
        ];
        let path = FieldPath::from_dot_separated("population").unwrap();
        let result = evaluate_aggregates(
            &docs,
            &[
                AggregateDefinition::new("count", AggregateOperation::Count),
                AggregateDefinition::new("sum", AggregateOperation::Sum(path.clone())),
                AggregateDefinition::new("avg", AggregateOperation::Average(path.clone())),
            ],
        );
        assert_eq!(result["count"], FirestoreValue::from_integer(3));
        assert_eq!(result["sum"], FirestoreValue::from_double(3.5));
        assert_eq!(result["avg"], FirestoreValue::from_double(1.75));

        let empty = evaluate_aggregates(
            &[],
            &[
                AggregateDefinition::new("sum", AggregateOperation::Sum(path.clone())),
                AggregateDefinition::new("avg", AggregateOperation::Average(path)),
            ],
        );
        assert_eq!(empty["sum"], FirestoreValue::from_integer(0));
        assert!(empty["avg"].is_null());
    }
}
