use serde_json::{json, Value as JsonValue};

use crate::firestore::api::aggregate::{AggregateDefinition, AggregateOperation};
use crate::firestore::api::query::{Bound, FieldFilter, QueryDefinition};
use crate::firestore::remote::serializer::JsonProtoSerializer;

/// Encodes a validated query into its request shape.
///
/// `limit_to_last` queries are sent with flipped orderings and swapped
/// cursors; the caller reverses the returned page.
pub(crate) fn encode_structured_query(
    serializer: &JsonProtoSerializer,
    definition: &QueryDefinition,
) -> JsonValue {
    let mut structured = serde_json::Map::new();

    structured.insert(
        "parent".to_string(),
        json!(serializer.parent_name(&definition.parent_path())),
    );
    structured.insert(
        "from".to_string(),
        json!([{ "collectionId": definition.collection_id() }]),
    );

    if !definition.filters().is_empty() {
        structured.insert("where".to_string(), encode_filters(serializer, definition.filters()));
    }

    let order_by = definition.request_order_by();
    if !order_by.is_empty() {
        let orders: Vec<_> = order_by
            .iter()
            .map(|order| {
                json!({
                    "field": { "fieldPath": order.field().canonical_string() },
                    "direction": order.direction().as_str(),
                })
            })
            .collect();
        structured.insert("orderBy".to_string(), JsonValue::Array(orders));
    }

    if let Some(limit) = definition.limit() {
        structured.insert("limit".to_string(), json!(limit));
    }

    if let Some(start) = definition.request_start_at() {
        structured.insert("startAt".to_string(), encode_cursor(serializer, start, true));
    }

    if let Some(end) = definition.request_end_at() {
        structured.insert("endAt".to_string(), encode_cursor(serializer, end, false));
    }

    JsonValue::Object(structured)
}

pub(crate) fn encode_aggregation_body(
    serializer: &JsonProtoSerializer,
    definition: &QueryDefinition,
    aggregations: &[AggregateDefinition],
) -> JsonValue {
    let structured_query = encode_structured_query(serializer, definition);

    let aggregation_entries: Vec<_> = aggregations
        .iter()
        .map(|aggregate| {
            let mut entry = serde_json::Map::new();
            entry.insert("alias".to_string(), json!(aggregate.alias()));
            let body = match aggregate.operation() {
                AggregateOperation::Count => json!({}),
                AggregateOperation::Sum(field_path) | AggregateOperation::Average(field_path) => {
                    json!({ "field": { "fieldPath": field_path.canonical_string() } })
                }
            };
            entry.insert(aggregate.operation().as_str().to_string(), body);
            JsonValue::Object(entry)
        })
        .collect();

    json!({
        "structuredAggregationQuery": {
            "structuredQuery": structured_query,
            "aggregations": aggregation_entries
        }
    })
}

fn encode_filters(serializer: &JsonProtoSerializer, filters: &[FieldFilter]) -> JsonValue {
    if let [single] = filters {
        return encode_field_filter(serializer, single);
    }

    let nested: Vec<_> = filters
        .iter()
        .map(|filter| encode_field_filter(serializer, filter))
        .collect();

    json!({
        "compositeFilter": {
            "op": "AND",
            "filters": nested
        }
    })
}

fn encode_field_filter(serializer: &JsonProtoSerializer, filter: &FieldFilter) -> JsonValue {
    json!({
        "fieldFilter": {
            "field": { "fieldPath": filter.field().canonical_string() },
            "op": filter.operator().as_str(),
            "value": serializer.encode_value(filter.value())
        }
    })
}

// `before` marks a cursor that sits before the documents it names: an
// inclusive start or an exclusive end.
fn encode_cursor(serializer: &JsonProtoSerializer, bound: &Bound, start: bool) -> JsonValue {
    json!({
        "values": bound
            .values()
            .iter()
            .map(|value| serializer.encode_value(value))
            .collect::<Vec<_>>(),
        "before": if start { bound.inclusive() } else { !bound.inclusive() },
    })
}
