use std::collections::BTreeMap;

use serde_json::{json, Value as JsonValue};

use crate::firestore::api::aggregate::AggregateDefinition;
use crate::firestore::api::query::QueryDefinition;
use crate::firestore::api::{DocumentSnapshot, SnapshotMetadata};
use crate::firestore::error::{invalid_argument, FirestoreResult};
use crate::firestore::model::{DatabaseId, DocumentKey, ResourcePath};
use crate::firestore::remote::datastore::{
    TransactionId, TransactionReads, TransactionResult, WriteOperation,
};
use crate::firestore::remote::structured_query::{encode_aggregation_body, encode_structured_query};
use crate::firestore::value::json::decode_object;
use crate::firestore::value::{FirestoreValue, MapValue};

/// Encodes requests to and decodes responses from a JSON transport.
///
/// Field values use the plain JSON form of [`FirestoreValue::to_json`];
/// documents are addressed by their fully qualified resource name.
#[derive(Clone, Debug)]
pub struct JsonProtoSerializer {
    database_id: DatabaseId,
}

impl JsonProtoSerializer {
    pub fn new(database_id: DatabaseId) -> Self {
        Self { database_id }
    }

    pub fn database_id(&self) -> &DatabaseId {
        &self.database_id
    }

    pub fn database_name(&self) -> String {
        format!(
            "projects/{}/databases/{}",
            self.database_id.project_id(),
            self.database_id.database()
        )
    }

    pub fn document_name(&self, key: &DocumentKey) -> String {
        format!(
            "{}/documents/{}",
            self.database_name(),
            key.path().canonical_string()
        )
    }

    /// Resource name of the document owning a collection, or of the
    /// database root for top-level collections.
    pub fn parent_name(&self, parent: &ResourcePath) -> String {
        if parent.is_empty() {
            format!("{}/documents", self.database_name())
        } else {
            format!(
                "{}/documents/{}",
                self.database_name(),
                parent.canonical_string()
            )
        }
    }

    pub fn decode_document_name(&self, name: &str) -> FirestoreResult<DocumentKey> {
        let prefix = format!("{}/documents/", self.database_name());
        let path = name.strip_prefix(&prefix).ok_or_else(|| {
            invalid_argument(format!(
                "Document name '{name}' does not belong to database {}",
                self.database_name()
            ))
        })?;
        DocumentKey::from_string(path)
    }

    pub fn encode_value(&self, value: &FirestoreValue) -> JsonValue {
        value.to_json()
    }

    pub fn encode_write(&self, write: &WriteOperation) -> JsonValue {
        let kind = write.kind().as_str();
        let path = self.document_name(write.key());
        match write {
            WriteOperation::Set { data, mask, .. } => {
                let mut encoded = json!({
                    "kind": kind,
                    "path": path,
                    "data": FirestoreValue::from(data.clone()).to_json(),
                    "merge": write.merge(),
                });
                if let Some(mask) = mask {
                    encoded["mergeFields"] = JsonValue::Array(
                        mask.iter()
                            .map(|field| JsonValue::String(field.canonical_string()))
                            .collect(),
                    );
                }
                encoded
            }
            WriteOperation::Update { fields, .. } => {
                let encoded_fields: serde_json::Map<String, JsonValue> = fields
                    .iter()
                    .map(|(field, value)| (field.canonical_string(), value.to_json()))
                    .collect();
                json!({
                    "kind": kind,
                    "path": path,
                    "fields": encoded_fields,
                })
            }
            WriteOperation::Delete { .. } => json!({
                "kind": kind,
                "path": path,
            }),
        }
    }

    pub fn encode_commit_body(&self, writes: &[WriteOperation]) -> JsonValue {
        json!({
            "writes": writes.iter().map(|write| self.encode_write(write)).collect::<Vec<_>>()
        })
    }

    pub fn encode_begin_transaction_body(&self, keys: &[DocumentKey]) -> JsonValue {
        json!({
            "documents": keys.iter().map(|key| self.document_name(key)).collect::<Vec<_>>()
        })
    }

    pub fn encode_transaction_commit_body(
        &self,
        transaction: &TransactionId,
        writes: &[WriteOperation],
    ) -> JsonValue {
        let mut body = self.encode_commit_body(writes);
        body["transaction"] = json!(transaction.as_str());
        body
    }

    pub fn encode_query_body(&self, definition: &QueryDefinition) -> JsonValue {
        json!({ "structuredQuery": encode_structured_query(self, definition) })
    }

    pub fn encode_aggregation_body(
        &self,
        definition: &QueryDefinition,
        aggregations: &[AggregateDefinition],
    ) -> JsonValue {
        encode_aggregation_body(self, definition, aggregations)
    }

    /// Decodes `{"name": .., "fields": {..}}`. A document without a `fields`
    /// entry is reported as missing.
    pub fn decode_document(&self, value: &JsonValue) -> FirestoreResult<DocumentSnapshot> {
        let name = value
            .get("name")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| invalid_argument("Document is missing its 'name'"))?;
        let key = self.decode_document_name(name)?;
        match value.get("fields") {
            Some(fields) => Ok(DocumentSnapshot::new(
                key,
                Some(self.decode_fields(fields)?),
                SnapshotMetadata::default(),
            )),
            None => Ok(DocumentSnapshot::missing(key)),
        }
    }

    pub fn decode_fields(&self, value: &JsonValue) -> FirestoreResult<MapValue> {
        let object = value
            .as_object()
            .ok_or_else(|| invalid_argument("Expected 'fields' to be an object"))?;
        Ok(MapValue::new(decode_object(object.clone())?))
    }

    pub fn decode_transaction_reads(&self, value: &JsonValue) -> FirestoreResult<TransactionReads> {
        let id = value
            .get("transaction")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| invalid_argument("Transaction response is missing its id"))?;
        let documents = value
            .get("documents")
            .and_then(JsonValue::as_array)
            .map(|documents| {
                documents
                    .iter()
                    .map(|document| self.decode_transaction_result(document))
                    .collect::<FirestoreResult<Vec<_>>>()
            })
            .transpose()?
            .unwrap_or_default();
        Ok(TransactionReads {
            id: TransactionId::new(id),
            documents,
        })
    }

    fn decode_transaction_result(&self, value: &JsonValue) -> FirestoreResult<TransactionResult> {
        let snapshot = self.decode_document(value)?;
        let version = value.get("version").and_then(JsonValue::as_u64).unwrap_or(0);
        Ok(TransactionResult::new(
            snapshot.document_key().clone(),
            snapshot.map_value().cloned(),
            version,
        ))
    }

    pub fn decode_aggregation_result(
        &self,
        value: &JsonValue,
    ) -> FirestoreResult<BTreeMap<String, FirestoreValue>> {
        let fields = value
            .get("aggregateFields")
            .and_then(JsonValue::as_object)
            .ok_or_else(|| invalid_argument("Aggregation response is missing 'aggregateFields'"))?;
        decode_object(fields.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firestore::model::FieldPath;

    fn serializer() -> JsonProtoSerializer {
        JsonProtoSerializer::new(DatabaseId::default("project"))
    }

    fn key(path: &str) -> DocumentKey {
        DocumentKey::from_string(path).unwrap()
    }

    #[test]
    fn encodes_writes_with_sentinels() {
        let serializer = serializer();
        let set = WriteOperation::Set {
            key: key("items/a"),
            data: MapValue::new(BTreeMap::from([
                ("x".to_string(), FirestoreValue::from(1)),
                ("at".to_string(), FirestoreValue::server_timestamp()),
            ])),
            mask: Some(vec![FieldPath::from_dot_separated("at").unwrap()]),
        };
        let encoded = serializer.encode_write(&set);
        assert_eq!(encoded["kind"], "set");
        assert_eq!(encoded["path"], "projects/project/databases/(default)/documents/items/a");
        assert_eq!(encoded["data"]["x"], 1);
        assert_eq!(encoded["data"]["at"], json!({ "__fieldValue__": "serverTimestamp" }));
        assert_eq!(encoded["merge"], true);
        assert_eq!(encoded["mergeFields"], json!(["at"]));

        let update = WriteOperation::Update {
            key: key("items/a"),
            fields: vec![(
                FieldPath::from_dot_separated("stats.count").unwrap(),
                FirestoreValue::numeric_increment(5),
            )],
        };
        let encoded = serializer.encode_write(&update);
        assert_eq!(
            encoded["fields"]["stats.count"],
            json!({ "__fieldValue__": "increment", "value": 5 })
        );
    }

    #[test]
    fn decodes_documents_and_transaction_reads() {
        let serializer = serializer();
        let response = json!({
            "transaction": "tx-7",
            "documents": [
                {
                    "name": "projects/project/databases/(default)/documents/items/a",
                    "fields": { "x": 3 },
                    "version": 12
                },
                { "name": "projects/project/databases/(default)/documents/items/b" }
            ]
        });
        let reads = serializer.decode_transaction_reads(&response).unwrap();
        assert_eq!(reads.id.as_str(), "tx-7");
        assert_eq!(reads.documents[0].version(), 12);
        assert!(reads.documents[0].exists());
        assert!(!reads.documents[1].exists());
    }

    #[test]
    fn rejects_foreign_document_names() {
        let err = serializer()
            .decode_document_name("projects/other/databases/(default)/documents/items/a")
            .unwrap_err();
        assert_eq!(err.code_str(), "firestore/invalid-argument");
    }

    #[test]
    fn refuses_to_decode_sentinel_markers() {
        let err = serializer()
            .decode_fields(&json!({ "at": { "__fieldValue__": "serverTimestamp" } }))
            .unwrap_err();
        assert_eq!(err.code_str(), "firestore/invalid-argument");
    }
}
