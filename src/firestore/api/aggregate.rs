use std::collections::BTreeMap;

use crate::firestore::error::{invalid_argument, FirestoreResult};
use crate::firestore::model::{FieldPath, IntoFieldPath};
use crate::firestore::value::{FirestoreValue, ValueKind};

use super::query::Query;

/// Server-side reduction applied to the documents matched by a query.
#[derive(Clone, Debug, PartialEq)]
pub enum AggregateOperation {
    Count,
    Sum(FieldPath),
    Average(FieldPath),
}

impl AggregateOperation {
    /// Name of the operation in the wire format.
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateOperation::Count => "count",
            AggregateOperation::Sum(_) => "sum",
            AggregateOperation::Average(_) => "avg",
        }
    }

    pub fn field(&self) -> Option<&FieldPath> {
        match self {
            AggregateOperation::Count => None,
            AggregateOperation::Sum(field) | AggregateOperation::Average(field) => Some(field),
        }
    }
}

/// Describes a single aggregation to perform when executing
/// [`Query::aggregate`].
#[derive(Clone, Debug)]
pub struct AggregateField {
    operation: AggregateOperation,
}

impl AggregateField {
    /// Counts the number of documents returned by a query.
    pub fn count() -> Self {
        Self {
            operation: AggregateOperation::Count,
        }
    }

    /// Sums the numeric values stored at the provided field path.
    pub fn sum<P>(field: P) -> FirestoreResult<Self>
    where
        P: IntoFieldPath,
    {
        let field_path = field.into_field_path()?;
        Ok(Self {
            operation: AggregateOperation::Sum(field_path),
        })
    }

    /// Computes the average of the numeric values stored at the provided field path.
    pub fn average<P>(field: P) -> FirestoreResult<Self>
    where
        P: IntoFieldPath,
    {
        let field_path = field.into_field_path()?;
        Ok(Self {
            operation: AggregateOperation::Average(field_path),
        })
    }

    pub fn operation(&self) -> &AggregateOperation {
        &self.operation
    }
}

/// Collection of aggregate fields keyed by the alias used in the result set.
#[derive(Clone, Debug, Default)]
pub struct AggregateSpec {
    fields: BTreeMap<String, AggregateField>,
}

impl AggregateSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new aggregate keyed by `alias`.
    pub fn insert(
        &mut self,
        alias: impl Into<String>,
        field: AggregateField,
    ) -> FirestoreResult<()> {
        let alias = alias.into();
        if alias.trim().is_empty() {
            return Err(invalid_argument(
                "Aggregate aliases must contain at least one non-whitespace character",
            ));
        }
        self.fields.insert(alias, field);
        Ok(())
    }

    /// Registers a new aggregate keyed by `alias`, returning the updated spec for chaining.
    pub fn with_field(
        mut self,
        alias: impl Into<String>,
        field: AggregateField,
    ) -> FirestoreResult<Self> {
        self.insert(alias, field)?;
        Ok(self)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &AggregateField)> {
        self.fields.iter()
    }

    pub(crate) fn definitions(&self) -> Vec<AggregateDefinition> {
        self.fields
            .iter()
            .map(|(alias, field)| AggregateDefinition {
                alias: alias.clone(),
                operation: field.operation().clone(),
            })
            .collect()
    }
}

/// Snapshot of aggregate values returned by [`Query::aggregate`].
#[derive(Clone, Debug)]
pub struct AggregateQuerySnapshot {
    query: Query,
    spec: AggregateSpec,
    data: BTreeMap<String, FirestoreValue>,
}

impl AggregateQuerySnapshot {
    pub(crate) fn new(
        query: Query,
        spec: AggregateSpec,
        data: BTreeMap<String, FirestoreValue>,
    ) -> Self {
        Self { query, spec, data }
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn spec(&self) -> &AggregateSpec {
        &self.spec
    }

    pub fn data(&self) -> &BTreeMap<String, FirestoreValue> {
        &self.data
    }

    pub fn into_data(self) -> BTreeMap<String, FirestoreValue> {
        self.data
    }

    pub fn get(&self, alias: &str) -> Option<&FirestoreValue> {
        self.data.get(alias)
    }

    /// Returns the integer count recorded under `alias`, if present.
    pub fn count(&self, alias: &str) -> FirestoreResult<Option<i64>> {
        match self.data.get(alias) {
            Some(value) => match value.kind() {
                ValueKind::Integer(i) => Ok(Some(*i)),
                other => Err(invalid_argument(format!(
                    "Aggregate alias '{alias}' does not resolve to an integer count (found {other:?})"
                ))),
            },
            None => Ok(None),
        }
    }

    /// Returns the sum recorded under `alias`: an integer when every summed
    /// value was an integer, a double otherwise.
    pub fn sum(&self, alias: &str) -> FirestoreResult<Option<FirestoreValue>> {
        match self.data.get(alias) {
            Some(value) => match value.kind() {
                ValueKind::Integer(_) | ValueKind::Double(_) => Ok(Some(value.clone())),
                other => Err(invalid_argument(format!(
                    "Aggregate alias '{alias}' does not resolve to a numeric sum (found {other:?})"
                ))),
            },
            None => Ok(None),
        }
    }

    /// Returns the average recorded under `alias`. `None` when the alias is
    /// absent or no document carried a numeric value.
    pub fn average(&self, alias: &str) -> FirestoreResult<Option<f64>> {
        match self.data.get(alias) {
            Some(value) => match value.kind() {
                ValueKind::Null => Ok(None),
                ValueKind::Integer(i) => Ok(Some(*i as f64)),
                ValueKind::Double(d) => Ok(Some(*d)),
                other => Err(invalid_argument(format!(
                    "Aggregate alias '{alias}' does not resolve to a numeric average (found {other:?})"
                ))),
            },
            None => Ok(None),
        }
    }
}

/// One aliased aggregation as sent to the backend.
#[derive(Clone, Debug, PartialEq)]
pub struct AggregateDefinition {
    alias: String,
    operation: AggregateOperation,
}

impl AggregateDefinition {
    pub fn new(alias: impl Into<String>, operation: AggregateOperation) -> Self {
        Self {
            alias: alias.into(),
            operation,
        }
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn operation(&self) -> &AggregateOperation {
        &self.operation
    }
}

const COUNT_ALIAS: &str = "count";
const SUM_ALIAS: &str = "sum";
const AVERAGE_ALIAS: &str = "average";

impl Query {
    /// Runs the aggregations in `spec` over the documents this query matches.
    pub async fn aggregate(&self, spec: AggregateSpec) -> FirestoreResult<AggregateQuerySnapshot> {
        if spec.is_empty() {
            return Err(invalid_argument(
                "aggregate() requires at least one aggregate field",
            ));
        }
        let definition = self.definition()?;
        let aggregations = spec.definitions();
        let data = self
            .firestore()
            .datastore()
            .run_aggregate(&definition, &aggregations)
            .await?;
        Ok(AggregateQuerySnapshot::new(self.clone(), spec, data))
    }

    /// Number of documents matched by the query.
    pub async fn count(&self) -> FirestoreResult<i64> {
        let spec = AggregateSpec::new().with_field(COUNT_ALIAS, AggregateField::count())?;
        let snapshot = self.aggregate(spec).await?;
        Ok(snapshot.count(COUNT_ALIAS)?.unwrap_or(0))
    }

    /// Sum of the numeric values of `field`; `0` when nothing matches.
    pub async fn sum(&self, field: impl IntoFieldPath) -> FirestoreResult<FirestoreValue> {
        let spec = AggregateSpec::new().with_field(SUM_ALIAS, AggregateField::sum(field)?)?;
        let snapshot = self.aggregate(spec).await?;
        Ok(snapshot
            .sum(SUM_ALIAS)?
            .unwrap_or_else(|| FirestoreValue::from_integer(0)))
    }

    /// Average of the numeric values of `field`; `None` when no document
    /// carries a numeric value for it.
    pub async fn average(&self, field: impl IntoFieldPath) -> FirestoreResult<Option<f64>> {
        let spec =
            AggregateSpec::new().with_field(AVERAGE_ALIAS, AggregateField::average(field)?)?;
        let snapshot = self.aggregate(spec).await?;
        snapshot.average(AVERAGE_ALIAS)
    }
}
