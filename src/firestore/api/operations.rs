use std::collections::{BTreeMap, HashSet};

use crate::firestore::error::{invalid_argument, FirestoreResult};
use crate::firestore::model::{DocumentKey, FieldPath};
use crate::firestore::remote::datastore::WriteOperation;
use crate::firestore::value::{FirestoreValue, MapValue, SentinelValue, ValueKind};

/// Options that configure the behaviour of `set` writes.
///
/// `merge` merges every field present in the data; `merge_fields` restricts
/// the merge to an explicit field mask and takes precedence over `merge`.
#[derive(Clone, Debug, Default)]
pub struct SetOptions {
    pub merge: bool,
    pub merge_fields: Option<Vec<FieldPath>>,
}

impl SetOptions {
    /// Builds set options that merge every field present in the provided data.
    pub fn merge_all() -> Self {
        Self {
            merge: true,
            merge_fields: None,
        }
    }

    /// Builds set options that merge only the specified field paths.
    pub fn merge_fields<I>(fields: I) -> FirestoreResult<Self>
    where
        I: IntoIterator<Item = FieldPath>,
    {
        let mut unique = Vec::new();
        let mut seen = HashSet::new();
        for field in fields {
            if seen.insert(field.canonical_string()) {
                unique.push(field);
            }
        }
        if unique.is_empty() {
            return Err(invalid_argument(
                "merge_fields requires at least one field path",
            ));
        }
        Ok(Self {
            merge: false,
            merge_fields: Some(unique),
        })
    }

    /// Indicates whether the write should behave like a merge.
    pub fn is_merge(&self) -> bool {
        self.merge || self.merge_fields.is_some()
    }

    /// Returns the explicit field mask, if any.
    pub fn field_mask(&self) -> Option<&[FieldPath]> {
        self.merge_fields.as_deref()
    }
}

/// Validated data for `set` style writes.
#[derive(Clone, Debug)]
pub struct EncodedSetData {
    pub map: MapValue,
    pub mask: Option<Vec<FieldPath>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum WriteContext {
    Set,
    MergeSet,
    Update,
}

pub fn encode_set_data(
    data: BTreeMap<String, FirestoreValue>,
    options: &SetOptions,
) -> FirestoreResult<EncodedSetData> {
    let context = if options.is_merge() {
        WriteContext::MergeSet
    } else {
        WriteContext::Set
    };
    for (key, value) in &data {
        let path = FieldPath::new([key.as_str()])?;
        validate_field(value, &path, context, true)?;
    }

    let map = MapValue::new(data);
    let mask = if let Some(mask) = options.field_mask() {
        for field in mask {
            if value_for_field_path(&map, field).is_none() {
                return Err(invalid_argument(format!(
                    "Field '{}' is specified in merge_fields but missing from the provided data",
                    field.canonical_string()
                )));
            }
        }
        Some(mask.to_vec())
    } else if options.merge {
        let paths = collect_leaf_paths(map.fields())?;
        if paths.is_empty() {
            return Err(invalid_argument(
                "merge set requires the data to contain at least one field",
            ));
        }
        Some(paths)
    } else {
        None
    };

    Ok(EncodedSetData { map, mask })
}

/// Parses `update` data whose keys are dot-separated field paths.
pub fn encode_update_data(
    data: BTreeMap<String, FirestoreValue>,
) -> FirestoreResult<Vec<(FieldPath, FirestoreValue)>> {
    if data.is_empty() {
        return Err(invalid_argument(
            "update requires at least one field/value pair",
        ));
    }
    let mut fields = Vec::with_capacity(data.len());
    for (key, value) in data {
        let path = FieldPath::from_dot_separated(&key)?;
        validate_field(&value, &path, WriteContext::Update, true)?;
        fields.push((path, value));
    }
    Ok(fields)
}

pub(crate) fn set_operation(
    key: DocumentKey,
    data: BTreeMap<String, FirestoreValue>,
    options: &SetOptions,
) -> FirestoreResult<WriteOperation> {
    let encoded = encode_set_data(data, options)?;
    Ok(WriteOperation::Set {
        key,
        data: encoded.map,
        mask: encoded.mask,
    })
}

pub(crate) fn update_operation(
    key: DocumentKey,
    data: BTreeMap<String, FirestoreValue>,
) -> FirestoreResult<WriteOperation> {
    let fields = encode_update_data(data)?;
    Ok(WriteOperation::Update { key, fields })
}

fn validate_field(
    value: &FirestoreValue,
    path: &FieldPath,
    context: WriteContext,
    top_level: bool,
) -> FirestoreResult<()> {
    match value.kind() {
        ValueKind::Sentinel(sentinel) => validate_sentinel_usage(sentinel, path, context, top_level),
        ValueKind::Map(map) => {
            for (key, child) in map.fields() {
                validate_field(child, &path.child(key.as_str())?, context, false)?;
            }
            Ok(())
        }
        ValueKind::Array(array) => {
            for element in array.values() {
                assert_no_sentinel_in_value(element, path)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn validate_sentinel_usage(
    sentinel: &SentinelValue,
    field_path: &FieldPath,
    context: WriteContext,
    top_level: bool,
) -> FirestoreResult<()> {
    match sentinel {
        SentinelValue::ServerTimestamp => Ok(()),
        SentinelValue::Delete => match context {
            WriteContext::MergeSet => Ok(()),
            WriteContext::Update if top_level => Ok(()),
            WriteContext::Update => Err(invalid_argument(format!(
                "FieldValue.delete() can only appear at the top level of update data (field '{}')",
                field_path.canonical_string()
            ))),
            WriteContext::Set => Err(invalid_argument(format!(
                "FieldValue.delete() cannot be used with set() unless merge is enabled (field '{}')",
                field_path.canonical_string()
            ))),
        },
        SentinelValue::ArrayUnion(elements) | SentinelValue::ArrayRemove(elements) => {
            for element in elements {
                assert_no_sentinel_in_value(element, field_path)?;
            }
            Ok(())
        }
        SentinelValue::NumericIncrement(operand) => match operand.as_ref().kind() {
            ValueKind::Integer(_) | ValueKind::Double(_) => Ok(()),
            _ => Err(invalid_argument(
                "FieldValue.increment() requires a numeric operand",
            )),
        },
    }
}

fn assert_no_sentinel_in_value(value: &FirestoreValue, context: &FieldPath) -> FirestoreResult<()> {
    if value.contains_sentinel() {
        return Err(invalid_argument(format!(
            "Invalid data. Sentinel values cannot be used inside arrays (field '{}').",
            context.canonical_string()
        )));
    }
    Ok(())
}

fn collect_leaf_paths(data: &BTreeMap<String, FirestoreValue>) -> FirestoreResult<Vec<FieldPath>> {
    let mut paths = Vec::new();
    for (key, value) in data {
        collect_paths_from_value(&mut paths, vec![key.clone()], value)?;
    }
    Ok(paths)
}

fn collect_paths_from_value(
    acc: &mut Vec<FieldPath>,
    segments: Vec<String>,
    value: &FirestoreValue,
) -> FirestoreResult<()> {
    match value.kind() {
        ValueKind::Map(map) if !map.fields().is_empty() => {
            for (child_key, child_value) in map.fields() {
                let mut child_segments = segments.clone();
                child_segments.push(child_key.clone());
                collect_paths_from_value(acc, child_segments, child_value)?;
            }
            Ok(())
        }
        _ => {
            acc.push(FieldPath::new(segments)?);
            Ok(())
        }
    }
}

pub(crate) fn value_for_field_path(map: &MapValue, path: &FieldPath) -> Option<FirestoreValue> {
    value_for_segments(map, path.segments())
}

fn value_for_segments(map: &MapValue, segments: &[String]) -> Option<FirestoreValue> {
    let (first, rest) = segments.split_first()?;
    let value = map.fields().get(first)?;
    if rest.is_empty() {
        Some(value.clone())
    } else if let ValueKind::Map(child) = value.kind() {
        value_for_segments(child, rest)
    } else {
        None
    }
}

pub(crate) fn set_value_at_field_path(
    fields: &mut BTreeMap<String, FirestoreValue>,
    path: &FieldPath,
    value: FirestoreValue,
) {
    set_value_at_segments(fields, path.segments(), value);
}

fn set_value_at_segments(
    fields: &mut BTreeMap<String, FirestoreValue>,
    segments: &[String],
    value: FirestoreValue,
) {
    let Some((first, rest)) = segments.split_first() else {
        return;
    };

    if rest.is_empty() {
        fields.insert(first.clone(), value);
        return;
    }

    let entry = fields
        .entry(first.clone())
        .or_insert_with(|| FirestoreValue::from_map(BTreeMap::new()));

    let mut child_fields = match entry.kind() {
        ValueKind::Map(map) => map.fields().clone(),
        _ => BTreeMap::new(),
    };

    set_value_at_segments(&mut child_fields, rest, value);
    *entry = FirestoreValue::from_map(child_fields);
}

pub(crate) fn delete_value_at_field_path(
    fields: &mut BTreeMap<String, FirestoreValue>,
    path: &FieldPath,
) {
    delete_value_at_segments(fields, path.segments());
}

fn delete_value_at_segments(fields: &mut BTreeMap<String, FirestoreValue>, segments: &[String]) {
    let Some((first, rest)) = segments.split_first() else {
        return;
    };

    if rest.is_empty() {
        fields.remove(first);
        return;
    }

    if let Some(entry) = fields.get_mut(first) {
        if let ValueKind::Map(map) = entry.kind() {
            let mut child_fields = map.fields().clone();
            delete_value_at_segments(&mut child_fields, rest);
            *entry = FirestoreValue::from_map(child_fields);
        }
    }
}
