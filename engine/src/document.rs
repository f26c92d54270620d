//! Persisted document layout.
//!
//! One stored document per versioned entity:
//!
//! ```json
//! {
//!   "id": "acct-1",
//!   "revisions": [{"version": 1, "recordedAt": 1706745600000}],
//!   "owner": "Alice",
//!   "balance": [{"version": 1, "value": 10}]
//! }
//! ```
//!
//! Plain fields are stored natively; tracked fields are arrays of
//! `{version, value}` in strictly increasing version order. Keys the field
//! table does not declare are ignored on read.

use crate::entity::{FieldHistory, RevisionMarker, VersionedEntity};
use crate::revision::{Revision, Version};
use crate::schema::{json_type_name, EntitySchema, FieldType};
use crate::{error::Result, Error, RevisionLog};
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// Key holding the entity identity.
pub const ID_KEY: &str = "id";
/// Key holding the revision marker array.
pub const REVISIONS_KEY: &str = "revisions";
/// Sub-key of every history entry and marker holding its version.
pub const VERSION_KEY: &str = "version";
/// Sub-key of every history entry holding its value.
pub const VALUE_KEY: &str = "value";

/// A stored document.
pub type Document = Map<String, Value>;

/// Encode an entity into its persisted layout.
pub fn to_document<V: Version>(entity: &VersionedEntity<V>, schema: &EntitySchema) -> Result<Document> {
    let mut doc = Document::new();
    doc.insert(ID_KEY.into(), Value::String(entity.id().clone()));
    doc.insert(REVISIONS_KEY.into(), encode(entity.revisions())?);

    for def in &schema.fields {
        if def.is_tracked() {
            let history = match entity.history(&def.name) {
                Some(FieldHistory::Scalar(log)) => encode(log)?,
                Some(FieldHistory::Sequence(log)) => encode(log)?,
                None => Value::Array(Vec::new()),
            };
            doc.insert(def.name.clone(), history);
        } else if let Some(value) = entity.plain_value(&def.name) {
            doc.insert(def.name.clone(), value.clone());
        }
    }

    Ok(doc)
}

fn encode<T: serde::Serialize + ?Sized>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| Error::InvalidDocument(e.to_string()))
}

/// Decode a persisted document.
///
/// Works on whole documents and on documents whose tracked arrays were
/// sliced by an as-of projection.
pub fn from_document<V: Version>(doc: &Document, schema: &EntitySchema) -> Result<VersionedEntity<V>> {
    let id = doc
        .get(ID_KEY)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::InvalidDocument("missing string 'id'".into()))?;

    let mut entity = VersionedEntity::empty(id);

    for entry in entries(doc, REVISIONS_KEY)? {
        let version = decode_version::<V>(REVISIONS_KEY, entry)?;
        let recorded_at = entry
            .get("recordedAt")
            .and_then(Value::as_u64)
            .ok_or_else(|| Error::InvalidDocument(format!("{id}: revision without 'recordedAt'")))?;
        entity.revisions.push(RevisionMarker::new(version, recorded_at));
    }

    for def in &schema.fields {
        if !def.is_tracked() {
            if let Some(value) = doc.get(&def.name).filter(|v| !v.is_null()) {
                entity.plain.insert(def.name.clone(), value.clone());
            }
            continue;
        }

        let items = entries(doc, &def.name)?;
        if items.is_empty() {
            continue;
        }

        let history = match def.field_type {
            FieldType::Array => {
                let log: RevisionLog<Option<Vec<Value>>, V> = items
                    .iter()
                    .map(|entry| {
                        let version = decode_version::<V>(&def.name, entry)?;
                        let value = match entry.get(VALUE_KEY).unwrap_or(&Value::Null) {
                            Value::Null => None,
                            Value::Array(items) => Some(items.clone()),
                            other => {
                                return Err(Error::TypeMismatch {
                                    field: def.name.clone(),
                                    expected: FieldType::Array.to_string(),
                                    got: json_type_name(other).to_string(),
                                })
                            }
                        };
                        Ok(Revision::new(value, version))
                    })
                    .collect::<Result<_>>()?;
                FieldHistory::Sequence(log)
            }
            _ => {
                let log: RevisionLog<Value, V> = items
                    .iter()
                    .map(|entry| {
                        let version = decode_version::<V>(&def.name, entry)?;
                        let value = entry.get(VALUE_KEY).cloned().unwrap_or(Value::Null);
                        Ok(Revision::new(value, version))
                    })
                    .collect::<Result<_>>()?;
                FieldHistory::Scalar(log)
            }
        };
        entity.tracked.insert(def.name.clone(), history);
    }

    if !entity.is_consistent() {
        return Err(Error::InvalidDocument(format!(
            "{id}: revisions out of order or newer than the entity"
        )));
    }

    Ok(entity)
}

/// The array stored under `key`, each element required to be an object.
fn entries<'a>(doc: &'a Document, key: &str) -> Result<Vec<&'a Map<String, Value>>> {
    match doc.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_object().ok_or_else(|| {
                    Error::InvalidDocument(format!("'{key}' entries must be objects"))
                })
            })
            .collect(),
        Some(other) => Err(Error::InvalidDocument(format!(
            "'{key}' must be an array, got {}",
            json_type_name(other)
        ))),
    }
}

fn decode_version<V: Version>(field: &str, entry: &Map<String, Value>) -> Result<V> {
    let raw = entry
        .get(VERSION_KEY)
        .ok_or_else(|| Error::InvalidDocument(format!("'{field}' entry without 'version'")))?;

    decode_version_value(field, raw)
}

/// Decode a JSON-encoded version, reporting the declared type on failure.
pub fn decode_version_value<V: Version>(field: &str, raw: &Value) -> Result<V> {
    serde_json::from_value(raw.clone()).map_err(|_| Error::VersionTypeMismatch {
        field: field.to_string(),
        expected: std::any::type_name::<V>().to_string(),
        got: json_type_name(raw).to_string(),
    })
}

/// Natural order of two stored JSON values, used to sort by plain fields.
///
/// Numbers compare numerically and strings lexically; `null` sorts first.
/// Values of different kinds (or arrays and objects) have no order. Versions
/// are never compared this way; they are decoded and use their own order.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Null, _) => Some(Ordering::Less),
        (_, Value::Null) => Some(Ordering::Greater),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Number(x), Value::Number(y)) => {
            if let (Some(x), Some(y)) = (x.as_i64(), y.as_i64()) {
                Some(x.cmp(&y))
            } else if let (Some(x), Some(y)) = (x.as_u64(), y.as_u64()) {
                Some(x.cmp(&y))
            } else {
                x.as_f64()?.partial_cmp(&y.as_f64()?)
            }
        }
        _ => None,
    }
}
