//! As-of query translation.
//!
//! Bulk reads should not drag whole histories over the wire. For every
//! tracked field the projection asks the store to keep only the last history
//! entry and, when a target version is given, to first drop entries newer
//! than the target. Plain fields are scalar already and need no operator.
//!
//! A read with a target also selects only entities that existed at it, i.e.
//! that have a revision marker at or before the target. Stores apply that
//! selection before ordering and paging.
//!
//! The result is a store-neutral [`AsOfProjection`]. Stores with a native
//! projection language translate it (see [`AsOfProjection::to_json`]); stores
//! without one evaluate it in-process with [`AsOfProjection::apply`] and
//! [`AsOfProjection::existed`], which compare decoded versions.

use crate::document::{decode_version_value, Document, REVISIONS_KEY, VERSION_KEY};
use crate::revision::{OrderedEncoding, Version};
use crate::schema::{json_type_name, FieldDef};
use crate::{error::Result, Error};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Keep exactly the last element of a history array.
pub const LAST_ELEMENT: i64 = -1;

/// Filter applied to history entries before slicing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ElementFilter<V> {
    /// Keep entries whose `version` is `<=` the given version.
    VersionLte(V),
}

impl<V: Version> ElementFilter<V> {
    fn keeps(&self, field: &str, entry: &Value) -> Result<bool> {
        match self {
            ElementFilter::VersionLte(max) => {
                let raw = entry.get(VERSION_KEY).unwrap_or(&Value::Null);
                let version: V = decode_version_value(field, raw)?;
                Ok(version <= *max)
            }
        }
    }
}

/// Projection of one tracked field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldProjection<V> {
    /// Tracked field name
    pub field: String,
    /// Entry filter applied before slicing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<ElementFilter<V>>,
    /// Slice count; negative keeps the last `n` entries
    pub slice: i64,
}

/// A whole as-of read request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AsOfProjection<V> {
    /// Target version; `None` reads the latest state
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<V>,
    pub fields: Vec<FieldProjection<V>>,
}

/// Build the as-of projection for an entity's field table.
///
/// `target` of `None` means "latest".
pub fn build_projection<V: Version>(fields: &[FieldDef], target: Option<&V>) -> AsOfProjection<V> {
    let filter = target.cloned().map(ElementFilter::VersionLte);

    let fields = fields
        .iter()
        .filter(|f| f.is_tracked())
        .map(|f| FieldProjection {
            field: f.name.clone(),
            filter: filter.clone(),
            slice: LAST_ELEMENT,
        })
        .collect();

    AsOfProjection {
        target: target.cloned(),
        fields,
    }
}

impl<V: Version> AsOfProjection<V> {
    pub fn target(&self) -> Option<&V> {
        self.target.as_ref()
    }

    /// Whether no field needs slicing.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Whether a stored document had an accepted revision at or before the
    /// target. Always true for latest reads.
    pub fn existed(&self, doc: &Document) -> Result<bool> {
        let Some(target) = &self.target else {
            return Ok(true);
        };

        let markers = match doc.get(REVISIONS_KEY) {
            None | Some(Value::Null) => return Ok(false),
            Some(Value::Array(markers)) => markers,
            Some(other) => {
                return Err(Error::InvalidDocument(format!(
                    "'{REVISIONS_KEY}' must be an array, got {}",
                    json_type_name(other)
                )))
            }
        };

        for marker in markers {
            let raw = marker.get(VERSION_KEY).unwrap_or(&Value::Null);
            let version: V = decode_version_value(REVISIONS_KEY, raw)?;
            if version <= *target {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Evaluate the projection against a stored document in place.
    pub fn apply(&self, doc: &mut Document) -> Result<()> {
        for projection in &self.fields {
            let items = match doc.get_mut(&projection.field) {
                None | Some(Value::Null) => continue,
                Some(Value::Array(items)) => items,
                Some(other) => {
                    return Err(Error::InvalidDocument(format!(
                        "'{}' must be an array, got {}",
                        projection.field,
                        json_type_name(other)
                    )))
                }
            };

            if let Some(filter) = &projection.filter {
                let mut kept = Vec::with_capacity(items.len());
                for entry in items.drain(..) {
                    if filter.keeps(&projection.field, &entry)? {
                        kept.push(entry);
                    }
                }
                *items = kept;
            }

            slice(items, projection.slice);
        }
        Ok(())
    }
}

impl<V: OrderedEncoding> AsOfProjection<V> {
    /// Render as a document-store projection:
    /// `{"field": {"$filter": {"version": {"$lte": v}}, "$slice": -1}}`.
    pub fn to_json(&self) -> Value {
        let mut out = Map::new();
        for projection in &self.fields {
            let mut op = Map::new();
            if let Some(ElementFilter::VersionLte(max)) = &projection.filter {
                op.insert("$filter".into(), json!({ "version": { "$lte": max.sort_key() } }));
            }
            op.insert("$slice".into(), json!(projection.slice));
            out.insert(projection.field.clone(), Value::Object(op));
        }
        Value::Object(out)
    }

    /// Render the existence selection as a document-store filter, `None` for
    /// latest reads.
    pub fn selection_json(&self) -> Option<Value> {
        self.target
            .as_ref()
            .map(|v| json!({ "revisions.version": { "$lte": v.sort_key() } }))
    }
}

fn slice(items: &mut Vec<Value>, n: i64) {
    let keep = usize::try_from(n.unsigned_abs()).unwrap_or(usize::MAX);
    if keep >= items.len() {
        return;
    }
    if n < 0 {
        items.drain(..items.len() - keep);
    } else {
        items.truncate(keep);
    }
}
