//! Snapshots and versioned entities.
//!
//! A [`Snapshot`] is the plain shape of an entity: one value per field plus
//! the revision marker it was submitted under. A [`VersionedEntity`] is what
//! many snapshots fold into over time: plain fields keep their latest value,
//! tracked fields keep a [`FieldHistory`].

use crate::revision::Version;
use crate::schema::{json_type_name, EntitySchema, FieldDef, FieldType};
use crate::{error::Result, EntityId, Error, RevisionLog, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// One entry per accepted update to an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevisionMarker<V> {
    /// The entity version this update was accepted under
    pub version: V,
    /// When the update was recorded (milliseconds since epoch)
    pub recorded_at: Timestamp,
}

impl<V> RevisionMarker<V> {
    pub fn new(version: V, recorded_at: Timestamp) -> Self {
        Self {
            version,
            recorded_at,
        }
    }
}

/// The plain, history-free shape of an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot<V> {
    /// Entity identity
    pub id: EntityId,
    /// Version this snapshot is (or was) current under
    pub revision: RevisionMarker<V>,
    /// Field values by name
    pub fields: Map<String, Value>,
}

impl<V> Snapshot<V> {
    /// Create a snapshot from a JSON object payload.
    pub fn new(
        id: impl Into<EntityId>,
        version: V,
        recorded_at: Timestamp,
        payload: Value,
    ) -> Result<Self> {
        let fields = match payload {
            Value::Object(map) => map,
            other => {
                return Err(Error::InvalidDocument(format!(
                    "snapshot payload must be an object, got {}",
                    json_type_name(&other)
                )))
            }
        };

        Ok(Self {
            id: id.into(),
            revision: RevisionMarker::new(version, recorded_at),
            fields,
        })
    }

    pub fn version(&self) -> &V {
        &self.revision.version
    }

    /// The value of a field, `None` when absent.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field).filter(|v| !v.is_null())
    }
}

/// History of one tracked field.
///
/// The variant is picked from the field declaration, never from the values:
/// collection fields keep whole sequences so that the no-op check compares
/// them element by element.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldHistory<V> {
    Scalar(RevisionLog<Value, V>),
    Sequence(RevisionLog<Option<Vec<Value>>, V>),
}

impl<V: Version> FieldHistory<V> {
    /// Empty history of the right shape for `def`.
    pub fn for_field(def: &FieldDef) -> Self {
        match def.field_type {
            FieldType::Array => FieldHistory::Sequence(RevisionLog::new()),
            _ => FieldHistory::Scalar(RevisionLog::new()),
        }
    }

    /// Latest recorded value, `Null` when nothing was recorded.
    pub fn latest_value(&self) -> Value {
        match self {
            FieldHistory::Scalar(log) => log.latest().map_or(Value::Null, |r| r.value().clone()),
            FieldHistory::Sequence(log) => log
                .latest()
                .map_or(Value::Null, |r| sequence_to_json(r.value())),
        }
    }

    /// Value recorded at or before `version`, `Null` when there is none.
    pub fn value_at(&self, version: &V) -> Value {
        match self {
            FieldHistory::Scalar(log) => log.at(version).map_or(Value::Null, |r| r.value().clone()),
            FieldHistory::Sequence(log) => log
                .at(version)
                .map_or(Value::Null, |r| sequence_to_json(r.value())),
        }
    }

    pub fn latest_version(&self) -> Option<&V> {
        match self {
            FieldHistory::Scalar(log) => log.latest().map(|r| r.version()),
            FieldHistory::Sequence(log) => log.latest().map(|r| r.version()),
        }
    }

    /// Whether `value` can be stored in this history.
    pub fn admits(&self, value: &Value) -> bool {
        match self {
            FieldHistory::Scalar(_) => true,
            FieldHistory::Sequence(_) => value.is_null() || value.is_array(),
        }
    }

    /// Append a revision. Ordering is the caller's responsibility.
    pub fn append(&mut self, value: Value, version: V) -> Result<()> {
        match self {
            FieldHistory::Scalar(log) => log.append(value, version),
            FieldHistory::Sequence(log) => match value {
                Value::Null => log.append(None, version),
                Value::Array(items) => log.append(Some(items), version),
                other => {
                    return Err(Error::TypeMismatch {
                        field: "<sequence>".into(),
                        expected: FieldType::Array.to_string(),
                        got: json_type_name(&other).to_string(),
                    })
                }
            },
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        match self {
            FieldHistory::Scalar(log) => log.len(),
            FieldHistory::Sequence(log) => log.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn is_ordered(&self) -> bool {
        match self {
            FieldHistory::Scalar(log) => log.is_ordered(),
            FieldHistory::Sequence(log) => log.is_ordered(),
        }
    }
}

fn sequence_to_json(value: &Option<Vec<Value>>) -> Value {
    value.clone().map_or(Value::Null, Value::Array)
}

/// An entity whose tracked fields keep their history.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionedEntity<V> {
    pub(crate) id: EntityId,
    pub(crate) revisions: Vec<RevisionMarker<V>>,
    pub(crate) plain: Map<String, Value>,
    pub(crate) tracked: BTreeMap<String, FieldHistory<V>>,
}

impl<V: Version> VersionedEntity<V> {
    /// An entity with no accepted revisions yet.
    pub fn empty(id: impl Into<EntityId>) -> Self {
        Self {
            id: id.into(),
            revisions: Vec::new(),
            plain: Map::new(),
            tracked: BTreeMap::new(),
        }
    }

    /// Create an entity from its first snapshot.
    ///
    /// The first snapshot goes through the merge engine like any other
    /// update, so it is validated and recorded as the first revision.
    pub fn initialize(schema: &EntitySchema, snapshot: &Snapshot<V>) -> Result<Self> {
        let mut entity = Self::empty(snapshot.id.clone());
        crate::merge::accept(&mut entity, schema, snapshot)?;
        Ok(entity)
    }

    pub fn id(&self) -> &EntityId {
        &self.id
    }

    /// All accepted revision markers, oldest first.
    pub fn revisions(&self) -> &[RevisionMarker<V>] {
        &self.revisions
    }

    /// The latest accepted revision marker.
    pub fn current_revision(&self) -> Option<&RevisionMarker<V>> {
        self.revisions.last()
    }

    /// The latest accepted version.
    pub fn current_version(&self) -> Option<&V> {
        self.current_revision().map(|r| &r.version)
    }

    /// The latest marker with a version `<= version`.
    pub fn revision_at(&self, version: &V) -> Option<&RevisionMarker<V>> {
        let idx = self.revisions.partition_point(|r| r.version <= *version);
        idx.checked_sub(1).map(|i| &self.revisions[i])
    }

    /// Stored value of a plain field.
    pub fn plain_value(&self, field: &str) -> Option<&Value> {
        self.plain.get(field)
    }

    /// History of a tracked field, if anything was ever recorded for it.
    pub fn history(&self, field: &str) -> Option<&FieldHistory<V>> {
        self.tracked.get(field)
    }

    /// Check the structural invariants: markers and every field log are
    /// strictly increasing, and no field is newer than the entity itself.
    pub fn is_consistent(&self) -> bool {
        let markers_ordered = self.revisions.windows(2).all(|w| w[0].version < w[1].version);
        let current = self.current_version();

        markers_ordered
            && self.tracked.values().all(|history| {
                history.is_ordered()
                    && match (history.latest_version(), current) {
                        (None, _) => true,
                        (Some(_), None) => false,
                        (Some(field), Some(entity)) => field <= entity,
                    }
            })
    }
}
