//! Snapshot reconstruction.
//!
//! Turns a [`VersionedEntity`] back into the [`Snapshot`] it represented at a
//! given version. Plain fields have no time dimension and are always returned
//! as stored; tracked fields read their history at the target.

use crate::entity::{FieldHistory, RevisionMarker, Snapshot, VersionedEntity};
use crate::revision::Version;
use crate::schema::EntitySchema;
use serde_json::{Map, Value};

/// Which point in an entity's history to read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AsOf<V> {
    /// The most recent accepted version.
    Latest,
    /// The newest state whose version is `<=` the given one.
    At(V),
}

impl<V> AsOf<V> {
    pub fn target(&self) -> Option<&V> {
        match self {
            AsOf::Latest => None,
            AsOf::At(v) => Some(v),
        }
    }
}

impl<V> From<Option<V>> for AsOf<V> {
    fn from(version: Option<V>) -> Self {
        version.map_or(AsOf::Latest, AsOf::At)
    }
}

/// Materialize the snapshot of `entity` at `as_of`.
///
/// Returns `None` when the entity has no accepted revision at or before the
/// target, i.e. it did not exist yet. Tracked fields first set after the
/// target come back as `null`.
pub fn reconstruct<V: Version>(
    entity: &VersionedEntity<V>,
    schema: &EntitySchema,
    as_of: &AsOf<V>,
) -> Option<Snapshot<V>> {
    let marker = select_marker(entity, as_of)?;
    Some(materialize(entity, schema, marker, |history| match as_of {
        AsOf::Latest => history.latest_value(),
        AsOf::At(v) => history.value_at(v),
    }))
}

/// Materialize an entity whose histories were already sliced by the store.
///
/// After an as-of projection each tracked field holds at most the one entry
/// that was current at the target, so its latest entry is the answer.
pub fn reconstruct_sliced<V: Version>(
    entity: &VersionedEntity<V>,
    schema: &EntitySchema,
    as_of: &AsOf<V>,
) -> Option<Snapshot<V>> {
    let marker = select_marker(entity, as_of)?;
    Some(materialize(entity, schema, marker, FieldHistory::latest_value))
}

fn select_marker<'a, V: Version>(
    entity: &'a VersionedEntity<V>,
    as_of: &AsOf<V>,
) -> Option<&'a RevisionMarker<V>> {
    match as_of {
        AsOf::Latest => entity.current_revision(),
        AsOf::At(v) => entity.revision_at(v),
    }
}

fn materialize<V: Version>(
    entity: &VersionedEntity<V>,
    schema: &EntitySchema,
    marker: &RevisionMarker<V>,
    read: impl Fn(&FieldHistory<V>) -> Value,
) -> Snapshot<V> {
    let mut fields = Map::new();

    for def in &schema.fields {
        let value = if def.is_tracked() {
            entity.history(&def.name).map_or(Value::Null, &read)
        } else {
            entity.plain_value(&def.name).cloned().unwrap_or(Value::Null)
        };
        fields.insert(def.name.clone(), value);
    }

    Snapshot {
        id: entity.id().clone(),
        revision: marker.clone(),
        fields,
    }
}
