//! Revision merge engine.
//!
//! Folds an incoming snapshot into a [`VersionedEntity`].
//!
//! # Algorithm
//!
//! 1. Gate: the snapshot version must be strictly newer than every accepted
//!    version of the entity.
//! 2. Validate the payload against the entity's field table.
//! 3. Plan every field without touching the entity:
//!    - plain fields are overwritten unconditionally;
//!    - tracked fields whose value did not change (absent on both sides, or
//!      equal under the field's [`Equality`](crate::Equality)) are skipped;
//!    - any other tracked field must be older than the snapshot; its new
//!      history is built aside with the append.
//! 4. Commit the plan by swapping the new histories in. Commit cannot fail,
//!    so nothing is mutated unless every check passed.
//!
//! For scalar fields a missing key, an explicit `null` and a cleared value
//! are the same thing: all of them are recorded as an absent value.

use crate::entity::{FieldHistory, Snapshot, VersionedEntity};
use crate::revision::Version;
use crate::schema::EntitySchema;
use crate::{error::Result, Error};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Result of accepting a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeOutcome<V> {
    /// Version the snapshot was accepted under
    pub version: V,
    /// Tracked fields that gained a revision
    pub changed: Vec<String>,
    /// Tracked fields whose value was unchanged
    pub unchanged: Vec<String>,
}

/// The new history of a tracked field, with its append already made.
struct PlannedHistory<V> {
    field: String,
    history: FieldHistory<V>,
}

/// Accept `snapshot` as the next version of `entity`.
///
/// Fails with [`Error::OldVersionInsertion`] when the snapshot is not newer
/// than the entity; the entity is left unchanged on every error.
pub fn accept<V: Version>(
    entity: &mut VersionedEntity<V>,
    schema: &EntitySchema,
    snapshot: &Snapshot<V>,
) -> Result<MergeOutcome<V>> {
    if snapshot.id != entity.id {
        return Err(Error::InvalidDocument(format!(
            "snapshot for '{}' cannot be merged into '{}'",
            snapshot.id, entity.id
        )));
    }

    let incoming = snapshot.version();
    if let Some(current) = entity.current_version() {
        if incoming <= current {
            return Err(Error::old_version(current, incoming));
        }
    }

    schema.validate_payload(&snapshot.fields)?;

    let (histories, unchanged) = plan(entity, schema, snapshot)?;
    let changed = histories.iter().map(|h| h.field.clone()).collect();

    commit(entity, schema, snapshot, histories);

    Ok(MergeOutcome {
        version: incoming.clone(),
        changed,
        unchanged,
    })
}

fn plan<V: Version>(
    entity: &VersionedEntity<V>,
    schema: &EntitySchema,
    snapshot: &Snapshot<V>,
) -> Result<(Vec<PlannedHistory<V>>, Vec<String>)> {
    let incoming_version = snapshot.version();
    let mut histories = Vec::new();
    let mut unchanged = Vec::new();

    for def in schema.tracked_fields() {
        let incoming = snapshot.get(&def.name).cloned().unwrap_or(Value::Null);
        let existing = entity.tracked.get(&def.name);

        let current = existing.map_or(Value::Null, FieldHistory::latest_value);
        if def.equality().matches(&current, &incoming) {
            unchanged.push(def.name.clone());
            continue;
        }

        if let Some(latest) = existing.and_then(FieldHistory::latest_version) {
            if latest >= incoming_version {
                return Err(Error::old_version(latest, incoming_version));
            }
        }

        let mut history = existing
            .cloned()
            .unwrap_or_else(|| FieldHistory::for_field(def));
        if !history.admits(&incoming) {
            return Err(Error::TypeMismatch {
                field: def.name.clone(),
                expected: def.field_type.to_string(),
                got: crate::schema::json_type_name(&incoming).to_string(),
            });
        }
        history.append(incoming, incoming_version.clone())?;

        histories.push(PlannedHistory {
            field: def.name.clone(),
            history,
        });
    }

    Ok((histories, unchanged))
}

fn commit<V: Version>(
    entity: &mut VersionedEntity<V>,
    schema: &EntitySchema,
    snapshot: &Snapshot<V>,
    histories: Vec<PlannedHistory<V>>,
) {
    for def in schema.plain_fields() {
        match snapshot.get(&def.name) {
            Some(value) => {
                entity.plain.insert(def.name.clone(), value.clone());
            }
            None => {
                entity.plain.remove(&def.name);
            }
        }
    }

    for planned in histories {
        entity.tracked.insert(planned.field, planned.history);
    }

    entity.revisions.push(snapshot.revision.clone());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldDef, FieldType};
    use serde_json::json;

    fn schema() -> EntitySchema {
        EntitySchema::try_new(
            "things",
            vec![
                FieldDef::plain("label", FieldType::String),
                FieldDef::tracked("str", FieldType::String),
                FieldDef::tracked("int", FieldType::Int),
                FieldDef::tracked("coll", FieldType::Array),
            ],
        )
        .unwrap()
    }

    fn snap(version: u64, payload: Value) -> Snapshot<u64> {
        Snapshot::new("t-1", version, version * 100, payload).unwrap()
    }

    #[test]
    fn initialize_records_every_present_field() {
        let entity = VersionedEntity::initialize(
            &schema(),
            &snap(1, json!({"str": "Initial", "int": 2, "coll": ["string1"]})),
        )
        .unwrap();

        assert_eq!(entity.history("str").unwrap().latest_value(), json!("Initial"));
        assert_eq!(entity.history("int").unwrap().latest_value(), json!(2));
        assert_eq!(
            entity.history("coll").unwrap().latest_value(),
            json!(["string1"])
        );
        assert_eq!(entity.revisions().len(), 1);
        assert!(entity.is_consistent());
    }

    #[test]
    fn absent_on_both_sides_is_noop() {
        let schema = schema();
        let mut entity = VersionedEntity::initialize(&schema, &snap(1, json!({"int": 1}))).unwrap();

        let outcome = accept(&mut entity, &schema, &snap(2, json!({"int": 2}))).unwrap();
        assert_eq!(outcome.changed, vec!["int"]);
        assert_eq!(outcome.unchanged, vec!["str", "coll"]);
        assert!(entity.history("str").is_none());
        assert!(entity.history("coll").is_none());
    }

    #[test]
    fn unchanged_value_does_not_grow_log() {
        let schema = schema();
        let mut entity =
            VersionedEntity::initialize(&schema, &snap(1, json!({"str": "a", "coll": ["x", "y"]})))
                .unwrap();

        accept(&mut entity, &schema, &snap(2, json!({"str": "a", "coll": ["x", "y"]}))).unwrap();
        accept(&mut entity, &schema, &snap(3, json!({"str": "a", "coll": ["x", "y"]}))).unwrap();

        assert_eq!(entity.history("str").unwrap().len(), 1);
        assert_eq!(entity.history("coll").unwrap().len(), 1);
        assert_eq!(entity.revisions().len(), 3);
    }

    #[test]
    fn reordered_collection_is_a_change() {
        let schema = schema();
        let mut entity =
            VersionedEntity::initialize(&schema, &snap(1, json!({"coll": ["x", "y"]}))).unwrap();

        let outcome = accept(&mut entity, &schema, &snap(2, json!({"coll": ["y", "x"]}))).unwrap();
        assert_eq!(outcome.changed, vec!["coll"]);
        assert_eq!(entity.history("coll").unwrap().len(), 2);
    }

    #[test]
    fn clearing_a_field_is_recorded() {
        let schema = schema();
        let mut entity =
            VersionedEntity::initialize(&schema, &snap(1, json!({"str": "a", "coll": ["x"]})))
                .unwrap();

        accept(&mut entity, &schema, &snap(2, json!({}))).unwrap();

        let str_history = entity.history("str").unwrap();
        assert_eq!(str_history.latest_value(), Value::Null);
        assert_eq!(str_history.value_at(&1), json!("a"));
        assert_eq!(entity.history("coll").unwrap().latest_value(), Value::Null);
    }

    #[test]
    fn plain_fields_are_overwritten() {
        let schema = schema();
        let mut entity =
            VersionedEntity::initialize(&schema, &snap(1, json!({"label": "first"}))).unwrap();
        assert_eq!(entity.plain_value("label"), Some(&json!("first")));

        accept(&mut entity, &schema, &snap(2, json!({"label": "second"}))).unwrap();
        assert_eq!(entity.plain_value("label"), Some(&json!("second")));

        accept(&mut entity, &schema, &snap(3, json!({}))).unwrap();
        assert_eq!(entity.plain_value("label"), None);
    }

    #[test]
    fn stale_version_rejected_without_changes() {
        let schema = schema();
        let mut entity =
            VersionedEntity::initialize(&schema, &snap(5, json!({"str": "a", "label": "l"})))
                .unwrap();
        let before = entity.clone();

        let older = accept(&mut entity, &schema, &snap(3, json!({"str": "b", "label": "m"})));
        assert!(matches!(older, Err(Error::OldVersionInsertion { .. })));

        let same = accept(&mut entity, &schema, &snap(5, json!({"str": "b"})));
        assert!(matches!(same, Err(Error::OldVersionInsertion { .. })));

        assert_eq!(entity, before);
    }

    #[test]
    fn invalid_payload_leaves_entity_untouched() {
        let schema = schema();
        let mut entity = VersionedEntity::initialize(&schema, &snap(1, json!({"str": "a"}))).unwrap();
        let before = entity.clone();

        let result = accept(&mut entity, &schema, &snap(2, json!({"str": "b", "int": "two"})));
        assert!(matches!(result, Err(Error::TypeMismatch { .. })));
        assert_eq!(entity, before);
    }

    #[test]
    fn field_log_newer_than_snapshot_aborts_whole_merge() {
        let schema = schema();
        let mut entity = VersionedEntity::initialize(&schema, &snap(1, json!({"str": "a"}))).unwrap();
        // A damaged document whose field history ran ahead of its markers.
        entity
            .tracked
            .get_mut("str")
            .unwrap()
            .append(json!("z"), 9)
            .unwrap();
        let before = entity.clone();

        let result = accept(&mut entity, &schema, &snap(4, json!({"str": "b", "label": "x"})));
        assert!(matches!(result, Err(Error::OldVersionInsertion { .. })));
        assert_eq!(entity, before);
    }

    #[test]
    fn history_shape_failure_on_a_later_field_changes_nothing() {
        let schema = schema();
        let mut entity =
            VersionedEntity::initialize(&schema, &snap(1, json!({"str": "a", "int": 1}))).unwrap();
        // A damaged document decoded "int" as a sequence history.
        entity
            .tracked
            .insert("int".into(), FieldHistory::Sequence(crate::RevisionLog::new()));
        let before = entity.clone();

        // "str" plans fine, then "int" cannot take a scalar.
        let update = snap(2, json!({"str": "b", "int": 2, "label": "x"}));
        let result = accept(&mut entity, &schema, &update);
        assert!(matches!(result, Err(Error::TypeMismatch { ref field, .. }) if field == "int"));
        assert_eq!(entity, before);
        assert_eq!(entity.revisions().len(), 1);
    }

    #[test]
    fn mismatched_id_rejected() {
        let schema = schema();
        let mut entity = VersionedEntity::<u64>::empty("other");
        let result = accept(&mut entity, &schema, &snap(1, json!({})));
        assert!(matches!(result, Err(Error::InvalidDocument(_))));
    }
}
