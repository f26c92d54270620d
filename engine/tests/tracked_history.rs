//! History scenarios for tracked entities.
//!
//! Versions are day offsets from "today": the entity is created ten days ago,
//! then updated five and two days ago.

use asof_engine::{
    merge, reconstruct, AsOf, EntitySchema, Error, FieldDef, FieldType, MemoryStore, Repository,
    Snapshot, VersionedEntity,
};
use serde_json::{json, Value};

const DAY: u64 = 86_400_000;
const NOW: u64 = 1_706_745_600_000;

fn test_schema() -> EntitySchema {
    EntitySchema::try_new(
        "test_entities",
        vec![
            FieldDef::tracked("str", FieldType::String),
            FieldDef::tracked("int", FieldType::Int),
            FieldDef::tracked("coll", FieldType::Array),
        ],
    )
    .unwrap()
}

fn days_ago(days: i64, payload: Value) -> Snapshot<i64> {
    Snapshot::new("entity-1", -days, NOW - days.unsigned_abs() * DAY, payload).unwrap()
}

fn initial() -> Snapshot<i64> {
    days_ago(10, json!({"str": "Initial", "int": 2, "coll": ["string1"]}))
}

fn first_update() -> Snapshot<i64> {
    days_ago(5, json!({"int": 5}))
}

fn second_update() -> Snapshot<i64> {
    days_ago(
        2,
        json!({"str": "Final", "int": 5, "coll": ["string1", "string2"]}),
    )
}

fn repository() -> Repository<MemoryStore, i64> {
    let mut repo = Repository::new(MemoryStore::new(), test_schema());
    repo.insert(&initial()).unwrap();
    repo
}

// ============================================================================
// Entity-level history
// ============================================================================

#[test]
fn entity_initializes_from_first_snapshot() {
    let entity = VersionedEntity::initialize(&test_schema(), &initial()).unwrap();

    assert_eq!(entity.history("str").unwrap().latest_value(), "Initial");
    assert_eq!(entity.history("int").unwrap().latest_value(), 2);
    assert_eq!(
        entity.history("coll").unwrap().latest_value(),
        json!(["string1"])
    );
}

#[test]
fn entity_reads_exact_and_intermediate_versions() {
    let schema = test_schema();
    let mut entity = VersionedEntity::initialize(&schema, &initial()).unwrap();
    merge::accept(&mut entity, &schema, &first_update()).unwrap();
    merge::accept(&mut entity, &schema, &second_update()).unwrap();

    let str_history = entity.history("str").unwrap();
    let int_history = entity.history("int").unwrap();
    let coll_history = entity.history("coll").unwrap();

    assert_eq!(str_history.latest_value(), "Final");
    assert_eq!(int_history.latest_value(), 5);

    // exact
    assert_eq!(str_history.value_at(&-10), "Initial");
    assert_eq!(int_history.value_at(&-10), 2);

    // between revisions
    assert_eq!(str_history.value_at(&-3), Value::Null);
    assert_eq!(int_history.value_at(&-3), 5);

    assert_eq!(coll_history.value_at(&-10), json!(["string1"]));
    assert_eq!(coll_history.value_at(&-5), Value::Null);
    assert_eq!(coll_history.value_at(&-2), json!(["string1", "string2"]));
}

#[test]
fn unchanged_int_is_not_recorded_twice() {
    let schema = test_schema();
    let mut entity = VersionedEntity::initialize(&schema, &initial()).unwrap();
    merge::accept(&mut entity, &schema, &first_update()).unwrap();
    let outcome = merge::accept(&mut entity, &schema, &second_update()).unwrap();

    assert!(outcome.unchanged.contains(&"int".to_string()));
    assert_eq!(entity.history("int").unwrap().len(), 2);
    assert_eq!(entity.revisions().len(), 3);
    assert!(entity.is_consistent());
}

#[test]
fn entity_rejects_old_and_current_versions() {
    let schema = test_schema();
    let mut entity = VersionedEntity::initialize(&schema, &initial()).unwrap();
    merge::accept(&mut entity, &schema, &first_update()).unwrap();
    merge::accept(&mut entity, &schema, &second_update()).unwrap();
    let before = entity.clone();

    assert!(matches!(
        merge::accept(&mut entity, &schema, &first_update()),
        Err(Error::OldVersionInsertion { .. })
    ));
    assert!(matches!(
        merge::accept(&mut entity, &schema, &second_update()),
        Err(Error::OldVersionInsertion { .. })
    ));
    assert_eq!(entity, before);
}

// ============================================================================
// Repository scenarios
// ============================================================================

#[test]
fn inserted_entity_reads_back() {
    let repo = repository();
    let all = repo.find_all(None).unwrap();
    let last = all.last().unwrap();

    assert_eq!(last.fields["coll"], json!(["string1"]));
    assert_eq!(last.fields["str"], "Initial");
    assert_eq!(last.fields["int"], 2);
}

#[test]
fn omitted_fields_are_cleared_by_update() {
    let mut repo = repository();
    repo.update(&first_update()).unwrap();

    let latest = repo.get_latest("entity-1").unwrap().unwrap();
    assert_eq!(latest.fields["str"], Value::Null);
    assert_eq!(latest.fields["int"], 5);
    assert_eq!(latest.fields["coll"], Value::Null);
    assert_eq!(latest.revision.version, -5);
}

#[test]
fn second_update_becomes_latest() {
    let mut repo = repository();
    repo.update(&first_update()).unwrap();
    repo.update(&second_update()).unwrap();

    let latest = repo.get_latest("entity-1").unwrap().unwrap();
    assert_eq!(latest.fields["str"], "Final");
    assert_eq!(latest.fields["int"], 5);
    assert_eq!(latest.fields["coll"], json!(["string1", "string2"]));
}

#[test]
fn as_of_read_between_updates() {
    let mut repo = repository();
    repo.update(&first_update()).unwrap();
    repo.update(&second_update()).unwrap();

    let then = repo.get_at("entity-1", &-3).unwrap().unwrap();
    assert_eq!(then.fields["int"], 5);
    assert_eq!(then.fields["str"], Value::Null);
    assert_eq!(then.revision.version, -5);
    assert_eq!(then.revision.recorded_at, NOW - 5 * DAY);

    // Same answer as rebuilding from the whole history.
    let entity = repo.load("entity-1").unwrap();
    assert_eq!(
        reconstruct(&entity, repo.schema(), &AsOf::At(-3)),
        Some(then)
    );
}

#[test]
fn resubmitting_old_update_fails() {
    let mut repo = repository();
    repo.update(&first_update()).unwrap();
    repo.update(&second_update()).unwrap();
    let before = repo.store().raw("test_entities", "entity-1").cloned();

    let err = repo.update(&first_update()).unwrap_err();
    assert!(matches!(err, Error::OldVersionInsertion { .. }));
    assert_eq!(repo.store().raw("test_entities", "entity-1").cloned(), before);
}

#[test]
fn find_all_as_of_skips_entities_not_yet_created() {
    let mut repo = repository();
    repo.insert(&Snapshot::new("entity-2", -1, NOW - DAY, json!({"int": 9})).unwrap())
        .unwrap();

    assert_eq!(repo.find_all(None).unwrap().len(), 2);

    let week_ago = repo.find_all(Some(&-7)).unwrap();
    assert_eq!(week_ago.len(), 1);
    assert_eq!(week_ago[0].id, "entity-1");
    assert_eq!(week_ago[0].fields["str"], "Initial");
}

#[test]
fn store_returns_only_the_current_revision() {
    let mut repo = repository();
    repo.update(&first_update()).unwrap();
    repo.update(&second_update()).unwrap();

    let projection = repo.projection(Some(&-3));
    let docs = asof_engine::DocumentStore::find(
        repo.store(),
        "test_entities",
        &asof_engine::Filter::All,
        Some(&projection),
        None,
    )
    .unwrap();

    assert_eq!(docs[0]["int"], json!([{"version": -5, "value": 5}]));
    assert_eq!(docs[0]["str"], json!([{"version": -5, "value": null}]));
    assert_eq!(docs[0]["coll"], json!([{"version": -5, "value": null}]));
}
