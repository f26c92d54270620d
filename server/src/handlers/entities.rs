//! Entity handlers - versioned writes and as-of reads against PostgreSQL.
//!
//! Writes are read-merge-write: the whole stored history is loaded, the
//! snapshot is merged by the engine, and the whole document is written back.
//! Reads send the as-of projection to the database and rebuild snapshots from
//! the sliced histories.

use crate::error::{AppError, Result};
use crate::AppState;
use asof_engine::{
    build_projection, materialize, merge_document, prepare_insert, AsOf, EntitySchema,
    Error as EngineError, Filter, MergeOutcome, Page, Snapshot, SortOrder,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Entity versions are signed integers: PostgreSQL compares stored versions
/// as JSONB numbers, which needs an [`asof_engine::OrderedEncoding`] type.
pub type EntityVersion = i64;

const DEFAULT_PAGE_SIZE: usize = 20;

/// Request body for inserts and updates.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotRequest {
    /// Entity id; generated on insert when absent
    #[serde(default)]
    pub id: Option<String>,
    /// Version this snapshot becomes current under
    pub version: EntityVersion,
    /// Wall-clock time of the revision in milliseconds; defaults to now
    #[serde(default)]
    pub recorded_at: Option<u64>,
    /// Field values
    #[serde(default)]
    pub fields: Map<String, Value>,
}

/// Response for inserts and updates.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteResponse {
    pub id: String,
    #[serde(flatten)]
    pub outcome: MergeOutcome<EntityVersion>,
}

/// Query string for single-entity reads.
#[derive(Debug, Default, Deserialize)]
pub struct VersionQuery {
    /// Read as of this version instead of the latest
    pub version: Option<EntityVersion>,
}

/// Query string for collection reads.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    pub version: Option<EntityVersion>,
    /// Plain field (or `id`) to filter on
    pub field: Option<String>,
    /// Value the filter field must equal; parsed as JSON, else taken as a string
    pub value: Option<String>,
    pub order_by: Option<String>,
    pub descending: Option<bool>,
    /// Zero-based page index; paging is on when this or `size` is given
    pub page: Option<usize>,
    pub size: Option<usize>,
}

/// Response for collection reads.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResponse {
    pub items: Vec<Snapshot<EntityVersion>>,
    /// Total matching entities, for paged reads
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<i64>,
}

/// Create a new entity from its first snapshot.
pub async fn handle_create(
    state: &AppState,
    collection: &str,
    request: SnapshotRequest,
) -> Result<WriteResponse> {
    let schema = state.schema.entity(collection)?;
    let id = request
        .id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let snapshot = to_snapshot(id, request)?;
    let (document, outcome) = prepare_insert(schema, &snapshot)?;

    let inserted = state
        .retry
        .run("insert", || {
            state.documents.insert(collection, &snapshot.id, &document)
        })
        .await?;
    if !inserted {
        return Err(EngineError::EntityAlreadyExists(snapshot.id).into());
    }

    tracing::debug!(collection, id = %snapshot.id, version = outcome.version, "entity created");
    Ok(WriteResponse {
        id: snapshot.id,
        outcome,
    })
}

/// Accept a new snapshot of an existing entity.
pub async fn handle_update(
    state: &AppState,
    collection: &str,
    id: &str,
    request: SnapshotRequest,
) -> Result<WriteResponse> {
    let schema = state.schema.entity(collection)?;
    if request.id.as_deref().is_some_and(|body_id| body_id != id) {
        return Err(AppError::BadRequest(format!(
            "body id does not match path id '{id}'"
        )));
    }
    let snapshot = to_snapshot(id.to_string(), request)?;
    // Reject bad payloads before touching the database
    schema.validate_payload(&snapshot.fields)?;

    let stored = state
        .retry
        .run("load", || state.documents.get(collection, id))
        .await?
        .ok_or_else(|| EngineError::EntityNotFound(id.to_string()))?;
    let (document, outcome) = merge_document(schema, &stored, &snapshot)?;

    let replaced = state
        .retry
        .run("replace", || state.documents.replace(collection, id, &document))
        .await?;
    if !replaced {
        // Deleted between the read and the write
        return Err(EngineError::EntityNotFound(id.to_string()).into());
    }

    tracing::debug!(
        collection,
        id,
        version = outcome.version,
        changed = ?outcome.changed,
        "entity updated"
    );
    Ok(WriteResponse {
        id: id.to_string(),
        outcome,
    })
}

/// Read one entity at its latest state or as of a version.
pub async fn handle_get(
    state: &AppState,
    collection: &str,
    id: &str,
    query: VersionQuery,
) -> Result<Snapshot<EntityVersion>> {
    let schema = state.schema.entity(collection)?;
    let as_of = AsOf::from(query.version);

    read(state, schema, &Filter::Id(id.to_string()), None, &as_of)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| match query.version {
            Some(version) => AppError::NotFound(format!("{id} did not exist at version {version}")),
            None => EngineError::EntityNotFound(id.to_string()).into(),
        })
}

/// Read every matching entity, optionally one page at a time.
pub async fn handle_list(
    state: &AppState,
    collection: &str,
    query: ListQuery,
) -> Result<ListResponse> {
    let schema = state.schema.entity(collection)?;
    let filter = list_filter(schema, &query)?;
    let page = list_page(schema, &query)?;
    let as_of = AsOf::from(query.version);

    let items = read(state, schema, &filter, page.as_ref(), &as_of).await?;

    // Counted under the same as-of selection as the items
    let total = match page {
        Some(_) => {
            let projection = build_projection(&schema.fields, as_of.target());
            Some(
                state
                    .retry
                    .run("count", || {
                        state.documents.count(collection, &filter, Some(&projection))
                    })
                    .await?,
            )
        }
        None => None,
    };

    Ok(ListResponse { items, total })
}

/// Delete an entity and its whole history.
pub async fn handle_delete(state: &AppState, collection: &str, id: &str) -> Result<()> {
    state.schema.entity(collection)?;

    let deleted = state
        .retry
        .run("delete", || state.documents.delete(collection, id))
        .await?;
    if !deleted {
        return Err(EngineError::EntityNotFound(id.to_string()).into());
    }

    tracing::debug!(collection, id, "entity deleted");
    Ok(())
}

fn to_snapshot(id: String, request: SnapshotRequest) -> Result<Snapshot<EntityVersion>> {
    let recorded_at = request.recorded_at.unwrap_or_else(now_millis);
    Ok(Snapshot::new(
        id,
        request.version,
        recorded_at,
        Value::Object(request.fields),
    )?)
}

fn now_millis() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
}

fn list_filter(schema: &EntitySchema, query: &ListQuery) -> Result<Filter> {
    match (&query.field, &query.value) {
        (None, None) => Ok(Filter::All),
        (Some(field), Some(raw)) => {
            schema.check_queryable(field)?;
            let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.clone()));
            Ok(Filter::Eq {
                field: field.clone(),
                value,
            })
        }
        _ => Err(AppError::BadRequest(
            "'field' and 'value' must be given together".to_string(),
        )),
    }
}

fn list_page(schema: &EntitySchema, query: &ListQuery) -> Result<Option<Page>> {
    if query.page.is_none() && query.size.is_none() && query.order_by.is_none() {
        return Ok(None);
    }

    let size = query.size.unwrap_or(DEFAULT_PAGE_SIZE);
    if size == 0 {
        return Err(EngineError::InvalidQuery("page size must be positive".into()).into());
    }

    let mut order = SortOrder::default();
    if let Some(field) = &query.order_by {
        schema.check_queryable(field)?;
        order.field = field.clone();
    }
    if let Some(descending) = query.descending {
        order.descending = descending;
    }

    Ok(Some(Page::new(order, query.page.unwrap_or(0), size)))
}

async fn read(
    state: &AppState,
    schema: &EntitySchema,
    filter: &Filter,
    page: Option<&Page>,
    as_of: &AsOf<EntityVersion>,
) -> Result<Vec<Snapshot<EntityVersion>>> {
    let projection = build_projection(&schema.fields, as_of.target());
    let documents = state
        .retry
        .run("find", || {
            state
                .documents
                .find(&schema.name, filter, Some(&projection), page)
        })
        .await?;

    Ok(materialize(schema, &documents, as_of)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use asof_engine::{FieldDef, FieldType};
    use serde_json::json;

    fn schema() -> EntitySchema {
        EntitySchema::try_new(
            "accounts",
            vec![
                FieldDef::plain("owner", FieldType::String),
                FieldDef::tracked("balance", FieldType::Int),
            ],
        )
        .unwrap()
    }

    #[test]
    fn filter_values_parse_as_json() {
        let query = ListQuery {
            field: Some("owner".into()),
            value: Some("Alice".into()),
            ..Default::default()
        };
        assert_eq!(
            list_filter(&schema(), &query).unwrap(),
            Filter::Eq {
                field: "owner".into(),
                value: json!("Alice")
            }
        );

        let query = ListQuery {
            field: Some("owner".into()),
            value: Some("null".into()),
            ..Default::default()
        };
        assert!(matches!(
            list_filter(&schema(), &query).unwrap(),
            Filter::Eq { value: Value::Null, .. }
        ));
    }

    #[test]
    fn filter_requires_field_and_value() {
        let query = ListQuery {
            field: Some("owner".into()),
            ..Default::default()
        };
        assert!(matches!(
            list_filter(&schema(), &query),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn paging_is_opt_in() {
        assert!(list_page(&schema(), &ListQuery::default()).unwrap().is_none());

        let page = list_page(
            &schema(),
            &ListQuery {
                page: Some(2),
                ..Default::default()
            },
        )
        .unwrap()
        .unwrap();
        assert_eq!(page.order, SortOrder::default());
        assert_eq!(page.size, DEFAULT_PAGE_SIZE);
        assert_eq!(page.offset(), 2 * DEFAULT_PAGE_SIZE);
    }

    #[test]
    fn paging_rejects_tracked_order_and_empty_pages() {
        let tracked = ListQuery {
            order_by: Some("balance".into()),
            ..Default::default()
        };
        assert!(matches!(
            list_page(&schema(), &tracked),
            Err(AppError::Engine(EngineError::InvalidQuery(_)))
        ));

        let empty = ListQuery {
            size: Some(0),
            ..Default::default()
        };
        assert!(matches!(
            list_page(&schema(), &empty),
            Err(AppError::Engine(EngineError::InvalidQuery(_)))
        ));
    }

    #[test]
    fn snapshot_request_defaults() {
        let request: SnapshotRequest =
            serde_json::from_value(json!({"version": 3, "fields": {"balance": 1}})).unwrap();
        assert!(request.id.is_none());

        let snapshot = to_snapshot("a".into(), request).unwrap();
        assert_eq!(snapshot.revision.version, 3);
        assert!(snapshot.revision.recorded_at > 0);

        let request: SnapshotRequest =
            serde_json::from_value(json!({"version": 4, "recordedAt": 1000})).unwrap();
        let snapshot = to_snapshot("a".into(), request).unwrap();
        assert_eq!(snapshot.revision.recorded_at, 1000);
        assert!(snapshot.fields.is_empty());
    }
}
