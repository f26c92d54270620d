//! Database operations for the documents table.
//!
//! Each row holds one entity document in the layout produced by
//! `asof_engine::to_document`. Reads compile the engine's as-of projection to
//! JSONB expressions so that only the revision current at the requested
//! version leaves the database.

use asof_engine::{AsOfProjection, Document, ElementFilter, Filter, OrderedEncoding, Page};
use sqlx::{PgPool, Postgres, QueryBuilder, Row};

const ID_COLUMN: &str = "id";

/// A stored document row from the database.
#[derive(Debug)]
pub struct StoredDocument {
    pub collection: String,
    pub id: String,
    pub document: serde_json::Value,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for StoredDocument {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(StoredDocument {
            collection: row.try_get("collection")?,
            id: row.try_get("id")?,
            document: row.try_get("document")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl StoredDocument {
    /// Unwrap the JSONB column into an engine document.
    pub fn into_document(self) -> Result<Document, sqlx::Error> {
        match self.document {
            serde_json::Value::Object(map) => Ok(map),
            other => Err(sqlx::Error::Decode(
                format!(
                    "document {}/{} is not an object: {}",
                    self.collection, self.id, other
                )
                .into(),
            )),
        }
    }
}

/// The `documents` table as a store of entity documents.
///
/// Every method maps one-to-one onto a SQL statement; retries and the
/// versioning rules live with the callers.
#[derive(Debug, Clone)]
pub struct PgDocuments {
    pool: PgPool,
}

impl PgDocuments {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a new document. Returns `false` when the id is already taken.
    pub async fn insert(
        &self,
        collection: &str,
        id: &str,
        document: &Document,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO documents (collection, id, document)
            VALUES ($1, $2, $3)
            ON CONFLICT (collection, id) DO NOTHING
            "#,
        )
        .bind(collection)
        .bind(id)
        .bind(sqlx::types::Json(document))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Replace a whole document. Returns `false` when the id does not exist.
    pub async fn replace(
        &self,
        collection: &str,
        id: &str,
        document: &Document,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE documents
            SET document = $3, updated_at = now()
            WHERE collection = $1 AND id = $2
            "#,
        )
        .bind(collection)
        .bind(id)
        .bind(sqlx::types::Json(document))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Get a whole document, history included.
    pub async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, sqlx::Error> {
        sqlx::query_as::<_, StoredDocument>(
            r#"
            SELECT collection, id, document, updated_at
            FROM documents
            WHERE collection = $1 AND id = $2
            "#,
        )
        .bind(collection)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .map(StoredDocument::into_document)
        .transpose()
    }

    /// Read documents, optionally projected and paged.
    ///
    /// A projection with a target also selects only documents that existed at
    /// it, before ordering and paging.
    pub async fn find<V: OrderedEncoding>(
        &self,
        collection: &str,
        filter: &Filter,
        projection: Option<&AsOfProjection<V>>,
        page: Option<&Page>,
    ) -> Result<Vec<Document>, sqlx::Error> {
        let mut query = find_query(collection, filter, projection, page);
        query
            .build_query_as::<StoredDocument>()
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(StoredDocument::into_document)
            .collect()
    }

    /// Count the documents [`find`](Self::find) selects without paging.
    pub async fn count<V: OrderedEncoding>(
        &self,
        collection: &str,
        filter: &Filter,
        projection: Option<&AsOfProjection<V>>,
    ) -> Result<i64, sqlx::Error> {
        let mut query = count_query(collection, filter, projection);
        query.build_query_scalar::<i64>().fetch_one(&self.pool).await
    }

    /// Delete a document and its whole history. Returns whether it existed.
    pub async fn delete(&self, collection: &str, id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM documents WHERE collection = $1 AND id = $2")
            .bind(collection)
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }
}

fn find_query<'a, V: OrderedEncoding>(
    collection: &str,
    filter: &Filter,
    projection: Option<&AsOfProjection<V>>,
    page: Option<&Page>,
) -> QueryBuilder<'a, Postgres> {
    let mut query = QueryBuilder::<Postgres>::new("SELECT collection, id, ");
    push_document(&mut query, projection);
    query.push(" AS document, updated_at FROM documents WHERE collection = ");
    query.push_bind(collection.to_string());
    push_filter(&mut query, filter);
    push_existed(&mut query, projection);

    if let Some(page) = page {
        push_order(&mut query, page);
        query.push(" LIMIT ");
        query.push_bind(page.size as i64);
        query.push(" OFFSET ");
        query.push_bind(page.offset() as i64);
    }

    query
}

fn count_query<'a, V: OrderedEncoding>(
    collection: &str,
    filter: &Filter,
    projection: Option<&AsOfProjection<V>>,
) -> QueryBuilder<'a, Postgres> {
    let mut query =
        QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM documents WHERE collection = ");
    query.push_bind(collection.to_string());
    push_filter(&mut query, filter);
    push_existed(&mut query, projection);
    query
}

/// The `document` column, with every projected field replaced by its sliced
/// history:
///
/// ```sql
/// document || jsonb_build_object('f', COALESCE((
///     SELECT jsonb_agg(h.e ORDER BY h.ord) FROM (
///         SELECT e, ord FROM jsonb_array_elements(COALESCE(document -> 'f', '[]'))
///             WITH ORDINALITY AS t(e, ord)
///         WHERE e -> 'version' <= $v
///         ORDER BY ord DESC LIMIT 1
///     ) h), '[]'))
/// ```
fn push_document<V: OrderedEncoding>(
    query: &mut QueryBuilder<'_, Postgres>,
    projection: Option<&AsOfProjection<V>>,
) {
    query.push("document");

    let Some(projection) = projection.filter(|p| !p.is_empty()) else {
        return;
    };

    query.push(" || jsonb_build_object(");
    for (i, field) in projection.fields.iter().enumerate() {
        if i > 0 {
            query.push(", ");
        }
        query.push_bind(field.field.clone());
        query.push(", COALESCE((SELECT jsonb_agg(h.e ORDER BY h.ord) FROM (SELECT e, ord FROM jsonb_array_elements(COALESCE(document -> ");
        query.push_bind(field.field.clone());
        query.push(", '[]'::jsonb)) WITH ORDINALITY AS t(e, ord)");

        match &field.filter {
            Some(ElementFilter::VersionLte(max)) => {
                query.push(" WHERE e -> 'version' <= ");
                query.push_bind(max.sort_key());
            }
            None => {}
        }

        if field.slice < 0 {
            query.push(" ORDER BY ord DESC LIMIT ");
        } else {
            query.push(" ORDER BY ord ASC LIMIT ");
        }
        query.push_bind(field.slice.saturating_abs());
        query.push(") h), '[]'::jsonb)");
    }
    query.push(")");
}

fn push_filter(query: &mut QueryBuilder<'_, Postgres>, filter: &Filter) {
    match filter {
        Filter::All => {}
        Filter::Id(id) => {
            query.push(" AND id = ");
            query.push_bind(id.clone());
        }
        Filter::Eq { field, value } if field == ID_COLUMN => {
            query.push(" AND to_jsonb(id) = ");
            query.push_bind(value.clone());
        }
        Filter::Eq { field, value } => {
            query.push(" AND COALESCE(document -> ");
            query.push_bind(field.clone());
            query.push(", 'null'::jsonb) = ");
            query.push_bind(value.clone());
        }
    }
}

/// Keep documents with a revision marker at or before the target.
fn push_existed<V: OrderedEncoding>(
    query: &mut QueryBuilder<'_, Postgres>,
    projection: Option<&AsOfProjection<V>>,
) {
    let Some(target) = projection.and_then(AsOfProjection::target) else {
        return;
    };
    query.push(
        " AND EXISTS (SELECT 1 FROM jsonb_array_elements(COALESCE(document -> 'revisions', '[]'::jsonb)) r \
         WHERE r -> 'version' <= ",
    );
    query.push_bind(target.sort_key());
    query.push(")");
}

/// Missing values sort before everything else, as in the engine's ordering.
fn push_order(query: &mut QueryBuilder<'_, Postgres>, page: &Page) {
    let direction = if page.order.descending {
        " DESC NULLS LAST"
    } else {
        " ASC NULLS FIRST"
    };

    if page.order.field == ID_COLUMN {
        query.push(" ORDER BY id");
        query.push(direction);
    } else {
        query.push(" ORDER BY document -> ");
        query.push_bind(page.order.field.clone());
        query.push(direction);
        query.push(", id");
        query.push(direction);
    }
}
