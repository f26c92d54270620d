//! Document store boundary.
//!
//! [`DocumentStore`] is everything the engine needs from a document database:
//! whole-document writes, filtered reads with an as-of projection, and
//! deletion. [`MemoryStore`] is an in-process implementation that evaluates
//! projections itself.

use crate::document::{compare_values, Document, ID_KEY};
use crate::projection::AsOfProjection;
use crate::revision::Version;
use crate::{error::Result, EntityId, Error, StoreError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

/// Which documents a read selects.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Filter {
    /// Every document in the collection.
    #[default]
    All,
    /// The document with this id.
    Id(EntityId),
    /// Documents whose top-level `field` equals `value`.
    Eq { field: String, value: Value },
}

impl Filter {
    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Filter::All => true,
            Filter::Id(id) => doc.get(ID_KEY).and_then(Value::as_str) == Some(id.as_str()),
            Filter::Eq { field, value } => doc.get(field).unwrap_or(&Value::Null) == value,
        }
    }
}

/// Sort key for paged reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SortOrder {
    pub field: String,
    pub descending: bool,
}

impl SortOrder {
    pub fn ascending(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: false,
        }
    }

    pub fn descending(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: true,
        }
    }

    fn compare(&self, a: &Document, b: &Document) -> Ordering {
        let ka = a.get(&self.field).unwrap_or(&Value::Null);
        let kb = b.get(&self.field).unwrap_or(&Value::Null);
        let ord = compare_values(ka, kb).unwrap_or(Ordering::Equal);
        if self.descending {
            ord.reverse()
        } else {
            ord
        }
    }
}

impl Default for SortOrder {
    /// Newest ids first.
    fn default() -> Self {
        Self::descending(ID_KEY)
    }
}

/// One page of an ordered read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub order: SortOrder,
    /// Zero-based page index
    pub index: usize,
    pub size: usize,
}

impl Page {
    pub fn new(order: SortOrder, index: usize, size: usize) -> Self {
        Self { order, index, size }
    }

    pub fn offset(&self) -> usize {
        self.index.saturating_mul(self.size)
    }
}

/// What the engine needs from a document database.
///
/// Implementations report their own failures as [`Error::Store`] with a
/// transient/fatal classification; they never see the versioning rules.
pub trait DocumentStore {
    /// Insert a new document. Fails with [`Error::EntityAlreadyExists`] when
    /// the id is taken.
    fn insert(&mut self, collection: &str, document: Document) -> Result<()>;

    /// Replace a whole document. Fails with [`Error::EntityNotFound`] when the
    /// id does not exist.
    fn replace_whole(&mut self, collection: &str, id: &str, document: Document) -> Result<()>;

    /// Read one whole document.
    fn get_by_id(&self, collection: &str, id: &str) -> Result<Option<Document>>;

    /// Read documents, optionally projected and paged.
    ///
    /// A projection with a target selects only documents that existed at it
    /// (see [`AsOfProjection::existed`]). Selection and ordering happen before
    /// paging; the projection is applied to the documents that are returned.
    fn find<V: Version>(
        &self,
        collection: &str,
        filter: &Filter,
        projection: Option<&AsOfProjection<V>>,
        page: Option<&Page>,
    ) -> Result<Vec<Document>>;

    /// Remove a document and all its history. Returns whether it existed.
    fn delete_by_id(&mut self, collection: &str, id: &str) -> Result<bool>;

    /// Number of documents [`find`](Self::find) selects without paging.
    fn count<V: Version>(
        &self,
        collection: &str,
        filter: &Filter,
        projection: Option<&AsOfProjection<V>>,
    ) -> Result<usize> {
        Ok(self.find(collection, filter, projection, None)?.len())
    }
}

/// In-memory [`DocumentStore`].
///
/// Documents live in `BTreeMap`s keyed by id, so unordered reads come back in
/// id order.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    collections: HashMap<String, BTreeMap<EntityId, Document>>,
    fail_next_write: Option<StoreError>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next write fail with `error`.
    pub fn fail_next_write(&mut self, error: StoreError) {
        self.fail_next_write = Some(error);
    }

    /// Number of documents in a collection.
    pub fn len(&self, collection: &str) -> usize {
        self.collections.get(collection).map_or(0, BTreeMap::len)
    }

    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }

    /// Raw stored document, bypassing projections.
    pub fn raw(&self, collection: &str, id: &str) -> Option<&Document> {
        self.collections.get(collection)?.get(id)
    }

    fn check_failure(&mut self) -> Result<()> {
        match self.fail_next_write.take() {
            Some(err) => Err(Error::Store(err)),
            None => Ok(()),
        }
    }

    /// Documents matching `filter` that existed at the projection's target.
    fn select<V: Version>(
        &self,
        collection: &str,
        filter: &Filter,
        projection: Option<&AsOfProjection<V>>,
    ) -> Result<Vec<&Document>> {
        let Some(docs) = self.collections.get(collection) else {
            return Ok(Vec::new());
        };

        let candidates: Vec<&Document> = match filter {
            Filter::Id(id) => docs.get(id).into_iter().collect(),
            _ => docs.values().filter(|d| filter.matches(d)).collect(),
        };

        let mut selected = Vec::with_capacity(candidates.len());
        for doc in candidates {
            if projection.map_or(Ok(true), |p| p.existed(doc))? {
                selected.push(doc);
            }
        }
        Ok(selected)
    }

    fn document_id(document: &Document) -> Result<EntityId> {
        document
            .get(ID_KEY)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::InvalidDocument("missing string 'id'".into()))
    }
}

impl DocumentStore for MemoryStore {
    fn insert(&mut self, collection: &str, document: Document) -> Result<()> {
        self.check_failure()?;
        let id = Self::document_id(&document)?;
        let docs = self.collections.entry(collection.to_string()).or_default();
        if docs.contains_key(&id) {
            return Err(Error::EntityAlreadyExists(id));
        }
        docs.insert(id, document);
        Ok(())
    }

    fn replace_whole(&mut self, collection: &str, id: &str, document: Document) -> Result<()> {
        self.check_failure()?;
        if Self::document_id(&document)? != id {
            return Err(Error::InvalidDocument(format!(
                "replacement for '{id}' carries a different id"
            )));
        }
        let slot = self
            .collections
            .get_mut(collection)
            .and_then(|docs| docs.get_mut(id))
            .ok_or_else(|| Error::EntityNotFound(id.to_string()))?;
        *slot = document;
        Ok(())
    }

    fn get_by_id(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        Ok(self.raw(collection, id).cloned())
    }

    fn find<V: Version>(
        &self,
        collection: &str,
        filter: &Filter,
        projection: Option<&AsOfProjection<V>>,
        page: Option<&Page>,
    ) -> Result<Vec<Document>> {
        let mut selected = self.select(collection, filter, projection)?;

        if let Some(page) = page {
            selected.sort_by(|a, b| page.order.compare(a, b));
            selected = selected
                .into_iter()
                .skip(page.offset())
                .take(page.size)
                .collect();
        }

        selected
            .into_iter()
            .map(|doc| {
                let mut doc = doc.clone();
                if let Some(projection) = projection {
                    projection.apply(&mut doc)?;
                }
                Ok(doc)
            })
            .collect()
    }

    fn count<V: Version>(
        &self,
        collection: &str,
        filter: &Filter,
        projection: Option<&AsOfProjection<V>>,
    ) -> Result<usize> {
        Ok(self.select(collection, filter, projection)?.len())
    }

    fn delete_by_id(&mut self, collection: &str, id: &str) -> Result<bool> {
        self.check_failure()?;
        Ok(self
            .collections
            .get_mut(collection)
            .is_some_and(|docs| docs.remove(id).is_some()))
    }
}
