//! Application-facing repository.
//!
//! Ties the pieces together for one entity type: writes go through the merge
//! engine as a read–merge–write against the store, reads go through the as-of
//! projection so only the revision current at the target leaves the store.
//!
//! The store-independent steps are also exported as free functions
//! ([`prepare_insert`], [`merge_document`], [`materialize`]) for callers that
//! drive their own, possibly asynchronous, store I/O.
//!
//! There is no compare-and-swap between the read and the write of an update.
//! Two writers racing on the same entity can lose one of the updates.

use crate::document::{from_document, to_document, Document};
use crate::entity::{Snapshot, VersionedEntity};
use crate::merge::{accept, MergeOutcome};
use crate::projection::{build_projection, AsOfProjection};
use crate::reconstruct::{reconstruct_sliced, AsOf};
use crate::revision::Version;
use crate::schema::EntitySchema;
use crate::store::{DocumentStore, Filter, Page, SortOrder};
use crate::{error::Result, Error};
use std::marker::PhantomData;
use tracing::{debug, warn};

/// Merge the first snapshot of a new entity and encode its document.
pub fn prepare_insert<V: Version>(
    schema: &EntitySchema,
    snapshot: &Snapshot<V>,
) -> Result<(Document, MergeOutcome<V>)> {
    let mut entity = VersionedEntity::empty(snapshot.id.clone());
    let outcome = accept(&mut entity, schema, snapshot)?;
    Ok((to_document(&entity, schema)?, outcome))
}

/// Merge `snapshot` into a whole stored document, returning the document to
/// write back.
pub fn merge_document<V: Version>(
    schema: &EntitySchema,
    document: &Document,
    snapshot: &Snapshot<V>,
) -> Result<(Document, MergeOutcome<V>)> {
    let mut entity: VersionedEntity<V> = from_document(document, schema)?;

    let outcome = match accept(&mut entity, schema, snapshot) {
        Ok(outcome) => outcome,
        Err(err @ Error::OldVersionInsertion { .. }) => {
            warn!(collection = %schema.name, id = %snapshot.id, %err, "stale update rejected");
            return Err(err);
        }
        Err(err) => return Err(err),
    };

    Ok((to_document(&entity, schema)?, outcome))
}

/// Rebuild snapshots from documents read through an as-of projection.
///
/// Documents with no revision at the target are skipped.
pub fn materialize<V: Version>(
    schema: &EntitySchema,
    documents: &[Document],
    as_of: &AsOf<V>,
) -> Result<Vec<Snapshot<V>>> {
    let mut snapshots = Vec::with_capacity(documents.len());
    for document in documents {
        let entity = from_document(document, schema)?;
        if let Some(snapshot) = reconstruct_sliced(&entity, schema, as_of) {
            snapshots.push(snapshot);
        }
    }
    Ok(snapshots)
}

/// Versioned access to one entity type stored in `S`.
#[derive(Debug)]
pub struct Repository<S, V> {
    store: S,
    schema: EntitySchema,
    _version: PhantomData<fn() -> V>,
}

impl<S: DocumentStore, V: Version> Repository<S, V> {
    pub fn new(store: S, schema: EntitySchema) -> Self {
        Self {
            store,
            schema,
            _version: PhantomData,
        }
    }

    pub fn schema(&self) -> &EntitySchema {
        &self.schema
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    fn collection(&self) -> &str {
        &self.schema.name
    }

    /// Create a new entity from its first snapshot.
    pub fn insert(&mut self, snapshot: &Snapshot<V>) -> Result<MergeOutcome<V>> {
        let (document, outcome) = prepare_insert(&self.schema, snapshot)?;

        self.store.insert(&self.schema.name, document)?;
        debug!(
            collection = %self.schema.name,
            id = %snapshot.id,
            version = %outcome.version,
            "entity created"
        );
        Ok(outcome)
    }

    /// Accept a new snapshot of an existing entity.
    ///
    /// Reads the whole stored history, merges, and writes the whole document
    /// back. A stale version is rejected before anything is written.
    pub fn update(&mut self, snapshot: &Snapshot<V>) -> Result<MergeOutcome<V>> {
        let stored = self
            .store
            .get_by_id(self.collection(), &snapshot.id)?
            .ok_or_else(|| Error::EntityNotFound(snapshot.id.clone()))?;
        let (document, outcome) = merge_document(&self.schema, &stored, snapshot)?;

        self.store
            .replace_whole(&self.schema.name, &snapshot.id, document)?;

        debug!(
            collection = %self.schema.name,
            id = %snapshot.id,
            version = %outcome.version,
            changed = ?outcome.changed,
            "entity updated"
        );
        Ok(outcome)
    }

    /// The full stored history of an entity.
    pub fn load(&self, id: &str) -> Result<VersionedEntity<V>> {
        let document = self
            .store
            .get_by_id(self.collection(), id)?
            .ok_or_else(|| Error::EntityNotFound(id.to_string()))?;
        from_document(&document, &self.schema)
    }

    /// Latest state of an entity.
    pub fn get_latest(&self, id: &str) -> Result<Option<Snapshot<V>>> {
        self.get(id, AsOf::Latest)
    }

    /// State of an entity as of `version`.
    ///
    /// `None` when the entity does not exist or was created after `version`.
    pub fn get_at(&self, id: &str, version: &V) -> Result<Option<Snapshot<V>>> {
        self.get(id, AsOf::At(version.clone()))
    }

    fn get(&self, id: &str, as_of: AsOf<V>) -> Result<Option<Snapshot<V>>> {
        Ok(self
            .read(&Filter::Id(id.to_string()), None, &as_of)?
            .into_iter()
            .next())
    }

    /// Every entity, at its latest state or as of `version`.
    ///
    /// Entities created after `version` are left out.
    pub fn find_all(&self, version: Option<&V>) -> Result<Vec<Snapshot<V>>> {
        self.find(&Filter::All, version)
    }

    /// Entities matching `filter`, at their latest state or as of `version`.
    pub fn find(&self, filter: &Filter, version: Option<&V>) -> Result<Vec<Snapshot<V>>> {
        self.check_filter(filter)?;
        self.read(filter, None, &AsOf::from(version.cloned()))
    }

    /// One page of entities matching `filter`, ordered by `order`.
    ///
    /// With a `version`, entities created after it take no place in the
    /// ordering.
    pub fn find_page(
        &self,
        filter: &Filter,
        order: SortOrder,
        page_index: usize,
        page_size: usize,
        version: Option<&V>,
    ) -> Result<Vec<Snapshot<V>>> {
        self.check_filter(filter)?;
        self.schema.check_queryable(&order.field)?;
        if page_size == 0 {
            return Err(Error::InvalidQuery("page size must be positive".into()));
        }

        let page = Page::new(order, page_index, page_size);
        self.read(filter, Some(&page), &AsOf::from(version.cloned()))
    }

    /// Number of entities matching `filter` that existed at `version`, or
    /// that exist now.
    pub fn count(&self, filter: &Filter, version: Option<&V>) -> Result<usize> {
        self.check_filter(filter)?;
        let projection = self.projection(version);
        self.store
            .count(self.collection(), filter, Some(&projection))
    }

    /// Remove an entity and its whole history.
    pub fn delete(&mut self, id: &str) -> Result<bool> {
        let removed = self.store.delete_by_id(&self.schema.name, id)?;
        debug!(collection = %self.schema.name, id, removed, "entity deleted");
        Ok(removed)
    }

    /// The projection a read at `version` sends to the store.
    pub fn projection(&self, version: Option<&V>) -> AsOfProjection<V> {
        build_projection(&self.schema.fields, version)
    }

    fn read(&self, filter: &Filter, page: Option<&Page>, as_of: &AsOf<V>) -> Result<Vec<Snapshot<V>>> {
        let projection = self.projection(as_of.target());
        let documents = self
            .store
            .find(self.collection(), filter, Some(&projection), page)?;

        materialize(&self.schema, &documents, as_of)
    }

    fn check_filter(&self, filter: &Filter) -> Result<()> {
        match filter {
            Filter::Eq { field, .. } => self.schema.check_queryable(field),
            Filter::All | Filter::Id(_) => Ok(()),
        }
    }
}
