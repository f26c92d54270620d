//! # asof engine
//!
//! Per-field revision history for documents in a document database.
//!
//! Entities are declared with a field table. Plain fields keep only their
//! latest value; tracked fields keep every distinct value in a revision log.
//! Any past state can be rebuilt with an "as of version V" read, and bulk
//! reads ask the store to return only the revision current at V for each
//! tracked field instead of whole histories.
//!
//! ## Design Principles
//!
//! - **No IO in the core**: merge, reconstruction and projection are pure
//! - **All or nothing**: a rejected update never leaves partial changes
//! - **Sparse history**: unchanged values are never re-recorded
//! - **Explicit schema**: field behavior comes from declarations, not from
//!   inspecting values
//!
//! ## Core Concepts
//!
//! ### Revisions
//!
//! A [`Revision`] is an immutable (value, version) pair. A [`RevisionLog`]
//! keeps them in strictly increasing version order and answers "latest" and
//! "latest at or before V". Versions are any totally ordered type; see
//! [`Version`].
//!
//! ### Entities
//!
//! Callers submit and receive [`Snapshot`]s. Snapshots fold into a
//! [`VersionedEntity`] through the merge engine ([`merge::accept`]), which
//! rejects anything not newer than the entity with
//! [`Error::OldVersionInsertion`].
//!
//! ### Reads
//!
//! [`reconstruct`] rebuilds a snapshot at a version. [`build_projection`]
//! builds the store-side request that slices histories before they are
//! returned. Stores that compare encoded versions themselves need an
//! [`OrderedEncoding`] version type.
//!
//! ## Quick Start
//!
//! ```rust
//! use asof_engine::{EntitySchema, FieldDef, FieldType, MemoryStore, Repository, Snapshot};
//! use serde_json::json;
//!
//! // 1. Declare the entity
//! let schema = EntitySchema::try_new(
//!     "accounts",
//!     vec![
//!         FieldDef::plain("owner", FieldType::String),
//!         FieldDef::tracked("balance", FieldType::Int),
//!     ],
//! )
//! .unwrap();
//!
//! // 2. Create a repository over a store
//! let mut repo: Repository<_, u64> = Repository::new(MemoryStore::new(), schema);
//!
//! // 3. Write two versions
//! let v1 = Snapshot::new("acct-1", 1, 1706745600000, json!({"owner": "Alice", "balance": 10})).unwrap();
//! repo.insert(&v1).unwrap();
//! let v2 = Snapshot::new("acct-1", 2, 1706745660000, json!({"owner": "Alice", "balance": 25})).unwrap();
//! repo.update(&v2).unwrap();
//!
//! // 4. Read the past
//! let then = repo.get_at("acct-1", &1).unwrap().unwrap();
//! assert_eq!(then.fields["balance"], json!(10));
//! ```

pub mod document;
pub mod entity;
pub mod error;
pub mod log;
pub mod merge;
pub mod projection;
pub mod reconstruct;
pub mod repository;
pub mod revision;
pub mod schema;
pub mod store;

// Re-export main types at crate root
pub use document::{from_document, to_document, Document};
pub use entity::{FieldHistory, RevisionMarker, Snapshot, VersionedEntity};
pub use error::{Error, StoreError, StoreErrorKind};
pub use log::RevisionLog;
pub use merge::MergeOutcome;
pub use projection::{build_projection, AsOfProjection, ElementFilter, FieldProjection};
pub use reconstruct::{reconstruct, reconstruct_sliced, AsOf};
pub use repository::{materialize, merge_document, prepare_insert, Repository};
pub use revision::{OrderedEncoding, Revision, Version};
pub use schema::{EntitySchema, Equality, FieldDef, FieldKind, FieldType, Schema};
pub use store::{DocumentStore, Filter, MemoryStore, Page, SortOrder};

/// Type aliases for clarity
pub type EntityId = String;
pub type Timestamp = u64;
pub type SchemaVersion = u32;
