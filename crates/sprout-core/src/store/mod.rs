//! Remote document store client with an offline cache
//!
//! - `document`: documents, queries and queued mutations
//! - `snapshot`: query results tagged with provenance
//! - `backend`: the remote backend seam and its in-process implementation
//! - `cache`: SQLite persistence for documents and the write queue
//! - `client`: [`DocumentStore`], the entry point

mod backend;
mod cache;
mod client;
mod document;
mod snapshot;

pub use backend::{MemoryBackend, QueryResult, RemoteBackend};
pub use cache::{get_schema_version, init_schema, needs_init, LocalCache, SCHEMA_VERSION};
pub use client::{DocumentStore, FlushReport};
pub use document::{
    Document, Fields, Mutation, PendingWrite, Query, RejectedWrite, RemoteChange,
};
pub use snapshot::{DataSource, Snapshot, SnapshotEvent, SnapshotMetadata};
