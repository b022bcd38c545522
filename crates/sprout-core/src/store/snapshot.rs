//! Query snapshots and their provenance

use chrono::{DateTime, Utc};

use super::document::{Document, Query};
use crate::error::SubscriptionError;
use crate::models::Item;

/// Where a snapshot's data was served from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource {
    /// Local cache, not confirmed by a round-trip
    Cache,
    /// Confirmed by the backend
    Server,
}

impl DataSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataSource::Cache => "cache",
            DataSource::Server => "server",
        }
    }
}

/// Provenance flags of a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotMetadata {
    /// Served from the local cache rather than a confirmed round-trip
    pub from_cache: bool,
    /// Locally issued writes in this result are not yet acknowledged
    pub has_pending_writes: bool,
}

/// Immutable, fully ordered view of a query's result
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub query: Query,
    pub documents: Vec<Document>,
    pub metadata: SnapshotMetadata,
    pub read_time: DateTime<Utc>,
}

impl Snapshot {
    /// Documents decoded as task items, malformed ones skipped
    pub fn items(&self) -> Vec<Item> {
        Item::from_documents(&self.documents)
    }

    pub fn source(&self) -> DataSource {
        if self.metadata.from_cache {
            DataSource::Cache
        } else {
            DataSource::Server
        }
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Same result and flags, ignoring read time
    pub(crate) fn same_content(&self, other: &Snapshot) -> bool {
        self.metadata == other.metadata && self.documents == other.documents
    }
}

/// What a live query delivers
pub type SnapshotEvent = Result<Snapshot, SubscriptionError>;
