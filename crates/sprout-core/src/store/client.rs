//! Offline-first document store client
//!
//! [`DocumentStore`] keeps a local view of the remote collections: the last
//! confirmed documents with every queued write applied on top, in submission
//! order. Live queries are answered from that view immediately and again every
//! time it changes, tagged with where the data came from and whether it
//! includes unacknowledged writes.
//!
//! ## Writes
//!
//! Writes are queued in the local cache first. While the network is enabled
//! the queue is flushed to the [`RemoteBackend`] strictly in order, one write
//! at a time. A transient failure leaves the write at the head of the queue; a
//! permanent one drops it and records a [`RejectedWrite`].
//!
//! ## Remote changes
//!
//! A background task follows the backend's change feed so writes from other
//! clients reach live queries. Changes are applied only when their version is
//! newer than what the client already confirmed.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::backend::{QueryResult, RemoteBackend};
use super::cache::LocalCache;
use super::document::{
    strip_server_fields, Document, Fields, Mutation, PendingWrite, Query, RejectedWrite,
    RemoteChange,
};
use super::snapshot::{Snapshot, SnapshotEvent, SnapshotMetadata};
use crate::config::Config;
use crate::error::{BackendError, StoreError, StoreResult, SubscriptionError, WriteError};
use crate::subscription::{ListenerId, Subscription};

/// Outcome of one pass over the write queue
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlushReport {
    /// Writes acknowledged by the backend
    pub committed: usize,
    /// Writes the backend refused permanently
    pub rejected: usize,
    /// Transient failure that stopped the pass, if any
    pub stalled: Option<BackendError>,
}

impl FlushReport {
    /// Whether the queue was drained without stalling
    pub fn is_complete(&self) -> bool {
        self.stalled.is_none()
    }
}

struct Listener {
    query: Query,
    sender: mpsc::UnboundedSender<SnapshotEvent>,
    /// A server round-trip for this query has completed since going online
    synced: bool,
    last: Option<Snapshot>,
}

struct StoreState {
    cache: LocalCache,
    /// Confirmed documents per collection
    confirmed: HashMap<String, BTreeMap<String, Document>>,
    /// Latest applied version per (collection, id), deletions included
    versions: HashMap<(String, String), u64>,
    pending: VecDeque<PendingWrite>,
    next_seq: u64,
    last_local_time: Option<DateTime<Utc>>,
    network_enabled: bool,
    listeners: HashMap<ListenerId, Listener>,
    next_listener_id: ListenerId,
    rejected: Vec<RejectedWrite>,
}

impl StoreState {
    fn load(cache: LocalCache) -> StoreResult<Self> {
        let mut confirmed: HashMap<String, BTreeMap<String, Document>> = HashMap::new();
        let mut versions = HashMap::new();
        for (collection, doc) in cache.load_documents()? {
            versions.insert((collection.clone(), doc.id.clone()), doc.version);
            confirmed
                .entry(collection)
                .or_default()
                .insert(doc.id.clone(), doc);
        }

        let pending: VecDeque<PendingWrite> = cache.load_pending()?.into();
        let next_seq = pending.back().map(|w| w.seq + 1).unwrap_or(1);
        let last_local_time = pending.iter().map(|w| w.local_time).max();

        Ok(Self {
            cache,
            confirmed,
            versions,
            pending,
            next_seq,
            last_local_time,
            network_enabled: true,
            listeners: HashMap::new(),
            next_listener_id: 0,
            rejected: Vec::new(),
        })
    }

    /// Local timestamp estimate, strictly increasing across writes
    fn next_local_time(&mut self) -> DateTime<Utc> {
        let mut now = Utc::now();
        if let Some(last) = self.last_local_time {
            if now <= last {
                now = last + Duration::microseconds(1);
            }
        }
        self.last_local_time = Some(now);
        now
    }

    /// Confirmed documents with queued writes applied in order
    ///
    /// The flag is set when a queued write touches a document that matches
    /// `query` before or after the write.
    fn local_view(&self, query: &Query) -> (Vec<Document>, bool) {
        let mut docs = self
            .confirmed
            .get(&query.collection)
            .cloned()
            .unwrap_or_default();
        let mut has_pending_writes = false;

        for write in self.pending.iter().filter(|w| w.collection == query.collection) {
            let before = docs.remove(&write.doc_id);
            let matched_before = before.as_ref().is_some_and(|doc| query.matches(doc));
            let after = write.apply_local(before);
            let matched_after = after.as_ref().is_some_and(|doc| query.matches(doc));

            has_pending_writes |= matched_before || matched_after;
            if let Some(doc) = after {
                docs.insert(write.doc_id.clone(), doc);
            }
        }

        (query.apply(docs.values()), has_pending_writes)
    }

    fn contains_local(&self, collection: &str, id: &str) -> bool {
        self.local_view(&Query::collection(collection))
            .0
            .iter()
            .any(|doc| doc.id == id)
    }

    fn snapshot(&self, listener: &Listener) -> Snapshot {
        let (documents, has_pending_writes) = self.local_view(&listener.query);
        Snapshot {
            query: listener.query.clone(),
            documents,
            metadata: SnapshotMetadata {
                from_cache: !(listener.synced && self.network_enabled),
                has_pending_writes,
            },
            read_time: Utc::now(),
        }
    }

    /// Send every listener its current snapshot if it changed
    fn notify(&mut self) {
        let ids: Vec<ListenerId> = self.listeners.keys().copied().collect();
        for id in ids {
            self.notify_listener(id);
        }
    }

    fn notify_listener(&mut self, id: ListenerId) {
        let Some(listener) = self.listeners.get(&id) else {
            return;
        };
        let snapshot = self.snapshot(listener);
        if listener
            .last
            .as_ref()
            .is_some_and(|last| last.same_content(&snapshot))
        {
            return;
        }

        debug!(
            "Data from {}: {} documents, pending writes: {}",
            snapshot.source().as_str(),
            snapshot.len(),
            snapshot.metadata.has_pending_writes
        );

        let delivered = listener.sender.send(Ok(snapshot.clone())).is_ok();
        if delivered {
            if let Some(listener) = self.listeners.get_mut(&id) {
                listener.last = Some(snapshot);
            }
        } else {
            self.listeners.remove(&id);
        }
    }

    fn fail_listeners(&mut self, query: &Query, error: SubscriptionError) {
        for listener in self.listeners.values().filter(|l| &l.query == query) {
            let _ = listener.sender.send(Err(error.clone()));
        }
    }

    fn set_synced(&mut self, query: &Query, synced: bool) {
        for listener in self.listeners.values_mut().filter(|l| &l.query == query) {
            listener.synced = synced;
        }
    }

    fn known_version(&self, collection: &str, id: &str) -> u64 {
        self.versions
            .get(&(collection.to_string(), id.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// Apply a committed change unless something newer is already known
    ///
    /// Returns whether the confirmed state changed.
    fn apply_remote(&mut self, change: &RemoteChange) -> StoreResult<bool> {
        if change.version <= self.known_version(&change.collection, &change.doc_id) {
            return Ok(false);
        }
        self.versions.insert(
            (change.collection.clone(), change.doc_id.clone()),
            change.version,
        );

        let collection = self.confirmed.entry(change.collection.clone()).or_default();
        match &change.document {
            Some(doc) => {
                let mut doc = doc.clone();
                doc.has_pending_writes = false;
                self.cache.put_document(&change.collection, &doc)?;
                collection.insert(change.doc_id.clone(), doc);
            }
            None => {
                collection.remove(&change.doc_id);
                self.cache.remove_document(&change.collection, &change.doc_id)?;
            }
        }
        Ok(true)
    }

    /// Replace the confirmed result of `query` with a server read
    fn apply_query_result(&mut self, query: &Query, result: QueryResult) -> StoreResult<()> {
        let returned: HashSet<String> = result.documents.iter().map(|d| d.id.clone()).collect();

        // Matching documents the server no longer returns were removed by a
        // commit the read already reflects
        let vanished: Vec<String> = self
            .confirmed
            .get(&query.collection)
            .map(|docs| {
                docs.values()
                    .filter(|doc| query.matches(doc))
                    .filter(|doc| !returned.contains(&doc.id))
                    .filter(|doc| doc.version <= result.read_version)
                    .map(|doc| doc.id.clone())
                    .collect()
            })
            .unwrap_or_default();

        for id in vanished {
            if let Some(docs) = self.confirmed.get_mut(&query.collection) {
                docs.remove(&id);
            }
            self.versions
                .insert((query.collection.clone(), id.clone()), result.read_version);
            self.cache.remove_document(&query.collection, &id)?;
        }

        for doc in result.documents {
            let change = RemoteChange {
                collection: query.collection.clone(),
                doc_id: doc.id.clone(),
                version: doc.version,
                document: Some(doc),
            };
            self.apply_remote(&change)?;
        }
        Ok(())
    }

    fn push_write(
        &mut self,
        collection: &str,
        doc_id: &str,
        mutation: Mutation,
    ) -> Result<PendingWrite, WriteError> {
        let write = PendingWrite {
            seq: self.next_seq,
            collection: collection.to_string(),
            doc_id: doc_id.to_string(),
            mutation,
            local_time: self.next_local_time(),
        };
        self.cache.push_pending(&write)?;
        self.next_seq += 1;
        self.pending.push_back(write.clone());
        self.notify();
        Ok(write)
    }

    /// Drop the head of the queue once the backend has answered for it
    fn finish_write(&mut self, seq: u64) -> StoreResult<()> {
        self.cache.remove_pending(seq)?;
        if self.pending.front().is_some_and(|w| w.seq == seq) {
            self.pending.pop_front();
        }
        Ok(())
    }

    fn distinct_queries(&self) -> Vec<Query> {
        let mut queries: Vec<Query> = Vec::new();
        for listener in self.listeners.values() {
            if !queries.contains(&listener.query) {
                queries.push(listener.query.clone());
            }
        }
        queries
    }
}

struct Shared {
    backend: Arc<dyn RemoteBackend>,
    state: Mutex<StoreState>,
    /// Serializes flushes so the queue is committed strictly in order
    flush_lock: tokio::sync::Mutex<()>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn flush(&self) -> Result<FlushReport, WriteError> {
        let _guard = self.flush_lock.lock().await;
        let mut report = FlushReport::default();

        loop {
            let write = {
                let state = self.lock();
                if !state.network_enabled {
                    break;
                }
                match state.pending.front() {
                    Some(write) => write.clone(),
                    None => break,
                }
            };

            let result = self.backend.commit(&write).await;
            let mut state = self.lock();
            match result {
                Ok(change) => {
                    state.finish_write(write.seq)?;
                    state.apply_remote(&change)?;
                    state.notify();
                    report.committed += 1;
                }
                Err(error) if error.is_transient() => {
                    warn!(
                        "Write {} to {}/{} stays queued: {}",
                        write.mutation.kind(),
                        write.collection,
                        write.doc_id,
                        error
                    );
                    report.stalled = Some(error);
                    break;
                }
                Err(error) => {
                    warn!(
                        "Write {} to {}/{} rejected: {}",
                        write.mutation.kind(),
                        write.collection,
                        write.doc_id,
                        error
                    );
                    state.finish_write(write.seq)?;
                    state.rejected.push(RejectedWrite { write, error });
                    state.notify();
                    report.rejected += 1;
                }
            }
        }

        if report.committed > 0 || report.rejected > 0 {
            debug!(
                "Flushed write queue: {} committed, {} rejected",
                report.committed, report.rejected
            );
        }
        Ok(report)
    }

    /// Fetch `query` from the backend and fold the result into the view
    async fn refresh_query(&self, query: &Query) {
        let result = self.backend.query(query).await;
        let mut state = self.lock();
        if !state.network_enabled {
            return;
        }

        match result {
            Ok(result) => {
                if let Err(e) = state.apply_query_result(query, result) {
                    warn!("Failed to cache server result for {}: {}", query.collection, e);
                    state.fail_listeners(query, SubscriptionError::Cache(e.to_string()));
                    return;
                }
                state.set_synced(query, true);
                state.notify();
            }
            Err(error) if error.is_transient() => {
                warn!(
                    "Query on {} served from cache: {}",
                    query.collection, error
                );
            }
            Err(error) => {
                warn!("Query on {} failed: {}", query.collection, error);
                state.fail_listeners(query, SubscriptionError::Backend(error));
            }
        }
    }

    async fn refresh_all(&self) {
        let queries = self.lock().distinct_queries();
        for query in queries {
            self.refresh_query(&query).await;
        }
    }
}

/// Follow the backend's change feed until the store goes away
async fn watch_remote(shared: Weak<Shared>, mut feed: broadcast::Receiver<RemoteChange>) {
    loop {
        match feed.recv().await {
            Ok(change) => {
                let Some(shared) = shared.upgrade() else {
                    break;
                };
                let mut state = shared.lock();
                if !state.network_enabled {
                    continue;
                }
                match state.apply_remote(&change) {
                    Ok(true) => state.notify(),
                    Ok(false) => {}
                    Err(e) => warn!("Failed to cache remote change {}: {}", change.doc_id, e),
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                let Some(shared) = shared.upgrade() else {
                    break;
                };
                warn!("Change feed lagged by {} changes, refetching", skipped);
                if shared.lock().network_enabled {
                    shared.refresh_all().await;
                }
            }
            Err(RecvError::Closed) => break,
        }
    }
    debug!("Change feed closed");
}

fn new_document_id() -> String {
    Uuid::new_v4().simple().to_string()
}

fn object_fields(data: Value) -> Result<Fields, WriteError> {
    match data {
        Value::Object(fields) => Ok(strip_server_fields(fields)),
        other => Err(WriteError::InvalidData(format!(
            "document data must be an object, got {}",
            other
        ))),
    }
}

fn check_collection(collection: &str) -> Result<(), WriteError> {
    if collection.trim().is_empty() {
        return Err(WriteError::InvalidData(
            "collection name must not be empty".to_string(),
        ));
    }
    Ok(())
}

/// Client for a remote document database with an offline cache
///
/// Cheap to share behind an `Arc`. Requires a tokio runtime for the change
/// feed and background query fetches.
pub struct DocumentStore {
    shared: Arc<Shared>,
    watcher: Option<JoinHandle<()>>,
}

impl DocumentStore {
    /// Open the store with the cache configured in `config`
    pub fn open(config: &Config, backend: Arc<dyn RemoteBackend>) -> Result<Self> {
        let cache = if config.cache_persistence {
            let path = config.cache_path();
            LocalCache::open(&path)
                .with_context(|| format!("Failed to open cache at {:?}", path))?
        } else {
            LocalCache::open_in_memory().context("Failed to open in-memory cache")?
        };
        Self::with_cache(cache, backend)
    }

    /// Open the store over an in-memory cache
    pub fn in_memory(backend: Arc<dyn RemoteBackend>) -> Result<Self> {
        let cache = LocalCache::open_in_memory().context("Failed to open in-memory cache")?;
        Self::with_cache(cache, backend)
    }

    /// Open the store over an existing cache
    pub fn with_cache(cache: LocalCache, backend: Arc<dyn RemoteBackend>) -> Result<Self> {
        let state = StoreState::load(cache).context("Failed to load cached documents")?;
        let pending = state.pending.len();

        let feed = backend.changes();
        let shared = Arc::new(Shared {
            backend,
            state: Mutex::new(state),
            flush_lock: tokio::sync::Mutex::new(()),
        });

        let watcher = match tokio::runtime::Handle::try_current() {
            Ok(handle) => Some(handle.spawn(watch_remote(Arc::downgrade(&shared), feed))),
            Err(_) => {
                warn!("No async runtime; remote changes will only arrive through queries");
                None
            }
        };

        info!("Document store opened with {} queued writes", pending);
        Ok(Self { shared, watcher })
    }

    // ==================== Writes ====================

    /// Add a document with a store-assigned id
    ///
    /// `createdAt` and `updatedAt` are assigned by the backend; values for
    /// them in `data` are ignored.
    pub async fn add(&self, collection: &str, data: Value) -> Result<String, WriteError> {
        check_collection(collection)?;
        let fields = object_fields(data)?;
        let doc_id = new_document_id();

        let write = self
            .shared
            .lock()
            .push_write(collection, &doc_id, Mutation::Set(fields))?;
        info!("Document added with ID: {}", doc_id);

        self.settle(&write).await?;
        Ok(doc_id)
    }

    /// Merge `data` into an existing document
    pub async fn update(&self, collection: &str, id: &str, data: Value) -> Result<(), WriteError> {
        check_collection(collection)?;
        let fields = object_fields(data)?;

        let write = {
            let mut state = self.shared.lock();
            if !state.contains_local(collection, id) {
                return Err(WriteError::NotFound {
                    collection: collection.to_string(),
                    id: id.to_string(),
                });
            }
            state.push_write(collection, id, Mutation::Update(fields))?
        };
        info!("Document updated: {}", id);

        self.settle(&write).await
    }

    /// Delete a document; deleting a missing document succeeds
    pub async fn delete(&self, collection: &str, id: &str) -> Result<(), WriteError> {
        check_collection(collection)?;
        let write = self.shared.lock().push_write(collection, id, Mutation::Delete)?;
        info!("Document deleted: {}", id);

        self.settle(&write).await
    }

    /// Flush if online and report a permanent rejection of `write`
    async fn settle(&self, write: &PendingWrite) -> Result<(), WriteError> {
        if !self.is_network_enabled() {
            debug!("Network disabled, write {} queued", write.seq);
            return Ok(());
        }

        self.shared.flush().await?;

        let mut state = self.shared.lock();
        match state.rejected.iter().position(|r| r.write.seq == write.seq) {
            Some(index) => Err(state.rejected.remove(index).into()),
            None => Ok(()),
        }
    }

    /// Push queued writes to the backend now
    pub async fn flush(&self) -> Result<FlushReport, WriteError> {
        self.shared.flush().await
    }

    /// Permanent rejections of queued writes, oldest first
    ///
    /// Each rejection is returned once.
    pub fn take_rejected_writes(&self) -> Vec<RejectedWrite> {
        std::mem::take(&mut self.shared.lock().rejected)
    }

    pub fn pending_write_count(&self) -> usize {
        self.shared.lock().pending.len()
    }

    // ==================== Queries ====================

    /// Register a live query
    ///
    /// The current local result is delivered immediately. While the network
    /// is enabled the query is also fetched from the backend.
    pub fn subscribe(&self, query: Query) -> Subscription<SnapshotEvent> {
        let (sender, rx) = mpsc::unbounded_channel();

        let (id, network_enabled) = {
            let mut state = self.shared.lock();
            let id = state.next_listener_id;
            state.next_listener_id += 1;
            state.listeners.insert(
                id,
                Listener {
                    query: query.clone(),
                    sender,
                    synced: false,
                    last: None,
                },
            );
            state.notify_listener(id);
            (id, state.network_enabled)
        };
        debug!("Listener {} registered on {}", id, query.collection);

        if network_enabled {
            self.spawn_refresh(query);
        }

        let weak = Arc::downgrade(&self.shared);
        Subscription::new(rx, move || {
            if let Some(shared) = weak.upgrade() {
                shared.lock().listeners.remove(&id);
                debug!("Listener {} removed", id);
            }
        })
    }

    fn spawn_refresh(&self, query: Query) {
        let shared = Arc::clone(&self.shared);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    shared.refresh_query(&query).await;
                });
            }
            Err(_) => warn!("No async runtime; query on {} stays on cache", query.collection),
        }
    }

    /// Current local result of `query` without contacting the backend
    pub fn cached_documents(&self, query: &Query) -> Vec<Document> {
        self.shared.lock().local_view(query).0
    }

    pub fn listener_count(&self) -> usize {
        self.shared.lock().listeners.len()
    }

    // ==================== Network ====================

    /// Allow or forbid contact with the backend
    ///
    /// Disabling marks every live query as cache-served. Enabling flushes the
    /// write queue in submission order and refetches every live query.
    pub async fn set_network_enabled(&self, enabled: bool) -> Result<(), WriteError> {
        {
            let mut state = self.shared.lock();
            let was_enabled = state.network_enabled;
            state.network_enabled = enabled;

            if !enabled {
                for listener in state.listeners.values_mut() {
                    listener.synced = false;
                }
                state.notify();
                if was_enabled {
                    info!("Network disabled - app will work offline");
                }
                return Ok(());
            }

            if !was_enabled {
                info!("Network enabled - app will sync with server");
            }
        }

        let report = self.shared.flush().await?;
        if let Some(error) = &report.stalled {
            warn!("Backend unreachable, {} writes still queued: {}", self.pending_write_count(), error);
        }
        self.shared.refresh_all().await;
        Ok(())
    }

    pub fn is_network_enabled(&self) -> bool {
        self.shared.lock().network_enabled
    }

    // ==================== Cache ====================

    /// Wipe the offline cache
    ///
    /// Refused while live queries are registered or writes are queued.
    pub fn clear_cache(&self) -> Result<(), StoreError> {
        let mut state = self.shared.lock();
        if !state.listeners.is_empty() || !state.pending.is_empty() {
            return Err(StoreError::CacheInUse {
                active_listeners: state.listeners.len(),
                pending_writes: state.pending.len(),
            });
        }

        state.cache.clear()?;
        state.confirmed.clear();
        state.versions.clear();
        info!("Offline cache cleared");
        Ok(())
    }
}

impl Drop for DocumentStore {
    fn drop(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
    }
}
