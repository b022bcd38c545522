//! Home screen: the signed-in user's task list
//!
//! Three independent streams drive the state: the signed-in identity, device
//! connectivity and snapshots of the user's items. [`HomeViewModel::step`]
//! applies whichever event arrives next; each event runs to completion before
//! the next one is taken.
//!
//! User actions issue writes and never touch `items` directly. The list only
//! changes when a snapshot arrives, which happens right away for local writes.

use std::collections::VecDeque;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use super::Notification;
use crate::auth::AuthClient;
use crate::error::{AuthError, WriteError};
use crate::models::{AuthenticatedIdentity, ConnectionType, ConnectivityState, Item, NewItem};
use crate::network::NetworkMonitor;
use crate::store::{DataSource, DocumentStore, Mutation, Query, SnapshotEvent};
use crate::subscription::Subscription;
use crate::validation::validate_item_text;

/// Status badge shown above the list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    /// Device has no connectivity
    Offline,
    /// Local writes are not yet acknowledged
    Pending,
    /// Everything shown is confirmed
    Synced,
}

impl SyncStatus {
    pub fn label(&self) -> &'static str {
        match self {
            SyncStatus::Offline => "Offline",
            SyncStatus::Pending => "Pending",
            SyncStatus::Synced => "Synced",
        }
    }

    /// Badge color as a hex string
    pub fn color(&self) -> &'static str {
        match self {
            SyncStatus::Offline => "#dc3545",
            SyncStatus::Pending => "#ffc107",
            SyncStatus::Synced => "#28a745",
        }
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

fn write_error_title(mutation: &Mutation) -> &'static str {
    match mutation {
        Mutation::Set(_) => "Add Error",
        Mutation::Update(_) => "Update Error",
        Mutation::Delete => "Delete Error",
    }
}

async fn next_snapshot(
    snapshots: &mut Option<Subscription<SnapshotEvent>>,
) -> Option<SnapshotEvent> {
    match snapshots {
        Some(subscription) => subscription.recv().await,
        None => None,
    }
}

pub struct HomeViewModel {
    store: Arc<DocumentStore>,
    auth: Arc<AuthClient>,
    collection: String,
    auth_events: Subscription<Option<AuthenticatedIdentity>>,
    network_events: Subscription<ConnectivityState>,
    /// The single live query for the signed-in user
    snapshots: Option<Subscription<SnapshotEvent>>,
    notifications: VecDeque<Notification>,

    /// Signed-in user
    pub identity: Option<AuthenticatedIdentity>,
    /// Items of the latest snapshot, in snapshot order
    pub items: Vec<Item>,
    /// Latest snapshot contained unacknowledged writes
    pub has_pending_writes: bool,
    /// Latest device connectivity
    pub connectivity: ConnectivityState,
    /// Provenance of the latest snapshot
    pub data_source: Option<DataSource>,
    /// Waiting for the first snapshot of a new subscription
    pub loading: bool,
    /// A pull-to-refresh is running
    pub refreshing: bool,
}

impl HomeViewModel {
    /// Build the view-model and subscribe for the current identity, if any
    pub fn new(
        store: Arc<DocumentStore>,
        auth: Arc<AuthClient>,
        network: &NetworkMonitor,
        collection: impl Into<String>,
    ) -> Self {
        let auth_events = auth.on_auth_state_changed();
        let network_events = network.observe();
        let identity = auth.current_identity();

        let mut vm = Self {
            store,
            auth,
            collection: collection.into(),
            auth_events,
            network_events,
            snapshots: None,
            notifications: VecDeque::new(),
            identity: None,
            items: Vec::new(),
            has_pending_writes: false,
            connectivity: network.current(),
            data_source: None,
            loading: false,
            refreshing: false,
        };
        vm.apply_auth_change(identity);
        vm
    }

    // ==================== Derived state ====================

    /// Badge by priority: offline, then pending, then synced
    pub fn sync_status(&self) -> SyncStatus {
        if !self.connectivity.is_connected {
            SyncStatus::Offline
        } else if self.has_pending_writes {
            SyncStatus::Pending
        } else {
            SyncStatus::Synced
        }
    }

    pub fn connection_type(&self) -> ConnectionType {
        self.connectivity.connection_type
    }

    /// Whether the store may contact the backend (the network toggle)
    pub fn is_network_enabled(&self) -> bool {
        self.store.is_network_enabled()
    }

    /// Whether a live query is registered
    pub fn is_subscribed(&self) -> bool {
        self.snapshots.is_some()
    }

    pub fn take_notifications(&mut self) -> Vec<Notification> {
        self.notifications.drain(..).collect()
    }

    // ==================== Events ====================

    /// Wait for the next event from any stream and apply it
    ///
    /// Returns `false` once every stream has ended.
    pub async fn step(&mut self) -> bool {
        tokio::select! {
            Some(identity) = self.auth_events.recv() => {
                self.apply_auth_change(identity);
                true
            }
            Some(state) = self.network_events.recv() => {
                self.apply_connectivity(state);
                true
            }
            Some(event) = next_snapshot(&mut self.snapshots) => {
                self.apply_snapshot(event);
                true
            }
            else => false,
        }
    }

    /// Follow a change of the signed-in identity
    ///
    /// A different user replaces the live query, unsubscribing the old one
    /// and clearing the list first; the same user only refreshes the profile.
    pub fn apply_auth_change(&mut self, identity: Option<AuthenticatedIdentity>) {
        match identity {
            Some(identity) => {
                let same_user = self
                    .identity
                    .as_ref()
                    .is_some_and(|current| current.uid == identity.uid);
                if same_user && self.snapshots.is_some() {
                    self.identity = Some(identity);
                    return;
                }

                self.reset_list();
                info!("Subscribing to items of {}", identity.uid);
                let query = Query::owned_by(self.collection.clone(), identity.uid.clone());
                self.snapshots = Some(self.store.subscribe(query));
                self.identity = Some(identity);
                self.loading = true;
            }
            None => {
                if self.identity.is_some() {
                    info!("Signed out, clearing items");
                }
                self.reset_list();
                self.identity = None;
            }
        }
    }

    /// Replace the list with a snapshot, or report a query failure
    ///
    /// A failure keeps the current list and the subscription.
    pub fn apply_snapshot(&mut self, event: SnapshotEvent) {
        match event {
            Ok(snapshot) => {
                let current_owner = self.identity.as_ref().map(|i| i.uid.as_str());
                if snapshot.query.owner.as_deref() != current_owner {
                    debug!("Ignoring snapshot for a previous user");
                    return;
                }

                debug!(
                    "Snapshot from {}: {} items, pending writes: {}",
                    snapshot.source().as_str(),
                    snapshot.len(),
                    snapshot.metadata.has_pending_writes
                );
                self.items = snapshot.items();
                self.has_pending_writes = snapshot.metadata.has_pending_writes;
                self.data_source = Some(snapshot.source());
                self.loading = false;
            }
            Err(e) => {
                warn!("Snapshot error: {}", e);
                self.loading = false;
                self.notify_error("Data Error", e.to_string());
            }
        }
    }

    /// Record device connectivity; the live query is left alone
    pub fn apply_connectivity(&mut self, state: ConnectivityState) {
        debug!(
            "Connectivity: connected={}, type={}",
            state.is_connected, state.connection_type
        );
        self.connectivity = state;
    }

    fn reset_list(&mut self) {
        if let Some(mut snapshots) = self.snapshots.take() {
            snapshots.unsubscribe();
        }
        self.items.clear();
        self.has_pending_writes = false;
        self.data_source = None;
        self.loading = false;
    }

    // ==================== Actions ====================

    /// Add an item for the signed-in user
    pub async fn add_item(&mut self, text: &str) -> bool {
        let text = match validate_item_text(text) {
            Ok(text) => text,
            Err(e) => {
                self.notify_error("Error", e.to_string());
                return false;
            }
        };
        let Some(owner) = self.identity.as_ref().map(|i| i.uid.clone()) else {
            self.notify_error("Add Error", AuthError::NotSignedIn.to_string());
            return false;
        };

        let fields = NewItem::new(text, owner).to_fields();
        let result = self.store.add(&self.collection, Value::Object(fields)).await;
        self.finish_write("Add Error", result.map(|_| ()))
    }

    /// Flip the completion flag of an item in the list
    pub async fn toggle_item(&mut self, id: &str) -> bool {
        let item = match self.owned_item(id) {
            Ok(item) => item,
            Err(message) => {
                self.notify_error("Update Error", message);
                return false;
            }
        };

        let fields = item.toggle_fields();
        let result = self
            .store
            .update(&self.collection, id, Value::Object(fields))
            .await;
        self.finish_write("Update Error", result)
    }

    /// Delete an item in the list
    pub async fn delete_item(&mut self, id: &str) -> bool {
        if let Err(message) = self.owned_item(id) {
            self.notify_error("Delete Error", message);
            return false;
        }

        let result = self.store.delete(&self.collection, id).await;
        self.finish_write("Delete Error", result)
    }

    /// Stop contacting the backend; writes queue locally
    pub async fn go_offline(&mut self) -> bool {
        match self.store.set_network_enabled(false).await {
            Ok(()) => {
                self.notifications.push_back(Notification::info(
                    "Offline Mode",
                    "Network disabled. The app will now work offline.",
                ));
                true
            }
            Err(e) => {
                self.notify_error("Network Error", e.to_string());
                false
            }
        }
    }

    /// Resume contacting the backend and flush queued writes
    pub async fn go_online(&mut self) -> bool {
        let result = self.store.set_network_enabled(true).await;
        self.report_rejected_writes();
        match result {
            Ok(()) => {
                self.notifications.push_back(Notification::info(
                    "Online Mode",
                    "Network enabled. Syncing data...",
                ));
                true
            }
            Err(e) => {
                self.notify_error("Network Error", e.to_string());
                false
            }
        }
    }

    /// Pull-to-refresh: go online and refetch the list
    pub async fn refresh(&mut self) {
        self.refreshing = true;
        if let Err(e) = self.store.set_network_enabled(true).await {
            self.notify_error("Data Error", e.to_string());
        }
        self.report_rejected_writes();
        self.refreshing = false;
    }

    pub async fn sign_out(&mut self) -> bool {
        match self.auth.sign_out().await {
            Ok(()) => {
                self.apply_auth_change(None);
                true
            }
            Err(e) => {
                self.notify_error("Sign Out Error", e.to_string());
                false
            }
        }
    }

    fn finish_write(&mut self, title: &str, result: Result<(), WriteError>) -> bool {
        let ok = match result {
            Ok(()) => true,
            Err(e) => {
                warn!("{}: {}", title, e);
                self.notify_error(title, e.to_string());
                false
            }
        };
        self.report_rejected_writes();
        ok
    }

    /// Surface queued writes the backend refused after their callers returned
    fn report_rejected_writes(&mut self) {
        for rejected in self.store.take_rejected_writes() {
            let title = write_error_title(&rejected.write.mutation);
            let error = WriteError::from(rejected);
            self.notify_error(title, error.to_string());
        }
    }

    /// An item of the shown list that belongs to the signed-in user
    fn owned_item(&self, id: &str) -> Result<Item, String> {
        let Some(uid) = self.identity.as_ref().map(|i| i.uid.as_str()) else {
            return Err(AuthError::NotSignedIn.to_string());
        };
        self.items
            .iter()
            .find(|item| item.id == id && item.owner_id == uid)
            .cloned()
            .ok_or_else(|| {
                WriteError::NotFound {
                    collection: self.collection.clone(),
                    id: id.to_string(),
                }
                .to_string()
            })
    }

    fn notify_error(&mut self, title: &str, message: String) {
        self.notifications
            .push_back(Notification::error(title, message));
    }
}

impl Drop for HomeViewModel {
    fn drop(&mut self) {
        if let Some(mut snapshots) = self.snapshots.take() {
            snapshots.unsubscribe();
        }
    }
}
