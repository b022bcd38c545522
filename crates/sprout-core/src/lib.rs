//! Sprout Core Library
//!
//! This crate provides the core functionality for Sprout, an offline-first
//! task list with user accounts, synced through a remote document store.
//!
//! # Architecture
//!
//! - **DocumentStore**: local view of the remote collections (confirmed
//!   documents plus queued writes), served to live queries with provenance
//! - **SQLite**: offline cache for documents and the write queue
//! - **View-models**: reconcile identity, connectivity and snapshots into
//!   what a screen shows
//!
//! Remote services sit behind the `RemoteBackend` and `AuthBackend` traits.
//!
//! # Quick Start
//!
//! ```text
//! let config = Config::load()?;
//! init_logging(&config)?;
//!
//! let store = Arc::new(DocumentStore::open(&config, backend)?);
//! let auth = Arc::new(AuthClient::open(&config, auth_backend)?);
//! let network = NetworkMonitor::default();
//!
//! let mut home = HomeViewModel::new(store, auth, &network, &config.collection);
//! home.add_item("Water the ferns").await;
//! while home.step().await {
//!     render(&home.items, home.sync_status());
//! }
//! ```
//!
//! # Modules
//!
//! - `store`: Document store client, backend seam and offline cache
//! - `auth`: Authentication client and session persistence
//! - `network`: Device connectivity monitor
//! - `viewmodel`: Home and authentication screen state
//! - `models`: Items, connectivity and identity
//! - `validation`: Form checks
//! - `subscription`: Cancellable listener handles
//! - `config`: Application configuration
//! - `logging`: Tracing subscriber setup

pub mod auth;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod network;
pub mod store;
pub mod subscription;
pub mod validation;
pub mod viewmodel;

pub use auth::{AuthBackend, AuthClient, FederatedCredential, MemoryAuthBackend, SessionStore};
pub use config::Config;
pub use error::{
    AuthError, BackendError, FormError, StoreError, SubscriptionError, ValidationError, WriteError,
};
pub use logging::init_logging;
pub use models::{AuthenticatedIdentity, ConnectionType, ConnectivityState, Item, NewItem};
pub use network::NetworkMonitor;
pub use store::{
    DataSource, Document, DocumentStore, MemoryBackend, Query, RemoteBackend, Snapshot,
    SnapshotEvent,
};
pub use subscription::Subscription;
pub use validation::RegistrationForm;
pub use viewmodel::{AuthViewModel, HomeViewModel, Notification, SyncStatus};
