//! Authentication client
//!
//! Wraps an [`AuthBackend`] and owns the signed-in identity: who is signed
//! in right now, a stream of changes to it, and its persisted session.

use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use super::backend::{AuthBackend, FederatedCredential};
use super::session::SessionStore;
use crate::config::Config;
use crate::error::AuthError;
use crate::models::AuthenticatedIdentity;
use crate::subscription::{Broadcaster, Subscription};

pub struct AuthClient {
    backend: Arc<dyn AuthBackend>,
    session: Option<SessionStore>,
    state: Broadcaster<Option<AuthenticatedIdentity>>,
}

impl AuthClient {
    /// Client without session persistence; starts signed out
    pub fn new(backend: Arc<dyn AuthBackend>) -> Self {
        Self {
            backend,
            session: None,
            state: Broadcaster::new(None),
        }
    }

    /// Client whose session lives in `config.session_path()`
    pub fn open(config: &Config, backend: Arc<dyn AuthBackend>) -> Result<Self> {
        config.ensure_data_dir()?;
        Ok(Self::with_session(backend, SessionStore::new(config.session_path())))
    }

    /// Client that restores and persists its session through `session`
    ///
    /// An unreadable session file is discarded and the client starts signed out.
    pub fn with_session(backend: Arc<dyn AuthBackend>, session: SessionStore) -> Self {
        let restored = match session.load() {
            Ok(identity) => identity,
            Err(e) => {
                warn!("Discarding unreadable session: {:#}", e);
                if let Err(e) = session.clear() {
                    warn!("Failed to remove session file: {:#}", e);
                }
                None
            }
        };

        if let Some(identity) = &restored {
            info!("Restored session for {}", identity.uid);
        }

        Self {
            backend,
            session: Some(session),
            state: Broadcaster::new(restored),
        }
    }

    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthenticatedIdentity, AuthError> {
        match self.backend.create_user(email, password).await {
            Ok(identity) => {
                info!("User signed up: {}", identity.uid);
                self.set_identity(Some(identity.clone()));
                Ok(identity)
            }
            Err(e) => {
                warn!("Sign up error: {} ({})", e, e.code());
                Err(e)
            }
        }
    }

    pub async fn sign_in(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthenticatedIdentity, AuthError> {
        match self.backend.sign_in(email, password).await {
            Ok(identity) => {
                info!("User signed in: {}", identity.uid);
                self.set_identity(Some(identity.clone()));
                Ok(identity)
            }
            Err(e) => {
                warn!("Sign in error: {} ({})", e, e.code());
                Err(e)
            }
        }
    }

    pub async fn sign_in_with_credential(
        &self,
        credential: &FederatedCredential,
    ) -> Result<AuthenticatedIdentity, AuthError> {
        match self.backend.sign_in_with_credential(credential).await {
            Ok(identity) => {
                info!(
                    "User signed in with {}: {}",
                    credential.provider.as_str(),
                    identity.uid
                );
                self.set_identity(Some(identity.clone()));
                Ok(identity)
            }
            Err(e) => {
                warn!(
                    "{} sign in error: {} ({})",
                    credential.provider.as_str(),
                    e,
                    e.code()
                );
                Err(e)
            }
        }
    }

    /// Set the display name of the signed-in user
    pub async fn update_display_name(
        &self,
        display_name: &str,
    ) -> Result<AuthenticatedIdentity, AuthError> {
        let current = self.current_identity().ok_or(AuthError::NotSignedIn)?;
        let identity = self
            .backend
            .update_profile(&current.uid, display_name)
            .await?;
        self.set_identity(Some(identity.clone()));
        Ok(identity)
    }

    /// Sign out; signing out while signed out succeeds
    pub async fn sign_out(&self) -> Result<(), AuthError> {
        let Some(current) = self.current_identity() else {
            return Ok(());
        };

        if let Err(e) = self.backend.sign_out(&current.uid).await {
            warn!("Sign out error: {}", e);
            return Err(e);
        }
        info!("User signed out: {}", current.uid);
        self.set_identity(None);
        Ok(())
    }

    pub fn current_identity(&self) -> Option<AuthenticatedIdentity> {
        self.state.latest()
    }

    /// Stream of identity changes, starting with the current identity
    pub fn on_auth_state_changed(&self) -> Subscription<Option<AuthenticatedIdentity>> {
        self.state.subscribe()
    }

    fn set_identity(&self, identity: Option<AuthenticatedIdentity>) {
        if let Some(session) = &self.session {
            let persisted = match &identity {
                Some(identity) => session.save(identity),
                None => session.clear(),
            };
            // The in-memory session stays authoritative
            if let Err(e) = persisted {
                warn!("Failed to persist session: {:#}", e);
            }
        }
        self.state.emit(identity);
    }
}
