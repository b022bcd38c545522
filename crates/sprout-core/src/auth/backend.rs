//! Authentication backend
//!
//! [`AuthBackend`] is what the authentication service provides: accounts
//! with email and password, federated sign-in, profile updates. Protocol and
//! transport belong to the implementation.
//!
//! [`MemoryAuthBackend`] keeps accounts in process and applies the same
//! rules a hosted service reports through [`AuthError`] codes.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::AuthError;
use crate::models::AuthenticatedIdentity;
use crate::validation::{is_valid_email, MIN_PASSWORD_LEN};

/// Consecutive failed password attempts before an account is locked
pub const MAX_FAILED_ATTEMPTS: u32 = 5;

/// Identity provider behind a federated credential
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FederatedProvider {
    Google,
}

impl FederatedProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            FederatedProvider::Google => "google",
        }
    }
}

/// Token obtained from an identity provider's sign-in flow
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FederatedCredential {
    pub provider: FederatedProvider,
    pub id_token: String,
}

impl FederatedCredential {
    pub fn google(id_token: impl Into<String>) -> Self {
        Self {
            provider: FederatedProvider::Google,
            id_token: id_token.into(),
        }
    }
}

#[async_trait]
pub trait AuthBackend: Send + Sync {
    async fn create_user(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthenticatedIdentity, AuthError>;

    async fn sign_in(&self, email: &str, password: &str)
        -> Result<AuthenticatedIdentity, AuthError>;

    async fn sign_in_with_credential(
        &self,
        credential: &FederatedCredential,
    ) -> Result<AuthenticatedIdentity, AuthError>;

    async fn update_profile(
        &self,
        uid: &str,
        display_name: &str,
    ) -> Result<AuthenticatedIdentity, AuthError>;

    async fn sign_out(&self, uid: &str) -> Result<(), AuthError>;
}

struct Account {
    identity: AuthenticatedIdentity,
    /// `None` for accounts created through a federated provider
    password: Option<String>,
    failed_attempts: u32,
}

struct FederatedProfile {
    email: String,
    display_name: Option<String>,
}

#[derive(Default)]
struct AuthState {
    /// Accounts keyed by normalized email
    accounts: HashMap<String, Account>,
    tokens: HashMap<(FederatedProvider, String), FederatedProfile>,
    unavailable: bool,
}

impl AuthState {
    fn check_available(&self) -> Result<(), AuthError> {
        if self.unavailable {
            return Err(AuthError::NetworkRequestFailed);
        }
        Ok(())
    }

    fn account_by_uid(&mut self, uid: &str) -> Option<&mut Account> {
        self.accounts.values_mut().find(|a| a.identity.uid == uid)
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn new_identity(email: String, display_name: Option<String>, email_verified: bool) -> AuthenticatedIdentity {
    AuthenticatedIdentity {
        uid: Uuid::new_v4().simple().to_string(),
        email,
        display_name,
        email_verified,
        created_at: Utc::now(),
    }
}

/// In-process authentication service
#[derive(Default)]
pub struct MemoryAuthBackend {
    state: Mutex<AuthState>,
}

impl MemoryAuthBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate losing the connection to the service
    pub fn set_available(&self, available: bool) {
        self.lock().unavailable = !available;
    }

    /// Accept `id_token` from `provider` as proof of `email`
    pub fn register_federated_token(
        &self,
        provider: FederatedProvider,
        id_token: impl Into<String>,
        email: impl Into<String>,
        display_name: Option<String>,
    ) {
        self.lock().tokens.insert(
            (provider, id_token.into()),
            FederatedProfile {
                email: normalize_email(&email.into()),
                display_name,
            },
        );
    }

    pub fn account_count(&self) -> usize {
        self.lock().accounts.len()
    }

    fn lock(&self) -> MutexGuard<'_, AuthState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl AuthBackend for MemoryAuthBackend {
    async fn create_user(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthenticatedIdentity, AuthError> {
        let mut state = self.lock();
        state.check_available()?;

        let email = normalize_email(email);
        if !is_valid_email(&email) {
            return Err(AuthError::InvalidEmail);
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AuthError::WeakPassword);
        }
        if state.accounts.contains_key(&email) {
            return Err(AuthError::EmailAlreadyInUse);
        }

        let identity = new_identity(email.clone(), None, false);
        state.accounts.insert(
            email,
            Account {
                identity: identity.clone(),
                password: Some(password.to_string()),
                failed_attempts: 0,
            },
        );
        debug!("Created account {}", identity.uid);
        Ok(identity)
    }

    async fn sign_in(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthenticatedIdentity, AuthError> {
        let mut state = self.lock();
        state.check_available()?;

        let email = normalize_email(email);
        if !is_valid_email(&email) {
            return Err(AuthError::InvalidEmail);
        }
        let Some(account) = state.accounts.get_mut(&email) else {
            return Err(AuthError::UserNotFound);
        };
        if account.failed_attempts >= MAX_FAILED_ATTEMPTS {
            return Err(AuthError::TooManyRequests);
        }

        match &account.password {
            Some(expected) if expected == password => {
                account.failed_attempts = 0;
                Ok(account.identity.clone())
            }
            Some(_) => {
                account.failed_attempts += 1;
                Err(AuthError::WrongPassword)
            }
            None => Err(AuthError::InvalidCredential),
        }
    }

    async fn sign_in_with_credential(
        &self,
        credential: &FederatedCredential,
    ) -> Result<AuthenticatedIdentity, AuthError> {
        let mut state = self.lock();
        state.check_available()?;

        let key = (credential.provider, credential.id_token.clone());
        let Some(profile) = state.tokens.get(&key) else {
            return Err(AuthError::InvalidCredential);
        };
        let email = profile.email.clone();
        let display_name = profile.display_name.clone();

        let account = state.accounts.entry(email.clone()).or_insert_with(|| {
            debug!("Creating account for {} sign-in", credential.provider.as_str());
            Account {
                identity: new_identity(email, display_name, true),
                password: None,
                failed_attempts: 0,
            }
        });
        account.identity.email_verified = true;
        Ok(account.identity.clone())
    }

    async fn update_profile(
        &self,
        uid: &str,
        display_name: &str,
    ) -> Result<AuthenticatedIdentity, AuthError> {
        let mut state = self.lock();
        state.check_available()?;

        let account = state.account_by_uid(uid).ok_or(AuthError::UserNotFound)?;
        account.identity.display_name = Some(display_name.to_string());
        Ok(account.identity.clone())
    }

    async fn sign_out(&self, _uid: &str) -> Result<(), AuthError> {
        self.lock().check_available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_and_sign_in() {
        let backend = MemoryAuthBackend::new();
        let created = backend.create_user("Ada@Example.com ", "secret1").await.unwrap();
        assert_eq!(created.email, "ada@example.com");

        let signed_in = backend.sign_in("ada@example.com", "secret1").await.unwrap();
        assert_eq!(signed_in.uid, created.uid);
    }

    #[tokio::test]
    async fn test_create_user_rules() {
        let backend = MemoryAuthBackend::new();
        assert_eq!(
            backend.create_user("not-an-email", "secret1").await,
            Err(AuthError::InvalidEmail)
        );
        assert_eq!(
            backend.create_user("ada@example.com", "123").await,
            Err(AuthError::WeakPassword)
        );
        backend.create_user("ada@example.com", "secret1").await.unwrap();
        assert_eq!(
            backend.create_user("ada@example.com", "secret2").await,
            Err(AuthError::EmailAlreadyInUse)
        );
        assert_eq!(backend.account_count(), 1);
    }

    #[tokio::test]
    async fn test_sign_in_failures_and_lockout() {
        let backend = MemoryAuthBackend::new();
        assert_eq!(
            backend.sign_in("nobody@example.com", "secret1").await,
            Err(AuthError::UserNotFound)
        );

        backend.create_user("ada@example.com", "secret1").await.unwrap();
        for _ in 0..MAX_FAILED_ATTEMPTS {
            assert_eq!(
                backend.sign_in("ada@example.com", "wrong").await,
                Err(AuthError::WrongPassword)
            );
        }
        assert_eq!(
            backend.sign_in("ada@example.com", "secret1").await,
            Err(AuthError::TooManyRequests)
        );
    }

    #[tokio::test]
    async fn test_successful_sign_in_resets_failures() {
        let backend = MemoryAuthBackend::new();
        backend.create_user("ada@example.com", "secret1").await.unwrap();
        for _ in 0..MAX_FAILED_ATTEMPTS - 1 {
            let _ = backend.sign_in("ada@example.com", "wrong").await;
        }
        backend.sign_in("ada@example.com", "secret1").await.unwrap();
        assert_eq!(
            backend.sign_in("ada@example.com", "wrong").await,
            Err(AuthError::WrongPassword)
        );
        assert!(backend.sign_in("ada@example.com", "secret1").await.is_ok());
    }

    #[tokio::test]
    async fn test_outage_is_network_failure() {
        let backend = MemoryAuthBackend::new();
        backend.set_available(false);
        assert_eq!(
            backend.create_user("ada@example.com", "secret1").await,
            Err(AuthError::NetworkRequestFailed)
        );
        assert_eq!(backend.sign_out("u").await, Err(AuthError::NetworkRequestFailed));
    }

    #[tokio::test]
    async fn test_federated_sign_in_creates_account_once() {
        let backend = MemoryAuthBackend::new();
        backend.register_federated_token(
            FederatedProvider::Google,
            "token-1",
            "grace@example.com",
            Some("Grace".to_string()),
        );

        let credential = FederatedCredential::google("token-1");
        let first = backend.sign_in_with_credential(&credential).await.unwrap();
        let second = backend.sign_in_with_credential(&credential).await.unwrap();
        assert_eq!(first.uid, second.uid);
        assert_eq!(first.display_name.as_deref(), Some("Grace"));
        assert!(first.email_verified);

        assert_eq!(
            backend
                .sign_in_with_credential(&FederatedCredential::google("forged"))
                .await,
            Err(AuthError::InvalidCredential)
        );
        assert_eq!(
            backend.sign_in("grace@example.com", "anything").await,
            Err(AuthError::InvalidCredential)
        );
    }

    #[tokio::test]
    async fn test_update_profile() {
        let backend = MemoryAuthBackend::new();
        let ada = backend.create_user("ada@example.com", "secret1").await.unwrap();
        let updated = backend.update_profile(&ada.uid, "Ada L.").await.unwrap();
        assert_eq!(updated.display_name.as_deref(), Some("Ada L."));
        assert_eq!(
            backend.update_profile("missing", "x").await,
            Err(AuthError::UserNotFound)
        );
    }
}
