//! Login and registration screens
//!
//! Only one authentication attempt runs at a time, whatever the method.
//! A second attempt while one is in flight fails with
//! [`AuthError::InProgress`] without reaching the backend, and is reported
//! like any other failure of that action.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{info, warn};

use super::Notification;
use crate::auth::{AuthClient, FederatedCredential};
use crate::error::{AuthError, FormError};
use crate::models::AuthenticatedIdentity;
use crate::validation::{validate_login, validate_registration, RegistrationForm};

pub struct AuthViewModel {
    auth: Arc<AuthClient>,
    /// Held for the duration of an attempt
    gate: tokio::sync::Mutex<()>,
    notifications: Mutex<Vec<Notification>>,
}

impl AuthViewModel {
    pub fn new(auth: Arc<AuthClient>) -> Self {
        Self {
            auth,
            gate: tokio::sync::Mutex::new(()),
            notifications: Mutex::new(Vec::new()),
        }
    }

    /// An attempt is in flight; buttons should be disabled
    pub fn is_busy(&self) -> bool {
        self.gate.try_lock().is_err()
    }

    pub fn take_notifications(&self) -> Vec<Notification> {
        std::mem::take(&mut *self.lock_notifications())
    }

    pub async fn sign_in_with_email(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthenticatedIdentity, FormError> {
        if let Err(e) = validate_login(email, password) {
            self.notify(Notification::error("Error", e.to_string()));
            return Err(e.into());
        }

        let _attempt = self.begin("Login Failed")?;
        match self.auth.sign_in(email.trim(), password).await {
            Ok(identity) => Ok(identity),
            Err(e) => {
                self.notify(Notification::error("Login Failed", e.to_string()));
                Err(e.into())
            }
        }
    }

    /// Create an account, then set its display name
    pub async fn register(
        &self,
        form: &RegistrationForm,
    ) -> Result<AuthenticatedIdentity, FormError> {
        if let Err(e) = validate_registration(form) {
            self.notify(Notification::error("Error", e.to_string()));
            return Err(e.into());
        }

        let _attempt = self.begin("Registration Failed")?;
        let result = match self.auth.sign_up(form.email.trim(), &form.password).await {
            Ok(_) => self.auth.update_display_name(form.full_name.trim()).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(identity) => {
                info!("Registration complete for {}", identity.uid);
                self.notify(Notification::info("Success", "Account created successfully!"));
                Ok(identity)
            }
            Err(e) => {
                self.notify(Notification::error("Registration Failed", e.to_string()));
                Err(e.into())
            }
        }
    }

    /// Sign in with a token from an identity provider
    ///
    /// A cancelled provider flow is not reported to the user.
    pub async fn sign_in_with_federated(
        &self,
        credential: &FederatedCredential,
    ) -> Result<AuthenticatedIdentity, FormError> {
        let _attempt = self.begin("Google Sign-In Failed")?;
        match self.auth.sign_in_with_credential(credential).await {
            Ok(identity) => Ok(identity),
            Err(AuthError::Cancelled) => {
                info!("Federated sign-in cancelled");
                Err(AuthError::Cancelled.into())
            }
            Err(e) => {
                warn!("Federated sign-in failed: {}", e);
                self.notify(Notification::error("Google Sign-In Failed", e.to_string()));
                Err(e.into())
            }
        }
    }

    /// Report a provider-side failure that happened before a token existed
    pub fn report_federated_failure(&self, error: AuthError) {
        if error != AuthError::Cancelled {
            self.notify(Notification::error(
                "Google Sign-In Failed",
                error.to_string(),
            ));
        }
    }

    /// Take the gate, or report that another attempt holds it
    fn begin(&self, title: &str) -> Result<tokio::sync::MutexGuard<'_, ()>, AuthError> {
        self.gate.try_lock().map_err(|_| {
            self.notify(Notification::error(title, AuthError::InProgress.to_string()));
            AuthError::InProgress
        })
    }

    fn notify(&self, notification: Notification) {
        self.lock_notifications().push(notification);
    }

    fn lock_notifications(&self) -> MutexGuard<'_, Vec<Notification>> {
        self.notifications
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthBackend, FederatedProvider, MemoryAuthBackend};
    use crate::error::ValidationError;
    use async_trait::async_trait;
    use tokio::sync::Notify;

    fn form() -> RegistrationForm {
        RegistrationForm {
            full_name: "Ada Gardener".to_string(),
            email: "ada@example.com".to_string(),
            password: "secret1".to_string(),
            confirm_password: "secret1".to_string(),
            agree_to_terms: true,
        }
    }

    fn view_model() -> (Arc<AuthClient>, AuthViewModel) {
        let auth = Arc::new(AuthClient::new(Arc::new(MemoryAuthBackend::new())));
        (auth.clone(), AuthViewModel::new(auth))
    }

    /// Backend whose sign-in waits until released
    struct SlowBackend {
        inner: MemoryAuthBackend,
        release: Notify,
    }

    #[async_trait]
    impl AuthBackend for SlowBackend {
        async fn create_user(
            &self,
            email: &str,
            password: &str,
        ) -> Result<AuthenticatedIdentity, AuthError> {
            self.inner.create_user(email, password).await
        }

        async fn sign_in(
            &self,
            email: &str,
            password: &str,
        ) -> Result<AuthenticatedIdentity, AuthError> {
            self.release.notified().await;
            self.inner.sign_in(email, password).await
        }

        async fn sign_in_with_credential(
            &self,
            credential: &FederatedCredential,
        ) -> Result<AuthenticatedIdentity, AuthError> {
            self.inner.sign_in_with_credential(credential).await
        }

        async fn update_profile(
            &self,
            uid: &str,
            display_name: &str,
        ) -> Result<AuthenticatedIdentity, AuthError> {
            self.inner.update_profile(uid, display_name).await
        }

        async fn sign_out(&self, uid: &str) -> Result<(), AuthError> {
            self.inner.sign_out(uid).await
        }
    }

    #[tokio::test]
    async fn test_register_sets_display_name() {
        let (auth, vm) = view_model();
        let identity = vm.register(&form()).await.unwrap();
        assert_eq!(identity.display_name.as_deref(), Some("Ada Gardener"));
        assert_eq!(auth.current_identity(), Some(identity));

        let notes = vm.take_notifications();
        assert_eq!(notes[0].title, "Success");
        assert_eq!(notes[0].message, "Account created successfully!");
    }

    #[tokio::test]
    async fn test_register_validation_stops_early() {
        let (_auth, vm) = view_model();
        let mut f = form();
        f.confirm_password = "different".to_string();

        let err = vm.register(&f).await.unwrap_err();
        assert_eq!(err, FormError::Validation(ValidationError::PasswordMismatch));
        let notes = vm.take_notifications();
        assert_eq!(notes[0].title, "Error");
        assert_eq!(notes[0].message, "Passwords do not match");
    }

    #[tokio::test]
    async fn test_duplicate_registration_fails() {
        let (_auth, vm) = view_model();
        vm.register(&form()).await.unwrap();
        vm.take_notifications();

        let err = vm.register(&form()).await.unwrap_err();
        assert_eq!(err, FormError::Auth(AuthError::EmailAlreadyInUse));
        assert_eq!(vm.take_notifications()[0].title, "Registration Failed");
    }

    #[tokio::test]
    async fn test_login_failures_are_notified() {
        let (_auth, vm) = view_model();
        assert_eq!(
            vm.sign_in_with_email("", "").await.unwrap_err(),
            FormError::Validation(ValidationError::MissingFields)
        );
        assert_eq!(
            vm.sign_in_with_email("ghost@example.com", "secret1")
                .await
                .unwrap_err(),
            FormError::Auth(AuthError::UserNotFound)
        );

        let notes = vm.take_notifications();
        assert_eq!(notes[0].message, "Please fill in all fields");
        assert_eq!(notes[1].title, "Login Failed");
        assert_eq!(notes[1].message, "No account found with this email.");
    }

    #[tokio::test]
    async fn test_one_attempt_at_a_time() {
        let backend = Arc::new(SlowBackend {
            inner: MemoryAuthBackend::new(),
            release: Notify::new(),
        });
        backend
            .inner
            .register_federated_token(FederatedProvider::Google, "tok", "ada@example.com", None);
        backend.inner.create_user("ada@example.com", "secret1").await.unwrap();

        let vm = Arc::new(AuthViewModel::new(Arc::new(AuthClient::new(backend.clone()))));
        let first = tokio::spawn({
            let vm = vm.clone();
            async move { vm.sign_in_with_email("ada@example.com", "secret1").await }
        });

        while !vm.is_busy() {
            tokio::task::yield_now().await;
        }
        let err = vm
            .sign_in_with_federated(&FederatedCredential::google("tok"))
            .await
            .unwrap_err();
        assert_eq!(err, FormError::Auth(AuthError::InProgress));

        backend.release.notify_one();
        assert!(first.await.unwrap().is_ok());
        assert!(!vm.is_busy());

        let notes = vm.take_notifications();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].title, "Google Sign-In Failed");
        assert_eq!(notes[0].message, "Sign-in already in progress.");
    }

    #[tokio::test]
    async fn test_federated_failures() {
        let (_auth, vm) = view_model();
        let err = vm
            .sign_in_with_federated(&FederatedCredential::google("unknown"))
            .await
            .unwrap_err();
        assert_eq!(err, FormError::Auth(AuthError::InvalidCredential));

        vm.report_federated_failure(AuthError::Cancelled);
        vm.report_federated_failure(AuthError::PlayServicesNotAvailable);

        let titles: Vec<String> = vm.take_notifications().into_iter().map(|n| n.title).collect();
        assert_eq!(titles, vec!["Google Sign-In Failed", "Google Sign-In Failed"]);
    }
}
