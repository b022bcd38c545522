//! Error types
//!
//! Every error that can reach a screen carries a user-facing message in its
//! `Display` impl. Callers at the action boundary turn them into
//! notifications; nothing here is meant to crash the application.

use std::path::PathBuf;
use thiserror::Error;

/// Failures reported by a remote collaborator (document store backend)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Backend could not be reached; the operation may succeed later
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Target document does not exist on the backend
    #[error("No document to update: {collection}/{id}")]
    NotFound { collection: String, id: String },

    /// Caller is not allowed to perform the operation
    #[error("Missing or insufficient permissions: {0}")]
    PermissionDenied(String),

    /// Request was malformed
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl BackendError {
    /// Transient failures leave queued writes in place for a later flush
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Unavailable(_))
    }
}

/// Local cache failures
#[derive(Error, Debug)]
pub enum StoreError {
    /// Failed to create the directory that holds the cache
    #[error("Failed to create cache directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// SQLite error
    #[error("Cache database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Cached payload could not be (de)serialized
    #[error("Cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Cache cannot be cleared while it is being used
    #[error("Cache is in use: {active_listeners} active listener(s), {pending_writes} pending write(s)")]
    CacheInUse {
        active_listeners: usize,
        pending_writes: usize,
    },
}

/// Result type for local cache operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Failure writing to the document store
#[derive(Error, Debug)]
pub enum WriteError {
    /// Update target is not present
    #[error("No document to update: {collection}/{id}")]
    NotFound { collection: String, id: String },

    /// Payload is not a document
    #[error("Invalid document data: {0}")]
    InvalidData(String),

    /// Backend permanently refused the write; it has been rolled back locally
    #[error("Write to {collection}/{id} was rejected: {source}")]
    Rejected {
        collection: String,
        id: String,
        #[source]
        source: BackendError,
    },

    /// Write could not be queued in the local cache
    #[error("Failed to queue write locally: {0}")]
    Cache(#[from] StoreError),
}

/// Failure delivering a live query; the listener stays registered
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionError {
    /// Backend refused or failed the query
    #[error("{0}")]
    Backend(BackendError),

    /// Local cache could not be read
    #[error("Failed to read cached documents: {0}")]
    Cache(String),
}

/// Categorical authentication failure
///
/// Variants mirror the codes an authentication backend reports; `Display`
/// is the message shown to the user.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("No account found with this email.")]
    UserNotFound,

    #[error("Incorrect password.")]
    WrongPassword,

    #[error("An account with this email already exists.")]
    EmailAlreadyInUse,

    #[error("Password should be at least 6 characters.")]
    WeakPassword,

    #[error("Please enter a valid email address.")]
    InvalidEmail,

    #[error("Network error. Please check your connection.")]
    NetworkRequestFailed,

    #[error("Too many failed attempts. Please try again later.")]
    TooManyRequests,

    #[error("The supplied credential is invalid or has expired.")]
    InvalidCredential,

    #[error("Sign-in cancelled by user.")]
    Cancelled,

    #[error("Sign-in already in progress.")]
    InProgress,

    #[error("Google Play Services not available.")]
    PlayServicesNotAvailable,

    #[error("No user is signed in.")]
    NotSignedIn,

    /// Anything the backend reports without a known code
    #[error("{0}")]
    Other(String),
}

impl AuthError {
    /// Backend error code for this failure
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::UserNotFound => "auth/user-not-found",
            AuthError::WrongPassword => "auth/wrong-password",
            AuthError::EmailAlreadyInUse => "auth/email-already-in-use",
            AuthError::WeakPassword => "auth/weak-password",
            AuthError::InvalidEmail => "auth/invalid-email",
            AuthError::NetworkRequestFailed => "auth/network-request-failed",
            AuthError::TooManyRequests => "auth/too-many-requests",
            AuthError::InvalidCredential => "auth/invalid-credential",
            AuthError::Cancelled => "sign-in-cancelled",
            AuthError::InProgress => "in-progress",
            AuthError::PlayServicesNotAvailable => "play-services-not-available",
            AuthError::NotSignedIn => "auth/no-current-user",
            AuthError::Other(_) => "unknown",
        }
    }

    /// Map a backend error code to its category
    pub fn from_code(code: &str, message: Option<&str>) -> Self {
        match code {
            "auth/user-not-found" => AuthError::UserNotFound,
            "auth/wrong-password" => AuthError::WrongPassword,
            "auth/email-already-in-use" => AuthError::EmailAlreadyInUse,
            "auth/weak-password" => AuthError::WeakPassword,
            "auth/invalid-email" => AuthError::InvalidEmail,
            "auth/network-request-failed" => AuthError::NetworkRequestFailed,
            "auth/too-many-requests" => AuthError::TooManyRequests,
            "auth/invalid-credential" => AuthError::InvalidCredential,
            "sign-in-cancelled" => AuthError::Cancelled,
            "in-progress" => AuthError::InProgress,
            "play-services-not-available" => AuthError::PlayServicesNotAvailable,
            "auth/no-current-user" => AuthError::NotSignedIn,
            _ => AuthError::Other(
                message
                    .filter(|m| !m.is_empty())
                    .unwrap_or("An unexpected error occurred.")
                    .to_string(),
            ),
        }
    }

    /// Whether the user can fix this by changing their input
    pub fn is_user_correctable(&self) -> bool {
        matches!(
            self,
            AuthError::UserNotFound
                | AuthError::WrongPassword
                | AuthError::EmailAlreadyInUse
                | AuthError::WeakPassword
                | AuthError::InvalidEmail
                | AuthError::InvalidCredential
        )
    }
}

/// Pre-flight form check failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Please fill in all fields")]
    MissingFields,

    #[error("Password must be at least {min} characters long")]
    PasswordTooShort { min: usize },

    #[error("Passwords do not match")]
    PasswordMismatch,

    #[error("Please enter a valid email address")]
    InvalidEmail,

    #[error("Please agree to our Terms of Service and Privacy Policy")]
    TermsNotAccepted,

    #[error("Please enter item text")]
    EmptyItemText,
}

/// Failure of a sign-in or registration form submission
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Auth(#[from] AuthError),
}
