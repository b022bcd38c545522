//! Screen state
//!
//! View-models hold everything a screen needs to decide what to show. They
//! never render; the embedding application reads their public state and
//! drains their notifications.
//!
//! - `home`: the task list with its sync badge and network toggle
//! - `auth`: the login and registration screens

mod auth;
mod home;

pub use auth::AuthViewModel;
pub use home::{HomeViewModel, SyncStatus};

/// Severity of a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Info,
    Error,
}

/// A message for the user, shown as an alert by the embedding application
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub message: String,
    pub kind: NotificationKind,
}

impl Notification {
    pub fn info(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            kind: NotificationKind::Info,
        }
    }

    pub fn error(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            kind: NotificationKind::Error,
        }
    }
}
