//! Session persistence
//!
//! The signed-in identity is kept in `session.json` under the data directory
//! so a restart does not sign the user out. Writes go through a temp file and
//! a rename, so a crash never leaves a truncated session behind.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::AuthenticatedIdentity;

/// Current session file format
const SESSION_FORMAT: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct PersistedSession {
    format: u32,
    saved_at: DateTime<Utc>,
    identity: AuthenticatedIdentity,
}

/// On-disk home of the signed-in identity
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Saved identity, or `None` when nobody is signed in
    pub fn load(&self) -> Result<Option<AuthenticatedIdentity>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let data = fs::read(&self.path)
            .with_context(|| format!("Failed to read session file {:?}", self.path))?;
        let session: PersistedSession = serde_json::from_slice(&data)
            .with_context(|| format!("Failed to parse session file {:?}", self.path))?;

        if session.format != SESSION_FORMAT {
            anyhow::bail!(
                "Unsupported session format {} in {:?}",
                session.format,
                self.path
            );
        }
        Ok(Some(session.identity))
    }

    pub fn save(&self, identity: &AuthenticatedIdentity) -> Result<()> {
        let session = PersistedSession {
            format: SESSION_FORMAT,
            saved_at: Utc::now(),
            identity: identity.clone(),
        };
        let data = serde_json::to_vec_pretty(&session).context("Failed to serialize session")?;
        atomic_write(&self.path, &data)
    }

    /// Forget the saved identity
    pub fn clear(&self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)
                .with_context(|| format!("Failed to remove session file {:?}", self.path))?;
        }
        Ok(())
    }
}

/// Write data atomically (write to temp file, then rename)
fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {:?}", parent))?;
    }

    let temp_path = path.with_extension("tmp");
    let mut file = File::create(&temp_path)
        .with_context(|| format!("Failed to create temp file {:?}", temp_path))?;

    file.write_all(data)
        .with_context(|| format!("Failed to write to temp file {:?}", temp_path))?;

    // Sync to disk before rename
    file.sync_all()
        .with_context(|| format!("Failed to sync temp file {:?}", temp_path))?;

    fs::rename(&temp_path, path)
        .with_context(|| format!("Failed to rename {:?} to {:?}", temp_path, path))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn identity() -> AuthenticatedIdentity {
        AuthenticatedIdentity {
            uid: "u-1".to_string(),
            email: "ada@example.com".to_string(),
            display_name: Some("Ada".to_string()),
            email_verified: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_missing_file_means_signed_out() {
        let temp_dir = TempDir::new().unwrap();
        let store = SessionStore::new(temp_dir.path().join("session.json"));
        assert!(store.load().unwrap().is_none());
        store.clear().unwrap();
    }

    #[test]
    fn test_save_load_clear() {
        let temp_dir = TempDir::new().unwrap();
        let store = SessionStore::new(temp_dir.path().join("nested").join("session.json"));

        let ada = identity();
        store.save(&ada).unwrap();
        assert_eq!(store.load().unwrap(), Some(ada));
        assert!(!store.path().with_extension("tmp").exists());

        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("session.json");
        fs::write(&path, b"{not json").unwrap();

        let err = SessionStore::new(&path).load().unwrap_err();
        assert!(err.to_string().contains("Failed to parse session file"));
    }
}
