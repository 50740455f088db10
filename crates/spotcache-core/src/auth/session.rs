use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info};

/// Session file name in cache directory
const SESSION_FILE: &str = "session.json";

/// Token expiry time in days.
/// The service issues long-lived tokens; anything older is re-requested.
const TOKEN_EXPIRY_DAYS: i64 = 30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionData {
    pub token: String,
    pub username: String,
    pub created_at: DateTime<Utc>,
}

impl SessionData {
    pub fn new(token: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            username: username.into(),
            created_at: Utc::now(),
        }
    }

    pub fn is_expired(&self) -> bool {
        let expiry = self.created_at + Duration::days(TOKEN_EXPIRY_DAYS);
        Utc::now() > expiry
    }
}

/// On-disk copy of the last session so the CLI stays logged in between runs.
pub struct Session {
    cache_dir: PathBuf,
    pub data: Option<SessionData>,
}

impl Session {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self {
            cache_dir,
            data: None,
        }
    }

    /// Load session from disk. Expired sessions are ignored.
    pub fn load(&mut self) -> Result<bool> {
        let path = self.session_path();
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .context("Failed to read session file")?;
            let data: SessionData = serde_json::from_str(&contents)
                .context("Failed to parse session file")?;

            if !data.is_expired() {
                self.data = Some(data);
                return Ok(true);
            }
            debug!("Stored session expired");
        }
        Ok(false)
    }

    /// Save session to disk
    pub fn save(&self) -> Result<()> {
        if let Some(ref data) = self.data {
            let path = self.session_path();
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let contents = serde_json::to_string_pretty(data)?;
            std::fs::write(path, contents)?;
        }
        Ok(())
    }

    /// Clear session data
    pub fn clear(&mut self) -> Result<()> {
        self.data = None;
        let path = self.session_path();
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    pub fn update(&mut self, data: SessionData) {
        self.data = Some(data);
    }

    fn session_path(&self) -> PathBuf {
        self.cache_dir.join(SESSION_FILE)
    }
}

/// Live session value shared with the query cache.
///
/// Exposes the current token and a change notification; the cache
/// subscribes to it but never writes it.
#[derive(Clone)]
pub struct AuthProvider {
    tx: Arc<watch::Sender<Option<SessionData>>>,
}

impl AuthProvider {
    pub fn new(initial: Option<SessionData>) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    /// Current bearer token. Empty tokens count as logged out.
    pub fn token(&self) -> Option<String> {
        self.tx
            .borrow()
            .as_ref()
            .map(|d| d.token.clone())
            .filter(|t| !t.is_empty())
    }

    pub fn current(&self) -> Option<SessionData> {
        self.tx.borrow().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.token().is_some()
    }

    /// Install a new session. Re-installing the same token does not notify.
    pub fn login(&self, data: SessionData) {
        info!(username = %data.username, "Session started");
        self.tx.send_if_modified(|current| {
            let changed = current.as_ref().map(|d| &d.token) != Some(&data.token);
            *current = Some(data);
            changed
        });
    }

    pub fn logout(&self) {
        let had_session = self.tx.send_if_modified(|current| current.take().is_some());
        if had_session {
            info!("Session ended");
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<SessionData>> {
        self.tx.subscribe()
    }
}

impl Default for AuthProvider {
    fn default() -> Self {
        Self::new(None)
    }
}
