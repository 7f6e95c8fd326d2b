//! Durable key-value storage for client credentials.
//!
//! Two logical stores share one backend: the credential store keeps the
//! access token, authenticated flag and user under `auth-storage`, and the
//! cookie store keeps the refresh token under `refreshToken`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::error::ClientError;
use super::session::UserSummary;

/// Key of the persisted credential document.
pub const CREDENTIAL_KEY: &str = "auth-storage";

/// Key of the stored refresh token.
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";

/// String key-value store with get/set/remove.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    fn set(&self, key: &str, value: &str) -> Result<(), ClientError>;

    /// Remove a key. Returns whether it was present; an absent key is not a
    /// mutation.
    fn remove(&self, key: &str) -> Result<bool, ClientError>;
}

/// In-process store, lost on restart.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), ClientError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool, ClientError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.remove(key).is_some())
    }
}

/// JSON file backed store that survives restarts.
///
/// Entries are cached in memory; every mutation rewrites the whole file
/// through a temp file and rename so a crash never leaves a torn file.
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    /// Open the store at `path`, starting empty if the file does not exist.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ClientError> {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents)
                .map_err(|e| ClientError::Storage(format!("{}: {e}", path.display())))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(ClientError::Storage(format!("{}: {e}", path.display()))),
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> Result<(), ClientError> {
        static COUNTER: AtomicU32 = AtomicU32::new(0);

        let json = serde_json::to_string_pretty(entries)
            .map_err(|e| ClientError::Storage(e.to_string()))?;
        let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
        let tmp_name = format!(
            "{}.{}.{}.tmp",
            self.path.file_name().unwrap_or_default().to_string_lossy(),
            std::process::id(),
            seq,
        );
        let tmp_path = self.path.with_file_name(tmp_name);

        std::fs::write(&tmp_path, json).map_err(|e| ClientError::Storage(e.to_string()))?;
        std::fs::rename(&tmp_path, &self.path).map_err(|e| ClientError::Storage(e.to_string()))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), ClientError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value.to_string());
        self.persist(&entries)
    }

    fn remove(&self, key: &str) -> Result<bool, ClientError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.remove(key).is_none() {
            return Ok(false);
        }
        self.persist(&entries)?;
        Ok(true)
    }
}

/// The persisted credential document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedAuth {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub is_authenticated: bool,
    #[serde(default)]
    pub user: Option<UserSummary>,
}

/// Access token, authenticated flag and user.
#[derive(Clone)]
pub struct CredentialStore {
    kv: Arc<dyn KeyValueStore>,
}

impl CredentialStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    /// Load the document. A corrupt document reads as logged out.
    pub fn load(&self) -> PersistedAuth {
        let Some(raw) = self.kv.get(CREDENTIAL_KEY) else {
            return PersistedAuth::default();
        };
        serde_json::from_str(&raw).unwrap_or_else(|e| {
            warn!(error = %e, "Discarding unreadable credential document");
            PersistedAuth::default()
        })
    }

    pub fn save(&self, auth: &PersistedAuth) -> Result<(), ClientError> {
        let json = serde_json::to_string(auth).map_err(|e| ClientError::Storage(e.to_string()))?;
        self.kv.set(CREDENTIAL_KEY, &json)
    }

    pub fn access_token(&self) -> Option<String> {
        self.load().access_token
    }

    /// Remove the document. Returns whether one was stored.
    pub fn clear(&self) -> Result<bool, ClientError> {
        self.kv.remove(CREDENTIAL_KEY)
    }
}

/// Holder of the refresh token, the client side counterpart of the
/// `refreshToken` cookie.
#[derive(Clone)]
pub struct CookieStore {
    kv: Arc<dyn KeyValueStore>,
}

impl CookieStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.kv.get(REFRESH_TOKEN_KEY).filter(|t| !t.is_empty())
    }

    pub fn set_refresh_token(&self, token: &str) -> Result<(), ClientError> {
        self.kv.set(REFRESH_TOKEN_KEY, token)
    }

    pub fn remove(&self) -> Result<bool, ClientError> {
        self.kv.remove(REFRESH_TOKEN_KEY)
    }
}
