use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use thiserror::Error;
use tracing::debug;

use super::HistoryEntry;
use crate::db::connection::ConnectionConfig;
use crate::db::introspect::SchemaDescription;

pub const PROFILE_KEY: &str = "dbConfig.json";
pub const HISTORY_KEY: &str = "queryHistory.json";
pub const TOKEN_KEY: &str = "token";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Stored data is malformed: {0}")]
    Json(#[from] serde_json::Error),
}

/// The last successful connection, minus the password.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedProfile {
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    pub user: String,
    pub database: String,
    pub schema: SchemaDescription,
}

impl SavedProfile {
    pub fn from_connection(config: &ConnectionConfig, schema: &SchemaDescription) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            user: config.user.clone(),
            database: config.database.clone(),
            schema: schema.clone(),
        }
    }

    /// Rebuilds a full connection config once the user re-enters the password.
    pub fn with_password(&self, password: &str) -> ConnectionConfig {
        ConnectionConfig {
            host: self.host.clone(),
            port: self.port,
            user: self.user.clone(),
            password: password.to_string(),
            database: self.database.clone(),
        }
    }
}

/// Client-local key/value persistence for a session.
pub trait SessionStore: Send {
    fn load_profile(&self) -> Result<Option<SavedProfile>, StoreError>;
    fn save_profile(&mut self, profile: &SavedProfile) -> Result<(), StoreError>;
    fn load_history(&self) -> Result<Vec<HistoryEntry>, StoreError>;
    fn save_history(&mut self, history: &[HistoryEntry]) -> Result<(), StoreError>;
    fn load_token(&self) -> Result<Option<String>, StoreError>;
    fn save_token(&mut self, token: &str) -> Result<(), StoreError>;
}

/// One file per key under a data directory.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn read(&self, key: &str) -> Result<Option<String>, StoreError> {
        match fs::read_to_string(self.dir.join(key)) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, key: &str, contents: &str) -> Result<(), StoreError> {
        let path = self.dir.join(key);
        debug!("Writing {}", path.display());
        fs::write(path, contents)?;
        Ok(())
    }
}

impl SessionStore for FileStore {
    fn load_profile(&self) -> Result<Option<SavedProfile>, StoreError> {
        match self.read(PROFILE_KEY)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    fn save_profile(&mut self, profile: &SavedProfile) -> Result<(), StoreError> {
        self.write(PROFILE_KEY, &serde_json::to_string(profile)?)
    }

    fn load_history(&self) -> Result<Vec<HistoryEntry>, StoreError> {
        match self.read(HISTORY_KEY)? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(Vec::new()),
        }
    }

    fn save_history(&mut self, history: &[HistoryEntry]) -> Result<(), StoreError> {
        self.write(HISTORY_KEY, &serde_json::to_string(history)?)
    }

    fn load_token(&self) -> Result<Option<String>, StoreError> {
        Ok(self
            .read(TOKEN_KEY)?
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty()))
    }

    fn save_token(&mut self, token: &str) -> Result<(), StoreError> {
        self.write(TOKEN_KEY, token)
    }
}

#[cfg(test)]
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    pub profile: Option<SavedProfile>,
    pub history: Vec<HistoryEntry>,
    pub token: Option<String>,
}

#[cfg(test)]
impl SessionStore for MemoryStore {
    fn load_profile(&self) -> Result<Option<SavedProfile>, StoreError> {
        Ok(self.profile.clone())
    }

    fn save_profile(&mut self, profile: &SavedProfile) -> Result<(), StoreError> {
        self.profile = Some(profile.clone());
        Ok(())
    }

    fn load_history(&self) -> Result<Vec<HistoryEntry>, StoreError> {
        Ok(self.history.clone())
    }

    fn save_history(&mut self, history: &[HistoryEntry]) -> Result<(), StoreError> {
        self.history = history.to_vec();
        Ok(())
    }

    fn load_token(&self) -> Result<Option<String>, StoreError> {
        Ok(self.token.clone())
    }

    fn save_token(&mut self, token: &str) -> Result<(), StoreError> {
        self.token = Some(token.to_string());
        Ok(())
    }
}
