//! Server profile store.
//!
//! Profiles live in an ordered list persisted as JSON together with the
//! index of the last selected server. Identity is positional: `name` is a
//! display label, not a key. A missing or empty store file yields an empty
//! store; saves are atomic (temp file, then rename).

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize, Serializer};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Caller-side profile validation failures. These never reach the
/// network layer.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProfileError {
    #[error("Server name must not be empty")]
    EmptyName,
    #[error("Server URL must start with http:// or https://")]
    InvalidUrl,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to read server list: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid JSON in server list: {0}")]
    Parse(#[from] serde_json::Error),
    #[error(transparent)]
    Profile(#[from] ProfileError),
}

/// How to authenticate against a server.
///
/// The serde default is `Basic`: records written before the field existed
/// were always basic-authenticated, and must stay that way when loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthKind {
    None,
    #[default]
    Basic,
}

/// One configured OPDS server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerProfile {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub auth: AuthKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_password"
    )]
    pub password: Option<SecretString>,
}

/// The store file holds the password in the clear (as the original
/// configuration format did); in memory it stays wrapped in `SecretString`
/// so Debug/log output never reveals it.
fn serialize_password<S: Serializer>(
    password: &Option<SecretString>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match password {
        Some(p) => serializer.serialize_some(p.expose_secret()),
        None => serializer.serialize_none(),
    }
}

impl ServerProfile {
    pub fn validate(&self) -> Result<(), ProfileError> {
        if self.name.trim().is_empty() {
            return Err(ProfileError::EmptyName);
        }
        if !self.url.starts_with("http://") && !self.url.starts_with("https://") {
            return Err(ProfileError::InvalidUrl);
        }
        Ok(())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    #[serde(default)]
    servers: Vec<ServerProfile>,
    #[serde(default)]
    last_server: usize,
}

/// Ordered list of server profiles plus the last selected index.
#[derive(Debug)]
pub struct ProfileStore {
    path: PathBuf,
    servers: Vec<ServerProfile>,
    last_server: usize,
}

impl ProfileStore {
    /// Loads the store from `path`. A missing or empty file is a normal
    /// first run and yields an empty store.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let empty = |path: &Path| Self {
            path: path.to_path_buf(),
            servers: Vec::new(),
            last_server: 0,
        };

        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No server list found, starting empty");
                return Ok(empty(path));
            }
            Err(e) => return Err(StoreError::Io(e)),
        };
        if content.trim().is_empty() {
            return Ok(empty(path));
        }

        let file: StoreFile = serde_json::from_str(&content)?;
        tracing::info!(
            path = %path.display(),
            servers = file.servers.len(),
            "Loaded server list"
        );
        Ok(Self {
            path: path.to_path_buf(),
            servers: file.servers,
            last_server: file.last_server,
        })
    }

    /// Writes the store back to disk. Write-to-temp-then-rename so a crash
    /// never truncates the server list.
    pub fn save(&self) -> Result<(), StoreError> {
        let file = StoreFile {
            servers: self.servers.clone(),
            last_server: self.last_server,
        };
        let json = serde_json::to_string_pretty(&file)?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let temp_path = self.path.with_extension("json.tmp");
        std::fs::write(&temp_path, json)?;
        std::fs::rename(&temp_path, &self.path)?;
        Ok(())
    }

    pub fn servers(&self) -> &[ServerProfile] {
        &self.servers
    }

    pub fn get(&self, index: usize) -> Option<&ServerProfile> {
        self.servers.get(index)
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn add(&mut self, profile: ServerProfile) -> Result<(), ProfileError> {
        profile.validate()?;
        self.servers.push(profile);
        Ok(())
    }

    pub fn update(&mut self, index: usize, profile: ServerProfile) -> Result<(), ProfileError> {
        profile.validate()?;
        match self.servers.get_mut(index) {
            Some(slot) => *slot = profile,
            None => tracing::warn!(index = index, "Ignoring update of out-of-range server"),
        }
        Ok(())
    }

    pub fn remove(&mut self, index: usize) -> Option<ServerProfile> {
        if index >= self.servers.len() {
            return None;
        }
        let removed = self.servers.remove(index);
        self.last_server = self.last_server.min(self.servers.len().saturating_sub(1));
        Some(removed)
    }

    /// Swaps the profile with its predecessor. Returns whether anything moved.
    pub fn move_up(&mut self, index: usize) -> bool {
        if index == 0 || index >= self.servers.len() {
            return false;
        }
        self.servers.swap(index - 1, index);
        true
    }

    /// Swaps the profile with its successor. Returns whether anything moved.
    pub fn move_down(&mut self, index: usize) -> bool {
        if index + 1 >= self.servers.len() {
            return false;
        }
        self.servers.swap(index, index + 1);
        true
    }

    pub fn last_server(&self) -> usize {
        self.last_server
    }

    pub fn set_last_server(&mut self, index: usize) {
        self.last_server = index.min(self.servers.len().saturating_sub(1));
    }

    /// The last selected profile, if any are configured.
    pub fn selected(&self) -> Option<&ServerProfile> {
        self.servers.get(self.last_server)
    }
}
