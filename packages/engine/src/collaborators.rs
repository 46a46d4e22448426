//! Seams to the services that own uploads, credentials and field metadata.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use bulk_core::{CustomField, SheetData, UserId};
use serde::Deserialize;
use storage::{SheetStore, StorageError};

/// Failure reported by a collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CollaboratorError {
    #[error("file data not found for handle {0}")]
    FileNotFound(String),

    #[error("no tracker configuration for user {0}")]
    UnknownUser(UserId),

    #[error("collaborator unavailable: {0}")]
    Unavailable(String),
}

/// Per-user tracker credential and quota.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UserConfig {
    pub api_token: String,
    pub rate_limit_per_minute: u32,
}

impl UserConfig {
    pub fn new(api_token: impl Into<String>, rate_limit_per_minute: u32) -> Self {
        Self {
            api_token: api_token.into(),
            rate_limit_per_minute,
        }
    }
}

/// Source of parsed upload contents.
#[async_trait]
pub trait FileSource: Send + Sync {
    async fn get_file_data(&self, handle: &str) -> Result<SheetData, CollaboratorError>;
}

/// Source of per-user tracker credentials.
#[async_trait]
pub trait UserConfigSource: Send + Sync {
    async fn get_user_config(&self, user_id: &UserId) -> Result<UserConfig, CollaboratorError>;
}

/// Source of the tracker's custom-field catalogue for a user.
#[async_trait]
pub trait CustomFieldSource: Send + Sync {
    async fn get_custom_fields(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<CustomField>, CollaboratorError>;
}

#[async_trait]
impl FileSource for SheetStore {
    async fn get_file_data(&self, handle: &str) -> Result<SheetData, CollaboratorError> {
        self.get_sheet(handle).await.map_err(|e| match e {
            StorageError::NotFound(_) => CollaboratorError::FileNotFound(handle.to_string()),
            other => CollaboratorError::Unavailable(other.to_string()),
        })
    }
}

/// User config table with an optional fallback shared by every user.
#[derive(Debug, Clone, Default)]
pub struct StaticUserConfig {
    users: HashMap<UserId, UserConfig>,
    fallback: Option<UserConfig>,
}

impl StaticUserConfig {
    /// Every user gets `config`.
    pub fn shared(config: UserConfig) -> Self {
        Self {
            users: HashMap::new(),
            fallback: Some(config),
        }
    }

    pub fn with_user(mut self, user_id: UserId, config: UserConfig) -> Self {
        self.users.insert(user_id, config);
        self
    }
}

#[async_trait]
impl UserConfigSource for StaticUserConfig {
    async fn get_user_config(&self, user_id: &UserId) -> Result<UserConfig, CollaboratorError> {
        self.users
            .get(user_id)
            .or(self.fallback.as_ref())
            .cloned()
            .ok_or_else(|| CollaboratorError::UnknownUser(user_id.clone()))
    }
}

/// Custom-field catalogue loaded once, optionally per user.
///
/// JSON layout: `{"default": [{id, name, type}], "users": {"<user>": [...]}}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CustomFieldCatalogue {
    #[serde(default)]
    default: Vec<CustomField>,
    #[serde(default)]
    users: HashMap<UserId, Vec<CustomField>>,
}

impl CustomFieldCatalogue {
    pub fn new(default: Vec<CustomField>) -> Self {
        Self {
            default,
            users: HashMap::new(),
        }
    }

    pub fn with_user(mut self, user_id: UserId, fields: Vec<CustomField>) -> Self {
        self.users.insert(user_id, fields);
        self
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, CollaboratorError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            CollaboratorError::Unavailable(format!("reading {}: {e}", path.display()))
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            CollaboratorError::Unavailable(format!("parsing {}: {e}", path.display()))
        })
    }
}

#[async_trait]
impl CustomFieldSource for CustomFieldCatalogue {
    async fn get_custom_fields(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<CustomField>, CollaboratorError> {
        Ok(self
            .users
            .get(user_id)
            .unwrap_or(&self.default)
            .clone())
    }
}
