//! Object storage for product images.
//!
//! The bucket itself belongs to an external provider; the catalog only needs
//! upload targets, time-limited display URLs, deletes and metadata.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{CatalogError, Result};

/// Display URLs are valid for a week by default.
pub const DEFAULT_DISPLAY_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadTarget {
    pub upload_url: String,
    pub key: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMetadata {
    pub size: u64,
    pub content_type: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteOutcome {
    pub success: bool,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn issue_upload_target(&self) -> Result<UploadTarget>;
    async fn display_url(&self, key: &str, ttl: Duration) -> Result<String>;
    async fn delete_object(&self, key: &str) -> Result<DeleteOutcome>;
    async fn metadata(&self, key: &str) -> Result<Option<ObjectMetadata>>;
}

// =============================================================================
// Upload policy
// =============================================================================

pub const MAX_UPLOAD_BYTES: u64 = 5 * 1024 * 1024;

pub const ACCEPTED_IMAGE_TYPES: &[&str] = &[
    "image/jpeg",
    "image/jpg",
    "image/png",
    "image/webp",
    "image/avif",
    "image/gif",
    "image/svg+xml",
];

#[derive(Debug, Clone, PartialEq, Eq)] pub enum UploadRejection { TooLarge { size: u64, max: u64 }, UnsupportedType(String) }
impl std::error::Error for UploadRejection {}
impl std::fmt::Display for UploadRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooLarge { .. } => write!(f, "File size exceeds the maximum allowed size."),
            Self::UnsupportedType(t) => write!(f, "File type {t} is not accepted."),
        }
    }
}

/// Size and MIME checks applied once an upload's metadata is known. Absent
/// fields are not checked.
#[derive(Clone, Debug)]
pub struct UploadPolicy {
    pub max_bytes: u64,
    pub accepted_types: Vec<String>,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self { max_bytes: MAX_UPLOAD_BYTES, accepted_types: ACCEPTED_IMAGE_TYPES.iter().map(|t| t.to_string()).collect() }
    }
}

impl UploadPolicy {
    pub fn check(&self, metadata: &ObjectMetadata) -> std::result::Result<(), UploadRejection> {
        if metadata.size > self.max_bytes {
            return Err(UploadRejection::TooLarge { size: metadata.size, max: self.max_bytes });
        }
        match &metadata.content_type {
            Some(t) if !self.accepted_types.iter().any(|a| a == t) => Err(UploadRejection::UnsupportedType(t.clone())),
            _ => Ok(()),
        }
    }
}

// =============================================================================
// In-memory store
// =============================================================================

/// Bucket kept in process memory. URLs point at `base_url`.
pub struct MemoryObjectStore {
    base_url: String,
    objects: RwLock<HashMap<String, ObjectMetadata>>,
    deleted: RwLock<Vec<String>>,
}

impl MemoryObjectStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { base_url: base_url.into().trim_end_matches('/').to_string(), objects: RwLock::default(), deleted: RwLock::default() }
    }

    /// Records a finished upload.
    pub async fn put(&self, key: impl Into<String>, metadata: ObjectMetadata) {
        self.objects.write().await.insert(key.into(), metadata);
    }

    pub async fn contains(&self, key: &str) -> bool { self.objects.read().await.contains_key(key) }

    /// Keys deleted so far, in call order.
    pub async fn deleted(&self) -> Vec<String> { self.deleted.read().await.clone() }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn issue_upload_target(&self) -> Result<UploadTarget> {
        let key = Uuid::new_v4().to_string();
        Ok(UploadTarget { upload_url: format!("{}/upload/{key}", self.base_url), key })
    }

    async fn display_url(&self, key: &str, ttl: Duration) -> Result<String> {
        let ttl = chrono::Duration::from_std(ttl).map_err(|e| CatalogError::Storage(e.to_string()))?;
        let expires = (Utc::now() + ttl).timestamp();
        Ok(format!("{}/{key}?expires={expires}", self.base_url))
    }

    async fn delete_object(&self, key: &str) -> Result<DeleteOutcome> {
        let existed = self.objects.write().await.remove(key).is_some();
        self.deleted.write().await.push(key.to_string());
        Ok(DeleteOutcome { success: existed })
    }

    async fn metadata(&self, key: &str) -> Result<Option<ObjectMetadata>> {
        Ok(self.objects.read().await.get(key).cloned())
    }
}
