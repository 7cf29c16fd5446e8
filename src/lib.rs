//! Moulay Catalog - menswear storefront back-office
//!
//! Product catalog administration for the storefront.
//!
//! ## Features
//! - Product aggregates: product → color variants → size variants → images
//! - Payload validation with per-field error paths
//! - Role-gated catalog mutations
//! - Edit reconciliation (minimal insert/patch/delete plans)
//! - Orphaned image cleanup in object storage

pub mod api;
pub mod config;
pub mod domain;
pub mod images;
pub mod permission;
pub mod reconcile;
pub mod repository;
pub mod schemas;
pub mod service;
pub mod storage;

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

pub use domain::value_objects::Role;
pub use service::CatalogService;

/// Path used for errors that do not belong to a single input.
pub const ROOT_FIELD: &str = "root";

// =============================================================================
// Field Errors
// =============================================================================

/// Field path → message. Only the first message recorded for a path is kept.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<String, String>);

impl FieldErrors {
    pub fn new() -> Self { Self::default() }

    pub fn single(path: impl Into<String>, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.add(path, message);
        errors
    }

    pub fn add(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.0.entry(path.into()).or_insert_with(|| message.into());
    }

    /// Folds `other` in; paths already present keep their message.
    pub fn merge(&mut self, other: FieldErrors) {
        for (path, message) in other.0 {
            self.add(path, message);
        }
    }

    pub fn get(&self, path: &str) -> Option<&str> { self.0.get(path).map(String::as_str) }
    pub fn contains(&self, path: &str) -> bool { self.0.contains_key(path) }
    pub fn is_empty(&self) -> bool { self.0.is_empty() }
    pub fn len(&self) -> usize { self.0.len() }
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> { self.0.iter().map(|(k, v)| (k.as_str(), v.as_str())) }
    pub fn into_map(self) -> BTreeMap<String, String> { self.0 }

    pub fn into_result(self) -> std::result::Result<(), FieldErrors> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined: Vec<String> = self.0.iter().map(|(k, v)| format!("{k}: {v}")).collect();
        write!(f, "{}", joined.join("; "))
    }
}

// =============================================================================
// Error Types
// =============================================================================

/// Entity named by a `NotFound` failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Entity {
    Product,
    Category,
    Color,
    Size,
    Image,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Product => "Product",
            Self::Category => "Category",
            Self::Color => "Product color",
            Self::Size => "Product size",
            Self::Image => "Image",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Authentication required")]
    Unauthenticated,

    #[error("Requires the {required} role")]
    Forbidden { required: Role },

    #[error("Invalid input data")]
    Validation(FieldErrors),

    #[error("{entity} not found")]
    NotFound { entity: Entity, field: String },

    #[error("{message}")]
    Conflict { field: String, message: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl CatalogError {
    pub fn not_found(entity: Entity, field: impl Into<String>) -> Self {
        Self::NotFound { entity, field: field.into() }
    }

    pub fn conflict(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Conflict { field: field.into(), message: message.into() }
    }

    pub fn invalid(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation(FieldErrors::single(path, message))
    }

    /// Machine-readable kind.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::Forbidden { .. } => "forbidden",
            Self::Validation(_) => "validation_error",
            Self::NotFound { .. } => "not_found",
            Self::Conflict { .. } => "conflict",
            Self::Storage(_) | Self::Database(_) => "internal",
        }
    }

    /// Field path → message for UI display; non-field failures land on `root`.
    pub fn details(&self) -> FieldErrors {
        match self {
            Self::Unauthenticated => FieldErrors::single(ROOT_FIELD, "Please sign in to continue."),
            Self::Forbidden { required } => {
                FieldErrors::single(ROOT_FIELD, format!("You must be {required} or above to do this."))
            }
            Self::Validation(errors) => errors.clone(),
            Self::NotFound { entity, field } => {
                FieldErrors::single(field.clone(), format!("The specified {} does not exist.", entity.to_string().to_lowercase()))
            }
            Self::Conflict { field, message } => FieldErrors::single(field.clone(), message.clone()),
            Self::Storage(_) | Self::Database(_) => {
                FieldErrors::single(ROOT_FIELD, "Something went wrong, please try again.")
            }
        }
    }
}

impl From<FieldErrors> for CatalogError {
    fn from(errors: FieldErrors) -> Self { Self::Validation(errors) }
}

pub type Result<T> = std::result::Result<T, CatalogError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_errors_keep_first_message() {
        let mut errors = FieldErrors::new();
        errors.add("name", "too long");
        errors.add("name", "required");
        errors.add("salePrice", "below cost");
        assert_eq!(errors.get("name"), Some("too long"));
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_error_details() {
        let err = CatalogError::not_found(Entity::Category, "category");
        assert_eq!(err.code(), "not_found");
        assert_eq!(err.details().get("category"), Some("The specified category does not exist."));
        assert!(CatalogError::Unauthenticated.details().contains(ROOT_FIELD));
        assert_eq!(CatalogError::conflict("name", "taken").details().get("name"), Some("taken"));
    }
}
