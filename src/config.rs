//! Process configuration, read from the environment once at startup.

use anyhow::{bail, Context, Result};
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use crate::repository::MAX_PAGE_SIZE;
use crate::storage::DEFAULT_DISPLAY_TTL;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppConfig {
    pub port: u16,
    /// Unset runs the in-memory store.
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub nats_url: Option<String>,
    pub object_store_base_url: String,
    pub display_url_ttl: Duration,
    pub prune_on_edit: bool,
    pub purge_images_on_delete: bool,
    pub page_size: u32,
    /// In-memory mode only: actor granted `admin` at startup.
    pub dev_admin_id: Option<Uuid>,
    /// In-memory mode only: categories created at startup.
    pub dev_categories: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 8083,
            database_url: None,
            database_max_connections: 10,
            nats_url: None,
            object_store_base_url: "http://localhost:9000/catalog".into(),
            display_url_ttl: DEFAULT_DISPLAY_TTL,
            prune_on_edit: false,
            purge_images_on_delete: false,
            page_size: 10,
            dev_admin_id: None,
            dev_categories: Vec::new(),
        }
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key).filter(|v| !v.trim().is_empty()) {
        Some(raw) => raw.trim().parse().with_context(|| format!("invalid {key}: {raw:?}")),
        None => Ok(default),
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let page_size = parse(&lookup, "CATALOG_PAGE_SIZE", defaults.page_size)?;
        if page_size == 0 || page_size > MAX_PAGE_SIZE {
            bail!("CATALOG_PAGE_SIZE must be between 1 and {MAX_PAGE_SIZE}, got {page_size}");
        }
        Ok(Self {
            port: parse(&lookup, "PORT", defaults.port)?,
            database_url: lookup("DATABASE_URL").filter(|v| !v.is_empty()),
            database_max_connections: parse(&lookup, "DATABASE_MAX_CONNECTIONS", defaults.database_max_connections)?,
            nats_url: lookup("NATS_URL").filter(|v| !v.is_empty()),
            object_store_base_url: lookup("OBJECT_STORE_BASE_URL").unwrap_or(defaults.object_store_base_url),
            display_url_ttl: Duration::from_secs(parse(&lookup, "DISPLAY_URL_TTL_SECS", defaults.display_url_ttl.as_secs())?),
            prune_on_edit: parse(&lookup, "CATALOG_PRUNE_ON_EDIT", defaults.prune_on_edit)?,
            purge_images_on_delete: parse(&lookup, "CATALOG_PURGE_IMAGES_ON_DELETE", defaults.purge_images_on_delete)?,
            page_size,
            dev_admin_id: lookup("CATALOG_DEV_ADMIN_ID")
                .filter(|v| !v.trim().is_empty())
                .map(|raw| Uuid::parse_str(raw.trim()).with_context(|| format!("invalid CATALOG_DEV_ADMIN_ID: {raw:?}")))
                .transpose()?,
            dev_categories: lookup("CATALOG_DEV_CATEGORIES")
                .map(|raw| raw.split(',').map(str::trim).filter(|name| !name.is_empty()).map(str::to_string).collect())
                .unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<AppConfig> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        AppConfig::from_lookup(move |key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        assert_eq!(load(&[]).unwrap(), AppConfig::default());
    }

    #[test]
    fn test_overrides() {
        let cfg = load(&[
            ("PORT", "9000"),
            ("DATABASE_URL", "postgres://localhost/catalog"),
            ("CATALOG_PRUNE_ON_EDIT", "true"),
            ("DISPLAY_URL_TTL_SECS", "60"),
            ("CATALOG_PAGE_SIZE", "25"),
        ])
        .unwrap();
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.database_url.as_deref(), Some("postgres://localhost/catalog"));
        assert!(cfg.prune_on_edit && !cfg.purge_images_on_delete);
        assert_eq!(cfg.display_url_ttl, Duration::from_secs(60));
        assert_eq!(cfg.page_size, 25);
    }

    #[test]
    fn test_dev_seed() {
        let admin = Uuid::now_v7();
        let cfg = load(&[("CATALOG_DEV_ADMIN_ID", &admin.to_string()), ("CATALOG_DEV_CATEGORIES", "Blazers, Shirts,,")]).unwrap();
        assert_eq!(cfg.dev_admin_id, Some(admin));
        assert_eq!(cfg.dev_categories, vec!["Blazers", "Shirts"]);
    }

    #[test]
    fn test_malformed_values_fail() {
        assert!(load(&[("CATALOG_DEV_ADMIN_ID", "root")]).is_err());
        assert!(load(&[("PORT", "eighty")]).is_err());
        assert!(load(&[("CATALOG_PURGE_IMAGES_ON_DELETE", "yes")]).is_err());
        assert!(load(&[("CATALOG_PAGE_SIZE", "500")]).is_err());
    }
}
