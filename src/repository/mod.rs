//! Product Aggregate Repository
//!
//! Storage contract for products, color variants and size variants. Writes go
//! through a [`WritePlan`], which a store applies atomically: either every
//! row write lands or none does.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::aggregates::{Category, ColorRow, ProductAggregate, ProductRow, SizeRow};
use crate::Result;

pub const MAX_PAGE_SIZE: u32 = 100;

pub const DUPLICATE_NAME: &str = "A product with this name already exists.";

pub const STALE_EDIT: &str = "This product was changed by someone else. Reload it and try again.";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageRequest {
    /// 1-based.
    pub page: u32,
    pub per_page: u32,
}

impl PageRequest {
    pub fn new(page: Option<u32>, per_page: Option<u32>, default_per_page: u32) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            per_page: per_page.unwrap_or(default_per_page).clamp(1, MAX_PAGE_SIZE),
        }
    }
    pub fn offset(&self) -> u64 { u64::from(self.page - 1) * u64::from(self.per_page) }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginatedResponse<T> {
    pub data: Vec<T>,
    pub total: i64,
    pub page: u32,
    pub per_page: u32,
}

/// An aggregate joined with its category, as returned by listings.
#[derive(Clone, Debug, PartialEq)]
pub struct ListedProduct {
    pub aggregate: ProductAggregate,
    pub category: Category,
}

/// `project_revenue` is a plain sum of listed sale prices, not weighted by
/// units.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogStatistics {
    pub total_products: i64,
    pub total_units: i64,
    pub project_revenue: Decimal,
}

/// Product-level field patch.
#[derive(Clone, Debug, PartialEq)]
pub struct ProductPatch {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub category_id: Uuid,
    pub cost_price: Decimal,
    pub sale_price: Decimal,
    pub updated_at: DateTime<Utc>,
    /// Stored `updated_at` the edit was planned against. When set, the patch
    /// only lands if the row still carries it.
    pub expected_updated_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum RowWrite {
    InsertProduct(ProductRow),
    PatchProduct(ProductPatch),
    InsertColor(ColorRow),
    PatchColor(ColorRow),
    DeleteColor(Uuid),
    InsertSize(SizeRow),
    PatchSize(SizeRow),
    DeleteSize(Uuid),
}

/// Row writes for one product, in application order, plus the storage keys
/// that are no longer referenced once the writes land.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WritePlan {
    pub product_id: Uuid,
    pub writes: Vec<RowWrite>,
    pub orphaned_keys: Vec<String>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanSummary {
    pub colors_inserted: usize,
    pub colors_patched: usize,
    pub colors_deleted: usize,
    pub sizes_inserted: usize,
    pub sizes_patched: usize,
    pub sizes_deleted: usize,
    pub product_patched: bool,
}

impl WritePlan {
    pub fn is_empty(&self) -> bool { self.writes.is_empty() }
    pub fn len(&self) -> usize { self.writes.len() }

    pub fn summary(&self) -> PlanSummary {
        let mut s = PlanSummary::default();
        for write in &self.writes {
            match write {
                RowWrite::InsertProduct(_) => {}
                RowWrite::PatchProduct(_) => s.product_patched = true,
                RowWrite::InsertColor(_) => s.colors_inserted += 1,
                RowWrite::PatchColor(_) => s.colors_patched += 1,
                RowWrite::DeleteColor(_) => s.colors_deleted += 1,
                RowWrite::InsertSize(_) => s.sizes_inserted += 1,
                RowWrite::PatchSize(_) => s.sizes_patched += 1,
                RowWrite::DeleteSize(_) => s.sizes_deleted += 1,
            }
        }
        s
    }
}

#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn category(&self, id: Uuid) -> Result<Option<Category>>;
    async fn list_categories(&self) -> Result<Vec<Category>>;

    /// Exact-match lookup backed by the unique name index.
    async fn product_by_name(&self, name: &str) -> Result<Option<ProductRow>>;
    async fn load_aggregate(&self, id: Uuid) -> Result<Option<ProductAggregate>>;

    /// Newest first.
    async fn list_products(&self, page: PageRequest) -> Result<(Vec<ListedProduct>, i64)>;
    async fn statistics(&self) -> Result<CatalogStatistics>;

    /// Applies every write or none. A duplicate product name surfaces as
    /// `Conflict` on `name`, a product patch whose expected `updated_at` no
    /// longer matches as `Conflict` on `root`, and a patch or delete of a
    /// missing row as `NotFound`.
    async fn apply(&self, plan: &WritePlan) -> Result<()>;

    /// Removes the product with its colors and sizes and returns what was
    /// removed, or `None` when the product does not exist.
    async fn delete_product(&self, id: Uuid) -> Result<Option<ProductAggregate>>;
}
