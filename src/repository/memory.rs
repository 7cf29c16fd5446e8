//! In-process catalog store.
//!
//! Tables live behind one write lock. A plan is applied to a copy of the
//! tables and swapped in only when every write succeeded.

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{CatalogStatistics, CatalogStore, ListedProduct, PageRequest, RowWrite, WritePlan, DUPLICATE_NAME, STALE_EDIT};
use crate::domain::aggregates::{Category, ColorRow, ProductAggregate, ProductRow, SizeRow};
use crate::{CatalogError, Entity, Result, ROOT_FIELD};

/// Rows in insertion order.
#[derive(Clone, Debug, Default)]
struct Tables {
    categories: Vec<Category>,
    products: Vec<ProductRow>,
    colors: Vec<ColorRow>,
    sizes: Vec<SizeRow>,
}

impl Tables {
    fn aggregate(&self, id: Uuid) -> Option<ProductAggregate> {
        let product = self.products.iter().find(|p| p.id == id)?.clone();
        let colors = self.colors.iter().filter(|c| c.product_id == id).cloned().collect();
        let sizes = self.sizes.iter().filter(|s| s.product_id == id).cloned().collect();
        Some(ProductAggregate::assemble(product, colors, sizes))
    }

    fn name_taken(&self, name: &str, except: Option<Uuid>) -> bool {
        self.products.iter().any(|p| p.name == name && Some(p.id) != except)
    }

    fn apply(&mut self, write: &RowWrite) -> Result<()> {
        match write {
            RowWrite::InsertProduct(row) => {
                if self.name_taken(&row.name, None) {
                    return Err(CatalogError::conflict("name", DUPLICATE_NAME));
                }
                self.products.push(row.clone());
            }
            RowWrite::PatchProduct(patch) => {
                if self.name_taken(&patch.name, Some(patch.id)) {
                    return Err(CatalogError::conflict("name", DUPLICATE_NAME));
                }
                let row = self
                    .products
                    .iter_mut()
                    .find(|p| p.id == patch.id)
                    .ok_or_else(|| CatalogError::not_found(Entity::Product, ROOT_FIELD))?;
                if patch.expected_updated_at.is_some_and(|expected| row.updated_at != Some(expected)) {
                    return Err(CatalogError::conflict(ROOT_FIELD, STALE_EDIT));
                }
                row.name = patch.name.clone();
                row.description = patch.description.clone();
                row.category_id = patch.category_id;
                row.cost_price = patch.cost_price;
                row.sale_price = patch.sale_price;
                row.updated_at = Some(patch.updated_at);
            }
            RowWrite::InsertColor(row) => {
                if !self.products.iter().any(|p| p.id == row.product_id) {
                    return Err(CatalogError::not_found(Entity::Product, ROOT_FIELD));
                }
                self.colors.push(row.clone());
            }
            RowWrite::PatchColor(row) => {
                let slot = self
                    .colors
                    .iter_mut()
                    .find(|c| c.id == row.id && c.product_id == row.product_id)
                    .ok_or_else(|| CatalogError::not_found(Entity::Color, "productColors"))?;
                *slot = row.clone();
            }
            RowWrite::DeleteColor(id) => {
                let before = self.colors.len();
                self.colors.retain(|c| c.id != *id);
                if self.colors.len() == before {
                    return Err(CatalogError::not_found(Entity::Color, "productColors"));
                }
                self.sizes.retain(|s| s.product_color_id != *id);
            }
            RowWrite::InsertSize(row) => {
                if !self.colors.iter().any(|c| c.id == row.product_color_id && c.product_id == row.product_id) {
                    return Err(CatalogError::not_found(Entity::Color, "productColors"));
                }
                self.sizes.push(row.clone());
            }
            RowWrite::PatchSize(row) => {
                let slot = self
                    .sizes
                    .iter_mut()
                    .find(|s| s.id == row.id && s.product_color_id == row.product_color_id)
                    .ok_or_else(|| CatalogError::not_found(Entity::Size, "productColors"))?;
                *slot = row.clone();
            }
            RowWrite::DeleteSize(id) => {
                let before = self.sizes.len();
                self.sizes.retain(|s| s.id != *id);
                if self.sizes.len() == before {
                    return Err(CatalogError::not_found(Entity::Size, "productColors"));
                }
            }
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    pub fn with_categories(categories: impl IntoIterator<Item = Category>) -> Self {
        let tables = Tables { categories: categories.into_iter().collect(), ..Tables::default() };
        Self { tables: RwLock::new(tables) }
    }

    /// Color and size rows that reference `product_id`.
    pub async fn child_rows(&self, product_id: Uuid) -> (usize, usize) {
        let tables = self.tables.read().await;
        (
            tables.colors.iter().filter(|c| c.product_id == product_id).count(),
            tables.sizes.iter().filter(|s| s.product_id == product_id).count(),
        )
    }
}

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn category(&self, id: Uuid) -> Result<Option<Category>> {
        Ok(self.tables.read().await.categories.iter().find(|c| c.id == id).cloned())
    }

    async fn list_categories(&self) -> Result<Vec<Category>> {
        let mut categories = self.tables.read().await.categories.clone();
        categories.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(categories)
    }

    async fn product_by_name(&self, name: &str) -> Result<Option<ProductRow>> {
        Ok(self.tables.read().await.products.iter().find(|p| p.name == name).cloned())
    }

    async fn load_aggregate(&self, id: Uuid) -> Result<Option<ProductAggregate>> {
        Ok(self.tables.read().await.aggregate(id))
    }

    async fn list_products(&self, page: PageRequest) -> Result<(Vec<ListedProduct>, i64)> {
        let tables = self.tables.read().await;
        let listed = tables
            .products
            .iter()
            .rev()
            .skip(page.offset() as usize)
            .take(page.per_page as usize)
            .filter_map(|p| {
                let category = tables.categories.iter().find(|c| c.id == p.category_id)?.clone();
                Some(ListedProduct { aggregate: tables.aggregate(p.id)?, category })
            })
            .collect();
        Ok((listed, tables.products.len() as i64))
    }

    async fn statistics(&self) -> Result<CatalogStatistics> {
        let tables = self.tables.read().await;
        Ok(CatalogStatistics {
            total_products: tables.products.len() as i64,
            total_units: tables.sizes.iter().fold(0i64, |total, s| total.saturating_add(s.quantity)),
            project_revenue: tables.products.iter().map(|p| p.sale_price).sum::<Decimal>(),
        })
    }

    async fn apply(&self, plan: &WritePlan) -> Result<()> {
        let mut tables = self.tables.write().await;
        let mut staged = tables.clone();
        for write in &plan.writes {
            staged.apply(write)?;
        }
        *tables = staged;
        tracing::debug!(product_id = %plan.product_id, writes = plan.len(), "plan applied");
        Ok(())
    }

    async fn delete_product(&self, id: Uuid) -> Result<Option<ProductAggregate>> {
        let mut tables = self.tables.write().await;
        let Some(removed) = tables.aggregate(id) else { return Ok(None) };
        tables.products.retain(|p| p.id != id);
        tables.sizes.retain(|s| s.product_id != id);
        tables.colors.retain(|c| c.product_id != id);
        Ok(Some(removed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::product::fixtures::{color, product, size};
    use crate::repository::ProductPatch;
    use chrono::Utc;

    fn insert_plan(p: &ProductRow, colors: &[ColorRow], sizes: &[SizeRow]) -> WritePlan {
        let mut writes = vec![RowWrite::InsertProduct(p.clone())];
        writes.extend(colors.iter().cloned().map(RowWrite::InsertColor));
        writes.extend(sizes.iter().cloned().map(RowWrite::InsertSize));
        WritePlan { product_id: p.id, writes, orphaned_keys: vec![] }
    }

    #[tokio::test]
    async fn test_apply_and_read_back() {
        let cat = Category::new("Blazers");
        let store = MemoryStore::with_categories([cat.clone()]);
        let p = product("Blazer", cat.id);
        let noir = color(p.id, "Noir", "#000000", &["k1"]);
        let m = size(&noir, "M", 5);
        store.apply(&insert_plan(&p, &[noir.clone()], &[m])).await.unwrap();

        let agg = store.load_aggregate(p.id).await.unwrap().unwrap();
        assert_eq!(agg.colors()[0].color, noir);
        assert_eq!(agg.total_units(), 5);
        assert_eq!(store.product_by_name("Blazer").await.unwrap().unwrap().id, p.id);
        assert!(store.product_by_name("blazer").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_plan_leaves_tables_untouched() {
        let cat = Category::new("Shirts");
        let store = MemoryStore::with_categories([cat.clone()]);
        let first = product("Oxford", cat.id);
        store.apply(&insert_plan(&first, &[], &[])).await.unwrap();

        let dup = product("Oxford", cat.id);
        let c = color(dup.id, "Bleu", "#0000ff", &["k1"]);
        let err = store.apply(&insert_plan(&dup, &[c], &[])).await.unwrap_err();
        assert!(matches!(err, CatalogError::Conflict { ref field, .. } if field == "name"));

        let orphan = color(first.id, "Blanc", "#ffffff", &["k2"]);
        let stray = size(&color(first.id, "Gris", "#888888", &[]), "L", 1);
        let plan = WritePlan {
            product_id: first.id,
            writes: vec![RowWrite::InsertColor(orphan), RowWrite::InsertSize(stray)],
            orphaned_keys: vec![],
        };
        assert!(matches!(store.apply(&plan).await, Err(CatalogError::NotFound { entity: Entity::Color, .. })));
        assert_eq!(store.child_rows(first.id).await, (0, 0));
        assert_eq!(store.statistics().await.unwrap().total_products, 1);
    }

    #[tokio::test]
    async fn test_list_is_newest_first() {
        let cat = Category::new("Chinos");
        let store = MemoryStore::with_categories([cat.clone()]);
        for name in ["A", "B", "C"] {
            store.apply(&insert_plan(&product(name, cat.id), &[], &[])).await.unwrap();
        }
        let (page, total) = store.list_products(PageRequest::new(Some(1), Some(2), 10)).await.unwrap();
        assert_eq!(total, 3);
        let names: Vec<&str> = page.iter().map(|l| l.aggregate.product().name.as_str()).collect();
        assert_eq!(names, vec!["C", "B"]);
        assert_eq!(page[0].category, cat);
    }

    #[tokio::test]
    async fn test_delete_cascades() {
        let cat = Category::new("Knitwear");
        let store = MemoryStore::with_categories([cat.clone()]);
        let p = product("Cardigan", cat.id);
        let c = color(p.id, "Camel", "#c19a6b", &["k1"]);
        let s = size(&c, "L", 3);
        store.apply(&insert_plan(&p, &[c], &[s])).await.unwrap();

        let removed = store.delete_product(p.id).await.unwrap().unwrap();
        assert_eq!(removed.image_keys(), vec!["k1"]);
        assert_eq!(store.child_rows(p.id).await, (0, 0));
        assert!(store.delete_product(p.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_patch_product_bumps_updated_at() {
        let cat = Category::new("Coats");
        let store = MemoryStore::with_categories([cat.clone()]);
        let p = product("Overcoat", cat.id);
        store.apply(&insert_plan(&p, &[], &[])).await.unwrap();

        let now = Utc::now();
        let patch = ProductPatch {
            id: p.id,
            name: "Topcoat".into(),
            description: p.description.clone(),
            category_id: cat.id,
            cost_price: p.cost_price,
            sale_price: Decimal::new(250, 0),
            updated_at: now,
            expected_updated_at: None,
        };
        let plan = WritePlan { product_id: p.id, writes: vec![RowWrite::PatchProduct(patch)], orphaned_keys: vec![] };
        store.apply(&plan).await.unwrap();
        let row = store.load_aggregate(p.id).await.unwrap().unwrap().product().clone();
        assert_eq!((row.name.as_str(), row.updated_at), ("Topcoat", Some(now)));
        assert_eq!(store.statistics().await.unwrap().project_revenue, Decimal::new(250, 0));
    }

    #[tokio::test]
    async fn test_statistics_do_not_overflow() {
        let cat = Category::new("Hosiery");
        let store = MemoryStore::with_categories([cat.clone()]);
        let p = product("Sock", cat.id);
        let c = color(p.id, "Gris", "#808080", &["k1"]);
        let sizes = [size(&c, "M", i64::MAX), size(&c, "L", 1)];
        store.apply(&insert_plan(&p, &[c], &sizes)).await.unwrap();
        assert_eq!(store.statistics().await.unwrap().total_units, i64::MAX);
    }

    #[tokio::test]
    async fn test_patch_rechecks_expected_updated_at() {
        let cat = Category::new("Suits");
        let store = MemoryStore::with_categories([cat.clone()]);
        let mut p = product("Tuxedo", cat.id);
        let v1 = Utc::now();
        p.updated_at = Some(v1);
        store.apply(&insert_plan(&p, &[], &[])).await.unwrap();

        let patch = |name: &str, at| ProductPatch {
            id: p.id,
            name: name.into(),
            description: p.description.clone(),
            category_id: cat.id,
            cost_price: p.cost_price,
            sale_price: p.sale_price,
            updated_at: at,
            expected_updated_at: Some(v1),
        };
        let first = WritePlan { product_id: p.id, writes: vec![RowWrite::PatchProduct(patch("Dinner jacket", v1 + chrono::Duration::seconds(1)))], orphaned_keys: vec![] };
        let second = WritePlan { product_id: p.id, writes: vec![RowWrite::PatchProduct(patch("Smoking", v1 + chrono::Duration::seconds(2)))], orphaned_keys: vec![] };
        store.apply(&first).await.unwrap();
        let err = store.apply(&second).await.unwrap_err();
        assert!(matches!(err, CatalogError::Conflict { ref field, .. } if field == ROOT_FIELD));
        assert_eq!(store.load_aggregate(p.id).await.unwrap().unwrap().product().name, "Dinner jacket");
    }
}
