//! Postgres catalog store. Each plan runs in one transaction.

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool};
use std::collections::HashMap;
use uuid::Uuid;

use super::{CatalogStatistics, CatalogStore, ListedProduct, PageRequest, RowWrite, WritePlan, DUPLICATE_NAME, STALE_EDIT};
use crate::domain::aggregates::{Category, ColorRow, ProductAggregate, ProductRow, SizeRow};
use crate::{CatalogError, Entity, Result, ROOT_FIELD};

const PRODUCT_COLUMNS: &str = "id, name, description, category_id, cost_price, sale_price, created_at, updated_at";
const COLOR_COLUMNS: &str = "id, product_id, color_name, color_hex, images";
const SIZE_COLUMNS: &str = "id, product_id, product_color_id, size, quantity";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self { Self { pool } }
}

fn write_error(e: sqlx::Error) -> CatalogError {
    if let sqlx::Error::Database(db) = &e {
        match db.constraint() {
            Some("products_name_idx") => return CatalogError::conflict("name", DUPLICATE_NAME),
            Some("products_category_id_fkey") => return CatalogError::not_found(Entity::Category, "category"),
            _ => {}
        }
    }
    CatalogError::Database(e)
}

fn expect_row(affected: u64, entity: Entity, field: &str) -> Result<()> {
    if affected == 0 { Err(CatalogError::not_found(entity, field)) } else { Ok(()) }
}

async fn fetch_aggregate(conn: &mut PgConnection, id: Uuid) -> Result<Option<ProductAggregate>> {
    let Some(product) = sqlx::query_as::<_, ProductRow>(&format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1"))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
    else {
        return Ok(None);
    };
    let colors = sqlx::query_as::<_, ColorRow>(&format!("SELECT {COLOR_COLUMNS} FROM product_colors WHERE product_id = $1 ORDER BY seq"))
        .bind(id)
        .fetch_all(&mut *conn)
        .await?;
    let sizes = sqlx::query_as::<_, SizeRow>(&format!("SELECT {SIZE_COLUMNS} FROM product_variants WHERE product_id = $1 ORDER BY seq"))
        .bind(id)
        .fetch_all(&mut *conn)
        .await?;
    Ok(Some(ProductAggregate::assemble(product, colors, sizes)))
}

async fn apply_write(conn: &mut PgConnection, write: &RowWrite) -> Result<()> {
    match write {
        RowWrite::InsertProduct(p) => {
            sqlx::query("INSERT INTO products (id, name, description, category_id, cost_price, sale_price, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)")
                .bind(p.id).bind(&p.name).bind(&p.description).bind(p.category_id).bind(p.cost_price).bind(p.sale_price).bind(p.created_at).bind(p.updated_at)
                .execute(&mut *conn).await.map_err(write_error)?;
        }
        RowWrite::PatchProduct(p) => {
            let done = sqlx::query(
                "UPDATE products SET name = $2, description = $3, category_id = $4, cost_price = $5, sale_price = $6, updated_at = $7 \
                 WHERE id = $1 AND ($8::TIMESTAMPTZ IS NULL OR updated_at = $8)",
            )
            .bind(p.id).bind(&p.name).bind(&p.description).bind(p.category_id).bind(p.cost_price).bind(p.sale_price).bind(p.updated_at).bind(p.expected_updated_at)
            .execute(&mut *conn).await.map_err(write_error)?;
            if done.rows_affected() == 0 && p.expected_updated_at.is_some() {
                let (exists,): (bool,) = sqlx::query_as("SELECT EXISTS (SELECT 1 FROM products WHERE id = $1)").bind(p.id).fetch_one(&mut *conn).await?;
                if exists {
                    return Err(CatalogError::conflict(ROOT_FIELD, STALE_EDIT));
                }
            }
            expect_row(done.rows_affected(), Entity::Product, ROOT_FIELD)?;
        }
        RowWrite::InsertColor(c) => {
            sqlx::query("INSERT INTO product_colors (id, product_id, color_name, color_hex, images) VALUES ($1, $2, $3, $4, $5)")
                .bind(c.id).bind(c.product_id).bind(&c.color_name).bind(&c.color_hex).bind(&c.images)
                .execute(&mut *conn).await.map_err(write_error)?;
        }
        RowWrite::PatchColor(c) => {
            let done = sqlx::query("UPDATE product_colors SET color_name = $3, color_hex = $4, images = $5 WHERE id = $1 AND product_id = $2")
                .bind(c.id).bind(c.product_id).bind(&c.color_name).bind(&c.color_hex).bind(&c.images)
                .execute(&mut *conn).await?;
            expect_row(done.rows_affected(), Entity::Color, "productColors")?;
        }
        RowWrite::DeleteColor(id) => {
            sqlx::query("DELETE FROM product_variants WHERE product_color_id = $1").bind(id).execute(&mut *conn).await?;
            let done = sqlx::query("DELETE FROM product_colors WHERE id = $1").bind(id).execute(&mut *conn).await?;
            expect_row(done.rows_affected(), Entity::Color, "productColors")?;
        }
        RowWrite::InsertSize(s) => {
            sqlx::query("INSERT INTO product_variants (id, product_id, product_color_id, size, quantity) VALUES ($1, $2, $3, $4, $5)")
                .bind(s.id).bind(s.product_id).bind(s.product_color_id).bind(&s.size).bind(s.quantity)
                .execute(&mut *conn).await.map_err(write_error)?;
        }
        RowWrite::PatchSize(s) => {
            let done = sqlx::query("UPDATE product_variants SET size = $3, quantity = $4 WHERE id = $1 AND product_color_id = $2")
                .bind(s.id).bind(s.product_color_id).bind(&s.size).bind(s.quantity)
                .execute(&mut *conn).await?;
            expect_row(done.rows_affected(), Entity::Size, "productColors")?;
        }
        RowWrite::DeleteSize(id) => {
            let done = sqlx::query("DELETE FROM product_variants WHERE id = $1").bind(id).execute(&mut *conn).await?;
            expect_row(done.rows_affected(), Entity::Size, "productColors")?;
        }
    }
    Ok(())
}

#[async_trait]
impl CatalogStore for PgStore {
    async fn category(&self, id: Uuid) -> Result<Option<Category>> {
        Ok(sqlx::query_as::<_, Category>("SELECT id, name, created_at FROM categories WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn list_categories(&self) -> Result<Vec<Category>> {
        Ok(sqlx::query_as::<_, Category>("SELECT id, name, created_at FROM categories ORDER BY name").fetch_all(&self.pool).await?)
    }

    async fn product_by_name(&self, name: &str) -> Result<Option<ProductRow>> {
        Ok(sqlx::query_as::<_, ProductRow>(&format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE name = $1"))
            .bind(name)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn load_aggregate(&self, id: Uuid) -> Result<Option<ProductAggregate>> {
        let mut conn = self.pool.acquire().await?;
        fetch_aggregate(&mut conn, id).await
    }

    async fn list_products(&self, page: PageRequest) -> Result<(Vec<ListedProduct>, i64)> {
        let products = sqlx::query_as::<_, ProductRow>(&format!("SELECT {PRODUCT_COLUMNS} FROM products ORDER BY seq DESC LIMIT $1 OFFSET $2"))
            .bind(i64::from(page.per_page))
            .bind(page.offset() as i64)
            .fetch_all(&self.pool)
            .await?;
        let total: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM products").fetch_one(&self.pool).await?;

        let ids: Vec<Uuid> = products.iter().map(|p| p.id).collect();
        let category_ids: Vec<Uuid> = products.iter().map(|p| p.category_id).collect();
        let colors = sqlx::query_as::<_, ColorRow>(&format!("SELECT {COLOR_COLUMNS} FROM product_colors WHERE product_id = ANY($1) ORDER BY seq"))
            .bind(&ids[..])
            .fetch_all(&self.pool)
            .await?;
        let sizes = sqlx::query_as::<_, SizeRow>(&format!("SELECT {SIZE_COLUMNS} FROM product_variants WHERE product_id = ANY($1) ORDER BY seq"))
            .bind(&ids[..])
            .fetch_all(&self.pool)
            .await?;
        let categories: HashMap<Uuid, Category> = sqlx::query_as::<_, Category>("SELECT id, name, created_at FROM categories WHERE id = ANY($1)")
            .bind(&category_ids[..])
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(|c| (c.id, c))
            .collect();

        let listed = products
            .into_iter()
            .filter_map(|product| {
                let category = categories.get(&product.category_id)?.clone();
                let id = product.id;
                let own_colors = colors.iter().filter(|c| c.product_id == id).cloned().collect();
                let own_sizes = sizes.iter().filter(|s| s.product_id == id).cloned().collect();
                Some(ListedProduct { aggregate: ProductAggregate::assemble(product, own_colors, own_sizes), category })
            })
            .collect();
        Ok((listed, total.0))
    }

    async fn statistics(&self) -> Result<CatalogStatistics> {
        let (total_products, project_revenue): (i64, Decimal) =
            sqlx::query_as("SELECT COUNT(*), COALESCE(SUM(sale_price), 0) FROM products").fetch_one(&self.pool).await?;
        let (total_units,): (i64,) =
            sqlx::query_as("SELECT COALESCE(SUM(quantity), 0)::BIGINT FROM product_variants").fetch_one(&self.pool).await?;
        Ok(CatalogStatistics { total_products, total_units, project_revenue })
    }

    async fn apply(&self, plan: &WritePlan) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for write in &plan.writes {
            apply_write(&mut tx, write).await?;
        }
        tx.commit().await?;
        tracing::debug!(product_id = %plan.product_id, writes = plan.len(), "plan committed");
        Ok(())
    }

    async fn delete_product(&self, id: Uuid) -> Result<Option<ProductAggregate>> {
        let mut tx = self.pool.begin().await?;
        let Some(removed) = fetch_aggregate(&mut tx, id).await? else { return Ok(None) };
        sqlx::query("DELETE FROM products WHERE id = $1").bind(id).execute(&mut *tx).await?;
        sqlx::query("DELETE FROM product_variants WHERE product_id = $1").bind(id).execute(&mut *tx).await?;
        sqlx::query("DELETE FROM product_colors WHERE product_id = $1").bind(id).execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(Some(removed))
    }
}
