//! Product Aggregate

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ProductRow {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub category_id: Uuid,
    pub cost_price: Decimal,
    pub sale_price: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ColorRow {
    pub id: Uuid,
    pub product_id: Uuid,
    pub color_name: String,
    pub color_hex: String,
    /// Storage keys, in display order.
    pub images: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct SizeRow {
    pub id: Uuid,
    pub product_id: Uuid,
    pub product_color_id: Uuid,
    pub size: String,
    pub quantity: i64,
}

/// A color variant with the sizes it owns.
#[derive(Clone, Debug, PartialEq)]
pub struct ColorNode {
    pub color: ColorRow,
    pub sizes: Vec<SizeRow>,
}

/// A product and every color/size row it owns.
#[derive(Clone, Debug, PartialEq)]
pub struct ProductAggregate {
    product: ProductRow,
    colors: Vec<ColorNode>,
}

impl ProductAggregate {
    /// Groups flat rows into a tree. Rows owned by another product, and sizes
    /// whose color is not present, are ignored. Row order is preserved.
    pub fn assemble(product: ProductRow, colors: Vec<ColorRow>, sizes: Vec<SizeRow>) -> Self {
        let mut nodes: Vec<ColorNode> = colors
            .into_iter()
            .filter(|c| c.product_id == product.id)
            .map(|color| ColorNode { color, sizes: vec![] })
            .collect();
        for size in sizes.into_iter().filter(|s| s.product_id == product.id) {
            if let Some(node) = nodes.iter_mut().find(|n| n.color.id == size.product_color_id) {
                node.sizes.push(size);
            }
        }
        Self { product, colors: nodes }
    }

    pub fn id(&self) -> Uuid { self.product.id }
    pub fn product(&self) -> &ProductRow { &self.product }
    pub fn colors(&self) -> &[ColorNode] { &self.colors }
    pub fn color(&self, id: Uuid) -> Option<&ColorNode> { self.colors.iter().find(|n| n.color.id == id) }

    /// Size row `id`, only if it belongs to color `color_id`.
    pub fn size_of(&self, color_id: Uuid, id: Uuid) -> Option<&SizeRow> {
        self.color(color_id)?.sizes.iter().find(|s| s.id == id)
    }

    pub fn image_keys(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.colors
            .iter()
            .flat_map(|n| n.color.images.iter())
            .filter(|k| seen.insert(k.as_str()))
            .cloned()
            .collect()
    }

    /// Saturates instead of overflowing.
    pub fn total_units(&self) -> i64 {
        self.colors.iter().flat_map(|n| n.sizes.iter()).fold(0i64, |total, s| total.saturating_add(s.quantity))
    }
}
