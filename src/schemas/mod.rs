//! Wire shapes of the catalog and their validation.
//!
//! Inbound payloads are trimmed, checked field by field with `validator`, then
//! checked across fields (price ordering, color and size uniqueness). Failures
//! come back as a [`FieldErrors`] map keyed by camelCase paths such as
//! `productColors.0.sizes.1.size`; cross-field failures land on `salePrice`,
//! `productColors` or `productColors.<i>.sizes`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;
use validator::{Validate, ValidationErrors};

use crate::domain::aggregates::{Category, ProductAggregate};
use crate::domain::value_objects::{ColorHex, RowRef};
use crate::FieldErrors;

pub const MAX_IMAGES_PER_COLOR: usize = 10;

pub const MAX_QUANTITY: i64 = 1_000_000;

/// Prices are stored as `NUMERIC(12, 2)`.
pub const PRICE_SCALE: u32 = 2;

pub fn max_price() -> Decimal { Decimal::new(999_999_999_999, PRICE_SCALE) }

pub const PRODUCT_COLORS: &str = "productColors";

// =============================================================================
// Server payload
// =============================================================================

/// Product tree as submitted for create and edit. Images are storage keys of
/// already uploaded objects.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ProductInput {
    #[validate(length(min = 1, max = 100, message = "Product name is required (100 characters max)."))]
    pub name: String,
    #[validate(length(min = 1, max = 1000, message = "Description is required (1000 characters max)."))]
    pub description: String,
    #[validate(length(min = 1, message = "Category is required."))]
    pub category: String,
    pub cost_price: Decimal,
    pub sale_price: Decimal,
    #[validate(length(min = 1, message = "At least one color is required."))]
    pub product_colors: Vec<ColorInput>,
    /// Optimistic concurrency token for edits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_updated_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ColorInput {
    #[serde(default, rename = "productColorId")]
    pub id: RowRef<Uuid>,
    #[validate(length(min = 1, max = 30, message = "Color name is required (30 characters max)."))]
    pub color_name: String,
    pub color_hex: String,
    #[validate(length(min = 1, max = 10, message = "Between 1 and 10 images are required."))]
    pub images: Vec<String>,
    #[validate(length(min = 1, message = "At least one size is required."))]
    pub sizes: Vec<SizeInput>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SizeInput {
    #[serde(default, rename = "productVariantId")]
    pub id: RowRef<Uuid>,
    #[validate(length(min = 1, max = 5, message = "Size is required (5 characters max)."))]
    pub size: String,
    pub quantity: i64,
}

/// Normalized, type-checked product tree.
#[derive(Clone, Debug, PartialEq)]
pub struct ProductDraft {
    pub name: String,
    pub description: String,
    pub category_id: Uuid,
    pub cost_price: Decimal,
    pub sale_price: Decimal,
    pub colors: Vec<ColorDraft>,
    pub expected_updated_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ColorDraft {
    pub row: RowRef<Uuid>,
    pub color_name: String,
    pub color_hex: ColorHex,
    pub images: Vec<String>,
    pub sizes: Vec<SizeDraft>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SizeDraft {
    pub row: RowRef<Uuid>,
    pub size: String,
    pub quantity: i64,
}

impl ProductInput {
    pub fn normalized(mut self) -> Self {
        trim(&mut self.name);
        trim(&mut self.description);
        trim(&mut self.category);
        for color in &mut self.product_colors {
            trim(&mut color.color_name);
            trim(&mut color.color_hex);
            color.images.iter_mut().for_each(trim);
            for size in &mut color.sizes {
                trim(&mut size.size);
            }
        }
        self
    }

    /// Trims, validates and converts into a [`ProductDraft`].
    pub fn into_draft(self) -> Result<ProductDraft, FieldErrors> {
        let input = self.normalized();
        let mut errors = FieldErrors::new();
        absorb(&mut errors, "", input.validate());

        check_price(&mut errors, "costPrice", "Cost price", input.cost_price);
        check_price(&mut errors, "salePrice", "Sale price", input.sale_price);
        if input.sale_price < input.cost_price {
            errors.add("salePrice", "Sale price must be greater than or equal to cost price.");
        }

        let category_id = match Uuid::parse_str(&input.category) {
            Ok(id) => Some(id),
            Err(_) => {
                errors.add("category", "Invalid category.");
                None
            }
        };

        let mut colors = Vec::with_capacity(input.product_colors.len());
        for (i, color) in input.product_colors.iter().enumerate() {
            let prefix = format!("{PRODUCT_COLORS}.{i}");
            absorb(&mut errors, &prefix, color.validate());

            for (j, key) in color.images.iter().enumerate() {
                if key.is_empty() {
                    errors.add(format!("{prefix}.images.{j}"), "Image is required.");
                }
            }

            let mut sizes = Vec::with_capacity(color.sizes.len());
            for (j, size) in color.sizes.iter().enumerate() {
                absorb(&mut errors, &format!("{prefix}.sizes.{j}"), size.validate());
                if size.quantity < 1 {
                    errors.add(format!("{prefix}.sizes.{j}.quantity"), "Quantity cannot be lower than 1.");
                } else if size.quantity > MAX_QUANTITY {
                    errors.add(format!("{prefix}.sizes.{j}.quantity"), format!("Quantity cannot exceed {MAX_QUANTITY}."));
                }
                sizes.push(SizeDraft { row: size.id, size: size.size.clone(), quantity: size.quantity });
            }
            if !labels_unique(sizes.iter().map(|s| s.size.as_str())) {
                errors.add(format!("{prefix}.sizes"), "Sizes must be unique within a color.");
            }

            match ColorHex::new(color.color_hex.as_str()) {
                Ok(color_hex) => colors.push(ColorDraft {
                    row: color.id,
                    color_name: color.color_name.clone(),
                    color_hex,
                    images: color.images.clone(),
                    sizes,
                }),
                Err(e) => errors.add(format!("{prefix}.colorHex"), e.to_string()),
            }
        }

        let hexes: HashSet<String> = input.product_colors.iter().map(|c| c.color_hex.to_lowercase()).collect();
        let names: HashSet<String> = input.product_colors.iter().map(|c| c.color_name.to_lowercase()).collect();
        if hexes.len() != input.product_colors.len() || names.len() != input.product_colors.len() {
            errors.add(PRODUCT_COLORS, DUPLICATE_COLORS);
        }

        errors.into_result()?;
        let category_id = category_id.ok_or_else(|| FieldErrors::single("category", "Invalid category."))?;
        Ok(ProductDraft {
            name: input.name,
            description: input.description,
            category_id,
            cost_price: input.cost_price,
            sale_price: input.sale_price,
            colors,
            expected_updated_at: input.expected_updated_at,
        })
    }
}

pub const DUPLICATE_COLORS: &str = "Colors must have unique names and hex codes.";

/// Case-insensitive uniqueness of size labels.
pub fn labels_unique<'a>(labels: impl IntoIterator<Item = &'a str>) -> bool {
    let mut seen = HashSet::new();
    labels.into_iter().all(|l| seen.insert(l.to_lowercase()))
}

fn check_price(errors: &mut FieldErrors, path: &str, label: &str, price: Decimal) {
    if price < Decimal::ZERO {
        errors.add(path, format!("{label} cannot be negative."));
    } else if price > max_price() {
        errors.add(path, format!("{label} cannot exceed {}.", max_price()));
    } else if price.normalize().scale() > PRICE_SCALE {
        errors.add(path, format!("{label} can have at most {PRICE_SCALE} decimal places."));
    }
}

fn trim(value: &mut String) {
    let trimmed = value.trim();
    if trimmed.len() != value.len() {
        *value = trimmed.to_string();
    }
}

/// Copies the first message of each failing field, under `prefix`.
fn absorb(errors: &mut FieldErrors, prefix: &str, result: Result<(), ValidationErrors>) {
    let Err(found) = result else { return };
    let mut fields: Vec<_> = found.field_errors().into_iter().collect();
    fields.sort_by_key(|(field, _)| *field);
    for (field, list) in fields {
        if let Some(first) = list.first() {
            let message = first.message.as_ref().map(|m| m.to_string()).unwrap_or_else(|| first.code.to_string());
            let field = camel_case(field);
            let path = if prefix.is_empty() { field } else { format!("{prefix}.{field}") };
            errors.add(path, message);
        }
    }
}

fn camel_case(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut upper = false;
    for ch in field.chars() {
        if ch == '_' {
            upper = true;
        } else if upper {
            out.extend(ch.to_uppercase());
            upper = false;
        } else {
            out.push(ch);
        }
    }
    out
}

// =============================================================================
// Form payload
// =============================================================================

/// Image slot as held by the editing form.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "imageUploadStatus", rename_all = "lowercase")]
pub enum ImageEntry {
    Uploading {
        #[serde(rename = "imageId")]
        image_id: String,
    },
    Success {
        #[serde(rename = "imageId")]
        image_id: String,
        #[serde(rename = "imageKey", default, skip_serializing_if = "Option::is_none")]
        image_key: Option<String>,
        #[serde(rename = "imageUrl", default, skip_serializing_if = "Option::is_none")]
        image_url: Option<String>,
    },
}

impl ImageEntry {
    pub fn image_id(&self) -> &str {
        match self { Self::Uploading { image_id } | Self::Success { image_id, .. } => image_id }
    }
    pub fn is_uploading(&self) -> bool { matches!(self, Self::Uploading { .. }) }
}

/// Product tree as held by the create/edit form.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductForm {
    pub name: String,
    pub description: String,
    pub category: String,
    pub cost_price: Decimal,
    pub sale_price: Decimal,
    pub product_colors: Vec<ColorForm>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_updated_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColorForm {
    #[serde(default, rename = "productColorId")]
    pub id: RowRef<Uuid>,
    pub color_name: String,
    pub color_hex: String,
    pub images: Vec<ImageEntry>,
    pub sizes: Vec<SizeInput>,
}

impl ProductForm {
    /// True while any slot is still uploading; submission must wait.
    pub fn has_pending_uploads(&self) -> bool {
        self.product_colors.iter().flat_map(|c| c.images.iter()).any(ImageEntry::is_uploading)
    }

    /// Server payload for this form. Fails when an image is still uploading or
    /// a finished upload carries no storage key.
    pub fn to_input(&self) -> Result<ProductInput, FieldErrors> {
        let (input, errors) = self.split_images();
        errors.into_result()?;
        Ok(input)
    }

    /// Full form validation: image state first, then the server rules.
    pub fn into_draft(self) -> Result<ProductDraft, FieldErrors> {
        let (input, mut errors) = self.split_images();
        match input.into_draft() {
            Ok(draft) if errors.is_empty() => Ok(draft),
            Ok(_) => Err(errors),
            Err(more) => {
                errors.merge(more);
                Err(errors)
            }
        }
    }

    fn split_images(&self) -> (ProductInput, FieldErrors) {
        let mut errors = FieldErrors::new();
        let product_colors = self
            .product_colors
            .iter()
            .enumerate()
            .map(|(i, color)| {
                let images = color
                    .images
                    .iter()
                    .enumerate()
                    .map(|(j, image)| {
                        let path = format!("{PRODUCT_COLORS}.{i}.images.{j}");
                        match image {
                            ImageEntry::Uploading { .. } => {
                                errors.add(path, "Image is still uploading.");
                                String::new()
                            }
                            ImageEntry::Success { image_key: Some(key), .. } if !key.trim().is_empty() => key.clone(),
                            ImageEntry::Success { .. } => {
                                errors.add(path, "Uploaded image has no storage key.");
                                String::new()
                            }
                        }
                    })
                    .collect();
                ColorInput {
                    id: color.id,
                    color_name: color.color_name.clone(),
                    color_hex: color.color_hex.clone(),
                    images,
                    sizes: color.sizes.clone(),
                }
            })
            .collect();
        let input = ProductInput {
            name: self.name.clone(),
            description: self.description.clone(),
            category: self.category.clone(),
            cost_price: self.cost_price,
            sale_price: self.sale_price,
            product_colors,
            expected_updated_at: self.expected_updated_at,
        };
        (input, errors)
    }

    /// Edit-form defaults for a listed product: every image is a finished
    /// upload showing its remote URL.
    pub fn from_view(view: &ProductView) -> Self {
        Self {
            name: view.name.clone(),
            description: view.description.clone(),
            category: view.category.id.to_string(),
            cost_price: view.cost_price,
            sale_price: view.sale_price,
            product_colors: view
                .product_colors
                .iter()
                .map(|c| ColorForm {
                    id: RowRef::Existing(c.id),
                    color_name: c.color_name.clone(),
                    color_hex: c.color_hex.clone(),
                    images: c
                        .images
                        .iter()
                        .map(|img| ImageEntry::Success {
                            image_id: img.image_key.clone(),
                            image_key: Some(img.image_key.clone()),
                            image_url: Some(img.image_url.clone()),
                        })
                        .collect(),
                    sizes: c
                        .sizes
                        .iter()
                        .map(|s| SizeInput { id: RowRef::Existing(s.id), size: s.size.clone(), quantity: s.quantity })
                        .collect(),
                })
                .collect(),
            expected_updated_at: view.updated_at,
        }
    }
}

// =============================================================================
// Read models
// =============================================================================

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryRef {
    pub id: Uuid,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageView {
    pub image_key: String,
    pub image_url: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SizeView {
    pub id: Uuid,
    pub size: String,
    pub quantity: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColorView {
    pub id: Uuid,
    pub color_name: String,
    pub color_hex: String,
    pub images: Vec<ImageView>,
    pub sizes: Vec<SizeView>,
}

/// Listed product, with image keys resolved to display URLs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductView {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub category: CategoryRef,
    pub cost_price: Decimal,
    pub sale_price: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub product_colors: Vec<ColorView>,
}

impl ProductView {
    /// `resolve` maps a storage key to its display URL.
    pub fn build(aggregate: &ProductAggregate, category: &Category, mut resolve: impl FnMut(&str) -> String) -> Self {
        let p = aggregate.product();
        Self {
            id: p.id,
            name: p.name.clone(),
            description: p.description.clone(),
            category: CategoryRef { id: category.id, name: category.name.clone() },
            cost_price: p.cost_price,
            sale_price: p.sale_price,
            created_at: p.created_at,
            updated_at: p.updated_at,
            product_colors: aggregate
                .colors()
                .iter()
                .map(|node| ColorView {
                    id: node.color.id,
                    color_name: node.color.color_name.clone(),
                    color_hex: node.color.color_hex.clone(),
                    images: node
                        .color
                        .images
                        .iter()
                        .map(|key| ImageView { image_key: key.clone(), image_url: resolve(key) })
                        .collect(),
                    sizes: node.sizes.iter().map(|s| SizeView { id: s.id, size: s.size.clone(), quantity: s.quantity }).collect(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn size(label: &str, quantity: i64) -> SizeInput {
        SizeInput { id: RowRef::New, size: label.into(), quantity }
    }

    pub fn color(name: &str, hex: &str, images: &[&str], sizes: Vec<SizeInput>) -> ColorInput {
        ColorInput {
            id: RowRef::New,
            color_name: name.into(),
            color_hex: hex.into(),
            images: images.iter().map(|k| k.to_string()).collect(),
            sizes,
        }
    }

    pub fn blazer(category: Uuid) -> ProductInput {
        ProductInput {
            name: "Blazer".into(),
            description: "Italian wool blazer".into(),
            category: category.to_string(),
            cost_price: Decimal::new(100, 0),
            sale_price: Decimal::new(200, 0),
            product_colors: vec![color("Noir", "#000000", &["k1"], vec![size("M", 5)])],
            expected_updated_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_valid_payload_is_trimmed() {
        let mut input = blazer(Uuid::now_v7());
        input.name = "  Blazer  ".into();
        input.product_colors[0].color_name = " Noir ".into();
        input.product_colors[0].sizes[0].size = " M ".into();
        let draft = input.into_draft().unwrap();
        assert_eq!(draft.name, "Blazer");
        assert_eq!(draft.colors[0].color_name, "Noir");
        assert_eq!(draft.colors[0].color_hex.as_str(), "#000000");
        assert_eq!(draft.colors[0].sizes[0].size, "M");
    }

    #[test]
    fn test_sale_below_cost_fails_on_sale_price() {
        let mut input = blazer(Uuid::now_v7());
        input.sale_price = Decimal::new(99, 0);
        let errors = input.into_draft().unwrap_err();
        assert!(errors.contains("salePrice"));
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn test_equal_prices_pass() {
        let mut input = blazer(Uuid::now_v7());
        input.sale_price = input.cost_price;
        assert!(input.into_draft().is_ok());
    }

    #[test]
    fn test_negative_cost_price() {
        let mut input = blazer(Uuid::now_v7());
        input.cost_price = Decimal::new(-1, 0);
        let errors = input.into_draft().unwrap_err();
        assert_eq!(errors.get("costPrice"), Some("Cost price cannot be negative."));
    }

    #[test]
    fn test_price_bounds_follow_storage() {
        let mut input = blazer(Uuid::now_v7());
        input.cost_price = Decimal::new(19_999, 3);
        input.sale_price = Decimal::new(10_000_000_000, 0);
        let errors = input.into_draft().unwrap_err();
        assert_eq!(errors.get("costPrice"), Some("Cost price can have at most 2 decimal places."));
        assert_eq!(errors.get("salePrice"), Some("Sale price cannot exceed 9999999999.99."));

        let mut input = blazer(Uuid::now_v7());
        input.cost_price = Decimal::new(19_990, 3);
        input.sale_price = max_price();
        assert!(input.into_draft().is_ok());
    }

    #[test]
    fn test_quantity_upper_bound() {
        let mut input = blazer(Uuid::now_v7());
        input.product_colors[0].sizes[0].quantity = i64::MAX;
        let errors = input.into_draft().unwrap_err();
        assert_eq!(errors.get("productColors.0.sizes.0.quantity"), Some("Quantity cannot exceed 1000000."));

        let mut input = blazer(Uuid::now_v7());
        input.product_colors[0].sizes[0].quantity = MAX_QUANTITY;
        assert!(input.into_draft().is_ok());
    }

    #[test]
    fn test_duplicate_hex_is_case_insensitive() {
        let mut input = blazer(Uuid::now_v7());
        input.product_colors[0].color_hex = "#abcdef".into();
        input.product_colors.push(color("Bleu", "#ABCDEF", &["k2"], vec![size("M", 1)]));
        let errors = input.into_draft().unwrap_err();
        assert_eq!(errors.get(PRODUCT_COLORS), Some(DUPLICATE_COLORS));
    }

    #[test]
    fn test_duplicate_color_name() {
        let mut input = blazer(Uuid::now_v7());
        input.product_colors.push(color("NOIR", "#111111", &["k2"], vec![size("M", 1)]));
        assert!(input.into_draft().unwrap_err().contains(PRODUCT_COLORS));
    }

    #[test]
    fn test_duplicate_sizes_reported_on_color() {
        let mut input = blazer(Uuid::now_v7());
        input.product_colors[0].sizes.push(size("m", 2));
        let errors = input.into_draft().unwrap_err();
        assert!(errors.contains("productColors.0.sizes"));
    }

    #[test]
    fn test_field_paths_and_lengths() {
        let mut input = blazer(Uuid::now_v7());
        input.name = "x".repeat(101);
        input.description = "   ".into();
        input.product_colors[0].color_hex = "#12".into();
        input.product_colors[0].sizes[0].size = "XXXXXL".into();
        input.product_colors[0].sizes[0].quantity = 0;
        let errors = input.into_draft().unwrap_err();
        assert!(errors.contains("name"));
        assert!(errors.contains("description"));
        assert_eq!(errors.get("productColors.0.colorHex"), Some("Invalid hexadecimal color code."));
        assert!(errors.contains("productColors.0.sizes.0.size"));
        assert_eq!(errors.get("productColors.0.sizes.0.quantity"), Some("Quantity cannot be lower than 1."));
    }

    #[test]
    fn test_image_count_bounds() {
        let mut input = blazer(Uuid::now_v7());
        input.product_colors[0].images.clear();
        assert!(input.clone().into_draft().unwrap_err().contains("productColors.0.images"));
        input.product_colors[0].images = (0..11).map(|i| format!("k{i}")).collect();
        assert!(input.into_draft().unwrap_err().contains("productColors.0.images"));
    }

    #[test]
    fn test_category_must_be_an_id() {
        let mut input = blazer(Uuid::now_v7());
        input.category = "shirts".into();
        assert_eq!(input.into_draft().unwrap_err().get("category"), Some("Invalid category."));
    }

    #[test]
    fn test_wire_names() {
        let json = serde_json::json!({
            "name": "Blazer", "description": "d", "category": Uuid::now_v7(),
            "costPrice": 100, "salePrice": 200.5,
            "productColors": [{
                "productColorId": null, "colorName": "Noir", "colorHex": "#000",
                "images": ["k1"], "sizes": [{"size": "M", "quantity": 5}]
            }]
        });
        let input: ProductInput = serde_json::from_value(json).unwrap();
        assert!(input.product_colors[0].id.is_new());
        assert!(input.product_colors[0].sizes[0].id.is_new());
        assert_eq!(input.sale_price, Decimal::new(2005, 1));
    }

    fn form_with(images: Vec<ImageEntry>) -> ProductForm {
        ProductForm {
            name: "Blazer".into(),
            description: "d".into(),
            category: Uuid::now_v7().to_string(),
            cost_price: Decimal::new(1, 0),
            sale_price: Decimal::new(2, 0),
            product_colors: vec![ColorForm {
                id: RowRef::New,
                color_name: "Noir".into(),
                color_hex: "#000".into(),
                images,
                sizes: vec![size("M", 1)],
            }],
            expected_updated_at: None,
        }
    }

    #[test]
    fn test_form_blocks_uploading_images() {
        let form = form_with(vec![ImageEntry::Uploading { image_id: "a.jpg".into() }]);
        assert!(form.has_pending_uploads());
        let errors = form.into_draft().unwrap_err();
        assert_eq!(errors.get("productColors.0.images.0"), Some("Image is still uploading."));
    }

    #[test]
    fn test_form_success_needs_key() {
        let form = form_with(vec![ImageEntry::Success { image_id: "a.jpg".into(), image_key: Some(" ".into()), image_url: None }]);
        assert_eq!(form.to_input().unwrap_err().get("productColors.0.images.0"), Some("Uploaded image has no storage key."));
    }

    #[test]
    fn test_form_to_input_maps_keys() {
        let form = form_with(vec![ImageEntry::Success {
            image_id: "a.jpg".into(),
            image_key: Some("key-a".into()),
            image_url: Some("blob:local/1".into()),
        }]);
        assert_eq!(form.to_input().unwrap().product_colors[0].images, vec!["key-a"]);
        assert!(form.into_draft().is_ok());
    }

    #[test]
    fn test_edit_form_defaults_round_trip() {
        use crate::domain::aggregates::product::fixtures::{color as color_row, product, size as size_row};
        use crate::reconcile::{plan_update, ReconcileOptions};

        let category = Category::new("Blazers");
        let mut row = product("Blazer", category.id);
        row.updated_at = Some(Utc::now());
        let noir = color_row(row.id, "Noir", "#000000", &["k1", "k2"]);
        let m = size_row(&noir, "M", 5);
        let aggregate = ProductAggregate::assemble(row, vec![noir.clone()], vec![m.clone()]);
        let view = ProductView::build(&aggregate, &category, |key| format!("https://cdn.example/{key}"));

        let form = ProductForm::from_view(&view);
        assert_eq!(form.category, category.id.to_string());
        assert_eq!(form.expected_updated_at, view.updated_at);
        assert_eq!(form.product_colors[0].id, RowRef::Existing(noir.id));
        assert_eq!(form.product_colors[0].sizes[0].id, RowRef::Existing(m.id));
        assert_eq!(
            form.product_colors[0].images[1],
            ImageEntry::Success { image_id: "k2".into(), image_key: Some("k2".into()), image_url: Some("https://cdn.example/k2".into()) }
        );
        assert!(!form.has_pending_uploads());

        let draft = form.into_draft().unwrap();
        let plan = plan_update(&aggregate, &draft, ReconcileOptions::default(), Utc::now()).unwrap();
        assert!(plan.is_empty());
        assert!(plan.orphaned_keys.is_empty());
    }

    #[test]
    fn test_image_entry_wire_shape() {
        let entry: ImageEntry = serde_json::from_value(serde_json::json!({
            "imageUploadStatus": "success", "imageId": "a.jpg", "imageKey": "k", "imageUrl": "https://x/k"
        }))
        .unwrap();
        assert_eq!(entry.image_id(), "a.jpg");
        let uploading = serde_json::to_value(ImageEntry::Uploading { image_id: "b.jpg".into() }).unwrap();
        assert_eq!(uploading, serde_json::json!({"imageUploadStatus": "uploading", "imageId": "b.jpg"}));
    }
}
