//! Reconciliation
//!
//! Turns a validated [`ProductDraft`] into a [`WritePlan`]. Creates become
//! straight inserts. Edits are diffed against the persisted aggregate:
//! unchanged rows produce no write, rows with an existing id are patched,
//! rows without one are inserted, and image keys no longer referenced
//! anywhere in the final tree are reported as orphaned.
//!
//! Planning is pure. Applying the plan and deleting orphaned objects is the
//! caller's job.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use uuid::Uuid;

use crate::domain::aggregates::{ColorRow, ProductAggregate, ProductRow, SizeRow};
use crate::domain::value_objects::RowRef;
use crate::repository::{ProductPatch, RowWrite, WritePlan};
pub use crate::repository::STALE_EDIT;
use crate::schemas::{labels_unique, ColorDraft, ProductDraft, DUPLICATE_COLORS, PRODUCT_COLORS};
use crate::{CatalogError, Entity, FieldErrors, Result, ROOT_FIELD};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReconcileOptions {
    /// Delete persisted colors and sizes that an edit does not resubmit.
    pub prune_missing_children: bool,
}

fn color_path(i: usize) -> String { format!("{PRODUCT_COLORS}.{i}.productColorId") }
fn size_path(i: usize, j: usize) -> String { format!("{PRODUCT_COLORS}.{i}.sizes.{j}.productVariantId") }

fn color_row(id: Uuid, product_id: Uuid, draft: &ColorDraft) -> ColorRow {
    ColorRow {
        id,
        product_id,
        color_name: draft.color_name.clone(),
        color_hex: draft.color_hex.as_str().to_string(),
        images: draft.images.clone(),
    }
}

/// Plans the rows of a new product. Drafts may not reference existing rows.
pub fn plan_create(draft: &ProductDraft, now: DateTime<Utc>) -> Result<WritePlan> {
    let mut errors = FieldErrors::new();
    for (i, color) in draft.colors.iter().enumerate() {
        if !color.row.is_new() {
            errors.add(color_path(i), "A new product cannot reference an existing color.");
        }
        for (j, size) in color.sizes.iter().enumerate() {
            if !size.row.is_new() {
                errors.add(size_path(i, j), "A new product cannot reference an existing size.");
            }
        }
    }
    errors.into_result()?;

    let product_id = Uuid::now_v7();
    let mut writes = vec![RowWrite::InsertProduct(ProductRow {
        id: product_id,
        name: draft.name.clone(),
        description: draft.description.clone(),
        category_id: draft.category_id,
        cost_price: draft.cost_price,
        sale_price: draft.sale_price,
        created_at: now,
        updated_at: None,
    })];
    for color in &draft.colors {
        let color_id = Uuid::now_v7();
        writes.push(RowWrite::InsertColor(color_row(color_id, product_id, color)));
        for size in &color.sizes {
            writes.push(RowWrite::InsertSize(SizeRow {
                id: Uuid::now_v7(),
                product_id,
                product_color_id: color_id,
                size: size.size.clone(),
                quantity: size.quantity,
            }));
        }
    }
    Ok(WritePlan { product_id, writes, orphaned_keys: vec![] })
}

/// Checks every existing id in the draft against `existing`. A missing row is
/// `NotFound` on its id path; an id submitted twice is a validation failure.
fn check_references(existing: &ProductAggregate, draft: &ProductDraft) -> Result<()> {
    let mut errors = FieldErrors::new();
    let mut colors_seen = HashSet::new();
    let mut sizes_seen = HashSet::new();
    for (i, color) in draft.colors.iter().enumerate() {
        let color_id = match color.row {
            RowRef::Existing(id) => {
                if existing.color(id).is_none() {
                    return Err(CatalogError::not_found(Entity::Color, color_path(i)));
                }
                if !colors_seen.insert(id) {
                    errors.add(color_path(i), "This color is submitted more than once.");
                }
                Some(id)
            }
            RowRef::New => None,
        };
        for (j, size) in color.sizes.iter().enumerate() {
            let RowRef::Existing(size_id) = size.row else { continue };
            if color_id.and_then(|c| existing.size_of(c, size_id)).is_none() {
                return Err(CatalogError::not_found(Entity::Size, size_path(i, j)));
            }
            if !sizes_seen.insert(size_id) {
                errors.add(size_path(i, j), "This size is submitted more than once.");
            }
        }
    }
    errors.into_result().map_err(CatalogError::from)
}

/// Plans the writes that turn `existing` into `draft`.
pub fn plan_update(
    existing: &ProductAggregate,
    draft: &ProductDraft,
    options: ReconcileOptions,
    now: DateTime<Utc>,
) -> Result<WritePlan> {
    let stored = existing.product();
    if let Some(expected) = draft.expected_updated_at {
        if stored.updated_at != Some(expected) {
            return Err(CatalogError::conflict(ROOT_FIELD, STALE_EDIT));
        }
    }
    check_references(existing, draft)?;

    let product_id = existing.id();
    let submitted: HashSet<Uuid> = draft.colors.iter().filter_map(|c| c.row.existing().copied()).collect();
    let retained: Vec<&ColorRow> = if options.prune_missing_children {
        vec![]
    } else {
        existing.colors().iter().map(|n| &n.color).filter(|c| !submitted.contains(&c.id)).collect()
    };

    // Final-state uniqueness, including rows the edit leaves in place.
    let mut errors = FieldErrors::new();
    let names = draft.colors.iter().map(|c| c.color_name.to_lowercase()).chain(retained.iter().map(|c| c.color_name.to_lowercase()));
    let hexes = draft.colors.iter().map(|c| c.color_hex.folded()).chain(retained.iter().map(|c| c.color_hex.to_lowercase()));
    let total = draft.colors.len() + retained.len();
    if names.collect::<HashSet<_>>().len() != total || hexes.collect::<HashSet<_>>().len() != total {
        errors.add(PRODUCT_COLORS, DUPLICATE_COLORS);
    }

    let mut deletes = Vec::new();
    let mut child_writes = Vec::new();
    let mut final_keys: HashSet<&str> = retained.iter().flat_map(|c| c.images.iter().map(String::as_str)).collect();

    for (i, color) in draft.colors.iter().enumerate() {
        final_keys.extend(color.images.iter().map(String::as_str));
        let color_id = match color.row {
            RowRef::Existing(id) => {
                let node = existing.color(id).ok_or_else(|| CatalogError::not_found(Entity::Color, color_path(i)))?;
                let row = color_row(id, product_id, color);
                if row != node.color {
                    child_writes.push(RowWrite::PatchColor(row));
                }

                let kept: HashSet<Uuid> = color.sizes.iter().filter_map(|s| s.row.existing().copied()).collect();
                let unsubmitted = node.sizes.iter().filter(|s| !kept.contains(&s.id));
                if options.prune_missing_children {
                    deletes.extend(unsubmitted.map(|s| RowWrite::DeleteSize(s.id)));
                } else {
                    let labels = color.sizes.iter().map(|s| s.size.as_str()).chain(unsubmitted.map(|s| s.size.as_str()));
                    if !labels_unique(labels) {
                        errors.add(format!("{PRODUCT_COLORS}.{i}.sizes"), "Sizes must be unique within a color.");
                    }
                }
                id
            }
            RowRef::New => {
                let id = Uuid::now_v7();
                child_writes.push(RowWrite::InsertColor(color_row(id, product_id, color)));
                id
            }
        };

        for size in &color.sizes {
            match size.row {
                RowRef::Existing(size_id) => {
                    let row = SizeRow { id: size_id, product_id, product_color_id: color_id, size: size.size.clone(), quantity: size.quantity };
                    if existing.size_of(color_id, size_id) != Some(&row) {
                        child_writes.push(RowWrite::PatchSize(row));
                    }
                }
                RowRef::New => child_writes.push(RowWrite::InsertSize(SizeRow {
                    id: Uuid::now_v7(),
                    product_id,
                    product_color_id: color_id,
                    size: size.size.clone(),
                    quantity: size.quantity,
                })),
            }
        }
    }
    errors.into_result()?;

    if options.prune_missing_children {
        for node in existing.colors().iter().filter(|n| !submitted.contains(&n.color.id)) {
            deletes.push(RowWrite::DeleteColor(node.color.id));
        }
    }

    let fields_changed = stored.name != draft.name
        || stored.description != draft.description
        || stored.category_id != draft.category_id
        || stored.cost_price != draft.cost_price
        || stored.sale_price != draft.sale_price;

    let mut writes = Vec::with_capacity(deletes.len() + child_writes.len() + 1);
    if fields_changed || !deletes.is_empty() || !child_writes.is_empty() {
        writes.push(RowWrite::PatchProduct(ProductPatch {
            id: product_id,
            name: draft.name.clone(),
            description: draft.description.clone(),
            category_id: draft.category_id,
            cost_price: draft.cost_price,
            sale_price: draft.sale_price,
            updated_at: now,
            expected_updated_at: draft.expected_updated_at,
        }));
    }
    writes.extend(deletes);
    writes.extend(child_writes);

    let orphaned_keys = existing.image_keys().into_iter().filter(|k| !final_keys.contains(k.as_str())).collect();
    Ok(WritePlan { product_id, writes, orphaned_keys })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::product::fixtures::{color, product, size};
    use crate::domain::value_objects::ColorHex;
    use crate::schemas::SizeDraft;
    use rust_decimal::Decimal;

    fn persisted() -> ProductAggregate {
        let p = product("Blazer", Uuid::now_v7());
        let noir = color(p.id, "Noir", "#000000", &["k1", "k2"]);
        let bleu = color(p.id, "Bleu", "#0000FF", &["k3"]);
        let sizes = vec![size(&noir, "M", 5), size(&noir, "L", 2), size(&bleu, "S", 1)];
        ProductAggregate::assemble(p, vec![noir, bleu], sizes)
    }

    /// Resubmits `agg` unchanged.
    fn draft_of(agg: &ProductAggregate) -> ProductDraft {
        let p = agg.product();
        ProductDraft {
            name: p.name.clone(),
            description: p.description.clone(),
            category_id: p.category_id,
            cost_price: p.cost_price,
            sale_price: p.sale_price,
            colors: agg
                .colors()
                .iter()
                .map(|n| ColorDraft {
                    row: RowRef::Existing(n.color.id),
                    color_name: n.color.color_name.clone(),
                    color_hex: ColorHex::new(n.color.color_hex.as_str()).unwrap(),
                    images: n.color.images.clone(),
                    sizes: n
                        .sizes
                        .iter()
                        .map(|s| SizeDraft { row: RowRef::Existing(s.id), size: s.size.clone(), quantity: s.quantity })
                        .collect(),
                })
                .collect(),
            expected_updated_at: None,
        }
    }

    fn new_color(name: &str, hex: &str, images: &[&str], sizes: &[(&str, i64)]) -> ColorDraft {
        ColorDraft {
            row: RowRef::New,
            color_name: name.into(),
            color_hex: ColorHex::new(hex).unwrap(),
            images: images.iter().map(|k| k.to_string()).collect(),
            sizes: sizes.iter().map(|(l, q)| SizeDraft { row: RowRef::New, size: l.to_string(), quantity: *q }).collect(),
        }
    }

    fn update(agg: &ProductAggregate, draft: &ProductDraft) -> Result<WritePlan> {
        plan_update(agg, draft, ReconcileOptions::default(), Utc::now())
    }

    #[test]
    fn test_create_inserts_whole_tree() {
        let mut draft = draft_of(&persisted());
        draft.colors = vec![new_color("Noir", "#000000", &["k1"], &[("M", 5), ("L", 1)])];
        let plan = plan_create(&draft, Utc::now()).unwrap();

        let summary = plan.summary();
        assert_eq!((summary.colors_inserted, summary.sizes_inserted), (1, 2));
        let RowWrite::InsertColor(c) = &plan.writes[1] else { panic!("expected color insert") };
        assert_eq!(c.product_id, plan.product_id);
        for write in &plan.writes[2..] {
            let RowWrite::InsertSize(s) = write else { panic!("expected size insert") };
            assert_eq!((s.product_id, s.product_color_id), (plan.product_id, c.id));
        }
    }

    #[test]
    fn test_create_rejects_existing_ids() {
        let draft = draft_of(&persisted());
        let Err(CatalogError::Validation(errors)) = plan_create(&draft, Utc::now()) else { panic!("expected validation error") };
        assert!(errors.contains("productColors.0.productColorId"));
        assert!(errors.contains("productColors.0.sizes.0.productVariantId"));
    }

    #[test]
    fn test_unchanged_tree_plans_nothing() {
        let agg = persisted();
        let plan = update(&agg, &draft_of(&agg)).unwrap();
        assert!(plan.is_empty());
        assert!(plan.orphaned_keys.is_empty());
    }

    #[test]
    fn test_removed_images_are_exactly_orphaned() {
        let agg = persisted();
        let mut draft = draft_of(&agg);
        draft.colors[0].images = vec!["k2".into(), "k9".into()];
        let plan = update(&agg, &draft).unwrap();

        assert_eq!(plan.orphaned_keys, vec!["k1"]);
        let summary = plan.summary();
        assert!(summary.product_patched);
        assert_eq!(summary.colors_patched, 1);
        assert_eq!(plan.len(), 2);
    }

    #[test]
    fn test_key_moved_to_sibling_is_not_orphaned() {
        let agg = persisted();
        let mut draft = draft_of(&agg);
        draft.colors[0].images = vec!["k2".into()];
        draft.colors[1].images = vec!["k3".into(), "k1".into()];
        assert!(update(&agg, &draft).unwrap().orphaned_keys.is_empty());
    }

    #[test]
    fn test_new_color_inserts_with_its_sizes() {
        let agg = persisted();
        let mut draft = draft_of(&agg);
        draft.colors.push(new_color("Gris", "#888", &["k7"], &[("M", 2), ("XL", 4)]));
        let plan = update(&agg, &draft).unwrap();

        let inserted: Vec<&ColorRow> = plan.writes.iter().filter_map(|w| match w { RowWrite::InsertColor(c) => Some(c), _ => None }).collect();
        assert_eq!(inserted.len(), 1);
        let sizes: Vec<&SizeRow> = plan.writes.iter().filter_map(|w| match w { RowWrite::InsertSize(s) => Some(s), _ => None }).collect();
        assert_eq!(sizes.len(), 2);
        assert!(sizes.iter().all(|s| s.product_color_id == inserted[0].id && s.product_id == agg.id()));
    }

    #[test]
    fn test_size_patch_only_when_changed() {
        let agg = persisted();
        let mut draft = draft_of(&agg);
        draft.colors[0].sizes[1].quantity = 9;
        let plan = update(&agg, &draft).unwrap();
        let summary = plan.summary();
        assert_eq!((summary.sizes_patched, summary.colors_patched), (1, 0));
    }

    #[test]
    fn test_product_fields_patch() {
        let agg = persisted();
        let mut draft = draft_of(&agg);
        draft.sale_price = Decimal::new(300, 0);
        let now = Utc::now();
        let plan = plan_update(&agg, &draft, ReconcileOptions::default(), now).unwrap();
        let [RowWrite::PatchProduct(patch)] = plan.writes.as_slice() else { panic!("expected a single product patch") };
        assert_eq!((patch.sale_price, patch.updated_at), (Decimal::new(300, 0), now));
    }

    #[test]
    fn test_unsubmitted_children_survive_without_pruning() {
        let agg = persisted();
        let mut draft = draft_of(&agg);
        draft.colors.truncate(1);
        draft.colors[0].sizes.truncate(1);
        let plan = update(&agg, &draft).unwrap();
        assert!(plan.is_empty());
        assert!(plan.orphaned_keys.is_empty());
    }

    #[test]
    fn test_pruning_deletes_unsubmitted_children() {
        let agg = persisted();
        let mut draft = draft_of(&agg);
        draft.colors.truncate(1);
        draft.colors[0].sizes.truncate(1);
        let plan = plan_update(&agg, &draft, ReconcileOptions { prune_missing_children: true }, Utc::now()).unwrap();

        let summary = plan.summary();
        assert_eq!((summary.colors_deleted, summary.sizes_deleted), (1, 1));
        assert!(summary.product_patched);
        assert_eq!(plan.orphaned_keys, vec!["k3"]);
    }

    #[test]
    fn test_retained_color_counts_toward_uniqueness() {
        let agg = persisted();
        let mut draft = draft_of(&agg);
        draft.colors.truncate(1);
        draft.colors.push(new_color("Bleu nuit", "#0000ff", &["k8"], &[("M", 1)]));
        let Err(CatalogError::Validation(errors)) = update(&agg, &draft) else { panic!("expected validation error") };
        assert_eq!(errors.get(PRODUCT_COLORS), Some(DUPLICATE_COLORS));

        let pruned = plan_update(&agg, &draft, ReconcileOptions { prune_missing_children: true }, Utc::now());
        assert!(pruned.is_ok());
    }

    #[test]
    fn test_retained_size_counts_toward_uniqueness() {
        let agg = persisted();
        let mut draft = draft_of(&agg);
        draft.colors[0].sizes.truncate(1);
        draft.colors[0].sizes.push(SizeDraft { row: RowRef::New, size: "l".into(), quantity: 1 });
        let Err(CatalogError::Validation(errors)) = update(&agg, &draft) else { panic!("expected validation error") };
        assert!(errors.contains("productColors.0.sizes"));
    }

    #[test]
    fn test_foreign_references_are_not_found() {
        let agg = persisted();
        let other = persisted();

        let mut draft = draft_of(&agg);
        draft.colors[0].row = RowRef::Existing(other.colors()[0].color.id);
        assert!(matches!(
            update(&agg, &draft),
            Err(CatalogError::NotFound { entity: Entity::Color, ref field }) if field == "productColors.0.productColorId"
        ));

        let mut draft = draft_of(&agg);
        let bleu_size = agg.colors()[1].sizes[0].id;
        draft.colors[0].sizes[0].row = RowRef::Existing(bleu_size);
        assert!(matches!(update(&agg, &draft), Err(CatalogError::NotFound { entity: Entity::Size, .. })));

        let mut draft = draft_of(&agg);
        let mut fresh = new_color("Gris", "#888", &["k7"], &[]);
        fresh.sizes.push(SizeDraft { row: RowRef::Existing(bleu_size), size: "S".into(), quantity: 1 });
        draft.colors.push(fresh);
        assert!(matches!(update(&agg, &draft), Err(CatalogError::NotFound { entity: Entity::Size, .. })));
    }

    #[test]
    fn test_duplicate_references_fail_validation() {
        let agg = persisted();
        let mut draft = draft_of(&agg);
        let mut twin = draft.colors[0].clone();
        twin.color_name = "Charbon".into();
        twin.color_hex = ColorHex::new("#111").unwrap();
        twin.sizes.clear();
        draft.colors.push(twin);
        let Err(CatalogError::Validation(errors)) = update(&agg, &draft) else { panic!("expected validation error") };
        assert!(errors.contains("productColors.2.productColorId"));
    }

    #[test]
    fn test_patch_carries_expected_updated_at() {
        let mut agg = persisted();
        let v1 = Utc::now();
        let mut row = agg.product().clone();
        row.updated_at = Some(v1);
        agg = ProductAggregate::assemble(row, agg.colors().iter().map(|n| n.color.clone()).collect(), agg.colors().iter().flat_map(|n| n.sizes.clone()).collect());

        let mut draft = draft_of(&agg);
        draft.expected_updated_at = Some(v1);
        draft.sale_price = Decimal::new(310, 0);
        let plan = update(&agg, &draft).unwrap();
        let RowWrite::PatchProduct(patch) = &plan.writes[0] else { panic!("expected a product patch") };
        assert_eq!(patch.expected_updated_at, Some(v1));
    }

    #[test]
    fn test_stale_edit_conflicts() {
        let agg = persisted();
        let mut draft = draft_of(&agg);
        draft.expected_updated_at = Some(Utc::now());
        assert!(matches!(update(&agg, &draft), Err(CatalogError::Conflict { ref field, .. }) if field == ROOT_FIELD));
    }
}
