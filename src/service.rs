//! Catalog Service
//!
//! Entry point of every catalog operation. Each call runs the permission gate
//! first, then validation, then the store; object-storage cleanup and event
//! publishing happen only after the store committed.

use chrono::{SubsecRound, Utc};
use futures::future::{join_all, try_join_all};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::domain::aggregates::{Category, ProductAggregate};
use crate::domain::events::CatalogEvent;
use crate::permission::{require, ActorDirectory, ActorId};
use crate::reconcile::{plan_create, plan_update, ReconcileOptions};
use crate::repository::{CatalogStatistics, CatalogStore, PageRequest, PaginatedResponse, DUPLICATE_NAME};
use crate::schemas::{ProductInput, ProductView};
use crate::storage::{ObjectMetadata, ObjectStore, UploadPolicy, UploadTarget, DEFAULT_DISPLAY_TTL};
use crate::{CatalogError, Entity, Result, Role, ROOT_FIELD};

#[derive(Clone, Debug)]
pub struct ServiceOptions {
    pub display_ttl: Duration,
    pub reconcile: ReconcileOptions,
    /// Delete a product's image objects together with the product.
    pub purge_images_on_delete: bool,
    pub page_size: u32,
    pub upload_policy: UploadPolicy,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            display_ttl: DEFAULT_DISPLAY_TTL,
            reconcile: ReconcileOptions::default(),
            purge_images_on_delete: false,
            page_size: 10,
            upload_policy: UploadPolicy::default(),
        }
    }
}

#[derive(Clone)]
pub struct CatalogService {
    store: Arc<dyn CatalogStore>,
    objects: Arc<dyn ObjectStore>,
    directory: Arc<dyn ActorDirectory>,
    nats: Option<async_nats::Client>,
    options: ServiceOptions,
}

impl CatalogService {
    pub fn new(store: Arc<dyn CatalogStore>, objects: Arc<dyn ObjectStore>, directory: Arc<dyn ActorDirectory>) -> Self {
        Self { store, objects, directory, nats: None, options: ServiceOptions::default() }
    }

    pub fn with_options(mut self, options: ServiceOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_nats(mut self, nats: Option<async_nats::Client>) -> Self {
        self.nats = nats;
        self
    }

    pub fn options(&self) -> &ServiceOptions { &self.options }

    /// The permission gate on its own, for callers that must turn an actor
    /// away before doing any other work.
    pub async fn authorize(&self, actor: Option<ActorId>, required: Role) -> Result<ActorId> {
        require(self.directory.as_ref(), actor, required).await
    }

    // =========================================================================
    // Products
    // =========================================================================

    #[tracing::instrument(skip(self, input), fields(name = %input.name))]
    pub async fn create_product(&self, actor: Option<ActorId>, input: ProductInput) -> Result<ProductView> {
        let actor = require(self.directory.as_ref(), actor, Role::Admin).await?;
        let draft = input.into_draft()?;

        if self.store.product_by_name(&draft.name).await?.is_some() {
            return Err(CatalogError::conflict("name", DUPLICATE_NAME));
        }
        let category = self.category_of(draft.category_id).await?;

        let plan = plan_create(&draft, Utc::now().trunc_subsecs(6))?;
        self.store.apply(&plan).await?;
        tracing::info!(product_id = %plan.product_id, writes = plan.len(), "product created");

        self.publish(CatalogEvent::ProductCreated { product_id: plan.product_id, name: draft.name, actor_id: actor }).await;
        self.view_of(plan.product_id, &category).await
    }

    #[tracing::instrument(skip(self, input), fields(product_id = %id))]
    pub async fn update_product(&self, actor: Option<ActorId>, id: Uuid, input: ProductInput) -> Result<ProductView> {
        let actor = require(self.directory.as_ref(), actor, Role::Admin).await?;
        let draft = input.into_draft()?;

        let existing = self.store.load_aggregate(id).await?.ok_or_else(|| CatalogError::not_found(Entity::Product, ROOT_FIELD))?;
        if draft.name != existing.product().name {
            if let Some(other) = self.store.product_by_name(&draft.name).await? {
                if other.id != id {
                    return Err(CatalogError::conflict("name", DUPLICATE_NAME));
                }
            }
        }
        let category = self.category_of(draft.category_id).await?;

        let plan = plan_update(&existing, &draft, self.options.reconcile, Utc::now().trunc_subsecs(6))?;
        if !plan.is_empty() {
            self.store.apply(&plan).await?;
        }
        tracing::info!(writes = plan.len(), orphaned = plan.orphaned_keys.len(), summary = ?plan.summary(), "product updated");

        self.delete_objects(&plan.orphaned_keys).await;
        self.publish(CatalogEvent::ProductUpdated { product_id: id, writes: plan.len(), actor_id: actor }).await;
        self.view_of(id, &category).await
    }

    #[tracing::instrument(skip(self), fields(product_id = %id))]
    pub async fn delete_product(&self, actor: Option<ActorId>, id: Uuid) -> Result<()> {
        let actor = require(self.directory.as_ref(), actor, Role::Admin).await?;
        let removed = self.store.delete_product(id).await?.ok_or_else(|| CatalogError::not_found(Entity::Product, ROOT_FIELD))?;
        tracing::info!(colors = removed.colors().len(), "product deleted");

        if self.options.purge_images_on_delete {
            self.delete_objects(&removed.image_keys()).await;
        }
        self.publish(CatalogEvent::ProductDeleted { product_id: id, actor_id: actor }).await;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub async fn list_products(
        &self,
        actor: Option<ActorId>,
        page: Option<u32>,
        per_page: Option<u32>,
    ) -> Result<PaginatedResponse<ProductView>> {
        require(self.directory.as_ref(), actor, Role::Admin).await?;
        let request = PageRequest::new(page, per_page, self.options.page_size);
        let (listed, total) = self.store.list_products(request).await?;

        let keys: HashSet<&str> = listed.iter().flat_map(|l| l.aggregate.colors().iter()).flat_map(|n| n.color.images.iter().map(String::as_str)).collect();
        let urls = self.resolve_urls(keys).await?;
        let data = listed
            .iter()
            .map(|l| ProductView::build(&l.aggregate, &l.category, |key| urls.get(key).cloned().unwrap_or_default()))
            .collect();
        Ok(PaginatedResponse { data, total, page: request.page, per_page: request.per_page })
    }

    #[tracing::instrument(skip(self))]
    pub async fn statistics(&self, actor: Option<ActorId>) -> Result<CatalogStatistics> {
        require(self.directory.as_ref(), actor, Role::Admin).await?;
        self.store.statistics().await
    }

    #[tracing::instrument(skip(self))]
    pub async fn list_categories(&self, actor: Option<ActorId>) -> Result<Vec<Category>> {
        require(self.directory.as_ref(), actor, Role::Staff).await?;
        self.store.list_categories().await
    }

    // =========================================================================
    // Images
    // =========================================================================

    #[tracing::instrument(skip(self))]
    pub async fn issue_upload_target(&self, actor: Option<ActorId>) -> Result<UploadTarget> {
        require(self.directory.as_ref(), actor, Role::Admin).await?;
        self.objects.issue_upload_target().await
    }

    /// Checks a finished upload against the upload policy.
    #[tracing::instrument(skip(self))]
    pub async fn sync_upload_metadata(&self, actor: Option<ActorId>, key: &str) -> Result<ObjectMetadata> {
        require(self.directory.as_ref(), actor, Role::Admin).await?;
        let metadata = self.objects.metadata(key).await?.ok_or_else(|| CatalogError::not_found(Entity::Image, ROOT_FIELD))?;
        self.options.upload_policy.check(&metadata).map_err(|rejection| {
            tracing::warn!(%rejection, size = metadata.size, "upload rejected");
            CatalogError::invalid(ROOT_FIELD, rejection.to_string())
        })?;
        Ok(metadata)
    }

    #[tracing::instrument(skip(self))]
    pub async fn remove_image(&self, actor: Option<ActorId>, key: &str) -> Result<bool> {
        require(self.directory.as_ref(), actor, Role::Admin).await?;
        let outcome = self.objects.delete_object(key).await?;
        Ok(outcome.success)
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    async fn category_of(&self, id: Uuid) -> Result<Category> {
        self.store.category(id).await?.ok_or_else(|| CatalogError::not_found(Entity::Category, "category"))
    }

    async fn resolve_urls(&self, keys: HashSet<&str>) -> Result<HashMap<String, String>> {
        let ttl = self.options.display_ttl;
        let resolved = try_join_all(keys.into_iter().map(|key| async move {
            let url = self.objects.display_url(key, ttl).await?;
            Ok::<_, CatalogError>((key.to_string(), url))
        }))
        .await?;
        Ok(resolved.into_iter().collect())
    }

    async fn view_of(&self, id: Uuid, category: &Category) -> Result<ProductView> {
        let aggregate: ProductAggregate =
            self.store.load_aggregate(id).await?.ok_or_else(|| CatalogError::not_found(Entity::Product, ROOT_FIELD))?;
        let urls = self.resolve_urls(aggregate.image_keys().iter().map(String::as_str).collect()).await?;
        Ok(ProductView::build(&aggregate, category, |key| urls.get(key).cloned().unwrap_or_default()))
    }

    /// Best effort: failures are logged, the write already committed.
    async fn delete_objects(&self, keys: &[String]) {
        if keys.is_empty() {
            return;
        }
        let results = join_all(keys.iter().map(|key| self.objects.delete_object(key))).await;
        for (key, result) in keys.iter().zip(results) {
            match result {
                Ok(outcome) if outcome.success => tracing::debug!(%key, "image object deleted"),
                Ok(_) => tracing::warn!(%key, "image object was already gone"),
                Err(e) => tracing::warn!(%key, error = %e, "failed to delete image object"),
            }
        }
        self.publish(CatalogEvent::ImagesRemoved { keys: keys.to_vec() }).await;
    }

    async fn publish(&self, event: CatalogEvent) {
        let Some(nats) = &self.nats else { return };
        let payload = match serde_json::to_vec(&event) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(error = %e, "failed to encode catalog event");
                return;
            }
        };
        if let Err(e) = nats.publish(event.subject().to_string(), payload.into()).await {
            tracing::warn!(subject = event.subject(), error = %e, "failed to publish catalog event");
        }
    }
}
