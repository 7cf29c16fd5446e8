//! Domain events, published after a write has committed
use serde::Serialize;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CatalogEvent {
    #[serde(rename_all = "camelCase")]
    ProductCreated { product_id: Uuid, name: String, actor_id: Uuid },
    #[serde(rename_all = "camelCase")]
    ProductUpdated { product_id: Uuid, writes: usize, actor_id: Uuid },
    #[serde(rename_all = "camelCase")]
    ProductDeleted { product_id: Uuid, actor_id: Uuid },
    #[serde(rename_all = "camelCase")]
    ImagesRemoved { keys: Vec<String> },
}

impl CatalogEvent {
    /// NATS subject the event is published on.
    pub fn subject(&self) -> &'static str {
        match self {
            Self::ProductCreated { .. } => "catalog.products.created",
            Self::ProductUpdated { .. } => "catalog.products.updated",
            Self::ProductDeleted { .. } => "catalog.products.deleted",
            Self::ImagesRemoved { .. } => "catalog.images.removed",
        }
    }
}
