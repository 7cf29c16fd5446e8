//! Moulay Catalog - menswear storefront back-office

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use moulay_catalog::config::AppConfig;
use moulay_catalog::domain::aggregates::Category;
use moulay_catalog::permission::{ActorDirectory, MemoryDirectory, PgDirectory};
use moulay_catalog::reconcile::ReconcileOptions;
use moulay_catalog::repository::{CatalogStore, MemoryStore, PgStore};
use moulay_catalog::service::ServiceOptions;
use moulay_catalog::storage::{MemoryObjectStore, UploadPolicy};
use moulay_catalog::{api, CatalogService, Role};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into())).with(tracing_subscriber::fmt::layer()).init();
    let config = AppConfig::from_env()?;

    let (store, directory): (Arc<dyn CatalogStore>, Arc<dyn ActorDirectory>) = match &config.database_url {
        Some(url) => {
            let db = PgPoolOptions::new().max_connections(config.database_max_connections).connect(url).await?;
            sqlx::migrate!("./migrations").run(&db).await?;
            let store: Arc<dyn CatalogStore> = Arc::new(PgStore::new(db.clone()));
            let directory: Arc<dyn ActorDirectory> = Arc::new(PgDirectory::new(db));
            (store, directory)
        }
        None => {
            tracing::warn!(categories = config.dev_categories.len(), "DATABASE_URL not set, using the in-memory catalog store");
            let store: Arc<dyn CatalogStore> = Arc::new(MemoryStore::with_categories(config.dev_categories.iter().map(Category::new)));
            let memory_directory = MemoryDirectory::new();
            match config.dev_admin_id {
                Some(admin) => memory_directory.insert(admin, Some(Role::Admin.as_str())).await,
                None => tracing::warn!("CATALOG_DEV_ADMIN_ID not set, every catalog request will be refused"),
            }
            let directory: Arc<dyn ActorDirectory> = Arc::new(memory_directory);
            (store, directory)
        }
    };
    let nats = match &config.nats_url {
        Some(url) => match async_nats::connect(url.as_str()).await {
            Ok(client) => Some(client),
            Err(e) => {
                tracing::warn!(error = %e, "NATS unavailable, catalog events disabled");
                None
            }
        },
        None => None,
    };

    let objects = Arc::new(MemoryObjectStore::new(config.object_store_base_url.clone()));
    let options = ServiceOptions {
        display_ttl: config.display_url_ttl,
        reconcile: ReconcileOptions { prune_missing_children: config.prune_on_edit },
        purge_images_on_delete: config.purge_images_on_delete,
        page_size: config.page_size,
        upload_policy: UploadPolicy::default(),
    };
    let service = CatalogService::new(store, objects, directory).with_options(options).with_nats(nats);

    let app = api::router(service).layer(TraceLayer::new_for_http()).layer(CorsLayer::permissive());

    tracing::info!("Moulay Catalog listening on 0.0.0.0:{}", config.port);
    axum::serve(tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?, app).await?;
    Ok(())
}
