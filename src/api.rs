//! HTTP surface of the catalog.

use axum::{
    async_trait,
    body::Bytes,
    extract::{FromRequest, FromRequestParts, Path, Query, Request, State},
    http::{request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::{de::DeserializeOwned, Deserialize};
use serde_path_to_error::Segment;
use uuid::Uuid;

use crate::domain::aggregates::Category;
use crate::permission::ActorId;
use crate::repository::{CatalogStatistics, PaginatedResponse};
use crate::schemas::{ProductInput, ProductView};
use crate::storage::{DeleteOutcome, ObjectMetadata, UploadTarget};
use crate::{CatalogError, CatalogService, FieldErrors, Role, ROOT_FIELD};

/// Header set by the upstream auth provider.
pub const ACTOR_HEADER: &str = "x-actor-id";

impl CatalogError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::Forbidden { .. } => StatusCode::FORBIDDEN,
            Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Conflict { .. } => StatusCode::CONFLICT,
            Self::Storage(_) | Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for CatalogError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
            "Internal server error".to_string()
        } else {
            self.to_string()
        };
        let body = serde_json::json!({ "code": self.code(), "message": message, "details": self.details() });
        (status, Json(body)).into_response()
    }
}

/// A missing or malformed header reads as no actor.
fn actor_of(headers: &HeaderMap) -> Option<ActorId> {
    headers.get(ACTOR_HEADER)?.to_str().ok().and_then(|v| Uuid::parse_str(v.trim()).ok())
}

/// An actor cleared for admin operations. Resolved from the request head, so
/// the gate runs before any body is read.
pub struct Admin(pub ActorId);

#[async_trait]
impl FromRequestParts<CatalogService> for Admin {
    type Rejection = CatalogError;

    async fn from_request_parts(parts: &mut Parts, service: &CatalogService) -> Result<Self, Self::Rejection> {
        service.authorize(actor_of(&parts.headers), Role::Admin).await.map(Admin)
    }
}

/// JSON body whose decoding failures are reported per field path, like any
/// other validation failure.
pub struct Payload<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for Payload<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = CatalogError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = Bytes::from_request(req, state).await.map_err(|e| CatalogError::invalid(ROOT_FIELD, e.body_text()))?;
        decode(&bytes).map(Payload).map_err(CatalogError::from)
    }
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, FieldErrors> {
    let de = &mut serde_json::Deserializer::from_slice(bytes);
    serde_path_to_error::deserialize(de).map_err(|e| {
        let mut path: Vec<String> = e
            .path()
            .iter()
            .filter_map(|segment| match segment {
                Segment::Seq { index } => Some(index.to_string()),
                Segment::Map { key } => Some(key.clone()),
                Segment::Enum { variant } => Some(variant.clone()),
                Segment::Unknown => None,
            })
            .collect();
        let inner = e.into_inner();
        if !inner.is_data() {
            return FieldErrors::single(ROOT_FIELD, "Request body is not valid JSON.");
        }
        let detail = inner.to_string();
        let detail = detail.split(" at line ").next().unwrap_or_default();
        let message = match detail.strip_prefix("missing field `").and_then(|rest| rest.split('`').next()) {
            Some(field) => {
                path.push(field.to_string());
                "This field is required.".to_string()
            }
            None => format!("Invalid value: {detail}."),
        };
        let path = if path.is_empty() { ROOT_FIELD.to_string() } else { path.join(".") };
        FieldErrors::single(path, message)
    })
}

pub fn router(service: CatalogService) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(serde_json::json!({"status": "healthy", "service": "moulay-catalog"})) }))
        .route("/api/v1/products", get(list_products).post(create_product))
        .route("/api/v1/products/:id", put(update_product).delete(delete_product))
        .route("/api/v1/statistics", get(statistics))
        .route("/api/v1/categories", get(list_categories))
        .route("/api/v1/images/upload-target", post(issue_upload_target))
        .route("/api/v1/images/:key/sync", post(sync_upload_metadata))
        .route("/api/v1/images/:key", delete(remove_image))
        .with_state(service)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

async fn list_products(
    State(s): State<CatalogService>,
    headers: HeaderMap,
    Query(p): Query<ListParams>,
) -> Result<Json<PaginatedResponse<ProductView>>, CatalogError> {
    Ok(Json(s.list_products(actor_of(&headers), p.page, p.per_page).await?))
}

async fn create_product(
    State(s): State<CatalogService>,
    Admin(actor): Admin,
    Payload(input): Payload<ProductInput>,
) -> Result<(StatusCode, Json<ProductView>), CatalogError> {
    Ok((StatusCode::CREATED, Json(s.create_product(Some(actor), input).await?)))
}

async fn update_product(
    State(s): State<CatalogService>,
    Admin(actor): Admin,
    Path(id): Path<Uuid>,
    Payload(input): Payload<ProductInput>,
) -> Result<Json<ProductView>, CatalogError> {
    Ok(Json(s.update_product(Some(actor), id, input).await?))
}

async fn delete_product(State(s): State<CatalogService>, headers: HeaderMap, Path(id): Path<Uuid>) -> Result<StatusCode, CatalogError> {
    s.delete_product(actor_of(&headers), id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn statistics(State(s): State<CatalogService>, headers: HeaderMap) -> Result<Json<CatalogStatistics>, CatalogError> {
    Ok(Json(s.statistics(actor_of(&headers)).await?))
}

async fn list_categories(State(s): State<CatalogService>, headers: HeaderMap) -> Result<Json<Vec<Category>>, CatalogError> {
    Ok(Json(s.list_categories(actor_of(&headers)).await?))
}

async fn issue_upload_target(State(s): State<CatalogService>, headers: HeaderMap) -> Result<Json<UploadTarget>, CatalogError> {
    Ok(Json(s.issue_upload_target(actor_of(&headers)).await?))
}

async fn sync_upload_metadata(
    State(s): State<CatalogService>,
    headers: HeaderMap,
    Path(key): Path<String>,
) -> Result<Json<ObjectMetadata>, CatalogError> {
    Ok(Json(s.sync_upload_metadata(actor_of(&headers), &key).await?))
}

async fn remove_image(State(s): State<CatalogService>, headers: HeaderMap, Path(key): Path<String>) -> Result<Json<DeleteOutcome>, CatalogError> {
    let success = s.remove_image(actor_of(&headers), &key).await?;
    Ok(Json(DeleteOutcome { success }))
}
