//! Permission gate over the fixed role hierarchy `user < staff < admin`.

use async_trait::async_trait;
use sqlx::PgPool;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::value_objects::Role;
use crate::{CatalogError, Result};

pub type ActorId = Uuid;

/// True when `actor_role` ranks at or above `required`. A missing or
/// unrecognized role never qualifies.
pub fn authorize(actor_role: Option<&str>, required: Role) -> bool {
    match actor_role.and_then(|r| r.parse::<Role>().ok()) {
        Some(role) => role.rank() >= required.rank(),
        None => false,
    }
}

/// Source of actor roles, owned by the auth provider.
#[async_trait]
pub trait ActorDirectory: Send + Sync {
    /// `None` when the actor is unknown; `Some(None)` when it has no role.
    async fn role_of(&self, actor: ActorId) -> Result<Option<Option<String>>>;
}

/// Authentication is checked before authorization; the two fail differently.
pub async fn require(directory: &dyn ActorDirectory, actor: Option<ActorId>, required: Role) -> Result<ActorId> {
    let actor = actor.ok_or(CatalogError::Unauthenticated)?;
    let role = directory.role_of(actor).await?.flatten();
    if authorize(role.as_deref(), required) {
        Ok(actor)
    } else {
        tracing::debug!(actor_id = %actor, role = ?role, %required, "permission denied");
        Err(CatalogError::Forbidden { required })
    }
}

#[derive(Default)]
pub struct MemoryDirectory {
    roles: RwLock<HashMap<ActorId, Option<String>>>,
}

impl MemoryDirectory {
    pub fn new() -> Self { Self::default() }

    pub async fn insert(&self, actor: ActorId, role: Option<&str>) {
        self.roles.write().await.insert(actor, role.map(str::to_string));
    }

    /// Registers a fresh actor with `role` and returns its id.
    pub async fn enroll(&self, role: Role) -> ActorId {
        let id = Uuid::now_v7();
        self.insert(id, Some(role.as_str())).await;
        id
    }
}

#[async_trait]
impl ActorDirectory for MemoryDirectory {
    async fn role_of(&self, actor: ActorId) -> Result<Option<Option<String>>> {
        Ok(self.roles.read().await.get(&actor).cloned())
    }
}

/// Reads roles from the auth provider's `users` table.
#[derive(Clone)]
pub struct PgDirectory {
    pool: PgPool,
}

impl PgDirectory {
    pub fn new(pool: PgPool) -> Self { Self { pool } }
}

#[async_trait]
impl ActorDirectory for PgDirectory {
    async fn role_of(&self, actor: ActorId) -> Result<Option<Option<String>>> {
        let row: Option<(Option<String>,)> = sqlx::query_as("SELECT role FROM users WHERE id = $1")
            .bind(actor)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(role,)| role))
    }
}
