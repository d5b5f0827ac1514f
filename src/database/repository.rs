//! Generic repository traits shared by the concrete repositories

use crate::database::error::DatabaseError;
use async_trait::async_trait;
use sqlx::PgPool;

/// Common lookup operations every repository exposes
#[async_trait]
pub trait Repository: Send + Sync {
    type Entity;

    async fn find_by_id(&self, id: &str) -> Result<Option<Self::Entity>, DatabaseError>;

    async fn find_all(&self) -> Result<Vec<Self::Entity>, DatabaseError>;

    async fn delete(&self, id: &str) -> Result<bool, DatabaseError>;
}

/// Repositories backed by a Postgres pool that can open explicit transactions
pub trait TransactionalRepository {
    fn pool(&self) -> &PgPool;
}
