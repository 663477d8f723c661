//! Operator directory - read-only lookup of staff members.

use crate::entities::{Operator, OperatorModel, operator};
use crate::errors::Result;
use async_trait::async_trait;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder};

/// Lookup of operators by id and of the active roster
#[async_trait]
pub trait OperatorDirectory: Send + Sync {
    /// The operator with `operator_id`, active or not.
    async fn get(&self, operator_id: i64) -> Result<Option<OperatorModel>>;

    /// Every active operator, ordered by name.
    async fn list_active(&self) -> Result<Vec<OperatorModel>>;
}

/// Directory backed by the `operators` table.
#[derive(Debug, Clone)]
pub struct DbOperatorDirectory {
    db: DatabaseConnection,
}

impl DbOperatorDirectory {
    /// Wraps a connection.
    #[must_use]
    pub const fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl OperatorDirectory for DbOperatorDirectory {
    async fn get(&self, operator_id: i64) -> Result<Option<OperatorModel>> {
        Operator::find_by_id(operator_id)
            .one(&self.db)
            .await
            .map_err(Into::into)
    }

    async fn list_active(&self) -> Result<Vec<OperatorModel>> {
        Operator::find()
            .filter(operator::Column::Active.eq(true))
            .order_by_asc(operator::Column::Name)
            .all(&self.db)
            .await
            .map_err(Into::into)
    }
}
