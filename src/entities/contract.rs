//! Contract entity - A client's service agreement and its intervention quota.
//!
//! Contracts are never deleted, a newer contract supersedes an older one.
//! `expires_on` absent means the contract is evergreen.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Contract database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "contracts")]
pub struct Model {
    /// Unique identifier for the contract
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Client the contract belongs to
    pub client_id: i64,
    /// Commercial plan code (e.g., "SILVER-12")
    pub plan_code: String,
    /// Expiry date, None for evergreen contracts
    pub expires_on: Option<Date>,
    /// Annual included interventions, None when unconstrained
    pub included_quota: Option<i32>,
    /// Unlimited interventions regardless of quota
    pub unlimited: bool,
    /// When the contract was created
    pub created_at: DateTimeUtc,
}

/// Defines relationships between Contract and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// One contract has many interventions
    #[sea_orm(has_many = "super::intervention::Entity")]
    Interventions,
}

impl Related<super::intervention::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Interventions.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
