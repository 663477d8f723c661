//! Installation entity - The site a service visit or renewal refers to.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Installation database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "installations")]
pub struct Model {
    /// Unique identifier for the installation
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Client owning the site
    pub client_id: i64,
    /// Display name shown in alerts; not unique across sites
    pub name: String,
}

/// Defines relationships between Installation and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// One installation has many interventions
    #[sea_orm(has_many = "super::intervention::Entity")]
    Interventions,
}

impl Related<super::intervention::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Interventions.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
