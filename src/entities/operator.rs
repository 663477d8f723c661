//! Operator entity - Staff members who act on items and receive alerts.

use super::enums::OperatorRole;
use super::notification_rule::split_list;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Operator database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "operators")]
pub struct Model {
    /// Unique identifier for the operator
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Display name
    pub name: String,
    /// Address alerts are sent to
    pub email: String,
    /// Role deciding which alerts and actions apply
    pub role: OperatorRole,
    /// Inactive operators receive nothing and cannot act
    pub active: bool,
    /// Master switch for every alert
    pub alerts_enabled: bool,
    /// Receives every status change notification
    pub all_status_changes: bool,
    /// Comma separated topic names the operator subscribed to
    pub subscribed_topics: String,
    /// Client the operator is assigned to, if any
    pub client_id: Option<i64>,
}

impl Model {
    /// Case-insensitive topic subscription check.
    #[must_use]
    pub fn is_subscribed_to(&self, topic: &str) -> bool {
        split_list(&self.subscribed_topics).any(|t| t.eq_ignore_ascii_case(topic))
    }
}

/// Operators have no relations
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
