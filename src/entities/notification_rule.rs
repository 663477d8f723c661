//! Notification rule entity - Schedule and filters for one notification topic.
//!
//! A topic is the pair (`task`, `audience`), unique across the table.
//! List-valued settings are stored as comma separated text and split by the
//! accessor methods below.

use super::enums::{Audience, Frequency, NotificationTask, RuleMode};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Notification rule database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "notification_rules")]
pub struct Model {
    /// Unique identifier for the rule
    #[sea_orm(primary_key)]
    pub id: i64,
    /// What the rule reports on
    pub task: NotificationTask,
    /// Who the rule reports to
    pub audience: Audience,
    /// Disabled rules never fire on their own
    pub enabled: bool,
    /// AUTOMATIC rules fire on ticks, MANUAL ones only on demand
    pub mode: RuleMode,
    /// Comma separated operator ids; empty means "every eligible operator"
    pub recipients: String,
    /// Days the rule fires on
    pub frequency: Frequency,
    /// Local time of day the rule fires
    pub send_time: Time,
    /// IANA timezone name (e.g., "Europe/Rome")
    pub timezone: String,
    /// ISO weekday, 1 = Monday .. 7 = Sunday, only used by WEEKLY rules
    pub day_of_week: Option<i32>,
    /// Comma separated statuses that silence the rule for an item
    pub stop_statuses: String,
    /// Skip items whose relevant date is already in the past
    pub only_future: bool,
    /// Last time the rule was saved
    pub updated_at: DateTimeUtc,
}

impl Model {
    /// Operator ids explicitly listed as recipients. Unparseable entries are ignored.
    #[must_use]
    pub fn recipient_ids(&self) -> Vec<i64> {
        split_list(&self.recipients)
            .filter_map(|s| s.parse().ok())
            .collect()
    }

    /// Statuses that silence the rule, uppercased.
    #[must_use]
    pub fn stop_status_list(&self) -> Vec<String> {
        split_list(&self.stop_statuses)
            .map(str::to_ascii_uppercase)
            .collect()
    }
}

pub(crate) fn split_list(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty())
}

/// Notification rules have no relations
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
