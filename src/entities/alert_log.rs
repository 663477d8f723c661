//! Alert log entity - Immutable record of one dispatched notification.
//!
//! Doubles as the deduplication ledger: automatic channels fill `dedup_key`,
//! which carries a UNIQUE constraint, so a second send for the same
//! (channel, entity, day, recipient) cannot be committed.

use super::enums::AlertChannel;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Alert log database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "alert_log")]
pub struct Model {
    /// Unique identifier for the entry
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Channel the alert was sent on
    pub channel: AlertChannel,
    /// Primary entity the alert is about, None for pure digests
    pub entity_id: Option<i64>,
    /// Comma separated ids of every entity listed in the message
    pub related_ids: String,
    /// Comma separated recipient addresses
    pub recipient: String,
    /// Sender address or "system" for automatic channels
    pub sender: String,
    /// Rendered subject line
    pub subject: String,
    /// Rendered plain-text body
    pub body: String,
    /// False for log-only dispatches
    pub emailed: bool,
    /// Dedup slot of automatic channels, None for manual entries
    #[sea_orm(unique)]
    pub dedup_key: Option<String>,
    /// When the alert was recorded
    pub created_at: DateTimeUtc,
}

/// The alert log has no relations
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
