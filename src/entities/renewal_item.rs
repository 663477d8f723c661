//! Renewal item entity - A license or recurring service approaching its due date.

use super::enums::{RenewalItemType, RenewalStage};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Renewal item database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "renewal_items")]
pub struct Model {
    /// Unique identifier for the item
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Client the item belongs to
    pub client_id: i64,
    /// Installation the item covers, if site-specific
    pub installation_id: Option<i64>,
    /// License or service
    pub item_type: RenewalItemType,
    /// Human reference (license key, service name, ...)
    pub reference: String,
    /// Day the renewal falls due
    pub due_on: Date,
    /// Workflow stage
    pub stage: RenewalStage,
    /// When the stage-1 alert went out
    pub stage1_notified_at: Option<DateTimeUtc>,
    /// Comma separated addresses the stage-1 alert went to
    pub stage1_recipients: Option<String>,
    /// Operator id who confirmed the renewal
    pub confirmed_by: Option<i64>,
    /// When the renewal was confirmed
    pub confirmed_at: Option<DateTimeUtc>,
    /// When invoicing was requested
    pub invoice_requested_at: Option<DateTimeUtc>,
    /// When the stage-2 alert went out
    pub stage2_notified_at: Option<DateTimeUtc>,
    /// Comma separated addresses the stage-2 alert went to
    pub stage2_recipients: Option<String>,
    /// Issued invoice number
    pub invoice_number: Option<String>,
    /// When the invoice was issued
    pub invoiced_at: Option<DateTimeUtc>,
    /// When the item was dropped
    pub not_renewed_at: Option<DateTimeUtc>,
}

/// Renewal items have no relations
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
