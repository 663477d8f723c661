//! Intervention entity - A single field service visit under a contract.
//!
//! `state` and `outcome` are explicit tagged columns: `outcome` is present if and
//! only if `state` is `CLOSED`. `invoice_number` and `invoiced_on` are written together
//! once the invoice has been issued.

use super::enums::{InterventionOutcome, InterventionState};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Intervention database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "interventions")]
pub struct Model {
    /// Unique identifier for the intervention
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Contract the visit is counted against
    pub contract_id: i64,
    /// Installation that was serviced
    pub installation_id: i64,
    /// Day the visit took place
    pub performed_on: Date,
    /// Free-text description of the work
    pub description: String,
    /// Whether the visit counts against the contract quota
    pub included: bool,
    /// Invoice routing reference
    pub invoice_reference: Option<String>,
    /// Invoice routing warehouse code
    pub warehouse_code: Option<String>,
    /// Lifecycle state
    pub state: InterventionState,
    /// Billing outcome, set only when closed
    pub outcome: Option<InterventionOutcome>,
    /// Issued invoice number
    pub invoice_number: Option<String>,
    /// Day the invoice was issued
    pub invoiced_on: Option<Date>,
    /// Append-only technical notes, one entry per line
    pub technical_notes: String,
    /// Operator id who closed the intervention
    pub closed_by: Option<i64>,
    /// When the intervention was closed
    pub closed_at: Option<DateTimeUtc>,
    /// When the intervention was recorded
    pub created_at: DateTimeUtc,
}

impl Model {
    /// Closed for invoicing with no invoice issued yet.
    #[must_use]
    pub fn is_invoice_due(&self) -> bool {
        self.state == InterventionState::Closed
            && self.outcome == Some(InterventionOutcome::ToInvoice)
            && self.invoice_number.is_none()
    }
}

/// Defines relationships between Intervention and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::contract::Entity",
        from = "Column::ContractId",
        to = "super::contract::Column::Id"
    )]
    Contract,
    #[sea_orm(
        belongs_to = "super::installation::Entity",
        from = "Column::InstallationId",
        to = "super::installation::Column::Id"
    )]
    Installation,
}

impl Related<super::contract::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Contract.def()
    }
}

impl Related<super::installation::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Installation.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
