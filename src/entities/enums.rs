//! Closed enumerations for every status, stage and category stored in the database.
//!
//! Values are persisted as upper-case text; conversion happens here and nowhere else.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of an intervention
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InterventionState {
    /// Visit recorded, work may continue
    #[sea_orm(string_value = "OPEN")]
    Open,
    /// Work finished, outcome set
    #[sea_orm(string_value = "CLOSED")]
    Closed,
}

/// How a closed intervention is billed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InterventionOutcome {
    /// Bill the visit on its own invoice
    #[sea_orm(string_value = "TO_INVOICE")]
    ToInvoice,
    /// Never billed
    #[sea_orm(string_value = "DO_NOT_INVOICE")]
    DoNotInvoice,
    /// Billed as part of a periodic summary
    #[sea_orm(string_value = "INCLUDED_IN_SUMMARY")]
    IncludedInSummary,
}

/// Renewal lifecycle stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RenewalStage {
    /// Waiting for the stage-1 alert
    #[sea_orm(string_value = "TO_NOTIFY")]
    ToNotify,
    /// Stage-1 alert sent, awaiting confirmation
    #[sea_orm(string_value = "NOTIFIED")]
    Notified,
    /// Renewal confirmed by an operator
    #[sea_orm(string_value = "CONFIRMED")]
    Confirmed,
    /// Invoice requested, stage-2 alert sent
    #[sea_orm(string_value = "TO_INVOICE")]
    ToInvoice,
    /// Invoice issued, terminal
    #[sea_orm(string_value = "INVOICED")]
    Invoiced,
    /// Dropped, terminal
    #[sea_orm(string_value = "NOT_RENEWED")]
    NotRenewed,
}

impl RenewalStage {
    /// INVOICED and NOT_RENEWED accept no further transition
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Invoiced | Self::NotRenewed)
    }
}

/// Kind of renewable item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RenewalItemType {
    /// Software license
    #[sea_orm(string_value = "LICENSE")]
    License,
    /// Screen service subscription
    #[sea_orm(string_value = "SCREEN_SERVICE")]
    ScreenService,
    /// Service bundled with a contract
    #[sea_orm(string_value = "CONTRACT_SERVICE")]
    ContractService,
}

/// Tag distinguishing the kind of dispatched notification in the alert log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertChannel {
    /// Per-intervention alert on close
    #[sea_orm(string_value = "AUTOMATIC_INVOICE_DUE")]
    AutomaticInvoiceDue,
    /// Digest of every invoice-due intervention
    #[sea_orm(string_value = "BULK_INVOICE_DUE")]
    BulkInvoiceDue,
    /// Request to confirm a renewal
    #[sea_orm(string_value = "RENEWAL_STAGE_1")]
    RenewalStage1,
    /// Confirmed renewal ready to invoice
    #[sea_orm(string_value = "RENEWAL_STAGE_2")]
    RenewalStage2,
    /// Digest of open renewals
    #[sea_orm(string_value = "RENEWAL_REMINDER")]
    RenewalReminder,
    /// Audit entry of a reopen
    #[sea_orm(string_value = "INTERVENTION_REOPENED")]
    InterventionReopened,
    /// Operator-composed message
    #[sea_orm(string_value = "MANUAL")]
    Manual,
}

/// Operator role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperatorRole {
    /// Back office, handles invoicing
    #[sea_orm(string_value = "ADMINISTRATION")]
    Administration,
    /// May reopen interventions
    #[sea_orm(string_value = "SUPERVISOR")]
    Supervisor,
    /// May reopen interventions
    #[sea_orm(string_value = "PROJECT_MANAGER")]
    ProjectManager,
    /// Performs the visits
    #[sea_orm(string_value = "TECHNICIAN")]
    Technician,
    /// Handles renewals
    #[sea_orm(string_value = "SALES")]
    Sales,
}

impl OperatorRole {
    /// Roles allowed to reopen a closed intervention
    #[must_use]
    pub const fn can_reopen(self) -> bool {
        matches!(self, Self::Supervisor | Self::ProjectManager)
    }
}

/// The job a notification rule performs when it fires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationTask {
    /// Report invoice-due interventions
    #[sea_orm(string_value = "INVOICE_DUE")]
    InvoiceDue,
    /// Report open renewal items
    #[sea_orm(string_value = "RENEWAL_REMINDER")]
    RenewalReminder,
}

impl NotificationTask {
    /// Channel tag used for the digests this task sends
    #[must_use]
    pub const fn channel(self) -> AlertChannel {
        match self {
            Self::InvoiceDue => AlertChannel::BulkInvoiceDue,
            Self::RenewalReminder => AlertChannel::RenewalReminder,
        }
    }
}

/// Who a notification rule targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Audience {
    /// Internal operators
    #[sea_orm(string_value = "STAFF")]
    Staff,
    /// Operators assigned to a client, scoped to that client's items
    #[sea_orm(string_value = "CLIENT")]
    Client,
}

/// How a rule is started
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleMode {
    /// Fired by scheduler ticks
    #[sea_orm(string_value = "AUTOMATIC")]
    Automatic,
    /// Fired only on demand
    #[sea_orm(string_value = "MANUAL")]
    Manual,
}

/// Days a rule fires on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Frequency {
    /// Every day
    #[sea_orm(string_value = "DAILY")]
    Daily,
    /// Monday to Friday
    #[sea_orm(string_value = "WEEKDAYS")]
    Weekdays,
    /// Once a week on `day_of_week`
    #[sea_orm(string_value = "WEEKLY")]
    Weekly,
}

macro_rules! display_as_stored {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl fmt::Display for $ty {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.write_str(&self.to_value())
                }
            }
        )+
    };
}

display_as_stored!(
    InterventionState,
    InterventionOutcome,
    RenewalStage,
    RenewalItemType,
    AlertChannel,
    OperatorRole,
    NotificationTask,
    Audience,
    RuleMode,
    Frequency,
);
