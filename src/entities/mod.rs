//! Entity module - Contains all SeaORM entity definitions for the database.
//! These entities represent the database tables and their relationships.
//! Each entity has a Model struct for data and an Entity struct for operations.

/// Dispatched alerts, also the dedup ledger
pub mod alert_log;
/// Client contracts and their quotas
pub mod contract;
/// Enumerated column values
pub mod enums;
/// Client sites
pub mod installation;
/// Field service visits
pub mod intervention;
/// Scheduled notification rules
pub mod notification_rule;
/// Staff directory
pub mod operator;
/// Licenses and services up for renewal
pub mod renewal_item;

// Re-export specific types to avoid conflicts
pub use alert_log::{Column as AlertLogColumn, Entity as AlertLog, Model as AlertLogModel};
pub use contract::{Column as ContractColumn, Entity as Contract, Model as ContractModel};
pub use installation::{
    Column as InstallationColumn, Entity as Installation, Model as InstallationModel,
};
pub use intervention::{
    Column as InterventionColumn, Entity as Intervention, Model as InterventionModel,
};
pub use notification_rule::{
    Column as NotificationRuleColumn, Entity as NotificationRule, Model as NotificationRuleModel,
};
pub use operator::{Column as OperatorColumn, Entity as Operator, Model as OperatorModel};
pub use renewal_item::{
    Column as RenewalItemColumn, Entity as RenewalItem, Model as RenewalItemModel,
};
