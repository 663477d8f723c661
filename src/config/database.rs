//! Database configuration module.
//!
//! Handles the database connection and table creation using `SeaORM`. Tables are
//! generated from the entity definitions with `Schema::create_table_from_entity`,
//! which carries the column-level UNIQUE on `alert_log.dedup_key`. The composite
//! (task, audience) index of notification rules is created explicitly.

use crate::config::settings::DatabaseSettings;
use crate::entities::{
    AlertLog, Contract, Installation, Intervention, NotificationRule, NotificationRuleColumn,
    Operator, RenewalItem,
};
use crate::errors::Result;
use sea_orm::sea_query::Index;
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Schema};
use std::time::Duration;
use tracing::{debug, info};

const DEFAULT_DATABASE_URL: &str = "sqlite://data/fieldops.sqlite?mode=rwc";

/// Gets the database URL from environment variable or returns default `SQLite` path.
#[must_use]
pub fn get_database_url() -> String {
    std::env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string())
}

/// Establishes a connection to the database named by `DATABASE_URL`.
///
/// Connect and acquire timeouts are bounded by `settings.timeout_secs` so that a
/// dead database surfaces as an error instead of hanging a dispatch.
pub async fn create_connection(settings: &DatabaseSettings) -> Result<DatabaseConnection> {
    let url = get_database_url();
    debug!("Connecting to database at {url}");

    let timeout = Duration::from_secs(settings.timeout_secs);
    let mut options = ConnectOptions::new(url);
    options
        .connect_timeout(timeout)
        .acquire_timeout(timeout)
        .sqlx_logging(false);

    Database::connect(options).await.map_err(Into::into)
}

/// Creates all tables plus the composite rule topic index.
pub async fn create_tables<C>(db: &C) -> Result<()>
where
    C: ConnectionTrait,
{
    let builder = db.get_database_backend();
    let schema = Schema::new(builder);

    let mut tables = vec![
        schema.create_table_from_entity(Contract),
        schema.create_table_from_entity(Installation),
        schema.create_table_from_entity(Intervention),
        schema.create_table_from_entity(RenewalItem),
        schema.create_table_from_entity(AlertLog),
        schema.create_table_from_entity(NotificationRule),
        schema.create_table_from_entity(Operator),
    ];
    for table in &mut tables {
        table.if_not_exists();
        db.execute(builder.build(&*table)).await?;
    }

    let rule_topic_index = Index::create()
        .name("idx_notification_rules_topic")
        .table(NotificationRule)
        .col(NotificationRuleColumn::Task)
        .col(NotificationRuleColumn::Audience)
        .unique()
        .if_not_exists()
        .to_owned();
    db.execute(builder.build(&rule_topic_index)).await?;

    info!("Database tables ensured");
    Ok(())
}
