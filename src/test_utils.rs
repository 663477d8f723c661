//! Shared test utilities for `fieldops`.
//!
//! This module provides common helper functions for setting up test databases,
//! creating test records with sensible defaults, and the mail and clock doubles
//! the dispatcher tests run against.

#![allow(clippy::unwrap_used)]

use crate::{
    config::Settings,
    core::{
        dispatch::{AlertDispatcher, ManualDispatch, Recipient},
        engine::Engine,
        intervention::{self, CreatedIntervention, NewIntervention},
        renewal::{self, NewRenewalItem},
        schedule::{NewRule, NotificationRuleScheduler},
    },
    entities::{
        contract, installation,
        enums::{
            AlertChannel, Audience, Frequency, InterventionOutcome, NotificationTask,
            OperatorRole, RenewalItemType, RuleMode,
        },
        operator, renewal_item,
    },
    errors::Result,
    services::{
        Clock, DbOperatorDirectory, MailTransport, OutgoingMail, TransportError,
    },
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set};
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};
use tracing_subscriber::EnvFilter;

/// Routes engine logs to the test harness, which shows them for failing tests only.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("fieldops=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Creates an in-memory `SQLite` database with all tables initialized.
/// This is the standard setup for all integration tests.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    init_test_tracing();
    let db = sea_orm::Database::connect("sqlite::memory:").await?;
    crate::config::database::create_tables(&db).await?;
    Ok(db)
}

/// Clock pinned to a settable instant.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    /// Clock stopped at `now`.
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// Monday 19 October 2026, 07:31 in Rome: just inside a 07:30 rule window.
pub fn test_clock() -> Arc<FixedClock> {
    Arc::new(FixedClock::at(
        Utc.with_ymd_and_hms(2026, 10, 19, 5, 31, 0).unwrap(),
    ))
}

/// The calendar day of [`test_clock`] in the default organisational timezone.
pub fn test_today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
}

/// Mail transport that records every message and can be told to fail.
#[derive(Debug, Clone, Default)]
pub struct RecordingTransport {
    sent: Arc<Mutex<Vec<OutgoingMail>>>,
    failing: Arc<AtomicBool>,
}

impl RecordingTransport {
    /// Transport that fails every send until told otherwise.
    pub fn failing() -> Self {
        let transport = Self::default();
        transport.set_failing(true);
        transport
    }

    /// Switches failure mode.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Every message sent so far.
    pub fn sent(&self) -> Vec<OutgoingMail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MailTransport for RecordingTransport {
    async fn send(&self, mail: &OutgoingMail) -> std::result::Result<(), TransportError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(TransportError::SendFailed("relay unavailable".to_string()));
        }
        self.sent.lock().unwrap().push(mail.clone());
        Ok(())
    }
}

/// Dispatcher over `db` with default settings.
pub fn test_dispatcher(
    db: &DatabaseConnection,
    transport: &RecordingTransport,
    clock: Arc<FixedClock>,
) -> AlertDispatcher {
    AlertDispatcher::new(
        Arc::new(transport.clone()),
        Arc::new(DbOperatorDirectory::new(db.clone())),
        clock,
        &Settings::default(),
    )
    .unwrap()
}

/// Scheduler with a five minute tick window.
pub fn test_scheduler(
    db: &DatabaseConnection,
    transport: &RecordingTransport,
    clock: Arc<FixedClock>,
) -> NotificationRuleScheduler {
    NotificationRuleScheduler::new(
        Arc::new(test_dispatcher(db, transport, clock)),
        Settings::default().tick_granularity(),
    )
}

/// Engine over `db` with default settings.
pub fn test_engine(
    db: &DatabaseConnection,
    transport: &RecordingTransport,
    clock: Arc<FixedClock>,
) -> Engine {
    Engine::new(
        db.clone(),
        Arc::new(transport.clone()),
        Arc::new(DbOperatorDirectory::new(db.clone())),
        clock,
        &Settings::default(),
    )
    .unwrap()
}

/// Creates an installation for a client.
pub async fn create_test_installation(
    db: &DatabaseConnection,
    client_id: i64,
    name: &str,
) -> Result<installation::Model> {
    let model = installation::ActiveModel {
        client_id: Set(client_id),
        name: Set(name.to_string()),
        ..Default::default()
    };
    Ok(model.insert(db).await?)
}

/// Creates an evergreen contract for client 1 and one installation of that client.
///
/// # Defaults
/// * `plan_code`: "SILVER-12"
/// * `unlimited`: false
/// * installation name: "Main Site"
pub async fn create_test_contract(
    db: &DatabaseConnection,
    included_quota: Option<i32>,
) -> Result<(contract::Model, installation::Model)> {
    let model = contract::ActiveModel {
        client_id: Set(1),
        plan_code: Set("SILVER-12".to_string()),
        expires_on: Set(None),
        included_quota: Set(included_quota),
        unlimited: Set(false),
        created_at: Set(Utc::now()),
        ..Default::default()
    };
    let contract = model.insert(db).await?;
    let site = create_test_installation(db, contract.client_id, "Main Site").await?;
    Ok((contract, site))
}

/// Sets up a complete test environment with a contract and its installation.
/// Returns (db, contract, installation).
pub async fn setup_with_contract(
    included_quota: Option<i32>,
) -> Result<(DatabaseConnection, contract::Model, installation::Model)> {
    let db = setup_test_db().await?;
    let (contract, site) = create_test_contract(&db, included_quota).await?;
    Ok((db, contract, site))
}

/// Records an open intervention performed on [`test_today`].
pub async fn create_test_intervention(
    db: &DatabaseConnection,
    contract_id: i64,
    installation_id: i64,
    requested_included: bool,
) -> Result<CreatedIntervention> {
    let created = intervention::create_intervention(
        db,
        NewIntervention {
            contract_id,
            installation_id,
            performed_on: test_today(),
            description: "Test visit".to_string(),
            requested_included,
            invoice_reference: None,
            warehouse_code: None,
        },
        Utc::now(),
    )
    .await?;
    Ok(created.record)
}

/// Closes an intervention as TO_INVOICE.
pub async fn close_test_intervention(
    db: &DatabaseConnection,
    intervention_id: i64,
) -> Result<crate::entities::InterventionModel> {
    let closed = intervention::close(
        db,
        intervention_id,
        Some(InterventionOutcome::ToInvoice),
        None,
        1,
        Utc::now(),
    )
    .await?;
    Ok(closed.record)
}

/// Creates an active operator with alerts enabled and no subscriptions.
/// The email is the lowercased name at example.com.
pub async fn create_test_operator(
    db: &DatabaseConnection,
    name: &str,
    role: OperatorRole,
) -> Result<operator::Model> {
    let model = operator::ActiveModel {
        name: Set(name.to_string()),
        email: Set(format!("{}@example.com", name.to_lowercase())),
        role: Set(role),
        active: Set(true),
        alerts_enabled: Set(true),
        all_status_changes: Set(false),
        subscribed_topics: Set(String::new()),
        client_id: Set(None),
        ..Default::default()
    };
    Ok(model.insert(db).await?)
}

/// Marks an operator inactive.
pub async fn deactivate_operator(db: &DatabaseConnection, operator_id: i64) -> Result<()> {
    let current = operator::Entity::find_by_id(operator_id)
        .one(db)
        .await?
        .unwrap();
    let mut active: operator::ActiveModel = current.into();
    active.active = Set(false);
    active.update(db).await?;
    Ok(())
}

/// Assigns an operator to a client.
pub async fn assign_operator_client(
    db: &DatabaseConnection,
    operator_id: i64,
    client_id: i64,
) -> Result<()> {
    let current = operator::Entity::find_by_id(operator_id)
        .one(db)
        .await?
        .unwrap();
    let mut active: operator::ActiveModel = current.into();
    active.client_id = Set(Some(client_id));
    active.update(db).await?;
    Ok(())
}

/// Creates a license renewal for a client, due 30 days after [`test_today`].
pub async fn create_test_renewal(
    db: &DatabaseConnection,
    client_id: i64,
) -> Result<renewal_item::Model> {
    renewal::create_renewal_item(
        db,
        NewRenewalItem {
            client_id,
            installation_id: None,
            item_type: RenewalItemType::License,
            reference: format!("LIC-{client_id}"),
            due_on: test_today() + chrono::Duration::days(30),
        },
    )
    .await
}

/// A daily staff rule at 07:30 Rome time, automatic, with no filters.
pub fn test_new_rule(task: NotificationTask) -> NewRule {
    NewRule {
        task,
        audience: Audience::Staff,
        enabled: true,
        mode: RuleMode::Automatic,
        recipients: Vec::new(),
        frequency: Frequency::Daily,
        send_time: NaiveTime::from_hms_opt(7, 30, 0).unwrap(),
        timezone: "Europe/Rome".to_string(),
        day_of_week: None,
        stop_statuses: Vec::new(),
        only_future: false,
    }
}

/// A manual message about entities 1 and 2.
pub fn test_manual_dispatch(sender_id: i64, recipients: Vec<Recipient>) -> ManualDispatch {
    ManualDispatch {
        channel: AlertChannel::Manual,
        entity_ids: vec![1, 2],
        sender_id,
        subject: "Invoices to issue".to_string(),
        body: "Please invoice the listed interventions.".to_string(),
        recipients,
        send_email: true,
    }
}
