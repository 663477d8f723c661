//! Alert dispatcher - resolves recipients, delivers mail and writes the alert log.
//!
//! Every delivery is one storage transaction: the log row is inserted first (its
//! UNIQUE `dedup_key` claims the slot), the mail is sent, and the transaction is
//! committed only once the transport confirmed delivery. A failed send drops the
//! transaction, so the log never records an alert that did not go out.
//!
//! With a single-connection pool nothing outside the open transaction may touch
//! storage, so recipients are always resolved before a transaction begins.

use crate::{
    config::Settings,
    core::{
        intervention::{get_intervention, invoice_due},
        message::{InterventionLine, MessageFormatter, RenderedMessage, RenewalLine},
    },
    entities::{
        AlertLog, Installation, OperatorModel, alert_log,
        enums::{AlertChannel, OperatorRole},
        installation, intervention, renewal_item,
    },
    errors::{Error, Result},
    services::{Clock, MailTransport, OperatorDirectory, OutgoingMail, TransportError},
};
use chrono::NaiveDate;
use chrono_tz::Tz;
use regex::Regex;
use sea_orm::{
    DatabaseConnection, PaginatorTrait, Set, SqlErr, TransactionTrait, prelude::*,
};
use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, LazyLock, Mutex, PoisonError},
    time::Duration,
};
use tracing::{debug, info, instrument, warn};

/// Sender recorded for alerts the engine sends on its own
pub const SYSTEM_SENDER: &str = "system";

#[allow(clippy::expect_used)]
static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+'-]+@[A-Za-z0-9-]+(\.[A-Za-z0-9-]+)*\.[A-Za-z]{2,}$")
        .expect("Is a valid regex")
});

/// Syntactic address check, no DNS lookup.
#[must_use]
pub fn is_valid_email(address: &str) -> bool {
    EMAIL.is_match(address)
}

/// Target of a manual dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipient {
    /// An operator, by id
    Operator(i64),
    /// A raw address
    Email(String),
}

impl Recipient {
    /// Numeric input is an operator id, anything else an address.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        raw.parse::<i64>()
            .map_or_else(|_| Self::Email(raw.to_string()), Self::Operator)
    }
}

/// A pre-rendered message a user edited and asked to send
#[derive(Debug, Clone)]
pub struct ManualDispatch {
    /// Channel recorded in the log
    pub channel: AlertChannel,
    /// Entities the message is about; the first one is the primary entity
    pub entity_ids: Vec<i64>,
    /// Operator sending the message
    pub sender_id: i64,
    /// Subject as edited by the sender
    pub subject: String,
    /// Plain-text body as edited by the sender
    pub body: String,
    /// Operators or addresses to send to
    pub recipients: Vec<Recipient>,
    /// False records the alert without sending it
    pub send_email: bool,
}

/// Outcome of a multi-recipient dispatch
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    /// Messages delivered and recorded
    pub sent: usize,
    /// Recipients already served for the same key
    pub skipped: usize,
}

impl DispatchReport {
    fn record(&mut self, delivered: bool) {
        if delivered {
            self.sent += 1;
        } else {
            self.skipped += 1;
        }
    }
}

/// A rendered digest and the ids of the entities it lists
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Digest {
    /// Rendered digest
    pub message: RenderedMessage,
    /// Ids of the listed entities
    pub entity_ids: Vec<i64>,
}

/// One alert on its way to the log and the transport.
#[derive(Debug, Clone)]
pub(crate) struct Delivery {
    pub channel: AlertChannel,
    pub entity_id: Option<i64>,
    pub related_ids: Vec<i64>,
    pub recipients: Vec<String>,
    pub sender: String,
    pub message: RenderedMessage,
    pub dedup_key: Option<String>,
    pub send_email: bool,
}

/// Dedup key of automatic per-entity alerts: one per channel, entity, local day and recipient.
#[must_use]
pub fn dedup_key(channel: AlertChannel, entity_id: i64, day: NaiveDate, email: &str) -> String {
    format!("{channel}:{entity_id}:{day}:{}", email.to_lowercase())
}

/// Dedup key of scheduled digests.
#[must_use]
pub fn digest_dedup_key(channel: AlertChannel, rule_id: i64, day: NaiveDate, email: &str) -> String {
    format!("{channel}:rule-{rule_id}:{day}:{}", email.to_lowercase())
}

/// Whether an operator receives an automatic alert on `topic`.
///
/// `client_id` restricts client-scoped channels: an operator assigned to another
/// client is skipped, unassigned operators are not.
#[must_use]
pub fn is_eligible(
    operator: &OperatorModel,
    topic: &str,
    roles: &[OperatorRole],
    client_id: Option<i64>,
) -> bool {
    let interested = operator.is_subscribed_to(topic)
        || operator.all_status_changes
        || roles.contains(&operator.role);
    let same_client =
        client_id.is_none_or(|client| operator.client_id.is_none_or(|own| own == client));

    operator.active && operator.alerts_enabled && interested && same_client
}

fn join_ids(ids: &[i64]) -> String {
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// Removes a key from the in-flight set when the attempt ends, however it ends.
struct InFlight<'a> {
    set: &'a Mutex<HashSet<String>>,
    key: String,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

/// Delivers alerts and keeps the alert log.
pub struct AlertDispatcher {
    mailer: Arc<dyn MailTransport>,
    directory: Arc<dyn OperatorDirectory>,
    clock: Arc<dyn Clock>,
    formatter: MessageFormatter,
    timezone: Tz,
    timeout: Duration,
    invoice_due_roles: Vec<OperatorRole>,
    renewal_roles: Vec<OperatorRole>,
    in_flight: Mutex<HashSet<String>>,
}

impl AlertDispatcher {
    /// Builds a dispatcher from its collaborators and the alert settings.
    pub fn new(
        mailer: Arc<dyn MailTransport>,
        directory: Arc<dyn OperatorDirectory>,
        clock: Arc<dyn Clock>,
        settings: &Settings,
    ) -> Result<Self> {
        Ok(Self {
            mailer,
            directory,
            clock,
            formatter: MessageFormatter::new()?,
            timezone: settings.timezone()?,
            timeout: settings.mail_timeout(),
            invoice_due_roles: settings.alerts.invoice_due_roles.clone(),
            renewal_roles: settings.alerts.renewal_roles.clone(),
            in_flight: Mutex::new(HashSet::new()),
        })
    }

    pub(crate) fn formatter(&self) -> &MessageFormatter {
        &self.formatter
    }

    pub(crate) fn directory(&self) -> &dyn OperatorDirectory {
        self.directory.as_ref()
    }

    pub(crate) fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Organisational timezone, the calendar of automatic dedup keys.
    #[must_use]
    pub const fn timezone(&self) -> Tz {
        self.timezone
    }

    fn whitelisted_roles(&self, channel: AlertChannel) -> &[OperatorRole] {
        match channel {
            AlertChannel::AutomaticInvoiceDue | AlertChannel::BulkInvoiceDue => {
                &self.invoice_due_roles
            }
            AlertChannel::RenewalStage1
            | AlertChannel::RenewalStage2
            | AlertChannel::RenewalReminder => &self.renewal_roles,
            AlertChannel::InterventionReopened | AlertChannel::Manual => &[],
        }
    }

    /// Operators that receive automatic alerts of `channel`.
    pub async fn eligible_recipients(
        &self,
        channel: AlertChannel,
        client_id: Option<i64>,
    ) -> Result<Vec<OperatorModel>> {
        let topic = channel.to_string();
        let roles = self.whitelisted_roles(channel);
        Ok(self
            .directory
            .list_active()
            .await?
            .into_iter()
            .filter(|op| is_eligible(op, &topic, roles, client_id))
            .collect())
    }

    /// Turns manual recipients into addresses.
    ///
    /// # Errors
    /// `Validation` when the list is empty, an operator is unknown or inactive,
    /// or an address is malformed.
    pub async fn resolve_recipients(&self, recipients: &[Recipient]) -> Result<Vec<String>> {
        if recipients.is_empty() {
            return Err(Error::validation("At least one recipient is required"));
        }

        let mut seen = HashSet::new();
        let mut addresses = Vec::with_capacity(recipients.len());
        for recipient in recipients {
            let address = match recipient {
                Recipient::Operator(id) => match self.directory.get(*id).await? {
                    Some(op) if op.active => op.email,
                    _ => {
                        return Err(Error::validation(format!(
                            "Operator {id} is not an active operator"
                        )));
                    }
                },
                Recipient::Email(raw) => raw.trim().to_string(),
            };
            if !is_valid_email(&address) {
                return Err(Error::validation(format!(
                    "'{address}' is not a valid email address"
                )));
            }
            if seen.insert(address.to_lowercase()) {
                addresses.push(address);
            }
        }
        Ok(addresses)
    }

    async fn send(&self, mail: &OutgoingMail) -> Result<()> {
        match tokio::time::timeout(self.timeout, self.mailer.send(mail)).await {
            Ok(result) => result.map_err(Into::into),
            Err(_) => Err(TransportError::Timeout(self.timeout).into()),
        }
    }

    /// Inserts the log row and sends the mail inside `txn`. The caller commits.
    ///
    /// Returns `None` when the dedup key was already claimed.
    pub(crate) async fn deliver_in<C>(
        &self,
        txn: &C,
        delivery: &Delivery,
    ) -> Result<Option<alert_log::Model>>
    where
        C: ConnectionTrait,
    {
        let entry = alert_log::ActiveModel {
            channel: Set(delivery.channel),
            entity_id: Set(delivery.entity_id),
            related_ids: Set(join_ids(&delivery.related_ids)),
            recipient: Set(delivery.recipients.join(", ")),
            sender: Set(delivery.sender.clone()),
            subject: Set(delivery.message.subject.clone()),
            body: Set(delivery.message.body_text.clone()),
            emailed: Set(delivery.send_email),
            dedup_key: Set(delivery.dedup_key.clone()),
            created_at: Set(self.clock.now()),
            ..Default::default()
        };

        let row = match entry.insert(txn).await {
            Ok(row) => row,
            Err(err) if matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                debug!(dedup_key = ?delivery.dedup_key, "Alert already recorded");
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };

        if delivery.send_email {
            self.send(&delivery.message.to_mail(delivery.recipients.clone()))
                .await?;
        }
        Ok(Some(row))
    }

    /// Runs one delivery as its own transaction. Returns false when skipped as a duplicate.
    pub(crate) async fn deliver(&self, db: &DatabaseConnection, delivery: &Delivery) -> Result<bool> {
        let _claim = match &delivery.dedup_key {
            Some(key) => {
                if !self
                    .in_flight
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(key.clone())
                {
                    debug!(dedup_key = %key, "Alert already in flight");
                    return Ok(false);
                }
                let claim = InFlight {
                    set: &self.in_flight,
                    key: key.clone(),
                };
                let already = AlertLog::find()
                    .filter(alert_log::Column::DedupKey.eq(key.as_str()))
                    .count(db)
                    .await?;
                if already > 0 {
                    return Ok(false);
                }
                Some(claim)
            }
            None => None,
        };

        let txn = db.begin().await?;
        if self.deliver_in(&txn, delivery).await?.is_none() {
            return Ok(false);
        }
        txn.commit().await?;
        Ok(true)
    }

    /// Automatic alert for an intervention closed as TO_INVOICE.
    ///
    /// Each eligible recipient gets at most one message per intervention and local
    /// day; every recipient is its own unit, so a failure leaves earlier sends committed.
    #[instrument(skip(self, db))]
    pub async fn dispatch_invoice_due(
        &self,
        db: &DatabaseConnection,
        intervention_id: i64,
    ) -> Result<DispatchReport> {
        let mut report = DispatchReport::default();
        let intervention = get_intervention(db, intervention_id).await?;
        if !intervention.is_invoice_due() {
            debug!(intervention_id, "Intervention is not invoice-due, nothing to send");
            return Ok(report);
        }

        let line = intervention_lines(db, std::slice::from_ref(&intervention))
            .await?
            .pop()
            .ok_or(Error::NotFound {
                entity: "installation",
                id: intervention.installation_id,
            })?;
        let channel = AlertChannel::AutomaticInvoiceDue;
        let recipients = self.eligible_recipients(channel, Some(line.client_id)).await?;
        if recipients.is_empty() {
            warn!(intervention_id, "No eligible recipient for invoice-due alert");
            return Ok(report);
        }

        let message = self.formatter.invoice_due(&line)?;
        let day = self.clock.today(self.timezone);
        for operator in recipients {
            let delivery = Delivery {
                channel,
                entity_id: Some(intervention_id),
                related_ids: vec![intervention_id],
                recipients: vec![operator.email.clone()],
                sender: SYSTEM_SENDER.to_string(),
                message: message.clone(),
                dedup_key: Some(dedup_key(channel, intervention_id, day, &operator.email)),
                send_email: true,
            };
            report.record(self.deliver(db, &delivery).await?);
        }

        info!(intervention_id, sent = report.sent, skipped = report.skipped, "Invoice-due alert dispatched");
        Ok(report)
    }

    /// Stage-1 or stage-2 renewal alert, inside the transaction of the transition.
    ///
    /// Keyed per item and stage, so each stage is recorded at most once.
    pub(crate) async fn renewal_stage_in<C>(
        &self,
        txn: &C,
        channel: AlertChannel,
        item: &renewal_item::Model,
        recipients: &[String],
    ) -> Result<Option<alert_log::Model>>
    where
        C: ConnectionTrait,
    {
        let line = renewal_lines(txn, std::slice::from_ref(item))
            .await?
            .pop()
            .ok_or(Error::NotFound {
                entity: "renewal item",
                id: item.id,
            })?;
        let delivery = Delivery {
            channel,
            entity_id: Some(item.id),
            related_ids: vec![item.id],
            recipients: recipients.to_vec(),
            sender: SYSTEM_SENDER.to_string(),
            message: self.formatter.renewal_stage(channel, &line)?,
            dedup_key: Some(format!("{channel}:{}", item.id)),
            send_email: true,
        };
        self.deliver_in(txn, &delivery).await
    }

    /// Log-only audit entry, inside the caller's transaction.
    pub(crate) async fn record_audit<C>(
        &self,
        txn: &C,
        channel: AlertChannel,
        entity_id: i64,
        actor: &OperatorModel,
        message: RenderedMessage,
    ) -> Result<alert_log::Model>
    where
        C: ConnectionTrait,
    {
        let delivery = Delivery {
            channel,
            entity_id: Some(entity_id),
            related_ids: vec![entity_id],
            recipients: Vec::new(),
            sender: actor.email.clone(),
            message,
            dedup_key: None,
            send_email: false,
        };
        self.deliver_in(txn, &delivery)
            .await?
            .ok_or_else(|| Error::validation("Audit entries carry no dedup key"))
    }

    /// Sends (or only records) a user-composed message. Always writes exactly one log entry.
    ///
    /// # Errors
    /// `Validation` for a missing sender, subject or recipient and for malformed
    /// addresses, before anything is attempted. `Transport` when delivery fails, in
    /// which case nothing is logged.
    #[instrument(skip(self, db, dispatch), fields(channel = %dispatch.channel, sender_id = dispatch.sender_id))]
    pub async fn dispatch_manual(
        &self,
        db: &DatabaseConnection,
        dispatch: ManualDispatch,
    ) -> Result<alert_log::Model> {
        if dispatch.subject.trim().is_empty() {
            return Err(Error::validation("Subject cannot be empty"));
        }
        let sender = match self.directory.get(dispatch.sender_id).await? {
            Some(op) if op.active => op,
            _ => {
                return Err(Error::validation(format!(
                    "Sender {} is not an active operator",
                    dispatch.sender_id
                )));
            }
        };
        let recipients = self.resolve_recipients(&dispatch.recipients).await?;

        let delivery = Delivery {
            channel: dispatch.channel,
            entity_id: dispatch.entity_ids.first().copied(),
            related_ids: dispatch.entity_ids,
            recipients,
            sender: sender.email,
            message: RenderedMessage::from_text(dispatch.subject, dispatch.body),
            dedup_key: None,
            send_email: dispatch.send_email,
        };

        let txn = db.begin().await?;
        let entry = self
            .deliver_in(&txn, &delivery)
            .await?
            .ok_or_else(|| Error::validation("Manual dispatch carries no dedup key"))?;
        txn.commit().await?;

        info!(alert_id = entry.id, emailed = entry.emailed, "Manual alert recorded");
        Ok(entry)
    }

    /// Bulk digest of every invoice-due intervention, `None` when there is none.
    pub async fn invoice_due_digest<C>(&self, db: &C) -> Result<Option<Digest>>
    where
        C: ConnectionTrait,
    {
        let lines = intervention_lines(db, &invoice_due(db).await?).await?;
        self.invoice_due_digest_of(lines)
    }

    pub(crate) fn invoice_due_digest_of(&self, lines: Vec<InterventionLine>) -> Result<Option<Digest>> {
        if lines.is_empty() {
            return Ok(None);
        }
        let entity_ids = lines.iter().map(|l| l.id).collect();
        Ok(Some(Digest {
            message: self.formatter.bulk_invoice_due(lines)?,
            entity_ids,
        }))
    }

    pub(crate) fn renewal_digest_of(&self, lines: &[RenewalLine]) -> Result<Option<Digest>> {
        if lines.is_empty() {
            return Ok(None);
        }
        Ok(Some(Digest {
            message: self.formatter.renewal_reminder(lines)?,
            entity_ids: lines.iter().map(|l| l.id).collect(),
        }))
    }
}

async fn installations_by_id<C>(db: &C, ids: Vec<i64>) -> Result<HashMap<i64, installation::Model>>
where
    C: ConnectionTrait,
{
    Ok(Installation::find()
        .filter(installation::Column::Id.is_in(ids))
        .all(db)
        .await?
        .into_iter()
        .map(|i| (i.id, i))
        .collect())
}

/// Message lines for interventions, with installation names resolved.
pub async fn intervention_lines<C>(
    db: &C,
    interventions: &[intervention::Model],
) -> Result<Vec<InterventionLine>>
where
    C: ConnectionTrait,
{
    let installations =
        installations_by_id(db, interventions.iter().map(|i| i.installation_id).collect()).await?;

    interventions
        .iter()
        .map(|i| {
            let site = installations
                .get(&i.installation_id)
                .ok_or(Error::NotFound {
                    entity: "installation",
                    id: i.installation_id,
                })?;
            Ok(InterventionLine {
                id: i.id,
                client_id: site.client_id,
                installation_id: site.id,
                installation: site.name.clone(),
                performed_on: i.performed_on,
                description: i.description.clone(),
                included: i.included,
                invoice_reference: i.invoice_reference.clone(),
                warehouse_code: i.warehouse_code.clone(),
            })
        })
        .collect()
}

/// Renewal lines with their installation names.
pub async fn renewal_lines<C>(db: &C, items: &[renewal_item::Model]) -> Result<Vec<RenewalLine>>
where
    C: ConnectionTrait,
{
    let installations =
        installations_by_id(db, items.iter().filter_map(|i| i.installation_id).collect()).await?;

    Ok(items
        .iter()
        .map(|item| RenewalLine {
            id: item.id,
            client_id: item.client_id,
            item_type: item.item_type,
            reference: item.reference.clone(),
            installation: item
                .installation_id
                .and_then(|id| installations.get(&id))
                .map(|site| site.name.clone()),
            due_on: item.due_on,
            stage: item.stage,
        })
        .collect())
}
