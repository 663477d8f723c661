//! Engine - the entry point UI-level actions call.
//!
//! Each method runs one state machine transition and turns the events it produced
//! into dispatcher calls. A transition and the log writes it causes share one
//! storage transaction; the automatic invoice-due alert is the exception and runs
//! after the close has been committed, one recipient at a time.

use crate::{
    config::Settings,
    core::{
        dispatch::{AlertDispatcher, Digest, DispatchReport, ManualDispatch, Recipient},
        events::DomainEvent,
        intervention::{self, CreatedIntervention, NewIntervention, create_intervention},
        renewal,
        schedule::{NewRule, NotificationRuleScheduler, TickReport, upsert_rule},
    },
    entities::{
        alert_log,
        enums::{AlertChannel, InterventionOutcome},
        notification_rule, renewal_item,
    },
    errors::{Error, Result},
    services::{Clock, MailTransport, OperatorDirectory},
};
use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::{DatabaseConnection, TransactionTrait};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// Result of closing an intervention
#[derive(Debug)]
pub struct ClosedIntervention {
    /// The closed intervention
    pub intervention: crate::entities::InterventionModel,
    /// Outcome of the automatic invoice-due alert, if one was due
    pub alerts: Option<DispatchReport>,
    /// Set when the alert failed; the close itself is committed regardless
    pub alert_error: Option<Error>,
}

/// Result of requesting a renewal invoice
#[derive(Debug, Clone)]
pub struct RenewalInvoiceRequest {
    /// The item, now TO_INVOICE
    pub item: renewal_item::Model,
    /// The stage-2 alert, None when nobody was eligible to receive it
    pub stage2: Option<alert_log::Model>,
}

/// Workflow engine over one database
pub struct Engine {
    db: DatabaseConnection,
    dispatcher: Arc<AlertDispatcher>,
    scheduler: NotificationRuleScheduler,
}

impl Engine {
    /// Wires the dispatcher and scheduler over `db`.
    pub fn new(
        db: DatabaseConnection,
        mailer: Arc<dyn MailTransport>,
        directory: Arc<dyn OperatorDirectory>,
        clock: Arc<dyn Clock>,
        settings: &Settings,
    ) -> Result<Self> {
        let dispatcher = Arc::new(AlertDispatcher::new(mailer, directory, clock, settings)?);
        let scheduler =
            NotificationRuleScheduler::new(Arc::clone(&dispatcher), settings.tick_granularity());
        Ok(Self {
            db,
            dispatcher,
            scheduler,
        })
    }

    /// The underlying connection.
    #[must_use]
    pub const fn db(&self) -> &DatabaseConnection {
        &self.db
    }

    /// The shared alert dispatcher.
    #[must_use]
    pub fn dispatcher(&self) -> &AlertDispatcher {
        &self.dispatcher
    }

    fn now(&self) -> DateTime<Utc> {
        self.dispatcher.clock().now()
    }

    /// Records a new intervention, classifying it against the contract quota.
    pub async fn add_intervention(&self, new: NewIntervention) -> Result<CreatedIntervention> {
        Ok(create_intervention(&self.db, new, self.now()).await?.record)
    }

    /// Closes an intervention and, for TO_INVOICE, alerts the eligible operators.
    ///
    /// # Errors
    /// Only the close itself can fail this call; an alert failure is reported in
    /// [`ClosedIntervention::alert_error`].
    #[instrument(skip(self, note))]
    pub async fn close_intervention(
        &self,
        intervention_id: i64,
        outcome: Option<InterventionOutcome>,
        note: Option<&str>,
        actor_id: i64,
    ) -> Result<ClosedIntervention> {
        let txn = self.db.begin().await?;
        let closed =
            intervention::close(&txn, intervention_id, outcome, note, actor_id, self.now()).await?;
        txn.commit().await?;

        let mut result = ClosedIntervention {
            intervention: closed.record.clone(),
            alerts: None,
            alert_error: None,
        };
        if closed.has(|e| matches!(e, DomainEvent::InvoiceDue { .. })) {
            match self
                .dispatcher
                .dispatch_invoice_due(&self.db, intervention_id)
                .await
            {
                Ok(report) => result.alerts = Some(report),
                Err(e) => {
                    error!(intervention_id, error = %e, "Invoice-due alert failed, retry by hand");
                    result.alert_error = Some(e);
                }
            }
        }
        Ok(result)
    }

    /// Reopens a closed intervention and records the audit entry in the same transaction.
    #[instrument(skip(self))]
    pub async fn reopen_intervention(
        &self,
        intervention_id: i64,
        actor_id: i64,
    ) -> Result<crate::entities::InterventionModel> {
        let actor = match self.dispatcher.directory().get(actor_id).await? {
            Some(op) if op.active => op,
            _ => {
                return Err(Error::permission(format!(
                    "Operator {actor_id} is not an active operator"
                )));
            }
        };
        let now = self.now();
        let audit = self
            .dispatcher
            .formatter()
            .intervention_reopened(intervention_id, &actor.name, now)?;

        let txn = self.db.begin().await?;
        let reopened = intervention::reopen(&txn, intervention_id, actor_id, actor.role, now).await?;
        self.dispatcher
            .record_audit(
                &txn,
                AlertChannel::InterventionReopened,
                intervention_id,
                &actor,
                audit,
            )
            .await?;
        txn.commit().await?;

        info!(intervention_id, actor = %actor.name, "Intervention reopened");
        Ok(reopened.record)
    }

    /// Issues the invoice; `invoiced_on` defaults to today in the organisational timezone.
    pub async fn mark_intervention_invoiced(
        &self,
        intervention_id: i64,
        invoice_number: &str,
        invoiced_on: Option<NaiveDate>,
    ) -> Result<crate::entities::InterventionModel> {
        let clock = self.dispatcher.clock();
        let invoiced_on =
            invoiced_on.unwrap_or_else(|| clock.today(self.dispatcher.timezone()));
        Ok(
            intervention::mark_invoiced(&self.db, intervention_id, invoice_number, invoiced_on)
                .await?
                .record,
        )
    }

    /// Appends a technical note to an intervention.
    pub async fn add_note(
        &self,
        intervention_id: i64,
        note: &str,
    ) -> Result<crate::entities::InterventionModel> {
        intervention::append_note(&self.db, intervention_id, note, self.now()).await
    }

    /// Registers a renewal item in TO_NOTIFY.
    pub async fn add_renewal_item(&self, new: renewal::NewRenewalItem) -> Result<renewal_item::Model> {
        renewal::create_renewal_item(&self.db, new).await
    }

    /// Sends the stage-1 alert and moves the item to NOTIFIED, atomically.
    #[instrument(skip(self, recipients))]
    pub async fn notify_renewal(
        &self,
        item_id: i64,
        recipients: &[Recipient],
    ) -> Result<renewal_item::Model> {
        let addresses = self.dispatcher.resolve_recipients(recipients).await?;

        let txn = self.db.begin().await?;
        let notified = renewal::notify_stage1(&txn, item_id, &addresses, self.now()).await?;
        self.dispatcher
            .renewal_stage_in(&txn, AlertChannel::RenewalStage1, &notified.record, &addresses)
            .await?;
        txn.commit().await?;
        Ok(notified.record)
    }

    /// Confirms a notified renewal.
    pub async fn confirm_renewal(&self, item_id: i64, actor_id: i64) -> Result<renewal_item::Model> {
        Ok(renewal::confirm(&self.db, item_id, actor_id, self.now())
            .await?
            .record)
    }

    /// Moves a confirmed item to TO_INVOICE and sends exactly one stage-2 alert.
    ///
    /// A failed send rolls the transition back.
    #[instrument(skip(self))]
    pub async fn request_renewal_invoice(&self, item_id: i64) -> Result<RenewalInvoiceRequest> {
        let current = renewal::get_renewal_item(&self.db, item_id).await?;
        let addresses: Vec<String> = self
            .dispatcher
            .eligible_recipients(AlertChannel::RenewalStage2, Some(current.client_id))
            .await?
            .into_iter()
            .map(|op| op.email)
            .collect();
        let now = self.now();

        let txn = self.db.begin().await?;
        let requested = renewal::request_invoice(&txn, item_id, now).await?;
        let mut item = requested.record;
        let mut stage2 = None;
        if addresses.is_empty() {
            warn!(item_id, "No eligible recipient for the stage-2 renewal alert");
        } else {
            item = renewal::record_stage2(&txn, item_id, &addresses, now).await?;
            stage2 = self
                .dispatcher
                .renewal_stage_in(&txn, AlertChannel::RenewalStage2, &item, &addresses)
                .await?;
        }
        txn.commit().await?;

        Ok(RenewalInvoiceRequest { item, stage2 })
    }

    /// Records the invoice of a renewal, closing it.
    pub async fn mark_renewal_invoiced(
        &self,
        item_id: i64,
        invoice_number: &str,
    ) -> Result<renewal_item::Model> {
        Ok(
            renewal::mark_invoiced(&self.db, item_id, invoice_number, self.now())
                .await?
                .record,
        )
    }

    /// Drops a renewal that is not terminal yet.
    pub async fn mark_not_renewed(&self, item_id: i64) -> Result<renewal_item::Model> {
        Ok(renewal::mark_not_renewed(&self.db, item_id, self.now())
            .await?
            .record)
    }

    /// Sends or records a user-edited message.
    pub async fn dispatch_manual(&self, dispatch: ManualDispatch) -> Result<alert_log::Model> {
        self.dispatcher.dispatch_manual(&self.db, dispatch).await
    }

    /// Bulk invoice-due message for a user to review and edit before a manual send.
    pub async fn preview_invoice_due_digest(&self) -> Result<Option<Digest>> {
        self.dispatcher.invoice_due_digest(&self.db).await
    }

    /// Creates or replaces the rule of a (task, audience) topic.
    pub async fn save_rule(&self, rule: NewRule) -> Result<notification_rule::Model> {
        upsert_rule(&self.db, rule, self.now()).await
    }

    /// One pass of the recurring scheduler.
    pub async fn run_scheduled_tick(&self, now: DateTime<Utc>) -> Result<TickReport> {
        self.scheduler.run_tick(&self.db, now).await
    }

    /// Fires one rule now, at most once per recipient and local day.
    pub async fn trigger_rule_now(&self, rule_id: i64) -> Result<usize> {
        self.scheduler
            .trigger_now(&self.db, rule_id, self.now())
            .await
    }
}
