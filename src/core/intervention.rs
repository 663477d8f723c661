//! Intervention lifecycle - OPEN → CLOSED, reopen, and invoice issue.
//!
//! Every transition is a single conditional UPDATE whose WHERE clause carries the
//! guard. When no row matches, the record is re-read to tell a missing intervention
//! apart from a rejected transition.

use crate::{
    core::{
        entitlement,
        events::{DomainEvent, Transitioned},
    },
    entities::{
        Installation, Intervention,
        enums::{InterventionOutcome, InterventionState, OperatorRole},
        intervention,
    },
    errors::{Error, Result},
};
use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::{
    QueryOrder, Set, TransactionTrait,
    prelude::*,
    sea_query::{BinOper, Expr},
};
use tracing::{debug, info, instrument};

const ENTITY: &str = "intervention";

/// Input for recording a new service visit
#[derive(Debug, Clone)]
pub struct NewIntervention {
    /// Contract the visit counts against
    pub contract_id: i64,
    /// Serviced installation
    pub installation_id: i64,
    /// Day of the visit
    pub performed_on: NaiveDate,
    /// Work performed, must not be blank
    pub description: String,
    /// Whether the caller asked for the visit to count against the quota
    pub requested_included: bool,
    /// Invoice routing reference
    pub invoice_reference: Option<String>,
    /// Invoice routing warehouse code
    pub warehouse_code: Option<String>,
}

/// A freshly inserted intervention and the downgrade note, if any
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedIntervention {
    /// The stored intervention
    pub intervention: intervention::Model,
    /// Why the visit was made extra, if it was
    pub downgrade_note: Option<String>,
}

impl intervention::Model {
    /// Status name used by notification stop lists: `OPEN`, the closed outcome, or `INVOICED`.
    #[must_use]
    pub fn status_label(&self) -> String {
        if self.invoice_number.is_some() {
            return "INVOICED".to_string();
        }
        match (self.state, self.outcome) {
            (InterventionState::Closed, Some(outcome)) => outcome.to_string(),
            (state, _) => state.to_string(),
        }
    }

    /// State description used in transition errors.
    #[must_use]
    pub fn describe_state(&self) -> String {
        match self.state {
            InterventionState::Open => self.state.to_string(),
            InterventionState::Closed => format!("{} ({})", self.state, self.status_label()),
        }
    }
}

fn append_line(existing: &str, at: DateTime<Utc>, note: &str) -> String {
    let line = format!("[{}] {}", at.format("%Y-%m-%d %H:%M"), note.trim());
    if existing.is_empty() {
        line
    } else {
        format!("{existing}\n{line}")
    }
}

/// Loads an intervention or reports it missing.
pub async fn get_intervention<C>(db: &C, intervention_id: i64) -> Result<intervention::Model>
where
    C: ConnectionTrait,
{
    Intervention::find_by_id(intervention_id)
        .one(db)
        .await?
        .ok_or(Error::NotFound {
            entity: ENTITY,
            id: intervention_id,
        })
}

async fn rejected<C>(db: &C, intervention_id: i64, action: &'static str) -> Error
where
    C: ConnectionTrait,
{
    match get_intervention(db, intervention_id).await {
        Ok(current) => Error::InvalidTransition {
            entity: ENTITY,
            id: intervention_id,
            action,
            current: current.describe_state(),
        },
        Err(e) => e,
    }
}

/// Records a new intervention, downgrading it to extra when the quota is exhausted.
///
/// The contract row is locked, then the consumed count is read and the row
/// inserted inside one transaction.
#[instrument(skip(db, new), fields(contract_id = new.contract_id))]
pub async fn create_intervention(
    db: &DatabaseConnection,
    new: NewIntervention,
    now: DateTime<Utc>,
) -> Result<Transitioned<CreatedIntervention>> {
    if new.description.trim().is_empty() {
        return Err(Error::validation("Intervention description cannot be empty"));
    }

    let txn = db.begin().await?;

    let contract = entitlement::lock_contract(&txn, new.contract_id).await?;
    let installation = Installation::find_by_id(new.installation_id)
        .one(&txn)
        .await?
        .ok_or(Error::NotFound {
            entity: "installation",
            id: new.installation_id,
        })?;
    if installation.client_id != contract.client_id {
        return Err(Error::validation(format!(
            "Installation {} does not belong to the client of contract {}",
            installation.id, contract.id
        )));
    }

    let consumed = entitlement::consumed_included(&txn, contract.id).await?;
    let classification = entitlement::classify(&contract, consumed, new.requested_included);
    let notes = classification
        .note
        .map(|note| append_line("", now, note))
        .unwrap_or_default();

    let model = intervention::ActiveModel {
        contract_id: Set(contract.id),
        installation_id: Set(installation.id),
        performed_on: Set(new.performed_on),
        description: Set(new.description.trim().to_string()),
        included: Set(classification.included),
        invoice_reference: Set(new.invoice_reference),
        warehouse_code: Set(new.warehouse_code),
        state: Set(InterventionState::Open),
        outcome: Set(None),
        invoice_number: Set(None),
        invoiced_on: Set(None),
        technical_notes: Set(notes),
        closed_by: Set(None),
        closed_at: Set(None),
        created_at: Set(now),
        ..Default::default()
    };
    let inserted = model.insert(&txn).await?;
    txn.commit().await?;

    if let Some(note) = classification.note {
        info!(
            intervention_id = inserted.id,
            consumed, "Intervention downgraded to extra: {note}"
        );
    }

    let event = DomainEvent::InterventionCreated {
        intervention_id: inserted.id,
        downgraded: classification.note.is_some(),
    };
    Ok(Transitioned::new(
        CreatedIntervention {
            intervention: inserted,
            downgrade_note: classification.note.map(str::to_string),
        },
        vec![event],
    ))
}

/// Appends a line to the technical notes without touching earlier lines.
///
/// The concatenation happens in the UPDATE itself, so concurrent appends never
/// drop each other's lines.
pub async fn append_note<C>(
    db: &C,
    intervention_id: i64,
    note: &str,
    now: DateTime<Utc>,
) -> Result<intervention::Model>
where
    C: ConnectionTrait,
{
    if note.trim().is_empty() {
        return Err(Error::validation("A note cannot be empty"));
    }
    let notes = intervention::Column::TechnicalNotes;
    let line = append_line("", now, note);
    let appended = Expr::case(Expr::col(notes).eq(""), line.clone())
        .finally(Expr::col(notes).binary(BinOper::Custom("||"), format!("\n{line}")));

    let result = Intervention::update_many()
        .col_expr(notes, appended.into())
        .filter(intervention::Column::Id.eq(intervention_id))
        .exec(db)
        .await?;
    if result.rows_affected == 0 {
        return Err(Error::NotFound {
            entity: ENTITY,
            id: intervention_id,
        });
    }
    get_intervention(db, intervention_id).await
}

/// Closes an open intervention with a billing outcome.
///
/// Run it inside a transaction when a note is given, so the state change and the
/// note land together.
#[instrument(skip(db, note))]
pub async fn close<C>(
    db: &C,
    intervention_id: i64,
    outcome: Option<InterventionOutcome>,
    note: Option<&str>,
    actor_id: i64,
    now: DateTime<Utc>,
) -> Result<Transitioned<intervention::Model>>
where
    C: ConnectionTrait,
{
    let outcome =
        outcome.ok_or_else(|| Error::validation("A closing outcome is required"))?;

    let result = Intervention::update_many()
        .col_expr(
            intervention::Column::State,
            Expr::value(InterventionState::Closed),
        )
        .col_expr(intervention::Column::Outcome, Expr::value(Some(outcome)))
        .col_expr(intervention::Column::ClosedAt, Expr::value(Some(now)))
        .col_expr(intervention::Column::ClosedBy, Expr::value(Some(actor_id)))
        .filter(intervention::Column::Id.eq(intervention_id))
        .filter(intervention::Column::State.eq(InterventionState::Open))
        .exec(db)
        .await?;
    if result.rows_affected == 0 {
        return Err(rejected(db, intervention_id, "close").await);
    }

    let closed = match note.map(str::trim).filter(|n| !n.is_empty()) {
        Some(note) => append_note(db, intervention_id, note, now).await?,
        None => get_intervention(db, intervention_id).await?,
    };
    debug!(intervention_id, %outcome, "Intervention closed");

    let mut events = vec![DomainEvent::InterventionClosed {
        intervention_id,
        outcome,
    }];
    if closed.is_invoice_due() {
        events.push(DomainEvent::InvoiceDue { intervention_id });
    }
    Ok(Transitioned::new(closed, events))
}

/// Reopens a closed intervention. Only supervisors and project managers may do so,
/// and an intervention whose invoice was already issued stays closed.
#[instrument(skip(db))]
pub async fn reopen<C>(
    db: &C,
    intervention_id: i64,
    actor_id: i64,
    actor_role: OperatorRole,
    now: DateTime<Utc>,
) -> Result<Transitioned<intervention::Model>>
where
    C: ConnectionTrait,
{
    if !actor_role.can_reopen() {
        return Err(Error::permission(format!(
            "Operator {actor_id} with role {actor_role} cannot reopen interventions"
        )));
    }

    let result = Intervention::update_many()
        .col_expr(
            intervention::Column::State,
            Expr::value(InterventionState::Open),
        )
        .col_expr(
            intervention::Column::Outcome,
            Expr::value(Option::<InterventionOutcome>::None),
        )
        .col_expr(
            intervention::Column::ClosedAt,
            Expr::value(Option::<DateTime<Utc>>::None),
        )
        .col_expr(
            intervention::Column::ClosedBy,
            Expr::value(Option::<i64>::None),
        )
        .filter(intervention::Column::Id.eq(intervention_id))
        .filter(intervention::Column::State.eq(InterventionState::Closed))
        .filter(intervention::Column::InvoiceNumber.is_null())
        .exec(db)
        .await?;
    if result.rows_affected == 0 {
        return Err(rejected(db, intervention_id, "reopen").await);
    }

    info!(intervention_id, actor_id, "Intervention reopened");
    let reopened = get_intervention(db, intervention_id).await?;
    Ok(Transitioned::new(
        reopened,
        vec![DomainEvent::InterventionReopened {
            intervention_id,
            actor_id,
            at: now,
        }],
    ))
}

/// Records the issued invoice of a TO_INVOICE intervention.
#[instrument(skip(db))]
pub async fn mark_invoiced<C>(
    db: &C,
    intervention_id: i64,
    invoice_number: &str,
    invoiced_on: NaiveDate,
) -> Result<Transitioned<intervention::Model>>
where
    C: ConnectionTrait,
{
    let invoice_number = invoice_number.trim();
    if invoice_number.is_empty() {
        return Err(Error::validation("Invoice number cannot be blank"));
    }

    let result = Intervention::update_many()
        .col_expr(
            intervention::Column::InvoiceNumber,
            Expr::value(Some(invoice_number.to_string())),
        )
        .col_expr(
            intervention::Column::InvoicedOn,
            Expr::value(Some(invoiced_on)),
        )
        .filter(intervention::Column::Id.eq(intervention_id))
        .filter(intervention::Column::State.eq(InterventionState::Closed))
        .filter(intervention::Column::Outcome.eq(InterventionOutcome::ToInvoice))
        .filter(intervention::Column::InvoiceNumber.is_null())
        .exec(db)
        .await?;
    if result.rows_affected == 0 {
        return Err(rejected(db, intervention_id, "invoice").await);
    }

    let invoiced = get_intervention(db, intervention_id).await?;
    Ok(Transitioned::new(
        invoiced,
        vec![DomainEvent::InterventionInvoiced { intervention_id }],
    ))
}

/// Closed TO_INVOICE interventions without an invoice number, oldest first.
pub async fn invoice_due<C>(db: &C) -> Result<Vec<intervention::Model>>
where
    C: ConnectionTrait,
{
    Intervention::find()
        .filter(intervention::Column::State.eq(InterventionState::Closed))
        .filter(intervention::Column::Outcome.eq(InterventionOutcome::ToInvoice))
        .filter(intervention::Column::InvoiceNumber.is_null())
        .order_by_asc(intervention::Column::PerformedOn)
        .order_by_asc(intervention::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::test_utils::*;

    #[tokio::test]
    async fn test_close_requires_outcome() -> Result<()> {
        let db = setup_test_db().await?;
        let result = close(&db, 1, None, None, 1, Utc::now()).await;
        assert!(matches!(result, Err(Error::Validation { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_mark_invoiced_rejects_blank_number() -> Result<()> {
        let db = setup_test_db().await?;
        let result = mark_invoiced(&db, 1, "   ", test_today()).await;
        assert!(matches!(result, Err(Error::Validation { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_reopen_by_technician_is_denied_before_touching_storage() -> Result<()> {
        let db = setup_test_db().await?;
        let result = reopen(&db, 1, 7, OperatorRole::Technician, Utc::now()).await;
        assert!(matches!(result, Err(Error::Permission { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_close_sets_outcome_and_audit_fields() -> Result<()> {
        let (db, contract, installation) = setup_with_contract(Some(5)).await?;
        let created = create_test_intervention(&db, contract.id, installation.id, true).await?;
        let now = Utc::now();

        let closed = close(
            &db,
            created.intervention.id,
            Some(InterventionOutcome::DoNotInvoice),
            Some("replaced power supply"),
            42,
            now,
        )
        .await?;

        let record = &closed.record;
        assert_eq!(record.state, InterventionState::Closed);
        assert_eq!(record.outcome, Some(InterventionOutcome::DoNotInvoice));
        assert_eq!(record.closed_by, Some(42));
        assert_eq!(record.closed_at, Some(now));
        assert!(record.technical_notes.ends_with("replaced power supply"));
        assert!(!closed.has(|e| matches!(e, DomainEvent::InvoiceDue { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_close_to_invoice_emits_invoice_due() -> Result<()> {
        let (db, contract, installation) = setup_with_contract(Some(5)).await?;
        let created = create_test_intervention(&db, contract.id, installation.id, false).await?;

        let closed = close(
            &db,
            created.intervention.id,
            Some(InterventionOutcome::ToInvoice),
            None,
            1,
            Utc::now(),
        )
        .await?;
        assert!(closed.record.is_invoice_due());
        assert!(closed.has(|e| matches!(e, DomainEvent::InvoiceDue { .. })));

        let due = invoice_due(&db).await?;
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, created.intervention.id);
        Ok(())
    }

    #[tokio::test]
    async fn test_close_twice_is_invalid_transition() -> Result<()> {
        let (db, contract, installation) = setup_with_contract(Some(5)).await?;
        let created = create_test_intervention(&db, contract.id, installation.id, true).await?;
        close_test_intervention(&db, created.intervention.id).await?;

        let result = close(
            &db,
            created.intervention.id,
            Some(InterventionOutcome::DoNotInvoice),
            None,
            1,
            Utc::now(),
        )
        .await;
        match result {
            Err(Error::InvalidTransition { current, .. }) => {
                assert_eq!(current, "CLOSED (TO_INVOICE)");
            }
            other => panic!("expected invalid transition, got {other:?}"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_close_unknown_intervention_is_not_found() -> Result<()> {
        let db = setup_test_db().await?;
        let result = close(
            &db,
            404,
            Some(InterventionOutcome::ToInvoice),
            None,
            1,
            Utc::now(),
        )
        .await;
        assert!(matches!(result, Err(Error::NotFound { id: 404, .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_concurrent_notes_all_survive() -> Result<()> {
        let (db, contract, installation) = setup_with_contract(Some(5)).await?;
        let created = create_test_intervention(&db, contract.id, installation.id, true).await?;
        let id = created.intervention.id;
        let now = Utc::now();

        let (a, b, c) = tokio::join!(
            append_note(&db, id, "alpha", now),
            append_note(&db, id, "beta", now),
            append_note(&db, id, "gamma", now),
        );
        a?;
        b?;
        c?;

        let notes = get_intervention(&db, id).await?.technical_notes;
        assert_eq!(notes.lines().count(), 3);
        for word in ["alpha", "beta", "gamma"] {
            assert!(notes.contains(word), "{word} missing from {notes:?}");
        }

        let missing = append_note(&db, 404, "nowhere", now).await;
        assert!(matches!(missing, Err(Error::NotFound { id: 404, .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_notes_are_appended_never_overwritten() -> Result<()> {
        let (db, contract, installation) = setup_with_contract(Some(5)).await?;
        let created = create_test_intervention(&db, contract.id, installation.id, true).await?;
        let id = created.intervention.id;

        append_note(&db, id, "first visit", Utc::now()).await?;
        close(
            &db,
            id,
            Some(InterventionOutcome::IncludedInSummary),
            Some("second"),
            1,
            Utc::now(),
        )
        .await?;

        let notes = get_intervention(&db, id).await?.technical_notes;
        let lines: Vec<_> = notes.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("first visit"));
        assert!(lines[1].ends_with("second"));
        Ok(())
    }

    #[tokio::test]
    async fn test_close_then_reopen_by_supervisor() -> Result<()> {
        let (db, contract, installation) = setup_with_contract(Some(5)).await?;
        let created = create_test_intervention(&db, contract.id, installation.id, true).await?;
        let id = created.intervention.id;
        close_test_intervention(&db, id).await?;

        let reopened = reopen(&db, id, 3, OperatorRole::Supervisor, Utc::now()).await?;
        assert_eq!(reopened.record.state, InterventionState::Open);
        assert!(reopened.record.outcome.is_none());
        assert!(reopened.record.closed_at.is_none());
        assert!(reopened.record.closed_by.is_none());
        assert!(reopened.has(|e| matches!(
            e,
            DomainEvent::InterventionReopened { actor_id: 3, .. }
        )));
        Ok(())
    }

    #[tokio::test]
    async fn test_reopen_by_non_privileged_leaves_state_unchanged() -> Result<()> {
        let (db, contract, installation) = setup_with_contract(Some(5)).await?;
        let created = create_test_intervention(&db, contract.id, installation.id, true).await?;
        let id = created.intervention.id;
        close_test_intervention(&db, id).await?;

        let result = reopen(&db, id, 3, OperatorRole::Administration, Utc::now()).await;
        assert!(matches!(result, Err(Error::Permission { .. })));

        let current = get_intervention(&db, id).await?;
        assert_eq!(current.state, InterventionState::Closed);
        assert_eq!(current.outcome, Some(InterventionOutcome::ToInvoice));
        Ok(())
    }

    #[tokio::test]
    async fn test_reopen_open_intervention_is_invalid() -> Result<()> {
        let (db, contract, installation) = setup_with_contract(Some(5)).await?;
        let created = create_test_intervention(&db, contract.id, installation.id, true).await?;

        let result = reopen(
            &db,
            created.intervention.id,
            3,
            OperatorRole::ProjectManager,
            Utc::now(),
        )
        .await;
        assert!(matches!(result, Err(Error::InvalidTransition { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_mark_invoiced_on_do_not_invoice_is_invalid() -> Result<()> {
        let (db, contract, installation) = setup_with_contract(Some(5)).await?;
        let created = create_test_intervention(&db, contract.id, installation.id, true).await?;
        let id = created.intervention.id;
        close(
            &db,
            id,
            Some(InterventionOutcome::DoNotInvoice),
            None,
            1,
            Utc::now(),
        )
        .await?;

        let result = mark_invoiced(&db, id, "INV-100", test_today()).await;
        assert!(matches!(result, Err(Error::InvalidTransition { .. })));
        assert!(get_intervention(&db, id).await?.invoice_number.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_mark_invoiced_on_to_invoice() -> Result<()> {
        let (db, contract, installation) = setup_with_contract(Some(5)).await?;
        let created = create_test_intervention(&db, contract.id, installation.id, true).await?;
        let id = created.intervention.id;
        close_test_intervention(&db, id).await?;

        let invoiced = mark_invoiced(&db, id, " INV-100 ", test_today()).await?;
        assert_eq!(invoiced.record.invoice_number.as_deref(), Some("INV-100"));
        assert_eq!(invoiced.record.invoiced_on, Some(test_today()));
        assert_eq!(invoiced.record.status_label(), "INVOICED");
        assert!(invoice_due(&db).await?.is_empty());

        // A second issue is rejected, and an invoiced intervention cannot be reopened
        let again = mark_invoiced(&db, id, "INV-101", test_today()).await;
        assert!(matches!(again, Err(Error::InvalidTransition { .. })));
        let reopen_result = reopen(&db, id, 1, OperatorRole::Supervisor, Utc::now()).await;
        assert!(matches!(reopen_result, Err(Error::InvalidTransition { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_create_rejects_installation_of_other_client() -> Result<()> {
        let (db, contract, _) = setup_with_contract(Some(5)).await?;
        let foreign = create_test_installation(&db, contract.client_id + 1, "Elsewhere").await?;

        let result = create_intervention(
            &db,
            NewIntervention {
                contract_id: contract.id,
                installation_id: foreign.id,
                performed_on: test_today(),
                description: "visit".to_string(),
                requested_included: true,
                invoice_reference: None,
                warehouse_code: None,
            },
            Utc::now(),
        )
        .await;
        assert!(matches!(result, Err(Error::Validation { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_quota_end_to_end_downgrade() -> Result<()> {
        // quota 10 with 9 already consumed: the 10th fits, the 11th is downgraded
        let (db, contract, installation) = setup_with_contract(Some(10)).await?;
        for _ in 0..9 {
            create_test_intervention(&db, contract.id, installation.id, true).await?;
        }

        let first = create_test_intervention(&db, contract.id, installation.id, true).await?;
        assert!(first.intervention.included);
        assert!(first.downgrade_note.is_none());
        assert_eq!(entitlement::consumed_included(&db, contract.id).await?, 10);

        let second = create_test_intervention(&db, contract.id, installation.id, true).await?;
        assert!(!second.intervention.included);
        assert_eq!(
            second.downgrade_note.as_deref(),
            Some(entitlement::QUOTA_EXHAUSTED_NOTE)
        );
        assert!(
            second
                .intervention
                .technical_notes
                .contains(entitlement::QUOTA_EXHAUSTED_NOTE)
        );
        assert_eq!(entitlement::consumed_included(&db, contract.id).await?, 10);
        Ok(())
    }
}
