//! Renewal lifecycle - TO_NOTIFY → NOTIFIED → CONFIRMED → TO_INVOICE → INVOICED,
//! with NOT_RENEWED reachable from every non-terminal stage.
//!
//! Guards are expressed as the set of stages a transition may start from and are
//! enforced inside the UPDATE statement itself.

use crate::{
    core::events::{DomainEvent, Transitioned},
    entities::{
        RenewalItem,
        enums::{RenewalItemType, RenewalStage},
        renewal_item,
    },
    errors::{Error, Result},
};
use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::{QueryOrder, Set, UpdateMany, prelude::*, sea_query::Expr};
use tracing::{debug, info, instrument};

const ENTITY: &str = "renewal item";

const NOTIFY_FROM: &[RenewalStage] = &[RenewalStage::ToNotify];
const CONFIRM_FROM: &[RenewalStage] = &[RenewalStage::ToNotify, RenewalStage::Notified];
const REQUEST_INVOICE_FROM: &[RenewalStage] = &[RenewalStage::Confirmed];
const INVOICE_FROM: &[RenewalStage] = &[RenewalStage::ToInvoice];
const NOT_RENEWED_FROM: &[RenewalStage] = &[
    RenewalStage::ToNotify,
    RenewalStage::Notified,
    RenewalStage::Confirmed,
    RenewalStage::ToInvoice,
];

/// Input for tracking a new renewal
#[derive(Debug, Clone)]
pub struct NewRenewalItem {
    /// Client the item belongs to
    pub client_id: i64,
    /// Covered installation, if site-specific
    pub installation_id: Option<i64>,
    /// License or service
    pub item_type: RenewalItemType,
    /// Human reference, must not be blank
    pub reference: String,
    /// Day the renewal falls due
    pub due_on: NaiveDate,
}

impl renewal_item::Model {
    /// Status name used by notification stop lists: the stage.
    #[must_use]
    pub fn status_label(&self) -> String {
        self.stage.to_string()
    }
}

/// Registers a renewal in TO_NOTIFY.
pub async fn create_renewal_item<C>(db: &C, new: NewRenewalItem) -> Result<renewal_item::Model>
where
    C: ConnectionTrait,
{
    if new.reference.trim().is_empty() {
        return Err(Error::validation("Renewal reference cannot be empty"));
    }

    let model = renewal_item::ActiveModel {
        client_id: Set(new.client_id),
        installation_id: Set(new.installation_id),
        item_type: Set(new.item_type),
        reference: Set(new.reference.trim().to_string()),
        due_on: Set(new.due_on),
        stage: Set(RenewalStage::ToNotify),
        stage1_notified_at: Set(None),
        stage1_recipients: Set(None),
        confirmed_by: Set(None),
        confirmed_at: Set(None),
        invoice_requested_at: Set(None),
        stage2_notified_at: Set(None),
        stage2_recipients: Set(None),
        invoice_number: Set(None),
        invoiced_at: Set(None),
        not_renewed_at: Set(None),
        ..Default::default()
    };
    model.insert(db).await.map_err(Into::into)
}

/// Loads a renewal item or reports it missing.
pub async fn get_renewal_item<C>(db: &C, item_id: i64) -> Result<renewal_item::Model>
where
    C: ConnectionTrait,
{
    RenewalItem::find_by_id(item_id)
        .one(db)
        .await?
        .ok_or(Error::NotFound {
            entity: ENTITY,
            id: item_id,
        })
}

/// Renewal items still in progress (not invoiced, not dropped), by due date.
pub async fn open_renewal_items<C>(db: &C) -> Result<Vec<renewal_item::Model>>
where
    C: ConnectionTrait,
{
    RenewalItem::find()
        .filter(
            renewal_item::Column::Stage
                .is_not_in([RenewalStage::Invoiced, RenewalStage::NotRenewed]),
        )
        .order_by_asc(renewal_item::Column::DueOn)
        .order_by_asc(renewal_item::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Applies `update` only if the item currently sits in one of `allowed`.
async fn apply<C>(
    db: &C,
    item_id: i64,
    action: &'static str,
    allowed: &[RenewalStage],
    update: UpdateMany<RenewalItem>,
) -> Result<renewal_item::Model>
where
    C: ConnectionTrait,
{
    let result = update
        .filter(renewal_item::Column::Id.eq(item_id))
        .filter(renewal_item::Column::Stage.is_in(allowed.iter().copied()))
        .exec(db)
        .await?;

    if result.rows_affected == 0 {
        let current = get_renewal_item(db, item_id).await?;
        return Err(Error::InvalidTransition {
            entity: ENTITY,
            id: item_id,
            action,
            current: current.stage.to_string(),
        });
    }

    let updated = get_renewal_item(db, item_id).await?;
    debug!(item_id, stage = %updated.stage, "Renewal item transitioned");
    Ok(updated)
}

fn to_stage(stage: RenewalStage) -> UpdateMany<RenewalItem> {
    RenewalItem::update_many().col_expr(renewal_item::Column::Stage, Expr::value(stage))
}

/// Stage-1: the "please confirm" alert went out.
#[instrument(skip(db, recipients))]
pub async fn notify_stage1<C>(
    db: &C,
    item_id: i64,
    recipients: &[String],
    now: DateTime<Utc>,
) -> Result<Transitioned<renewal_item::Model>>
where
    C: ConnectionTrait,
{
    let update = to_stage(RenewalStage::Notified)
        .col_expr(
            renewal_item::Column::Stage1NotifiedAt,
            Expr::value(Some(now)),
        )
        .col_expr(
            renewal_item::Column::Stage1Recipients,
            Expr::value(Some(recipients.join(", "))),
        );
    let item = apply(db, item_id, "notify", NOTIFY_FROM, update).await?;
    Ok(Transitioned::new(
        item,
        vec![DomainEvent::RenewalNotified { item_id }],
    ))
}

/// TO_NOTIFY or NOTIFIED → CONFIRMED, recording who confirmed.
#[instrument(skip(db))]
pub async fn confirm<C>(
    db: &C,
    item_id: i64,
    actor_id: i64,
    now: DateTime<Utc>,
) -> Result<Transitioned<renewal_item::Model>>
where
    C: ConnectionTrait,
{
    let update = to_stage(RenewalStage::Confirmed)
        .col_expr(renewal_item::Column::ConfirmedBy, Expr::value(Some(actor_id)))
        .col_expr(renewal_item::Column::ConfirmedAt, Expr::value(Some(now)));
    let item = apply(db, item_id, "confirm", CONFIRM_FROM, update).await?;
    info!(item_id, actor_id, "Renewal confirmed");
    Ok(Transitioned::new(
        item,
        vec![DomainEvent::RenewalConfirmed { item_id, actor_id }],
    ))
}

/// Moves a confirmed item to TO_INVOICE. The returned event asks for the stage-2 alert.
#[instrument(skip(db))]
pub async fn request_invoice<C>(
    db: &C,
    item_id: i64,
    now: DateTime<Utc>,
) -> Result<Transitioned<renewal_item::Model>>
where
    C: ConnectionTrait,
{
    let update = to_stage(RenewalStage::ToInvoice).col_expr(
        renewal_item::Column::InvoiceRequestedAt,
        Expr::value(Some(now)),
    );
    let item = apply(db, item_id, "request invoice for", REQUEST_INVOICE_FROM, update).await?;
    Ok(Transitioned::new(
        item,
        vec![DomainEvent::RenewalInvoiceRequested { item_id }],
    ))
}

/// Records who received the stage-2 alert. Does not change the stage.
pub async fn record_stage2<C>(
    db: &C,
    item_id: i64,
    recipients: &[String],
    now: DateTime<Utc>,
) -> Result<renewal_item::Model>
where
    C: ConnectionTrait,
{
    let update = RenewalItem::update_many()
        .col_expr(
            renewal_item::Column::Stage2NotifiedAt,
            Expr::value(Some(now)),
        )
        .col_expr(
            renewal_item::Column::Stage2Recipients,
            Expr::value(Some(recipients.join(", "))),
        );
    apply(db, item_id, "record stage-2 alert for", INVOICE_FROM, update).await
}

/// TO_INVOICE → INVOICED with a non-blank invoice number.
#[instrument(skip(db))]
pub async fn mark_invoiced<C>(
    db: &C,
    item_id: i64,
    invoice_number: &str,
    now: DateTime<Utc>,
) -> Result<Transitioned<renewal_item::Model>>
where
    C: ConnectionTrait,
{
    let invoice_number = invoice_number.trim();
    if invoice_number.is_empty() {
        return Err(Error::validation("Invoice number cannot be blank"));
    }

    let update = to_stage(RenewalStage::Invoiced)
        .col_expr(
            renewal_item::Column::InvoiceNumber,
            Expr::value(Some(invoice_number.to_string())),
        )
        .col_expr(renewal_item::Column::InvoicedAt, Expr::value(Some(now)));
    let item = apply(db, item_id, "invoice", INVOICE_FROM, update).await?;
    Ok(Transitioned::new(
        item,
        vec![DomainEvent::RenewalInvoiced { item_id }],
    ))
}

/// Any non-terminal stage → NOT_RENEWED.
#[instrument(skip(db))]
pub async fn mark_not_renewed<C>(
    db: &C,
    item_id: i64,
    now: DateTime<Utc>,
) -> Result<Transitioned<renewal_item::Model>>
where
    C: ConnectionTrait,
{
    let update = to_stage(RenewalStage::NotRenewed)
        .col_expr(renewal_item::Column::NotRenewedAt, Expr::value(Some(now)));
    let item = apply(db, item_id, "drop", NOT_RENEWED_FROM, update).await?;
    info!(item_id, "Renewal marked as not renewed");
    Ok(Transitioned::new(
        item,
        vec![DomainEvent::RenewalNotRenewed { item_id }],
    ))
}
