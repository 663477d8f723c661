//! Domain events emitted by the state machines.
//!
//! Transitions return the updated record together with the events it produced;
//! the engine turns events into dispatcher calls.

use crate::entities::enums::InterventionOutcome;
use chrono::{DateTime, Utc};

/// Something that happened to an intervention or renewal item
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainEvent {
    /// A visit was recorded
    InterventionCreated {
        /// New intervention id
        intervention_id: i64,
        /// True when the visit asked to be included and was made extra
        downgraded: bool,
    },
    /// A visit was closed with a billing outcome
    InterventionClosed {
        /// Closed intervention id
        intervention_id: i64,
        /// Billing outcome chosen at close
        outcome: InterventionOutcome,
    },
    /// The intervention is closed as TO_INVOICE and has no invoice yet
    InvoiceDue {
        /// Intervention waiting for its invoice
        intervention_id: i64,
    },
    /// A closed visit went back to OPEN
    InterventionReopened {
        /// Reopened intervention id
        intervention_id: i64,
        /// Operator who reopened it
        actor_id: i64,
        /// When it was reopened
        at: DateTime<Utc>,
    },
    /// The invoice of a visit was issued
    InterventionInvoiced {
        /// Invoiced intervention id
        intervention_id: i64,
    },
    /// Stage-1 alert sent
    RenewalNotified {
        /// Renewal item id
        item_id: i64,
    },
    /// Renewal confirmed
    RenewalConfirmed {
        /// Renewal item id
        item_id: i64,
        /// Operator who confirmed
        actor_id: i64,
    },
    /// Invoicing requested, stage-2 alert due
    RenewalInvoiceRequested {
        /// Renewal item id
        item_id: i64,
    },
    /// Renewal invoice issued
    RenewalInvoiced {
        /// Renewal item id
        item_id: i64,
    },
    /// Renewal dropped
    RenewalNotRenewed {
        /// Renewal item id
        item_id: i64,
    },
}

/// A record after a successful transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transitioned<T> {
    /// The record as stored after the transition
    pub record: T,
    /// Events produced, in order
    pub events: Vec<DomainEvent>,
}

impl<T> Transitioned<T> {
    pub(crate) const fn new(record: T, events: Vec<DomainEvent>) -> Self {
        Self { record, events }
    }

    /// Whether any event matches `predicate`.
    #[must_use]
    pub fn has(&self, predicate: impl Fn(&DomainEvent) -> bool) -> bool {
        self.events.iter().any(predicate)
    }
}
