//! Entitlement tracking - consumed vs. included interventions under a contract.
//!
//! The consumed count is always recomputed from the interventions table; it is never
//! stored on the contract, so it cannot drift.

use crate::{
    entities::{Contract, Intervention, contract, intervention},
    errors::Result,
};
use chrono::NaiveDate;
use sea_orm::{ConnectionTrait, PaginatorTrait, QueryOrder, QuerySelect, Select, prelude::*};

/// Note attached to an intervention that asked to be included but found no quota left
pub const QUOTA_EXHAUSTED_NOTE: &str = "auto-downgraded: quota exhausted";

/// Result of classifying a new intervention against its contract
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    /// Final value of the `included` flag
    pub included: bool,
    /// Present when the request was downgraded
    pub note: Option<&'static str>,
}

/// Remaining entitlement for display
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Residual {
    Unlimited,
    Remaining(u64),
}

impl std::fmt::Display for Residual {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unlimited => f.write_str("unlimited"),
            Self::Remaining(n) => write!(f, "{n}"),
        }
    }
}

/// Decides whether a new intervention is included in the quota or billed as extra.
///
/// Unlimited contracts and contracts without a quota keep the requested value.
/// Otherwise a request for an included intervention is downgraded once the number
/// of already included interventions reaches the quota.
#[must_use]
pub fn classify(
    contract: &contract::Model,
    consumed_included: u64,
    requested_included: bool,
) -> Classification {
    let unchanged = Classification {
        included: requested_included,
        note: None,
    };

    if contract.unlimited {
        return unchanged;
    }
    let Some(quota) = contract.included_quota else {
        return unchanged;
    };

    if requested_included && consumed_included >= quota_as_u64(quota) {
        Classification {
            included: false,
            note: Some(QUOTA_EXHAUSTED_NOTE),
        }
    } else {
        unchanged
    }
}

/// Remaining included interventions, `max(0, quota - consumed)`.
#[must_use]
pub fn residual(contract: &contract::Model, consumed_included: u64) -> Residual {
    match contract.included_quota {
        Some(quota) if !contract.unlimited => {
            Residual::Remaining(quota_as_u64(quota).saturating_sub(consumed_included))
        }
        _ => Residual::Unlimited,
    }
}

// Negative quotas are treated as zero.
fn quota_as_u64(quota: i32) -> u64 {
    u64::try_from(quota).unwrap_or(0)
}

/// Counts interventions flagged as included under a contract, regardless of state.
pub async fn consumed_included<C>(db: &C, contract_id: i64) -> Result<u64>
where
    C: ConnectionTrait,
{
    Intervention::find()
        .filter(intervention::Column::ContractId.eq(contract_id))
        .filter(intervention::Column::Included.eq(true))
        .count(db)
        .await
        .map_err(Into::into)
}

/// Loads a contract or reports it missing.
pub async fn get_contract<C>(db: &C, contract_id: i64) -> Result<contract::Model>
where
    C: ConnectionTrait,
{
    Contract::find_by_id(contract_id)
        .one(db)
        .await?
        .ok_or(crate::errors::Error::NotFound {
            entity: "contract",
            id: contract_id,
        })
}

/// Reads a contract and locks its row until the surrounding transaction ends.
///
/// Serializes quota checks of concurrent inserts on backends with row locks;
/// `SQLite` omits the clause and relies on its single writer instead.
pub async fn lock_contract<C>(db: &C, contract_id: i64) -> Result<contract::Model>
where
    C: ConnectionTrait,
{
    locked_contract_query(contract_id)
        .one(db)
        .await?
        .ok_or(crate::errors::Error::NotFound {
            entity: "contract",
            id: contract_id,
        })
}

fn locked_contract_query(contract_id: i64) -> Select<Contract> {
    Contract::find_by_id(contract_id).lock_exclusive()
}

/// Residual entitlement of a stored contract.
pub async fn contract_residual<C>(db: &C, contract_id: i64) -> Result<Residual>
where
    C: ConnectionTrait,
{
    let contract = get_contract(db, contract_id).await?;
    let consumed = consumed_included(db, contract_id).await?;
    Ok(residual(&contract, consumed))
}

/// Picks the active contract among a client's contracts.
///
/// Preference order: an evergreen contract, then the non-expired contract that
/// expires soonest, then (when everything has expired) the most recently created.
#[must_use]
pub fn select_active(contracts: &[contract::Model], today: NaiveDate) -> Option<&contract::Model> {
    if let Some(evergreen) = contracts
        .iter()
        .filter(|c| c.expires_on.is_none())
        .max_by_key(|c| c.created_at)
    {
        return Some(evergreen);
    }

    contracts
        .iter()
        .filter(|c| c.expires_on.is_some_and(|d| d >= today))
        .min_by_key(|c| c.expires_on)
        .or_else(|| contracts.iter().max_by_key(|c| (c.created_at, c.id)))
}

/// Loads the active contract of a client, if the client has any contract.
pub async fn active_contract<C>(
    db: &C,
    client_id: i64,
    today: NaiveDate,
) -> Result<Option<contract::Model>>
where
    C: ConnectionTrait,
{
    let contracts = Contract::find()
        .filter(contract::Column::ClientId.eq(client_id))
        .order_by_asc(contract::Column::Id)
        .all(db)
        .await?;
    Ok(select_active(&contracts, today).cloned())
}
