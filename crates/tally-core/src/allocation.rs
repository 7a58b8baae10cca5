//! # Quota Allocation Engine
//!
//! Decides how a payment is split across a sale's quotas, and how a payment
//! is undone. Pure functions: callers load the quotas, this module returns
//! what must change, callers persist it.
//!
//! ## Two Modes
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Mode A: Selected (bulk)                                                │
//! │  ───────────────────────                                                │
//! │  Caller picks quotas. Each selected quota is closed in full. The        │
//! │  payment amount is derived: sum of what is pending on the selection.    │
//! │                                                                         │
//! │    [Q1 1000/0] [Q3 1000/400]   →   amount = 1000 + 600 = 1600           │
//! │                                                                         │
//! │  Mode B: Sequential                                                     │
//! │  ──────────────────                                                     │
//! │  Caller gives an amount. It is poured into unpaid quotas in ascending   │
//! │  quota number; the last touched quota may stay partially paid.          │
//! │                                                                         │
//! │    2500 → [Q1 1000 ✓] [Q2 1000 ✓] [Q3 500/1000]                          │
//! │    3500 → [Q1 ✓] [Q2 ✓] [Q3 ✓] + 500 credit to the client              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Reversal
//! A payment's `affected_quotas` list is the only input to reversal. Each
//! entry subtracts exactly what it added; the quota status is re-derived from
//! its expiration date (`overdue` if past, otherwise `pending`).

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};

use crate::error::{CoreError, CoreResult};
use crate::money::Money;
use crate::requests::PaymentDetail;
use crate::types::{AffectedQuota, Payment, PaymentMethod, Quota, QuotaStatus, Sale};

// =============================================================================
// Allocation Output
// =============================================================================

/// New cumulative state of one quota after a payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaUpdate {
    pub quota_id: String,
    pub paid_amount_cents: i64,
    pub status: QuotaStatus,
}

/// Result of running either allocation mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    /// Audit trail to store on the payment, in application order.
    pub affected: Vec<AffectedQuota>,
    /// Quota writes to perform, same order as `affected`.
    pub updates: Vec<QuotaUpdate>,
    /// Sum of `affected[].amount_applied_cents`.
    pub applied: Money,
    /// Received money that found no quota; becomes client credit.
    pub credit: Money,
}

impl Allocation {
    /// Total money received: applied plus credit.
    pub fn received(&self) -> Money {
        self.applied + self.credit
    }

    pub fn quota_ids(&self) -> Vec<String> {
        self.affected.iter().map(|aq| aq.quota_id.clone()).collect()
    }
}

// =============================================================================
// Mode A: Selected Quotas
// =============================================================================

/// Closes every selected quota in full.
///
/// ## Arguments
/// * `sale_id` - Sale the payment is for
/// * `requested_ids` - Quota ids chosen by the caller (duplicates collapse)
/// * `quotas` - Quotas loaded for those ids
///
/// ## Errors
/// - `QuotasNotFound` if any requested id did not load
/// - `QuotaSaleMismatch` if a quota belongs to another sale
/// - `QuotaAlreadyPaid` if a quota is already paid
/// - `InvalidPaymentAmount` if nothing is pending on the selection
pub fn allocate_selected(
    sale_id: &str,
    requested_ids: &[String],
    quotas: &[Quota],
) -> CoreResult<Allocation> {
    let mut seen = HashSet::new();
    let unique_ids: Vec<&String> = requested_ids
        .iter()
        .filter(|id| seen.insert(id.as_str()))
        .collect();

    let by_id: HashMap<&str, &Quota> = quotas.iter().map(|q| (q.id.as_str(), q)).collect();

    let missing: Vec<String> = unique_ids
        .iter()
        .filter(|id| !by_id.contains_key(id.as_str()))
        .map(|id| id.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(CoreError::QuotasNotFound { missing });
    }

    let mut selected: Vec<&Quota> = unique_ids
        .iter()
        .filter_map(|id| by_id.get(id.as_str()).copied())
        .collect();
    selected.sort_by_key(|q| q.quota_number);

    let mut allocation = empty_allocation();

    for quota in selected {
        if quota.sale_id != sale_id {
            return Err(CoreError::QuotaSaleMismatch {
                quota_id: quota.id.clone(),
                sale_id: sale_id.to_string(),
            });
        }
        if quota.is_paid() {
            return Err(CoreError::QuotaAlreadyPaid(quota.id.clone()));
        }

        let pending = quota.pending_cents();
        if pending <= 0 {
            continue;
        }

        allocation.record(quota, pending);
    }

    if !allocation.applied.is_positive() {
        return Err(CoreError::InvalidPaymentAmount {
            reason: "selected quotas have nothing pending".to_string(),
        });
    }

    Ok(allocation)
}

// =============================================================================
// Mode B: Sequential
// =============================================================================

/// Pours `amount` into `unpaid` oldest quota first.
///
/// Quotas are walked in ascending `quota_number` regardless of input order.
/// Anything left after the last quota is returned as `credit`.
pub fn allocate_sequential(sale_id: &str, amount: Money, unpaid: &[Quota]) -> CoreResult<Allocation> {
    if !amount.is_positive() {
        return Err(CoreError::InvalidPaymentAmount {
            reason: "amount must be greater than zero".to_string(),
        });
    }

    let mut ordered: Vec<&Quota> = unpaid.iter().filter(|q| !q.is_paid()).collect();
    if ordered.is_empty() {
        return Err(CoreError::NoUnpaidQuotas(sale_id.to_string()));
    }
    ordered.sort_by_key(|q| q.quota_number);

    let mut allocation = empty_allocation();
    let mut remaining = amount.cents();

    for quota in ordered {
        if remaining == 0 {
            break;
        }
        if quota.sale_id != sale_id {
            return Err(CoreError::QuotaSaleMismatch {
                quota_id: quota.id.clone(),
                sale_id: sale_id.to_string(),
            });
        }

        let pending = quota.pending_cents();
        if pending <= 0 {
            continue;
        }

        let to_apply = remaining.min(pending);
        allocation.record(quota, to_apply);
        remaining -= to_apply;
    }

    allocation.credit = Money::from_cents(remaining);
    Ok(allocation)
}

fn empty_allocation() -> Allocation {
    Allocation {
        affected: Vec::new(),
        updates: Vec::new(),
        applied: Money::zero(),
        credit: Money::zero(),
    }
}

impl Allocation {
    fn record(&mut self, quota: &Quota, cents: i64) {
        let paid = quota.paid_amount_cents + cents;
        let status = if paid >= quota.amount_cents {
            QuotaStatus::Paid
        } else {
            quota.status
        };

        self.affected.push(AffectedQuota {
            quota_id: quota.id.clone(),
            amount_applied_cents: cents,
        });
        self.updates.push(QuotaUpdate {
            quota_id: quota.id.clone(),
            paid_amount_cents: paid,
            status,
        });
        self.applied += Money::from_cents(cents);
    }
}

// =============================================================================
// Payment Metadata
// =============================================================================

/// The single method shared by every detail, or `Other` when they differ.
pub fn resolve_method(details: &[PaymentDetail]) -> PaymentMethod {
    let mut methods = details.iter().map(|d| d.method);
    let Some(first) = methods.next() else {
        return PaymentMethod::Other;
    };
    if methods.all(|m| m == first) {
        first
    } else {
        PaymentMethod::Other
    }
}

/// Human text recorded on a payment that produced client credit.
pub fn overpayment_note(credit: Money) -> String {
    format!("Credited a balance of {} to the client", credit)
}

/// Joins caller notes with the generated overpayment note.
pub fn merge_notes(user_notes: Option<&str>, generated: Option<String>) -> Option<String> {
    let user_notes = user_notes.map(str::trim).filter(|n| !n.is_empty());
    match (user_notes, generated) {
        (Some(user), Some(generated)) => Some(format!("{}. {}", user, generated)),
        (Some(user), None) => Some(user.to_string()),
        (None, generated) => generated,
    }
}

// =============================================================================
// Sale Totals
// =============================================================================

/// Whether applying `applied` to the sale finishes it.
pub fn completes_sale(sale: &Sale, applied: Money) -> bool {
    sale.collected() + applied >= sale.total()
}

// =============================================================================
// Reversal Planning
// =============================================================================

/// Undo instruction for one quota.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReversalInstruction {
    pub quota_id: String,
    pub amount_to_revert_cents: i64,
    pub new_status: QuotaStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReversalPlan {
    pub instructions: Vec<ReversalInstruction>,
    /// Money that was applied to quotas and now comes off the sale.
    pub applied: Money,
    /// Credit granted by the payment that must be taken back from the client.
    pub credit_to_revert: Money,
}

/// Builds the reversal of `payment` from its stored breakdown.
///
/// ## Errors
/// - `PaymentAlreadyReverted` if the payment was already reverted
/// - `PaymentSaleMismatch` if the payment belongs to another sale
/// - `Inconsistent` if a quota named in the breakdown is not in `quotas`
pub fn plan_reversal(
    sale_id: &str,
    payment: &Payment,
    quotas: &[Quota],
    now: DateTime<Utc>,
) -> CoreResult<ReversalPlan> {
    if payment.is_reverted() {
        return Err(CoreError::PaymentAlreadyReverted(payment.id.clone()));
    }
    if payment.sale_id != sale_id {
        return Err(CoreError::PaymentSaleMismatch {
            payment_id: payment.id.clone(),
            sale_id: sale_id.to_string(),
        });
    }

    let by_id: HashMap<&str, &Quota> = quotas.iter().map(|q| (q.id.as_str(), q)).collect();

    let mut instructions = Vec::with_capacity(payment.affected_quotas.len());
    for affected in &payment.affected_quotas {
        let quota = by_id.get(affected.quota_id.as_str()).ok_or_else(|| {
            CoreError::Inconsistent(format!(
                "payment {} references missing quota {}",
                payment.id, affected.quota_id
            ))
        })?;

        let new_status = if now > quota.expiration_date {
            QuotaStatus::Overdue
        } else {
            QuotaStatus::Pending
        };

        instructions.push(ReversalInstruction {
            quota_id: affected.quota_id.clone(),
            amount_to_revert_cents: affected.amount_applied_cents,
            new_status,
        });
    }

    let applied = payment.applied();
    let credit = payment.amount() - applied;

    Ok(ReversalPlan {
        instructions,
        applied,
        credit_to_revert: if credit.is_positive() {
            credit
        } else {
            Money::zero()
        },
    })
}

// =============================================================================
// Unit Tests
// =============================================================================
